// openweather_exporter - Prometheus metrics exporter for the OpenWeather API
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use clap::Parser;
use openweather_exporter::client::{OpenWeatherClient, Units};
use openweather_exporter::geo::{self, NominatimGeocoder};
use openweather_exporter::http::RequestContext;
use openweather_exporter::metrics::WeatherCollector;
use reqwest::{Client, Url};
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{self, SignalKind};
use tracing::Level;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 9091);
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_TIMEOUT_MILLIS: u64 = 30_000;
const DEFAULT_CITY: &str = "Toronto, ON";
const DEFAULT_DEGREES_UNIT: &str = "C";
const DEFAULT_LANGUAGE: &str = "EN";
const DEFAULT_API_URL: &str = "https://api.openweathermap.org/";
const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org/";

#[derive(Debug, Parser)]
#[clap(name = "openweather_exporter", version = clap::crate_version!())]
struct OpenWeatherExporterApplication {
    /// OpenWeather API key
    #[clap(long, env = "OW_APIKEY", hide_env_values = true)]
    api_key: String,

    /// Locations to fetch weather for, separated by '|'. For example 'Toronto, ON|Paris, FR'
    #[clap(long, env = "OW_CITY", default_value_t = DEFAULT_CITY.into())]
    city: String,

    /// Unit for temperatures: 'C' for metric, 'F' for imperial, anything else for
    /// standard (Kelvin)
    #[clap(long, env = "OW_DEGREES_UNIT", default_value_t = DEFAULT_DEGREES_UNIT.into())]
    degrees_unit: String,

    /// Language preference. Currently only logged
    #[clap(long, env = "OW_LANGUAGE", default_value_t = DEFAULT_LANGUAGE.into())]
    language: String,

    /// Keep readings from the OpenWeather API for this long before fetching them again,
    /// in seconds. Must be at least 1.
    #[clap(long, env = "OW_CACHE_TTL", default_value_t = DEFAULT_CACHE_TTL_SECS,
        value_parser = clap::value_parser!(u64).range(1..))]
    cache_ttl: u64,

    /// Base URL for the OpenWeather API
    #[clap(long, env = "OW_API_URL", default_value = DEFAULT_API_URL)]
    api_url: Url,

    /// Base URL for the Nominatim geocoding API used to resolve locations at startup
    #[clap(long, env = "OW_GEOCODER_URL", default_value = DEFAULT_GEOCODER_URL)]
    geocoder_url: Url,

    /// Timeout for each request to the OpenWeather and Nominatim APIs, in milliseconds.
    #[clap(long, env = "OW_TIMEOUT_MILLIS", default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, env = "OW_LOG_LEVEL", default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Address to bind to. By default, openweather_exporter will bind to public address since
    /// the purpose is to expose metrics to an external system (Prometheus or another
    /// agent for ingestion)
    #[clap(long, env = "OW_LISTEN_ADDRESS", default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = OpenWeatherExporterApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let timeout = Duration::from_millis(opts.timeout_millis);
    let http_client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    // Resolve every location before serving anything. Running with only some of the
    // locations the user asked for would be silently wrong, so any failure here is fatal.
    let geocoder = NominatimGeocoder::new(http_client.clone(), opts.geocoder_url.clone());
    let locations = geo::resolve_locations(&geocoder, &opts.city)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(message = "failed to resolve locations", locations = %opts.city, error = %e);
            process::exit(1)
        });

    let units = Units::from_degrees(&opts.degrees_unit);
    let ttl = Duration::from_secs(opts.cache_ttl);
    tracing::info!(
        message = "resolved locations",
        num_locations = locations.len(),
        units = %units,
        language = %opts.language,
        cache_ttl_secs = opts.cache_ttl,
    );

    let client = OpenWeatherClient::new(http_client, opts.api_url.clone(), opts.api_key);
    let collector = WeatherCollector::new(client, locations, units, ttl);
    let context = Arc::new(RequestContext::new(collector));
    let app = openweather_exporter::http::app(context);

    let server = axum::Server::try_bind(&opts.bind)
        .unwrap_or_else(|e| {
            tracing::error!(message = "error binding to address", address = %opts.bind, error = %e);
            process::exit(1)
        })
        .serve(app.into_make_service());

    tracing::info!(message = "server started", address = %server.local_addr(), api_url = %opts.api_url);
    server
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    tracing::info!("server shutdown");
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
