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

use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::error;
use std::fmt;
use std::future::Future;

#[derive(Debug)]
pub enum ClientError {
    Internal(reqwest::Error),
    Unexpected(StatusCode, Url),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(e) => write!(f, "{}", e),
            Self::Unexpected(status, url) => write!(f, "unexpected status {} for {}", status, url),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Internal(e) => Some(e),
            _ => None,
        }
    }
}

/// Unit system that provider values are reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Units {
    Metric,
    Imperial,
    Standard,
}

impl Units {
    /// Pick a unit system from a degrees preference: "C" for metric, "F" for imperial
    /// (case insensitive). Anything else, including an empty string, is standard (Kelvin).
    pub fn from_degrees(degrees: &str) -> Self {
        if degrees.eq_ignore_ascii_case("c") {
            Units::Metric
        } else if degrees.eq_ignore_ascii_case("f") {
            Units::Imperial
        } else {
            Units::Standard
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
            Units::Standard => "standard",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of fetching both endpoints for a single location.
///
/// Each reading is `None` when its request failed. The two are independent: one
/// failing never affects the other.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    pub weather: Option<WeatherReading>,
    pub pollution: Option<PollutionReading>,
}

/// Source of current weather and pollution readings for a pair of coordinates.
///
/// Implementations never fail outright, errors are logged and the affected reading
/// is left empty.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, latitude: f64, longitude: f64, units: Units) -> impl Future<Output = Conditions> + Send;
}

#[derive(Debug)]
pub struct OpenWeatherClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl OpenWeatherClient {
    const USER_AGENT: &'static str = "OpenWeather Prometheus Exporter (openweather_exporter)";
    const JSON_RESPONSE: &'static str = "application/json";

    pub fn new<S: Into<String>>(client: Client, base_url: Url, api_key: S) -> Self {
        OpenWeatherClient {
            client,
            base_url,
            api_key: api_key.into(),
        }
    }

    pub async fn current_weather(&self, latitude: f64, longitude: f64, units: Units) -> Result<OneCall, ClientError> {
        let url = self.onecall_url(latitude, longitude, units);
        tracing::debug!(message = "making current weather request", path = url.path(), latitude, longitude, units = %units);
        self.make_request(url).await
    }

    pub async fn air_pollution(&self, latitude: f64, longitude: f64) -> Result<PollutionReading, ClientError> {
        let url = self.pollution_url(latitude, longitude);
        tracing::debug!(message = "making air pollution request", path = url.path(), latitude, longitude);
        self.make_request(url).await
    }

    async fn make_request<T: DeserializeOwned>(&self, url: Url) -> Result<T, ClientError> {
        let res = self
            .client
            .get(url.clone())
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .send()
            .await
            .map_err(|e| ClientError::Internal(e.without_url()))?;

        let status = res.status();
        if status != StatusCode::OK {
            return Err(ClientError::Unexpected(status, redacted(url)));
        }

        res.json::<T>()
            .await
            .map_err(|e| ClientError::Internal(e.without_url()))
    }

    fn onecall_url(&self, latitude: f64, longitude: f64, units: Units) -> Url {
        let mut url = self.base_url.clone();
        url.set_path("data/2.5/onecall");
        url.query_pairs_mut()
            .clear()
            .append_pair("lat", &latitude.to_string())
            .append_pair("lon", &longitude.to_string())
            .append_pair("exclude", "minutely,hourly,daily")
            .append_pair("units", units.as_str())
            .append_pair("appid", &self.api_key);
        url
    }

    fn pollution_url(&self, latitude: f64, longitude: f64) -> Url {
        let mut url = self.base_url.clone();
        url.set_path("data/2.5/air_pollution");
        url.query_pairs_mut()
            .clear()
            .append_pair("lat", &latitude.to_string())
            .append_pair("lon", &longitude.to_string())
            .append_pair("appid", &self.api_key);
        url
    }
}

impl Fetcher for OpenWeatherClient {
    async fn fetch(&self, latitude: f64, longitude: f64, units: Units) -> Conditions {
        let (weather, pollution) = tokio::join!(
            self.current_weather(latitude, longitude, units),
            self.air_pollution(latitude, longitude),
        );

        let weather = match weather {
            Ok(w) => Some(w.current),
            Err(e) => {
                tracing::warn!(message = "failed to fetch current weather", latitude, longitude, error = %e);
                None
            }
        };

        let pollution = match pollution {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!(message = "failed to fetch air pollution", latitude, longitude, error = %e);
                None
            }
        };

        Conditions { weather, pollution }
    }
}

/// Drop the query string (which includes the API key) so the URL can be logged.
fn redacted(mut url: Url) -> Url {
    url.set_query(None);
    url
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct OneCall {
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lon")]
    pub longitude: f64,
    #[serde(alias = "timezone")]
    pub timezone: String,
    #[serde(alias = "timezone_offset")]
    pub timezone_offset: i64,
    #[serde(alias = "current")]
    pub current: WeatherReading,
}

/// Current atmospheric conditions. Every field is zero when the provider omits it.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct WeatherReading {
    #[serde(alias = "dt")]
    pub timestamp: i64,
    #[serde(alias = "sunrise")]
    pub sunrise: i64,
    #[serde(alias = "sunset")]
    pub sunset: i64,
    #[serde(alias = "temp")]
    pub temperature: f64,
    #[serde(alias = "feels_like")]
    pub feels_like: f64,
    #[serde(alias = "pressure")]
    pub pressure: f64,
    #[serde(alias = "humidity")]
    pub humidity: f64,
    #[serde(alias = "dew_point")]
    pub dew_point: f64,
    #[serde(alias = "uvi")]
    pub uvi: f64,
    #[serde(alias = "clouds")]
    pub clouds: i64,
    #[serde(alias = "visibility")]
    pub visibility: f64,
    #[serde(alias = "wind_speed")]
    pub wind_speed: f64,
    #[serde(alias = "wind_deg")]
    pub wind_degree: f64,
    #[serde(alias = "wind_gust")]
    pub wind_gust: f64,
    #[serde(alias = "rain")]
    pub rain: Precipitation,
    #[serde(alias = "snow")]
    pub snow: Precipitation,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Precipitation {
    #[serde(alias = "1h")]
    pub one_hour: f64,
}

/// Pollution observations, the first of which is the current one. May be empty.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PollutionReading {
    #[serde(alias = "list")]
    pub list: Vec<PollutionItem>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PollutionItem {
    #[serde(alias = "dt")]
    pub timestamp: i64,
    #[serde(alias = "main")]
    pub main: PollutionMain,
    #[serde(alias = "components")]
    pub components: PollutionComponents,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PollutionMain {
    #[serde(alias = "aqi")]
    pub aqi: i64,
}

/// Pollutant concentrations, in μg/m3.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PollutionComponents {
    #[serde(alias = "co")]
    pub co: f64,
    #[serde(alias = "no")]
    pub no: f64,
    #[serde(alias = "no2")]
    pub no2: f64,
    #[serde(alias = "o3")]
    pub o3: f64,
    #[serde(alias = "so2")]
    pub so2: f64,
    #[serde(alias = "pm2_5")]
    pub pm2_5: f64,
    #[serde(alias = "pm10")]
    pub pm10: f64,
    #[serde(alias = "nh3")]
    pub nh3: f64,
}
