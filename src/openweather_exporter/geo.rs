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
use serde::{Deserialize, Serialize};
use std::error;
use std::fmt;
use std::future::Future;

/// Separator between location names in the configured location list.
pub const LOCATION_SEPARATOR: char = '|';

#[derive(Debug)]
pub enum GeoError {
    Internal(reqwest::Error),
    Unexpected(StatusCode, Url),
    NotFound(String),
    InvalidCoordinates(String),
    EmptyName,
}

impl fmt::Display for GeoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(e) => write!(f, "{}", e),
            Self::Unexpected(status, url) => write!(f, "unexpected status {} for {}", status, url),
            Self::NotFound(name) => write!(f, "no coordinates found for location {}", name),
            Self::InvalidCoordinates(name) => write!(f, "invalid coordinates returned for location {}", name),
            Self::EmptyName => write!(f, "empty location name"),
        }
    }
}

impl error::Error for GeoError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Internal(e) => Some(e),
            _ => None,
        }
    }
}

/// Named point that weather information is fetched for. Created once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    name: String,
    latitude: f64,
    longitude: f64,
}

impl Location {
    pub fn new<S: Into<String>>(name: S, latitude: f64, longitude: f64) -> Self {
        Location {
            name: name.into(),
            latitude,
            longitude,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Something that can turn a place name into `(latitude, longitude)`.
pub trait Geocoder {
    fn coordinates(&self, name: &str) -> impl Future<Output = Result<(f64, f64), GeoError>>;
}

/// Resolve a `|` separated list of location names into `Location`s.
///
/// Order and duplicates of the input are preserved. Names are trimmed of surrounding
/// whitespace. The first name that can't be resolved aborts the whole list: callers
/// are expected to treat this as fatal rather than run with some locations missing.
pub async fn resolve_locations<G: Geocoder>(geocoder: &G, names: &str) -> Result<Vec<Location>, GeoError> {
    let mut out = Vec::new();

    for name in names.split(LOCATION_SEPARATOR).map(str::trim) {
        if name.is_empty() {
            return Err(GeoError::EmptyName);
        }

        let (latitude, longitude) = geocoder.coordinates(name).await?;
        tracing::debug!(message = "resolved location", location = name, latitude, longitude);
        out.push(Location::new(name, latitude, longitude));
    }

    Ok(out)
}

/// Geocoder backed by the OpenStreetMap Nominatim search API.
#[derive(Debug)]
pub struct NominatimGeocoder {
    client: Client,
    base_url: Url,
}

impl NominatimGeocoder {
    const USER_AGENT: &'static str = "OpenWeather Prometheus Exporter (openweather_exporter)";
    const JSON_RESPONSE: &'static str = "application/json";

    pub fn new(client: Client, base_url: Url) -> Self {
        NominatimGeocoder { client, base_url }
    }

    fn search_url(&self, name: &str) -> Url {
        let mut url = self.base_url.clone();
        url.set_path("search");
        url.query_pairs_mut()
            .clear()
            .append_pair("q", name)
            .append_pair("format", "json")
            .append_pair("limit", "1");
        url
    }
}

impl Geocoder for NominatimGeocoder {
    async fn coordinates(&self, name: &str) -> Result<(f64, f64), GeoError> {
        let url = self.search_url(name);
        tracing::debug!(message = "making geocoding request", url = %url);

        let res = self
            .client
            .get(url.clone())
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .send()
            .await
            .map_err(GeoError::Internal)?;

        let status = res.status();
        if status != StatusCode::OK {
            return Err(GeoError::Unexpected(status, url));
        }

        let places = res.json::<Vec<Place>>().await.map_err(GeoError::Internal)?;
        let place = places.first().ok_or_else(|| GeoError::NotFound(name.to_owned()))?;

        match (place.lat.parse::<f64>(), place.lon.parse::<f64>()) {
            (Ok(lat), Ok(lon)) => Ok((lat, lon)),
            _ => Err(GeoError::InvalidCoordinates(name.to_owned())),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct Place {
    #[serde(alias = "lat")]
    lat: String,
    #[serde(alias = "lon")]
    lon: String,
}
