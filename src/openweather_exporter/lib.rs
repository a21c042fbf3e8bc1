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

//! Prometheus metrics exporter for the OpenWeather API
//!
//! ## Features
//!
//! `openweather_exporter` fetches current weather and air pollution for one or more locations
//! using the [OpenWeather] API and emits them as Prometheus metrics. Locations are given by
//! name and resolved to coordinates once at startup using [Nominatim]. Readings are fetched
//! when Prometheus scrapes the exporter and cached for a configurable TTL. The following
//! metrics are emitted for each location.
//!
//! * `openweather_temperature{location=$LOCATION}` - Temperature, in the configured unit.
//! * `openweather_feelslike{location=$LOCATION}` - Perceived temperature, in the configured unit.
//! * `openweather_dewpoint{location=$LOCATION}` - Dewpoint, in the configured unit.
//! * `openweather_pressure{location=$LOCATION}` - Atmospheric pressure, in hPa.
//! * `openweather_humidity{location=$LOCATION}` - Relative humidity (0-100).
//! * `openweather_uvi{location=$LOCATION}` - UV index.
//! * `openweather_cloudiness{location=$LOCATION}` - Cloud cover (0-100).
//! * `openweather_visibility{location=$LOCATION}` - Visibility, in meters.
//! * `openweather_windspeed{location=$LOCATION}` - Wind speed, meters/sec or miles/hour.
//! * `openweather_winddegree{location=$LOCATION}` - Wind direction, in degrees.
//! * `openweather_windgust{location=$LOCATION}` - Wind gust, meters/sec or miles/hour.
//! * `openweather_rain1h{location=$LOCATION}` - Rain in the last hour, in millimeters.
//! * `openweather_snow1h{location=$LOCATION}` - Snow in the last hour, in millimeters.
//! * `openweather_sunrise{location=$LOCATION}` - Sunrise, unix timestamp.
//! * `openweather_sunset{location=$LOCATION}` - Sunset, unix timestamp.
//! * `openweather_weather_up{location=$LOCATION}` - 1 if the weather request succeeded.
//! * `openweather_pollution_up{location=$LOCATION}` - 1 if the pollution request succeeded.
//!
//! When air pollution data is available the following are also emitted.
//!
//! * `openweather_aqi{location=$LOCATION}` - Air quality index (1-5).
//! * `openweather_co`, `openweather_no`, `openweather_no2`, `openweather_o3`, `openweather_so2`,
//!   `openweather_pm2_5`, `openweather_pm10`, `openweather_nh3` `{location=$LOCATION}` -
//!   Pollutant concentrations, in μg/m3.
//!
//! If the weather request fails, weather metrics are reported as zero for that scrape and
//! `openweather_weather_up` is 0. If the pollution request fails, pollution metrics are left
//! out and `openweather_pollution_up` is 0.
//!
//! [OpenWeather]: https://openweathermap.org/api
//! [Nominatim]: https://nominatim.org/
//!
//! ## Build
//!
//! `openweather_exporter` is a Rust program and must be built from source using a
//! [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! An OpenWeather API key is required. Multiple locations are separated by `|`.
//!
//! ```text
//! ./openweather_exporter --api-key $KEY --city 'Toronto, ON|Paris, FR' --degrees-unit C
//! ```
//!
//! Every flag can also be set via an environment variable, see `--help`.
//!
//! ### Deployment
//!
//! Readings are fetched while a scrape is in progress. Each request to OpenWeather is
//! bounded by `--timeout-millis` and locations are fetched concurrently, so a scrape that
//! misses the cache can take up to the timeout before returning defaulted values. Set the
//! Prometheus `scrape_timeout` above the request timeout.
//!
//! The same location may be listed more than once. Each entry is collected but only one
//! series per metric is rendered for it. Requests in flight aren't shared between entries,
//! so on a cold cache a duplicated location is fetched once per entry, concurrently.
//!
//! ### Prometheus
//!
//! Prometheus metrics are exposed on port `9091` at `/metrics`.
//!
//! ```yaml
//! scrape_configs:
//! - job_name: openweather_exporter
//!   scrape_timeout: 45s
//!   static_configs:
//!   - targets: ['example:9091']
//! ```
//!

pub mod cache;
pub mod client;
pub mod geo;
pub mod http;
pub mod metrics;

#[cfg(test)]
mod testing;
