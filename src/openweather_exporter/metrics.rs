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

use crate::cache::TtlCache;
use crate::client::{Conditions, Fetcher, Units, WeatherReading};
use crate::geo::Location;
use futures_util::future;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

pub const LABEL_LOCATION: &str = "location";

const LOCATION_LABELS: &[&str] = &[LABEL_LOCATION];

/// Name, help text, and label names of a gauge. Independent of any value.
#[derive(Debug, PartialEq, Eq)]
pub struct Descriptor {
    name: &'static str,
    help: &'static str,
    labels: &'static [&'static str],
}

impl Descriptor {
    const fn gauge(name: &'static str, help: &'static str) -> Self {
        Descriptor {
            name,
            help,
            labels: LOCATION_LABELS,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn help(&self) -> &'static str {
        self.help
    }

    pub fn labels(&self) -> &'static [&'static str] {
        self.labels
    }
}

pub static TEMPERATURE: Descriptor = Descriptor::gauge("openweather_temperature", "Current temperature in degrees");
pub static HUMIDITY: Descriptor = Descriptor::gauge("openweather_humidity", "Current relative humidity");
pub static FEELS_LIKE: Descriptor =
    Descriptor::gauge("openweather_feelslike", "Current feels_like temperature in degrees");
pub static PRESSURE: Descriptor = Descriptor::gauge("openweather_pressure", "Current atmospheric pressure hPa");
pub static WIND_SPEED: Descriptor = Descriptor::gauge(
    "openweather_windspeed",
    "Current wind speed in meters/sec, or miles/hour if imperial",
);
pub static WIND_DEGREE: Descriptor =
    Descriptor::gauge("openweather_winddegree", "Wind direction, degrees (meteorological)");
pub static WIND_GUST: Descriptor = Descriptor::gauge("openweather_windgust", "Wind gust");
pub static RAIN_1H: Descriptor = Descriptor::gauge("openweather_rain1h", "Rain volume for last hour, in millimeters");
pub static SNOW_1H: Descriptor = Descriptor::gauge("openweather_snow1h", "Snow volume for last hour, in millimeters");
pub static CLOUDINESS: Descriptor = Descriptor::gauge("openweather_cloudiness", "Cloudiness percentage");
pub static SUNRISE: Descriptor = Descriptor::gauge("openweather_sunrise", "Sunrise time, unix, UTC");
pub static SUNSET: Descriptor = Descriptor::gauge("openweather_sunset", "Sunset time, unix, UTC");
pub static DEW_POINT: Descriptor = Descriptor::gauge(
    "openweather_dewpoint",
    "Atmospheric temperature below which water droplets begin to condense",
);
pub static UVI: Descriptor = Descriptor::gauge("openweather_uvi", "Current UV index");
pub static VISIBILITY: Descriptor = Descriptor::gauge("openweather_visibility", "Average visibility, in meters");
pub static WEATHER_UP: Descriptor = Descriptor::gauge(
    "openweather_weather_up",
    "1 if current weather was fetched successfully, 0 if weather values are defaulted",
);
pub static POLLUTION_UP: Descriptor = Descriptor::gauge(
    "openweather_pollution_up",
    "1 if air pollution was fetched successfully, 0 otherwise",
);
pub static AQI: Descriptor = Descriptor::gauge("openweather_aqi", "Air quality index");
pub static CO: Descriptor = Descriptor::gauge("openweather_co", "Concentration of CO (Carbon monoxide), μg/m3");
pub static NO: Descriptor = Descriptor::gauge("openweather_no", "Concentration of NO (Nitrogen monoxide), μg/m3");
pub static NO2: Descriptor = Descriptor::gauge("openweather_no2", "Concentration of NO2 (Nitrogen dioxide), μg/m3");
pub static O3: Descriptor = Descriptor::gauge("openweather_o3", "Concentration of O3 (Ozone), μg/m3");
pub static SO2: Descriptor = Descriptor::gauge("openweather_so2", "Concentration of SO2 (Sulphur dioxide), μg/m3");
pub static PM2_5: Descriptor = Descriptor::gauge(
    "openweather_pm2_5",
    "Concentration of PM2.5 (Fine particles matter), μg/m3",
);
pub static PM10: Descriptor = Descriptor::gauge(
    "openweather_pm10",
    "Concentration of PM10 (Coarse particulate matter), μg/m3",
);
pub static NH3: Descriptor = Descriptor::gauge("openweather_nh3", "Concentration of NH3 (Ammonia), μg/m3");

/// Every metric the collector can emit, in emission order.
pub static DESCRIPTORS: [&Descriptor; 26] = [
    &TEMPERATURE,
    &HUMIDITY,
    &FEELS_LIKE,
    &PRESSURE,
    &WIND_SPEED,
    &WIND_DEGREE,
    &WIND_GUST,
    &RAIN_1H,
    &SNOW_1H,
    &CLOUDINESS,
    &SUNRISE,
    &SUNSET,
    &DEW_POINT,
    &UVI,
    &VISIBILITY,
    &WEATHER_UP,
    &POLLUTION_UP,
    &AQI,
    &CO,
    &NO,
    &NO2,
    &O3,
    &SO2,
    &PM2_5,
    &PM10,
    &NH3,
];

/// Samples emitted for every location on every collection.
pub const SAMPLES_PER_LOCATION: usize = 17;

/// Additional samples emitted for a location when pollution data is available.
pub const POLLUTION_SAMPLES_PER_LOCATION: usize = 9;

/// Value of a single gauge for a single location.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub descriptor: &'static Descriptor,
    pub location: String,
    pub value: f64,
}

type CacheKey = (String, Units);

/// Produces gauges for a fixed set of locations on demand.
///
/// Readings are fetched lazily during `collect()` and cached per location name and
/// unit system for the configured TTL. Failures never fail a collection: weather
/// gauges fall back to zero and pollution gauges are left out for that location.
#[derive(Debug)]
pub struct WeatherCollector<F> {
    fetcher: F,
    locations: Vec<Location>,
    units: Units,
    cache: TtlCache<CacheKey, Conditions>,
}

impl<F> WeatherCollector<F>
where
    F: Fetcher,
{
    pub fn new(fetcher: F, locations: Vec<Location>, units: Units, ttl: Duration) -> Self {
        WeatherCollector {
            fetcher,
            locations,
            units,
            cache: TtlCache::new(ttl),
        }
    }

    /// Descriptors of every metric this collector may emit. Never changes.
    pub fn describe(&self) -> &'static [&'static Descriptor] {
        &DESCRIPTORS
    }

    /// Build a snapshot of gauges for all configured locations, in configured order.
    pub async fn collect(&self) -> Vec<Sample> {
        let conditions = future::join_all(self.locations.iter().map(|l| self.conditions(l))).await;
        let mut samples =
            Vec::with_capacity(self.locations.len() * (SAMPLES_PER_LOCATION + POLLUTION_SAMPLES_PER_LOCATION));

        for (location, c) in self.locations.iter().zip(conditions.iter()) {
            push_samples(location, c, &mut samples);
        }

        samples
    }

    async fn conditions(&self, location: &Location) -> Conditions {
        let key = (location.name().to_owned(), self.units);
        if let Some(c) = self.cache.get(&key) {
            tracing::debug!(message = "using cached conditions", location = location.name());
            return c;
        }

        tracing::debug!(message = "fetching conditions", location = location.name(), units = %self.units);
        let c = self
            .fetcher
            .fetch(location.latitude(), location.longitude(), self.units)
            .await;

        self.cache.set(key, c.clone());
        c
    }
}

fn push_samples(location: &Location, conditions: &Conditions, out: &mut Vec<Sample>) {
    let defaults = WeatherReading::default();
    let weather = conditions.weather.as_ref().unwrap_or(&defaults);
    let pollution = conditions.pollution.as_ref().and_then(|p| p.list.first());

    let mut gauge = |descriptor: &'static Descriptor, value: f64| {
        out.push(Sample {
            descriptor,
            location: location.name().to_owned(),
            value,
        })
    };

    gauge(&TEMPERATURE, weather.temperature);
    gauge(&HUMIDITY, weather.humidity);
    gauge(&FEELS_LIKE, weather.feels_like);
    gauge(&PRESSURE, weather.pressure);
    gauge(&WIND_SPEED, weather.wind_speed);
    gauge(&WIND_DEGREE, weather.wind_degree);
    gauge(&WIND_GUST, weather.wind_gust);
    gauge(&RAIN_1H, weather.rain.one_hour);
    gauge(&SNOW_1H, weather.snow.one_hour);
    gauge(&CLOUDINESS, weather.clouds as f64);
    gauge(&SUNRISE, weather.sunrise as f64);
    gauge(&SUNSET, weather.sunset as f64);
    gauge(&DEW_POINT, weather.dew_point);
    gauge(&UVI, weather.uvi);
    gauge(&VISIBILITY, weather.visibility);
    gauge(&WEATHER_UP, up(conditions.weather.is_some()));
    gauge(&POLLUTION_UP, up(conditions.pollution.is_some()));

    if let Some(p) = pollution {
        gauge(&AQI, p.main.aqi as f64);
        gauge(&CO, p.components.co);
        gauge(&NO, p.components.no);
        gauge(&NO2, p.components.no2);
        gauge(&O3, p.components.o3);
        gauge(&SO2, p.components.so2);
        gauge(&PM2_5, p.components.pm2_5);
        gauge(&PM10, p.components.pm10);
        gauge(&NH3, p.components.nh3);
    }
}

fn up(ok: bool) -> f64 {
    if ok {
        1.0
    } else {
        0.0
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct LocationLabels {
    location: String,
}

/// Render samples in the OpenMetrics text format.
///
/// Each descriptor is included even if it has no samples. A location that appears
/// more than once is only rendered once per metric.
pub fn encode_text(descriptors: &[&'static Descriptor], samples: &[Sample]) -> Result<String, fmt::Error> {
    let mut registry = Registry::default();
    let mut families = HashMap::with_capacity(descriptors.len());

    for d in descriptors {
        let family = Family::<LocationLabels, Gauge<f64, AtomicU64>>::default();
        registry.register(d.name(), d.help(), family.clone());
        families.insert(d.name(), family);
    }

    for s in samples {
        if let Some(family) = families.get(s.descriptor.name()) {
            family
                .get_or_create(&LocationLabels {
                    location: s.location.clone(),
                })
                .set(s.value);
        }
    }

    let mut buf = String::new();
    encode(&mut buf, &registry)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::{
        encode_text, Sample, WeatherCollector, AQI, CO, CLOUDINESS, DESCRIPTORS, LABEL_LOCATION, NH3,
        POLLUTION_SAMPLES_PER_LOCATION, POLLUTION_UP, SAMPLES_PER_LOCATION, SUNRISE, TEMPERATURE, WEATHER_UP,
    };
    use crate::client::{
        Conditions, Fetcher, PollutionComponents, PollutionItem, PollutionMain, PollutionReading, Units,
        WeatherReading,
    };
    use crate::geo::Location;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(300);

    struct MockFetcher<T> {
        respond: T,
        calls: AtomicUsize,
    }

    impl<T> MockFetcher<T>
    where
        T: Fn(f64, Units) -> Conditions + Send + Sync,
    {
        fn new(respond: T) -> Self {
            MockFetcher {
                respond,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl<T> Fetcher for MockFetcher<T>
    where
        T: Fn(f64, Units) -> Conditions + Send + Sync,
    {
        async fn fetch(&self, latitude: f64, _longitude: f64, units: Units) -> Conditions {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.respond)(latitude, units)
        }
    }

    fn weather(temperature: f64) -> WeatherReading {
        WeatherReading {
            temperature,
            clouds: 40,
            sunrise: 1_700_000_000,
            ..Default::default()
        }
    }

    fn pollution(aqi: i64) -> PollutionReading {
        PollutionReading {
            list: vec![
                PollutionItem {
                    main: PollutionMain { aqi },
                    components: PollutionComponents {
                        co: 201.94,
                        nh3: 0.12,
                        ..Default::default()
                    },
                    ..Default::default()
                },
                PollutionItem {
                    main: PollutionMain { aqi: 5 },
                    ..Default::default()
                },
            ],
        }
    }

    fn toronto() -> Location {
        Location::new("Toronto, ON", 43.65, -79.38)
    }

    fn three_cities() -> Vec<Location> {
        vec![
            toronto(),
            Location::new("Paris, FR", 48.85, 2.35),
            Location::new("Tokyo, JP", 35.68, 139.76),
        ]
    }

    fn value(samples: &[Sample], name: &str, location: &str) -> Option<f64> {
        samples
            .iter()
            .find(|s| s.descriptor.name() == name && s.location == location)
            .map(|s| s.value)
    }

    fn count_for(samples: &[Sample], location: &str) -> usize {
        samples.iter().filter(|s| s.location == location).count()
    }

    #[tokio::test]
    async fn test_describe_fixed() {
        let fetcher = MockFetcher::new(|_, _| Conditions::default());
        let collector = WeatherCollector::new(fetcher, vec![toronto()], Units::Metric, TTL);

        let before = collector.describe();
        assert_eq!(SAMPLES_PER_LOCATION + POLLUTION_SAMPLES_PER_LOCATION, before.len());

        let names: HashSet<&str> = before.iter().map(|d| d.name()).collect();
        assert_eq!(before.len(), names.len());
        assert!(before.iter().all(|d| d.labels() == [LABEL_LOCATION]));

        let _ = collector.collect().await;
        assert_eq!(before, collector.describe());
        assert_eq!(0, collector.describe().iter().filter(|d| d.help().is_empty()).count());
    }

    #[tokio::test]
    async fn test_collect_empty_pollution() {
        let fetcher = MockFetcher::new(|_, _| Conditions {
            weather: Some(weather(21.5)),
            pollution: Some(PollutionReading::default()),
        });
        let collector = WeatherCollector::new(fetcher, vec![toronto()], Units::Metric, TTL);
        let samples = collector.collect().await;

        assert_eq!(SAMPLES_PER_LOCATION, samples.len());
        assert_eq!(None, value(&samples, AQI.name(), "Toronto, ON"));
        assert_eq!(Some(1.0), value(&samples, POLLUTION_UP.name(), "Toronto, ON"));
    }

    #[tokio::test]
    async fn test_collect_with_pollution() {
        let fetcher = MockFetcher::new(|_, _| Conditions {
            weather: Some(weather(21.5)),
            pollution: Some(pollution(2)),
        });
        let collector = WeatherCollector::new(fetcher, vec![toronto()], Units::Metric, TTL);
        let samples = collector.collect().await;

        assert_eq!(SAMPLES_PER_LOCATION + POLLUTION_SAMPLES_PER_LOCATION, samples.len());
        assert_eq!(Some(21.5), value(&samples, TEMPERATURE.name(), "Toronto, ON"));
        assert_eq!(Some(40.0), value(&samples, CLOUDINESS.name(), "Toronto, ON"));
        assert_eq!(Some(1_700_000_000.0), value(&samples, SUNRISE.name(), "Toronto, ON"));
        // Only the first pollution entry is used.
        assert_eq!(Some(2.0), value(&samples, AQI.name(), "Toronto, ON"));
        assert_eq!(Some(201.94), value(&samples, CO.name(), "Toronto, ON"));
        assert_eq!(Some(0.12), value(&samples, NH3.name(), "Toronto, ON"));
    }

    #[tokio::test]
    async fn test_collect_weather_failed() {
        let fetcher = MockFetcher::new(|_, _| Conditions {
            weather: None,
            pollution: Some(pollution(3)),
        });
        let collector = WeatherCollector::new(fetcher, vec![toronto()], Units::Metric, TTL);
        let samples = collector.collect().await;

        assert_eq!(SAMPLES_PER_LOCATION + POLLUTION_SAMPLES_PER_LOCATION, samples.len());
        let weather_gauges = &samples[..SAMPLES_PER_LOCATION - 2];
        assert!(weather_gauges.iter().all(|s| s.value == 0.0));
        assert_eq!(Some(0.0), value(&samples, WEATHER_UP.name(), "Toronto, ON"));
        assert_eq!(Some(3.0), value(&samples, AQI.name(), "Toronto, ON"));
        assert_eq!(Some(201.94), value(&samples, CO.name(), "Toronto, ON"));
    }

    #[tokio::test]
    async fn test_collect_pollution_failed() {
        let fetcher = MockFetcher::new(|_, _| Conditions {
            weather: Some(weather(21.5)),
            pollution: None,
        });
        let collector = WeatherCollector::new(fetcher, vec![toronto()], Units::Metric, TTL);
        let samples = collector.collect().await;

        assert_eq!(SAMPLES_PER_LOCATION, samples.len());
        assert_eq!(Some(21.5), value(&samples, TEMPERATURE.name(), "Toronto, ON"));
        assert_eq!(Some(1.0), value(&samples, WEATHER_UP.name(), "Toronto, ON"));
        assert_eq!(Some(0.0), value(&samples, POLLUTION_UP.name(), "Toronto, ON"));
    }

    #[tokio::test]
    async fn test_collect_multiple_locations_isolated() {
        // Paris fails entirely, the others succeed with distinct values.
        let fetcher = MockFetcher::new(|lat, _| {
            if lat > 48.0 {
                Conditions::default()
            } else {
                Conditions {
                    weather: Some(weather(lat)),
                    pollution: Some(pollution(1)),
                }
            }
        });
        let collector = WeatherCollector::new(fetcher, three_cities(), Units::Metric, TTL);

        for _ in 0..2 {
            let samples = collector.collect().await;

            assert_eq!(
                SAMPLES_PER_LOCATION + POLLUTION_SAMPLES_PER_LOCATION,
                count_for(&samples, "Toronto, ON")
            );
            assert_eq!(SAMPLES_PER_LOCATION, count_for(&samples, "Paris, FR"));
            assert_eq!(
                SAMPLES_PER_LOCATION + POLLUTION_SAMPLES_PER_LOCATION,
                count_for(&samples, "Tokyo, JP")
            );

            assert_eq!(Some(43.65), value(&samples, TEMPERATURE.name(), "Toronto, ON"));
            assert_eq!(Some(0.0), value(&samples, TEMPERATURE.name(), "Paris, FR"));
            assert_eq!(Some(35.68), value(&samples, TEMPERATURE.name(), "Tokyo, JP"));
            assert_eq!(Some(0.0), value(&samples, WEATHER_UP.name(), "Paris, FR"));
        }

        // Samples follow configured location order.
        let samples = collector.collect().await;
        let order: Vec<&str> = samples
            .iter()
            .filter(|s| s.descriptor.name() == TEMPERATURE.name())
            .map(|s| s.location.as_str())
            .collect();
        assert_eq!(vec!["Toronto, ON", "Paris, FR", "Tokyo, JP"], order);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_uses_cache_within_ttl() {
        let fetcher = MockFetcher::new(|lat, _| Conditions {
            weather: Some(weather(lat)),
            pollution: Some(pollution(1)),
        });
        let collector = WeatherCollector::new(fetcher, three_cities(), Units::Metric, TTL);

        let _ = collector.collect().await;
        assert_eq!(3, collector.fetcher.calls());

        tokio::time::advance(Duration::from_secs(299)).await;
        let _ = collector.collect().await;
        assert_eq!(3, collector.fetcher.calls());

        tokio::time::advance(Duration::from_secs(1)).await;
        let samples = collector.collect().await;
        assert_eq!(6, collector.fetcher.calls());
        assert_eq!(Some(48.85), value(&samples, TEMPERATURE.name(), "Paris, FR"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_caches_degraded_conditions() {
        let fetcher = MockFetcher::new(|_, _| Conditions {
            weather: Some(weather(21.5)),
            pollution: None,
        });
        let collector = WeatherCollector::new(fetcher, vec![toronto()], Units::Metric, TTL);

        for _ in 0..20 {
            let samples = collector.collect().await;
            assert_eq!(SAMPLES_PER_LOCATION, samples.len());
            assert_eq!(Some(0.0), value(&samples, POLLUTION_UP.name(), "Toronto, ON"));
            tokio::time::advance(Duration::from_secs(15)).await;
        }
        assert_eq!(1, collector.fetcher.calls());

        // 300s after the first fetch, the degraded entry has expired.
        let _ = collector.collect().await;
        assert_eq!(2, collector.fetcher.calls());
    }

    #[tokio::test]
    async fn test_collect_fetches_with_configured_units() {
        let fetcher = MockFetcher::new(|_, units| Conditions {
            weather: Some(weather(if units == Units::Imperial { 70.7 } else { 21.5 })),
            pollution: Some(PollutionReading::default()),
        });
        let collector = WeatherCollector::new(fetcher, vec![toronto()], Units::Imperial, TTL);
        let samples = collector.collect().await;

        assert_eq!(Some(70.7), value(&samples, TEMPERATURE.name(), "Toronto, ON"));
    }

    #[tokio::test]
    async fn test_encode_text() {
        let fetcher = MockFetcher::new(|lat, _| Conditions {
            weather: Some(weather(lat)),
            pollution: Some(pollution(2)),
        });
        let collector = WeatherCollector::new(fetcher, three_cities(), Units::Metric, TTL);
        let samples = collector.collect().await;
        let text = encode_text(collector.describe(), &samples).unwrap();

        assert!(text.contains("# TYPE openweather_temperature gauge"));
        assert!(text.contains("openweather_temperature{location=\"Toronto, ON\"} 43.65"));
        assert!(text.contains("openweather_aqi{location=\"Tokyo, JP\"} 2.0"));
        assert!(text.contains("openweather_weather_up{location=\"Paris, FR\"} 1.0"));
        assert!(text.ends_with("# EOF\n"));
    }

    #[tokio::test]
    async fn test_encode_text_without_samples() {
        let text = encode_text(&DESCRIPTORS, &[]).unwrap();

        for d in DESCRIPTORS.iter() {
            assert!(text.contains(&format!("# TYPE {} gauge", d.name())));
        }
        assert!(!text.contains("location="));
    }
}
