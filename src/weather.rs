//! OpenWeather client: geocoding and trip-window forecast
//!
//! The forecast endpoint returns 3-hourly readings for the next five days;
//! those are folded into per-day rows (min/max temperature, midday
//! condition, peak precipitation probability) clipped to the trip window.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::gateways::{check_status, DayForecast, GeoHit, GeoSearch, WeatherProvider, WeatherReport};
use crate::{Coordinates, TripError};

const OPENWEATHER_API_BASE: &str = "https://api.openweathermap.org";
const REQUEST_TIMEOUT_SECS: u64 = 20;

pub struct OpenWeatherClient {
    http_client: Client,
    base_url: String,
    api_key: String,
}

impl OpenWeatherClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, TripError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_base_url(http_client, OPENWEATHER_API_BASE, api_key))
    }

    pub fn with_base_url(
        http_client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl GeoSearch for OpenWeatherClient {
    #[instrument(level = "debug", skip(self))]
    async fn search_geo(&self, query: &str) -> Result<Vec<GeoHit>, TripError> {
        let response = self
            .http_client
            .get(format!("{}/geo/1.0/direct", self.base_url))
            .query(&[
                ("q", query.to_string()),
                ("limit", "5".to_string()),
                ("appid", self.api_key.clone()),
            ])
            .send()
            .await?;
        let response = check_status("openweather", response).await?;
        let hits: Vec<GeoRecord> = response.json().await?;
        debug!(hits = hits.len(), "Geocoding completed");
        Ok(hits
            .into_iter()
            .map(|hit| GeoHit {
                name: hit.name,
                coords: Coordinates {
                    lat: hit.lat,
                    lon: hit.lon,
                },
            })
            .collect())
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherClient {
    #[instrument(level = "info", skip(self))]
    async fn forecast(
        &self,
        coords: Coordinates,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<WeatherReport, TripError> {
        let response = self
            .http_client
            .get(format!("{}/data/2.5/forecast", self.base_url))
            .query(&[
                ("lat", coords.lat.to_string()),
                ("lon", coords.lon.to_string()),
                ("units", "metric".to_string()),
                ("appid", self.api_key.clone()),
            ])
            .send()
            .await?;
        let response = check_status("openweather", response).await?;
        let payload: ForecastPayload = response.json().await?;

        let forecast = aggregate_forecast(payload.list, start, end);
        let summary = summarize(&forecast);
        info!(days = forecast.len(), "Forecast aggregated");
        Ok(WeatherReport { summary, forecast })
    }
}

/// Fold 3-hourly readings into one row per day within `[start, end]`.
fn aggregate_forecast(entries: Vec<ForecastEntry>, start: NaiveDate, end: NaiveDate) -> Vec<DayForecast> {
    let mut days: BTreeMap<NaiveDate, DayAccumulator> = BTreeMap::new();

    for entry in entries {
        let stamp = match NaiveDateTime::parse_from_str(&entry.dt_txt, "%Y-%m-%d %H:%M:%S") {
            Ok(stamp) => stamp,
            Err(_) => continue,
        };
        let date = stamp.date();
        if date < start || date > end {
            continue;
        }

        let acc = days.entry(date).or_default();
        acc.temp_min = acc.temp_min.min(entry.main.temp_min);
        acc.temp_max = acc.temp_max.max(entry.main.temp_max);
        acc.precipitation = acc.precipitation.max(entry.pop);

        // The midday reading is the most representative of sightseeing hours.
        if let Some(weather) = entry.weather.first() {
            let hour = stamp.time().format("%H").to_string();
            if acc.condition.is_empty() || hour == "12" {
                acc.condition = weather.main.clone();
                acc.description = weather.description.clone();
            }
        }
    }

    days.into_iter()
        .map(|(date, acc)| DayForecast {
            date,
            temp_min: acc.temp_min,
            temp_max: acc.temp_max,
            condition: acc.condition,
            description: acc.description,
            precipitation: acc.precipitation,
        })
        .collect()
}

fn summarize(forecast: &[DayForecast]) -> String {
    if forecast.is_empty() {
        return "Forecast unavailable for the selected dates".to_string();
    }

    let min = forecast.iter().map(|d| d.temp_min).fold(f64::MAX, f64::min);
    let max = forecast.iter().map(|d| d.temp_max).fold(f64::MIN, f64::max);

    // Most frequent condition across the window.
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for day in forecast {
        *counts.entry(day.condition.as_str()).or_default() += 1;
    }
    let dominant = counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(condition, _)| condition)
        .unwrap_or("Unknown");

    format!("{:.0}-{:.0}C, mostly {}", min, max, dominant.to_lowercase())
}

#[derive(Debug)]
struct DayAccumulator {
    temp_min: f64,
    temp_max: f64,
    condition: String,
    description: String,
    precipitation: f64,
}

// Sentinel bounds so the first reading always wins the min/max fold.
impl Default for DayAccumulator {
    fn default() -> Self {
        Self {
            temp_min: f64::MAX,
            temp_max: f64::MIN,
            condition: String::new(),
            description: String::new(),
            precipitation: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeoRecord {
    #[serde(default)]
    name: String,
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastPayload {
    #[serde(default)]
    list: Vec<ForecastEntry>,
}

#[derive(Debug, Deserialize)]
struct ForecastEntry {
    #[serde(default)]
    dt_txt: String,
    main: ForecastMain,
    #[serde(default)]
    weather: Vec<ForecastWeather>,
    #[serde(default)]
    pop: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastMain {
    temp_min: f64,
    temp_max: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastWeather {
    #[serde(default)]
    main: String,
    #[serde(default)]
    description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(dt_txt: &str, min: f64, max: f64, condition: &str, pop: f64) -> ForecastEntry {
        serde_json::from_value(json!({
            "dt_txt": dt_txt,
            "main": {"temp_min": min, "temp_max": max},
            "weather": [{"main": condition, "description": condition.to_lowercase()}],
            "pop": pop
        }))
        .unwrap()
    }

    #[test]
    fn test_aggregation_folds_readings_per_day() {
        let start = NaiveDate::from_ymd_opt(2026, 8, 10).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 8, 11).unwrap();
        let entries = vec![
            entry("2026-08-10 06:00:00", 14.0, 16.0, "Clouds", 0.1),
            entry("2026-08-10 12:00:00", 18.0, 24.0, "Clear", 0.0),
            entry("2026-08-10 18:00:00", 17.0, 21.0, "Clouds", 0.4),
            entry("2026-08-11 12:00:00", 16.0, 22.0, "Rain", 0.8),
            // Outside the window: dropped.
            entry("2026-08-12 12:00:00", 10.0, 12.0, "Snow", 1.0),
        ];

        let forecast = aggregate_forecast(entries, start, end);
        assert_eq!(forecast.len(), 2);

        let first = &forecast[0];
        assert_eq!(first.date, start);
        assert!((first.temp_min - 14.0).abs() < 1e-9);
        assert!((first.temp_max - 24.0).abs() < 1e-9);
        // Midday reading wins the condition slot.
        assert_eq!(first.condition, "Clear");
        assert!((first.precipitation - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_summary_reports_range_and_dominant_condition() {
        let start = NaiveDate::from_ymd_opt(2026, 8, 10).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 8, 12).unwrap();
        let entries = vec![
            entry("2026-08-10 12:00:00", 15.0, 22.0, "Clear", 0.0),
            entry("2026-08-11 12:00:00", 16.0, 25.0, "Clear", 0.1),
            entry("2026-08-12 12:00:00", 14.0, 20.0, "Rain", 0.9),
        ];
        let forecast = aggregate_forecast(entries, start, end);
        assert_eq!(summarize(&forecast), "14-25C, mostly clear");
    }

    #[test]
    fn test_summary_for_empty_window() {
        assert_eq!(
            summarize(&[]),
            "Forecast unavailable for the selected dates"
        );
    }
}
