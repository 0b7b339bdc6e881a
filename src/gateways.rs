//! Vendor gateway contracts and display-friendly response shapes
//!
//! Each third-party service sits behind an async trait so the pipeline can
//! be exercised against stubs. Failures are `Err` values carrying the
//! service name and status detail, never optionally-present fields; the one
//! exception is the photo gateway, whose contract is best-effort by design.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::planner::PlanContext;
use crate::resolver::LocationKind;
use crate::{BudgetTier, Coordinates, TripError};

/// Price with explicit currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Price {
    pub amount: f64,
    pub currency: String,
}

/// One day of aggregated forecast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayForecast {
    pub date: NaiveDate,
    pub temp_min: f64,
    pub temp_max: f64,
    pub condition: String,
    pub description: String,
    /// Probability of precipitation, 0.0–1.0
    pub precipitation: f64,
}

/// Destination weather for the trip window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherReport {
    pub summary: String,
    pub forecast: Vec<DayForecast>,
}

/// One bookable flight offer in display form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightOption {
    pub airline: String,
    pub flight_number: Option<String>,
    pub departure: String,
    pub arrival: String,
    pub duration: String,
    pub stops: i32,
    pub price: Price,
}

/// One hotel offer in display form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotelOption {
    pub name: String,
    pub rating: Option<f32>,
    pub price_per_night: Option<Price>,
    pub total: Option<Price>,
    pub address: Option<String>,
}

/// Destination photo with attribution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Photo {
    pub url: String,
    pub alt: String,
    pub photographer: String,
    pub photographer_url: String,
    pub download_url: String,
}

/// One event on the streaming itinerary channel
#[derive(Debug, Clone)]
pub enum PlanStreamEvent {
    /// Incremental text from the model
    Delta(String),
    /// Stream completed successfully
    Done,
    /// Stream terminated with an error
    Error(String),
}

/// One hit from the vendor location-search API
#[derive(Debug, Clone)]
pub struct LocationHit {
    pub name: String,
    pub iata_code: Option<String>,
    pub subtype: String,
}

/// One hit from the vendor geocoding API
#[derive(Debug, Clone)]
pub struct GeoHit {
    pub name: String,
    pub coords: Coordinates,
}

/// Vendor location search used for code resolution
#[async_trait]
pub trait CodeSearch: Send + Sync {
    async fn search_locations(
        &self,
        query: &str,
        kind: LocationKind,
    ) -> Result<Vec<LocationHit>, TripError>;
}

/// Vendor geocoding used for coordinate resolution
#[async_trait]
pub trait GeoSearch: Send + Sync {
    async fn search_geo(&self, query: &str) -> Result<Vec<GeoHit>, TripError>;
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn forecast(
        &self,
        coords: Coordinates,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<WeatherReport, TripError>;
}

#[async_trait]
pub trait FlightProvider: Send + Sync {
    async fn search_flights(
        &self,
        origin: &str,
        destination: &str,
        depart: NaiveDate,
        return_date: NaiveDate,
        travelers: u32,
    ) -> Result<Vec<FlightOption>, TripError>;
}

#[async_trait]
pub trait HotelProvider: Send + Sync {
    async fn search_hotels(
        &self,
        city_code: &str,
        check_in: NaiveDate,
        check_out: NaiveDate,
        travelers: u32,
        budget: BudgetTier,
    ) -> Result<Vec<HotelOption>, TripError>;
}

/// AI itinerary generation: a streaming variant delivering text deltas over
/// a channel, and a single-shot variant used as its fallback. Both consume
/// the same [`PlanContext`].
#[async_trait]
pub trait ItineraryProvider: Send + Sync {
    async fn stream_plan(
        &self,
        context: &PlanContext,
    ) -> Result<mpsc::Receiver<PlanStreamEvent>, TripError>;

    async fn complete_plan(&self, context: &PlanContext) -> Result<String, TripError>;
}

/// Best-effort photo search: failures yield an empty list, never an error.
#[async_trait]
pub trait PhotoProvider: Send + Sync {
    async fn search_photos(&self, query: &str, count: usize) -> Vec<Photo>;
}

/// Map a non-2xx response to a `GatewayError` carrying a bounded detail
/// snippet from the body.
pub(crate) async fn check_status(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, TripError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    Err(TripError::GatewayError {
        service,
        status: status.as_u16(),
        detail: detail.chars().take(200).collect(),
    })
}
