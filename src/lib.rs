//! # Tripweaver
//!
//! A trip-planning engine that resolves free-text locations through a
//! persistent TTL cache, manages vendor OAuth tokens, and drives a
//! progressive loading pipeline (weather, flights, hotels, AI itinerary)
//! with streaming partial results.

pub mod amadeus;
pub mod cache;
pub mod gateways;
pub mod photos;
pub mod pipeline;
pub mod plan;
pub mod planner;
pub mod resolver;
pub mod token;
pub mod weather;

use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Re-export main types for convenience
pub use amadeus::AmadeusClient;
pub use cache::{CacheStats, CacheStore, LookupCache};
pub use gateways::{
    DayForecast, FlightOption, HotelOption, Photo, PlanStreamEvent, Price, WeatherReport,
};
pub use photos::UnsplashClient;
pub use pipeline::{PipelineState, PipelineUpdate, SessionStore, Stage, TripPipeline, TripResults};
pub use plan::{PartialPlan, PlanStreamDecoder, TripPlan};
pub use planner::{OpenAiPlanner, PlanContext};
pub use resolver::{LocationKind, LocationResolver};
pub use token::TokenCache;
pub use weather::OpenWeatherClient;

/// Error types for the trip-planning engine
#[derive(Error, Debug)]
pub enum TripError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("{service} returned status {status}: {detail}")]
    GatewayError {
        service: &'static str,
        status: u16,
        detail: String,
    },

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Plan decode failed: {0}")]
    DecodeError(String),

    #[error("Streaming failed: {0}")]
    StreamError(String),

    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Stage timed out: {0}")]
    TimeoutError(&'static str),

    #[error("Invalid date format: {0}")]
    DateParseError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

/// Geographic coordinates (decimal degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// Budget tier for hotel filtering and itinerary guidance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetTier {
    Budget,
    Comfort,
    Luxury,
}

impl BudgetTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetTier::Budget => "budget",
            BudgetTier::Comfort => "comfort",
            BudgetTier::Luxury => "luxury",
        }
    }
}

impl FromStr for BudgetTier {
    type Err = TripError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "budget" | "low" => Ok(BudgetTier::Budget),
            "comfort" | "mid" | "medium" => Ok(BudgetTier::Comfort),
            "luxury" | "high" => Ok(BudgetTier::Luxury),
            _ => Err(TripError::ConfigError(format!("Invalid budget tier: {}", s))),
        }
    }
}

/// Input parameters for one trip-planning run.
///
/// Immutable once handed to the pipeline; `depart_from` and `arrive_at` are
/// free text (city names or airport codes) resolved by [`LocationResolver`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripRequest {
    pub travelers: u32,
    pub depart_from: String,
    pub arrive_at: String,
    pub depart_date: NaiveDate,
    pub return_date: NaiveDate,
    pub budget: BudgetTier,
}

impl TripRequest {
    /// Trip length in days, never below 1.
    pub fn duration_days(&self) -> i64 {
        (self.return_date - self.depart_date).num_days().max(1)
    }
}

/// Vendor credentials and cache location for a real (non-stub) engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub amadeus_client_id: String,
    pub amadeus_client_secret: String,
    pub openweather_api_key: String,
    pub unsplash_access_key: String,
    pub openai_api_key: String,
    pub cache_dir: PathBuf,
}

impl EngineConfig {
    /// Read credentials from the environment.
    ///
    /// Expects `AMADEUS_CLIENT_ID`, `AMADEUS_CLIENT_SECRET`,
    /// `OPENWEATHER_API_KEY`, `UNSPLASH_ACCESS_KEY` and `OPENAI_API_KEY`.
    /// The cache directory defaults to `.tripweaver-cache`.
    pub fn from_env() -> Result<Self, TripError> {
        fn required(name: &'static str) -> Result<String, TripError> {
            std::env::var(name).map_err(|_| {
                TripError::ConfigError(format!("Missing {} environment variable", name))
            })
        }

        Ok(Self {
            amadeus_client_id: required("AMADEUS_CLIENT_ID")?,
            amadeus_client_secret: required("AMADEUS_CLIENT_SECRET")?,
            openweather_api_key: required("OPENWEATHER_API_KEY")?,
            unsplash_access_key: required("UNSPLASH_ACCESS_KEY")?,
            openai_api_key: required("OPENAI_API_KEY")?,
            cache_dir: std::env::var("TRIPWEAVER_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".tripweaver-cache")),
        })
    }
}

/// Parse a `YYYY-MM-DD` date argument.
pub fn parse_trip_date(s: &str) -> Result<NaiveDate, TripError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| TripError::DateParseError(format!("Expected YYYY-MM-DD, got {}", s)))
}

/// Main public API function: build a pipeline from real vendor clients and
/// run one trip through it, discarding progressive updates.
pub async fn plan_trip(
    config: &EngineConfig,
    request: TripRequest,
) -> Result<PipelineState, TripError> {
    let mut pipeline = TripPipeline::from_config(config)?;
    Ok(pipeline.plan(request, None).await)
}
