//! Progressive trip-planning pipeline
//!
//! One linear stage machine per run: weather, flights, hotels, then the AI
//! itinerary, each gated on the previous stage's vendor call. Stages are
//! deliberately sequential; the staged reveal is part of the product
//! contract, not a scheduling accident. A failing stage halts the run with
//! a user-facing message while earlier results stay in state; `retry`
//! resets everything and starts over from weather.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use crate::cache::{normalize_key, CacheStore};
use crate::gateways::{
    FlightOption, FlightProvider, HotelOption, HotelProvider, ItineraryProvider, Photo,
    PhotoProvider, PlanStreamEvent, WeatherProvider, WeatherReport,
};
use crate::plan::{PartialPlan, PlanStreamDecoder, TripPlan};
use crate::planner::{OpenAiPlanner, PlanContext};
use crate::resolver::{LocationKind, LocationResolver};
use crate::{AmadeusClient, EngineConfig, OpenWeatherClient, TripError, TripRequest, UnsplashClient};

/// Bound on every vendor call; a timeout is just another stage failure.
const STAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// How many destination photos to fetch alongside the hotel stage
const PHOTO_COUNT: usize = 5;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Initializing,
    Weather,
    Flights,
    Hotels,
    Ai,
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Initializing => "initializing",
            Stage::Weather => "weather",
            Stage::Flights => "flights",
            Stage::Hotels => "hotels",
            Stage::Ai => "ai",
            Stage::Complete => "complete",
        }
    }
}

/// Accumulated results, populated in stage order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TripResults {
    pub weather: Option<WeatherReport>,
    pub flights: Option<Vec<FlightOption>>,
    pub hotels: Option<Vec<HotelOption>>,
    #[serde(default)]
    pub photos: Vec<Photo>,
    pub plan: Option<TripPlan>,
}

/// Observable pipeline state, mutated only by [`TripPipeline`]
#[derive(Debug, Clone, Serialize)]
pub struct PipelineState {
    pub stage: Stage,
    pub results: TripResults,
    pub error: Option<String>,
    pub streaming_partial: Option<PartialPlan>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            stage: Stage::Initializing,
            results: TripResults::default(),
            error: None,
            streaming_partial: None,
        }
    }
}

/// Progress event delivered to an observer while a run advances
#[derive(Debug, Clone)]
pub enum PipelineUpdate {
    StageStarted(Stage),
    StageCompleted(Stage),
    /// Streaming decode surfaced new partial-plan fields
    Partial(PartialPlan),
    Failed {
        stage: Stage,
        message: String,
    },
    Completed,
}

/// Session-scoped persistence of a completed bundle, keyed by the request
/// fingerprint. Best-effort both directions: loss only means a refetch.
pub struct SessionStore {
    tree: sled::Tree,
}

impl SessionStore {
    pub fn new(store: &CacheStore) -> Self {
        Self {
            tree: store.session_tree(),
        }
    }

    fn key(request: &TripRequest) -> String {
        format!(
            "{}|{}|{}|{}",
            normalize_key(&request.depart_from),
            normalize_key(&request.arrive_at),
            request.depart_date,
            request.return_date,
        )
    }

    pub fn save(&self, request: &TripRequest, results: &TripResults) {
        let key = Self::key(request);
        match serde_json::to_vec(results) {
            Ok(bytes) => {
                if let Err(e) = self.tree.insert(key.as_bytes(), bytes) {
                    warn!(error = %e, "Session save failed");
                }
            }
            Err(e) => warn!(error = %e, "Session bundle not serializable"),
        }
    }

    pub fn load(&self, request: &TripRequest) -> Option<TripResults> {
        let key = Self::key(request);
        match self.tree.get(key.as_bytes()) {
            Ok(Some(raw)) => serde_json::from_slice(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Session load failed");
                None
            }
        }
    }
}

/// The stage-sequencing state machine driving one trip-planning session.
pub struct TripPipeline {
    weather: Arc<dyn WeatherProvider>,
    flights: Arc<dyn FlightProvider>,
    hotels: Arc<dyn HotelProvider>,
    photos: Arc<dyn PhotoProvider>,
    planner: Arc<dyn ItineraryProvider>,
    resolver: LocationResolver,
    sessions: SessionStore,
    state: PipelineState,
    request: Option<TripRequest>,
}

impl TripPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        weather: Arc<dyn WeatherProvider>,
        flights: Arc<dyn FlightProvider>,
        hotels: Arc<dyn HotelProvider>,
        photos: Arc<dyn PhotoProvider>,
        planner: Arc<dyn ItineraryProvider>,
        resolver: LocationResolver,
        sessions: SessionStore,
    ) -> Self {
        Self {
            weather,
            flights,
            hotels,
            photos,
            planner,
            resolver,
            sessions,
            state: PipelineState::default(),
            request: None,
        }
    }

    /// Wire up the real vendor clients from configuration.
    pub fn from_config(config: &EngineConfig) -> Result<Self, TripError> {
        let store = CacheStore::open(&config.cache_dir)?;
        let amadeus = Arc::new(AmadeusClient::new(
            config.amadeus_client_id.clone(),
            config.amadeus_client_secret.clone(),
        )?);
        let weather = Arc::new(OpenWeatherClient::new(config.openweather_api_key.clone())?);
        let resolver = LocationResolver::new(&store, amadeus.clone(), weather.clone());
        let sessions = SessionStore::new(&store);

        Ok(Self::new(
            weather,
            amadeus.clone(),
            amadeus,
            Arc::new(UnsplashClient::new(config.unsplash_access_key.clone())?),
            Arc::new(OpenAiPlanner::new(config.openai_api_key.clone())?),
            resolver,
            sessions,
        ))
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Run one trip through all stages. Progressive updates go to the
    /// optional channel; the final state is returned either way.
    #[instrument(level = "info", skip(self, request, updates))]
    pub async fn plan(
        &mut self,
        request: TripRequest,
        updates: Option<mpsc::Sender<PipelineUpdate>>,
    ) -> PipelineState {
        self.request = Some(request.clone());
        self.state = PipelineState::default();
        self.run(request, updates.as_ref()).await;
        self.state.clone()
    }

    /// Re-run the last request from scratch: accumulated results and error
    /// state are cleared, all stages execute again from weather.
    pub async fn retry(
        &mut self,
        updates: Option<mpsc::Sender<PipelineUpdate>>,
    ) -> Result<PipelineState, TripError> {
        let request = self
            .request
            .clone()
            .ok_or_else(|| TripError::ConfigError("No request to retry".to_string()))?;
        info!("Retrying trip pipeline from the weather stage");
        self.state = PipelineState::default();
        self.run(request, updates.as_ref()).await;
        Ok(self.state.clone())
    }

    async fn run(&mut self, request: TripRequest, updates: Option<&mpsc::Sender<PipelineUpdate>>) {
        // Weather
        self.enter(Stage::Weather, updates);
        let coords = self.resolver.resolve_coords(&request.arrive_at).await;
        let forecast = guarded(
            "weather",
            self.weather
                .forecast(coords, request.depart_date, request.return_date),
        )
        .await;
        match forecast {
            Ok(report) => {
                self.state.results.weather = Some(report);
                self.send(updates, PipelineUpdate::StageCompleted(Stage::Weather));
            }
            Err(e) => return self.fail(Stage::Weather, e, updates),
        }

        // Flights
        self.enter(Stage::Flights, updates);
        let origin = self
            .resolver
            .resolve_code(&request.depart_from, LocationKind::Airport)
            .await;
        let destination = self
            .resolver
            .resolve_code(&request.arrive_at, LocationKind::Airport)
            .await;
        let flights = guarded(
            "flights",
            self.flights.search_flights(
                &origin,
                &destination,
                request.depart_date,
                request.return_date,
                request.travelers,
            ),
        )
        .await;
        match flights {
            Ok(flights) => {
                self.state.results.flights = Some(flights);
                self.send(updates, PipelineUpdate::StageCompleted(Stage::Flights));
            }
            Err(e) => return self.fail(Stage::Flights, e, updates),
        }

        // Hotels
        self.enter(Stage::Hotels, updates);
        let city = self
            .resolver
            .resolve_code(&request.arrive_at, LocationKind::City)
            .await;
        let hotels = guarded(
            "hotels",
            self.hotels.search_hotels(
                &city,
                request.depart_date,
                request.return_date,
                request.travelers,
                request.budget,
            ),
        )
        .await;
        match hotels {
            Ok(hotels) => {
                self.state.results.hotels = Some(hotels);
                self.send(updates, PipelineUpdate::StageCompleted(Stage::Hotels));
            }
            Err(e) => return self.fail(Stage::Hotels, e, updates),
        }

        // Destination photos ride along after hotels; never a stage, never
        // fatal.
        self.state.results.photos = self.photos.search_photos(&request.arrive_at, PHOTO_COUNT).await;

        // AI itinerary
        self.enter(Stage::Ai, updates);
        let context = PlanContext {
            request: request.clone(),
            destination_code: city,
            weather: self.state.results.weather.clone(),
            flights: self.state.results.flights.clone().unwrap_or_default(),
            hotels: self.state.results.hotels.clone().unwrap_or_default(),
        };
        match self.generate_plan(&context, updates).await {
            Ok(plan) => {
                self.state.results.plan = Some(plan);
                self.state.streaming_partial = None;
                self.send(updates, PipelineUpdate::StageCompleted(Stage::Ai));
            }
            Err(e) => return self.fail(Stage::Ai, e, updates),
        }

        // Complete: persist the bundle for reload-without-refetch.
        self.state.stage = Stage::Complete;
        self.sessions.save(&request, &self.state.results);
        info!("Trip pipeline complete");
        self.send(updates, PipelineUpdate::Completed);
    }

    /// Streaming first; one single-shot fallback with the identical prompt
    /// before the stage is allowed to fail.
    async fn generate_plan(
        &mut self,
        context: &PlanContext,
        updates: Option<&mpsc::Sender<PipelineUpdate>>,
    ) -> Result<TripPlan, TripError> {
        match self.stream_plan(context, updates).await {
            Ok(plan) => return Ok(plan),
            Err(e) => warn!(error = %e, "Streaming plan failed, falling back to single-shot"),
        }

        let text = guarded("ai", self.planner.complete_plan(context)).await?;
        let mut decoder = PlanStreamDecoder::new();
        decoder.push(&text);
        let value = decoder.finish()?;
        Ok(TripPlan::from_value(value))
    }

    async fn stream_plan(
        &mut self,
        context: &PlanContext,
        updates: Option<&mpsc::Sender<PipelineUpdate>>,
    ) -> Result<TripPlan, TripError> {
        let mut rx = guarded("ai", self.planner.stream_plan(context)).await?;
        let mut decoder = PlanStreamDecoder::new();

        loop {
            let event = match timeout(STAGE_TIMEOUT, rx.recv()).await {
                Ok(Some(event)) => event,
                // Channel closed without a Done marker: treat the stream as
                // finished and let the final parse decide.
                Ok(None) => break,
                Err(_) => return Err(TripError::TimeoutError("ai")),
            };
            match event {
                PlanStreamEvent::Delta(chunk) => {
                    if let Some(partial) = decoder.push(&chunk) {
                        self.state.streaming_partial = Some(partial.clone());
                        self.send(updates, PipelineUpdate::Partial(partial.clone()));
                    }
                }
                PlanStreamEvent::Done => break,
                PlanStreamEvent::Error(e) => return Err(TripError::StreamError(e)),
            }
        }

        let value = decoder.finish()?;
        Ok(TripPlan::from_value(value))
    }

    fn enter(&mut self, stage: Stage, updates: Option<&mpsc::Sender<PipelineUpdate>>) {
        info!(stage = stage.as_str(), "Entering pipeline stage");
        self.state.stage = stage;
        self.send(updates, PipelineUpdate::StageStarted(stage));
    }

    fn fail(
        &mut self,
        stage: Stage,
        error: TripError,
        updates: Option<&mpsc::Sender<PipelineUpdate>>,
    ) {
        warn!(stage = stage.as_str(), error = %error, "Pipeline halted");
        let message = format!("{}: {}", stage_failure_label(stage), error);
        self.state.error = Some(message.clone());
        self.send(updates, PipelineUpdate::Failed { stage, message });
    }

    fn send(&self, updates: Option<&mpsc::Sender<PipelineUpdate>>, update: PipelineUpdate) {
        if let Some(tx) = updates {
            // Never block a run on a slow or abandoned observer.
            let _ = tx.try_send(update);
        }
    }
}

fn stage_failure_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Weather => "Could not load the weather forecast",
        Stage::Flights => "Could not load flight offers",
        Stage::Hotels => "Could not load hotel offers",
        Stage::Ai => "Could not generate your itinerary",
        Stage::Initializing | Stage::Complete => "Trip planning failed",
    }
}

async fn guarded<T>(
    stage: &'static str,
    call: impl Future<Output = Result<T, TripError>>,
) -> Result<T, TripError> {
    match timeout(STAGE_TIMEOUT, call).await {
        Ok(result) => result,
        Err(_) => Err(TripError::TimeoutError(stage)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse_trip_date, BudgetTier};
    use tempfile::TempDir;

    fn sample_request() -> TripRequest {
        TripRequest {
            travelers: 2,
            depart_from: "New York".to_string(),
            arrive_at: "Paris".to_string(),
            depart_date: parse_trip_date("2026-08-10").unwrap(),
            return_date: parse_trip_date("2026-08-15").unwrap(),
            budget: BudgetTier::Comfort,
        }
    }

    #[test]
    fn test_session_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().join("cache")).unwrap();
        let sessions = SessionStore::new(&store);

        let request = sample_request();
        let mut results = TripResults::default();
        results.plan = Some(TripPlan {
            destination: "Paris".to_string(),
            ..TripPlan::default()
        });

        sessions.save(&request, &results);
        let loaded = sessions.load(&request).unwrap();
        assert_eq!(loaded.plan.unwrap().destination, "Paris");
    }

    #[test]
    fn test_session_key_normalizes_locations() {
        let mut a = sample_request();
        a.depart_from = "  NEW YORK ".to_string();
        let b = sample_request();
        assert_eq!(SessionStore::key(&a), SessionStore::key(&b));
    }

    #[test]
    fn test_session_miss_for_different_dates() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().join("cache")).unwrap();
        let sessions = SessionStore::new(&store);

        let request = sample_request();
        sessions.save(&request, &TripResults::default());

        let mut other = sample_request();
        other.return_date = parse_trip_date("2026-08-20").unwrap();
        assert!(sessions.load(&other).is_none());
    }

    #[test]
    fn test_initial_state() {
        let state = PipelineState::default();
        assert_eq!(state.stage, Stage::Initializing);
        assert!(state.error.is_none());
        assert!(state.results.weather.is_none());
    }
}
