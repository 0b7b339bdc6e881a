//! AI itinerary generation
//!
//! Builds the contextual prompt (trip parameters plus weather, flight and
//! hotel summaries) and talks to a chat-completion API in two modes:
//! streaming (text deltas forwarded over a channel for live decode) and a
//! single-shot completion used as the streaming path's fallback. Both modes
//! consume the identical prompt, so a fallback never changes the ask.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::gateways::{
    check_status, FlightOption, HotelOption, ItineraryProvider, PlanStreamEvent, WeatherReport,
};
use crate::{TripError, TripRequest};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const CONNECT_TIMEOUT_SECS: u64 = 30;

const SYSTEM_PROMPT: &str = "You are a meticulous travel planner. Respond with a single JSON \
object and nothing else - no prose, no markdown fences.";

/// Everything the model needs to produce a plan for one trip.
#[derive(Debug, Clone)]
pub struct PlanContext {
    pub request: TripRequest,
    pub destination_code: String,
    pub weather: Option<WeatherReport>,
    pub flights: Vec<FlightOption>,
    pub hotels: Vec<HotelOption>,
}

impl PlanContext {
    /// Render the user prompt. Flight and hotel lists are truncated to the
    /// top few offers to keep the context focused.
    pub fn prompt(&self) -> String {
        let req = &self.request;
        let mut out = String::new();

        out.push_str(&format!(
            "Plan a {}-day trip from {} to {} ({}) for {} traveler(s), {} to {}, on a {} budget.\n",
            req.duration_days(),
            req.depart_from,
            req.arrive_at,
            self.destination_code,
            req.travelers,
            req.depart_date,
            req.return_date,
            req.budget.as_str(),
        ));

        if let Some(weather) = &self.weather {
            out.push_str(&format!("\nWeather outlook: {}\n", weather.summary));
            for day in &weather.forecast {
                out.push_str(&format!(
                    "  {}: {:.0}-{:.0}C, {}, precipitation {:.0}%\n",
                    day.date,
                    day.temp_min,
                    day.temp_max,
                    day.condition,
                    day.precipitation * 100.0,
                ));
            }
        }

        if !self.flights.is_empty() {
            out.push_str("\nFlight options:\n");
            for flight in self.flights.iter().take(3) {
                out.push_str(&format!(
                    "  {} {} dep {} arr {} ({}, {} stops) - {:.0} {}\n",
                    flight.airline,
                    flight.flight_number.as_deref().unwrap_or(""),
                    flight.departure,
                    flight.arrival,
                    flight.duration,
                    flight.stops,
                    flight.price.amount,
                    flight.price.currency,
                ));
            }
        }

        if !self.hotels.is_empty() {
            out.push_str("\nHotel options:\n");
            for hotel in self.hotels.iter().take(5) {
                let nightly = hotel
                    .price_per_night
                    .as_ref()
                    .map(|p| format!("{:.0} {}/night", p.amount, p.currency))
                    .unwrap_or_else(|| "price unknown".to_string());
                out.push_str(&format!("  {} - {}\n", hotel.name, nightly));
            }
        }

        out.push_str(
            "\nProduce a JSON object with exactly these fields: summary, destination, \
             tripDuration (number of days), selectedFlight {airline, flightNumber, price, reason}, \
             selectedHotel {name, pricePerNight, reason}, dailyItinerary (one entry per day: \
             {day, title, activities, estimatedCost}), budgetAnalysis {flights, accommodation, \
             food, activities, total}, travelTips (strings), packingRecommendations (strings).\n",
        );

        out
    }
}

/// Chat-completion client for plan generation
pub struct OpenAiPlanner {
    http_client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiPlanner {
    pub fn new(api_key: impl Into<String>) -> Result<Self, TripError> {
        // No total-request timeout here: it would cut long streams short.
        let http_client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http_client,
            api_key: api_key.into(),
            base_url: OPENAI_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    /// Point at a different deployment (also used by tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn request_body(&self, context: &PlanContext, stream: bool) -> serde_json::Value {
        json!({
            "model": self.model,
            "stream": stream,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": context.prompt()},
            ],
        })
    }

    async fn send(&self, context: &PlanContext, stream: bool) -> Result<reqwest::Response, TripError> {
        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(context, stream))
            .send()
            .await?;
        check_status("openai", response).await
    }
}

#[async_trait]
impl ItineraryProvider for OpenAiPlanner {
    #[instrument(level = "info", skip(self, context))]
    async fn stream_plan(
        &self,
        context: &PlanContext,
    ) -> Result<mpsc::Receiver<PlanStreamEvent>, TripError> {
        info!(model = %self.model, "Starting streaming plan generation");
        let response = self.send(context, true).await?;

        let (tx, rx) = mpsc::channel(32);
        let mut body = response.bytes_stream();

        tokio::spawn(async move {
            let mut sse_buffer = String::new();
            while let Some(item) = body.next().await {
                let bytes = match item {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(error = %e, "Plan stream interrupted");
                        let _ = tx.send(PlanStreamEvent::Error(e.to_string())).await;
                        return;
                    }
                };
                sse_buffer.push_str(&String::from_utf8_lossy(&bytes));

                // SSE events are separated by a blank line.
                while let Some(pos) = sse_buffer.find("\n\n") {
                    let event: String = sse_buffer.drain(..pos + 2).collect();
                    for line in event.lines() {
                        let data = match line.strip_prefix("data:") {
                            Some(data) => data.trim(),
                            None => continue,
                        };
                        if data == "[DONE]" {
                            let _ = tx.send(PlanStreamEvent::Done).await;
                            return;
                        }
                        match serde_json::from_str::<ChatChunk>(data) {
                            Ok(chunk) => {
                                let delta = chunk
                                    .choices
                                    .into_iter()
                                    .next()
                                    .and_then(|c| c.delta.content);
                                if let Some(text) = delta {
                                    if tx.send(PlanStreamEvent::Delta(text)).await.is_err() {
                                        // Receiver abandoned the run.
                                        return;
                                    }
                                }
                            }
                            Err(e) => debug!(error = %e, "Skipping unparseable stream event"),
                        }
                    }
                }
            }
            let _ = tx.send(PlanStreamEvent::Done).await;
        });

        Ok(rx)
    }

    #[instrument(level = "info", skip(self, context))]
    async fn complete_plan(&self, context: &PlanContext) -> Result<String, TripError> {
        info!(model = %self.model, "Requesting single-shot plan generation");
        let response = self.send(context, false).await?;
        let completion: ChatCompletion = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| TripError::DecodeError("Completion held no choices".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::{DayForecast, Price};
    use crate::{parse_trip_date, BudgetTier};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_context() -> PlanContext {
        PlanContext {
            request: TripRequest {
                travelers: 2,
                depart_from: "New York".to_string(),
                arrive_at: "Paris".to_string(),
                depart_date: parse_trip_date("2026-08-10").unwrap(),
                return_date: parse_trip_date("2026-08-15").unwrap(),
                budget: BudgetTier::Comfort,
            },
            destination_code: "PAR".to_string(),
            weather: Some(WeatherReport {
                summary: "Mild and mostly sunny".to_string(),
                forecast: vec![DayForecast {
                    date: parse_trip_date("2026-08-10").unwrap(),
                    temp_min: 16.0,
                    temp_max: 25.0,
                    condition: "Clear".to_string(),
                    description: "clear sky".to_string(),
                    precipitation: 0.1,
                }],
            }),
            flights: vec![FlightOption {
                airline: "Air France".to_string(),
                flight_number: Some("AF007".to_string()),
                departure: "2026-08-10T18:30".to_string(),
                arrival: "2026-08-11T07:45".to_string(),
                duration: "7h15m".to_string(),
                stops: 0,
                price: Price {
                    amount: 780.0,
                    currency: "USD".to_string(),
                },
            }],
            hotels: vec![HotelOption {
                name: "Hotel Lutetia".to_string(),
                rating: Some(4.5),
                price_per_night: Some(Price {
                    amount: 310.0,
                    currency: "USD".to_string(),
                }),
                total: None,
                address: None,
            }],
        }
    }

    #[test]
    fn test_prompt_carries_trip_and_vendor_summaries() {
        let prompt = sample_context().prompt();
        assert!(prompt.contains("5-day trip"));
        assert!(prompt.contains("Paris"));
        assert!(prompt.contains("2 traveler(s)"));
        assert!(prompt.contains("comfort budget"));
        assert!(prompt.contains("Mild and mostly sunny"));
        assert!(prompt.contains("Air France"));
        assert!(prompt.contains("Hotel Lutetia"));
        assert!(prompt.contains("dailyItinerary"));
    }

    #[tokio::test]
    async fn test_stream_plan_yields_deltas_then_done() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"{\\\"summary\\\":\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"\\\"Hi\\\"}\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let planner = OpenAiPlanner::new("test-key")
            .unwrap()
            .with_base_url(server.uri());
        let mut rx = planner.stream_plan(&sample_context()).await.unwrap();

        let mut text = String::new();
        let mut done = false;
        while let Some(event) = rx.recv().await {
            match event {
                PlanStreamEvent::Delta(chunk) => text.push_str(&chunk),
                PlanStreamEvent::Done => {
                    done = true;
                    break;
                }
                PlanStreamEvent::Error(e) => panic!("Unexpected stream error: {}", e),
            }
        }
        assert!(done);
        assert_eq!(text, "{\"summary\":\"Hi\"}");
    }

    #[tokio::test]
    async fn test_complete_plan_returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "{\"summary\":\"ok\"}"}}]
            })))
            .mount(&server)
            .await;

        let planner = OpenAiPlanner::new("test-key")
            .unwrap()
            .with_base_url(server.uri());
        let text = planner.complete_plan(&sample_context()).await.unwrap();
        assert_eq!(text, "{\"summary\":\"ok\"}");
    }

    #[tokio::test]
    async fn test_non_2xx_surfaces_gateway_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let planner = OpenAiPlanner::new("test-key")
            .unwrap()
            .with_base_url(server.uri());
        match planner.complete_plan(&sample_context()).await {
            Err(TripError::GatewayError { service, status, .. }) => {
                assert_eq!(service, "openai");
                assert_eq!(status, 429);
            }
            other => panic!("Expected gateway error, got {:?}", other.map(|_| ())),
        }
    }
}
