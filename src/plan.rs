//! Trip-plan schema and streaming decode
//!
//! An LLM token stream is syntactically invalid JSON at every point except
//! the very end, so the decoder keeps a running buffer and opportunistically
//! extracts a whitelist of top-level fields after each chunk: full-parse
//! first, then targeted matchers over the incomplete text. Extraction here
//! is deliberately loose: it trades precision for responsiveness and is
//! never a validating parser. The authoritative result is the single full
//! parse performed by [`PlanStreamDecoder::finish`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::TripError;

/// Flight pick inside a generated plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlightChoice {
    pub airline: String,
    pub flight_number: Option<String>,
    pub price: String,
    pub reason: Option<String>,
}

/// Hotel pick inside a generated plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HotelChoice {
    pub name: String,
    pub price_per_night: String,
    pub reason: Option<String>,
}

/// One day of the generated itinerary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ItineraryDay {
    pub day: u32,
    pub title: String,
    pub activities: Vec<String>,
    pub estimated_cost: Option<String>,
}

/// Cost breakdown inside a generated plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BudgetAnalysis {
    pub flights: String,
    pub accommodation: String,
    pub food: String,
    pub activities: String,
    pub total: String,
}

/// The full AI-generated trip plan.
///
/// Every field is defaulted so vendor-schema drift degrades to missing
/// data instead of a failed decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TripPlan {
    pub summary: String,
    pub destination: String,
    pub trip_duration: u32,
    pub selected_flight: Option<FlightChoice>,
    pub selected_hotel: Option<HotelChoice>,
    pub daily_itinerary: Vec<ItineraryDay>,
    pub budget_analysis: Option<BudgetAnalysis>,
    pub travel_tips: Vec<String>,
    pub packing_recommendations: Vec<String>,
}

impl TripPlan {
    /// Convert a parsed JSON value into a plan, leniently.
    ///
    /// A strict mismatch is logged and recognized fields are salvaged
    /// one by one; the caller always gets a usable plan.
    pub fn from_value(value: Value) -> TripPlan {
        match serde_json::from_value::<TripPlan>(value.clone()) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "Plan drifted from expected schema, salvaging recognized fields");
                let mut plan = TripPlan::default();
                let obj = match value.as_object() {
                    Some(obj) => obj,
                    None => return plan,
                };
                if let Some(s) = obj.get("summary").and_then(Value::as_str) {
                    plan.summary = s.to_string();
                }
                if let Some(s) = obj.get("destination").and_then(Value::as_str) {
                    plan.destination = s.to_string();
                }
                if let Some(n) = obj.get("tripDuration").and_then(Value::as_u64) {
                    plan.trip_duration = n as u32;
                }
                plan.selected_flight = obj
                    .get("selectedFlight")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok());
                plan.selected_hotel = obj
                    .get("selectedHotel")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok());
                if let Some(days) = obj.get("dailyItinerary").and_then(Value::as_array) {
                    plan.daily_itinerary = days
                        .iter()
                        .filter_map(|d| serde_json::from_value(d.clone()).ok())
                        .collect();
                }
                if let Some(tips) = obj.get("travelTips").and_then(Value::as_array) {
                    plan.travel_tips = tips
                        .iter()
                        .filter_map(|t| t.as_str().map(str::to_string))
                        .collect();
                }
                if let Some(items) = obj.get("packingRecommendations").and_then(Value::as_array) {
                    plan.packing_recommendations = items
                        .iter()
                        .filter_map(|t| t.as_str().map(str::to_string))
                        .collect();
                }
                plan
            }
        }
    }
}

/// Best-effort partial plan accumulated during streaming.
///
/// Fields populate monotonically as more text arrives and are never
/// retracted within one streaming session; the partial is discarded once
/// the final validated plan is available.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialPlan {
    pub summary: Option<String>,
    pub destination: Option<String>,
    pub trip_duration: Option<u32>,
    pub selected_flight: Option<FlightChoice>,
    pub selected_hotel: Option<HotelChoice>,
    /// Complete daily-itinerary entries seen so far
    pub days_completed: usize,
}

/// Incremental decoder for a streamed trip plan.
pub struct PlanStreamDecoder {
    buffer: String,
    partial: PartialPlan,
    summary_re: Regex,
    destination_re: Regex,
    duration_re: Regex,
}

impl Default for PlanStreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanStreamDecoder {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            partial: PartialPlan::default(),
            summary_re: Regex::new(r#""summary"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap(),
            destination_re: Regex::new(r#""destination"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap(),
            // Require a terminator so a half-streamed number is not taken.
            duration_re: Regex::new(r#""tripDuration"\s*:\s*(\d+)\s*[,}\r\n]"#).unwrap(),
        }
    }

    /// The partial state extracted so far.
    pub fn partial(&self) -> &PartialPlan {
        &self.partial
    }

    /// Raw text accumulated so far.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Append one chunk and re-run extraction over the buffer.
    ///
    /// Returns the partial plan when this chunk surfaced something new,
    /// `None` when nothing changed.
    pub fn push(&mut self, chunk: &str) -> Option<&PartialPlan> {
        self.buffer.push_str(chunk);
        let before = self.partial.clone();

        let stripped = strip_code_fences(&self.buffer).to_string();
        match serde_json::from_str::<Value>(&stripped) {
            Ok(value) => self.merge_value(&value),
            // Incomplete JSON is the steady state while streaming; fall
            // back to field-level extraction.
            Err(_) => self.merge_extracted(&stripped),
        }

        if self.partial != before {
            debug!(days = self.partial.days_completed, "Partial plan advanced");
            Some(&self.partial)
        } else {
            None
        }
    }

    /// Final full parse of the accumulated text. Failure here is terminal,
    /// unlike the expected per-chunk misses.
    pub fn finish(self) -> Result<Value, TripError> {
        let stripped = strip_code_fences(&self.buffer);
        let value: Value = serde_json::from_str(stripped)
            .map_err(|e| TripError::DecodeError(format!("Final plan is not valid JSON: {}", e)))?;
        if !value.is_object() {
            return Err(TripError::DecodeError(
                "Final plan is not a JSON object".to_string(),
            ));
        }
        Ok(value)
    }

    fn merge_value(&mut self, value: &Value) {
        let obj = match value.as_object() {
            Some(obj) => obj,
            None => return,
        };
        if let Some(s) = obj.get("summary").and_then(Value::as_str) {
            self.partial.summary = Some(s.to_string());
        }
        if let Some(s) = obj.get("destination").and_then(Value::as_str) {
            self.partial.destination = Some(s.to_string());
        }
        if let Some(n) = obj.get("tripDuration").and_then(Value::as_u64) {
            self.partial.trip_duration = Some(n as u32);
        }
        if let Some(flight) = obj
            .get("selectedFlight")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
        {
            self.partial.selected_flight = Some(flight);
        }
        if let Some(hotel) = obj
            .get("selectedHotel")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
        {
            self.partial.selected_hotel = Some(hotel);
        }
        if let Some(days) = obj.get("dailyItinerary").and_then(Value::as_array) {
            self.partial.days_completed = self.partial.days_completed.max(days.len());
        }
    }

    fn merge_extracted(&mut self, text: &str) {
        if let Some(s) = extract_json_string(&self.summary_re, text) {
            self.partial.summary = Some(s);
        }
        if let Some(s) = extract_json_string(&self.destination_re, text) {
            self.partial.destination = Some(s);
        }
        if let Some(caps) = self.duration_re.captures(text) {
            if let Ok(n) = caps[1].parse::<u32>() {
                self.partial.trip_duration = Some(n);
            }
        }
        if let Some(raw) = extract_object(text, "selectedFlight") {
            if let Ok(flight) = serde_json::from_str::<FlightChoice>(&raw) {
                self.partial.selected_flight = Some(flight);
            }
        }
        if let Some(raw) = extract_object(text, "selectedHotel") {
            if let Ok(hotel) = serde_json::from_str::<HotelChoice>(&raw) {
                self.partial.selected_hotel = Some(hotel);
            }
        }
        let days = count_array_objects(text, "dailyItinerary");
        self.partial.days_completed = self.partial.days_completed.max(days);
    }
}

/// Drop a markdown code fence around the payload, tolerating a missing
/// closing fence while the stream is still in flight.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        // Skip the info string ("json") on the fence line.
        let body = match rest.find('\n') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        };
        let body = body.trim_end();
        body.strip_suffix("```").unwrap_or(body).trim()
    } else {
        trimmed
    }
}

/// Extract a completed JSON string field, unescaping via a JSON parse of
/// the quoted capture.
fn extract_json_string(re: &Regex, text: &str) -> Option<String> {
    let caps = re.captures(text)?;
    serde_json::from_str::<String>(&format!("\"{}\"", &caps[1])).ok()
}

/// Extract the complete `{...}` object following `"key":`, if the buffer
/// already contains its closing brace.
fn extract_object(text: &str, key: &str) -> Option<String> {
    let marker = format!("\"{}\"", key);
    let key_pos = text.find(&marker)?;
    let after = &text[key_pos + marker.len()..];
    let brace = after.find('{')?;
    if !after[..brace].chars().all(|c| c == ':' || c.is_whitespace()) {
        return None;
    }
    balanced_prefix(&after[brace..])
}

/// The prefix of `text` forming one balanced `{...}` group, string-aware.
fn balanced_prefix(text: &str) -> Option<String> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(text[..i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Count complete objects inside the array following `"key":`, even while
/// the array itself is still unterminated.
fn count_array_objects(text: &str, key: &str) -> usize {
    let marker = format!("\"{}\"", key);
    let key_pos = match text.find(&marker) {
        Some(pos) => pos,
        None => return 0,
    };
    let after = &text[key_pos + marker.len()..];
    let bracket = match after.find('[') {
        Some(idx) => idx,
        None => return 0,
    };
    if !after[..bracket].chars().all(|c| c == ':' || c.is_whitespace()) {
        return 0;
    }

    let mut rest = &after[bracket + 1..];
    let mut count = 0;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if !rest.starts_with('{') {
            break;
        }
        match balanced_prefix(rest) {
            Some(obj) => {
                count += 1;
                rest = &rest[obj.len()..];
            }
            None => break,
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_PLAN: &str = r#"{
        "summary": "Five days of food and museums",
        "destination": "Paris",
        "tripDuration": 5,
        "selectedFlight": {"airline": "Air France", "price": "$780", "reason": "nonstop"},
        "selectedHotel": {"name": "Hotel Lutetia", "pricePerNight": "$310"},
        "dailyItinerary": [
            {"day": 1, "title": "Arrival", "activities": ["Check in", "Seine walk"]},
            {"day": 2, "title": "Louvre", "activities": ["Louvre", "Tuileries"]}
        ],
        "budgetAnalysis": {"flights": "$1560", "accommodation": "$1550", "food": "$600", "activities": "$400", "total": "$4110"},
        "travelTips": ["Buy museum pass"],
        "packingRecommendations": ["Umbrella"]
    }"#;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        // Unterminated fence while the stream is in flight.
        assert_eq!(strip_code_fences("```json\n{\"a\":"), "{\"a\":");
    }

    #[test]
    fn test_fields_appear_as_substrings_complete() {
        let mut decoder = PlanStreamDecoder::new();

        assert!(decoder.push("{\"summary\": \"Five days").is_none());
        let partial = decoder.push(" of food\", \"desti").expect("summary completed");
        assert_eq!(partial.summary.as_deref(), Some("Five days of food"));
        assert_eq!(partial.destination, None);

        let partial = decoder.push("nation\": \"Paris\",").expect("destination completed");
        assert_eq!(partial.destination.as_deref(), Some("Paris"));
        // Previously extracted fields survive.
        assert_eq!(partial.summary.as_deref(), Some("Five days of food"));
    }

    #[test]
    fn test_duration_needs_terminator() {
        let mut decoder = PlanStreamDecoder::new();
        decoder.push("{\"tripDuration\": 5");
        assert_eq!(decoder.partial().trip_duration, None);
        decoder.push("6,");
        assert_eq!(decoder.partial().trip_duration, Some(56));
    }

    #[test]
    fn test_selected_flight_extracted_when_balanced() {
        let mut decoder = PlanStreamDecoder::new();
        decoder.push("{\"selectedFlight\": {\"airline\": \"Air France\", \"price\": \"$780\"");
        assert!(decoder.partial().selected_flight.is_none());
        decoder.push("},");
        let flight = decoder.partial().selected_flight.as_ref().unwrap();
        assert_eq!(flight.airline, "Air France");
        assert_eq!(flight.price, "$780");
    }

    #[test]
    fn test_day_count_grows_monotonically() {
        let mut decoder = PlanStreamDecoder::new();
        decoder.push("{\"dailyItinerary\": [{\"day\":1,\"title\":\"A\",\"activities\":[]}");
        assert_eq!(decoder.partial().days_completed, 1);
        decoder.push(", {\"day\":2,\"title\":\"B\",\"activities\":[]}");
        assert_eq!(decoder.partial().days_completed, 2);
        // Garbage afterwards never shrinks the count or drops fields.
        decoder.push(", {\"day\":3,");
        assert_eq!(decoder.partial().days_completed, 2);
    }

    #[test]
    fn test_fenced_stream_end_to_end() {
        let mut decoder = PlanStreamDecoder::new();
        let fenced = format!("```json\n{}\n```", FULL_PLAN);
        for chunk in fenced.as_bytes().chunks(17) {
            decoder.push(std::str::from_utf8(chunk).unwrap());
        }
        let partial = decoder.partial().clone();
        assert_eq!(partial.destination.as_deref(), Some("Paris"));
        assert_eq!(partial.trip_duration, Some(5));
        assert_eq!(partial.days_completed, 2);

        let value = decoder.finish().unwrap();
        let plan = TripPlan::from_value(value);
        assert_eq!(plan.destination, "Paris");
        assert_eq!(plan.daily_itinerary.len(), 2);
        assert_eq!(plan.travel_tips, vec!["Buy museum pass".to_string()]);
    }

    #[test]
    fn test_finish_fails_on_truncated_stream() {
        let mut decoder = PlanStreamDecoder::new();
        decoder.push("{\"summary\": \"cut off");
        match decoder.finish() {
            Err(TripError::DecodeError(_)) => {}
            other => panic!("Expected decode error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_finish_rejects_non_object() {
        let mut decoder = PlanStreamDecoder::new();
        decoder.push("\"just a string\"");
        assert!(decoder.finish().is_err());
    }

    #[test]
    fn test_from_value_salvages_on_drift() {
        // tripDuration drifted to a string: strict decode fails, salvage
        // keeps the fields that still match.
        let value: Value = serde_json::from_str(
            r#"{"summary": "S", "destination": "Rome", "tripDuration": "five days",
                "travelTips": ["Walk"], "dailyItinerary": [{"day": 1, "title": "Go", "activities": []}]}"#,
        )
        .unwrap();
        let plan = TripPlan::from_value(value);
        assert_eq!(plan.summary, "S");
        assert_eq!(plan.destination, "Rome");
        assert_eq!(plan.trip_duration, 0);
        assert_eq!(plan.daily_itinerary.len(), 1);
        assert_eq!(plan.travel_tips, vec!["Walk".to_string()]);
    }

    #[test]
    fn test_escaped_quotes_in_extracted_strings() {
        let mut decoder = PlanStreamDecoder::new();
        decoder.push(r#"{"summary": "A \"grand\" tour","#);
        assert_eq!(
            decoder.partial().summary.as_deref(),
            Some("A \"grand\" tour")
        );
    }

    #[test]
    fn test_object_with_nested_braces_in_strings() {
        let mut decoder = PlanStreamDecoder::new();
        decoder.push(r#"{"selectedHotel": {"name": "Brace {Inn}", "pricePerNight": "$90"},"#);
        let hotel = decoder.partial().selected_hotel.as_ref().unwrap();
        assert_eq!(hotel.name, "Brace {Inn}");
    }
}
