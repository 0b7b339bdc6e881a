//! Amadeus API client: location search, flight offers, hotel offers
//!
//! Thin fetch wrappers mapping vendor JSON to display shapes. Every call
//! fetches a bearer token from the shared [`TokenCache`] first; token reuse
//! across calls is the cache's concern, not this client's.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::gateways::{
    check_status, CodeSearch, FlightOption, FlightProvider, HotelOption, HotelProvider,
    LocationHit, Price,
};
use crate::resolver::LocationKind;
use crate::token::TokenCache;
use crate::{BudgetTier, TripError};

const AMADEUS_API_BASE: &str = "https://test.api.amadeus.com";
const REQUEST_TIMEOUT_SECS: u64 = 20;

/// How many hotel ids from the by-city listing are priced per search
const HOTEL_OFFER_BATCH: usize = 20;

pub struct AmadeusClient {
    http_client: Client,
    base_url: String,
    tokens: TokenCache,
}

impl AmadeusClient {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, TripError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_base_url(
            http_client,
            AMADEUS_API_BASE,
            client_id,
            client_secret,
        ))
    }

    /// Build against a different deployment (also used by tests).
    pub fn with_base_url(
        http_client: Client,
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into();
        let tokens = TokenCache::new(
            http_client.clone(),
            format!("{}/v1/security/oauth2/token", base_url),
            client_id,
            client_secret,
        );
        Self {
            http_client,
            base_url,
            tokens,
        }
    }

    async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, TripError> {
        let token = self.tokens.bearer().await?;
        let response = self
            .http_client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;
        check_status("amadeus", response).await
    }
}

#[async_trait]
impl CodeSearch for AmadeusClient {
    #[instrument(level = "debug", skip(self))]
    async fn search_locations(
        &self,
        query: &str,
        kind: LocationKind,
    ) -> Result<Vec<LocationHit>, TripError> {
        let sub_type = match kind {
            LocationKind::Airport => "AIRPORT,CITY",
            LocationKind::City => "CITY",
        };
        let response = self
            .get(
                "/v1/reference-data/locations",
                &[
                    ("keyword", query.to_string()),
                    ("subType", sub_type.to_string()),
                    ("page[limit]", "10".to_string()),
                ],
            )
            .await?;
        let payload: LocationsPayload = response.json().await?;
        debug!(hits = payload.data.len(), "Location search completed");
        Ok(payload
            .data
            .into_iter()
            .map(|loc| LocationHit {
                name: loc.name,
                iata_code: loc.iata_code,
                subtype: loc.sub_type,
            })
            .collect())
    }
}

#[async_trait]
impl FlightProvider for AmadeusClient {
    #[instrument(level = "info", skip(self))]
    async fn search_flights(
        &self,
        origin: &str,
        destination: &str,
        depart: NaiveDate,
        return_date: NaiveDate,
        travelers: u32,
    ) -> Result<Vec<FlightOption>, TripError> {
        let response = self
            .get(
                "/v2/shopping/flight-offers",
                &[
                    ("originLocationCode", origin.to_string()),
                    ("destinationLocationCode", destination.to_string()),
                    ("departureDate", depart.to_string()),
                    ("returnDate", return_date.to_string()),
                    ("adults", travelers.to_string()),
                    ("max", "10".to_string()),
                ],
            )
            .await?;
        let payload: FlightOffersPayload = response.json().await?;
        let flights = map_flight_offers(payload);
        info!(flights = flights.len(), "Flight search completed");
        Ok(flights)
    }
}

#[async_trait]
impl HotelProvider for AmadeusClient {
    #[instrument(level = "info", skip(self))]
    async fn search_hotels(
        &self,
        city_code: &str,
        check_in: NaiveDate,
        check_out: NaiveDate,
        travelers: u32,
        budget: BudgetTier,
    ) -> Result<Vec<HotelOption>, TripError> {
        let ratings = match budget {
            BudgetTier::Budget => "2,3",
            BudgetTier::Comfort => "3,4",
            BudgetTier::Luxury => "4,5",
        };
        let response = self
            .get(
                "/v1/reference-data/locations/hotels/by-city",
                &[
                    ("cityCode", city_code.to_string()),
                    ("ratings", ratings.to_string()),
                ],
            )
            .await?;
        let listing: HotelListPayload = response.json().await?;

        let hotel_ids: Vec<String> = listing
            .data
            .iter()
            .filter_map(|h| h.hotel_id.clone())
            .take(HOTEL_OFFER_BATCH)
            .collect();
        if hotel_ids.is_empty() {
            return Err(TripError::GatewayError {
                service: "amadeus",
                status: 200,
                detail: format!("No hotels listed for city {}", city_code),
            });
        }

        let response = self
            .get(
                "/v3/shopping/hotel-offers",
                &[
                    ("hotelIds", hotel_ids.join(",")),
                    ("adults", travelers.to_string()),
                    ("checkInDate", check_in.to_string()),
                    ("checkOutDate", check_out.to_string()),
                ],
            )
            .await?;
        let payload: HotelOffersPayload = response.json().await?;
        let nights = (check_out - check_in).num_days().max(1);
        let hotels = map_hotel_offers(payload, nights);
        info!(hotels = hotels.len(), "Hotel search completed");
        Ok(hotels)
    }
}

fn map_flight_offers(payload: FlightOffersPayload) -> Vec<FlightOption> {
    payload
        .data
        .into_iter()
        .filter_map(|offer| {
            let itinerary = offer.itineraries.into_iter().next()?;
            let first = itinerary.segments.first()?.clone();
            let last = itinerary.segments.last()?.clone();
            let amount = offer.price.grand_total.parse::<f64>().ok()?;
            Some(FlightOption {
                airline: first.carrier_code.clone(),
                flight_number: Some(format!("{}{}", first.carrier_code, first.number)),
                departure: first.departure.at,
                arrival: last.arrival.at,
                duration: itinerary.duration,
                stops: itinerary.segments.len() as i32 - 1,
                price: Price {
                    amount,
                    currency: offer.price.currency,
                },
            })
        })
        .collect()
}

fn map_hotel_offers(payload: HotelOffersPayload, nights: i64) -> Vec<HotelOption> {
    payload
        .data
        .into_iter()
        .filter_map(|entry| {
            let offer = entry.offers.into_iter().next()?;
            let total = offer.price.total.parse::<f64>().ok()?;
            Some(HotelOption {
                name: entry.hotel.name,
                rating: entry.hotel.rating.and_then(|r| r.parse::<f32>().ok()),
                price_per_night: Some(Price {
                    amount: total / nights as f64,
                    currency: offer.price.currency.clone(),
                }),
                total: Some(Price {
                    amount: total,
                    currency: offer.price.currency,
                }),
                address: None,
            })
        })
        .collect()
}

// Vendor wire shapes

#[derive(Debug, Deserialize)]
struct LocationsPayload {
    #[serde(default)]
    data: Vec<LocationRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationRecord {
    #[serde(default)]
    name: String,
    iata_code: Option<String>,
    #[serde(default)]
    sub_type: String,
}

#[derive(Debug, Deserialize)]
struct FlightOffersPayload {
    #[serde(default)]
    data: Vec<FlightOffer>,
}

#[derive(Debug, Deserialize)]
struct FlightOffer {
    #[serde(default)]
    itineraries: Vec<Itinerary>,
    price: OfferPrice,
}

#[derive(Debug, Deserialize)]
struct Itinerary {
    #[serde(default)]
    duration: String,
    #[serde(default)]
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Segment {
    departure: SegmentPoint,
    arrival: SegmentPoint,
    carrier_code: String,
    number: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SegmentPoint {
    #[serde(default)]
    at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferPrice {
    grand_total: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct HotelListPayload {
    #[serde(default)]
    data: Vec<HotelListing>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HotelListing {
    hotel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HotelOffersPayload {
    #[serde(default)]
    data: Vec<HotelOfferEntry>,
}

#[derive(Debug, Deserialize)]
struct HotelOfferEntry {
    hotel: HotelRecord,
    #[serde(default)]
    offers: Vec<HotelOffer>,
}

#[derive(Debug, Deserialize)]
struct HotelRecord {
    #[serde(default)]
    name: String,
    rating: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HotelOffer {
    price: HotelPrice,
}

#[derive(Debug, Deserialize)]
struct HotelPrice {
    total: String,
    #[serde(default)]
    currency: String,
}
