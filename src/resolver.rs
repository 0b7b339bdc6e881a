//! Free-text location resolution
//!
//! Resolves city or airport names to IATA codes and geocoordinates:
//! recognized-literal short-circuit, then cache, then vendor search, then a
//! hand-curated fallback table. Resolution is infallible by construction:
//! a query that defeats every tier still yields the default hub. Vendor
//! results and fallbacks are both cached so repeated failing lookups stay
//! local within the TTL window.

use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::cache::{normalize_key, CacheStore, LookupCache};
use crate::gateways::{CodeSearch, GeoSearch};
use crate::Coordinates;

/// Which kind of location a code lookup should favor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    Airport,
    City,
}

impl LocationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationKind::Airport => "AIRPORT",
            LocationKind::City => "CITY",
        }
    }
}

/// Hand-curated fallback: major cities with their primary airport, IATA
/// city code and coordinates. Used when the vendor search is unreachable
/// or returns nothing usable.
const FALLBACK_CITIES: &[(&str, &str, &str, f64, f64)] = &[
    ("paris", "CDG", "PAR", 48.8566, 2.3522),
    ("london", "LHR", "LON", 51.5074, -0.1278),
    ("new york", "JFK", "NYC", 40.7128, -74.0060),
    ("new york city", "JFK", "NYC", 40.7128, -74.0060),
    ("tokyo", "HND", "TYO", 35.6762, 139.6503),
    ("los angeles", "LAX", "LAX", 34.0522, -118.2437),
    ("rome", "FCO", "ROM", 41.9028, 12.4964),
    ("madrid", "MAD", "MAD", 40.4168, -3.7038),
    ("barcelona", "BCN", "BCN", 41.3851, 2.1734),
    ("amsterdam", "AMS", "AMS", 52.3676, 4.9041),
    ("berlin", "BER", "BER", 52.5200, 13.4050),
    ("lisbon", "LIS", "LIS", 38.7223, -9.1393),
    ("dublin", "DUB", "DUB", 53.3498, -6.2603),
    ("prague", "PRG", "PRG", 50.0755, 14.4378),
    ("vienna", "VIE", "VIE", 48.2082, 16.3738),
    ("athens", "ATH", "ATH", 37.9838, 23.7275),
    ("istanbul", "IST", "IST", 41.0082, 28.9784),
    ("dubai", "DXB", "DXB", 25.2048, 55.2708),
    ("singapore", "SIN", "SIN", 1.3521, 103.8198),
    ("hong kong", "HKG", "HKG", 22.3193, 114.1694),
    ("bangkok", "BKK", "BKK", 13.7563, 100.5018),
    ("seoul", "ICN", "SEL", 37.5665, 126.9780),
    ("beijing", "PEK", "BJS", 39.9042, 116.4074),
    ("shanghai", "PVG", "SHA", 31.2304, 121.4737),
    ("sydney", "SYD", "SYD", -33.8688, 151.2093),
    ("melbourne", "MEL", "MEL", -37.8136, 144.9631),
    ("auckland", "AKL", "AKL", -36.8509, 174.7645),
    ("toronto", "YYZ", "YTO", 43.6532, -79.3832),
    ("vancouver", "YVR", "YVR", 49.2827, -123.1207),
    ("montreal", "YUL", "YMQ", 45.5019, -73.5674),
    ("mexico city", "MEX", "MEX", 19.4326, -99.1332),
    ("sao paulo", "GRU", "SAO", -23.5505, -46.6333),
    ("buenos aires", "EZE", "BUE", -34.6037, -58.3816),
    ("rio de janeiro", "GIG", "RIO", -22.9068, -43.1729),
    ("chicago", "ORD", "CHI", 41.8781, -87.6298),
    ("san francisco", "SFO", "SFO", 37.7749, -122.4194),
    ("miami", "MIA", "MIA", 25.7617, -80.1918),
    ("boston", "BOS", "BOS", 42.3601, -71.0589),
    ("seattle", "SEA", "SEA", 47.6062, -122.3321),
    ("washington", "IAD", "WAS", 38.9072, -77.0369),
    ("denver", "DEN", "DEN", 39.7392, -104.9903),
    ("atlanta", "ATL", "ATL", 33.7490, -84.3880),
    ("las vegas", "LAS", "LAS", 36.1699, -115.1398),
    ("honolulu", "HNL", "HNL", 21.3099, -157.8581),
    ("cairo", "CAI", "CAI", 30.0444, 31.2357),
    ("cape town", "CPT", "CPT", -33.9249, 18.4241),
    ("mumbai", "BOM", "BOM", 19.0760, 72.8777),
    ("delhi", "DEL", "DEL", 28.7041, 77.1025),
    ("zurich", "ZRH", "ZRH", 47.3769, 8.5417),
    ("munich", "MUC", "MUC", 48.1351, 11.5820),
    ("copenhagen", "CPH", "CPH", 55.6761, 12.5683),
    ("stockholm", "ARN", "STO", 59.3293, 18.0686),
    ("reykjavik", "KEF", "REK", 64.1466, -21.9426),
];

/// Fixed default hub when a query defeats every resolution tier
const DEFAULT_HUB: (&str, &str, f64, f64) = ("JFK", "NYC", 40.6413, -73.7781);

/// Resolves free-text locations to IATA codes or coordinates, backed by
/// the persistent lookup caches.
pub struct LocationResolver {
    codes: LookupCache<String>,
    coords: LookupCache<Coordinates>,
    code_search: Arc<dyn CodeSearch>,
    geo_search: Arc<dyn GeoSearch>,
    code_pattern: Regex,
}

impl LocationResolver {
    pub fn new(
        store: &CacheStore,
        code_search: Arc<dyn CodeSearch>,
        geo_search: Arc<dyn GeoSearch>,
    ) -> Self {
        Self {
            codes: store.codes(),
            coords: store.coords(),
            code_search,
            geo_search,
            code_pattern: Regex::new(r"^[A-Za-z]{3}$").unwrap(),
        }
    }

    /// Resolve a location to an IATA code.
    pub async fn resolve_code(&self, query: &str, kind: LocationKind) -> String {
        let trimmed = query.trim();

        // A bare 3-letter token is already a code: no cache, no network.
        if self.code_pattern.is_match(trimmed) {
            return trimmed.to_uppercase();
        }

        // Trivially invalid input never triggers a network call.
        if trimmed.chars().count() < 2 {
            debug!(query = trimmed, "Query too short, using fallback");
            return fallback_code(trimmed, kind);
        }

        let cache_key = format!("{}:{}", kind.as_str(), normalize_key(trimmed));
        if let Some(code) = self.codes.get(&cache_key) {
            return code;
        }

        match self.code_search.search_locations(trimmed, kind).await {
            Ok(hits) if !hits.is_empty() => {
                // Prefer a true airport entry over the city aggregate when
                // resolving airports.
                let hit = match kind {
                    LocationKind::Airport => hits
                        .iter()
                        .find(|h| h.subtype == "AIRPORT")
                        .or_else(|| hits.first()),
                    LocationKind::City => hits.first(),
                };
                if let Some(code) = hit.and_then(|h| h.iata_code.clone()) {
                    info!(query = trimmed, code = %code, "Resolved location via vendor search");
                    self.codes.set(&cache_key, code.clone());
                    return code;
                }
                warn!(query = trimmed, "Vendor hits carry no IATA code, using fallback");
            }
            Ok(_) => {
                warn!(query = trimmed, "Vendor search returned no results, using fallback");
            }
            Err(e) => {
                warn!(query = trimmed, error = %e, "Vendor search failed, using fallback");
            }
        }

        let code = fallback_code(trimmed, kind);
        self.codes.set(&cache_key, code.clone());
        code
    }

    /// Resolve a location to geocoordinates.
    pub async fn resolve_coords(&self, query: &str) -> Coordinates {
        let trimmed = query.trim();

        if trimmed.chars().count() < 2 {
            debug!(query = trimmed, "Query too short, using fallback coordinates");
            return fallback_coords(trimmed);
        }

        if let Some(coords) = self.coords.get(trimmed) {
            return coords;
        }

        match self.geo_search.search_geo(trimmed).await {
            Ok(hits) if !hits.is_empty() => {
                let coords = hits[0].coords;
                info!(query = trimmed, lat = coords.lat, lon = coords.lon, "Geocoded via vendor search");
                self.coords.set(trimmed, coords);
                return coords;
            }
            Ok(_) => {
                warn!(query = trimmed, "Geocoding returned no results, using fallback");
            }
            Err(e) => {
                warn!(query = trimmed, error = %e, "Geocoding failed, using fallback");
            }
        }

        let coords = fallback_coords(trimmed);
        self.coords.set(trimmed, coords);
        coords
    }
}

fn fallback_entry(query: &str) -> Option<&'static (&'static str, &'static str, &'static str, f64, f64)> {
    let key = normalize_key(query);
    FALLBACK_CITIES.iter().find(|(name, ..)| *name == key)
}

fn fallback_code(query: &str, kind: LocationKind) -> String {
    match fallback_entry(query) {
        Some((_, airport, city, ..)) => match kind {
            LocationKind::Airport => (*airport).to_string(),
            LocationKind::City => (*city).to_string(),
        },
        None => match kind {
            LocationKind::Airport => DEFAULT_HUB.0.to_string(),
            LocationKind::City => DEFAULT_HUB.1.to_string(),
        },
    }
}

fn fallback_coords(query: &str) -> Coordinates {
    match fallback_entry(query) {
        Some(&(_, _, _, lat, lon)) => Coordinates { lat, lon },
        None => Coordinates {
            lat: DEFAULT_HUB.2,
            lon: DEFAULT_HUB.3,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::{GeoHit, LocationHit};
    use crate::TripError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Stub search that either fails or returns fixed hits, counting calls.
    struct StubSearch {
        hits: Vec<LocationHit>,
        geo_hits: Vec<GeoHit>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StubSearch {
        fn failing() -> Self {
            Self {
                hits: Vec::new(),
                geo_hits: Vec::new(),
                fail: true,
                calls: AtomicUsize::new(0),
            }
        }

        fn with_hits(hits: Vec<LocationHit>) -> Self {
            Self {
                hits,
                geo_hits: Vec::new(),
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CodeSearch for StubSearch {
        async fn search_locations(
            &self,
            _query: &str,
            _kind: LocationKind,
        ) -> Result<Vec<LocationHit>, TripError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TripError::GatewayError {
                    service: "stub",
                    status: 503,
                    detail: "down".to_string(),
                });
            }
            Ok(self.hits.clone())
        }
    }

    #[async_trait]
    impl GeoSearch for StubSearch {
        async fn search_geo(&self, _query: &str) -> Result<Vec<GeoHit>, TripError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TripError::GatewayError {
                    service: "stub",
                    status: 503,
                    detail: "down".to_string(),
                });
            }
            Ok(self.geo_hits.clone())
        }
    }

    fn resolver_with(search: Arc<StubSearch>) -> (TempDir, LocationResolver) {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().join("cache")).unwrap();
        let resolver = LocationResolver::new(&store, search.clone(), search);
        (dir, resolver)
    }

    #[tokio::test]
    async fn test_literal_code_bypasses_cache_and_network() {
        let search = Arc::new(StubSearch::failing());
        let (_dir, resolver) = resolver_with(search.clone());

        assert_eq!(resolver.resolve_code("LAX", LocationKind::Airport).await, "LAX");
        assert_eq!(resolver.resolve_code("lax", LocationKind::Airport).await, "LAX");
        assert_eq!(search.call_count(), 0);
    }

    #[tokio::test]
    async fn test_short_query_never_hits_network() {
        let search = Arc::new(StubSearch::failing());
        let (_dir, resolver) = resolver_with(search.clone());

        assert_eq!(resolver.resolve_code("a", LocationKind::Airport).await, "JFK");
        assert_eq!(resolver.resolve_code(" ", LocationKind::City).await, "NYC");
        assert_eq!(search.call_count(), 0);
    }

    #[tokio::test]
    async fn test_vendor_failure_falls_back_and_caches() {
        let search = Arc::new(StubSearch::failing());
        let (_dir, resolver) = resolver_with(search.clone());

        assert_eq!(resolver.resolve_code("Paris", LocationKind::Airport).await, "CDG");
        assert_eq!(search.call_count(), 1);

        // Second lookup is served from cache: no second vendor call.
        assert_eq!(resolver.resolve_code("paris", LocationKind::Airport).await, "CDG");
        assert_eq!(search.call_count(), 1);
    }

    #[tokio::test]
    async fn test_city_kind_uses_city_code() {
        let search = Arc::new(StubSearch::failing());
        let (_dir, resolver) = resolver_with(search);

        assert_eq!(resolver.resolve_code("Paris", LocationKind::City).await, "PAR");
    }

    #[tokio::test]
    async fn test_unknown_city_falls_back_to_default_hub() {
        let search = Arc::new(StubSearch::failing());
        let (_dir, resolver) = resolver_with(search);

        assert_eq!(
            resolver.resolve_code("Atlantis", LocationKind::Airport).await,
            "JFK"
        );
    }

    #[tokio::test]
    async fn test_airport_subtype_preferred() {
        let search = Arc::new(StubSearch::with_hits(vec![
            LocationHit {
                name: "Paris".to_string(),
                iata_code: Some("PAR".to_string()),
                subtype: "CITY".to_string(),
            },
            LocationHit {
                name: "Charles de Gaulle".to_string(),
                iata_code: Some("CDG".to_string()),
                subtype: "AIRPORT".to_string(),
            },
        ]));
        let (_dir, resolver) = resolver_with(search);

        assert_eq!(resolver.resolve_code("Paris", LocationKind::Airport).await, "CDG");
        assert_eq!(resolver.resolve_code("Paris", LocationKind::City).await, "PAR");
    }

    #[tokio::test]
    async fn test_successful_resolution_cached() {
        let search = Arc::new(StubSearch::with_hits(vec![LocationHit {
            name: "Narita".to_string(),
            iata_code: Some("NRT".to_string()),
            subtype: "AIRPORT".to_string(),
        }]));
        let (_dir, resolver) = resolver_with(search.clone());

        assert_eq!(resolver.resolve_code("Narita", LocationKind::Airport).await, "NRT");
        assert_eq!(resolver.resolve_code("NARITA ", LocationKind::Airport).await, "NRT");
        assert_eq!(search.call_count(), 1);
    }

    #[tokio::test]
    async fn test_hits_without_code_fall_back() {
        let search = Arc::new(StubSearch::with_hits(vec![LocationHit {
            name: "Paris".to_string(),
            iata_code: None,
            subtype: "CITY".to_string(),
        }]));
        let (_dir, resolver) = resolver_with(search);

        assert_eq!(resolver.resolve_code("Paris", LocationKind::Airport).await, "CDG");
    }

    #[tokio::test]
    async fn test_coords_fallback_for_known_city() {
        let search = Arc::new(StubSearch::failing());
        let (_dir, resolver) = resolver_with(search.clone());

        let coords = resolver.resolve_coords("Paris").await;
        assert!((coords.lat - 48.8566).abs() < 1e-9);
        assert_eq!(search.call_count(), 1);

        // The fallback was cached too.
        resolver.resolve_coords("paris").await;
        assert_eq!(search.call_count(), 1);
    }
}
