//! Unsplash client for destination photos
//!
//! Strictly best-effort: photos decorate the results page, so any failure
//! here degrades to an empty list rather than touching pipeline state.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::gateways::{check_status, Photo, PhotoProvider};
use crate::TripError;

const UNSPLASH_API_BASE: &str = "https://api.unsplash.com";
const REQUEST_TIMEOUT_SECS: u64 = 20;

pub struct UnsplashClient {
    http_client: Client,
    base_url: String,
    access_key: String,
}

impl UnsplashClient {
    pub fn new(access_key: impl Into<String>) -> Result<Self, TripError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_base_url(http_client, UNSPLASH_API_BASE, access_key))
    }

    pub fn with_base_url(
        http_client: Client,
        base_url: impl Into<String>,
        access_key: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
            access_key: access_key.into(),
        }
    }

    async fn fetch(&self, query: &str, count: usize) -> Result<Vec<Photo>, TripError> {
        let response = self
            .http_client
            .get(format!("{}/search/photos", self.base_url))
            .query(&[
                ("query", query.to_string()),
                ("per_page", count.to_string()),
                ("client_id", self.access_key.clone()),
            ])
            .send()
            .await?;
        let response = check_status("unsplash", response).await?;
        let payload: SearchPayload = response.json().await?;
        Ok(map_photos(payload))
    }
}

#[async_trait]
impl PhotoProvider for UnsplashClient {
    #[instrument(level = "debug", skip(self))]
    async fn search_photos(&self, query: &str, count: usize) -> Vec<Photo> {
        match self.fetch(query, count).await {
            Ok(photos) => {
                debug!(photos = photos.len(), "Photo search completed");
                photos
            }
            Err(e) => {
                warn!(query, error = %e, "Photo search failed, continuing without photos");
                Vec::new()
            }
        }
    }
}

fn map_photos(payload: SearchPayload) -> Vec<Photo> {
    payload
        .results
        .into_iter()
        .map(|record| Photo {
            url: record.urls.regular,
            alt: record.alt_description.unwrap_or_default(),
            photographer: record.user.name,
            photographer_url: record.user.links.html,
            download_url: record.links.download,
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct SearchPayload {
    #[serde(default)]
    results: Vec<PhotoRecord>,
}

#[derive(Debug, Deserialize)]
struct PhotoRecord {
    urls: PhotoUrls,
    alt_description: Option<String>,
    user: PhotoUser,
    links: PhotoLinks,
}

#[derive(Debug, Deserialize)]
struct PhotoUrls {
    #[serde(default)]
    regular: String,
}

#[derive(Debug, Deserialize)]
struct PhotoUser {
    #[serde(default)]
    name: String,
    links: UserLinks,
}

#[derive(Debug, Deserialize)]
struct UserLinks {
    #[serde(default)]
    html: String,
}

#[derive(Debug, Deserialize)]
struct PhotoLinks {
    #[serde(default)]
    download: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_photos_mapped_with_attribution() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/photos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{
                    "urls": {"regular": "https://img.example/1.jpg"},
                    "alt_description": "Eiffel tower at dusk",
                    "user": {"name": "Ada", "links": {"html": "https://unsplash.com/@ada"}},
                    "links": {"download": "https://img.example/1/download"}
                }]
            })))
            .mount(&server)
            .await;

        let client = UnsplashClient::with_base_url(Client::new(), server.uri(), "key");
        let photos = client.search_photos("Paris", 3).await;
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].alt, "Eiffel tower at dusk");
        assert_eq!(photos[0].photographer, "Ada");
    }

    #[tokio::test]
    async fn test_failure_degrades_to_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let client = UnsplashClient::with_base_url(Client::new(), server.uri(), "key");
        assert!(client.search_photos("Paris", 3).await.is_empty());
    }
}
