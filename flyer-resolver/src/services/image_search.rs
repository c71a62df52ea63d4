//! Candidate image search
//!
//! [`ImageSearch`] is the seam the orchestrator calls; [`GoogleImageSearchClient`]
//! backs it with the Google Custom Search JSON API in image mode.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

const GOOGLE_SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";
const USER_AGENT: &str = concat!("flyer-resolver/", env!("CARGO_PKG_VERSION"));
/// Custom Search refuses `num` above 10
const MAX_RESULTS_PER_REQUEST: usize = 10;
const REQUESTS_PER_SECOND: u32 = 5;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Search API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Search credentials not configured")]
    MissingCredentials,
}

/// One candidate image as returned by search, in ranking order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageCandidate {
    pub link: String,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub context_link: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ImageCandidate {
    pub fn from_link(link: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            title: None,
            thumbnail: None,
            context_link: None,
            width: None,
            height: None,
        }
    }
}

#[async_trait]
pub trait ImageSearch: Send + Sync {
    fn name(&self) -> &'static str;

    /// Up to `limit` candidates for `query`, best first. An empty list is not an error.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ImageCandidate>, SearchError>;
}

#[derive(Debug, Deserialize)]
struct CustomSearchResponse {
    #[serde(default)]
    items: Vec<CustomSearchItem>,
}

#[derive(Debug, Deserialize)]
struct CustomSearchItem {
    link: String,
    title: Option<String>,
    image: Option<CustomSearchImage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomSearchImage {
    thumbnail_link: Option<String>,
    context_link: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

impl From<CustomSearchItem> for ImageCandidate {
    fn from(item: CustomSearchItem) -> Self {
        let image = item.image;
        Self {
            link: item.link,
            title: item.title,
            thumbnail: image.as_ref().and_then(|i| i.thumbnail_link.clone()),
            context_link: image.as_ref().and_then(|i| i.context_link.clone()),
            width: image.as_ref().and_then(|i| i.width),
            height: image.as_ref().and_then(|i| i.height),
        }
    }
}

fn parse_search_response(body: &str) -> Result<Vec<ImageCandidate>, SearchError> {
    let response: CustomSearchResponse =
        serde_json::from_str(body).map_err(|e| SearchError::ParseError(e.to_string()))?;
    Ok(response.items.into_iter().map(ImageCandidate::from).collect())
}

pub struct GoogleImageSearchClient {
    http_client: reqwest::Client,
    rate_limiter: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
    api_key: String,
    search_engine_id: String,
}

impl GoogleImageSearchClient {
    pub fn new(api_key: String, search_engine_id: String) -> Result<Self, SearchError> {
        if api_key.trim().is_empty() || search_engine_id.trim().is_empty() {
            return Err(SearchError::MissingCredentials);
        }

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SearchError::NetworkError(e.to_string()))?;

        let quota = governor::Quota::per_second(
            NonZeroU32::new(REQUESTS_PER_SECOND).unwrap_or(NonZeroU32::MIN),
        );

        Ok(Self {
            http_client,
            rate_limiter: governor::RateLimiter::direct(quota),
            api_key,
            search_engine_id,
        })
    }
}

#[async_trait]
impl ImageSearch for GoogleImageSearchClient {
    fn name(&self) -> &'static str {
        "google_custom_search"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ImageCandidate>, SearchError> {
        let num = limit.clamp(1, MAX_RESULTS_PER_REQUEST).to_string();

        self.rate_limiter.until_ready().await;

        tracing::debug!(query = %query, num = %num, "Querying image search");

        let response = self
            .http_client
            .get(GOOGLE_SEARCH_URL)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.search_engine_id.as_str()),
                ("q", query),
                ("searchType", "image"),
                ("num", num.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SearchError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SearchError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            return Err(SearchError::ApiError(status.as_u16(), body));
        }

        let mut candidates = parse_search_response(&body)?;
        candidates.truncate(limit);

        tracing::info!(query = %query, candidates = candidates.len(), "Image search returned");

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_maps_image_fields() {
        let body = r#"{
            "kind": "customsearch#search",
            "items": [
                {
                    "title": "Leite Integral 1L",
                    "link": "https://cdn.example.com/leite.jpg",
                    "image": {
                        "contextLink": "https://shop.example.com/leite",
                        "height": 800,
                        "width": 600,
                        "thumbnailLink": "https://thumbs.example.com/leite.jpg"
                    }
                },
                { "link": "https://cdn.example.com/bare.png" }
            ]
        }"#;

        let candidates = parse_search_response(body).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].title.as_deref(), Some("Leite Integral 1L"));
        assert_eq!(candidates[0].thumbnail.as_deref(), Some("https://thumbs.example.com/leite.jpg"));
        assert_eq!(candidates[0].context_link.as_deref(), Some("https://shop.example.com/leite"));
        assert_eq!(candidates[0].width, Some(600));
        assert_eq!(candidates[1], ImageCandidate::from_link("https://cdn.example.com/bare.png"));
    }

    #[test]
    fn test_response_without_items_is_empty() {
        let candidates = parse_search_response(r#"{"kind": "customsearch#search"}"#).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_malformed_response_is_parse_error() {
        assert!(matches!(parse_search_response("<html>"), Err(SearchError::ParseError(_))));
    }

    #[test]
    fn test_missing_credentials_rejected() {
        assert!(matches!(
            GoogleImageSearchClient::new(String::new(), "cx".to_string()),
            Err(SearchError::MissingCredentials)
        ));
    }
}
