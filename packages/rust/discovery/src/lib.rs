//! Contact discovery capability.
//!
//! [`ContactSource`] is the seam the pipeline calls; [`PeopleSearchClient`] is
//! the HTTP implementation for a people-search API that takes job titles and
//! locations and returns contact records.

mod response;

use std::time::Duration;

use async_trait::async_trait;
use leadflow_shared::{LeadflowError, RawCandidate, Result, classify_status};
use reqwest::Client;
use tracing::{debug, info, instrument};

use response::SearchResponse;

/// User-Agent string for discovery requests.
const USER_AGENT: &str = concat!("leadflow/", env!("CARGO_PKG_VERSION"));

/// Capability name used in classified errors.
const CAPABILITY: &str = "discovery";

/// Largest page the search endpoint accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// Parameters for one search call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    pub role_titles: Vec<String>,
    pub locations: Vec<String>,
    pub page_size: u32,
    /// 1-based page number.
    pub page: u32,
}

/// A source of raw contact candidates.
#[async_trait]
pub trait ContactSource: Send + Sync {
    /// Run one search. Errors are already classified as transient,
    /// permanent or configuration failures.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<RawCandidate>>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// People-search HTTP client.
#[derive(Clone)]
pub struct PeopleSearchClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl PeopleSearchClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| LeadflowError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn query_pairs(query: &SearchQuery) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("page", query.page.max(1).to_string()),
            ("per_page", query.page_size.clamp(1, MAX_PAGE_SIZE).to_string()),
        ];
        pairs.extend(
            query
                .role_titles
                .iter()
                .map(|t| ("person_titles[]", t.clone())),
        );
        pairs.extend(
            query
                .locations
                .iter()
                .map(|l| ("person_locations[]", l.clone())),
        );
        pairs
    }
}

#[async_trait]
impl ContactSource for PeopleSearchClient {
    #[instrument(skip_all, fields(roles = query.role_titles.len(), page = query.page, page_size = query.page_size))]
    async fn search(&self, query: &SearchQuery) -> Result<Vec<RawCandidate>> {
        let url = format!("{}/mixed_people/search", self.base_url);

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("accept", "application/json")
            .header("cache-control", "no-cache")
            .query(&Self::query_pairs(query))
            .send()
            .await
            .map_err(|e| LeadflowError::transient(CAPABILITY, format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(CAPABILITY, status.as_u16(), body.trim()));
        }

        let body: SearchResponse = response.json().await.map_err(|e| {
            LeadflowError::permanent(CAPABILITY, format!("unexpected response body: {e}"))
        })?;

        let candidates: Vec<RawCandidate> = body
            .people
            .into_iter()
            .map(|p| p.into_candidate())
            .collect();

        if candidates.is_empty() {
            debug!("search returned no people");
        }
        info!(found = candidates.len(), "people search complete");
        Ok(candidates)
    }
}
