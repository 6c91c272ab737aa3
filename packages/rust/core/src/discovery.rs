//! Discovery orchestrator: turns the effective targeting into people-search
//! queries and collects raw candidates. Nothing is persisted here.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use leadflow_discovery::{ContactSource, MAX_PAGE_SIZE, SearchQuery};
use leadflow_shared::{LeadflowError, ProjectId, RawCandidate, Result};

use crate::resolver::EffectiveConfig;

/// Per-call replacements for the resolved targeting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOverrides {
    /// Replaces the resolved job-role list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_titles: Option<Vec<String>>,
    /// Replaces the project's location targeting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<String>>,
    /// First result page to request (1-based).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_page: Option<u32>,
}

/// Build the first query for a discovery run.
pub fn build_query(
    effective: &EffectiveConfig,
    count: u32,
    overrides: &SearchOverrides,
) -> Result<SearchQuery> {
    if count == 0 {
        return Err(LeadflowError::validation("discovery count must be >= 1"));
    }

    let role_titles = match &overrides.role_titles {
        Some(roles) => roles.clone(),
        None => effective.job_roles()?.all_roles(),
    };
    let role_titles: Vec<String> = role_titles
        .into_iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    if role_titles.is_empty() {
        return Err(LeadflowError::config(
            "no job roles to search for; configure [job_roles] or pass roles explicitly",
        ));
    }

    let locations = overrides
        .locations
        .clone()
        .unwrap_or_else(|| effective.location.clone());

    Ok(SearchQuery {
        role_titles,
        locations,
        page_size: count.min(MAX_PAGE_SIZE),
        page: overrides.start_page.unwrap_or(1).max(1),
    })
}

/// Fetch up to `count` raw candidates, paging through the source.
///
/// Capability errors propagate as-is; there is no retry at this level.
#[instrument(skip_all, fields(%project_id, count))]
pub async fn discover(
    source: &dyn ContactSource,
    effective: &EffectiveConfig,
    project_id: ProjectId,
    count: u32,
    overrides: &SearchOverrides,
) -> Result<Vec<RawCandidate>> {
    let mut query = build_query(effective, count, overrides)?;
    let wanted = count as usize;
    let mut candidates: Vec<RawCandidate> = Vec::with_capacity(wanted);

    loop {
        let page = source.search(&query).await?;
        let page_len = page.len();
        debug!(page = query.page, results = page_len, "search page");
        candidates.extend(page);

        if candidates.len() >= wanted || page_len < query.page_size as usize {
            break;
        }
        query.page += 1;
    }

    candidates.truncate(wanted);
    info!(found = candidates.len(), "discovery complete");
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeContactSource;
    use leadflow_shared::{GlobalConfig, JobRolesConfig};

    fn effective() -> EffectiveConfig {
        let global = GlobalConfig::with_defaults();
        EffectiveConfig {
            job_roles: global.job_roles.clone(),
            location: vec!["Austin, Texas".into()],
            ..Default::default()
        }
    }

    fn people(n: usize, offset: usize) -> Vec<RawCandidate> {
        (0..n)
            .map(|i| RawCandidate {
                name: format!("Person {}", i + offset),
                company: format!("Company {}", i + offset),
                email: Some(format!("p{}@example.org", i + offset)),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn query_uses_job_roles_and_location() {
        let query = build_query(&effective(), 25, &SearchOverrides::default()).unwrap();
        assert!(query.role_titles.contains(&"Office Manager".to_string()));
        assert_eq!(query.locations, vec!["Austin, Texas".to_string()]);
        assert_eq!(query.page_size, 25);
        assert_eq!(query.page, 1);
    }

    #[test]
    fn overrides_replace_targeting() {
        let overrides = SearchOverrides {
            role_titles: Some(vec!["CTO".into(), "  ".into()]),
            locations: Some(vec![]),
            start_page: Some(3),
        };
        let query = build_query(&effective(), 500, &overrides).unwrap();
        assert_eq!(query.role_titles, vec!["CTO".to_string()]);
        assert!(query.locations.is_empty());
        assert_eq!(query.page_size, MAX_PAGE_SIZE);
        assert_eq!(query.page, 3);
    }

    #[test]
    fn missing_job_roles_is_config_error() {
        let err = build_query(&EffectiveConfig::default(), 10, &SearchOverrides::default())
            .unwrap_err();
        assert!(err.is_config());

        let empty = EffectiveConfig {
            job_roles: Some(JobRolesConfig {
                target_roles: vec![],
                custom_roles: vec![],
            }),
            ..Default::default()
        };
        assert!(build_query(&empty, 10, &SearchOverrides::default())
            .unwrap_err()
            .is_config());
    }

    #[test]
    fn zero_count_is_rejected() {
        assert!(build_query(&effective(), 0, &SearchOverrides::default()).is_err());
    }

    #[tokio::test]
    async fn pages_until_count_reached() {
        let source = FakeContactSource::new(vec![Ok(people(100, 0)), Ok(people(100, 100))]);
        let found = discover(
            &source,
            &effective(),
            ProjectId::new(),
            150,
            &SearchOverrides::default(),
        )
        .await
        .unwrap();

        assert_eq!(found.len(), 150);
        let queries = source.queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].page, 2);
    }

    #[tokio::test]
    async fn short_page_ends_search() {
        let source = FakeContactSource::new(vec![Ok(people(3, 0))]);
        let found = discover(
            &source,
            &effective(),
            ProjectId::new(),
            10,
            &SearchOverrides::default(),
        )
        .await
        .unwrap();
        assert_eq!(found.len(), 3);
        assert_eq!(source.queries().len(), 1);
    }

    #[tokio::test]
    async fn capability_error_propagates_without_retry() {
        let source = FakeContactSource::new(vec![Err(LeadflowError::transient(
            "discovery",
            "HTTP 429",
        ))]);
        let err = discover(
            &source,
            &effective(),
            ProjectId::new(),
            10,
            &SearchOverrides::default(),
        )
        .await
        .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(source.queries().len(), 1);
    }
}
