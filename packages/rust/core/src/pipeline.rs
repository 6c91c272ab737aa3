//! The [`Pipeline`] facade: storage, capabilities and clock bundled for the
//! administrative triggers.
//!
//! Stage entry points live next to their logic (`enrichment`, `generation`,
//! `scheduler`); this module holds discovery-and-store, manual lead add,
//! blacklist management and inbound events.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use leadflow_delivery::{MailTransport, SmtpMailer};
use leadflow_discovery::{ContactSource, PeopleSearchClient};
use leadflow_llm::{ChatClient, CompletionProvider, ResearchProvider};
use leadflow_shared::{
    BlacklistScope, InboundEventKind, Lead, LeadId, LeadflowError, Project, ProjectId,
    RawCandidate, Result, RuntimeSettings, read_secret,
};
use leadflow_storage::{BlacklistEntry, Storage};

use crate::clock::{Clock, SystemClock};
use crate::discovery::{self, SearchOverrides};
use crate::filter::{self, ExistingSnapshot, FilterOutcome, RejectReason};
use crate::lifecycle::{self, LeadEvent};
use crate::resolver::{ConfigResolver, EffectiveConfig};

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Builds capability clients from the effective configuration.
///
/// Missing credentials surface here as configuration errors, before any
/// external call is made.
pub trait Capabilities: Send + Sync {
    fn contact_source(&self, config: &EffectiveConfig) -> Result<Arc<dyn ContactSource>>;
    fn research(&self, config: &EffectiveConfig) -> Result<Arc<dyn ResearchProvider>>;
    fn completion(&self, config: &EffectiveConfig) -> Result<Arc<dyn CompletionProvider>>;
    fn mail(&self, config: &EffectiveConfig) -> Result<Arc<dyn MailTransport>>;
}

/// HTTP and SMTP clients with secrets read from the environment.
#[derive(Debug, Clone)]
pub struct LiveCapabilities {
    request_timeout: Duration,
}

impl LiveCapabilities {
    pub fn new(runtime: &RuntimeSettings) -> Self {
        Self {
            request_timeout: Duration::from_secs(runtime.request_timeout_secs.max(1)),
        }
    }
}

impl Capabilities for LiveCapabilities {
    fn contact_source(&self, config: &EffectiveConfig) -> Result<Arc<dyn ContactSource>> {
        let creds = config.credentials()?;
        let key = read_secret(&creds.discovery_api_key_env, "discovery API key")?;
        Ok(Arc::new(PeopleSearchClient::new(
            &creds.discovery_base_url,
            key,
            self.request_timeout,
        )?))
    }

    fn research(&self, config: &EffectiveConfig) -> Result<Arc<dyn ResearchProvider>> {
        let creds = config.credentials()?;
        let key = read_secret(&creds.research_api_key_env, "research API key")?;
        Ok(Arc::new(ChatClient::research(
            &creds.research_base_url,
            key,
            &creds.research_model,
            self.request_timeout,
        )?))
    }

    fn completion(&self, config: &EffectiveConfig) -> Result<Arc<dyn CompletionProvider>> {
        let creds = config.credentials()?;
        let key = read_secret(&creds.generation_api_key_env, "generation API key")?;
        Ok(Arc::new(ChatClient::generation(
            &creds.generation_base_url,
            key,
            self.request_timeout,
        )?))
    }

    fn mail(&self, config: &EffectiveConfig) -> Result<Arc<dyn MailTransport>> {
        let smtp = config.smtp()?;
        let password = read_secret(&smtp.password_env, "SMTP password")?;
        Ok(Arc::new(SmtpMailer::new(smtp, password, self.request_timeout)?))
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for batch operations.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each item of a batch.
    fn item_done(&self, current: usize, total: usize, detail: &str);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item_done(&self, _current: usize, _total: usize, _detail: &str) {}
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Summary of one discover-filter-store run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryReport {
    pub project_id: Option<ProjectId>,
    /// Raw candidates returned by the source.
    pub found: usize,
    pub created: usize,
    pub created_ids: Vec<LeadId>,
    /// Rejections keyed by reason.
    pub rejected: BTreeMap<String, usize>,
    pub elapsed_ms: u64,
}

impl DiscoveryReport {
    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }

    fn reject(&mut self, reason: &str) {
        *self.rejected.entry(reason.to_string()).or_default() += 1;
    }
}

/// Result of adding one lead by hand.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AddLeadOutcome {
    Created { lead: Box<Lead> },
    Rejected { reason: String },
}

/// Reason recorded for accepted candidates that cannot be stored without an address.
const NO_EMAIL: &str = "no_email";

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Entry point for every pipeline operation.
///
/// Effective configuration is resolved from storage at the start of each
/// operation and dropped at its end.
pub struct Pipeline {
    pub(crate) storage: Storage,
    pub(crate) capabilities: Arc<dyn Capabilities>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) runtime: RuntimeSettings,
}

impl Pipeline {
    pub fn new(storage: Storage, capabilities: Arc<dyn Capabilities>, runtime: RuntimeSettings) -> Self {
        Self {
            storage,
            capabilities,
            clock: Arc::new(SystemClock),
            runtime,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Fresh lock owner for one operation, so concurrent triggers never share a lock.
    pub(crate) fn lock_owner(&self, operation: &str) -> String {
        format!("{operation}:{}", Uuid::now_v7())
    }

    pub(crate) fn lock_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.runtime.lock_ttl_secs.max(1) as i64)
    }

    pub(crate) fn worker_concurrency(&self) -> usize {
        self.runtime.worker_concurrency.max(1)
    }

    pub(crate) async fn project(&self, project_id: ProjectId) -> Result<Project> {
        self.storage
            .get_project(project_id)
            .await?
            .ok_or_else(|| LeadflowError::not_found(format!("project {project_id}")))
    }

    /// Per-request effective configuration.
    pub async fn effective_config(&self, project_id: ProjectId) -> Result<EffectiveConfig> {
        ConfigResolver::load(&self.storage, project_id)
            .await?
            .effective()
    }

    // -----------------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------------

    pub async fn create_project(&self, project: Project) -> Result<Project> {
        project.validate()?;
        self.storage.insert_project(&project).await?;
        info!(project_id = %project.id, name = %project.name, "project created");
        Ok(project)
    }

    /// Look a project up by id or by name.
    pub async fn find_project(&self, id_or_name: &str) -> Result<Project> {
        if let Ok(id) = id_or_name.parse::<ProjectId>() {
            if let Some(project) = self.storage.get_project(id).await? {
                return Ok(project);
            }
        }
        self.storage
            .find_project_by_name(id_or_name)
            .await?
            .ok_or_else(|| LeadflowError::not_found(format!("project '{id_or_name}'")))
    }

    // -----------------------------------------------------------------------
    // Discovery & filtering
    // -----------------------------------------------------------------------

    /// Filter candidates against the project's current leads and blacklists.
    #[instrument(skip_all, fields(%project_id, candidates = candidates.len()))]
    pub async fn filter_candidates(
        &self,
        project_id: ProjectId,
        candidates: &[RawCandidate],
    ) -> Result<FilterOutcome> {
        let effective = self.effective_config(project_id).await?;
        let config = effective.filter()?;
        let snapshot = self.snapshot(project_id).await?;
        let outcome = filter::filter(candidates, &snapshot, config);
        info!(
            accepted = outcome.accepted.len(),
            rejected = outcome.rejected.len(),
            "filter complete"
        );
        Ok(outcome)
    }

    async fn snapshot(&self, project_id: ProjectId) -> Result<ExistingSnapshot> {
        let leads = self.storage.list_leads(project_id, None).await?;
        let blacklist = self.storage.blacklisted_emails(project_id).await?;
        Ok(ExistingSnapshot::new(&leads, blacklist))
    }

    /// Discover, filter and persist new leads with status `new`.
    #[instrument(skip_all, fields(%project_id, count))]
    pub async fn discover_and_store(
        &self,
        project_id: ProjectId,
        count: u32,
        overrides: &SearchOverrides,
        progress: &dyn ProgressReporter,
    ) -> Result<DiscoveryReport> {
        let start = Instant::now();
        self.project(project_id).await?;
        let effective = self.effective_config(project_id).await?;
        let filter_config = effective.filter()?.clone();
        discovery::build_query(&effective, count, overrides)?;
        let source = self.capabilities.contact_source(&effective)?;

        progress.phase("Searching for contacts");
        let candidates =
            discovery::discover(source.as_ref(), &effective, project_id, count, overrides).await?;

        progress.phase("Filtering candidates");
        let snapshot = self.snapshot(project_id).await?;
        let outcome = filter::filter(&candidates, &snapshot, &filter_config);

        progress.phase("Storing leads");
        let mut report = DiscoveryReport {
            project_id: Some(project_id),
            found: candidates.len(),
            ..Default::default()
        };
        for rejected in &outcome.rejected {
            report.reject(rejected.reason.as_str());
        }
        let total = outcome.accepted.len();
        for (i, accepted) in outcome.accepted.iter().enumerate() {
            let Some(email) = &accepted.email else {
                report.reject(NO_EMAIL);
                continue;
            };
            let lead = Lead::from_candidate(project_id, &accepted.candidate, email.clone());
            if self.storage.insert_lead(&lead).await? {
                report.created += 1;
                report.created_ids.push(lead.id);
            } else {
                // inserted concurrently by another run
                report.reject(RejectReason::DuplicateLead.as_str());
            }
            progress.item_done(i + 1, total, email);
        }

        self.storage.refresh_lead_count(project_id).await?;
        report.elapsed_ms = start.elapsed().as_millis() as u64;

        info!(
            found = report.found,
            created = report.created,
            rejected = report.rejected_total(),
            elapsed_ms = report.elapsed_ms,
            "discovery stored"
        );
        Ok(report)
    }

    /// Add one lead by hand. It goes through the same filter as discovered candidates.
    #[instrument(skip_all, fields(%project_id))]
    pub async fn add_lead(
        &self,
        project_id: ProjectId,
        candidate: RawCandidate,
        notes: Option<String>,
    ) -> Result<AddLeadOutcome> {
        self.project(project_id).await?;
        let outcome = self
            .filter_candidates(project_id, std::slice::from_ref(&candidate))
            .await?;

        if let Some(rejected) = outcome.rejected.first() {
            return Ok(AddLeadOutcome::Rejected {
                reason: rejected.reason.to_string(),
            });
        }
        let Some(accepted) = outcome.accepted.into_iter().next() else {
            return Err(LeadflowError::validation("candidate produced no filter outcome"));
        };
        let Some(email) = accepted.email else {
            return Ok(AddLeadOutcome::Rejected {
                reason: NO_EMAIL.to_string(),
            });
        };

        let mut lead = Lead::from_candidate(project_id, &accepted.candidate, email);
        if lead.source.is_empty() {
            lead.source = "manual".into();
        }
        lead.notes = notes.unwrap_or_default();

        if !self.storage.insert_lead(&lead).await? {
            return Ok(AddLeadOutcome::Rejected {
                reason: RejectReason::DuplicateLead.to_string(),
            });
        }
        self.storage.refresh_lead_count(project_id).await?;
        info!(lead_id = %lead.id, "lead added");
        Ok(AddLeadOutcome::Created {
            lead: Box::new(lead),
        })
    }

    // -----------------------------------------------------------------------
    // Blacklist
    // -----------------------------------------------------------------------

    /// Block an address. Matching non-terminal leads move to `blacklisted`.
    #[instrument(skip_all, fields(scope = %scope.storage_key()))]
    pub async fn blacklist_add(
        &self,
        scope: BlacklistScope,
        email: &str,
        reason: Option<&str>,
    ) -> Result<u64> {
        if !leadflow_shared::is_valid_email(&leadflow_shared::normalize_email(email)) {
            return Err(LeadflowError::validation(format!(
                "'{email}' is not a valid email address"
            )));
        }
        if let BlacklistScope::Project(id) = scope {
            self.project(id).await?;
        }
        let moved = self.storage.add_to_blacklist(scope, email, reason).await?;
        info!(leads_blacklisted = moved, "blacklist entry added");
        Ok(moved)
    }

    pub async fn blacklist_remove(&self, scope: BlacklistScope, email: &str) -> Result<bool> {
        let removed = self.storage.remove_from_blacklist(scope, email).await?;
        info!(scope = %scope.storage_key(), removed, "blacklist entry removed");
        Ok(removed)
    }

    pub async fn blacklist_list(&self, scope: BlacklistScope) -> Result<Vec<BlacklistEntry>> {
        self.storage.list_blacklist(scope).await
    }

    // -----------------------------------------------------------------------
    // Inbound events
    // -----------------------------------------------------------------------

    /// Apply an external signal (reply, bounce, unsubscribe) to a lead.
    ///
    /// Fails with `Conflict` while a send or enrichment holds the lead.
    #[instrument(skip_all, fields(%lead_id, ?kind))]
    pub async fn report_inbound_event(&self, lead_id: LeadId, kind: InboundEventKind) -> Result<Lead> {
        let lead = self
            .storage
            .get_lead(lead_id)
            .await?
            .ok_or_else(|| LeadflowError::not_found(format!("lead {lead_id}")))?;
        // reject illegal moves before touching anything
        lifecycle::transition(lead.status, LeadEvent::from(kind))?;

        let owner = self.lock_owner("event");
        if !self
            .storage
            .try_lock_lead(lead_id, &owner, self.clock.now(), self.lock_ttl())
            .await?
        {
            warn!("lead is in flight; event not applied");
            return Err(LeadflowError::Conflict(format!(
                "lead {lead_id} is being processed; report the event again shortly"
            )));
        }

        // re-read under the lock
        let mut lead = match self.storage.get_lead(lead_id).await? {
            Some(lead) => lead,
            None => return Err(LeadflowError::not_found(format!("lead {lead_id}"))),
        };
        lead.status = match lifecycle::transition(lead.status, LeadEvent::from(kind)) {
            Ok(status) => status,
            Err(e) => {
                self.storage.unlock_lead(lead_id, &owner).await?;
                return Err(e);
            }
        };

        if kind == InboundEventKind::Unsubscribed {
            let blacklisted = self
                .storage
                .add_to_blacklist(
                    BlacklistScope::Project(lead.project_id),
                    &lead.email,
                    Some("unsubscribed"),
                )
                .await;
            self.storage.unlock_lead(lead_id, &owner).await?;
            blacklisted?;
            info!(email = %lead.email, "unsubscribed lead blacklisted");
            return self
                .storage
                .get_lead(lead_id)
                .await?
                .ok_or_else(|| LeadflowError::not_found(format!("lead {lead_id}")));
        }

        self.storage.commit_lead(&lead, &owner).await?;
        info!(status = %lead.status, "inbound event applied");
        Ok(lead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, candidate};
    use leadflow_shared::{GlobalConfig, LeadStatus};

    #[tokio::test]
    async fn discovery_twice_creates_nothing_new() {
        let h = Harness::new(GlobalConfig::with_defaults()).await;
        let batch = vec![
            candidate("Ada Lovelace", Some("ada@engines.io"), "Engines"),
            candidate("Charles Babbage", Some("charles@engines.io"), "Engines"),
            candidate("Grace Hopper", Some("grace@navy.mil"), "Navy"),
        ];
        h.fakes.contacts.push(Ok(batch.clone()));
        h.fakes.contacts.push(Ok(batch));

        let first = h
            .pipeline
            .discover_and_store(h.project.id, 10, &SearchOverrides::default(), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(first.found, 3);
        assert_eq!(first.created, 2);
        assert_eq!(first.rejected.get("duplicate_company"), Some(&1));

        let second = h
            .pipeline
            .discover_and_store(h.project.id, 10, &SearchOverrides::default(), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.rejected_total(), 3);
        assert_eq!(h.pipeline.storage().count_leads(h.project.id).await.unwrap(), 2);

        let project = h.pipeline.storage().get_project(h.project.id).await.unwrap().unwrap();
        assert_eq!(project.lead_count, 2);
    }

    #[tokio::test]
    async fn missing_credentials_abort_before_search() {
        let pipeline = Pipeline::new(
            crate::testing::temp_storage().await,
            Arc::new(LiveCapabilities::new(&RuntimeSettings::default())),
            RuntimeSettings::default(),
        );
        let project = pipeline.create_project(Project::new("Acme")).await.unwrap();
        pipeline
            .storage()
            .put_global_config(&GlobalConfig {
                credentials: None,
                ..GlobalConfig::with_defaults()
            })
            .await
            .unwrap();

        let err = pipeline
            .discover_and_store(project.id, 5, &SearchOverrides::default(), &SilentProgress)
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("credentials"));
    }

    #[tokio::test]
    async fn missing_filter_section_is_fatal() {
        let global = GlobalConfig {
            filter: None,
            ..GlobalConfig::with_defaults()
        };
        let h = Harness::new(global).await;
        h.fakes
            .contacts
            .push(Ok(vec![candidate("Ada Lovelace", Some("ada@engines.io"), "Engines")]));
        let err = h
            .pipeline
            .discover_and_store(h.project.id, 5, &SearchOverrides::default(), &SilentProgress)
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert!(h.fakes.contacts.queries().is_empty());
    }

    #[tokio::test]
    async fn add_lead_uses_filter() {
        let h = Harness::new(GlobalConfig::with_defaults()).await;
        let created = h
            .pipeline
            .add_lead(
                h.project.id,
                candidate("Ada Lovelace", Some("Ada@Engines.io"), "Engines"),
                Some("met at conference".into()),
            )
            .await
            .unwrap();
        let AddLeadOutcome::Created { lead } = created else {
            panic!("expected lead to be created");
        };
        assert_eq!(lead.email, "ada@engines.io");
        assert_eq!(lead.source, "manual");
        assert_eq!(lead.notes, "met at conference");

        let again = h
            .pipeline
            .add_lead(
                h.project.id,
                candidate("Ada L", Some("ada@engines.io"), "Other"),
                None,
            )
            .await
            .unwrap();
        assert!(matches!(again, AddLeadOutcome::Rejected { ref reason } if reason == "duplicate_lead"));
    }

    #[tokio::test]
    async fn blacklisting_moves_lead_and_blocks_rediscovery() {
        let h = Harness::new(GlobalConfig::with_defaults()).await;
        let lead = h.lead("ada@engines.io", "Engines").await;

        let moved = h
            .pipeline
            .blacklist_add(BlacklistScope::Global, "ADA@engines.io", Some("asked"))
            .await
            .unwrap();
        assert_eq!(moved, 1);
        let stored = h.pipeline.storage().get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LeadStatus::Blacklisted);

        let other = h
            .pipeline
            .create_project(Project::new("Second"))
            .await
            .unwrap();
        let outcome = h
            .pipeline
            .add_lead(other.id, candidate("Ada Lovelace", Some("ada@engines.io"), "Engines"), None)
            .await
            .unwrap();
        assert!(matches!(outcome, AddLeadOutcome::Rejected { ref reason } if reason == "blacklisted"));

        assert!(h
            .pipeline
            .blacklist_add(BlacklistScope::Global, "not-an-email", None)
            .await
            .is_err());
        assert_eq!(
            h.pipeline.blacklist_list(BlacklistScope::Global).await.unwrap().len(),
            1
        );
        assert!(h
            .pipeline
            .blacklist_remove(BlacklistScope::Global, "ada@engines.io")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn inbound_events_drive_terminal_states() {
        let h = Harness::new(GlobalConfig::with_defaults()).await;

        let mut lead = h.lead("ada@engines.io", "Engines").await;
        lead.status = LeadStatus::Emailed;
        h.pipeline.storage().update_lead(&lead).await.unwrap();
        let replied = h
            .pipeline
            .report_inbound_event(lead.id, InboundEventKind::Replied)
            .await
            .unwrap();
        assert_eq!(replied.status, LeadStatus::Responded);

        let err = h
            .pipeline
            .report_inbound_event(lead.id, InboundEventKind::Bounced)
            .await
            .unwrap_err();
        assert!(matches!(err, LeadflowError::Validation { .. }));

        let other = h.lead("grace@navy.mil", "Navy").await;
        let unsubscribed = h
            .pipeline
            .report_inbound_event(other.id, InboundEventKind::Unsubscribed)
            .await
            .unwrap();
        assert_eq!(unsubscribed.status, LeadStatus::Blacklisted);
        assert!(h
            .pipeline
            .storage()
            .is_blacklisted(h.project.id, "grace@navy.mil")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn event_on_locked_lead_is_conflict() {
        let h = Harness::new(GlobalConfig::with_defaults()).await;
        let lead = h.lead("ada@engines.io", "Engines").await;
        assert!(h
            .pipeline
            .storage()
            .try_lock_lead(lead.id, "dispatch:other", h.clock.now(), chrono::Duration::minutes(5))
            .await
            .unwrap());

        let err = h
            .pipeline
            .report_inbound_event(lead.id, InboundEventKind::Replied)
            .await
            .unwrap_err();
        assert!(matches!(err, LeadflowError::Conflict(_)));
    }

    #[tokio::test]
    async fn unsubscribe_waits_for_in_flight_work() {
        let h = Harness::new(GlobalConfig::with_defaults()).await;
        let lead = h.lead("ada@engines.io", "Engines").await;
        let storage = h.pipeline.storage();
        assert!(storage
            .try_lock_lead(lead.id, "enrich:w1", h.clock.now(), chrono::Duration::minutes(5))
            .await
            .unwrap());

        let err = h
            .pipeline
            .report_inbound_event(lead.id, InboundEventKind::Unsubscribed)
            .await
            .unwrap_err();
        assert!(matches!(err, LeadflowError::Conflict(_)));
        assert_eq!(h.reload(&lead).await.status, LeadStatus::New);
        assert!(!storage.is_blacklisted(h.project.id, "ada@engines.io").await.unwrap());

        // the worker finishes; its write lands and the retry then blacklists
        let mut enriched = lead.clone();
        enriched.status = LeadStatus::Enriched;
        assert!(storage.commit_lead(&enriched, "enrich:w1").await.unwrap());
        let unsubscribed = h
            .pipeline
            .report_inbound_event(lead.id, InboundEventKind::Unsubscribed)
            .await
            .unwrap();
        assert_eq!(unsubscribed.status, LeadStatus::Blacklisted);
    }

    #[tokio::test]
    async fn admin_blacklist_is_not_undone_by_in_flight_commit() {
        let h = Harness::new(GlobalConfig::with_defaults()).await;
        let lead = h.lead("ada@engines.io", "Engines").await;
        let storage = h.pipeline.storage();
        assert!(storage
            .try_lock_lead(lead.id, "enrich:w1", h.clock.now(), chrono::Duration::minutes(5))
            .await
            .unwrap());

        h.pipeline
            .blacklist_add(BlacklistScope::Global, "ada@engines.io", None)
            .await
            .unwrap();
        let mut enriched = lead.clone();
        enriched.status = LeadStatus::Enriched;
        assert!(!storage.commit_lead(&enriched, "enrich:w1").await.unwrap());
        assert_eq!(h.reload(&lead).await.status, LeadStatus::Blacklisted);
    }
}
