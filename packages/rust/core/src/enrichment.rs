//! Enrichment orchestrator.
//!
//! Calls the research capability for each targeted lead, up to
//! `enrichment.concurrency` leads at a time. Each lead is locked, researched
//! with retry, and written back in a single update. A failure on one lead
//! never stops the batch, but a configuration error ends it. Cancellation is
//! checked between leads.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use leadflow_llm::ResearchProvider;
use leadflow_shared::{
    Enrichment, EnrichmentConfig, EnrichmentMode, EnrichmentState, Lead, LeadId, LeadflowError,
    ProjectId, Result,
};

use crate::generation::render_template;
use crate::lifecycle::{self, LeadEvent};
use crate::pipeline::{Pipeline, ProgressReporter};
use crate::retry::{self, RetryPolicy};

const CAPABILITY: &str = "research";

/// Research shorter than this is treated as no result.
const MIN_RESEARCH_CHARS: usize = 100;

/// Phrases that mark a research answer as empty.
const NO_INFO_PHRASES: &[&str] = &[
    "i don't have information",
    "i cannot find",
    "no information available",
    "unable to provide",
    "insufficient data",
];

// ---------------------------------------------------------------------------
// Requests and reports
// ---------------------------------------------------------------------------

/// Which leads an enrichment run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichTarget {
    /// Every non-terminal lead without a successful enrichment
    /// (every non-terminal lead when forced).
    AllUnenriched,
    Leads(Vec<LeadId>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyEnriched,
    InFlight,
    NotFound,
    TerminalStatus,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LeadOutcome {
    Enriched { attempts: u32 },
    Failed { error: String, attempts: u32 },
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadResult {
    pub lead_id: LeadId,
    #[serde(flatten)]
    pub outcome: LeadOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrichmentReport {
    pub project_id: Option<ProjectId>,
    pub requested: usize,
    pub enriched: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    pub leads: Vec<LeadResult>,
}

impl EnrichmentReport {
    fn record(&mut self, result: LeadResult) {
        match &result.outcome {
            LeadOutcome::Enriched { .. } => self.enriched += 1,
            LeadOutcome::Failed { .. } => self.failed += 1,
            LeadOutcome::Skipped { reason } => {
                if *reason == SkipReason::Cancelled {
                    self.cancelled = true;
                }
                self.skipped += 1;
            }
        }
        self.leads.push(result);
    }
}

/// Enrichment coverage of a project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentStatus {
    pub project_id: ProjectId,
    pub total: usize,
    pub enriched: usize,
    pub failed: usize,
    pub pending: usize,
    pub enriched_percent: f64,
}

// ---------------------------------------------------------------------------
// Research helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subject {
    Company,
    Person,
}

fn subjects(mode: EnrichmentMode) -> &'static [Subject] {
    match mode {
        EnrichmentMode::Company => &[Subject::Company],
        EnrichmentMode::Person => &[Subject::Person],
        EnrichmentMode::Both => &[Subject::Company, Subject::Person],
    }
}

/// Fill the research template for one subject.
pub fn render_research_prompt(template: &str, lead: &Lead) -> String {
    render_template(
        template,
        &[
            ("company", &lead.company),
            ("name", &lead.name),
            ("title", lead.title.as_deref().unwrap_or("role unknown")),
        ],
    )
}

/// Reject answers too short or that only say nothing was found.
pub fn check_quality(text: &str) -> Result<()> {
    if text.chars().count() < MIN_RESEARCH_CHARS {
        return Err(LeadflowError::permanent(
            CAPABILITY,
            format!("research result too short ({} chars)", text.chars().count()),
        ));
    }
    let lower = text.to_lowercase();
    if let Some(phrase) = NO_INFO_PHRASES.iter().find(|p| lower.contains(**p)) {
        return Err(LeadflowError::permanent(
            CAPABILITY,
            format!("research returned no usable information ('{phrase}')"),
        ));
    }
    Ok(())
}

fn policy(config: &EnrichmentConfig) -> RetryPolicy {
    RetryPolicy::new(
        config.max_retries,
        Duration::from_millis(config.backoff_base_ms),
        Duration::from_secs(config.timeout_seconds),
    )
}

/// Merge a run's results into the lead. Earlier research is kept for
/// subjects that were not refreshed, and a failed refresh of an enriched
/// lead keeps it enriched.
fn apply_results(
    lead: &mut Lead,
    mode: EnrichmentMode,
    company: Option<String>,
    person: Option<String>,
    error: Option<String>,
    attempts: u32,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    let previous = lead.enrichment.take();
    let was_enriched = previous
        .as_ref()
        .is_some_and(|e| e.state == EnrichmentState::Enriched);
    let (prev_company, prev_person) = previous
        .map(|e| (e.company_research, e.person_research))
        .unwrap_or((None, None));

    let state = if error.is_none() || was_enriched {
        EnrichmentState::Enriched
    } else {
        EnrichmentState::Failed
    };

    lead.enrichment = Some(Enrichment {
        state,
        mode,
        company_research: company.or(prev_company),
        person_research: person.or(prev_person),
        error,
        attempts,
        updated_at: now,
    });

    if state == EnrichmentState::Enriched {
        lead.status = lifecycle::transition(lead.status, LeadEvent::EnrichmentSucceeded)?;
    }
    Ok(())
}

/// Higher scores are enriched first: decision makers at larger companies
/// with the most complete records.
pub fn enrichment_priority(lead: &Lead) -> u32 {
    let mut score = 0;
    if !lead.email.is_empty() {
        score += 10;
    }
    if !lead.company.trim().is_empty() {
        score += 10;
    }
    if let Some(title) = lead.title.as_deref().filter(|t| !t.trim().is_empty()) {
        score += 5;
        let title = title.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| title.contains(w));
        if has(&["ceo", "founder", "president", "director"]) {
            score += 15;
        } else if has(&["manager", "head", "lead"]) {
            score += 10;
        }
    }
    score += match lead.company_size.unwrap_or(0) {
        s if s > 1000 => 10,
        s if s > 100 => 5,
        _ => 0,
    };
    score
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

struct RunContext<'a> {
    project_id: ProjectId,
    mode: EnrichmentMode,
    force: bool,
    config: EnrichmentConfig,
    research: Arc<dyn ResearchProvider>,
    owner: String,
    cancel: &'a CancellationToken,
    /// Tripped by a configuration error; leads not yet started are left alone.
    abort: CancellationToken,
}

impl Pipeline {
    /// Enrich the targeted leads of a project.
    ///
    /// Returns a per-lead report. Configuration errors, whether found before
    /// the run or raised by research, and storage problems that prevent the
    /// run from starting are returned as errors.
    #[instrument(skip_all, fields(%project_id, ?mode, force))]
    pub async fn enrich(
        &self,
        project_id: ProjectId,
        target: EnrichTarget,
        mode: EnrichmentMode,
        force: bool,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<EnrichmentReport> {
        self.project(project_id).await?;
        let effective = self.effective_config(project_id).await?;
        let config = effective.enrichment()?.clone();
        if !config.enabled {
            return Err(LeadflowError::config(
                "enrichment is disabled ([enrichment] enabled = false)",
            ));
        }
        let research = self.capabilities.research(&effective)?;

        let lead_ids: Vec<LeadId> = match target {
            EnrichTarget::Leads(ids) => ids,
            EnrichTarget::AllUnenriched => {
                let mut leads: Vec<Lead> = self
                    .storage
                    .list_leads(project_id, None)
                    .await?
                    .into_iter()
                    .filter(|l| !l.status.is_terminal() && (force || !l.is_enriched()))
                    .collect();
                // stable: equal scores keep creation order
                leads.sort_by_key(|l| std::cmp::Reverse(enrichment_priority(l)));
                leads.into_iter().map(|l| l.id).collect()
            }
        };

        let total = lead_ids.len();
        let concurrency = config.concurrency.min(self.worker_concurrency()).max(1);
        let ctx = RunContext {
            project_id,
            mode,
            force,
            config,
            research,
            owner: self.lock_owner("enrich"),
            cancel,
            abort: CancellationToken::new(),
        };

        progress.phase("Enriching leads");
        let mut report = EnrichmentReport {
            project_id: Some(project_id),
            requested: total,
            ..Default::default()
        };

        let mut results = stream::iter(lead_ids)
            .map(|lead_id| self.enrich_one(&ctx, lead_id))
            .buffer_unordered(concurrency);

        let mut done = 0;
        let mut fatal = None;
        while let Some(result) = results.next().await {
            done += 1;
            match result {
                Ok(result) => {
                    progress.item_done(done, total, &result.lead_id.to_string());
                    report.record(result);
                }
                Err(e) => {
                    fatal.get_or_insert(e);
                }
            }
        }
        if let Some(e) = fatal {
            warn!(error = %e, enriched = report.enriched, "enrichment aborted");
            return Err(e);
        }

        info!(
            requested = report.requested,
            enriched = report.enriched,
            failed = report.failed,
            skipped = report.skipped,
            cancelled = report.cancelled,
            "enrichment complete"
        );
        Ok(report)
    }

    /// Only a configuration error comes back as `Err`; it ends the run.
    async fn enrich_one(&self, ctx: &RunContext<'_>, lead_id: LeadId) -> Result<LeadResult> {
        let outcome = match self.enrich_locked(ctx, lead_id).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_config() => {
                let _ = self.storage.unlock_lead(lead_id, &ctx.owner).await;
                ctx.abort.cancel();
                return Err(e);
            }
            Err(e) => {
                warn!(%lead_id, error = %e, "enrichment aborted for lead");
                let _ = self.storage.unlock_lead(lead_id, &ctx.owner).await;
                LeadOutcome::Failed {
                    error: e.to_string(),
                    attempts: 0,
                }
            }
        };
        Ok(LeadResult { lead_id, outcome })
    }

    async fn enrich_locked(&self, ctx: &RunContext<'_>, lead_id: LeadId) -> Result<LeadOutcome> {
        let skip = |reason: SkipReason| -> Result<LeadOutcome> { Ok(LeadOutcome::Skipped { reason }) };

        if ctx.cancel.is_cancelled() || ctx.abort.is_cancelled() {
            return skip(SkipReason::Cancelled);
        }

        if !self
            .storage
            .try_lock_lead(lead_id, &ctx.owner, self.clock.now(), self.lock_ttl())
            .await?
        {
            return skip(SkipReason::InFlight);
        }

        let mut lead = match self.storage.get_lead(lead_id).await? {
            Some(lead) if lead.project_id == ctx.project_id => lead,
            _ => {
                self.storage.unlock_lead(lead_id, &ctx.owner).await?;
                return skip(SkipReason::NotFound);
            }
        };
        if lead.status.is_terminal() {
            self.storage.unlock_lead(lead_id, &ctx.owner).await?;
            return skip(SkipReason::TerminalStatus);
        }
        if lead.is_enriched() && !ctx.force {
            self.storage.unlock_lead(lead_id, &ctx.owner).await?;
            return skip(SkipReason::AlreadyEnriched);
        }

        let mut company = None;
        let mut person = None;
        let mut error = None;
        let mut attempts = 0;

        for subject in subjects(ctx.mode) {
            let template = match subject {
                Subject::Company => &ctx.config.company_template,
                Subject::Person => &ctx.config.person_template,
            };
            let prompt = render_research_prompt(template, &lead);
            let attempted = retry::retry(CAPABILITY, policy(&ctx.config), |_| {
                let research = ctx.research.clone();
                let prompt = prompt.clone();
                async move {
                    let text = research.research(&prompt).await?;
                    check_quality(&text)?;
                    Ok(text)
                }
            })
            .await;
            attempts += attempted.attempts;

            match attempted.result {
                Ok(text) => match subject {
                    Subject::Company => company = Some(text),
                    Subject::Person => person = Some(text),
                },
                Err(e) if e.is_config() => return Err(e),
                Err(e) => {
                    warn!(%lead_id, attempts = attempted.attempts, error = %e, "research failed");
                    error = Some(e.to_string());
                    break;
                }
            }
        }

        let failed = error.clone();
        apply_results(
            &mut lead,
            ctx.mode,
            company,
            person,
            error,
            attempts,
            self.clock.now(),
        )?;
        if !self.storage.commit_lead(&lead, &ctx.owner).await? {
            return skip(SkipReason::TerminalStatus);
        }

        Ok(match failed {
            None => LeadOutcome::Enriched { attempts },
            Some(error) => LeadOutcome::Failed { error, attempts },
        })
    }

    /// Enriched / failed / pending totals for a project.
    pub async fn enrichment_status(&self, project_id: ProjectId) -> Result<EnrichmentStatus> {
        self.project(project_id).await?;
        let leads = self.storage.list_leads(project_id, None).await?;
        let total = leads.len();
        let enriched = leads.iter().filter(|l| l.is_enriched()).count();
        let failed = leads
            .iter()
            .filter(|l| {
                l.enrichment
                    .as_ref()
                    .is_some_and(|e| e.state == EnrichmentState::Failed)
            })
            .count();
        let enriched_percent = if total == 0 {
            0.0
        } else {
            (enriched as f64 / total as f64 * 1000.0).round() / 10.0
        };

        Ok(EnrichmentStatus {
            project_id,
            total,
            enriched,
            failed,
            pending: total - enriched - failed,
            enriched_percent,
        })
    }
}
