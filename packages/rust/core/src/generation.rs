//! Generation engine: renders prompt templates from project and lead data,
//! calls the completion capability, and stores the result as a draft.
//!
//! Drafts are appended to the lead's email history with `sent_at` unset.
//! Sending is the scheduler's job.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use leadflow_llm::{CompletionProvider, CompletionRequest};
use leadflow_shared::{
    EmailRecord, EmailType, GenerationConfig, Lead, LeadId, LeadStatus, LeadflowError, Project,
    ProjectId, PromptsConfig, Result,
};

use crate::pipeline::Pipeline;
use crate::resolver::EffectiveConfig;
use crate::retry::{self, RetryPolicy};
use crate::scheduler;

const CAPABILITY: &str = "generation";

/// Backoff base between generation attempts.
const GENERATION_BACKOFF: Duration = Duration::from_millis(500);

const NO_RESEARCH: &str = "No additional research available.";
const DEFAULT_TONE: &str = "Professional, friendly and concise.";
const DEFAULT_FOLLOWUP_STRATEGY: &str = "Be polite, add something new, keep it short.";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Where a draft's subject line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectSource {
    Generated,
    Fallback,
}

/// A generated, unsent email.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailDraft {
    pub lead_id: LeadId,
    pub email_type: EmailType,
    pub subject: String,
    pub body: String,
    pub subject_source: SubjectSource,
}

impl EmailDraft {
    pub fn into_record(self, created_at: DateTime<Utc>) -> EmailRecord {
        EmailRecord {
            email_type: self.email_type,
            subject: self.subject,
            body: self.body,
            created_at,
            sent_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub lead_id: LeadId,
    pub error: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemSkipped {
    pub lead_id: LeadId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub project_id: ProjectId,
    pub email_type: EmailType,
    pub drafted: Vec<EmailDraft>,
    pub failed: Vec<ItemFailure>,
    pub skipped: Vec<ItemSkipped>,
}

enum Outcome {
    Drafted(EmailDraft),
    Failed(ItemFailure),
    Skipped(ItemSkipped),
    /// A configuration error that would fail every remaining lead.
    Aborted(LeadflowError),
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Substitute `{key}` placeholders. Unknown placeholders are left as-is.
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() {
        default
    } else {
        value
    }
}

/// Render the prompt for one lead.
pub fn render_prompt(
    template: &str,
    project: &Project,
    lead: &Lead,
    email_type: EmailType,
    now: DateTime<Utc>,
) -> String {
    let research = lead
        .enrichment
        .as_ref()
        .and_then(|e| e.text())
        .unwrap_or_else(|| NO_RESEARCH.to_string());
    let description = or_default(&project.brief, &project.targeting);
    let days_ago = lead
        .last_contacted
        .map(|t| (now - t).num_days().max(0))
        .unwrap_or(0)
        .to_string();
    let original = match email_type {
        EmailType::Followup => lead.last_sent().map(|r| r.body.as_str()).unwrap_or(""),
        EmailType::Outreach => "",
    };

    render_template(
        template,
        &[
            ("project_name", &project.name),
            ("project_description", description),
            ("name", &lead.name),
            ("company", &lead.company),
            ("title", lead.title.as_deref().unwrap_or("")),
            ("enrichment_data", &research),
            ("email_considerations", or_default(&project.email_tone, DEFAULT_TONE)),
            ("days_ago", &days_ago),
            ("original_email", original),
            (
                "followup_considerations",
                or_default(&project.followup_strategy, DEFAULT_FOLLOWUP_STRATEGY),
            ),
        ],
    )
}

/// Subject used when the completion has no `Subject:` line.
pub fn fallback_subject(project: &Project, lead: &Lead, email_type: EmailType) -> String {
    let project_name = project.name.trim();
    let company = lead.company.trim();
    let first = lead.first_name().unwrap_or("");

    match email_type {
        EmailType::Outreach => {
            if !project_name.is_empty() && !company.is_empty() {
                format!("{project_name} x {company} - Partnership opportunity")
            } else if !company.is_empty() {
                format!("Partnership opportunity for {company}")
            } else if !first.is_empty() && !project_name.is_empty() {
                format!("Hi {first}, {project_name} partnership")
            } else if !first.is_empty() {
                format!("Hi {first}, quick question")
            } else {
                "Partnership opportunity".to_string()
            }
        }
        EmailType::Followup => {
            if !project_name.is_empty() && !company.is_empty() {
                format!("Following up: {project_name} x {company}")
            } else if !company.is_empty() {
                format!("Following up on {company} partnership opportunity")
            } else if !first.is_empty() {
                format!("Following up, {first}")
            } else {
                "Following up on our previous conversation".to_string()
            }
        }
    }
}

/// Split completion text into subject and body.
///
/// Returns `None` for the subject when the first non-empty line is not a
/// `Subject:` line.
pub fn parse_completion(text: &str) -> (Option<String>, String) {
    let trimmed = text.trim();
    let (first, rest) = trimmed.split_once('\n').unwrap_or((trimmed, ""));
    let first_clean = first.trim().trim_matches('*').trim();

    let lower = first_clean.to_lowercase();
    if let Some(prefix_len) = ["subject:", "subject line:"]
        .iter()
        .find(|p| lower.starts_with(**p))
        .map(|p| p.len())
    {
        let subject = first_clean[prefix_len..]
            .trim()
            .trim_matches('*')
            .trim()
            .to_string();
        let subject = (!subject.is_empty()).then_some(subject);
        return (subject, rest.trim().to_string());
    }
    (None, trimmed.to_string())
}

/// Turn completion text into a draft, falling back to a derived subject.
pub fn build_draft(
    text: &str,
    project: &Project,
    lead: &Lead,
    email_type: EmailType,
) -> Result<EmailDraft> {
    let (subject, body) = parse_completion(text);
    if body.is_empty() {
        return Err(LeadflowError::permanent(
            CAPABILITY,
            "completion contained no email body",
        ));
    }
    let (subject, subject_source) = match subject {
        Some(s) => (s, SubjectSource::Generated),
        None => (fallback_subject(project, lead, email_type), SubjectSource::Fallback),
    };
    Ok(EmailDraft {
        lead_id: lead.id,
        email_type,
        subject,
        body,
        subject_source,
    })
}

fn template_for<'a>(prompts: &'a PromptsConfig, email_type: EmailType) -> &'a str {
    match email_type {
        EmailType::Outreach => &prompts.outreach_prompt,
        EmailType::Followup => &prompts.followup_prompt,
    }
}

/// Why a lead cannot get a draft of this type, if it can't.
fn ineligible(lead: &Lead, email_type: EmailType) -> Option<&'static str> {
    if lead.status.is_terminal() {
        return Some("terminal_status");
    }
    match email_type {
        EmailType::Outreach if lead.status == LeadStatus::Emailed => Some("already_contacted"),
        EmailType::Followup if lead.last_sent().is_none() => Some("not_contacted"),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Drafting
// ---------------------------------------------------------------------------

/// Everything needed to draft for one project, resolved once per call.
pub(crate) struct Drafter {
    pub project: Project,
    pub template: String,
    pub generation: GenerationConfig,
    pub completion: Arc<dyn CompletionProvider>,
}

impl Drafter {
    pub(crate) fn new(
        project: Project,
        effective: &EffectiveConfig,
        email_type: EmailType,
        custom_prompt: Option<&str>,
        completion: Arc<dyn CompletionProvider>,
    ) -> Result<Self> {
        let generation = effective.generation()?.clone();
        let template = match custom_prompt.map(str::trim).filter(|p| !p.is_empty()) {
            Some(custom) => custom.to_string(),
            None => template_for(effective.prompts()?, email_type).to_string(),
        };
        Ok(Self {
            project,
            template,
            generation,
            completion,
        })
    }

    /// Generate one draft. Transient failures are retried.
    pub(crate) async fn draft(
        &self,
        lead: &Lead,
        email_type: EmailType,
        now: DateTime<Utc>,
    ) -> Result<EmailDraft> {
        let request = CompletionRequest {
            model: self.generation.model.clone(),
            prompt: render_prompt(&self.template, &self.project, lead, email_type, now),
            max_tokens: self.generation.max_tokens,
            temperature: self.generation.temperature,
        };
        let policy = RetryPolicy::new(
            self.generation.max_retries,
            GENERATION_BACKOFF,
            Duration::from_secs(self.generation.timeout_seconds),
        );
        let attempted = retry::retry(CAPABILITY, policy, |_| {
            let completion = self.completion.clone();
            let request = request.clone();
            async move { completion.complete(&request).await }
        })
        .await;
        build_draft(&attempted.result?, &self.project, lead, email_type)
    }
}

/// Replace any pending draft of the same type, so a lead has at most one.
pub(crate) fn attach_draft(lead: &mut Lead, draft: EmailDraft, now: DateTime<Utc>) {
    let email_type = draft.email_type;
    lead.email_history
        .retain(|r| !(r.email_type == email_type && r.is_draft()));
    lead.email_history.push(draft.into_record(now));
}

impl Pipeline {
    /// Generate drafts for `lead_ids`, or for every lead that needs one when
    /// `lead_ids` is empty.
    #[instrument(skip_all, fields(%project_id, email_type = email_type.as_str(), leads = lead_ids.len()))]
    pub async fn generate(
        &self,
        project_id: ProjectId,
        lead_ids: &[LeadId],
        email_type: EmailType,
        custom_prompt: Option<&str>,
    ) -> Result<GenerationReport> {
        let project = self.project(project_id).await?;
        let effective = self.effective_config(project_id).await?;
        let completion = self.capabilities.completion(&effective)?;
        let drafter = Drafter::new(project, &effective, email_type, custom_prompt, completion)?;

        let mut report = GenerationReport {
            project_id,
            email_type,
            drafted: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        };

        let targets: Vec<LeadId> = if lead_ids.is_empty() {
            self.leads_needing_draft(project_id, email_type, &effective)
                .await?
        } else {
            lead_ids.to_vec()
        };

        let owner = self.lock_owner("generate");
        let abort = CancellationToken::new();
        let outcomes: Vec<Outcome> = stream::iter(targets)
            .map(|lead_id| {
                self.generate_one(project_id, lead_id, email_type, &drafter, &owner, &abort)
            })
            .buffer_unordered(self.worker_concurrency())
            .collect()
            .await;

        let mut fatal = None;
        for outcome in outcomes {
            match outcome {
                Outcome::Drafted(d) => report.drafted.push(d),
                Outcome::Failed(f) => report.failed.push(f),
                Outcome::Skipped(s) => report.skipped.push(s),
                Outcome::Aborted(e) => {
                    fatal.get_or_insert(e);
                }
            }
        }
        if let Some(e) = fatal {
            warn!(error = %e, drafted = report.drafted.len(), "generation aborted");
            return Err(e);
        }

        info!(
            drafted = report.drafted.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "generation complete"
        );
        Ok(report)
    }

    /// Render and generate one email without storing anything.
    #[instrument(skip_all, fields(%project_id, %lead_id))]
    pub async fn preview(
        &self,
        project_id: ProjectId,
        lead_id: LeadId,
        email_type: EmailType,
        custom_prompt: Option<&str>,
    ) -> Result<EmailDraft> {
        let project = self.project(project_id).await?;
        let lead = self
            .storage
            .get_lead(lead_id)
            .await?
            .filter(|l| l.project_id == project_id)
            .ok_or_else(|| LeadflowError::not_found(format!("lead {lead_id}")))?;
        let effective = self.effective_config(project_id).await?;
        let completion = self.capabilities.completion(&effective)?;
        let drafter = Drafter::new(project, &effective, email_type, custom_prompt, completion)?;
        drafter.draft(&lead, email_type, self.clock.now()).await
    }

    async fn leads_needing_draft(
        &self,
        project_id: ProjectId,
        email_type: EmailType,
        effective: &EffectiveConfig,
    ) -> Result<Vec<LeadId>> {
        let leads = self.storage.list_leads(project_id, None).await?;
        let now = self.clock.now();
        let ids = match email_type {
            EmailType::Outreach => leads
                .iter()
                .filter(|l| matches!(l.status, LeadStatus::New | LeadStatus::Enriched))
                .filter(|l| l.pending_draft(EmailType::Outreach).is_none())
                .map(|l| l.id)
                .collect(),
            EmailType::Followup => {
                let scheduling = effective.scheduling()?;
                leads
                    .iter()
                    .filter(|l| scheduler::followup_due(l, scheduling, now))
                    .filter(|l| l.pending_draft(EmailType::Followup).is_none())
                    .map(|l| l.id)
                    .collect()
            }
        };
        Ok(ids)
    }

    async fn generate_one(
        &self,
        project_id: ProjectId,
        lead_id: LeadId,
        email_type: EmailType,
        drafter: &Drafter,
        owner: &str,
        abort: &CancellationToken,
    ) -> Outcome {
        let skipped = |reason: &str| {
            Outcome::Skipped(ItemSkipped {
                lead_id,
                reason: reason.to_string(),
            })
        };
        let failed = |e: &LeadflowError| {
            Outcome::Failed(ItemFailure {
                lead_id,
                error: e.to_string(),
                retryable: e.is_retryable(),
            })
        };

        if abort.is_cancelled() {
            return skipped("aborted");
        }
        let now = self.clock.now();
        match self
            .storage
            .try_lock_lead(lead_id, owner, now, self.lock_ttl())
            .await
        {
            Ok(true) => {}
            Ok(false) => return skipped("in_flight"),
            Err(e) => return failed(&e),
        }

        let lead = match self.storage.get_lead(lead_id).await {
            Ok(Some(lead)) if lead.project_id == project_id => lead,
            Ok(_) => {
                let _ = self.storage.unlock_lead(lead_id, owner).await;
                return skipped("not_found");
            }
            Err(e) => {
                let _ = self.storage.unlock_lead(lead_id, owner).await;
                return failed(&e);
            }
        };

        if let Some(reason) = ineligible(&lead, email_type) {
            let _ = self.storage.unlock_lead(lead_id, owner).await;
            return skipped(reason);
        }

        match drafter.draft(&lead, email_type, now).await {
            Ok(draft) => {
                let mut lead = lead;
                attach_draft(&mut lead, draft.clone(), now);
                match self.storage.commit_lead(&lead, owner).await {
                    Ok(true) => Outcome::Drafted(draft),
                    Ok(false) => skipped("no_longer_eligible"),
                    Err(e) => {
                        let _ = self.storage.unlock_lead(lead_id, owner).await;
                        failed(&e)
                    }
                }
            }
            Err(e) => {
                let _ = self.storage.unlock_lead(lead_id, owner).await;
                if e.is_config() {
                    abort.cancel();
                    return Outcome::Aborted(e);
                }
                warn!(%lead_id, error = %e, "generation failed");
                failed(&e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::Clock;
    use super::*;
    use crate::testing::Harness;
    use leadflow_shared::{Enrichment, EnrichmentMode, EnrichmentState, GlobalConfig};

    fn project() -> Project {
        let mut p = Project::new("Brewline");
        p.brief = "Office coffee for teams".into();
        p
    }

    fn lead() -> Lead {
        let mut lead = Lead::from_candidate(
            ProjectId::new(),
            &crate::testing::candidate("Ada Lovelace", Some("ada@engines.io"), "Engines Ltd"),
            "ada@engines.io".into(),
        );
        lead.title = Some("Office Manager".into());
        lead
    }

    #[test]
    fn prompt_substitutes_lead_and_project() {
        let mut l = lead();
        l.enrichment = Some(Enrichment {
            state: EnrichmentState::Enriched,
            mode: EnrichmentMode::Company,
            company_research: Some("They just moved offices.".into()),
            person_research: None,
            error: None,
            attempts: 1,
            updated_at: Utc::now(),
        });
        let prompt = render_prompt(
            "{project_name}|{project_description}|{name}|{company}|{title}|{enrichment_data}|{email_considerations}",
            &project(),
            &l,
            EmailType::Outreach,
            Utc::now(),
        );
        assert_eq!(
            prompt,
            format!(
                "Brewline|Office coffee for teams|Ada Lovelace|Engines Ltd|Office Manager|They just moved offices.|{DEFAULT_TONE}"
            )
        );
    }

    #[test]
    fn followup_prompt_has_history() {
        let now = Utc::now();
        let mut l = lead();
        l.last_contacted = Some(now - chrono::Duration::days(8));
        l.email_history.push(EmailRecord {
            email_type: EmailType::Outreach,
            subject: "Hello".into(),
            body: "Original pitch".into(),
            created_at: now - chrono::Duration::days(9),
            sent_at: Some(now - chrono::Duration::days(8)),
        });
        let prompt = render_prompt(
            "{days_ago} days: {original_email} / {enrichment_data}",
            &project(),
            &l,
            EmailType::Followup,
            now,
        );
        assert_eq!(prompt, format!("8 days: Original pitch / {NO_RESEARCH}"));
    }

    #[test]
    fn parses_subject_line() {
        let (subject, body) = parse_completion("Subject: Coffee for Engines\n\nHi Ada,\nbody");
        assert_eq!(subject.as_deref(), Some("Coffee for Engines"));
        assert_eq!(body, "Hi Ada,\nbody");

        let (subject, _) = parse_completion("**Subject:** Bold subject\nBody");
        assert_eq!(subject.as_deref(), Some("Bold subject"));

        let (subject, body) = parse_completion("Hi Ada,\n\nNo subject here.");
        assert!(subject.is_none());
        assert_eq!(body, "Hi Ada,\n\nNo subject here.");
    }

    #[test]
    fn fallback_subjects() {
        let p = project();
        let mut l = lead();
        assert_eq!(
            fallback_subject(&p, &l, EmailType::Outreach),
            "Brewline x Engines Ltd - Partnership opportunity"
        );
        assert_eq!(
            fallback_subject(&p, &l, EmailType::Followup),
            "Following up: Brewline x Engines Ltd"
        );
        l.company.clear();
        assert_eq!(
            fallback_subject(&p, &l, EmailType::Outreach),
            "Hi Ada, Brewline partnership"
        );
        assert_eq!(fallback_subject(&p, &l, EmailType::Followup), "Following up, Ada");
        l.name.clear();
        assert_eq!(
            fallback_subject(&p, &l, EmailType::Followup),
            "Following up on our previous conversation"
        );
    }

    #[test]
    fn empty_body_is_rejected() {
        let err = build_draft("Subject: Only a subject", &project(), &lead(), EmailType::Outreach)
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn generate_appends_draft_without_sending() {
        let h = Harness::new(GlobalConfig::with_defaults()).await;
        let lead = h.lead("ada@engines.io", "Engines").await;

        let report = h
            .pipeline
            .generate(h.project.id, &[lead.id], EmailType::Outreach, None)
            .await
            .unwrap();
        assert_eq!(report.drafted.len(), 1);
        assert_eq!(report.drafted[0].subject, "A quick idea for you");

        let stored = h.reload(&lead).await;
        assert_eq!(stored.email_history.len(), 1);
        assert!(stored.email_history[0].is_draft());
        assert_eq!(stored.status, LeadStatus::New);
        assert!(h.fakes.mail.sent().is_empty());

        let requests = h.fakes.completion.requests();
        assert_eq!(requests[0].model, "gpt-4");
        assert!(requests[0].prompt.contains("Acme Outreach"));
        assert!(requests[0].prompt.contains("Warm and brief."));
    }

    #[tokio::test]
    async fn regenerating_replaces_pending_draft() {
        let h = Harness::new(GlobalConfig::with_defaults()).await;
        let lead = h.lead("ada@engines.io", "Engines").await;
        h.fakes.completion.push(Ok("Subject: First\n\nOne".into()));
        h.fakes.completion.push(Ok("Second body without subject".into()));

        for _ in 0..2 {
            h.pipeline
                .generate(h.project.id, &[lead.id], EmailType::Outreach, None)
                .await
                .unwrap();
        }
        let stored = h.reload(&lead).await;
        assert_eq!(stored.email_history.len(), 1);
        assert_eq!(stored.email_history[0].body, "Second body without subject");
        assert_eq!(
            stored.email_history[0].subject,
            "Acme Outreach x Engines - Partnership opportunity"
        );
    }

    #[tokio::test]
    async fn custom_prompt_replaces_template() {
        let h = Harness::new(GlobalConfig::with_defaults()).await;
        let lead = h.lead("ada@engines.io", "Engines").await;
        h.pipeline
            .generate(
                h.project.id,
                &[lead.id],
                EmailType::Outreach,
                Some("Write to {name} about tea."),
            )
            .await
            .unwrap();
        assert_eq!(
            h.fakes.completion.requests()[0].prompt,
            "Write to ada Tester about tea."
        );
    }

    #[tokio::test]
    async fn per_lead_failures_do_not_abort_batch() {
        let h = Harness::new(GlobalConfig::with_defaults()).await;
        let a = h.lead("ada@engines.io", "Engines").await;
        let b = h.lead("grace@navy.mil", "Navy").await;
        let mut done = h.lead("alan@bletchley.uk", "Bletchley").await;
        done.status = LeadStatus::Blacklisted;
        h.pipeline.storage().update_lead(&done).await.unwrap();

        h.fakes.completion.push(Err(LeadflowError::permanent(
            "generation",
            "HTTP 400: bad prompt",
        )));

        let report = h
            .pipeline
            .generate(h.project.id, &[a.id, b.id, done.id], EmailType::Outreach, None)
            .await
            .unwrap();
        assert_eq!(report.drafted.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].reason, "terminal_status");
    }

    #[tokio::test]
    async fn config_error_aborts_batch() {
        let h = Harness::sequential(GlobalConfig::with_defaults()).await;
        let a = h.lead("ada@engines.io", "Engines").await;
        let b = h.lead("grace@navy.mil", "Navy").await;
        h.fakes
            .completion
            .push(Err(LeadflowError::config("completion API key rejected")));

        let err = h
            .pipeline
            .generate(h.project.id, &[a.id, b.id], EmailType::Outreach, None)
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert_eq!(h.fakes.completion.requests().len(), 1);
        assert!(h.reload(&a).await.email_history.is_empty());
        assert!(h.reload(&b).await.email_history.is_empty());
        // locks were released
        assert!(h
            .pipeline
            .storage()
            .try_lock_lead(a.id, "check", h.clock.now(), chrono::Duration::minutes(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn followup_needs_prior_contact() {
        let h = Harness::new(GlobalConfig::with_defaults()).await;
        let lead = h.lead("ada@engines.io", "Engines").await;
        let report = h
            .pipeline
            .generate(h.project.id, &[lead.id], EmailType::Followup, None)
            .await
            .unwrap();
        assert_eq!(report.skipped[0].reason, "not_contacted");
        assert!(h.fakes.completion.requests().is_empty());
    }

    #[tokio::test]
    async fn preview_stores_nothing() {
        let h = Harness::new(GlobalConfig::with_defaults()).await;
        let lead = h.lead("ada@engines.io", "Engines").await;
        let draft = h
            .pipeline
            .preview(h.project.id, lead.id, EmailType::Outreach, None)
            .await
            .unwrap();
        assert_eq!(draft.subject_source, SubjectSource::Generated);
        assert!(h.reload(&lead).await.email_history.is_empty());
    }

    #[tokio::test]
    async fn empty_target_list_drafts_every_new_lead() {
        let h = Harness::new(GlobalConfig::with_defaults()).await;
        h.lead("ada@engines.io", "Engines").await;
        h.lead("grace@navy.mil", "Navy").await;
        let report = h
            .pipeline
            .generate(h.project.id, &[], EmailType::Outreach, None)
            .await
            .unwrap();
        assert_eq!(report.drafted.len(), 2);
    }
}
