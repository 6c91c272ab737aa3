//! Scheduler and delivery engine.
//!
//! One [`Pipeline::dispatch`] call picks the leads that are due, then sends
//! them one at a time inside the project's working-hours window. Every send
//! takes a slot from the atomic daily counter first, waits out the
//! inter-send delay, and is recorded under an idempotency key together with
//! the lead update.

use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, info, instrument, warn};

use leadflow_delivery::{MailTransport, OutgoingEmail};
use leadflow_shared::{
    DeliveryFailure, EmailType, Lead, LeadId, LeadStatus, LeadflowError, ProjectId, Result,
    SchedulingConfig, SmtpSettings,
};
use leadflow_storage::DeliveryRecord;

use crate::generation::{Drafter, attach_draft};
use crate::lifecycle::{self, LeadEvent};
use crate::pipeline::Pipeline;
use crate::retry;

const CAPABILITY: &str = "delivery";

// ---------------------------------------------------------------------------
// Options and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Report what would be sent without sending or changing anything.
    pub dry_run: bool,
    /// Generate a draft for due leads that have none, right before sending.
    pub generate_missing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    OutsideWorkingHours,
    DailyLimitReached,
    /// A recent send failed; waiting for `retry_after_minutes`.
    RetryPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchSkip {
    InFlight,
    AlreadySent,
    NoLongerEligible,
    /// The last send failed permanently and no newer draft exists.
    PermanentFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Sent {
        subject: String,
        sent_at: DateTime<Utc>,
    },
    WouldSend {
        subject: Option<String>,
    },
    Failed {
        error: String,
        retryable: bool,
    },
    Deferred {
        reason: DeferReason,
    },
    Skipped {
        reason: DispatchSkip,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchItem {
    pub lead_id: LeadId,
    pub email: String,
    pub email_type: EmailType,
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub project_id: ProjectId,
    pub dry_run: bool,
    /// Local calendar day the daily counter applies to.
    pub day: String,
    pub window_open: bool,
    pub sent: usize,
    pub would_send: usize,
    pub failed: usize,
    pub deferred: usize,
    pub skipped: usize,
    pub items: Vec<DispatchItem>,
}

impl DispatchReport {
    fn push(&mut self, lead: &Lead, email_type: EmailType, outcome: DispatchOutcome) {
        match &outcome {
            DispatchOutcome::Sent { .. } => self.sent += 1,
            DispatchOutcome::WouldSend { .. } => self.would_send += 1,
            DispatchOutcome::Failed { .. } => self.failed += 1,
            DispatchOutcome::Deferred { .. } => self.deferred += 1,
            DispatchOutcome::Skipped { .. } => self.skipped += 1,
        }
        self.items.push(DispatchItem {
            lead_id: lead.id,
            email: lead.email.clone(),
            email_type,
            outcome,
        });
    }
}

// ---------------------------------------------------------------------------
// Eligibility
// ---------------------------------------------------------------------------

/// Whether `now` falls on a working day inside `[start, end)` local time.
pub fn within_working_hours(config: &SchedulingConfig, tz: Tz, now: DateTime<Utc>) -> bool {
    let local = now.with_timezone(&tz);
    let weekday = local.weekday().num_days_from_monday() as u8;
    let hour = local.hour();
    config.working_days.contains(&weekday)
        && hour >= config.working_hours_start
        && hour < config.working_hours_end
}

/// Local calendar day used as the daily-counter key.
pub fn local_day(tz: Tz, now: DateTime<Utc>) -> String {
    now.with_timezone(&tz).date_naive().format("%Y-%m-%d").to_string()
}

/// Whether an emailed lead is due another follow-up.
pub fn followup_due(lead: &Lead, config: &SchedulingConfig, now: DateTime<Utc>) -> bool {
    lead.status == LeadStatus::Emailed
        && lead.followup_count < config.max_followups
        && lead.last_contacted.is_some_and(|t| {
            now - t >= chrono::Duration::days(i64::from(config.followup_delay_days))
        })
}

fn first_contact_ready(lead: &Lead) -> bool {
    matches!(lead.status, LeadStatus::New | LeadStatus::Enriched)
}

/// Stable key for one send: lead, type, and follow-up ordinal.
pub fn idempotency_key(lead_id: LeadId, email_type: EmailType, ordinal: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(lead_id.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(email_type.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(ordinal.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn ordinal(lead: &Lead, email_type: EmailType) -> u32 {
    match email_type {
        EmailType::Outreach => 0,
        EmailType::Followup => lead.followup_count + 1,
    }
}

enum Blocked {
    Defer(DeferReason),
    Skip(DispatchSkip),
}

/// A recorded delivery failure holds the lead back until a newer draft
/// exists or, for transient failures, until `retry_after_minutes` passed.
fn failure_block(
    lead: &Lead,
    email_type: EmailType,
    config: &SchedulingConfig,
    now: DateTime<Utc>,
) -> Option<Blocked> {
    let failure = lead.last_delivery_error.as_ref()?;
    if lead
        .pending_draft(email_type)
        .is_some_and(|d| d.created_at > failure.at)
    {
        return None;
    }
    if failure.permanent {
        return Some(Blocked::Skip(DispatchSkip::PermanentFailure));
    }
    let wait = chrono::Duration::minutes(i64::from(config.retry_after_minutes));
    (now - failure.at < wait).then_some(Blocked::Defer(DeferReason::RetryPending))
}

/// The email type a lead is due for, if any.
fn due_type(
    lead: &Lead,
    config: &SchedulingConfig,
    now: DateTime<Utc>,
    generate_missing: bool,
) -> Option<EmailType> {
    let email_type = if followup_due(lead, config, now) {
        EmailType::Followup
    } else if first_contact_ready(lead) {
        EmailType::Outreach
    } else {
        return None;
    };
    (generate_missing || lead.pending_draft(email_type).is_some()).then_some(email_type)
}

/// Due leads in send order: follow-ups by `last_contacted`, then first
/// contacts by `created_at`.
fn plan(
    leads: Vec<Lead>,
    config: &SchedulingConfig,
    now: DateTime<Utc>,
    generate_missing: bool,
) -> Vec<(Lead, EmailType)> {
    let mut followups = Vec::new();
    let mut outreach = Vec::new();
    for lead in leads {
        match due_type(&lead, config, now, generate_missing) {
            Some(EmailType::Followup) => followups.push((lead, EmailType::Followup)),
            Some(EmailType::Outreach) => outreach.push((lead, EmailType::Outreach)),
            None => {}
        }
    }
    followups.sort_by_key(|(l, _)| l.last_contacted);
    outreach.sort_by_key(|(l, _)| l.created_at);
    followups.extend(outreach);
    followups
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

struct SendContext<'a> {
    project_id: ProjectId,
    config: &'a SchedulingConfig,
    tz: Tz,
    day: &'a str,
    owner: String,
    mail: &'a dyn MailTransport,
    smtp: &'a SmtpSettings,
    outreach_drafter: Option<Drafter>,
    followup_drafter: Option<Drafter>,
    request_timeout: Duration,
}

impl Pipeline {
    /// Send what is due for a project.
    ///
    /// Quota exhaustion and closed windows defer leads, they are not errors.
    /// Only configuration or storage problems before the first send are
    /// returned as `Err`.
    #[instrument(skip_all, fields(%project_id, dry_run = options.dry_run))]
    pub async fn dispatch(
        &self,
        project_id: ProjectId,
        options: DispatchOptions,
    ) -> Result<DispatchReport> {
        let project = self.project(project_id).await?;
        let effective = self.effective_config(project_id).await?;
        let config = effective.scheduling()?.clone();
        let tz = config.tz()?;
        let now = self.clock.now();
        let day = local_day(tz, now);
        let window_open = within_working_hours(&config, tz, now);

        let mut report = DispatchReport {
            project_id,
            dry_run: options.dry_run,
            day: day.clone(),
            window_open,
            sent: 0,
            would_send: 0,
            failed: 0,
            deferred: 0,
            skipped: 0,
            items: Vec::new(),
        };

        if !project.active {
            info!("project inactive; nothing dispatched");
            return Ok(report);
        }

        let leads = self.storage.list_leads(project_id, None).await?;
        let planned = plan(leads, &config, now, options.generate_missing);
        if planned.is_empty() {
            info!("no leads due");
            return Ok(report);
        }

        if !window_open {
            for (lead, email_type) in &planned {
                report.push(
                    lead,
                    *email_type,
                    DispatchOutcome::Deferred {
                        reason: DeferReason::OutsideWorkingHours,
                    },
                );
            }
            info!(deferred = report.deferred, "outside working hours");
            return Ok(report);
        }

        if options.dry_run {
            self.dry_run(&mut report, planned, &config, project_id, &day, now)
                .await?;
            return Ok(report);
        }

        // configuration problems surface before anything is sent
        let smtp = effective.smtp()?.clone();
        let mail = self.capabilities.mail(&effective)?;
        let needs_draft = |t: EmailType| {
            options.generate_missing
                && planned
                    .iter()
                    .any(|(l, et)| *et == t && l.pending_draft(t).is_none())
        };
        let drafter_for = |t: EmailType| -> Result<Option<Drafter>> {
            if !needs_draft(t) {
                return Ok(None);
            }
            let completion = self.capabilities.completion(&effective)?;
            Drafter::new(project.clone(), &effective, t, None, completion).map(Some)
        };
        let ctx = SendContext {
            project_id,
            config: &config,
            tz,
            day: &day,
            owner: self.lock_owner("dispatch"),
            mail: mail.as_ref(),
            smtp: &smtp,
            outreach_drafter: drafter_for(EmailType::Outreach)?,
            followup_drafter: drafter_for(EmailType::Followup)?,
            request_timeout: Duration::from_secs(self.runtime.request_timeout_secs.max(1)),
        };

        let mut last_send: Option<Instant> = None;
        let mut quota_reached = false;
        for (lead, email_type) in planned {
            let outcome = if quota_reached {
                DispatchOutcome::Deferred {
                    reason: DeferReason::DailyLimitReached,
                }
            } else {
                // configuration errors end the run; untouched leads stay due
                self.send_one(&ctx, &lead, email_type, &mut last_send).await?
            };
            if matches!(
                outcome,
                DispatchOutcome::Deferred {
                    reason: DeferReason::DailyLimitReached
                }
            ) {
                quota_reached = true;
            }
            report.push(&lead, email_type, outcome);
        }

        info!(
            sent = report.sent,
            failed = report.failed,
            deferred = report.deferred,
            skipped = report.skipped,
            day = %report.day,
            "dispatch complete"
        );
        Ok(report)
    }

    async fn dry_run(
        &self,
        report: &mut DispatchReport,
        planned: Vec<(Lead, EmailType)>,
        config: &SchedulingConfig,
        project_id: ProjectId,
        day: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let used = self.storage.sends_on_day(project_id, day).await?;
        let mut remaining = config.daily_email_limit.saturating_sub(used);
        for (lead, email_type) in planned {
            let outcome = match failure_block(&lead, email_type, config, now) {
                Some(Blocked::Defer(reason)) => DispatchOutcome::Deferred { reason },
                Some(Blocked::Skip(reason)) => DispatchOutcome::Skipped { reason },
                None if remaining == 0 => DispatchOutcome::Deferred {
                    reason: DeferReason::DailyLimitReached,
                },
                None => {
                    remaining -= 1;
                    DispatchOutcome::WouldSend {
                        subject: lead.pending_draft(email_type).map(|d| d.subject.clone()),
                    }
                }
            };
            report.push(&lead, email_type, outcome);
        }
        info!(would_send = report.would_send, deferred = report.deferred, "dry run");
        Ok(())
    }

    async fn send_one(
        &self,
        ctx: &SendContext<'_>,
        planned: &Lead,
        email_type: EmailType,
        last_send: &mut Option<Instant>,
    ) -> Result<DispatchOutcome> {
        let lead_id = planned.id;
        let now = self.clock.now();
        match self
            .storage
            .try_lock_lead(lead_id, &ctx.owner, now, self.lock_ttl())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return Ok(DispatchOutcome::Skipped {
                    reason: DispatchSkip::InFlight,
                });
            }
            Err(e) => return Ok(failed(&e)),
        }

        match self.send_locked(ctx, lead_id, email_type, last_send).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_config() => {
                error!(%lead_id, error = %e, "dispatch aborted");
                let _ = self.storage.unlock_lead(lead_id, &ctx.owner).await;
                Err(e)
            }
            Err(e) => {
                error!(%lead_id, error = %e, "dispatch failed for lead");
                let _ = self.storage.unlock_lead(lead_id, &ctx.owner).await;
                Ok(failed(&e))
            }
        }
    }

    async fn send_locked(
        &self,
        ctx: &SendContext<'_>,
        lead_id: LeadId,
        email_type: EmailType,
        last_send: &mut Option<Instant>,
    ) -> Result<DispatchOutcome> {
        let release_lock = || self.storage.unlock_lead(lead_id, &ctx.owner);
        let now = self.clock.now();

        // state may have moved since planning
        let mut lead = match self.storage.get_lead(lead_id).await? {
            Some(lead) if lead.project_id == ctx.project_id => lead,
            _ => {
                release_lock().await?;
                return Ok(DispatchOutcome::Skipped {
                    reason: DispatchSkip::NoLongerEligible,
                });
            }
        };
        let still_due = match email_type {
            EmailType::Followup => followup_due(&lead, ctx.config, now),
            EmailType::Outreach => first_contact_ready(&lead),
        };
        if !still_due {
            release_lock().await?;
            return Ok(DispatchOutcome::Skipped {
                reason: DispatchSkip::NoLongerEligible,
            });
        }
        match failure_block(&lead, email_type, ctx.config, now) {
            Some(Blocked::Defer(reason)) => {
                release_lock().await?;
                return Ok(DispatchOutcome::Deferred { reason });
            }
            Some(Blocked::Skip(reason)) => {
                release_lock().await?;
                return Ok(DispatchOutcome::Skipped { reason });
            }
            None => {}
        }

        let ordinal = ordinal(&lead, email_type);
        let key = idempotency_key(lead.id, email_type, ordinal);
        if self.storage.delivery_exists(&key).await? {
            release_lock().await?;
            return Ok(DispatchOutcome::Skipped {
                reason: DispatchSkip::AlreadySent,
            });
        }

        if self
            .storage
            .reserve_send_slot(ctx.project_id, ctx.day, ctx.config.daily_email_limit)
            .await?
            .is_none()
        {
            release_lock().await?;
            return Ok(DispatchOutcome::Deferred {
                reason: DeferReason::DailyLimitReached,
            });
        }

        // mandatory pause between sends
        if let Some(previous) = *last_send {
            let delay = Duration::from_secs(ctx.config.rate_limit_delay_seconds);
            let elapsed = previous.elapsed();
            if elapsed < delay {
                tokio::time::sleep(delay - elapsed).await;
            }
        }

        let now = self.clock.now();
        if !within_working_hours(ctx.config, ctx.tz, now) {
            self.storage.release_send_slot(ctx.project_id, ctx.day).await?;
            release_lock().await?;
            return Ok(DispatchOutcome::Deferred {
                reason: DeferReason::OutsideWorkingHours,
            });
        }

        if lead.pending_draft(email_type).is_none() {
            let drafter = match email_type {
                EmailType::Outreach => ctx.outreach_drafter.as_ref(),
                EmailType::Followup => ctx.followup_drafter.as_ref(),
            };
            let draft = match drafter {
                Some(drafter) => drafter.draft(&lead, email_type, now).await,
                None => Err(LeadflowError::validation("lead has no pending draft")),
            };
            match draft {
                Ok(draft) => attach_draft(&mut lead, draft, now),
                Err(e) => {
                    self.storage.release_send_slot(ctx.project_id, ctx.day).await?;
                    release_lock().await?;
                    if e.is_config() {
                        return Err(e);
                    }
                    return Ok(failed(&e));
                }
            }
        }
        let Some(draft) = lead.pending_draft(email_type).cloned() else {
            self.storage.release_send_slot(ctx.project_id, ctx.day).await?;
            release_lock().await?;
            return Ok(DispatchOutcome::Skipped {
                reason: DispatchSkip::NoLongerEligible,
            });
        };

        let email = OutgoingEmail {
            to: lead.email.clone(),
            to_name: Some(lead.name.clone()).filter(|n| !n.trim().is_empty()),
            from_email: ctx.smtp.from_email.clone(),
            from_name: Some(ctx.smtp.from_name.clone()).filter(|n| !n.trim().is_empty()),
            reply_to: ctx.smtp.reply_to.clone(),
            subject: draft.subject.clone(),
            body: draft.body.clone(),
        };

        let result = retry::with_timeout(CAPABILITY, ctx.request_timeout, ctx.mail.send(&email)).await;
        *last_send = Some(Instant::now());

        match result {
            Ok(_ack) => {
                let sent_at = self.clock.now();
                if let Some(record) = lead
                    .email_history
                    .iter_mut()
                    .rev()
                    .find(|r| r.email_type == email_type && r.is_draft())
                {
                    record.sent_at = Some(sent_at);
                }
                lead.status = lifecycle::transition(lead.status, LeadEvent::Sent(email_type))?;
                lead.last_contacted = Some(sent_at);
                lead.last_delivery_error = None;
                if email_type == EmailType::Followup {
                    lead.followup_count += 1;
                }

                let record = DeliveryRecord {
                    idempotency_key: &key,
                    email_type,
                    ordinal,
                    sent_at,
                };
                match self.storage.commit_delivery(&lead, &ctx.owner, &record).await {
                    Ok(true) => {}
                    Ok(false) => {
                        info!(%lead_id, "sent to a lead that turned terminal meanwhile; status kept");
                    }
                    Err(e) => {
                        // the message is out: the key alone still blocks a resend
                        error!(%lead_id, error = %e, "sent but failed to record delivery");
                        if let Err(e) = self.storage.record_delivery_key(&lead, &record).await {
                            error!(%lead_id, key = %key, error = %e, "delivery key not recorded");
                        }
                        let _ = release_lock().await;
                        return Ok(DispatchOutcome::Failed {
                            error: format!("sent but not recorded: {e}"),
                            retryable: false,
                        });
                    }
                }
                info!(%lead_id, email_type = email_type.as_str(), "email sent");
                Ok(DispatchOutcome::Sent {
                    subject: draft.subject,
                    sent_at,
                })
            }
            Err(e) if e.is_config() => {
                self.storage.release_send_slot(ctx.project_id, ctx.day).await?;
                release_lock().await?;
                Err(e)
            }
            Err(e) => {
                warn!(%lead_id, error = %e, retryable = e.is_retryable(), "send failed");
                self.storage.release_send_slot(ctx.project_id, ctx.day).await?;
                lead.last_delivery_error = Some(DeliveryFailure {
                    message: e.to_string(),
                    at: self.clock.now(),
                    permanent: !e.is_retryable(),
                });
                self.storage.commit_lead(&lead, &ctx.owner).await?;
                Ok(failed(&e))
            }
        }
    }
}

fn failed(e: &LeadflowError) -> DispatchOutcome {
    DispatchOutcome::Failed {
        error: e.to_string(),
        retryable: e.is_retryable(),
    }
}
