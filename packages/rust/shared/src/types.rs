//! Core domain types for leadflow projects and leads.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LeadflowError, Result};

/// Maximum length (in characters) of a project's free-text brief.
pub const BRIEF_MAX_CHARS: usize = 5_000;

/// Maximum length of a project's email-tone guidance.
pub const EMAIL_TONE_MAX_CHARS: usize = 2_000;

/// Maximum length of a project's follow-up strategy guidance.
pub const FOLLOWUP_STRATEGY_MAX_CHARS: usize = 2_000;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new time-sortable identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(
    /// A UUID v7 identifier for a lead (time-sortable).
    LeadId
);

uuid_id!(
    /// A UUID v7 identifier for a project.
    ProjectId
);

/// Normalize an email address into the dedup key used across the pipeline.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Syntactic check for a deliverable-looking address.
pub fn is_valid_email(email: &str) -> bool {
    static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid regex")
    });
    EMAIL_RE.is_match(email)
}

// ---------------------------------------------------------------------------
// Lead status
// ---------------------------------------------------------------------------

/// Lifecycle state of a lead. See `leadflow_core::lifecycle` for transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Enriched,
    Emailed,
    Responded,
    Bounced,
    Blacklisted,
}

impl LeadStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Enriched => "enriched",
            Self::Emailed => "emailed",
            Self::Responded => "responded",
            Self::Bounced => "bounced",
            Self::Blacklisted => "blacklisted",
        }
    }

    /// Terminal states accept no further pipeline processing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Responded | Self::Bounced | Self::Blacklisted)
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LeadStatus {
    type Err = LeadflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(Self::New),
            "enriched" => Ok(Self::Enriched),
            "emailed" => Ok(Self::Emailed),
            "responded" => Ok(Self::Responded),
            "bounced" => Ok(Self::Bounced),
            "blacklisted" => Ok(Self::Blacklisted),
            other => Err(LeadflowError::validation(format!(
                "unknown lead status '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Email history
// ---------------------------------------------------------------------------

/// Kind of email in a lead's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailType {
    Outreach,
    Followup,
}

impl EmailType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outreach => "outreach",
            Self::Followup => "followup",
        }
    }
}

impl std::fmt::Display for EmailType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmailType {
    type Err = LeadflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "outreach" => Ok(Self::Outreach),
            "followup" | "follow-up" => Ok(Self::Followup),
            other => Err(LeadflowError::validation(format!(
                "unknown email type '{other}': expected 'outreach' or 'followup'"
            ))),
        }
    }
}

/// One entry in a lead's email history. A draft has `sent_at == None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailRecord {
    #[serde(rename = "type")]
    pub email_type: EmailType,
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl EmailRecord {
    pub fn is_draft(&self) -> bool {
        self.sent_at.is_none()
    }
}

// ---------------------------------------------------------------------------
// Enrichment payload
// ---------------------------------------------------------------------------

/// Which research subjects an enrichment run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentMode {
    Company,
    Person,
    Both,
}

impl std::str::FromStr for EnrichmentMode {
    type Err = LeadflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "company" => Ok(Self::Company),
            "person" => Ok(Self::Person),
            "both" => Ok(Self::Both),
            other => Err(LeadflowError::validation(format!(
                "unknown enrichment mode '{other}': expected company, person, or both"
            ))),
        }
    }
}

/// Outcome marker stored with the enrichment payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentState {
    Enriched,
    Failed,
}

/// Research data attached to a lead.
///
/// On a failed re-enrichment, previously retrieved `company_research` /
/// `person_research` are kept and only `state`/`error` change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub state: EnrichmentState,
    pub mode: EnrichmentMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_research: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_research: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

impl Enrichment {
    /// Combined research text used as prompt context.
    pub fn text(&self) -> Option<String> {
        match (&self.company_research, &self.person_research) {
            (Some(c), Some(p)) => Some(format!("{c}\n\n{p}")),
            (Some(c), None) => Some(c.clone()),
            (None, Some(p)) => Some(p.clone()),
            (None, None) => None,
        }
    }
}

/// Last transport failure recorded against a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub message: String,
    pub at: DateTime<Utc>,
    pub permanent: bool,
}

// ---------------------------------------------------------------------------
// Lead
// ---------------------------------------------------------------------------

/// A contact tracked within a project. Identity is `(project_id, email)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub project_id: ProjectId,
    /// Normalized (trimmed, lower-cased) email address.
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub company: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_size: Option<u32>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub notes: String,
    pub status: LeadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<Enrichment>,
    #[serde(default)]
    pub email_history: Vec<EmailRecord>,
    #[serde(default)]
    pub followup_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_contacted: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_delivery_error: Option<DeliveryFailure>,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    /// Build a fresh `new` lead from an accepted candidate.
    pub fn from_candidate(project_id: ProjectId, candidate: &RawCandidate, email: String) -> Self {
        Self {
            id: LeadId::new(),
            project_id,
            email,
            name: candidate.name.clone(),
            title: candidate.title.clone(),
            company: candidate.company.clone(),
            company_size: candidate.company_size,
            source: candidate.source.clone().unwrap_or_default(),
            notes: String::new(),
            status: LeadStatus::New,
            enrichment: None,
            email_history: Vec::new(),
            followup_count: 0,
            last_contacted: None,
            last_delivery_error: None,
            created_at: Utc::now(),
        }
    }

    /// Whether a successful enrichment payload is present.
    pub fn is_enriched(&self) -> bool {
        self.enrichment
            .as_ref()
            .is_some_and(|e| e.state == EnrichmentState::Enriched)
    }

    /// Most recent unsent draft of the given type.
    pub fn pending_draft(&self, email_type: EmailType) -> Option<&EmailRecord> {
        self.email_history
            .iter()
            .rev()
            .find(|r| r.email_type == email_type && r.is_draft())
    }

    /// Most recently sent email of any type.
    pub fn last_sent(&self) -> Option<&EmailRecord> {
        self.email_history
            .iter()
            .filter(|r| r.sent_at.is_some())
            .max_by_key(|r| r.sent_at)
    }

    /// First name, used in subject lines.
    pub fn first_name(&self) -> Option<&str> {
        self.name.split_whitespace().next()
    }
}

/// A raw contact returned by the discovery capability, before filtering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub company: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// A named outreach campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// Who the project targets (free text, e.g. an area description).
    #[serde(default)]
    pub targeting: String,
    #[serde(default)]
    pub brief: String,
    #[serde(default)]
    pub email_tone: String,
    #[serde(default)]
    pub followup_strategy: String,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Derived; eventually consistent with the lead table.
    #[serde(default)]
    pub lead_count: u64,
    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ProjectId::new(),
            name: name.into(),
            targeting: String::new(),
            brief: String::new(),
            email_tone: String::new(),
            followup_strategy: String::new(),
            active: true,
            lead_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Reject over-long guidance fields and empty names.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LeadflowError::validation("project name must not be empty"));
        }
        check_len("brief", &self.brief, BRIEF_MAX_CHARS)?;
        check_len("email_tone", &self.email_tone, EMAIL_TONE_MAX_CHARS)?;
        check_len(
            "followup_strategy",
            &self.followup_strategy,
            FOLLOWUP_STRATEGY_MAX_CHARS,
        )?;
        Ok(())
    }
}

fn check_len(field: &str, value: &str, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len > max {
        return Err(LeadflowError::validation(format!(
            "{field} is {len} characters, max {max}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Blacklist & inbound events
// ---------------------------------------------------------------------------

/// Scope of a blacklist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "project_id", rename_all = "snake_case")]
pub enum BlacklistScope {
    Global,
    Project(ProjectId),
}

impl BlacklistScope {
    /// Key used in the blacklist table.
    pub fn storage_key(&self) -> String {
        match self {
            Self::Global => "global".to_string(),
            Self::Project(id) => format!("project:{id}"),
        }
    }
}

/// Explicit signals from outside the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundEventKind {
    Replied,
    Bounced,
    Unsubscribed,
}

impl std::str::FromStr for InboundEventKind {
    type Err = LeadflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "replied" | "reply" => Ok(Self::Replied),
            "bounced" | "bounce" => Ok(Self::Bounced),
            "unsubscribed" | "unsubscribe" => Ok(Self::Unsubscribed),
            other => Err(LeadflowError::validation(format!(
                "unknown inbound event '{other}'"
            ))),
        }
    }
}
