//! Deduplication and filtering of raw discovery candidates.
//!
//! [`filter`] is a pure function of the candidate batch, a snapshot of what
//! the project already holds, and the effective filter settings. Running it
//! again over the same inputs yields the same accepted set, so a retried
//! discovery call can never create duplicate leads.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use leadflow_shared::{FilterConfig, Lead, RawCandidate, is_valid_email, normalize_email};

/// Role and no-reply mailbox prefixes.
const ROLE_PREFIXES: &[&str] = &[
    "info@",
    "contact@",
    "support@",
    "help@",
    "sales@",
    "admin@",
    "webmaster@",
    "postmaster@",
    "noreply@",
    "no-reply@",
    "donotreply@",
    "marketing@",
];

const DISPOSABLE_DOMAINS: &[&str] = &[
    "10minutemail.com",
    "guerrillamail.com",
    "tempmail.org",
    "mailinator.com",
    "dispostable.com",
];

const PLACEHOLDER_NAMES: &[&str] = &["test", "demo", "sample", "example", "admin", "user"];

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Why a candidate was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingEmail,
    InvalidEmail,
    LowQuality,
    DuplicateLead,
    Blacklisted,
    DuplicateCompany,
    CompanyAlreadyContacted,
    CompanySizeOutOfRange,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingEmail => "missing_email",
            Self::InvalidEmail => "invalid_email",
            Self::LowQuality => "low_quality",
            Self::DuplicateLead => "duplicate_lead",
            Self::Blacklisted => "blacklisted",
            Self::DuplicateCompany => "duplicate_company",
            Self::CompanyAlreadyContacted => "company_already_contacted",
            Self::CompanySizeOutOfRange => "company_size_out_of_range",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate that passed every rule, with cleaned fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accepted {
    pub candidate: RawCandidate,
    /// Normalized email, when the candidate had one.
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejected {
    pub candidate: RawCandidate,
    pub reason: RejectReason,
}

/// Every input candidate lands in exactly one of the two lists, in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterOutcome {
    pub accepted: Vec<Accepted>,
    pub rejected: Vec<Rejected>,
}

// ---------------------------------------------------------------------------
// Existing-state snapshot
// ---------------------------------------------------------------------------

/// What the project already holds, captured once per filter run.
#[derive(Debug, Clone, Default)]
pub struct ExistingSnapshot {
    emails: HashSet<String>,
    companies: HashSet<String>,
    blacklist: HashSet<String>,
}

impl ExistingSnapshot {
    pub fn new<'a>(leads: impl IntoIterator<Item = &'a Lead>, blacklist: HashSet<String>) -> Self {
        let mut emails = HashSet::new();
        let mut companies = HashSet::new();
        for lead in leads {
            emails.insert(normalize_email(&lead.email));
            let key = normalize_company(&lead.company);
            if !key.is_empty() {
                companies.insert(key);
            }
        }
        Self {
            emails,
            companies,
            blacklist,
        }
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Company key for the one-person-per-company rule.
pub fn normalize_company(name: &str) -> String {
    static SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(.+?),?\s+(?:inc|corp|corporation|llc|ltd|limited|co|company)\.?$")
            .expect("valid regex")
    });

    let lowered = name.trim().to_lowercase();
    let without_prefix = lowered.strip_prefix("the ").unwrap_or(&lowered).trim();
    match SUFFIX_RE.captures(without_prefix) {
        Some(caps) => caps[1].trim().to_string(),
        None => without_prefix.to_string(),
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clean(candidate: &RawCandidate) -> RawCandidate {
    RawCandidate {
        name: collapse_whitespace(&candidate.name),
        title: candidate
            .title
            .as_deref()
            .map(collapse_whitespace)
            .filter(|t| !t.is_empty()),
        company: candidate.company.trim().to_string(),
        email: candidate
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(String::from),
        company_size: candidate.company_size,
        source: candidate.source.clone(),
    }
}

fn is_low_quality(email: &str, name: &str) -> bool {
    if ROLE_PREFIXES.iter().any(|p| email.starts_with(p)) {
        return true;
    }
    let domain = email.rsplit_once('@').map(|(_, d)| d).unwrap_or("");
    if DISPOSABLE_DOMAINS.contains(&domain) {
        return true;
    }
    if name.is_empty() {
        return false;
    }
    let chars = name.chars().count();
    if chars < 2 || PLACEHOLDER_NAMES.contains(&name.to_lowercase().as_str()) {
        return true;
    }
    // single short token, e.g. "Al"
    !name.contains(' ') && chars < 3
}

fn size_out_of_range(size: Option<u32>, config: &FilterConfig) -> bool {
    let Some(size) = size else {
        return false;
    };
    config.min_company_size.is_some_and(|min| size < min)
        || config.max_company_size.is_some_and(|max| size > max)
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Filter a candidate batch against the existing snapshot.
///
/// Rules, in order: email presence and syntax, quality, existing leads and
/// duplicates within the batch, blacklist, company-size bounds, one person
/// per company. A company slot is claimed only by a candidate that passes
/// every other rule, so the first acceptable record per company wins.
pub fn filter(
    candidates: &[RawCandidate],
    snapshot: &ExistingSnapshot,
    config: &FilterConfig,
) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();
    let mut seen_emails: HashSet<String> = HashSet::new();
    let mut seen_companies: HashSet<String> = HashSet::new();

    for raw in candidates {
        let candidate = clean(raw);
        let email = candidate.email.as_deref().map(normalize_email);

        match check(&candidate, email.as_deref(), snapshot, config, &seen_emails, &seen_companies) {
            Some(reason) => {
                debug!(
                    email = email.as_deref().unwrap_or(""),
                    company = %candidate.company,
                    %reason,
                    "candidate rejected"
                );
                outcome.rejected.push(Rejected { candidate, reason });
            }
            None => {
                if let Some(email) = &email {
                    seen_emails.insert(email.clone());
                }
                if config.one_person_per_company {
                    let key = normalize_company(&candidate.company);
                    if !key.is_empty() {
                        seen_companies.insert(key);
                    }
                }
                outcome.accepted.push(Accepted { candidate, email });
            }
        }
    }

    outcome
}

fn check(
    candidate: &RawCandidate,
    email: Option<&str>,
    snapshot: &ExistingSnapshot,
    config: &FilterConfig,
    seen_emails: &HashSet<String>,
    seen_companies: &HashSet<String>,
) -> Option<RejectReason> {
    match email {
        None if config.require_email => return Some(RejectReason::MissingEmail),
        None => {}
        Some(email) => {
            if !is_valid_email(email) {
                return Some(RejectReason::InvalidEmail);
            }
            if config.exclude_role_addresses && is_low_quality(email, &candidate.name) {
                return Some(RejectReason::LowQuality);
            }
            if snapshot.emails.contains(email) || seen_emails.contains(email) {
                return Some(RejectReason::DuplicateLead);
            }
            // The blacklist always applies, whatever `exclude_blacklisted` says.
            if snapshot.blacklist.contains(email) {
                return Some(RejectReason::Blacklisted);
            }
        }
    }

    if size_out_of_range(candidate.company_size, config) {
        return Some(RejectReason::CompanySizeOutOfRange);
    }

    if config.one_person_per_company {
        let key = normalize_company(&candidate.company);
        if !key.is_empty() {
            if snapshot.companies.contains(&key) {
                return Some(RejectReason::CompanyAlreadyContacted);
            }
            if seen_companies.contains(&key) {
                return Some(RejectReason::DuplicateCompany);
            }
        }
    }

    None
}
