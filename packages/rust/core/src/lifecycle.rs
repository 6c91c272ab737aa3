//! Lead lifecycle.
//!
//! ```text
//! new ──► enriched ──► emailed ──► responded | bounced
//!  └───────────────────►┘
//! any non-terminal ──► blacklisted
//! ```
//!
//! `responded`, `bounced`, and `blacklisted` are only reached from explicit
//! signals, never from timing.

use serde::Serialize;

use leadflow_shared::{EmailType, InboundEventKind, LeadStatus, LeadflowError, Result};

/// Something that happened to a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadEvent {
    EnrichmentSucceeded,
    Sent(EmailType),
    Replied,
    Bounced,
    Blacklisted,
}

impl From<InboundEventKind> for LeadEvent {
    fn from(kind: InboundEventKind) -> Self {
        match kind {
            InboundEventKind::Replied => Self::Replied,
            InboundEventKind::Bounced => Self::Bounced,
            InboundEventKind::Unsubscribed => Self::Blacklisted,
        }
    }
}

impl std::fmt::Display for LeadEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EnrichmentSucceeded => f.write_str("enrichment succeeded"),
            Self::Sent(t) => write!(f, "{} sent", t.as_str()),
            Self::Replied => f.write_str("reply received"),
            Self::Bounced => f.write_str("bounce received"),
            Self::Blacklisted => f.write_str("blacklisted"),
        }
    }
}

/// Next status for `status` after `event`, or a `Validation` error when the
/// move is not allowed.
pub fn transition(status: LeadStatus, event: LeadEvent) -> Result<LeadStatus> {
    use LeadStatus::*;

    let next = match (status, event) {
        // repeat signal on an already blacklisted lead
        (Blacklisted, LeadEvent::Blacklisted) => Some(Blacklisted),
        (Responded | Bounced | Blacklisted, _) => None,

        (New | Enriched, LeadEvent::EnrichmentSucceeded) => Some(Enriched),
        // re-enrichment never moves a contacted lead backwards
        (Emailed, LeadEvent::EnrichmentSucceeded) => Some(Emailed),

        (New | Enriched | Emailed, LeadEvent::Sent(EmailType::Outreach)) => Some(Emailed),
        (Emailed, LeadEvent::Sent(EmailType::Followup)) => Some(Emailed),
        (_, LeadEvent::Sent(EmailType::Followup)) => None,

        (_, LeadEvent::Replied) => Some(Responded),
        (_, LeadEvent::Bounced) => Some(Bounced),
        (_, LeadEvent::Blacklisted) => Some(Blacklisted),
    };

    next.ok_or_else(|| {
        LeadflowError::validation(format!("lead is {status}; cannot apply '{event}'"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use LeadStatus::*;

    #[test]
    fn happy_path() {
        let s = transition(New, LeadEvent::EnrichmentSucceeded).unwrap();
        assert_eq!(s, Enriched);
        let s = transition(s, LeadEvent::Sent(EmailType::Outreach)).unwrap();
        assert_eq!(s, Emailed);
        let s = transition(s, LeadEvent::Sent(EmailType::Followup)).unwrap();
        assert_eq!(s, Emailed);
        assert_eq!(transition(s, LeadEvent::Replied).unwrap(), Responded);
    }

    #[test]
    fn enrichment_is_optional() {
        assert_eq!(
            transition(New, LeadEvent::Sent(EmailType::Outreach)).unwrap(),
            Emailed
        );
    }

    #[test]
    fn followup_requires_prior_contact() {
        assert!(transition(New, LeadEvent::Sent(EmailType::Followup)).is_err());
        assert!(transition(Enriched, LeadEvent::Sent(EmailType::Followup)).is_err());
    }

    #[test]
    fn re_enrichment_does_not_regress() {
        assert_eq!(
            transition(Emailed, LeadEvent::EnrichmentSucceeded).unwrap(),
            Emailed
        );
    }

    #[test]
    fn blacklist_from_any_non_terminal() {
        for s in [New, Enriched, Emailed] {
            assert_eq!(transition(s, LeadEvent::Blacklisted).unwrap(), Blacklisted);
        }
        assert_eq!(
            transition(Blacklisted, LeadEvent::Blacklisted).unwrap(),
            Blacklisted
        );
    }

    #[test]
    fn terminal_states_reject_everything_else() {
        for s in [Responded, Bounced, Blacklisted] {
            for e in [
                LeadEvent::EnrichmentSucceeded,
                LeadEvent::Sent(EmailType::Outreach),
                LeadEvent::Sent(EmailType::Followup),
                LeadEvent::Replied,
                LeadEvent::Bounced,
            ] {
                let err = transition(s, e).unwrap_err();
                assert!(matches!(err, LeadflowError::Validation { .. }), "{s} {e}");
            }
        }
        assert!(transition(Responded, LeadEvent::Blacklisted).is_err());
    }

    #[test]
    fn inbound_kinds_map_to_events() {
        assert_eq!(LeadEvent::from(InboundEventKind::Replied), LeadEvent::Replied);
        assert_eq!(LeadEvent::from(InboundEventKind::Bounced), LeadEvent::Bounced);
        assert_eq!(
            LeadEvent::from(InboundEventKind::Unsubscribed),
            LeadEvent::Blacklisted
        );
    }
}
