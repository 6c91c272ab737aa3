//! Core pipeline orchestration and domain logic for leadflow.
//!
//! This crate ties together discovery, filtering, enrichment, generation,
//! and scheduled delivery into per-project workflows driven by
//! [`Pipeline`]. External services are reached only through the
//! capability traits, so every stage can run against fakes.

pub mod clock;
pub mod discovery;
pub mod enrichment;
pub mod filter;
pub mod generation;
pub mod lifecycle;
pub mod pipeline;
pub mod resolver;
pub mod retry;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use clock::{Clock, FixedClock, SystemClock};
pub use discovery::SearchOverrides;
pub use enrichment::{EnrichTarget, EnrichmentReport, EnrichmentStatus};
pub use filter::{FilterOutcome, RejectReason};
pub use generation::{EmailDraft, GenerationReport};
pub use lifecycle::{LeadEvent, transition};
pub use pipeline::{
    AddLeadOutcome, Capabilities, DiscoveryReport, LiveCapabilities, Pipeline, ProgressReporter,
    SilentProgress,
};
pub use resolver::{ConfigResolver, EffectiveConfig, ResolvedSection};
pub use scheduler::{DispatchOptions, DispatchOutcome, DispatchReport};
