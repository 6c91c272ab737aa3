//! Shared types, error model, and configuration for leadflow.
//!
//! This crate is the foundation depended on by all other leadflow crates.
//! It provides:
//! - [`LeadflowError`]: the unified error type
//! - Domain types ([`Lead`], [`Project`], [`LeadStatus`], [`EmailRecord`], ids)
//! - Configuration ([`AppConfig`], [`GlobalConfig`], [`ProjectConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ConfigSection, CredentialsConfig, EnrichmentConfig, FilterConfig,
    GenerationConfig, GlobalConfig, JobRolesConfig, ProjectConfig, PromptsConfig,
    RuntimeSettings, SchedulingConfig, SmtpSettings, StorageSettings, config_dir,
    config_file_path, init_config, load_config, load_config_from, read_secret,
};
pub use error::{LeadflowError, Result, classify_status};
pub use types::{
    BlacklistScope, DeliveryFailure, EmailRecord, EmailType, Enrichment, EnrichmentMode,
    EnrichmentState, InboundEventKind, Lead, LeadId, LeadStatus, Project, ProjectId,
    RawCandidate, is_valid_email, normalize_email,
};
