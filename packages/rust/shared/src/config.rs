//! Configuration for leadflow.
//!
//! Two layers live here:
//!
//! - [`AppConfig`]: local tool settings at `~/.leadflow/leadflow.toml`
//!   (database location, lock TTL, worker limits). CLI flags override it.
//! - [`GlobalConfig`] / [`ProjectConfig`]: pipeline configuration documents
//!   held in the document store. A project either uses the global value of a
//!   section or replaces it wholesale; resolution lives in `leadflow_core`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LeadflowError, Result};
use crate::types::is_valid_email;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "leadflow.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".leadflow";

// ---------------------------------------------------------------------------
// AppConfig (leadflow.toml)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub runtime: RuntimeSettings,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Path to the libSQL database file. `~` expands to the home directory.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "~/.leadflow/leadflow.db".into()
}

/// `[runtime]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// How long a per-lead in-flight lock is honoured before it is considered stale.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Upper bound on concurrent per-lead workers for batch stages.
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Timeout for HTTP capability clients.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            lock_ttl_secs: default_lock_ttl_secs(),
            worker_concurrency: default_worker_concurrency(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_lock_ttl_secs() -> u64 {
    900
}
fn default_worker_concurrency() -> usize {
    4
}
fn default_request_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    /// Database path with a leading `~` expanded.
    pub fn database_path(&self) -> Result<PathBuf> {
        expand_home(&self.storage.database_path)
    }
}

fn expand_home(raw: &str) -> Result<PathBuf> {
    if let Some(rest) = raw.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| LeadflowError::config("could not determine home directory"))?;
        return Ok(home.join(rest));
    }
    Ok(PathBuf::from(raw))
}

/// Get the path to the config directory (`~/.leadflow/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LeadflowError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.leadflow/leadflow.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LeadflowError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| LeadflowError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LeadflowError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| LeadflowError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LeadflowError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a secret from the environment variable named in a config document.
///
/// Documents only ever carry the variable name; the value is never stored.
pub fn read_secret(var_name: &str, what: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(LeadflowError::config(format!(
            "{what} not found. Set the {var_name} environment variable."
        ))),
    }
}

// ---------------------------------------------------------------------------
// Pipeline configuration sections
// ---------------------------------------------------------------------------

/// Overridable sections of the pipeline configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSection {
    Filter,
    JobRoles,
    Enrichment,
    Generation,
    Prompts,
    Scheduling,
}

impl ConfigSection {
    pub const ALL: [ConfigSection; 6] = [
        Self::Filter,
        Self::JobRoles,
        Self::Enrichment,
        Self::Generation,
        Self::Prompts,
        Self::Scheduling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::JobRoles => "job_roles",
            Self::Enrichment => "enrichment",
            Self::Generation => "generation",
            Self::Prompts => "prompts",
            Self::Scheduling => "scheduling",
        }
    }
}

impl std::fmt::Display for ConfigSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `[credentials]`: env-var names and endpoints for the external capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_discovery_key_env")]
    pub discovery_api_key_env: String,
    #[serde(default = "default_discovery_base_url")]
    pub discovery_base_url: String,

    #[serde(default = "default_research_key_env")]
    pub research_api_key_env: String,
    #[serde(default = "default_research_base_url")]
    pub research_base_url: String,
    #[serde(default = "default_research_model")]
    pub research_model: String,

    #[serde(default = "default_generation_key_env")]
    pub generation_api_key_env: String,
    #[serde(default = "default_generation_base_url")]
    pub generation_base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp: Option<SmtpSettings>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            discovery_api_key_env: default_discovery_key_env(),
            discovery_base_url: default_discovery_base_url(),
            research_api_key_env: default_research_key_env(),
            research_base_url: default_research_base_url(),
            research_model: default_research_model(),
            generation_api_key_env: default_generation_key_env(),
            generation_base_url: default_generation_base_url(),
            smtp: None,
        }
    }
}

fn default_discovery_key_env() -> String {
    "LEADFLOW_DISCOVERY_API_KEY".into()
}
fn default_discovery_base_url() -> String {
    "https://api.apollo.io/api/v1".into()
}
fn default_research_key_env() -> String {
    "LEADFLOW_RESEARCH_API_KEY".into()
}
fn default_research_base_url() -> String {
    "https://api.perplexity.ai".into()
}
fn default_research_model() -> String {
    "sonar".into()
}
fn default_generation_key_env() -> String {
    "LEADFLOW_GENERATION_API_KEY".into()
}
fn default_generation_base_url() -> String {
    "https://api.openai.com/v1".into()
}

/// SMTP transport settings. The password is read from `password_env`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmtpSettings {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Implicit TLS (port 465). When false, STARTTLS is required.
    #[serde(default)]
    pub secure: bool,
    pub username: String,
    #[serde(default = "default_smtp_password_env")]
    pub password_env: String,
    pub from_email: String,
    #[serde(default)]
    pub from_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".into()
}
fn default_smtp_port() -> u16 {
    587
}
fn default_smtp_password_env() -> String {
    "LEADFLOW_SMTP_PASSWORD".into()
}

impl SmtpSettings {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() || self.username.trim().is_empty() {
            return Err(LeadflowError::config("smtp host and username are required"));
        }
        if !is_valid_email(&self.from_email) {
            return Err(LeadflowError::config(format!(
                "smtp from_email '{}' is not a valid address",
                self.from_email
            )));
        }
        if let Some(reply_to) = &self.reply_to {
            if !is_valid_email(reply_to) {
                return Err(LeadflowError::config(format!(
                    "smtp reply_to '{reply_to}' is not a valid address"
                )));
            }
        }
        Ok(())
    }
}

/// `[filter]`: candidate filtering rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_true")]
    pub require_email: bool,
    #[serde(default = "default_true")]
    pub one_person_per_company: bool,
    #[serde(default = "default_true")]
    pub exclude_blacklisted: bool,
    /// Reject role mailboxes, disposable domains and placeholder names.
    #[serde(default = "default_true")]
    pub exclude_role_addresses: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_company_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_company_size: Option<u32>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            require_email: true,
            one_person_per_company: true,
            exclude_blacklisted: true,
            exclude_role_addresses: true,
            min_company_size: None,
            max_company_size: None,
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<()> {
        if let (Some(min), Some(max)) = (self.min_company_size, self.max_company_size) {
            if min > max {
                return Err(LeadflowError::config(format!(
                    "filter.min_company_size ({min}) exceeds max_company_size ({max})"
                )));
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

/// `[job_roles]`: titles passed to the discovery capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRolesConfig {
    #[serde(default = "default_target_roles")]
    pub target_roles: Vec<String>,
    #[serde(default)]
    pub custom_roles: Vec<String>,
}

impl Default for JobRolesConfig {
    fn default() -> Self {
        Self {
            target_roles: default_target_roles(),
            custom_roles: Vec::new(),
        }
    }
}

fn default_target_roles() -> Vec<String> {
    [
        "Human Resources",
        "Office Manager",
        "Secretary",
        "Assistant",
        "Assistant Manager",
        "Manager",
        "Social Media",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl JobRolesConfig {
    /// Target and custom roles, in that order, without blanks.
    pub fn all_roles(&self) -> Vec<String> {
        self.target_roles
            .iter()
            .chain(&self.custom_roles)
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.all_roles().is_empty() {
            return Err(LeadflowError::config("job_roles must name at least one role"));
        }
        Ok(())
    }
}

/// `[enrichment]`: research capability parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Total attempts per lead, including the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_enrichment_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_company_template")]
    pub company_template: String,
    #[serde(default = "default_person_template")]
    pub person_template: String,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: default_max_retries(),
            timeout_seconds: default_timeout_seconds(),
            backoff_base_ms: default_backoff_base_ms(),
            concurrency: default_enrichment_concurrency(),
            company_template: default_company_template(),
            person_template: default_person_template(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_timeout_seconds() -> u64 {
    30
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_enrichment_concurrency() -> usize {
    4
}

fn default_company_template() -> String {
    "Research the following company for a business outreach email:\n\n\
     Company: {company}\n\n\
     Please provide:\n\
     1. Brief company overview and recent news\n\
     2. Any recent achievements or initiatives\n\
     3. Relevant industry trends affecting them\n\n\
     Keep the response concise and professional."
        .into()
}

fn default_person_template() -> String {
    "Research the following person for a business outreach email:\n\n\
     Person: {name} ({title})\n\
     Company: {company}\n\n\
     Please provide:\n\
     1. The person's background and role\n\
     2. Any recent achievements or public activity\n\n\
     Keep the response concise and professional."
        .into()
}

impl EnrichmentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(LeadflowError::config("enrichment.max_retries must be >= 1"));
        }
        if self.timeout_seconds == 0 {
            return Err(LeadflowError::config("enrichment.timeout_seconds must be >= 1"));
        }
        if self.concurrency == 0 {
            return Err(LeadflowError::config("enrichment.concurrency must be >= 1"));
        }
        for (name, template) in [
            ("company_template", &self.company_template),
            ("person_template", &self.person_template),
        ] {
            if !template.contains("{company}") {
                return Err(LeadflowError::config(format!(
                    "enrichment.{name} must contain the {{company}} placeholder"
                )));
            }
        }
        Ok(())
    }
}

/// `[generation]`: text-generation capability parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_generation_model() -> String {
    "gpt-4".into()
}
fn default_max_tokens() -> u32 {
    500
}
fn default_temperature() -> f32 {
    0.7
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(LeadflowError::config("generation.model must not be empty"));
        }
        if self.max_tokens == 0 {
            return Err(LeadflowError::config("generation.max_tokens must be >= 1"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(LeadflowError::config(format!(
                "generation.temperature {} is outside 0..=2",
                self.temperature
            )));
        }
        if self.timeout_seconds == 0 || self.max_retries == 0 {
            return Err(LeadflowError::config(
                "generation.timeout_seconds and max_retries must be >= 1",
            ));
        }
        Ok(())
    }
}

/// `[prompts]`: templates for the generation capability.
///
/// Placeholders: `{project_name}`, `{project_description}`, `{name}`,
/// `{company}`, `{title}`, `{enrichment_data}`, `{email_considerations}`,
/// and for follow-ups `{days_ago}`, `{original_email}`,
/// `{followup_considerations}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptsConfig {
    #[serde(default = "default_outreach_prompt")]
    pub outreach_prompt: String,
    #[serde(default = "default_followup_prompt")]
    pub followup_prompt: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            outreach_prompt: default_outreach_prompt(),
            followup_prompt: default_followup_prompt(),
        }
    }
}

fn default_outreach_prompt() -> String {
    "You are writing a professional outreach email for a business proposal.\n\n\
     Context:\n\
     - Project: {project_name}\n\
     - Project Description: {project_description}\n\
     - Target: {name} at {company}\n\
     - Research: {enrichment_data}\n\
     - Tone: {email_considerations}\n\n\
     Write a personalized, concise email (under 150 words) with a clear value \
     proposition and one specific call to action. Use the research naturally.\n\n\
     Start with a line \"Subject: ...\" followed by the email body."
        .into()
}

fn default_followup_prompt() -> String {
    "You are writing a follow-up email for a business proposal.\n\n\
     Context:\n\
     - Previous email sent {days_ago} days ago\n\
     - Project: {project_name}\n\
     - Target: {name} at {company}\n\
     - Original email: {original_email}\n\
     - Follow-up strategy: {followup_considerations}\n\n\
     Write a brief follow-up (under 100 words) that acknowledges the previous \
     email, adds a new angle, and ends with a clear call to action.\n\n\
     Start with a line \"Subject: ...\" followed by the email body."
        .into()
}

impl PromptsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.outreach_prompt.trim().is_empty() || self.followup_prompt.trim().is_empty() {
            return Err(LeadflowError::config("prompts must not be empty"));
        }
        Ok(())
    }
}

/// `[scheduling]`: quotas, windows and follow-up cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingConfig {
    #[serde(default = "default_followup_delay_days")]
    pub followup_delay_days: u32,
    #[serde(default = "default_max_followups")]
    pub max_followups: u32,
    #[serde(default = "default_daily_email_limit")]
    pub daily_email_limit: u32,
    #[serde(default = "default_rate_limit_delay_seconds")]
    pub rate_limit_delay_seconds: u64,
    /// Inclusive start hour, local time.
    #[serde(default = "default_working_hours_start")]
    pub working_hours_start: u32,
    /// Exclusive end hour, local time.
    #[serde(default = "default_working_hours_end")]
    pub working_hours_end: u32,
    /// 0 = Monday .. 6 = Sunday.
    #[serde(default = "default_working_days")]
    pub working_days: Vec<u8>,
    /// IANA timezone name.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Delay before a lead whose send failed becomes eligible again.
    #[serde(default = "default_retry_after_minutes")]
    pub retry_after_minutes: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            followup_delay_days: default_followup_delay_days(),
            max_followups: default_max_followups(),
            daily_email_limit: default_daily_email_limit(),
            rate_limit_delay_seconds: default_rate_limit_delay_seconds(),
            working_hours_start: default_working_hours_start(),
            working_hours_end: default_working_hours_end(),
            working_days: default_working_days(),
            timezone: default_timezone(),
            retry_after_minutes: default_retry_after_minutes(),
        }
    }
}

fn default_followup_delay_days() -> u32 {
    7
}
fn default_max_followups() -> u32 {
    3
}
fn default_daily_email_limit() -> u32 {
    50
}
fn default_rate_limit_delay_seconds() -> u64 {
    60
}
fn default_working_hours_start() -> u32 {
    9
}
fn default_working_hours_end() -> u32 {
    17
}
fn default_working_days() -> Vec<u8> {
    vec![0, 1, 2, 3, 4]
}
fn default_timezone() -> String {
    "UTC".into()
}
fn default_retry_after_minutes() -> u32 {
    60
}

impl SchedulingConfig {
    /// Parsed timezone.
    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone.parse::<chrono_tz::Tz>().map_err(|_| {
            LeadflowError::config(format!(
                "scheduling.timezone '{}' is not a known IANA timezone",
                self.timezone
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.followup_delay_days == 0 {
            return Err(LeadflowError::config(
                "scheduling.followup_delay_days must be >= 1",
            ));
        }
        if self.daily_email_limit == 0 {
            return Err(LeadflowError::config(
                "scheduling.daily_email_limit must be >= 1",
            ));
        }
        if self.working_hours_start >= self.working_hours_end || self.working_hours_end > 24 {
            return Err(LeadflowError::config(format!(
                "scheduling working hours [{}, {}) are not a valid window",
                self.working_hours_start, self.working_hours_end
            )));
        }
        if let Some(day) = self.working_days.iter().find(|d| **d > 6) {
            return Err(LeadflowError::config(format!(
                "scheduling.working_days contains {day}; expected 0 (Monday) to 6 (Sunday)"
            )));
        }
        self.tz()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// Global defaults document. Every section is optional in storage; a stage
/// that needs a missing section fails with a configuration error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_roles: Option<JobRolesConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<SchedulingConfig>,
}

impl GlobalConfig {
    /// A document with every section populated from defaults.
    pub fn with_defaults() -> Self {
        Self {
            credentials: Some(CredentialsConfig::default()),
            filter: Some(FilterConfig::default()),
            job_roles: Some(JobRolesConfig::default()),
            enrichment: Some(EnrichmentConfig::default()),
            generation: Some(GenerationConfig::default()),
            prompts: Some(PromptsConfig::default()),
            scheduling: Some(SchedulingConfig::default()),
        }
    }

    /// Validate every section that is present.
    pub fn validate(&self) -> Result<()> {
        if let Some(smtp) = self.credentials.as_ref().and_then(|c| c.smtp.as_ref()) {
            smtp.validate()?;
        }
        validate_sections(
            self.filter.as_ref(),
            self.job_roles.as_ref(),
            self.enrichment.as_ref(),
            self.generation.as_ref(),
            self.prompts.as_ref(),
            self.scheduling.as_ref(),
        )
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| LeadflowError::config(format!("invalid global config: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

/// Per-project overrides. A `use_global_*` flag that is absent counts as true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Location filters passed to discovery.
    #[serde(default)]
    pub location: Vec<String>,

    #[serde(default = "default_true")]
    pub use_global_filter: bool,
    #[serde(default = "default_true")]
    pub use_global_job_roles: bool,
    #[serde(default = "default_true")]
    pub use_global_enrichment: bool,
    #[serde(default = "default_true")]
    pub use_global_generation: bool,
    #[serde(default = "default_true")]
    pub use_global_prompts: bool,
    #[serde(default = "default_true")]
    pub use_global_scheduling: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_roles: Option<JobRolesConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<SchedulingConfig>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            location: Vec::new(),
            use_global_filter: true,
            use_global_job_roles: true,
            use_global_enrichment: true,
            use_global_generation: true,
            use_global_prompts: true,
            use_global_scheduling: true,
            filter: None,
            job_roles: None,
            enrichment: None,
            generation: None,
            prompts: None,
            scheduling: None,
        }
    }
}

impl ProjectConfig {
    /// Whether the project defers to the global value of `section`.
    pub fn uses_global(&self, section: ConfigSection) -> bool {
        match section {
            ConfigSection::Filter => self.use_global_filter,
            ConfigSection::JobRoles => self.use_global_job_roles,
            ConfigSection::Enrichment => self.use_global_enrichment,
            ConfigSection::Generation => self.use_global_generation,
            ConfigSection::Prompts => self.use_global_prompts,
            ConfigSection::Scheduling => self.use_global_scheduling,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_sections(
            self.filter.as_ref(),
            self.job_roles.as_ref(),
            self.enrichment.as_ref(),
            self.generation.as_ref(),
            self.prompts.as_ref(),
            self.scheduling.as_ref(),
        )
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| LeadflowError::config(format!("invalid project config: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

fn validate_sections(
    filter: Option<&FilterConfig>,
    job_roles: Option<&JobRolesConfig>,
    enrichment: Option<&EnrichmentConfig>,
    generation: Option<&GenerationConfig>,
    prompts: Option<&PromptsConfig>,
    scheduling: Option<&SchedulingConfig>,
) -> Result<()> {
    if let Some(s) = filter {
        s.validate()?;
    }
    if let Some(s) = job_roles {
        s.validate()?;
    }
    if let Some(s) = enrichment {
        s.validate()?;
    }
    if let Some(s) = generation {
        s.validate()?;
    }
    if let Some(s) = prompts {
        s.validate()?;
    }
    if let Some(s) = scheduling {
        s.validate()?;
    }
    Ok(())
}
