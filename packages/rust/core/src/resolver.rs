//! Configuration resolution: global defaults overridden per project.
//!
//! Each section is taken whole from either the global document or the
//! project document, never merged field by field. A resolver is built per
//! request from the stored documents and dropped afterwards.

use serde::Serialize;

use leadflow_shared::{
    ConfigSection, CredentialsConfig, EnrichmentConfig, FilterConfig, GenerationConfig,
    GlobalConfig, JobRolesConfig, LeadflowError, ProjectConfig, ProjectId, PromptsConfig, Result,
    SchedulingConfig, SmtpSettings,
};
use leadflow_storage::Storage;

/// One resolved section.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "section", content = "value", rename_all = "snake_case")]
pub enum ResolvedSection {
    Filter(FilterConfig),
    JobRoles(JobRolesConfig),
    Enrichment(EnrichmentConfig),
    Generation(GenerationConfig),
    Prompts(PromptsConfig),
    Scheduling(SchedulingConfig),
}

/// Fully resolved settings for one project and one request.
///
/// Sections absent from both documents stay `None` here and surface as a
/// configuration error from the accessor of the stage that needs them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EffectiveConfig {
    pub credentials: Option<CredentialsConfig>,
    pub location: Vec<String>,
    pub filter: Option<FilterConfig>,
    pub job_roles: Option<JobRolesConfig>,
    pub enrichment: Option<EnrichmentConfig>,
    pub generation: Option<GenerationConfig>,
    pub prompts: Option<PromptsConfig>,
    pub scheduling: Option<SchedulingConfig>,
}

fn required<'a, T>(value: Option<&'a T>, section: &str) -> Result<&'a T> {
    value.ok_or_else(|| {
        LeadflowError::config(format!(
            "global configuration has no [{section}] section; import one with `leadflow config import-global`"
        ))
    })
}

impl EffectiveConfig {
    pub fn credentials(&self) -> Result<&CredentialsConfig> {
        required(self.credentials.as_ref(), "credentials")
    }

    pub fn smtp(&self) -> Result<&SmtpSettings> {
        required(self.credentials()?.smtp.as_ref(), "credentials.smtp")
    }

    pub fn filter(&self) -> Result<&FilterConfig> {
        required(self.filter.as_ref(), "filter")
    }

    pub fn job_roles(&self) -> Result<&JobRolesConfig> {
        required(self.job_roles.as_ref(), "job_roles")
    }

    pub fn enrichment(&self) -> Result<&EnrichmentConfig> {
        required(self.enrichment.as_ref(), "enrichment")
    }

    pub fn generation(&self) -> Result<&GenerationConfig> {
        required(self.generation.as_ref(), "generation")
    }

    pub fn prompts(&self) -> Result<&PromptsConfig> {
        required(self.prompts.as_ref(), "prompts")
    }

    pub fn scheduling(&self) -> Result<&SchedulingConfig> {
        required(self.scheduling.as_ref(), "scheduling")
    }
}

/// Pick the global or the project value of one section.
fn pick<T: Clone>(
    section: ConfigSection,
    project: &ProjectConfig,
    global_value: Option<&T>,
    project_value: Option<&T>,
) -> Result<Option<T>> {
    if project.uses_global(section) {
        return Ok(global_value.cloned());
    }
    match project_value {
        Some(value) => Ok(Some(value.clone())),
        None => Err(LeadflowError::config(format!(
            "project overrides [{section}] (use_global_{section} = false) but defines no [{section}] section"
        ))),
    }
}

/// Resolve every section for a project.
pub fn resolve(global: &GlobalConfig, project: &ProjectConfig) -> Result<EffectiveConfig> {
    Ok(EffectiveConfig {
        credentials: global.credentials.clone(),
        location: project.location.clone(),
        filter: pick(
            ConfigSection::Filter,
            project,
            global.filter.as_ref(),
            project.filter.as_ref(),
        )?,
        job_roles: pick(
            ConfigSection::JobRoles,
            project,
            global.job_roles.as_ref(),
            project.job_roles.as_ref(),
        )?,
        enrichment: pick(
            ConfigSection::Enrichment,
            project,
            global.enrichment.as_ref(),
            project.enrichment.as_ref(),
        )?,
        generation: pick(
            ConfigSection::Generation,
            project,
            global.generation.as_ref(),
            project.generation.as_ref(),
        )?,
        prompts: pick(
            ConfigSection::Prompts,
            project,
            global.prompts.as_ref(),
            project.prompts.as_ref(),
        )?,
        scheduling: pick(
            ConfigSection::Scheduling,
            project,
            global.scheduling.as_ref(),
            project.scheduling.as_ref(),
        )?,
    })
}

/// Resolve a single section. A section missing after resolution is a
/// configuration error.
pub fn resolve_section(
    global: &GlobalConfig,
    project: &ProjectConfig,
    section: ConfigSection,
) -> Result<ResolvedSection> {
    let effective = resolve(global, project)?;
    Ok(match section {
        ConfigSection::Filter => ResolvedSection::Filter(effective.filter()?.clone()),
        ConfigSection::JobRoles => ResolvedSection::JobRoles(effective.job_roles()?.clone()),
        ConfigSection::Enrichment => ResolvedSection::Enrichment(effective.enrichment()?.clone()),
        ConfigSection::Generation => ResolvedSection::Generation(effective.generation()?.clone()),
        ConfigSection::Prompts => ResolvedSection::Prompts(effective.prompts()?.clone()),
        ConfigSection::Scheduling => ResolvedSection::Scheduling(effective.scheduling()?.clone()),
    })
}

/// Request-scoped view over the stored configuration documents.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    global: GlobalConfig,
    project: ProjectConfig,
}

impl ConfigResolver {
    pub fn new(global: GlobalConfig, project: ProjectConfig) -> Self {
        Self { global, project }
    }

    /// Read and validate both documents. A missing project document means
    /// "use global for everything".
    pub async fn load(storage: &Storage, project_id: ProjectId) -> Result<Self> {
        let global = storage.get_global_config().await?.unwrap_or_default();
        let project = storage
            .get_project_config(project_id)
            .await?
            .unwrap_or_default();
        Ok(Self::new(global, project))
    }

    pub fn effective(&self) -> Result<EffectiveConfig> {
        resolve(&self.global, &self.project)
    }

    pub fn section(&self, section: ConfigSection) -> Result<ResolvedSection> {
        resolve_section(&self.global, &self.project, section)
    }
}
