//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use leadflow_core::{
    AddLeadOutcome, ConfigResolver, DispatchOptions, EnrichTarget, LiveCapabilities, Pipeline,
    ProgressReporter, SearchOverrides,
};
use leadflow_shared::{
    AppConfig, BlacklistScope, ConfigSection, EmailType, EnrichmentMode, GlobalConfig,
    InboundEventKind, LeadId, LeadStatus, LeadflowError, Project, ProjectConfig, RawCandidate,
    init_config, load_config, load_config_from,
};
use leadflow_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// leadflow: discover, enrich, and contact B2B leads on a schedule.
#[derive(Parser)]
#[command(
    name = "leadflow",
    version,
    about = "Discover, enrich, and email B2B leads per project.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Path to leadflow.toml (defaults to ~/.leadflow/leadflow.toml).
    #[arg(long, global = true, env = "LEADFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum TypeArg {
    Outreach,
    Followup,
}

impl From<TypeArg> for EmailType {
    fn from(arg: TypeArg) -> Self {
        match arg {
            TypeArg::Outreach => EmailType::Outreach,
            TypeArg::Followup => EmailType::Followup,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum ModeArg {
    Company,
    Person,
    Both,
}

impl From<ModeArg> for EnrichmentMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Company => EnrichmentMode::Company,
            ModeArg::Person => EnrichmentMode::Person,
            ModeArg::Both => EnrichmentMode::Both,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Find new contacts for a project and store the ones that pass the filter.
    Discover {
        /// Project id or name.
        project: String,

        /// How many contacts to request.
        #[arg(short, long, default_value = "25")]
        count: u32,

        /// Replace the configured job roles for this run (repeatable).
        #[arg(long)]
        role: Vec<String>,

        /// Replace the project's locations for this run (repeatable).
        #[arg(long)]
        location: Vec<String>,

        /// First result page to request.
        #[arg(long)]
        start_page: Option<u32>,
    },

    /// Run the filter over candidates from a JSON file without storing anything.
    Filter {
        /// Project id or name.
        project: String,

        /// JSON array of candidates (`name`, `email`, `company`, ...).
        #[arg(long)]
        input: PathBuf,
    },

    /// Research leads' companies and/or people.
    Enrich {
        /// Project id or name.
        project: String,

        /// Specific lead ids (repeatable). Defaults to every unenriched lead.
        #[arg(long = "lead")]
        leads: Vec<String>,

        /// What to research.
        #[arg(long, value_enum, default_value = "company")]
        mode: ModeArg,

        /// Re-run research for leads that are already enriched.
        #[arg(long)]
        force: bool,

        /// Print enrichment coverage instead of running research.
        #[arg(long, conflicts_with_all = ["leads", "force"])]
        status: bool,
    },

    /// Draft emails for leads.
    Generate {
        /// Project id or name.
        project: String,

        /// Specific lead ids (repeatable). Defaults to every lead needing a draft.
        #[arg(long = "lead")]
        leads: Vec<String>,

        #[arg(long = "type", value_enum, default_value = "outreach")]
        email_type: TypeArg,

        /// File whose contents replace the configured prompt for this run.
        #[arg(long)]
        prompt_file: Option<PathBuf>,
    },

    /// Generate one email and print it without saving.
    Preview {
        /// Project id or name.
        project: String,

        /// Lead id.
        lead: String,

        #[arg(long = "type", value_enum, default_value = "outreach")]
        email_type: TypeArg,

        #[arg(long)]
        prompt_file: Option<PathBuf>,
    },

    /// Send due emails within the project's working hours and daily limit.
    Dispatch {
        /// Project id or name.
        project: String,

        /// Report what would be sent without sending.
        #[arg(long)]
        dry_run: bool,

        /// Draft missing emails right before sending.
        #[arg(long)]
        generate_missing: bool,
    },

    /// Record a reply, bounce, or unsubscribe for a lead.
    Event {
        /// Lead id.
        lead: String,

        /// replied, bounced, or unsubscribed.
        kind: String,
    },

    /// Manage individual leads.
    Lead {
        #[command(subcommand)]
        action: LeadAction,
    },

    /// Manage blacklisted addresses.
    Blacklist {
        #[command(subcommand)]
        action: BlacklistAction,
    },

    /// Manage projects.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum LeadAction {
    /// Add a lead by hand. It goes through the same filter as discovery.
    Add {
        /// Project id or name.
        project: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        company: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        company_size: Option<u32>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// List a project's leads.
    List {
        /// Project id or name.
        project: String,
        /// Only leads with this status.
        #[arg(long)]
        status: Option<String>,
    },
}

#[derive(Subcommand)]
pub(crate) enum BlacklistAction {
    /// Block an address. Matching leads move to `blacklisted`.
    Add {
        email: String,
        /// Project id or name; omit for the global list.
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Unblock an address. Lead statuses are not restored.
    Remove {
        email: String,
        #[arg(long)]
        project: Option<String>,
    },
    /// List blocked addresses.
    List {
        #[arg(long)]
        project: Option<String>,
    },
}

#[derive(Subcommand)]
pub(crate) enum ProjectAction {
    /// Create a project.
    Add {
        name: String,
        /// Who to target, in plain words.
        #[arg(long, default_value = "")]
        targeting: String,
        /// What the project offers; used in prompts.
        #[arg(long, default_value = "")]
        brief: String,
        #[arg(long, default_value = "")]
        tone: String,
        #[arg(long, default_value = "")]
        followup_strategy: String,
    },
    /// List projects.
    List,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize the local config file with defaults.
    Init,
    /// Show the local (storage and runtime) configuration.
    Show,
    /// Store the global pipeline configuration from a TOML file.
    ImportGlobal {
        #[arg(required_unless_present = "defaults")]
        file: Option<PathBuf>,
        /// Write the built-in defaults instead of reading a file.
        #[arg(long, conflicts_with = "file")]
        defaults: bool,
    },
    /// Store a project's configuration from a TOML file.
    ImportProject { project: String, file: PathBuf },
    /// Print the effective configuration for a project.
    Effective {
        project: String,
        /// Only this section (filter, job_roles, enrichment, generation, prompts, scheduling).
        #[arg(long)]
        section: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "leadflow=info",
        1 => "leadflow=debug",
        _ => "leadflow=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // logs go to stderr so stdout stays machine-readable
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Config {
            action: ConfigAction::Init,
        } => return cmd_config_init(),
        Command::Config {
            action: ConfigAction::Show,
        } => return cmd_config_show(config_path.as_deref()),
        _ => {}
    }

    let pipeline = open_pipeline(config_path.as_deref()).await?;
    match cli.command {
        Command::Discover {
            project,
            count,
            role,
            location,
            start_page,
        } => {
            let overrides = SearchOverrides {
                role_titles: (!role.is_empty()).then_some(role),
                locations: (!location.is_empty()).then_some(location),
                start_page,
            };
            cmd_discover(&pipeline, &project, count, &overrides).await
        }
        Command::Filter { project, input } => cmd_filter(&pipeline, &project, &input).await,
        Command::Enrich {
            project,
            status: true,
            ..
        } => cmd_enrich_status(&pipeline, &project).await,
        Command::Enrich {
            project,
            leads,
            mode,
            force,
            status: false,
        } => cmd_enrich(&pipeline, &project, &leads, mode.into(), force).await,
        Command::Generate {
            project,
            leads,
            email_type,
            prompt_file,
        } => {
            cmd_generate(
                &pipeline,
                &project,
                &leads,
                email_type.into(),
                prompt_file.as_deref(),
            )
            .await
        }
        Command::Preview {
            project,
            lead,
            email_type,
            prompt_file,
        } => {
            cmd_preview(
                &pipeline,
                &project,
                &lead,
                email_type.into(),
                prompt_file.as_deref(),
            )
            .await
        }
        Command::Dispatch {
            project,
            dry_run,
            generate_missing,
        } => {
            let options = DispatchOptions {
                dry_run,
                generate_missing,
            };
            cmd_dispatch(&pipeline, &project, options).await
        }
        Command::Event { lead, kind } => cmd_event(&pipeline, &lead, &kind).await,
        Command::Lead { action } => match action {
            LeadAction::Add {
                project,
                name,
                email,
                company,
                title,
                company_size,
                notes,
            } => {
                let candidate = RawCandidate {
                    name,
                    title,
                    company,
                    email: Some(email),
                    company_size,
                    source: None,
                };
                cmd_lead_add(&pipeline, &project, candidate, notes).await
            }
            LeadAction::List { project, status } => {
                cmd_lead_list(&pipeline, &project, status.as_deref()).await
            }
        },
        Command::Blacklist { action } => match action {
            BlacklistAction::Add {
                email,
                project,
                reason,
            } => {
                let scope = blacklist_scope(&pipeline, project.as_deref()).await?;
                let moved = pipeline
                    .blacklist_add(scope, &email, reason.as_deref())
                    .await?;
                print_json(&serde_json::json!({
                    "email": email,
                    "scope": scope,
                    "leads_blacklisted": moved,
                }))
            }
            BlacklistAction::Remove { email, project } => {
                let scope = blacklist_scope(&pipeline, project.as_deref()).await?;
                let removed = pipeline.blacklist_remove(scope, &email).await?;
                print_json(&serde_json::json!({
                    "email": email,
                    "scope": scope,
                    "removed": removed,
                }))
            }
            BlacklistAction::List { project } => {
                let scope = blacklist_scope(&pipeline, project.as_deref()).await?;
                print_json(&pipeline.blacklist_list(scope).await?)
            }
        },
        Command::Project { action } => match action {
            ProjectAction::Add {
                name,
                targeting,
                brief,
                tone,
                followup_strategy,
            } => {
                let mut project = Project::new(name);
                project.targeting = targeting;
                project.brief = brief;
                project.email_tone = tone;
                project.followup_strategy = followup_strategy;
                print_json(&pipeline.create_project(project).await?)
            }
            ProjectAction::List => print_json(&pipeline.storage().list_projects().await?),
        },
        Command::Config { action } => match action {
            ConfigAction::ImportGlobal { file, defaults } => {
                let global = match file {
                    Some(file) if !defaults => read_toml::<GlobalConfig>(&file)?,
                    _ => GlobalConfig::with_defaults(),
                };
                global.validate()?;
                pipeline.storage().put_global_config(&global).await?;
                info!("global configuration stored");
                Ok(())
            }
            ConfigAction::ImportProject { project, file } => {
                let project = pipeline.find_project(&project).await?;
                let config = read_toml::<ProjectConfig>(&file)?;
                pipeline
                    .storage()
                    .put_project_config(project.id, &config)
                    .await?;
                info!(project = %project.name, "project configuration stored");
                Ok(())
            }
            ConfigAction::Effective { project, section } => {
                cmd_config_effective(&pipeline, &project, section.as_deref()).await
            }
            ConfigAction::Init | ConfigAction::Show => Ok(()),
        },
    }
}

async fn open_pipeline(config_path: Option<&Path>) -> Result<Pipeline> {
    let config: AppConfig = match config_path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let db_path = config.database_path()?;
    let storage = Storage::open(&db_path)
        .await
        .wrap_err_with(|| format!("opening database {}", db_path.display()))?;
    let capabilities = Arc::new(LiveCapabilities::new(&config.runtime));
    Ok(Pipeline::new(storage, capabilities, config.runtime))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("reading {}", path.display()))?;
    // a malformed file is a configuration problem (exit status 2)
    toml::from_str(&content).map_err(|e| {
        LeadflowError::config(format!("failed to parse {}: {e}", path.display())).into()
    })
}

fn parse_lead_ids(raw: &[String]) -> Result<Vec<LeadId>> {
    raw.iter()
        .map(|id| {
            id.parse::<LeadId>()
                .map_err(|_| eyre!("'{id}' is not a lead id"))
        })
        .collect()
}

fn read_prompt(path: Option<&Path>) -> Result<Option<String>> {
    path.map(|p| std::fs::read_to_string(p).wrap_err_with(|| format!("reading {}", p.display())))
        .transpose()
}

async fn blacklist_scope(pipeline: &Pipeline, project: Option<&str>) -> Result<BlacklistScope> {
    Ok(match project {
        Some(p) => BlacklistScope::Project(pipeline.find_project(p).await?.id),
        None => BlacklistScope::Global,
    })
}

/// Cancel `token` on the first ctrl-c.
fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight leads");
            token.cancel();
        }
    });
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

async fn cmd_discover(
    pipeline: &Pipeline,
    project: &str,
    count: u32,
    overrides: &SearchOverrides,
) -> Result<()> {
    let project = pipeline.find_project(project).await?;
    info!(project = %project.name, count, "discovering leads");

    let reporter = CliProgress::new();
    let result = pipeline
        .discover_and_store(project.id, count, overrides, &reporter)
        .await;
    reporter.finish();
    print_json(&result?)
}

async fn cmd_filter(pipeline: &Pipeline, project: &str, input: &Path) -> Result<()> {
    let project = pipeline.find_project(project).await?;
    let content = std::fs::read_to_string(input)
        .wrap_err_with(|| format!("reading {}", input.display()))?;
    let candidates: Vec<RawCandidate> = serde_json::from_str(&content)
        .map_err(|e| eyre!("{} is not a JSON array of candidates: {e}", input.display()))?;
    print_json(&pipeline.filter_candidates(project.id, &candidates).await?)
}

async fn cmd_enrich(
    pipeline: &Pipeline,
    project: &str,
    leads: &[String],
    mode: EnrichmentMode,
    force: bool,
) -> Result<()> {
    let project = pipeline.find_project(project).await?;
    let target = if leads.is_empty() {
        EnrichTarget::AllUnenriched
    } else {
        EnrichTarget::Leads(parse_lead_ids(leads)?)
    };

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    let reporter = CliProgress::new();
    let result = pipeline
        .enrich(project.id, target, mode, force, &cancel, &reporter)
        .await;
    reporter.finish();
    print_json(&result?)
}

async fn cmd_enrich_status(pipeline: &Pipeline, project: &str) -> Result<()> {
    let project = pipeline.find_project(project).await?;
    print_json(&pipeline.enrichment_status(project.id).await?)
}

async fn cmd_generate(
    pipeline: &Pipeline,
    project: &str,
    leads: &[String],
    email_type: EmailType,
    prompt_file: Option<&Path>,
) -> Result<()> {
    let project = pipeline.find_project(project).await?;
    let lead_ids = parse_lead_ids(leads)?;
    let prompt = read_prompt(prompt_file)?;
    let report = pipeline
        .generate(project.id, &lead_ids, email_type, prompt.as_deref())
        .await?;
    print_json(&report)
}

async fn cmd_preview(
    pipeline: &Pipeline,
    project: &str,
    lead: &str,
    email_type: EmailType,
    prompt_file: Option<&Path>,
) -> Result<()> {
    let project = pipeline.find_project(project).await?;
    let lead_id = lead
        .parse::<LeadId>()
        .map_err(|_| eyre!("'{lead}' is not a lead id"))?;
    let prompt = read_prompt(prompt_file)?;
    let draft = pipeline
        .preview(project.id, lead_id, email_type, prompt.as_deref())
        .await?;
    print_json(&draft)
}

async fn cmd_dispatch(pipeline: &Pipeline, project: &str, options: DispatchOptions) -> Result<()> {
    let project = pipeline.find_project(project).await?;
    print_json(&pipeline.dispatch(project.id, options).await?)
}

async fn cmd_event(pipeline: &Pipeline, lead: &str, kind: &str) -> Result<()> {
    let lead_id = lead
        .parse::<LeadId>()
        .map_err(|_| eyre!("'{lead}' is not a lead id"))?;
    let kind: InboundEventKind = kind.parse()?;
    let lead = pipeline.report_inbound_event(lead_id, kind).await?;
    print_json(&serde_json::json!({
        "lead_id": lead.id,
        "email": lead.email,
        "status": lead.status,
    }))
}

async fn cmd_lead_add(
    pipeline: &Pipeline,
    project: &str,
    candidate: RawCandidate,
    notes: Option<String>,
) -> Result<()> {
    let project = pipeline.find_project(project).await?;
    match pipeline.add_lead(project.id, candidate, notes).await? {
        AddLeadOutcome::Created { lead } => print_json(&lead),
        AddLeadOutcome::Rejected { reason } => Err(eyre!("lead rejected: {reason}")),
    }
}

async fn cmd_lead_list(pipeline: &Pipeline, project: &str, status: Option<&str>) -> Result<()> {
    let project = pipeline.find_project(project).await?;
    let status = status.map(str::parse::<LeadStatus>).transpose()?;
    print_json(&pipeline.storage().list_leads(project.id, status).await?)
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config: AppConfig = match config_path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

async fn cmd_config_effective(
    pipeline: &Pipeline,
    project: &str,
    section: Option<&str>,
) -> Result<()> {
    let project = pipeline.find_project(project).await?;
    let resolver = ConfigResolver::load(pipeline.storage(), project.id).await?;
    match section {
        Some(name) => {
            let section = ConfigSection::ALL
                .into_iter()
                .find(|s| s.as_str() == name)
                .ok_or_else(|| eyre!("unknown config section '{name}'"))?;
            print_json(&resolver.section(section)?)
        }
        None => print_json(&resolver.effective()?),
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner on stderr.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item_done(&self, current: usize, total: usize, detail: &str) {
        self.spinner
            .set_message(format!("[{current}/{total}] {detail}"));
    }
}
