//! Brain-Score CLI - plugin management for domain libraries
//!
//! The `brainscore` command wraps the plugin infrastructure used by CI jobs.
//! Results meant for scripts (plugin info JSON, `True False` flags, PR
//! numbers) are printed on stdout; logs go to stderr.
//!
//! ## Commands
//!
//! - `locate` / `import`: resolve the plugin registering an identifier
//! - `test-plugins`: run plugin tests in isolated environments
//! - `changes`: scope CI work from a list of changed files
//! - `metadata`: validate, generate and persist plugin metadata
//! - `score`: score one model on one benchmark
//! - `run-scoring`: score a submission and record results

use anyhow::{bail, Context, Result};
use brainscore_core::{
    changes, generate_metadata, import_plugin, init_tracing, validate_metadata_file,
    BrainscoreConfig, BrainscoreError, DomainPlugin, DomainRegistry, ExternalDomainPlugin,
    GitClient, MetadataEndpoint, MetadataHandler, PluginLocator, PluginType, RunScoringEndpoint,
    SubmissionMeta, SubmissionStatus,
};
use clap::{Parser, Subcommand};
use conda_env_manager::{CommandRunner, EnvironmentSession, ProcessRunner};
use plugin_runner::{run_args, wrap_score};
use score_ledger::{SubmissionLedger, SurrealLedger};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "brainscore")]
#[command(author = "Brain-Score Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Brain-Score plugin management", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Domain of the library, e.g. `vision` or `language`
    #[arg(long, global = true, env = "BS_DOMAIN")]
    domain: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the plugin directory registering an identifier
    Locate {
        /// Domain library package directory, e.g. `brainscore_vision`
        #[arg(long)]
        library_dir: PathBuf,

        /// Plugin type (models, benchmarks, data, metrics)
        #[arg(long)]
        plugin_type: PluginType,

        /// Registered identifier
        identifier: String,
    },

    /// Locate a plugin and install its dependencies per BS_INSTALL_DEPENDENCIES
    Import {
        /// Domain library package directory
        #[arg(long)]
        library_dir: PathBuf,

        /// Plugin type (models, benchmarks, data, metrics)
        #[arg(long)]
        plugin_type: PluginType,

        /// Registered identifier
        identifier: String,
    },

    /// Run plugin tests, each plugin in its own conda environment
    TestPlugins {
        /// Domain root containing the plugin type directories
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Test files to run (default: every plugin)
        test_files: Vec<String>,

        /// Only run tests matching this name
        #[arg(long)]
        test: Option<String>,
    },

    /// Derive CI scope from changed files
    Changes {
        #[command(subcommand)]
        action: ChangesAction,
    },

    /// Plugin metadata operations
    Metadata {
        #[command(subcommand)]
        action: MetadataAction,
    },

    /// Score one model on one benchmark
    Score {
        /// Model identifier
        #[arg(long)]
        model: String,

        /// Benchmark identifier
        #[arg(long)]
        benchmark: String,

        /// Domain library package directory (default: ./brainscore_<domain>)
        #[arg(long)]
        library_dir: Option<PathBuf>,

        /// Already running inside an isolated scoring environment
        #[arg(long)]
        conda_active: bool,
    },

    /// Score every model on every benchmark and record the results
    RunScoring {
        /// Model identifiers, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        models: Vec<String>,

        /// Benchmark identifiers, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        benchmarks: Vec<String>,

        /// CI job identifier
        #[arg(long)]
        submission_id: String,

        /// Submitting user
        #[arg(long)]
        submitter: String,

        /// Model type of the submission
        #[arg(long, default_value = "BrainModel")]
        model_type: String,

        /// Make scores public
        #[arg(long)]
        public: bool,

        /// Competition the submission belongs to
        #[arg(long)]
        competition: Option<String>,
    },
}

#[derive(Subcommand)]
enum ChangesAction {
    /// Print plugin info JSON for scoring
    ScoringInfo {
        /// Space-separated changed file paths
        changed_files: String,

        /// Domain root relative to the repository, e.g. `brainscore_vision`
        #[arg(long)]
        domain_root: String,
    },
    /// Print "<modifies_plugins> <is_automergeable>"
    TestingInfo {
        changed_files: String,
        #[arg(long)]
        domain_root: String,
    },
    /// Print whether only plugin files changed
    PluginOnly {
        changed_files: String,
        #[arg(long)]
        domain_root: String,
    },
    /// Run tests of new or modified plugins
    RunTests {
        changed_files: String,
        #[arg(long)]
        domain_root: String,
    },
}

#[derive(Subcommand)]
enum MetadataAction {
    /// Validate a metadata file
    Validate {
        /// Path to metadata.yml
        path: PathBuf,
    },
    /// Validate or generate metadata, persist it, and open a PR if generated
    Handle {
        /// Plugin directory
        #[arg(long)]
        plugin_dir: PathBuf,

        /// Plugin type (models or benchmarks)
        #[arg(long)]
        plugin_type: PluginType,

        /// Persist the validated metadata to the database
        #[arg(long)]
        db_connection: bool,
    },
    /// Generate metadata.yml for every registration in a plugin directory
    Generate {
        /// Plugin directory
        #[arg(long)]
        plugin_dir: PathBuf,

        /// Plugin type (models or benchmarks)
        #[arg(long)]
        plugin_type: PluginType,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let mut config = BrainscoreConfig::from_env().context("Invalid Brain-Score configuration")?;
    if let Some(domain) = cli.domain {
        config = config.with_domain(domain);
    }
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);

    match cli.command {
        Commands::Locate {
            library_dir,
            plugin_type,
            identifier,
        } => cmd_locate(&library_dir, plugin_type, &identifier),
        Commands::Import {
            library_dir,
            plugin_type,
            identifier,
        } => cmd_import(&config, runner, &library_dir, plugin_type, &identifier).await,
        Commands::TestPlugins {
            root,
            test_files,
            test,
        } => cmd_test_plugins(&config, runner, &root, &test_files, test.as_deref()).await,
        Commands::Changes { action } => match action {
            ChangesAction::ScoringInfo {
                changed_files,
                domain_root,
            } => cmd_scoring_info(&changed_files, &domain_root),
            ChangesAction::TestingInfo {
                changed_files,
                domain_root,
            } => cmd_testing_info(&changed_files, &domain_root),
            ChangesAction::PluginOnly {
                changed_files,
                domain_root,
            } => cmd_plugin_only(&changed_files, &domain_root),
            ChangesAction::RunTests {
                changed_files,
                domain_root,
            } => cmd_run_changed_tests(&config, runner, &changed_files, &domain_root).await,
        },
        Commands::Metadata { action } => match action {
            MetadataAction::Validate { path } => cmd_metadata_validate(&path),
            MetadataAction::Handle {
                plugin_dir,
                plugin_type,
                db_connection,
            } => {
                let domain = domain_plugin(&config, runner.clone())?;
                let endpoint = if db_connection {
                    Some(MetadataEndpoint::new(connect_ledger(&config).await?))
                } else {
                    None
                };
                cmd_metadata_handle(domain, runner, endpoint, &plugin_dir, plugin_type).await
            }
            MetadataAction::Generate {
                plugin_dir,
                plugin_type,
            } => {
                let domain = domain_plugin(&config, runner)?;
                cmd_metadata_generate(domain, &plugin_dir, plugin_type).await
            }
        },
        Commands::Score {
            model,
            benchmark,
            library_dir,
            conda_active,
        } => {
            let library_dir =
                library_dir.unwrap_or_else(|| PathBuf::from(config.library_name()));
            let domain = domain_plugin(&config, runner.clone())?;
            let session = EnvironmentSession::new(config.env.clone(), runner);
            cmd_score(domain, &session, &library_dir, &model, &benchmark, conda_active).await
        }
        Commands::RunScoring {
            models,
            benchmarks,
            submission_id,
            submitter,
            model_type,
            public,
            competition,
        } => {
            let submission = SubmissionMeta {
                submission_id,
                submitter,
                model_type,
                public,
                competition,
            };
            let domain = domain_plugin(&config, runner)?;
            let ledger = connect_ledger(&config).await?;
            cmd_run_scoring(domain, ledger, &models, &benchmarks, &submission).await
        }
    }
}

/// Resolve the configured domain through the domain registry
fn domain_plugin(
    config: &BrainscoreConfig,
    runner: Arc<dyn CommandRunner>,
) -> Result<Arc<dyn DomainPlugin>> {
    let mut registry = DomainRegistry::new();
    registry.register(Arc::new(ExternalDomainPlugin::from_config(config, runner)))?;
    Ok(registry.get(&config.domain)?)
}

async fn connect_ledger(config: &BrainscoreConfig) -> Result<Arc<dyn SubmissionLedger>> {
    let ledger = match &config.database_secret {
        Some(secret) => SurrealLedger::connect(secret).await,
        None => SurrealLedger::from_env().await,
    }
    .context("Failed to connect to Brain-Score database")?;
    Ok(Arc::new(ledger))
}

fn cmd_locate(library_dir: &Path, plugin_type: PluginType, identifier: &str) -> Result<()> {
    let locator = PluginLocator::new(library_dir, plugin_type.dir_name())?;
    let dirname = locator.locate(identifier)?;
    println!("{dirname}");
    Ok(())
}

async fn cmd_import(
    config: &BrainscoreConfig,
    runner: Arc<dyn CommandRunner>,
    library_dir: &Path,
    plugin_type: PluginType,
    identifier: &str,
) -> Result<()> {
    let handle = import_plugin(&config.env, runner, library_dir, plugin_type, identifier)
        .await
        .with_context(|| format!("Failed to import {plugin_type} plugin {identifier}"))?;
    println!("{}", serde_json::to_string(&handle)?);
    Ok(())
}

async fn cmd_test_plugins(
    config: &BrainscoreConfig,
    runner: Arc<dyn CommandRunner>,
    root: &Path,
    test_files: &[String],
    test: Option<&str>,
) -> Result<()> {
    let session = EnvironmentSession::new(config.env.clone(), runner);
    let results = run_args(&session, root, test_files, test).await?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn cmd_scoring_info(changed_files: &str, domain_root: &str) -> Result<()> {
    let info = changes::scoring_info(changed_files, domain_root)?;
    print!("{}", serde_json::to_string(&info)?);
    Ok(())
}

fn cmd_testing_info(changed_files: &str, domain_root: &str) -> Result<()> {
    print!("{}", changes::testing_info(changed_files, domain_root)?);
    Ok(())
}

fn cmd_plugin_only(changed_files: &str, domain_root: &str) -> Result<()> {
    print!("{}", changes::is_plugin_only(changed_files, domain_root)?);
    Ok(())
}

/// Test files of every new or modified plugin
fn changed_test_files(changed_files: &str, domain_root: &str) -> Result<Vec<String>> {
    let plugin_changes = changes::parse_plugin_changes(changed_files, domain_root)?;
    if !plugin_changes.modifies_plugins {
        bail!("Expected at least one plugin changed or added, none found.");
    }
    let tests = changes::tests_for_changes(&plugin_changes, Path::new(domain_root))?;
    Ok(tests.iter().map(|p| p.display().to_string()).collect())
}

async fn cmd_run_changed_tests(
    config: &BrainscoreConfig,
    runner: Arc<dyn CommandRunner>,
    changed_files: &str,
    domain_root: &str,
) -> Result<()> {
    let tests = changed_test_files(changed_files, domain_root)?;
    info!(tests = ?tests, "Running tests for new or modified plugins");
    if tests.is_empty() {
        return Ok(());
    }
    cmd_test_plugins(config, runner, Path::new(domain_root), &tests, None).await
}

fn report_validation_errors(errors: &[String]) -> Result<()> {
    eprintln!("Metadata validation errors:");
    for error in errors {
        eprintln!("  - {error}");
    }
    bail!("{} metadata validation error(s)", errors.len())
}

fn cmd_metadata_validate(path: &Path) -> Result<()> {
    let (errors, _) = validate_metadata_file(path);
    if !errors.is_empty() {
        return report_validation_errors(&errors);
    }
    info!(path = %path.display(), "metadata.yml is valid");
    Ok(())
}

async fn cmd_metadata_handle(
    domain: Arc<dyn DomainPlugin>,
    runner: Arc<dyn CommandRunner>,
    endpoint: Option<MetadataEndpoint>,
    plugin_dir: &Path,
    plugin_type: PluginType,
) -> Result<()> {
    let mut handler = MetadataHandler::new(domain).with_git(GitClient::new(runner));
    if let Some(endpoint) = endpoint {
        handler = handler.with_endpoint(endpoint);
    }

    match handler.handle(plugin_dir, plugin_type).await {
        Ok(outcome) => {
            println!("{}", outcome.pr_number.unwrap_or_default());
            Ok(())
        }
        Err(BrainscoreError::InvalidMetadata { errors }) => report_validation_errors(&errors),
        Err(e) => Err(e).context("Failed to handle metadata"),
    }
}

async fn cmd_metadata_generate(
    domain: Arc<dyn DomainPlugin>,
    plugin_dir: &Path,
    plugin_type: PluginType,
) -> Result<()> {
    match generate_metadata(plugin_dir, plugin_type, domain).await? {
        Some(path) => println!("{}", path.display()),
        None => bail!("No metadata generated for {}", plugin_dir.display()),
    }
    Ok(())
}

async fn cmd_score(
    domain: Arc<dyn DomainPlugin>,
    session: &EnvironmentSession,
    library_dir: &Path,
    model: &str,
    benchmark: &str,
    conda_active: bool,
) -> Result<()> {
    let score = wrap_score(
        session,
        library_dir,
        model,
        benchmark,
        |model, benchmark| async move { domain.score(&model, &benchmark).await },
        conda_active,
    )
    .await
    .with_context(|| format!("Failed to score {model} on {benchmark}"))?;
    println!("{}", serde_json::to_string(&score)?);
    Ok(())
}

async fn cmd_run_scoring(
    domain: Arc<dyn DomainPlugin>,
    ledger: Arc<dyn SubmissionLedger>,
    models: &[String],
    benchmarks: &[String],
    submission: &SubmissionMeta,
) -> Result<()> {
    let endpoint = RunScoringEndpoint::new(domain, ledger);
    let status = endpoint.run(models, benchmarks, submission).await?;
    println!("{status}");
    if status != SubmissionStatus::Successful {
        bail!("Submission {} finished with status {status}", submission.submission_id);
    }
    Ok(())
}
