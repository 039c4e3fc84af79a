//! Hitwarden CLI
//!
//! Process entry point for the Hitwarden triage core. Owns logging setup
//! and the lifetime of the correlation scheduler.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

mod config;
mod fixtures;
mod validator;

use config::AppConfig;
use fixtures::Fixtures;
use hw_actions::{builtin_operations, AutomationDispatcher, ExternalSink, OperationRegistry, WebhookSink};
use hw_core::events::EventBus;
use hw_core::store::{MemoryActionStore, MemoryAnalyticStore, MemoryHitStore};
use hw_core::{hit_workflow, HitService, HitStatus, RuleType, Workflow};
use hw_correlation::{CorrelationEngine, JobScheduler, Rule};
use hw_observability::logging::{init_logging_with_config, LoggingConfig};
use validator::ConfigValidator;

#[derive(Parser)]
#[command(name = "hitwarden")]
#[command(version)]
#[command(about = "Security hit triage: workflow, automation and correlation", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "hitwarden.yaml")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load fixtures, schedule correlation rules and run until Ctrl+C
    Run,

    /// List the transitions available from a status
    Transitions {
        /// Hit status (open, in-progress, on-hold, resolved)
        #[arg(short, long)]
        status: String,
    },

    /// Print the specifications of every registered operation as JSON
    Operations,

    /// Print the query a rule resolves to
    Translate {
        /// Rule language
        #[arg(short = 't', long = "type", value_enum, default_value = "sigma")]
        rule_type: RuleLanguage,

        /// Rule file
        file: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file to validate (defaults to --config)
        #[arg(long = "config", value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RuleLanguage {
    Lucene,
    Sigma,
    Eql,
}

impl From<RuleLanguage> for RuleType {
    fn from(language: RuleLanguage) -> Self {
        match language {
            RuleLanguage::Lucene => RuleType::Lucene,
            RuleLanguage::Sigma => RuleType::Sigma,
            RuleLanguage::Eql => RuleType::Eql,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        AppConfig::default()
    };

    let logging = if cli.verbose {
        LoggingConfig::development()
    } else {
        LoggingConfig::default().with_level_name(&config.logging.level)
    };
    init_logging_with_config(LoggingConfig {
        json_format: config.logging.json,
        ..logging
    });
    if !cli.config.exists() {
        info!(path = %cli.config.display(), "No config file found, using defaults");
    }

    match cli.command {
        Commands::Run => cmd_run(config).await,
        Commands::Transitions { status } => cmd_transitions(&status),
        Commands::Operations => cmd_operations(&config),
        Commands::Translate { rule_type, file } => cmd_translate(rule_type.into(), &file),
        Commands::Validate { file } => cmd_validate(&file.unwrap_or(cli.config)),
    }
}

/// The in-memory stack the process runs on.
struct Runtime {
    service: HitService,
    actions: MemoryActionStore,
    bus: Arc<EventBus>,
    registry: Arc<OperationRegistry>,
}

fn build_runtime(config: &AppConfig) -> Result<Runtime> {
    let hits = MemoryHitStore::new();
    let actions = MemoryActionStore::new();
    let bus = Arc::new(EventBus::default());
    let workflow: Arc<Workflow> = Arc::new(hit_workflow()?);

    let base = HitService::new(
        Arc::new(hits.clone()),
        Arc::new(MemoryAnalyticStore::new()),
        workflow,
        bus.clone(),
        config.engine.clone(),
    );

    let sink: Option<Arc<dyn ExternalSink>> = match &config.webhook {
        Some(webhook) => {
            let mut sink = WebhookSink::new(webhook.name.clone(), webhook.url.clone())?;
            if let Some(token) = &webhook.bearer_token {
                sink = sink.with_bearer_token(token.clone());
            }
            Some(Arc::new(sink) as Arc<dyn ExternalSink>)
        }
        None => None,
    };

    let mut registry = OperationRegistry::new();
    for operation in builtin_operations(&base, sink) {
        registry.register(operation);
    }
    let registry = Arc::new(registry);

    let dispatcher = Arc::new(AutomationDispatcher::new(
        Arc::new(actions.clone()),
        Arc::new(hits),
        registry.clone(),
    ));
    let service = base.with_automation(dispatcher);

    Ok(Runtime {
        service,
        actions,
        bus,
        registry,
    })
}

async fn cmd_run(config: AppConfig) -> Result<()> {
    let validation = ConfigValidator::validate(&config);
    if validation.has_errors() {
        validation.print();
        bail!("Configuration is invalid");
    }

    let runtime = build_runtime(&config)?;
    println!("{}", "Starting Hitwarden...".green().bold());

    // Surface side-channel events in the log.
    let mut events = runtime.bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    info!(event = event.name(), payload = ?event.payload().ok(), "Triage event")
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if let Some(path) = &config.fixtures {
        let summary = Fixtures::load(path)?
            .seed(&runtime.service, &runtime.actions)
            .await?;
        println!(
            "  {} Loaded {} analytics, {} actions, {} hits",
            "→".green(),
            summary.analytics,
            summary.actions,
            summary.hits
        );
    }

    let scheduler = JobScheduler::new();
    let engine = CorrelationEngine::new(runtime.service.clone(), scheduler.clone());
    let scheduled = engine
        .register_rules()
        .await
        .context("Failed to register correlation rules")?;
    println!("  {} Scheduled {} correlation rules", "→".green(), scheduled);
    println!(
        "  {} {} operations registered",
        "→".green(),
        runtime.registry.list().len()
    );

    println!();
    println!("Press {} to stop", "Ctrl+C".yellow());
    tokio::signal::ctrl_c().await?;

    println!("\n{}", "Shutting down...".yellow());
    scheduler.shutdown().await;
    info!("Hitwarden stopped");
    Ok(())
}

fn cmd_transitions(status: &str) -> Result<()> {
    let status = HitStatus::from_str(status)?;
    let workflow = hit_workflow()?;
    let transitions = workflow.get_transitions(status);

    println!("{} {}", "Transitions from".bold(), status.to_string().cyan());
    if transitions.is_empty() {
        println!("  (none)");
    }
    for name in transitions {
        println!("  - {}", name);
    }
    Ok(())
}

fn cmd_operations(config: &AppConfig) -> Result<()> {
    let runtime = build_runtime(config)?;
    let specifications = runtime.registry.specifications();
    println!("{}", serde_json::to_string_pretty(&specifications)?);
    Ok(())
}

fn cmd_translate(rule_type: RuleType, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read rule file: {}", file.display()))?;
    let rule = Rule::compile(rule_type, &text)?;
    println!("{}", rule.resolved_query(Utc::now()));
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<()> {
    println!(
        "Validating configuration: {}",
        path.display().to_string().cyan()
    );

    let config = AppConfig::load(path)?;
    let result = ConfigValidator::validate(&config);
    result.print();

    println!();
    println!("{}", "Configuration Summary".bold());
    println!("─────────────────────");
    println!("  Row cap: {}", config.engine.transitions.row_cap);
    println!("  Correlation: {}", enabled(config.engine.correlation.enabled));
    println!("  Automation: {}", enabled(config.engine.automation.enabled));
    println!(
        "  Webhook: {}",
        config
            .redact_secrets()
            .webhook
            .map(|w| w.url)
            .unwrap_or_else(|| "none".to_string())
    );

    println!();
    if result.has_errors() {
        println!(
            "{}",
            "Configuration validation failed. Fix the errors above.".red().bold()
        );
        bail!("{} configuration error(s)", result.errors.len());
    } else if result.has_warnings() {
        warn!(warnings = result.warnings.len(), "Configuration has warnings");
        println!(
            "{}",
            "Configuration is valid with warnings. Review the warnings above."
                .yellow()
                .bold()
        );
    } else {
        println!("{}", "Configuration is valid.".green().bold());
    }
    Ok(())
}

fn enabled(flag: bool) -> colored::ColoredString {
    if flag {
        "enabled".green()
    } else {
        "disabled".red()
    }
}
