//! Marco command-line agent
//!
//! `marco run <text>` classifies free-form text into an intent, asks follow-up
//! questions on the terminal when needed, and dispatches it to a module.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use marco_logging::LogConfig;
use marco_mcp::{
    CancellationToken, CapabilityRegistry, ClassifierAdapter, CommandOutcome, FsModule, Mcp,
    McpError,
};
use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

mod config;
mod openai;
mod terminal;

use config::Config;
use openai::OpenAiBackend;
use terminal::TerminalFrontend;

#[derive(Parser, Debug)]
#[command(name = "marco", about = "Run natural-language commands against local modules")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interpret and execute a command, e.g. `marco run list files in src`
    Run {
        /// The command, in plain words
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,

        /// Confirm destructive actions without asking
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// List registered modules and their actions
    Capabilities {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the resolved configuration (API key redacted)
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = marco_logging::init_logging(LogConfig {
        app_name: "marco",
        verbose: cli.verbose,
        log_dir: None,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to start async runtime: {}", err);
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:?}", err);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Run { text, json, yes } => run_text(text.join(" "), json, yes).await,
        Commands::Capabilities { json } => {
            show_capabilities(json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config => {
            show_config()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Register the built-in modules and close registration.
fn register_modules(config: &Config) -> Result<&'static CapabilityRegistry> {
    let registry = CapabilityRegistry::global();
    let fs_config = config.fs_config();
    let fs = FsModule::new(fs_config.clone())
        .with_context(|| format!("Failed to open fs root {}", fs_config.root.display()))?;
    registry
        .register(Arc::new(fs))
        .context("Failed to register fs module")?;
    registry.seal();
    Ok(registry)
}

async fn run_text(text: String, json: bool, yes: bool) -> Result<ExitCode> {
    let config = config::load().context("Failed to load configuration")?;
    let policy = config.policy()?;
    let api_key = config.api_key()?;
    let registry = register_modules(&config)?;

    let backend = Arc::new(OpenAiBackend::new(
        api_key,
        config.intentparser.model.as_str(),
        config.intentparser.base_url.as_str(),
    ));
    let classifier = Arc::new(ClassifierAdapter::new(backend, policy.classifier_timeout));
    let frontend = Arc::new(TerminalFrontend::stdin(yes));
    let mcp = Mcp::new(registry, classifier, frontend, policy);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling command");
            interrupt.cancel();
        }
    });

    info!(model = %config.intentparser.model, "Running command");
    let outcome = mcp.run_command(text, BTreeMap::new(), cancel).await;
    print_outcome(&outcome, json)?;
    Ok(exit_code(&outcome))
}

/// Cancellation is a normal outcome; an unknown destructive effect is not.
fn exit_code(outcome: &CommandOutcome) -> ExitCode {
    match outcome {
        CommandOutcome::Completed(_) | CommandOutcome::Cancelled { .. } => ExitCode::SUCCESS,
        CommandOutcome::Failed(_) => ExitCode::from(1),
        CommandOutcome::Uncertain { .. } => ExitCode::from(2),
    }
}

fn print_outcome(outcome: &CommandOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.to_json())?);
        return Ok(());
    }

    match outcome {
        CommandOutcome::Completed(report) => {
            for step in &report.steps {
                match &step.result.summary {
                    Some(summary) => println!("{}", summary),
                    None => println!("{}", serde_json::to_string_pretty(&step.result.output)?),
                }
            }
        }
        CommandOutcome::Cancelled { reason, .. } => eprintln!("Cancelled: {}", reason),
        CommandOutcome::Uncertain { intent, reason, .. } => {
            eprintln!("Outcome unknown for {}: {}", intent, reason);
            eprintln!("Check the result before running it again.");
        }
        CommandOutcome::Failed(err) => {
            eprintln!("Error: {}", err);
            if let McpError::IntentUnresolved {
                best_guess: Some(best),
                ..
            } = err
            {
                eprintln!("Best guess was {}", best);
            }
        }
    }
    Ok(())
}

fn show_capabilities(json: bool) -> Result<()> {
    let config = config::load().context("Failed to load configuration")?;
    let registry = register_modules(&config)?;
    let catalog = registry.catalog()?;

    if json {
        let descriptors: Vec<_> = catalog.iter().map(|d| d.as_ref()).collect();
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(());
    }

    for descriptor in &catalog {
        println!("{}: {}", descriptor.name, descriptor.description);
        for (action, schema) in &descriptor.actions {
            let params: Vec<String> = schema
                .params
                .iter()
                .map(|(name, spec)| {
                    let marker = if spec.required { "" } else { "?" };
                    format!("{}{}: {}", name, marker, spec.kind.as_str())
                })
                .collect();
            let destructive = if descriptor.is_destructive(action) {
                "  [destructive]"
            } else {
                ""
            };
            println!(
                "  {}({}){}  {}",
                action,
                params.join(", "),
                destructive,
                schema.description
            );
        }
    }
    Ok(())
}

fn show_config() -> Result<()> {
    let path = config::config_path();
    let config = config::load().context("Failed to load configuration")?;
    let view = serde_json::json!({
        "path": path,
        "config": config.redacted(),
        "policy_valid": config.policy().is_ok(),
        "api_key_set": config.api_key().is_ok(),
    });
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}
