//! itemflow command-line driver.
//!
//! Runs workflow files against a persistent state store and exposes the
//! state and command-chain executor for inspection.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use itemflow_engine::command::{run_chain, ChainOptions};
use itemflow_engine::workflow::{clear_keys, load_keys, source_of_key};
use itemflow_engine::{EngineConfig, Store, Workflow, WorkflowRunner};

#[derive(Parser)]
#[command(name = "itemflow")]
#[command(version, about = "Run dedup-aware item workflows", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// State store connection, e.g. memory://, json://state.json, sqlite://state.db
    #[arg(long, global = true)]
    store: Option<String>,

    /// State store namespace
    #[arg(long, global = true)]
    namespace: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON (logs and results)
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more workflow files, in order
    ///
    /// Examples:
    ///     itemflow run feeds/news.yaml
    ///     itemflow run a.yaml b.yaml --set channel=alerts
    ///     itemflow run news.yaml --force --store sqlite://state.db
    #[command(verbatim_doc_comment)]
    Run {
        /// Workflow files (YAML or JSON)
        #[arg(value_name = "FILES", required = true)]
        files: Vec<PathBuf>,

        /// Process items even if they were already processed
        #[arg(long)]
        force: bool,

        /// Set context values (format: key=value, value parsed as JSON when possible), can be repeated
        #[arg(long = "set", value_name = "KEY=VALUE")]
        variables: Vec<String>,
    },

    /// Inspect or reset persisted dedup state
    State {
        #[command(subcommand)]
        action: StateCommand,
    },

    /// Run a command chain such as "make && make test || echo failed"
    Chain {
        /// The command chain
        #[arg(value_name = "CHAIN")]
        chain: String,

        /// Keep going after a failed command
        #[arg(long)]
        continue_on_error: bool,
    },
}

#[derive(Subcommand)]
enum StateCommand {
    /// List committed dedup keys
    Keys {
        /// Workflow name
        #[arg(short, long)]
        workflow: String,

        /// Source id or index (default: all sources)
        #[arg(short, long)]
        source: Option<String>,
    },
    /// Forget committed dedup keys
    Clear {
        /// Workflow name
        #[arg(short, long)]
        workflow: String,

        /// Source id or index (default: all sources)
        #[arg(short, long)]
        source: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    init_tracing(cli.verbose, cli.json);

    let mut config = EngineConfig::from_env().context("Invalid ITEMFLOW_* configuration")?;
    if let Some(store) = &cli.store {
        config.store_url = store.clone();
    }
    if let Some(namespace) = &cli.namespace {
        config.namespace = namespace.clone();
    }

    match cli.command {
        Commands::Run {
            files,
            force,
            variables,
        } => {
            config.force |= force;
            run_workflows(config, &files, &variables, cli.json).await
        }
        Commands::State { action } => {
            let store = open_store(&config)?;
            match action {
                StateCommand::Keys { workflow, source } => {
                    show_keys(&store, &workflow, source.as_deref()).await
                }
                StateCommand::Clear { workflow, source } => {
                    let removed = clear_keys(&store, &workflow, source.as_deref())
                        .await
                        .context("Failed to clear state")?;
                    println!("Cleared {} key list(s) for workflow '{}'", removed, workflow);
                    Ok(())
                }
            }
        }
        Commands::Chain {
            chain,
            continue_on_error,
        } => {
            let options = ChainOptions {
                continue_on_error,
                mirror: config.mirror_output && !cli.json,
                ..Default::default()
            };
            let output = run_chain(&chain, &options).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose {
        "debug,itemflow_engine=debug"
    } else {
        "info,itemflow_engine=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    // Logs go to stderr; stdout carries command output and results.
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn open_store(config: &EngineConfig) -> Result<Store> {
    let store = Store::connect(&config.store_url, config.namespace.clone())
        .with_context(|| format!("Cannot open state store '{}'", config.store_url))?;
    Ok(match config.state_ttl() {
        Some(ttl) => store.with_ttl(ttl),
        None => store,
    })
}

/// Run each file in turn. A failing file is reported and the next one still
/// runs; the command fails if any file failed.
async fn run_workflows(config: EngineConfig, files: &[PathBuf], variables: &[String], json: bool) -> Result<()> {
    let env = parse_variables(variables)?;
    let store = Arc::new(open_store(&config)?);
    let runner = WorkflowRunner::new(store, config);

    let mut failed = 0;
    for file in files {
        let result = async {
            let workflow = Workflow::from_file(file).await?;
            runner.run(&workflow, env.clone()).await
        }
        .await;

        match result {
            Ok(report) if json => println!("{}", serde_json::to_string(&report)?),
            Ok(report) => {
                for source in &report.sources {
                    println!(
                        "{} [{}]: {} selected, {} processed, {} new",
                        report.workflow, source.source, source.selected, source.processed, source.committed
                    );
                }
            }
            Err(e) => {
                failed += 1;
                tracing::error!(file = %file.display(), error = %e, "Workflow failed");
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} workflow(s) failed", failed, files.len());
    }
    Ok(())
}

async fn show_keys(store: &Store, workflow: &str, source: Option<&str>) -> Result<()> {
    if let Some(source) = source {
        for key in load_keys(store, workflow, source).await? {
            println!("{}", key);
        }
        return Ok(());
    }

    for entry in store.keys().await? {
        let Some(source) = source_of_key(workflow, &entry) else {
            continue;
        };
        for key in load_keys(store, workflow, source).await? {
            println!("{}\t{}", source, key);
        }
    }
    Ok(())
}

/// Parse key=value variables. Values that are valid JSON keep their type.
fn parse_variables(variables: &[String]) -> Result<Map<String, Value>> {
    let mut vars = Map::new();
    for var in variables {
        let (key, raw) = var
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Invalid variable format: {}. Expected key=value", var))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        vars.insert(key.to_string(), value);
    }
    Ok(vars)
}
