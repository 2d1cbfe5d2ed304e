//! `stencil` operator binary: migrate schemas, list actions, dispatch one call.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use stencil_core::{Caller, CallerKind, EntityDeclaration};
use stencil_server::schema::SchemaEvolution;
use stencil_server::service::compile;
use stencil_server::{AppState, DispatchRequest, StencilConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "stencil", version, about = "Declaration-driven operation server")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON file holding an array of entity declarations
    #[arg(long, env = "STENCIL_ENTITIES", global = true)]
    entities: Option<PathBuf>,

    /// PostgreSQL connection string; in-memory backends when absent
    #[cfg(feature = "postgres")]
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reconcile tables with the declarations
    Migrate {
        /// Print the planned SQL and warnings without applying anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Print every compiled action with its input and output shapes
    Actions,
    /// Dispatch a single action and print its result
    Dispatch {
        action: String,
        /// Input as a JSON object
        input: String,
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        user: String,
        #[arg(long = "role")]
        roles: Vec<String>,
        #[arg(long, value_enum, default_value_t = CallerType::Human)]
        caller_type: CallerType,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CallerType {
    Human,
    AiAgent,
    System,
    Webhook,
}

impl From<CallerType> for CallerKind {
    fn from(value: CallerType) -> Self {
        match value {
            CallerType::Human => Self::Human,
            CallerType::AiAgent => Self::AiAgent,
            CallerType::System => Self::System,
            CallerType::Webhook => Self::Webhook,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("stencil error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let entities = match &cli.entities {
        Some(path) => load_entities(path)?,
        None => Vec::new(),
    };
    validate_all(&entities)?;
    let state = build_state(&cli).await?;

    match cli.command {
        Command::Migrate { dry_run: true } => {
            let plans = SchemaEvolution::new(state.catalog.clone())
                .plan(&entities)
                .await;
            for plan in &plans {
                for sql in plan.statements() {
                    println!("{sql};");
                }
                for warning in &plan.warnings {
                    println!("-- warning: {warning}");
                }
            }
        }
        Command::Migrate { dry_run: false } => {
            let report = SchemaEvolution::new(state.catalog.clone())
                .reconcile(&entities)
                .await;
            println!(
                "applied {} change(s), {} warning(s)",
                report.applied,
                report.warnings().count()
            );
        }
        Command::Actions => {
            let described: Vec<Value> = entities
                .iter()
                .flat_map(|entity| compile(entity, &state.config))
                .map(|action| action.describe())
                .collect();
            println!("{}", serde_json::to_string_pretty(&described)?);
        }
        Command::Dispatch {
            action,
            input,
            tenant,
            user,
            roles,
            caller_type,
        } => {
            state.boot(entities).await?;
            let input: Value = serde_json::from_str(&input).context("parsing input JSON")?;
            let mut caller = Caller::new(user, tenant, caller_type.into());
            caller.roles = roles;

            match state.dispatch(DispatchRequest::new(action, input, caller)).await {
                Ok(output) => println!("{}", serde_json::to_string_pretty(&output)?),
                Err(err) => {
                    println!("{}", serde_json::to_string_pretty(&err.to_json())?);
                    anyhow::bail!("dispatch failed: {}", err.kind().as_str());
                }
            }
        }
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_entities(path: &Path) -> anyhow::Result<Vec<EntityDeclaration>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Every command refuses a declaration set that `boot` would refuse.
fn validate_all(entities: &[EntityDeclaration]) -> anyhow::Result<()> {
    for entity in entities {
        entity
            .validate()
            .with_context(|| format!("invalid declaration `{}`", entity.name))?;
    }
    Ok(())
}

#[cfg(feature = "postgres")]
async fn build_state(cli: &Cli) -> anyhow::Result<AppState> {
    use std::sync::Arc;

    use stencil_server::audit::PgAuditSink;
    use stencil_server::schema::PgSchemaCatalog;
    use stencil_server::storage::PgDataStore;

    let config = StencilConfig::default();
    let Some(url) = &cli.database_url else {
        return Ok(AppState::in_memory(config));
    };
    let store = PgDataStore::connect(url).await?;
    let pool = store.pool().clone();
    let audit = PgAuditSink::new(pool.clone());
    audit.initialize().await?;
    Ok(AppState::new(config, Arc::new(store), Arc::new(PgSchemaCatalog::new(pool)))
        .with_audit_sink(Arc::new(audit)))
}

#[cfg(not(feature = "postgres"))]
async fn build_state(_cli: &Cli) -> anyhow::Result<AppState> {
    Ok(AppState::in_memory(StencilConfig::default()))
}
