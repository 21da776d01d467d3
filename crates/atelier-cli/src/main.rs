mod server;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use atelier_contracts::config::{PollBounds, StudioConfig, TrimSettings};
use atelier_contracts::events::EventLog;
use atelier_contracts::ledger::RecencyLedger;
use atelier_contracts::naming::{EDITED_PREFIX, GENERATED_PREFIX};
use atelier_contracts::verdict::Reconciliation;
use atelier_engine::grid::decompose;
use atelier_engine::{default_model_registry, ArtifactStore, LocalDelegate, Reconciler, Studio};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "atelier", version, about = "Fashion image generation and grid decomposition")]
struct Cli {
    #[command(flatten)]
    studio: StudioArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API.
    Serve(ServeArgs),
    /// Generate four looks from a prompt.
    Generate(GenerateArgs),
    /// Edit a stored image.
    Edit(EditArgs),
    /// Split a stored 2x2 composite into trimmed quadrants.
    Split(SplitArgs),
    /// List stored images, newest first.
    List(ListArgs),
}

#[derive(Debug, Args)]
struct StudioArgs {
    #[arg(long, global = true)]
    upload_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    image_model: Option<String>,
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[arg(long, global = true)]
    max_wait_secs: Option<u64>,
    #[arg(long, global = true)]
    trim_threshold: Option<u8>,
    #[arg(long, global = true)]
    trim_padding: Option<u32>,
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[arg(long)]
    bind: Option<String>,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
}

#[derive(Debug, Args)]
struct EditArgs {
    #[arg(long)]
    prompt: String,
    /// Defaults to the newest generated image in the upload directory.
    #[arg(long)]
    image: Option<String>,
}

#[derive(Debug, Args)]
struct SplitArgs {
    composite: String,
    /// Keep the composite after splitting.
    #[arg(long)]
    keep: bool,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long, default_value = "")]
    prefix: String,
    #[arg(long, default_value_t = 100)]
    limit: usize,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("atelier error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = resolve_config(StudioConfig::from_env(), &cli.studio);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(dispatch(cli.command, config))
}

fn resolve_config(mut config: StudioConfig, args: &StudioArgs) -> StudioConfig {
    if let Some(dir) = &args.upload_dir {
        config.upload_dir = dir.clone();
    }
    if let Some(model) = &args.image_model {
        config.image_model = model.clone();
    }
    if let Some(path) = &args.events {
        config.events_path = Some(path.clone());
    }
    if let Some(secs) = args.max_wait_secs {
        config.poll = PollBounds {
            max_wait: Duration::from_secs(secs),
            ..config.poll
        };
    }
    config.trim = TrimSettings {
        threshold: args.trim_threshold.unwrap_or(config.trim.threshold),
        padding: args.trim_padding.unwrap_or(config.trim.padding),
    };
    config
}

async fn dispatch(command: Command, config: StudioConfig) -> Result<i32> {
    match command {
        Command::Serve(args) => {
            let bind = args.bind.unwrap_or_else(|| config.bind.clone());
            let reconciler = build_reconciler(&config)?;
            tracing::info!(
                upload_dir = %config.upload_dir.display(),
                model = %reconciler.studio().model_name(),
                "starting server"
            );
            server::serve(Arc::new(reconciler), &bind).await?;
            Ok(0)
        }
        Command::Generate(args) => {
            let reconciler = build_reconciler(&config)?;
            let outcome = reconciler.generate_request(&args.prompt).await;
            report(&outcome)
        }
        Command::Edit(args) => {
            let reconciler = build_reconciler(&config)?;
            seed_ledger(reconciler.studio())?;
            let outcome = reconciler
                .edit_request(&args.prompt, args.image.as_deref())
                .await?;
            report(&outcome)
        }
        Command::Split(args) => {
            let store = ArtifactStore::open(&config.upload_dir)?;
            let trim = config.trim;
            let split = tokio::task::spawn_blocking(move || {
                decompose(&store, &args.composite, !args.keep, trim)
            })
            .await
            .context("split task failed")??;
            println!("{}", serde_json::to_string_pretty(&split)?);
            Ok(0)
        }
        Command::List(args) => {
            let store = ArtifactStore::open(&config.upload_dir)?;
            for name in store.list(&args.prefix, args.limit)? {
                println!("{name}");
            }
            Ok(0)
        }
    }
}

fn build_reconciler(config: &StudioConfig) -> Result<Reconciler> {
    let models = default_model_registry(config);
    let model = models.get(&config.image_model).with_context(|| {
        format!(
            "unknown image model `{}` (available: {})",
            config.image_model,
            models.names().join(", ")
        )
    })?;
    let store = ArtifactStore::open(&config.upload_dir)?;
    let mut studio = Studio::new(store, model, Arc::new(Mutex::new(RecencyLedger::new())))
        .with_trim(config.trim);
    if let Some(path) = &config.events_path {
        studio = studio.with_events(EventLog::new(path, Uuid::new_v4().to_string()));
    }
    let studio = Arc::new(studio);
    let delegate = Arc::new(LocalDelegate::new(Arc::clone(&studio)));
    Ok(Reconciler::new(studio, delegate, config.poll))
}

/// One-shot commands start with an empty ledger; point it at the newest
/// files already on disk.
fn seed_ledger(studio: &Studio) -> Result<()> {
    let store = studio.store();
    let generated = store.list(GENERATED_PREFIX, 1)?;
    let edited = store.list(EDITED_PREFIX, 1)?;
    let mut ledger = studio.ledger();
    if let Some(name) = edited.into_iter().next() {
        ledger.record_edited(name);
    }
    if let Some(name) = generated.into_iter().next() {
        ledger.record_generated(name);
    }
    Ok(())
}

fn report(outcome: &Reconciliation) -> Result<i32> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    Ok(if outcome.verdict.is_success() { 0 } else { 1 })
}
