//! CLI command definitions, routing, and tracing setup.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use castlefinder_core::{BatchReport, ConsumeProgress, Orchestrator};
use castlefinder_shared::{
    AppConfig, Castle, CastleFinderError, Country, PipelineConfig, init_config, load_config,
    resolve_db_path, validate_config,
};
use castlefinder_sources::{HttpFetcher, SourceRegistry};
use castlefinder_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// castlefinder: gather castles from heritage sites into one reconciled store.
#[derive(Parser)]
#[command(
    name = "castlefinder",
    version,
    about = "Collect castles from heritage websites, reconcile duplicates and store them.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
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

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Collect, enrich, reconcile and persist castles once.
    Run {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Database file (defaults to the config file, then ~/.castlefinder/castles.db).
        #[arg(long, env = "DB_URI")]
        db: Option<String>,

        /// Castles reconciled and saved together.
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Stream enrichment progress as server-sent events on /sse.
    Serve {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Port to listen on.
        #[arg(long, default_value = "8080")]
        port: u16,
    },

    /// List stored castles.
    List {
        /// Only castles of this country code (pt, uk, ie, sk, dk).
        #[arg(long)]
        country: Option<String>,

        /// Database file.
        #[arg(long, env = "DB_URI")]
        db: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Overrides shared by every command that runs the pipeline.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct PipelineArgs {
    /// Overall deadline for a run, in seconds.
    #[arg(long, env = "ENRICHMENT_TIMEOUT_IN_SECONDS")]
    pub timeout_secs: Option<u64>,

    /// Adapters listing candidates at the same time.
    #[arg(long)]
    pub collection_workers: Option<usize>,

    /// Workers enriching candidates.
    #[arg(long)]
    pub extraction_workers: Option<usize>,
}

impl PipelineArgs {
    /// Apply these overrides on top of the loaded config.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(secs) = self.timeout_secs {
            config.pipeline.timeout_secs = secs;
        }
        if let Some(n) = self.collection_workers {
            config.pipeline.collection_workers = Some(n);
        }
        if let Some(n) = self.extraction_workers {
            config.pipeline.extraction_workers = Some(n);
        }
    }
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "castlefinder=info",
        1 => "castlefinder=debug",
        _ => "castlefinder=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            pipeline,
            db,
            batch_size,
        } => cmd_run(&pipeline, db.as_deref(), batch_size).await,
        Command::Serve { pipeline, port } => cmd_serve(&pipeline, port).await,
        Command::List { country, db } => cmd_list(country.as_deref(), db.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Load the config file, apply flag overrides and validate the result.
fn resolved_config(pipeline: &PipelineArgs) -> Result<AppConfig> {
    let mut config = load_config()?;
    pipeline.apply(&mut config);
    validate_config(&config)?;
    Ok(config)
}

/// Wire the built-in adapters around one shared HTTP client.
pub(crate) fn build_orchestrator(config: &AppConfig) -> Result<Orchestrator> {
    let fetcher = HttpFetcher::new(&config.http)?;
    let registry = SourceRegistry::with_defaults(Arc::new(fetcher));
    let pipeline = PipelineConfig::from_settings(&config.pipeline);
    Ok(Orchestrator::new(registry, pipeline))
}

/// Token cancelled after `timeout` or on Ctrl-C, whichever comes first.
pub(crate) fn run_token(timeout: Duration) -> CancellationToken {
    let cancel = CancellationToken::new();
    let deadline = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = deadline.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                warn!(timeout_secs = timeout.as_secs(), "run deadline reached, cancelling");
                deadline.cancel();
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, cancelling");
                deadline.cancel();
            }
        }
    });
    cancel
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(pipeline: &PipelineArgs, db: Option<&str>, batch_size: Option<usize>) -> Result<()> {
    let mut config = resolved_config(pipeline)?;
    if let Some(n) = batch_size {
        config.pipeline.batch_size = n;
        validate_config(&config)?;
    }

    let db_path = resolve_db_path(&config, db)?;
    let storage = Storage::open(&db_path)
        .await
        .wrap_err_with(|| format!("failed to open database at {}", db_path.display()))?;

    let orchestrator = build_orchestrator(&config)?;
    info!(
        db = %db_path.display(),
        collection_workers = orchestrator.config().collection_workers,
        extraction_workers = orchestrator.config().extraction_workers,
        batch_size = config.pipeline.batch_size,
        "starting run"
    );

    let start = Instant::now();
    let cancel = run_token(Duration::from_secs(config.pipeline.timeout_secs));
    let streams = orchestrator.run(&cancel);

    let progress = CliProgress::new();
    let summary = castlefinder_core::consume(
        streams,
        &storage,
        config.pipeline.batch_size,
        &cancel,
        &progress,
    )
    .await;
    progress.finish();
    cancel.cancel();
    let summary = summary?;

    println!();
    if summary.cancelled {
        println!("  Run stopped before all sources finished.");
    } else {
        println!("  Run complete!");
    }
    println!("  Enriched:   {}", summary.enriched);
    println!("  Errors:     {}", summary.errors);
    println!("  Reconciled: {}", summary.reconciled);
    println!("  Saved:      {}", summary.saved);
    println!("  Batches:    {}", summary.batches);
    println!("  Database:   {}", db_path.display());
    println!("  Time:       {:.1}s", start.elapsed().as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_serve(pipeline: &PipelineArgs, port: u16) -> Result<()> {
    let config = resolved_config(pipeline)?;
    let orchestrator = build_orchestrator(&config)?;
    crate::serve::serve(
        orchestrator,
        Duration::from_secs(config.pipeline.timeout_secs),
        port,
    )
    .await
}

async fn cmd_list(country: Option<&str>, db: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let country = country
        .map(str::parse::<Country>)
        .transpose()
        .map_err(|e| eyre!("{e}"))?;

    let db_path = resolve_db_path(&config, db)?;
    let storage = Storage::open_readonly(&db_path).await?;
    let castles = storage.list_castles(country).await?;

    if castles.is_empty() {
        println!("No castles stored yet. Run `castlefinder run` first.");
        return Ok(());
    }

    for castle in &castles {
        println!("{}", format_castle(castle));
    }
    println!();
    println!("  {} castle(s)", castles.len());
    Ok(())
}

fn format_castle(castle: &Castle) -> String {
    let location: Vec<&str> = [&castle.district, &castle.city, &castle.state]
        .into_iter()
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .collect();
    format!(
        "  [{}] {:<32} {:<40} {:<8} {} source(s)",
        castle.country,
        castle.name,
        location.join(", "),
        castle.property_condition.as_str(),
        castle.sources.len()
    )
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");

    let pools = PipelineConfig::from_settings(&config.pipeline);
    println!("# resolved for this machine");
    println!("# collection_workers = {}", pools.collection_workers);
    println!("# extraction_workers = {}", pools.extraction_workers);
    println!("# db_path = {}", resolve_db_path(&config, None)?.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
    enriched: AtomicUsize,
    errors: AtomicUsize,
    saved: AtomicUsize,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner.set_message("Collecting castles");
        Self {
            spinner,
            enriched: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            saved: AtomicUsize::new(0),
        }
    }

    fn refresh(&self) {
        self.spinner.set_message(format!(
            "Enriched {} | errors {} | saved {}",
            self.enriched.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
            self.saved.load(Ordering::Relaxed),
        ));
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ConsumeProgress for CliProgress {
    fn castle_enriched(&self, _castle: &Castle, enriched: usize) {
        self.enriched.store(enriched, Ordering::Relaxed);
        self.refresh();
    }

    fn failed(&self, _error: &CastleFinderError, errors: usize) {
        self.errors.store(errors, Ordering::Relaxed);
        self.refresh();
    }

    fn batch_saved(&self, _report: &BatchReport, saved: usize) {
        self.saved.store(saved, Ordering::Relaxed);
        self.refresh();
    }
}
