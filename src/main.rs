use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{mpsc, Arc};
use tracing::{error, info, warn};

use facegroup::cancel::CancelToken;
use facegroup::config::Config;
use facegroup::db::{Catalog, RunStatus, NOISE_CLUSTER_ID};
use facegroup::error::ClusterError;
use facegroup::faces::{run_clustering, OnnxExtractor};
use facegroup::scanner::{resolve_root, IngestProgress, IngestSummary, Walker};
use facegroup::{export, logging};

/// Exit status for a run stopped by an interrupt.
const EXIT_CANCELLED: u8 = 2;

#[derive(Parser)]
#[command(
    name = "facegroup",
    version,
    about = "Catalog faces in a photo collection and group them by person"
)]
struct Cli {
    /// Path to config file (defaults to $FACEGROUP_CONFIG or the user config directory)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Catalog database path, overriding the config
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk a directory and catalog the faces of every new image
    Ingest {
        /// Root directory to walk
        root: PathBuf,

        /// Maximum number of new images to process this run
        #[arg(long)]
        limit: Option<usize>,

        /// Number of images processed in parallel
        #[arg(long, short = 'j')]
        concurrency: Option<usize>,
    },
    /// Group all cataloged faces into clusters
    Cluster {
        /// Neighbor radius on unit-normalized embeddings
        #[arg(long)]
        eps: Option<f32>,

        /// Neighborhood size (including the face itself) that seeds a cluster
        #[arg(long)]
        min_neighbors: Option<usize>,
    },
    /// Show catalog counts and cluster sizes
    Summary,
    /// Copy clustered images into one folder per cluster
    Export {
        /// Output directory
        out_dir: PathBuf,

        /// Also export faces that matched no cluster
        #[arg(long)]
        include_noise: bool,
    },
    /// Forget every cluster assignment
    ResetClusters,
    /// List recent ingest runs
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

enum Outcome {
    Done,
    Cancelled,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("Warning: failed to initialize logging: {:#}", e);
    }

    match run(cli.command, config).await {
        Ok(Outcome::Done) => ExitCode::SUCCESS,
        Ok(Outcome::Cancelled) => ExitCode::from(EXIT_CANCELLED),
        Err(e) => {
            error!(error = %format!("{:#}", e), "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().context("Failed to load configuration")?,
    };
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    Ok(config)
}

async fn run(command: Commands, config: Config) -> Result<Outcome> {
    match command {
        Commands::Ingest {
            root,
            limit,
            concurrency,
        } => ingest(config, root, limit, concurrency).await,
        Commands::Cluster { eps, min_neighbors } => cluster(config, eps, min_neighbors).await,
        Commands::Summary => {
            summary(&open_catalog(&config.db_path)?)?;
            Ok(Outcome::Done)
        }
        Commands::Export {
            out_dir,
            include_noise,
        } => {
            let catalog = open_catalog(&config.db_path)?;
            let result = export::export_clusters(&catalog, &out_dir, include_noise)?;
            println!(
                "Exported {} clusters to {}: {} copied, {} already present, {} failed",
                result.clusters,
                out_dir.display(),
                result.copied,
                result.skipped,
                result.failed
            );
            Ok(Outcome::Done)
        }
        Commands::ResetClusters => {
            let cleared = open_catalog(&config.db_path)?.reset_clusters()?;
            println!("Cleared cluster assignments for {} faces", cleared);
            Ok(Outcome::Done)
        }
        Commands::Runs { limit } => {
            runs(&open_catalog(&config.db_path)?, limit)?;
            Ok(Outcome::Done)
        }
    }
}

fn open_catalog(path: &Path) -> Result<Catalog> {
    let catalog = Catalog::open(path)?;
    catalog
        .initialize()
        .with_context(|| format!("Failed to initialize catalog at {}", path.display()))?;
    info!(path = %path.display(), "Catalog opened");
    Ok(catalog)
}

/// Token cancelled on the first Ctrl-C.
fn cancel_on_interrupt() -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight work");
            eprintln!("Interrupted, finishing in-flight work...");
            token.cancel();
        }
    });
    cancel
}

async fn ingest(
    config: Config,
    root: PathBuf,
    limit: Option<usize>,
    concurrency: Option<usize>,
) -> Result<Outcome> {
    let root = resolve_root(&root)?;
    let catalog = Arc::new(open_catalog(&config.db_path)?);

    let mut walker = Walker::new(&config.scanner);
    if let Some(k) = concurrency {
        walker = walker.with_concurrency(k);
    }
    if limit.is_some() {
        walker = walker.with_limit(limit);
    }

    let faces = config.faces.clone();
    let sessions = walker.concurrency();
    let extractor = tokio::task::spawn_blocking(move || OnnxExtractor::load(&faces, sessions))
        .await?
        .context("Failed to load face models")?;

    let cancel = cancel_on_interrupt();
    let run_id = catalog.begin_ingest_run(&root.to_string_lossy())?;

    let (tx, rx) = mpsc::channel();
    let reporter = std::thread::spawn(move || print_progress(rx));

    let result = {
        let catalog = Arc::clone(&catalog);
        tokio::task::spawn_blocking(move || walker.ingest(&root, &catalog, &extractor, &cancel, Some(tx)))
            .await?
    };
    let _ = reporter.join();

    match result {
        Ok(summary) => {
            let status = if summary.cancelled {
                RunStatus::Cancelled
            } else {
                RunStatus::Completed
            };
            catalog.finish_ingest_run(run_id, &summary, status)?;
            print_ingest_summary(&summary);
            Ok(if summary.cancelled {
                Outcome::Cancelled
            } else {
                Outcome::Done
            })
        }
        Err(e) => {
            let partial = e.partial_summary().cloned().unwrap_or_default();
            if let Err(record_err) = catalog.finish_ingest_run(run_id, &partial, RunStatus::Failed) {
                warn!(error = %record_err, "Failed to record ingest run");
            }
            if e.partial_summary().is_some() {
                print_ingest_summary(&partial);
            }
            Err(e.into())
        }
    }
}

fn print_progress(rx: mpsc::Receiver<IngestProgress>) {
    for event in rx {
        match event {
            IngestProgress::Committed { path, faces, .. } => println!("  + {} ({} faces)", path, faces),
            IngestProgress::Failed { path, message } => println!("  ! {} ({})", path, message),
            IngestProgress::AlreadyCataloged { .. } | IngestProgress::Duplicate { .. } => {}
        }
    }
}

fn print_ingest_summary(summary: &IngestSummary) {
    println!();
    println!("Discovered:        {}", summary.discovered);
    println!("Already cataloged: {}", summary.already_cataloged);
    println!("Ingested:          {}", summary.ingested);
    println!("  with no faces:   {}", summary.no_faces);
    println!("Faces found:       {}", summary.faces_found);
    println!("Failed:            {}", summary.failed);
    if summary.duplicates > 0 {
        println!("Duplicates:        {}", summary.duplicates);
    }
    if summary.walk_errors > 0 {
        println!("Unreadable entries: {}", summary.walk_errors);
    }
    if summary.non_utf8_paths > 0 {
        println!("Skipped non-UTF-8 paths: {}", summary.non_utf8_paths);
    }
    if summary.limit_reached {
        println!("Limit reached; run again to continue.");
    }
    if summary.cancelled {
        println!("Cancelled; run again to resume.");
    }
}

async fn cluster(config: Config, eps: Option<f32>, min_neighbors: Option<usize>) -> Result<Outcome> {
    let catalog = open_catalog(&config.db_path)?;

    let mut params = config.clustering.params();
    if let Some(eps) = eps {
        params.eps = eps;
    }
    if let Some(min_neighbors) = min_neighbors {
        params.min_neighbors = min_neighbors;
    }

    let cancel = cancel_on_interrupt();
    let result = tokio::task::spawn_blocking(move || run_clustering(&catalog, &params, &cancel)).await?;

    match result {
        Ok(report) => {
            println!("Faces:    {}", report.embeddings);
            println!("Clusters: {} ({} kept ids, {} new)", report.clusters, report.adopted, report.minted);
            println!("Noise:    {}", report.noise);
            println!("Updated:  {}", report.changed);
            Ok(Outcome::Done)
        }
        Err(ClusterError::Cancelled) => {
            println!("Cancelled; no cluster assignments were changed.");
            Ok(Outcome::Cancelled)
        }
        Err(e) => Err(e.into()),
    }
}

fn summary(catalog: &Catalog) -> Result<()> {
    println!("Items: {}", catalog.item_count()?);
    println!("Faces: {}", catalog.embedding_count()?);

    let clusters = catalog.cluster_summary()?;
    if clusters.is_empty() {
        return Ok(());
    }

    println!();
    println!("{:<12} {:>8} {:>8}", "Cluster", "Faces", "Images");
    for cluster in clusters {
        let label = match cluster.cluster_id {
            None => "unclustered".to_string(),
            Some(NOISE_CLUSTER_ID) => "noise".to_string(),
            Some(id) => id.to_string(),
        };
        println!("{:<12} {:>8} {:>8}", label, cluster.embeddings, cluster.items);
    }
    Ok(())
}

fn runs(catalog: &Catalog, limit: usize) -> Result<()> {
    let runs = catalog.recent_ingest_runs(limit)?;
    if runs.is_empty() {
        println!("No ingest runs recorded");
        return Ok(());
    }

    for run in runs {
        println!(
            "#{:<4} {:<10} {}  {}  discovered {}, ingested {}, failed {}, faces {}",
            run.id,
            run.status.as_str(),
            run.started_at,
            run.root,
            run.discovered,
            run.ingested,
            run.failed,
            run.faces_found
        );
    }
    Ok(())
}
