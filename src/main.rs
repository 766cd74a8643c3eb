use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use revision_pruner::{
    config::PrunerConfig,
    db::{DbPool, RevisionRepo},
    observability,
    queue::{self, WorkQueue},
    retention::{
        CleanupRunResult, DeletionQueueBridge, DeletionWorker, QueueRunner, RetentionEngine,
        RetentionSettings, RunnerConfig, SettingsReloader, SharedSettings,
        start_cleanup_scheduler, start_queue_runner,
    },
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Config file looked up in the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "revision-pruner.toml";

#[derive(Parser, Debug)]
#[command(version, about = "Prunes historical revisions by per-bundle retention rules", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (defaults to ./revision-pruner.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run one capped cleanup pass over every bundle with a rule
    Run,
    /// Clear pending queued deletions and queue every current candidate
    EnqueueAll,
    /// Queue the deletion candidates of a single entity
    EnqueueEntity {
        /// Entity ID
        id: i64,
    },
    /// Drain the deletion queue
    Work {
        /// Process a single tick and exit
        #[arg(long)]
        once: bool,
    },
    /// Run the cleanup scheduler and the queue runner until interrupted
    Daemon,
    /// Show how many revisions each bundle would lose, without deleting
    Preview {
        /// Only preview this bundle
        #[arg(short, long)]
        bundle: Option<String>,
    },
    /// Load the config file and report problems
    CheckConfig,
    /// Export the JSON schema for the configuration file
    Schema {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Run database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Command::Schema { output } => {
            #[cfg(feature = "json-schema")]
            run_schema_export(output);
            #[cfg(not(feature = "json-schema"))]
            {
                let _ = output;
                eprintln!("Error: JSON schema export requires the 'json-schema' feature");
                std::process::exit(1);
            }
        }
        Command::CheckConfig => run_check_config(args.config.as_deref()),
        command => {
            let app = App::init(args.config.as_deref()).await;
            match command {
                Command::Run => run_cleanup(&app).await,
                Command::EnqueueAll => run_enqueue_all(&app).await,
                Command::EnqueueEntity { id } => run_enqueue_entity(&app, id).await,
                Command::Work { once } => run_work(&app, once).await,
                Command::Daemon => run_daemon(app).await,
                Command::Preview { bundle } => run_preview(&app, bundle.as_deref()).await,
                Command::Migrate => run_migrate(&app).await,
                Command::Schema { .. } | Command::CheckConfig => {}
            }
        }
    }
}

/// Resolve the config path from `--config` or the working directory.
fn resolve_config_path(explicit_path: Option<&str>) -> Result<PathBuf, String> {
    let path = PathBuf::from(explicit_path.unwrap_or(DEFAULT_CONFIG_FILE));
    if !path.exists() {
        return Err(format!("Config file not found: {}", path.display()));
    }
    Ok(path)
}

fn load_config(explicit_path: Option<&str>) -> (PathBuf, PrunerConfig) {
    let config_path = match resolve_config_path(explicit_path) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match PrunerConfig::from_file(&config_path) {
        Ok(config) => (config_path, config),
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(1);
        }
    }
}

/// Everything a command needs once the config is loaded.
struct App {
    config: PrunerConfig,
    config_path: PathBuf,
    db: DbPool,
    queue: Arc<dyn WorkQueue>,
    settings: Arc<SharedSettings>,
}

impl App {
    async fn init(explicit_config_path: Option<&str>) -> Self {
        let (config_path, config) = load_config(explicit_config_path);

        if let Err(e) = observability::init_tracing(&config.observability.logging) {
            eprintln!("Failed to initialize tracing: {}", e);
            std::process::exit(1);
        }
        if config.observability.metrics.enabled
            && let Err(e) = observability::metrics::init_metrics(&config.observability.metrics)
        {
            tracing::error!(error = %e, "Failed to initialize metrics");
            std::process::exit(1);
        }

        tracing::info!(config_file = %config_path.display(), "Configuration loaded");

        if config.database.is_none() {
            eprintln!("Error: Database is not configured. Nothing to prune.");
            std::process::exit(1);
        }

        let db = match DbPool::from_config(&config.database).await {
            Ok(db) => db,
            Err(e) => {
                tracing::error!(error = %e, "Failed to connect to database");
                eprintln!("Error: Failed to connect to database: {}", e);
                std::process::exit(1);
            }
        };

        let queue = match queue::create_queue(&config.queue, &db) {
            Ok(queue) => queue,
            Err(e) => {
                eprintln!("Error: Failed to create deletion queue: {}", e);
                std::process::exit(1);
            }
        };

        let retention = RetentionSettings::from_config(&config.retention);
        for (bundle, error) in retention.validation_errors() {
            tracing::warn!(bundle = %bundle, error = %error, "Retention rule disabled");
        }

        Self {
            settings: Arc::new(SharedSettings::new(retention)),
            config,
            config_path,
            db,
            queue,
        }
    }

    fn engine(&self) -> RetentionEngine {
        RetentionEngine::new(self.db.revisions(), self.settings.clone())
    }

    fn bridge(&self) -> DeletionQueueBridge {
        DeletionQueueBridge::new(self.db.revisions(), self.queue.clone(), self.settings.clone())
    }

    fn runner(&self) -> QueueRunner {
        QueueRunner::new(
            self.queue.clone(),
            DeletionWorker::new(self.db.revisions(), self.settings.clone()),
            RunnerConfig::from(&self.config.queue),
        )
    }
}

async fn run_cleanup(app: &App) {
    let result = app.engine().run_cleanup().await;
    print_cleanup_result(&result);
    if result.has_failures() {
        std::process::exit(1);
    }
}

fn print_cleanup_result(result: &CleanupRunResult) {
    let mode = if result.dry_run { " (dry run)" } else { "" };
    println!("Cleanup run complete{mode}");
    println!("  attempted:  {}", result.attempted);
    println!("  deleted:    {}", result.deleted);
    println!("  not found:  {}", result.not_found);
    println!("  conflicts:  {}", result.conflicts);
    println!("  failed:     {}", result.failed);
    if result.selection_failures > 0 {
        println!("  bundles failed: {}", result.selection_failures);
    }
    if result.budget_exhausted {
        println!("  run limit reached, more candidates remain");
    }
}

async fn run_enqueue_all(app: &App) {
    match app.bridge().enqueue_all().await {
        Ok(result) => {
            println!(
                "Queued {} revision deletions ({} pending items cleared, {} failed)",
                result.enqueued, result.cleared, result.failed
            );
            if result.failed > 0 || result.selection_failures > 0 {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Error: Failed to rebuild deletion queue: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_enqueue_entity(app: &App, id: i64) {
    let entity = match app.db.revisions().load_entity(id).await {
        Ok(Some(entity)) => entity,
        Ok(None) => {
            eprintln!("Error: Entity {} not found", id);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: Failed to load entity {}: {}", id, e);
            std::process::exit(1);
        }
    };

    let result = app.bridge().enqueue_for_entity(&entity).await;
    println!(
        "Queued {} revision deletions for entity {}",
        result.enqueued, entity.id
    );
    if result.failed > 0 || result.selection_failures > 0 {
        std::process::exit(1);
    }
}

async fn run_work(app: &App, once: bool) {
    let runner = app.runner();

    if once {
        match runner.run_once().await {
            Ok(result) => println!(
                "Claimed {}: {} deleted, {} skipped, {} released, {} dropped",
                result.claimed, result.deleted, result.skipped, result.released, result.dropped
            ),
            Err(e) => {
                eprintln!("Error: Failed to process deletion queue: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(start_queue_runner(
        Arc::new(runner),
        Duration::from_secs(app.config.queue.interval_secs),
        cancel.clone(),
    ));

    shutdown_signal().await;
    cancel.cancel();
    if let Err(e) = handle.await {
        tracing::error!(error = %e, "Queue runner task failed");
    }
}

async fn run_daemon(app: App) {
    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();

    let reloader = app
        .config
        .scheduler
        .reload_settings
        .then(|| SettingsReloader {
            settings: app.settings.clone(),
            path: app.config_path.clone(),
        });

    tracker.spawn(start_cleanup_scheduler(
        Arc::new(app.engine()),
        Arc::new(app.bridge()),
        reloader,
        app.config.scheduler.clone(),
        cancel.clone(),
    ));
    tracker.spawn(start_queue_runner(
        Arc::new(app.runner()),
        Duration::from_secs(app.config.queue.interval_secs),
        cancel.clone(),
    ));
    tracker.close();

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, waiting for background tasks to complete...");
    cancel.cancel();
    tracker.wait().await;
    tracing::info!("Shutdown complete");
}

async fn run_preview(app: &App, bundle: Option<&str>) {
    match app.engine().preview(bundle).await {
        Ok(previews) if previews.is_empty() => println!("No bundles with an active rule"),
        Ok(previews) => {
            println!("{:<24} {:>10} {:>10}", "BUNDLE", "ENTITIES", "REVISIONS");
            for preview in previews {
                println!(
                    "{:<24} {:>10} {:>10}",
                    preview.bundle, preview.entities, preview.revisions
                );
            }
        }
        Err(e) => {
            eprintln!("Error: Failed to select candidates: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_check_config(explicit_config_path: Option<&str>) {
    let (config_path, config) = load_config(explicit_config_path);
    let errors = RetentionSettings::from_config(&config.retention).validation_errors();

    if errors.is_empty() {
        println!("{}: OK", config_path.display());
        return;
    }

    for (bundle, error) in &errors {
        eprintln!("retention.bundles.{}: {}", bundle, error);
    }
    std::process::exit(1);
}

/// Export JSON schema for the configuration file to file or stdout
#[cfg(feature = "json-schema")]
fn run_schema_export(output: Option<String>) {
    let content = match PrunerConfig::json_schema_string() {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error: Failed to serialize config schema: {}", e);
            std::process::exit(1);
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &content) {
                eprintln!("Failed to write to {}: {}", path, e);
                std::process::exit(1);
            }
            eprintln!("Config JSON schema written to {}", path);
        }
        None => {
            println!("{}", content);
        }
    }
}

async fn run_migrate(app: &App) {
    match app.db.run_migrations().await {
        Ok(()) => tracing::info!("Database migrations completed successfully"),
        Err(e) => {
            tracing::error!(error = %e, "Database migrations failed");
            eprintln!("Error: Database migrations failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
