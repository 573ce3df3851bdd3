//! FeeSync - Offline-First Sync Engine for School Records
//!
//! Runs the sync engine and local API on a school office device.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feesync::api::{HttpServer, SyncResponse};
use feesync::cache::CacheStore;
use feesync::config::FeeSyncConfig;
use feesync::engine::{EngineStatus, SyncEngine};
use feesync::error::{Error, Result};
use feesync::model::RecordKind;
use feesync::queue::{QueueItem, QueueStatus, WriteQueue};

/// FeeSync - Offline-First Sync Engine for School Records
#[derive(Parser)]
#[command(name = "feesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "feesync.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the sync engine and local API
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "feesync.toml")]
        output: PathBuf,

        /// Device ID
        #[arg(long, default_value = "office-1")]
        device_id: String,
    },

    /// Validate configuration file
    Validate,

    /// Show status of a running engine
    Status {
        /// API address to query
        #[arg(short, long, default_value = "127.0.0.1:8480")]
        address: String,
    },

    /// Ask a running engine to drain its queue now
    Sync {
        /// API address to query
        #[arg(short, long, default_value = "127.0.0.1:8480")]
        address: String,
    },

    /// List queued writes from the local database
    Pending {
        /// Filter by status (pending, synced, failed)
        #[arg(long)]
        status: Option<String>,

        /// Filter by kind (enrollment, student, payment)
        #[arg(long)]
        kind: Option<String>,
    },

    /// Reference data cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Drop cached data. Essential reference data is kept unless --all.
    Clear {
        /// Also drop essential reference data
        #[arg(long)]
        all: bool,

        /// Confirm dropping essential data
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config level unless overridden on the command line
    let level = cli.log_level.clone().unwrap_or_else(|| {
        FeeSyncConfig::from_file(&cli.config)
            .map(|c| c.logging.level)
            .unwrap_or_else(|_| "info".to_string())
    });
    init_logging(&level);

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Init { output, device_id } => run_init(output, device_id),
        Commands::Validate => run_validate(cli.config),
        Commands::Status { address } => run_status(address).await,
        Commands::Sync { address } => run_sync(address).await,
        Commands::Pending { status, kind } => run_pending(cli.config, status, kind).await,
        Commands::Cache { action: CacheAction::Clear { all, yes } } => {
            run_cache_clear(cli.config, all, yes).await
        }
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(config_path: &Path) -> Result<FeeSyncConfig> {
    match FeeSyncConfig::from_file(config_path) {
        Ok(c) => Ok(c),
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            tracing::error!("Please check that the config file exists and is valid TOML");
            Err(e)
        }
    }
}

/// Start the sync engine
async fn run_start(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting FeeSync...");

    let config = load_config(&config_path)?;
    tracing::info!(
        "Loaded configuration for device {} (actor {}, {})",
        config.device.id,
        config.session.actor_id,
        config.session.role
    );

    let engine = match SyncEngine::from_config(&config) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            tracing::error!("Failed to initialize sync engine: {}", e);
            return Err(e);
        }
    };
    engine.start().await?;

    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let http_server = HttpServer::new(config.api.clone(), Arc::clone(&engine));
    let http_handle = tokio::spawn(async move {
        let shutdown = async move {
            let _ = stop_rx.wait_for(|stop| *stop).await;
        };
        if let Err(e) = http_server.start(shutdown).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
    }

    let _ = stop_tx.send(true);
    engine.shutdown().await;
    if let Err(e) = http_handle.await {
        tracing::warn!("HTTP server task ended abnormally: {}", e);
    }

    tracing::info!("FeeSync shutdown complete");
    Ok(())
}

/// Show engine status
async fn run_status(address: String) -> Result<()> {
    let url = format!("http://{}/status", address);

    let response = reqwest::get(&url).await.map_err(|e| {
        eprintln!("Failed to get status: {}", e);
        Error::from(e)
    })?;
    let status: EngineStatus = response.error_for_status()?.json().await?;

    println!("FeeSync Status");
    println!("==============");
    println!();
    println!("Device:           {}", status.device_id);
    println!("Connectivity:     {}", if status.online { "online" } else { "offline" });
    println!("Sync running:     {}", status.sync.in_progress);
    println!();
    println!("Queue:");
    println!("  Pending:        {}", status.queue.pending);
    println!("  Failed:         {}", status.queue.failed);
    println!("  Synced:         {}", status.queue.synced);
    println!();
    println!("Cache:");
    println!("  Entries:        {}", status.cache.entries);
    println!("  Essential:      {}", status.cache.essential);
    println!("  Expired:        {}", status.cache.expired);
    if let Some(report) = status.sync.last_report {
        println!();
        println!("Last sync ({}):", report.trigger);
        println!("  Finished:       {}", report.finished_at.to_rfc3339());
        println!("  Synced:         {}", report.synced);
        println!("  Failed:         {}", report.failed);
        println!("  Skipped:        {}", report.skipped);
    }
    Ok(())
}

/// Trigger a drain on a running engine
async fn run_sync(address: String) -> Result<()> {
    let url = format!("http://{}/sync", address);

    let response = reqwest::Client::new().post(&url).send().await.map_err(|e| {
        eprintln!("Failed to reach {}: {}", address, e);
        Error::from(e)
    })?;
    let result: SyncResponse = response.error_for_status()?.json().await?;

    match result.report {
        Some(report) => println!(
            "✓ Sync finished: {} synced, {} failed, {} skipped",
            report.synced, report.failed, report.skipped
        ),
        None => println!("Sync not started (already running or offline)"),
    }
    Ok(())
}

/// List queued writes straight from the queue database
async fn run_pending(
    config_path: PathBuf,
    status: Option<String>,
    kind: Option<String>,
) -> Result<()> {
    let config = load_config(&config_path)?;

    let status = status
        .map(|s| {
            QueueStatus::parse(&s.to_ascii_lowercase())
                .ok_or_else(|| Error::Config(format!("unknown status '{}'", s)))
        })
        .transpose()?;
    let kind = kind
        .map(|k| {
            RecordKind::parse(&k.to_ascii_lowercase())
                .ok_or_else(|| Error::Config(format!("unknown kind '{}'", k)))
        })
        .transpose()?;

    let queue = WriteQueue::open(&config.queue_path(), &config.device.id)?;
    let items = queue.list(status, kind).await?;

    if items.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }

    println!("{:<24} {:<11} {:<8} {:<25} DETAIL", "LOCAL ID", "KIND", "STATUS", "CREATED");
    for item in &items {
        println!("{}", pending_row(item));
    }
    Ok(())
}

fn pending_row(item: &QueueItem) -> String {
    let detail = match item.status {
        QueueStatus::Synced => item.remote_id.as_deref().unwrap_or_default(),
        QueueStatus::Failed => item.error_message.as_deref().unwrap_or_default(),
        QueueStatus::Pending => "",
    };
    format!(
        "{:<24} {:<11} {:<8} {:<25} {}",
        item.local_id,
        item.kind(),
        item.status,
        item.created_at.to_rfc3339(),
        detail
    )
}

/// Clear the reference data cache
async fn run_cache_clear(config_path: PathBuf, all: bool, yes: bool) -> Result<()> {
    if all && !yes {
        eprintln!("✗ --all also drops the data needed offline; rerun with --yes to confirm");
        return Err(Error::Config("cache clear --all requires --yes".into()));
    }

    let config = load_config(&config_path)?;
    let cache = CacheStore::open(&config.cache_path(), config.cache_ttl())?;

    let removed = if all {
        cache.clear_all().await?
    } else {
        cache.clear_non_essential().await?
    };
    println!("✓ Removed {} cache entries", removed);
    Ok(())
}

/// Initialize configuration file
fn run_init(output: PathBuf, device_id: String) -> Result<()> {
    let config_content = format!(
        r#"# FeeSync Configuration
# Generated configuration file

[device]
id = "{device_id}"
data_dir = "/var/lib/feesync/{device_id}"

[remote]
url = "https://school.example.com"
api_key = "changeme"
# access_token = "session-token"
timeout_secs = 30

[connectivity]
# probe_url = "https://school.example.com/rest/v1/"
probe_interval_ms = 5000
probe_timeout_ms = 2000
debounce_ms = 1500

[sync]
on_start = true

[cache]
default_ttl_secs = 86400

[session]
actor_id = "changeme"
role = "clerk"

[api]
enabled = true
bind_address = "127.0.0.1:8480"
cors_enabled = false

[logging]
level = "info"
"#
    );

    if output.exists() {
        eprintln!("✗ {} already exists", output.display());
        return Err(Error::Config(format!("{} already exists", output.display())));
    }

    std::fs::write(&output, config_content)?;
    println!("✓ Configuration written to {}", output.display());
    println!("  Edit [remote] and [session] before starting");
    Ok(())
}

/// Validate configuration file
fn run_validate(config_path: PathBuf) -> Result<()> {
    match FeeSyncConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Device ID:      {}", config.device.id);
            println!("  Data Directory: {}", config.data_dir().display());
            println!("  Remote:         {}", config.remote.url);
            println!("  Probe:          {} every {:?}", config.probe_url(), config.probe_interval());
            println!("  Actor:          {} ({})", config.session.actor_id, config.session.role);
            println!(
                "  API:            {}",
                if config.api.enabled { config.api.bind_address.as_str() } else { "disabled" }
            );
            println!("  Cache TTL:      {:?}", config.cache_ttl());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feesync::model::{Draft, EnrollmentDraft, Term};

    #[tokio::test]
    async fn test_pending_rows_show_status_detail() {
        let queue = WriteQueue::in_memory("office").unwrap();
        let draft = Draft::Enrollment(EnrollmentDraft {
            applicant_name: "Wanjiru Kamau".into(),
            date_of_birth: None,
            grade: "PP2".into(),
            term: Term::One,
            academic_year: 2026,
            guardian_name: None,
            guardian_phone: None,
            notes: None,
        });
        let synced = queue.enqueue(draft.clone()).await.unwrap();
        let failed = queue.enqueue(draft).await.unwrap();
        queue.mark_synced(&synced, "enr-31").await.unwrap();
        queue.mark_failed(&failed, "grade closed").await.unwrap();

        let rows: Vec<String> = queue.list(None, None).await.unwrap().iter().map(pending_row).collect();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.starts_with(&synced) && r.ends_with("enr-31")));
        assert!(rows.iter().any(|r| r.starts_with(&failed) && r.ends_with("grade closed")));
        assert!(rows.iter().all(|r| r.contains("enrollment")));
    }
}
