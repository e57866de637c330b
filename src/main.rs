//! Storage Capability
//!
//! One binary, four roles:
//! - `controller`: derives a StorageClassCapability for every StorageClass
//! - `sidecar`: probes a CSI plugin and publishes its ProvisionerCapability
//! - `crds`: prints the CustomResourceDefinitions
//! - `inspect`: lists StorageClasses and their capability objects

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_capability::{
    crd, CapabilityController, CapabilityPublisher, ControllerConfig, CsiAddress, GrpcCsiClient,
    HealthServer, Inventory, KubeCapabilityStore, KubeDiscovery, KubeVersion, Metrics, Prober,
    PublisherConfig, RateLimiterConfig, RunExit, WatchCaches,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Capability - CSI plugin and StorageClass capability objects
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the StorageClassCapability controller
    Controller(ControllerArgs),
    /// Run the ProvisionerCapability sidecar next to a CSI plugin
    Sidecar(SidecarArgs),
    /// Print the CustomResourceDefinitions as YAML
    Crds,
    /// List StorageClasses and capability objects in the cluster
    Inspect(InspectArgs),
}

#[derive(clap::Args, Debug)]
struct ControllerArgs {
    /// Number of parallel reconcile workers
    #[arg(long, env = "WORKERS", default_value = "2")]
    workers: usize,

    /// Minimum supported Kubernetes version
    #[arg(long, env = "MIN_KUBE_VERSION", default_value = "v1.20.0")]
    min_kube_version: KubeVersion,

    /// Informer resync period in seconds
    #[arg(long, env = "RESYNC_PERIOD", default_value = "30")]
    resync_period_secs: u64,

    /// Give up waiting for the caches after this many seconds (0 waits forever)
    #[arg(long, env = "CACHE_SYNC_TIMEOUT", default_value = "0")]
    cache_sync_timeout_secs: u64,

    /// Health and metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,

    /// First retry delay for a failed key, in milliseconds
    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value = "5")]
    retry_base_delay_ms: u64,

    /// Upper bound for the retry delay, in seconds
    #[arg(long, env = "RETRY_MAX_DELAY", default_value = "1000")]
    retry_max_delay_secs: u64,
}

#[derive(clap::Args, Debug)]
struct SidecarArgs {
    /// CSI endpoint (unix socket path, unix://, or http(s)://host:port)
    #[arg(long, env = "CSI_ADDRESS", default_value = "/run/csi/socket")]
    csi_address: String,

    /// Deadline for each CSI call, in seconds
    #[arg(long, env = "CSI_TIMEOUT", default_value = "60")]
    timeout_secs: u64,

    /// Interval between probes, in seconds
    #[arg(long, env = "RESYNC_PERIOD", default_value = "60")]
    resync_period_secs: u64,

    /// Expected plugin name; ticks are skipped when the plugin reports another
    #[arg(long, env = "DRIVER_NAME")]
    driver_name: Option<String>,

    /// Health and metrics server bind address (disabled when unset)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
struct InspectArgs {
    /// Output format
    #[arg(long, short, value_enum, default_value = "table")]
    output: OutputFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Yaml,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;

    match cli.command {
        Command::Controller(args) => run_controller(args).await,
        Command::Sidecar(args) => run_sidecar(args).await,
        Command::Crds => {
            print!("{}", crd::render_crds()?);
            Ok(())
        }
        Command::Inspect(args) => run_inspect(args).await,
    }
}

// =============================================================================
// Controller
// =============================================================================

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    info!("Starting StorageClassCapability controller");
    info!("  Version: {}", storage_capability::VERSION);
    info!("  Workers: {}", args.workers);
    info!("  Minimum Kubernetes version: {}", args.min_kube_version);
    info!("  Metrics: {}", args.metrics_addr);

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let config = ControllerConfig {
        min_kube_version: args.min_kube_version,
        cache_sync_timeout: (args.cache_sync_timeout_secs > 0)
            .then(|| Duration::from_secs(args.cache_sync_timeout_secs)),
        rate_limiter: RateLimiterConfig {
            base_delay: Duration::from_millis(args.retry_base_delay_ms),
            max_delay: Duration::from_secs(args.retry_max_delay_secs),
        },
    };

    let metrics = Arc::new(Metrics::new()?);
    let caches = WatchCaches::new();
    let controller = CapabilityController::new(
        config,
        caches.clone(),
        Arc::new(KubeCapabilityStore::new(client.clone())),
        Arc::new(KubeDiscovery::new(client.clone())),
    )
    .with_metrics(metrics.clone());

    let shutdown = shutdown_signal();

    let server = {
        let caches = caches.clone();
        HealthServer::new(
            args.metrics_addr,
            metrics,
            Arc::new(move || caches.all_synced()),
        )
    };
    let server = tokio::spawn(server.serve(shutdown.clone()));

    let router = Arc::new(controller.event_router());
    let informers = caches.spawn_informers(
        client,
        router,
        Duration::from_secs(args.resync_period_secs),
        shutdown.clone(),
    );

    let exit = controller.run(args.workers, shutdown.clone()).await;

    // Informers and the server stop with the token
    shutdown.cancel();
    futures::future::join_all(informers).await;
    match server.await {
        Ok(Err(e)) => error!(error = %e, "Health server error"),
        Err(e) => error!(error = %e, "Health server task failed"),
        Ok(Ok(())) => {}
    }

    match exit? {
        RunExit::Completed => info!("Controller shutdown complete"),
        RunExit::VersionTooOld { found, required } => {
            warn!(%found, %required, "Cluster version is not supported, exiting");
        }
        RunExit::CachesNotSynced => bail!(
            "watch caches did not sync: {}",
            caches.unsynced_kinds().join(", ")
        ),
    }
    Ok(())
}

// =============================================================================
// Sidecar
// =============================================================================

async fn run_sidecar(args: SidecarArgs) -> anyhow::Result<()> {
    info!("Starting ProvisionerCapability sidecar");
    info!("  Version: {}", storage_capability::VERSION);
    info!("  CSI address: {}", args.csi_address);
    info!("  Driver name: {}", args.driver_name.as_deref().unwrap_or("<any>"));

    let address = CsiAddress::parse(&args.csi_address)?;
    let csi = GrpcCsiClient::connect_with_retry(&address, None)
        .await
        .with_context(|| format!("failed to connect to CSI plugin at {}", address))?;

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let metrics = Arc::new(Metrics::new()?);
    let prober = Prober::new(Arc::new(csi), Duration::from_secs(args.timeout_secs));
    let config = PublisherConfig {
        resync_period: Duration::from_secs(args.resync_period_secs),
        driver_name: args.driver_name,
    };
    let publisher = Arc::new(
        CapabilityPublisher::new(config, prober, Arc::new(KubeCapabilityStore::new(client)))
            .with_metrics(metrics.clone()),
    );

    let shutdown = shutdown_signal();

    let server = args.metrics_addr.map(|addr| {
        let readiness = {
            let publisher = publisher.clone();
            Arc::new(move || publisher.is_ready())
        };
        tokio::spawn(HealthServer::new(addr, metrics, readiness).serve(shutdown.clone()))
    });

    publisher.run(shutdown.clone()).await;

    if let Some(server) = server {
        match server.await {
            Ok(Err(e)) => error!(error = %e, "Health server error"),
            Err(e) => error!(error = %e, "Health server task failed"),
            Ok(Ok(())) => {}
        }
    }

    info!("Sidecar shutdown complete");
    Ok(())
}

// =============================================================================
// Inspect
// =============================================================================

async fn run_inspect(args: InspectArgs) -> anyhow::Result<()> {
    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let inventory = Inventory::collect(client).await?;

    match args.output {
        OutputFormat::Table => print!("{}", inventory.render()),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&inventory)?),
    }
    Ok(())
}

// =============================================================================
// Signals
// =============================================================================

/// Token cancelled on SIGINT or SIGTERM
fn shutdown_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Received SIGINT");
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received SIGINT");
        }
        cancel.cancel();
    });

    token
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("h2=warn".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("tower=warn".parse()?);

    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}
