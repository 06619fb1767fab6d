//! Dockname daemon entry point.

use std::sync::Arc;

use log::{error, info};
use tokio::signal;
use tokio::sync::watch;

mod address;
mod backoff;
mod bootstrap;
mod config;
mod dns_server;
mod error;
mod interfaces;
mod names;
mod query;
mod registry;
mod runtime;
mod sync;
mod types;

use address::AddressResolver;
use config::Config;
use dns_server::serve_or_shutdown;
use query::QueryAdapter;
use registry::NameRegistry;
use runtime::{ContainerRuntime, DockerRuntime};
use sync::EventSynchronizer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    if std::env::args().skip(1).any(|arg| arg == "--ips") {
        for line in interfaces::describe(&interfaces::host_ipv4_addresses()?) {
            println!("{}", line);
        }
        return Ok(());
    }

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting dockname with config: {:?}", cfg);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down..."),
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        }
        let _ = signal_tx.send(true);
    });

    // Container Runtime (Docker)
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::connect(cfg.name_policy())?);

    // Shared state
    let registry = NameRegistry::new(AddressResolver::new(cfg.network_name.clone()));

    // Serve nothing until the registry reflects the running containers.
    let loaded = bootstrap::load_until_ready(
        runtime.as_ref(),
        &registry,
        cfg.max_backoff(),
        &mut shutdown_rx,
    )
    .await;
    if loaded.is_none() {
        info!("Shutdown before initial scan completed.");
        return Ok(());
    }

    // Event Synchronizer
    let synchronizer =
        EventSynchronizer::new(Arc::clone(&runtime), registry.clone(), cfg.sync_config());
    let sync_handle = tokio::spawn(synchronizer.run(shutdown_rx.clone()));

    // DNS Server
    let adapter = QueryAdapter::new(registry.clone());
    let dns_bind = cfg.dns_bind;
    let root_domain = cfg.root_domain.clone();
    let ttl = cfg.ttl;
    let dns_handle = tokio::spawn(serve_or_shutdown(
        dns_bind,
        root_domain,
        ttl,
        adapter,
        shutdown_tx,
    ));

    // Graceful Shutdown
    sync::shutdown_requested(&mut shutdown_rx).await;

    // The synchronizer finishes its current unit of work before exiting.
    if let Err(e) = sync_handle.await {
        error!("Event synchronizer task failed: {}", e);
    }
    // A server that already failed keeps its error for the exit status.
    dns_handle.abort();
    let dns_result = match dns_handle.await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(e.into()),
    };

    info!(
        "Shutdown complete. {} containers, {} names at exit.",
        registry.containers_count(),
        registry.bindings_count()
    );
    dns_result
}
