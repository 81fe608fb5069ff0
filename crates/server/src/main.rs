//! Server binary: wire config, storage, audit sinks and both transports.

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pulse_audit::{Auditor, FileObserver, UrlObserver};
use pulse_codec::{PrivateKey, Signer};
use pulse_server::grpc::MetricsGrpc;
use pulse_server::{build_router, AppState, ServerConfig};
use pulse_service::MetricsService;
use pulse_storage::{MemoryStore, MemoryStoreOptions, PostgresStore, Store};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Listener drain budget after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::load()?;
    init_logging(&config.log_level)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = option_env!("PULSE_BUILD_COMMIT").unwrap_or("unknown"),
        "starting pulse-server"
    );
    if !config.pprof_address.is_empty() {
        info!(
            address = %config.pprof_address,
            "profiler address configured; this build exposes no profiler endpoint"
        );
    }

    let cancel = CancellationToken::new();
    spawn_signal_watcher(cancel.clone());

    let store = build_store(&config, cancel.clone()).await?;
    let service = MetricsService::new(store);
    let auditor = build_auditor(&config).await?;

    let signer = (!config.signature.is_empty()).then(|| Signer::new(&config.signature));
    let private_key = if config.crypto_key.is_empty() {
        None
    } else {
        Some(PrivateKey::from_pem_file(&config.crypto_key).context("load private key")?)
    };

    let state = AppState::new(service.clone(), auditor.clone())
        .with_signer(signer.clone())
        .with_private_key(private_key)
        .with_trusted_subnet(config.trusted_subnet);

    let app = build_router(state);
    let listener = TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("bind {}", config.address))?;
    info!(address = %config.address, "serving HTTP");

    let http_cancel = cancel.clone();
    let http: JoinHandle<()> = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(http_cancel.cancelled_owned())
            .await;
        if let Err(e) = result {
            error!(error = %e, "HTTP server failed");
        }
    });

    let grpc = if config.grpc_address.is_empty() {
        None
    } else {
        let addr = config
            .grpc_address
            .to_socket_addrs()
            .with_context(|| format!("resolve {}", config.grpc_address))?
            .next()
            .context("gRPC address resolved to nothing")?;
        info!(address = %addr, "serving gRPC");

        let svc = MetricsGrpc::new(service, auditor, signer).into_server(config.trusted_subnet);
        let grpc_cancel = cancel.clone();
        Some(tokio::spawn(async move {
            let result = tonic::transport::Server::builder()
                .add_service(svc)
                .serve_with_shutdown(addr, grpc_cancel.cancelled_owned())
                .await;
            if let Err(e) = result {
                error!(error = %e, "gRPC server failed");
            }
        }))
    };

    cancel.cancelled().await;
    info!("shutting down");

    let drain = async {
        let _ = http.await;
        if let Some(grpc) = grpc {
            let _ = grpc.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("listeners did not drain within the grace period");
    }

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {e}"))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();

    Ok(())
}

/// Pick the storage backend: Postgres when a DSN is configured, otherwise
/// the in-memory store with snapshot persistence.
async fn build_store(
    config: &ServerConfig,
    cancel: CancellationToken,
) -> Result<Arc<dyn Store>> {
    if !config.database_dsn.is_empty() {
        info!("using Postgres storage");
        let store = PostgresStore::connect(&config.database_dsn, config.max_retry)
            .await
            .context("connect to database")?;
        return Ok(Arc::new(store));
    }

    info!(
        file = %config.store_file.display(),
        restore = config.restore,
        "using in-memory storage"
    );
    let opts = MemoryStoreOptions {
        path: config.store_file.clone(),
        flush_interval: config.store_interval,
        restore: config.restore,
        max_retry: config.max_retry,
    };
    let store = MemoryStore::open(opts, cancel)
        .await
        .context("open in-memory store")?;
    Ok(Arc::new(store))
}

async fn build_auditor(config: &ServerConfig) -> Result<Arc<Auditor>> {
    let auditor = Auditor::new();

    if !config.audit_file.is_empty() {
        let observer = FileObserver::open(&config.audit_file)
            .await
            .with_context(|| format!("open audit file {}", config.audit_file))?;
        auditor.register(Arc::new(observer));
        info!(file = %config.audit_file, "file audit sink registered");
    }

    if !config.audit_url.is_empty() {
        auditor.register(Arc::new(UrlObserver::new(&config.audit_url)));
        info!(url = %config.audit_url, "url audit sink registered");
    }

    Ok(Arc::new(auditor))
}

fn spawn_signal_watcher(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "install interrupt handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "install terminate handler");
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
