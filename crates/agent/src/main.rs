//! Agent binary.

use std::sync::Arc;

use anyhow::{Context, Result};
use pulse_agent::{Agent, AgentConfig, GrpcTransport, HttpTransport, Transport};
use pulse_codec::{PublicKey, Signer};
use pulse_model::runtime_alloc::CountingAllocator;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Feeds the Heap* gauges in every snapshot.
#[global_allocator]
static ALLOC: CountingAllocator = CountingAllocator::new();

#[tokio::main]
async fn main() -> Result<()> {
    let config = AgentConfig::load()?;
    init_logging(&config.log_level)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = option_env!("PULSE_BUILD_COMMIT").unwrap_or("unknown"),
        address = %config.address,
        grpc = config.use_grpc,
        "starting pulse-agent"
    );

    let cancel = CancellationToken::new();
    spawn_signal_watcher(cancel.clone());

    let signer = (!config.signature.is_empty()).then(|| Signer::new(&config.signature));
    let public_key = if config.crypto_key.is_empty() {
        None
    } else {
        Some(PublicKey::from_pem_file(&config.crypto_key).context("load public key")?)
    };

    let transport: Arc<dyn Transport> = if config.use_grpc {
        if public_key.is_some() {
            info!("payload encryption applies to the HTTP transport only, ignoring crypto_key");
        }
        Arc::new(
            GrpcTransport::connect(&config.address, signer)
                .await
                .context("connect rpc transport")?,
        )
    } else {
        Arc::new(HttpTransport::new(&config.address, signer, public_key))
    };

    Agent::new(&config, transport).run(cancel).await;
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

fn spawn_signal_watcher(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
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
