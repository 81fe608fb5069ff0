//! Server configuration.
//!
//! Four layers, strongest first: environment variables, command-line flags,
//! a JSON config file (path from `CONFIG` or `--config`), built-in defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use crate::subnet::Ipv4Net;

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen address
    pub address: String,
    /// gRPC listen address; empty disables the RPC transport
    pub grpc_address: String,
    /// Log filter
    pub log_level: String,
    /// Snapshot flush period for the in-memory store
    pub store_interval: Duration,
    /// Snapshot file path
    pub store_file: PathBuf,
    /// Replay the snapshot file on startup
    pub restore: bool,
    /// Postgres DSN; empty selects the in-memory store
    pub database_dsn: String,
    /// Retry attempts for batch writes
    pub max_retry: u32,
    /// Shared HMAC secret; empty disables signature verification
    pub signature: String,
    /// Path to the RSA private key; empty disables decryption
    pub crypto_key: String,
    /// CIDR allowed to post batch updates; `None` admits everyone
    pub trusted_subnet: Option<Ipv4Net>,
    /// Audit sink: file path; empty disables
    pub audit_file: String,
    /// Audit sink: URL; empty disables
    pub audit_url: String,
    /// Profiler address, accepted for compatibility and logged only
    pub pprof_address: String,
}

/// Command-line flags. Every field is optional so that absence can defer to
/// the config file and defaults.
#[derive(Parser, Debug, Default)]
#[command(name = "pulse-server", version, about = "Pulse metrics server")]
pub struct Flags {
    /// Address to serve HTTP on
    #[arg(short, long)]
    pub address: Option<String>,

    /// Address to serve gRPC on
    #[arg(long)]
    pub grpc_address: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Snapshot flush interval in seconds (0 disables)
    #[arg(short = 'i', long)]
    pub store_interval: Option<u64>,

    /// Snapshot file path
    #[arg(short = 'f', long)]
    pub store_file: Option<PathBuf>,

    /// Restore metrics from the snapshot file on startup
    #[arg(short, long)]
    pub restore: Option<bool>,

    /// Postgres DSN
    #[arg(short, long)]
    pub database_dsn: Option<String>,

    /// Max retry attempts for batch writes
    #[arg(long)]
    pub max_retry: Option<u32>,

    /// Shared secret for request signatures
    #[arg(short = 'k', long)]
    pub key: Option<String>,

    /// Path to the RSA private key
    #[arg(long)]
    pub crypto_key: Option<String>,

    /// Trusted subnet in CIDR form
    #[arg(short, long)]
    pub trusted_subnet: Option<String>,

    /// File to append audit records to
    #[arg(long)]
    pub audit_file: Option<String>,

    /// URL to POST audit records to
    #[arg(long)]
    pub audit_url: Option<String>,

    /// Profiler address
    #[arg(long)]
    pub pprof_address: Option<String>,

    /// Path to a JSON config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// JSON config file shape. Missing keys fall through to defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub address: Option<String>,
    pub grpc_address: Option<String>,
    pub log_level: Option<String>,
    pub store_interval: Option<u64>,
    pub store_file: Option<PathBuf>,
    pub restore: Option<bool>,
    pub database_dsn: Option<String>,
    pub max_retry: Option<u32>,
    pub signature: Option<String>,
    pub crypto_key: Option<String>,
    pub trusted_subnet: Option<String>,
    pub audit_file: Option<String>,
    pub audit_url: Option<String>,
    pub pprof_address: Option<String>,
}

impl ServerConfig {
    /// Parse flags, load the config file if one is named, and resolve
    /// against the process environment.
    pub fn load() -> Result<Self> {
        let flags = Flags::parse();
        let file = load_file(&flags)?;
        Self::resolve(flags, file, |name| std::env::var(name).ok())
    }

    /// Resolve the three layers over the defaults. `env` is injectable so
    /// precedence is testable without touching the process environment.
    pub fn resolve(
        flags: Flags,
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let store_interval = pick_parsed(
            env("STORE_INTERVAL"),
            flags.store_interval,
            file.store_interval,
            300,
        )
        .context("STORE_INTERVAL")?;

        let subnet_raw = pick(
            env("TRUSTED_SUBNET"),
            flags.trusted_subnet,
            file.trusted_subnet,
            String::new(),
        );
        let trusted_subnet = if subnet_raw.is_empty() {
            None
        } else {
            Some(
                subnet_raw
                    .parse::<Ipv4Net>()
                    .map_err(|e| anyhow::anyhow!("TRUSTED_SUBNET: {e}"))?,
            )
        };

        Ok(Self {
            address: pick(
                env("ADDRESS"),
                flags.address,
                file.address,
                "localhost:8080".into(),
            ),
            grpc_address: pick(
                env("GRPC_ADDRESS"),
                flags.grpc_address,
                file.grpc_address,
                String::new(),
            ),
            log_level: pick(
                env("LOG_LEVEL"),
                flags.log_level,
                file.log_level,
                "info".into(),
            ),
            store_interval: Duration::from_secs(store_interval),
            store_file: pick(
                env("STORE_FILE").map(PathBuf::from),
                flags.store_file,
                file.store_file,
                PathBuf::from("metrics.log"),
            ),
            restore: pick_parsed(env("RESTORE"), flags.restore, file.restore, false)
                .context("RESTORE")?,
            database_dsn: pick(
                env("DATABASE_DSN"),
                flags.database_dsn,
                file.database_dsn,
                String::new(),
            ),
            max_retry: pick_parsed(env("MAX_RETRY"), flags.max_retry, file.max_retry, 3)
                .context("MAX_RETRY")?,
            signature: pick(env("SIGNATURE"), flags.key, file.signature, String::new()),
            crypto_key: pick(
                env("CRYPTO_KEY"),
                flags.crypto_key,
                file.crypto_key,
                String::new(),
            ),
            trusted_subnet,
            audit_file: pick(
                env("AUDIT_FILE"),
                flags.audit_file,
                file.audit_file,
                String::new(),
            ),
            audit_url: pick(
                env("AUDIT_URL"),
                flags.audit_url,
                file.audit_url,
                String::new(),
            ),
            pprof_address: pick(
                env("PPROF_ADDRESS"),
                flags.pprof_address,
                file.pprof_address,
                "localhost:6060".into(),
            ),
        })
    }
}

/// Load the config file named by `CONFIG` or `--config`, if any.
pub fn load_file(flags: &Flags) -> Result<FileConfig> {
    let path = match std::env::var("CONFIG").ok().map(PathBuf::from) {
        Some(p) => Some(p),
        None => flags.config.clone(),
    };

    match path {
        Some(path) => {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("parse config file {}", path.display()))
        }
        None => Ok(FileConfig::default()),
    }
}

/// env > flag > file > default, for values that arrive already typed.
fn pick<T>(env: Option<T>, flag: Option<T>, file: Option<T>, default: T) -> T {
    env.or(flag).or(file).unwrap_or(default)
}

/// env > flag > file > default, parsing the environment's string form.
fn pick_parsed<T>(
    env: Option<String>,
    flag: Option<T>,
    file: Option<T>,
    default: T,
) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env {
        Some(raw) => raw.parse::<T>().map_err(Into::into),
        None => Ok(flag.or(file).unwrap_or(default)),
    }
}
