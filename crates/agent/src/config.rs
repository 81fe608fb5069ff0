//! Agent configuration.
//!
//! Same layering as the server: environment > flags > JSON config file >
//! defaults.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

/// Resolved agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Server endpoint, `host:port`
    pub address: String,
    /// Sample period
    pub poll_interval: Duration,
    /// Flush period
    pub report_interval: Duration,
    /// Log filter
    pub log_level: String,
    /// Sender worker count
    pub rate_limit: u32,
    /// Retry attempts per batch
    pub max_retry: u32,
    /// Shared HMAC secret; empty disables signing
    pub signature: String,
    /// Path to the server's public key; empty disables encryption
    pub crypto_key: String,
    /// Ship batches over gRPC instead of HTTP
    pub use_grpc: bool,
}

/// Command-line flags; all optional so absence defers to file and defaults.
#[derive(Parser, Debug, Default)]
#[command(name = "pulse-agent", version, about = "Pulse collector agent")]
pub struct Flags {
    /// Server address
    #[arg(short, long)]
    pub address: Option<String>,

    /// Poll interval in seconds
    #[arg(short, long)]
    pub poll_interval: Option<u64>,

    /// Report interval in seconds
    #[arg(short, long)]
    pub report_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Number of concurrent sender workers
    #[arg(short = 'l', long)]
    pub rate_limit: Option<u32>,

    /// Max retry attempts per batch
    #[arg(long)]
    pub max_retry: Option<u32>,

    /// Shared secret for request signatures
    #[arg(short = 'k', long)]
    pub key: Option<String>,

    /// Path to the server's public key
    #[arg(long)]
    pub crypto_key: Option<String>,

    /// Send batches over gRPC
    #[arg(long)]
    pub use_grpc: Option<bool>,

    /// Path to a JSON config file
    #[arg(short, long)]
    pub config: Option<std::path::PathBuf>,
}

/// JSON config file shape.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub address: Option<String>,
    pub poll_interval: Option<u64>,
    pub report_interval: Option<u64>,
    pub log_level: Option<String>,
    pub rate_limit: Option<u32>,
    pub max_retry: Option<u32>,
    pub signature: Option<String>,
    pub crypto_key: Option<String>,
    pub use_grpc: Option<bool>,
}

impl AgentConfig {
    pub fn load() -> Result<Self> {
        let flags = Flags::parse();
        let file = load_file(&flags)?;
        Self::resolve(flags, file, |name| std::env::var(name).ok())
    }

    pub fn resolve(
        flags: Flags,
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let poll = pick_parsed(env("POLL_INTERVAL"), flags.poll_interval, file.poll_interval, 2)
            .context("POLL_INTERVAL")?;
        let report = pick_parsed(
            env("REPORT_INTERVAL"),
            flags.report_interval,
            file.report_interval,
            10,
        )
        .context("REPORT_INTERVAL")?;

        Ok(Self {
            address: pick(
                env("ADDRESS"),
                flags.address,
                file.address,
                "localhost:8080".into(),
            ),
            poll_interval: Duration::from_secs(poll),
            report_interval: Duration::from_secs(report),
            log_level: pick(
                env("LOG_LEVEL"),
                flags.log_level,
                file.log_level,
                "info".into(),
            ),
            rate_limit: pick_parsed(env("RATE_LIMIT"), flags.rate_limit, file.rate_limit, 3)
                .context("RATE_LIMIT")?,
            max_retry: pick_parsed(env("MAX_RETRY"), flags.max_retry, file.max_retry, 3)
                .context("MAX_RETRY")?,
            signature: pick(env("SIGNATURE"), flags.key, file.signature, String::new()),
            crypto_key: pick(
                env("CRYPTO_KEY"),
                flags.crypto_key,
                file.crypto_key,
                String::new(),
            ),
            use_grpc: pick_parsed(env("USE_GRPC"), flags.use_grpc, file.use_grpc, false)
                .context("USE_GRPC")?,
        })
    }
}

fn load_file(flags: &Flags) -> Result<FileConfig> {
    let path = match std::env::var("CONFIG").ok().map(std::path::PathBuf::from) {
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

fn pick<T>(env: Option<T>, flag: Option<T>, file: Option<T>, default: T) -> T {
    env.or(flag).or(file).unwrap_or(default)
}

fn pick_parsed<T>(env: Option<String>, flag: Option<T>, file: Option<T>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env {
        Some(raw) => raw.parse::<T>().map_err(Into::into),
        None => Ok(flag.or(file).unwrap_or(default)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_match_the_documented_table() {
        let cfg = AgentConfig::resolve(Flags::default(), FileConfig::default(), no_env).unwrap();
        assert_eq!(cfg.address, "localhost:8080");
        assert_eq!(cfg.poll_interval, Duration::from_secs(2));
        assert_eq!(cfg.report_interval, Duration::from_secs(10));
        assert_eq!(cfg.rate_limit, 3);
        assert_eq!(cfg.max_retry, 3);
        assert!(cfg.signature.is_empty());
        assert!(cfg.crypto_key.is_empty());
        assert!(!cfg.use_grpc);
    }

    #[test]
    fn environment_wins_over_flags_and_file() {
        let flags = Flags {
            address: Some("flag:1".into()),
            rate_limit: Some(5),
            ..Default::default()
        };
        let file = FileConfig {
            address: Some("file:2".into()),
            rate_limit: Some(7),
            ..Default::default()
        };
        let cfg = AgentConfig::resolve(flags, file, |name| match name {
            "ADDRESS" => Some("env:3".into()),
            "RATE_LIMIT" => Some("9".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.address, "env:3");
        assert_eq!(cfg.rate_limit, 9);
    }

    #[test]
    fn flags_win_over_file() {
        let flags = Flags {
            poll_interval: Some(1),
            ..Default::default()
        };
        let file = FileConfig {
            poll_interval: Some(60),
            report_interval: Some(30),
            ..Default::default()
        };
        let cfg = AgentConfig::resolve(flags, file, no_env).unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.report_interval, Duration::from_secs(30));
    }

    #[test]
    fn bad_env_bool_errors_out() {
        let result = AgentConfig::resolve(Flags::default(), FileConfig::default(), |name| {
            (name == "USE_GRPC").then(|| "sure".to_string())
        });
        assert!(result.is_err());
    }
}
