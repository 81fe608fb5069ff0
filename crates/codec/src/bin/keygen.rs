//! Key pair generator.
//!
//! Writes `private.pem` (server side) and `public.pem` (agent side) into the
//! target directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

/// Generate the RSA key pair used for payload encryption
#[derive(Parser, Debug)]
#[command(name = "keygen", version, about)]
struct Cli {
    /// Directory to write private.pem and public.pem into
    #[arg(short, long, default_value = ".")]
    out: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.out)
        .with_context(|| format!("create output directory {}", cli.out.display()))?;

    let (private, public) = pulse_codec::generate_keys(&cli.out).context("generate key pair")?;

    println!("private key: {}", private.display());
    println!("public key:  {}", public.display());
    Ok(())
}
