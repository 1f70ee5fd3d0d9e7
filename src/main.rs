//! Veilgate session driver
//!
//! Drives one stealth browser session against a target site.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::error;

use veilgate::config::{keys, Config};

/// Veilgate stealth session driver
#[derive(Parser, Debug)]
#[command(name = "veilgate")]
#[command(version)]
#[command(about = "Drive a stealth browser session against a target site")]
struct Args {
    /// Target URL (overrides TARGET_URL)
    url: Option<String>,

    /// Run the browser headless
    #[arg(long)]
    headless: bool,

    /// CI mode: headless, close immediately after settling
    #[arg(long)]
    ci: bool,

    /// Directory of per-host policy files (overrides POLICY_DIR)
    #[arg(long)]
    policy_dir: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = Config::from_env();
    if let Some(url) = args.url {
        config.set(keys::TARGET_URL, url);
    }
    if args.headless {
        config.set(keys::HEADLESS, "1");
    }
    if args.ci {
        config.set(keys::CI, "1");
    }
    if let Some(dir) = args.policy_dir {
        config.set(keys::POLICY_DIR, dir);
    }

    veilgate::session::run(config)
        .await
        .context("session failed")
}
