//! request-gate
//!
//! A security gate in front of a business application: every request passes
//! CORS negotiation, rate limiting, authentication and body validation before
//! it is forwarded.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────────┐
//!                 │                        REQUEST GATE                          │
//!                 │                                                              │
//!  Client ───────▶│  http server ─▶ gateway ─┬─ cors ─ rate ─ auth ─ validate ─┐  │
//!                 │  (request id,            │                                │  │
//!                 │   trace, panic)          └── denial (429/401/400/500) ◀───┤  │
//!                 │                                                           ▼  │
//!  Client ◀───────│  security + CORS + rate-limit headers ◀── request handler ─┼──┼──▶ Upstream
//!                 │                                                              │
//!                 │  ┌────────────────────────────────────────────────────────┐  │
//!                 │  │ config (+watcher) │ observability │ admin │ lifecycle │  │
//!                 │  └────────────────────────────────────────────────────────┘  │
//!                 └──────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use request_gate::lifecycle::{self, StartupOptions};

#[derive(Parser)]
#[command(name = "request-gate")]
#[command(about = "Request-gating security proxy", long_about = None)]
struct Args {
    /// TOML configuration file; watched for security changes.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use the high-security preset when no configuration file is given.
    #[arg(long)]
    high_security: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    lifecycle::run(StartupOptions {
        config_path: args.config,
        high_security: args.high_security,
    })
    .await?;

    Ok(())
}
