//! bulk-ingest: a TCP server batching line-oriented commands
//!
//! Clients send plain text commands, one per line. Commands normally flow
//! into a single server-wide batching context; a literal `{` line switches
//! the connection into a private context until the matching `}` (blocks
//! nest). The server never replies; batching output is the accumulator's
//! business.
//!
//! The process is controlled from standard input: the line `stop` shuts the
//! server down, closing every client connection.

mod batch;
mod config;
mod protocol;
mod registry;
mod server;
mod session;

use std::sync::Arc;

use config::Config;
use server::Server;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    // --verbose floors the filter at debug so every received command is
    // visible; an explicit RUST_LOG still wins.
    let default_level = if config.verbose {
        "debug"
    } else {
        config.log_level.as_str()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        port = config.port,
        bulk_size = config.bulk_size,
        "Starting bulk-ingest server"
    );

    let mut server = Server::new(config, Arc::new(batch::StdoutBatcher));
    server.start().await?;

    // Control loop: a literal "stop" line (or stdin closing) shuts down.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line == "stop" {
            break;
        }
    }

    server.stop().await;
    Ok(())
}
