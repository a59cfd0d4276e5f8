//! QuoteSync server binary.
//!
//! Serves the quotation endpoints over an in-memory store.

use clap::Parser;
use quotesync_server::{ServerConfig, SyncServer};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Authoritative QuoteSync server.
#[derive(Parser)]
#[command(name = "quotesync-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Staff user id notified about lifecycle changes (repeatable)
    #[arg(long = "staff", value_name = "USER_ID")]
    staff: Vec<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 10)]
    request_timeout: u64,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let mut filter = EnvFilter::from_default_env();
    for target in ["quotesync_server", "quotesync_engine", "audit", "notification"] {
        filter = filter.add_directive(format!("{target}={level}").parse()?);
    }
    if cli.verbose {
        filter = filter.add_directive("tower_http=debug".parse()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::new(cli.bind)
        .with_staff(cli.staff)
        .with_request_timeout(Duration::from_secs(cli.request_timeout));
    tracing::info!(?config, "starting quotesync server");

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    SyncServer::new(config).serve(listener).await?;
    Ok(())
}
