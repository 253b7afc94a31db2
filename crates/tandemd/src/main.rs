//! tandem daemon (tandemd)
//!
//! Serves shared plain-text sessions to tandem clients.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (TCP on 7070, WebSocket on 7071)
//! tandemd
//!
//! # Custom ports
//! tandemd --tcp-port 8000 --ws-port 8001
//!
//! # With configuration file
//! tandemd --config /etc/tandem/tandemd.toml
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tandem_core::SessionManager;
use tandem_transport::{TcpServer, WebSocketServer};

use crate::config::Config;

/// tandem daemon - collaborative plain-text editing server
#[derive(Parser, Debug)]
#[command(name = "tandemd")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TCP port to listen on [default: 7070]
    #[arg(long, env = "TANDEM_TCP_PORT")]
    tcp_port: Option<u16>,

    /// WebSocket port to listen on [default: 7071]
    #[arg(long, env = "TANDEM_WS_PORT")]
    ws_port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "TANDEM_BIND")]
    bind: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "TANDEM_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "TANDEM_LOG_LEVEL")]
    log_level: Option<String>,

    /// Disable TCP server
    #[arg(long)]
    no_tcp: bool,

    /// Disable WebSocket server
    #[arg(long)]
    no_ws: bool,

    /// Days before an abandoned session is dropped [default: 1]
    #[arg(long, env = "TANDEM_EXPIRY_DAYS")]
    expiry_days: Option<u64>,

    /// Seconds between garbage collection passes [default: 60]
    #[arg(long, env = "TANDEM_GC_INTERVAL")]
    gc_interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    print_banner();

    let manager = Arc::new(SessionManager::new());

    info!(
        tcp_port = config.tcp_port,
        ws_port = config.ws_port,
        bind = %config.bind,
        expiry_days = config.expiry_days,
        "Starting tandem daemon"
    );

    let mut handles = Vec::new();

    if !config.no_tcp {
        let tcp_server = TcpServer::new(manager.clone(), config.tcp_addr()?);
        handles.push(tokio::spawn(async move {
            if let Err(e) = tcp_server.run().await {
                error!(error = %e, "TCP server error");
            }
        }));
    }

    if !config.no_ws {
        let ws_server = WebSocketServer::new(manager.clone(), config.ws_addr()?);
        handles.push(tokio::spawn(async move {
            if let Err(e) = ws_server.run().await {
                error!(error = %e, "WebSocket server error");
            }
        }));
    }

    if handles.is_empty() {
        anyhow::bail!("At least one transport must be enabled");
    }

    // Background GC task
    let gc_manager = manager.clone();
    let expiry = config.expiry();
    let mut interval = tokio::time::interval(config.gc_interval());
    handles.push(tokio::spawn(async move {
        loop {
            interval.tick().await;
            let removed = gc_manager.gc(expiry);
            if removed > 0 {
                info!(removed, "GC: removed expired sessions");
            }
            let stats = gc_manager.stats();
            info!(
                sessions = stats.session_count,
                connections = stats.connection_count,
                "Server stats"
            );
        }
    }));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    for handle in handles {
        handle.abort();
    }

    Ok(())
}

fn print_banner() {
    println!(
        r#"
  ┌┬┐┌─┐┌┐┌┌┬┐┌─┐┌┬┐
   │ ├─┤│││ ││├┤ │││
   ┴ ┴ ┴┘└┘─┴┘└─┘┴ ┴
  Collaborative plain-text editing
  Version {}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
