//! labwire: an instrument interconnect listener
//!
//! Binds a TCP port, speaks the configured framing protocol (raw,
//! STX/ETX or LIS1-A1) with every connecting instrument, and logs each
//! complete message. Configuration via CLI arguments or TOML file.

use labwire::config::AppConfig;
use labwire::{Error, ErrorKind, Handler, Result, Session, TcpServer};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Logs every transport event. A real host application replaces this
/// with its own [`Handler`] and answers through the session.
struct LogHandler;

impl Handler for LogHandler {
    fn connected(&self, session: &dyn Session) -> Result<()> {
        info!(peer = %session.remote_address(), "instrument connected");
        Ok(())
    }

    fn data_received(&self, session: &dyn Session, payload: Vec<u8>, received_at: SystemTime) {
        info!(
            peer = %session.remote_address(),
            bytes = payload.len(),
            received_at = ?received_at,
            "message received"
        );
    }

    fn disconnected(&self, session: &dyn Session) {
        info!(peer = %session.remote_address(), "instrument disconnected");
    }

    fn error(&self, session: Option<&dyn Session>, kind: ErrorKind, cause: &Error) {
        let peer = session.map(|s| s.remote_address()).unwrap_or_default();
        warn!(peer = %peer, kind = ?kind, error = %cause, "transport error");
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.server.listen,
        protocol = ?config.server.protocol,
        max_connections = config.server.max_connections,
        "Starting labwire listener"
    );

    let server = Arc::new(TcpServer::bind(config.server).await?);

    let stopper = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            stopper.stop();
        }
    });

    server.run(Arc::new(LogHandler)).await?;
    Ok(())
}
