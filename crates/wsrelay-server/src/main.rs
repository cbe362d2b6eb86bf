//! ws-tcp-relay: WebSocket to TCP relay.
//!
//! Accepts WebSocket connections (optionally over TLS), dials the configured
//! TCP backend for each one and relays bytes in both directions. When an
//! authorization URL is configured, clients must first send a
//! `CONNECT {"auth_token": ...}` message that the external service approves.

mod config;
mod server;
mod tls;
mod transport;

use clap::error::ErrorKind;
use clap::{ArgAction, CommandFactory, Parser};
use config::{CliOverrides, ServerConfig};
use server::RelayServer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use wsrelay_core::RelayError;

/// ws-tcp-relay: relay WebSocket clients to a TCP backend
#[derive(Parser, Debug)]
#[command(name = "ws-tcp-relay", version, about = "Relay WebSocket clients to a TCP backend")]
struct Cli {
    /// Target backend TCP address (host:port)
    backend: Option<String>,

    /// Port to listen on [default: 4223]
    #[arg(short, long)]
    port: Option<u16>,

    /// TLS certificate file path (PEM)
    #[arg(long)]
    tlscert: Option<String>,

    /// TLS key file path (PEM)
    #[arg(long)]
    tlskey: Option<String>,

    /// Authorization URL; empty disables authentication
    #[arg(long)]
    auth: Option<String>,

    /// Enable debug logs (`--debug`, `--debug=true`, `--debug=false`)
    #[arg(
        long,
        num_args = 0..=1,
        require_equals = true,
        default_value_t = false,
        default_missing_value = "true",
        action = ArgAction::Set
    )]
    debug: bool,

    /// Log level (trace, debug, info, warn, error); overrides --debug
    #[arg(long)]
    log_level: Option<String>,

    /// Config file path (TOML)
    #[arg(long)]
    config: Option<String>,

    /// Seconds a client may take to complete the handshake
    #[arg(long)]
    handshake_timeout: Option<u64>,

    /// Seconds to wait for the authorization service
    #[arg(long)]
    auth_timeout: Option<u64>,

    /// Seconds to wait for the backend connection
    #[arg(long)]
    dial_timeout: Option<u64>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let default_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| if cli.debug { "debug" } else { "info" }.to_string());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(cli.debug)
        .with_line_number(cli.debug)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting ws-tcp-relay");

    let config_path = cli.config.as_ref().map(PathBuf::from);
    let overrides = CliOverrides {
        backend: cli.backend.clone(),
        port: cli.port,
        tls_cert: cli.tlscert.clone(),
        tls_key: cli.tlskey.clone(),
        auth_url: cli.auth.clone(),
        handshake_timeout: cli.handshake_timeout,
        auth_timeout: cli.auth_timeout,
        dial_timeout: cli.dial_timeout,
    };

    let server_config = match ServerConfig::load(config_path.as_deref(), overrides) {
        Ok(cfg) => cfg,
        Err(RelayError::Config(msg)) if msg == config::NO_BACKEND => {
            Cli::command()
                .error(ErrorKind::MissingRequiredArgument, msg)
                .exit();
        }
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let tls_config = match &server_config.tls {
        Some(paths) => match tls::load_tls_config(&paths.cert, &paths.key) {
            Ok(cfg) => Some(Arc::new(cfg)),
            Err(e) => {
                error!(error = %e, "failed to load TLS config");
                std::process::exit(1);
            }
        },
        None => None,
    };

    let relay_server = match RelayServer::new(server_config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create server");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = relay_server.run(tls_config) => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("ws-tcp-relay stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
