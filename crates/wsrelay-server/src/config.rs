//! Server configuration: TOML file + CLI overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use wsrelay_core::config::{default_auth_timeout, default_dial_timeout, default_handshake_timeout};
use wsrelay_core::{RelayConfig, RelayError, RelayResult};

/// Error message used when neither the CLI nor the config file names a backend.
pub const NO_BACKEND: &str = "no backend address specified";

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub relay: RelaySection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls_cert: Option<String>,
    #[serde(default)]
    pub tls_key: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            tls_cert: None,
            tls_key: None,
        }
    }
}

/// `[relay]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySection {
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout: u64,
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout: u64,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            backend: None,
            auth_url: None,
            handshake_timeout: default_handshake_timeout(),
            auth_timeout: default_auth_timeout(),
            dial_timeout: default_dial_timeout(),
        }
    }
}

fn default_port() -> u16 {
    4223
}

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub backend: Option<String>,
    pub port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub auth_url: Option<String>,
    pub handshake_timeout: Option<u64>,
    pub auth_timeout: Option<u64>,
    pub dial_timeout: Option<u64>,
}

/// Certificate and key paths, both present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub tls: Option<TlsPaths>,
    pub relay: RelayConfig,
}

impl ServerConfig {
    /// Load config from an optional TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: CliOverrides) -> RelayResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse_config(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::merge(file_config, cli)
    }

    fn merge(file_config: ConfigFile, cli: CliOverrides) -> RelayResult<Self> {
        let backend = cli
            .backend
            .or(file_config.relay.backend)
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| RelayError::Config(NO_BACKEND.into()))?;

        let tls_cert = cli.tls_cert.or(file_config.server.tls_cert);
        let tls_key = cli.tls_key.or(file_config.server.tls_key);
        let tls = match (tls_cert, tls_key) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: expand_tilde_str(&cert),
                key: expand_tilde_str(&key),
            }),
            (None, None) => None,
            _ => {
                return Err(RelayError::Config(
                    "TLS needs both a certificate and a key".into(),
                ))
            }
        };

        let mut relay = RelayConfig::new(backend)
            .with_auth_url(cli.auth_url.or(file_config.relay.auth_url));
        relay.handshake_timeout = Duration::from_secs(
            cli.handshake_timeout
                .unwrap_or(file_config.relay.handshake_timeout),
        );
        relay.auth_timeout =
            Duration::from_secs(cli.auth_timeout.unwrap_or(file_config.relay.auth_timeout));
        relay.dial_timeout =
            Duration::from_secs(cli.dial_timeout.unwrap_or(file_config.relay.dial_timeout));

        Ok(Self {
            port: cli.port.unwrap_or(file_config.server.port),
            tls,
            relay,
        })
    }
}

fn parse_config(content: &str) -> RelayResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| RelayError::Config(format!("config parse error: {e}")))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
