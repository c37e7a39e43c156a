//! Node configuration loaded from a ring config file.
//!
//! The file format is fixed by the existing deployments: plain text, one
//! value per non-empty non-`#` line, four lines in order:
//!
//! ```text
//! # downstream neighbour
//! 127.0.0.1:6001
//! Alice
//! 2
//! true
//! ```
//!
//! The listen port is derived rather than configured: the canonical ring
//! names Alice/Bob/Carol map to 6000/6001/6002, anything else listens on
//! the downstream port minus one. This is a local convention with no
//! protocol basis, retained for compatibility with the existing files.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Reserved names with fixed listen ports.
const CANONICAL_PORTS: [(&str, u16); 3] = [("Alice", 6000), ("Bob", 6001), ("Carol", 6002)];

/// One node's immutable configuration.
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Downstream neighbour as `host:port`. Every datagram this node emits
    /// goes there.
    pub next_addr: String,
    /// This node's ring name.
    pub name: String,
    /// Token-hold duration in whole seconds.
    pub hold_secs: u64,
    /// Whether this node creates the token at startup and regenerates it
    /// on loss. Exactly one node on a ring sets this.
    pub generates_token: bool,
    /// Derived UDP listen port.
    pub listen_port: u16,
    /// Derived log file path, `<lowercase-name>_log.txt`.
    pub log_file: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("config file incomplete: expected 4 values, found {found}")]
    MissingLines { found: usize },
    #[error("token hold time {0:?} is not a positive whole number of seconds")]
    BadHoldTime(String),
    #[error("generator flag {0:?} is not true or false")]
    BadGeneratorFlag(String),
    #[error("downstream address must be host:port, got {0:?}")]
    BadNeighbourAddr(String),
    #[error("downstream port {0:?} is not a valid port")]
    BadNeighbourPort(String),
    #[error("derived listen port {0} is outside 1..=65535")]
    ListenPortOutOfRange(u32),
    #[error("node name must not be empty")]
    EmptyName,
    #[error("node name {0:?} contains a reserved character (':' or ';')")]
    InvalidName(String),
    #[error("downstream address must not be empty")]
    EmptyNeighbourAddr,
}

impl RingConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect();
        if lines.len() < 4 {
            return Err(ConfigError::MissingLines { found: lines.len() });
        }

        let next_addr = lines[0].to_string();
        let name = lines[1].to_string();

        let hold_secs: u64 = lines[2]
            .parse()
            .map_err(|_| ConfigError::BadHoldTime(lines[2].to_string()))?;

        let generates_token = match lines[3] {
            "true" => true,
            "false" => false,
            other => return Err(ConfigError::BadGeneratorFlag(other.to_string())),
        };

        let listen_port = derive_listen_port(&name, &next_addr)?;
        let log_file = PathBuf::from(format!("{}_log.txt", name.to_lowercase()));

        let config = RingConfig {
            next_addr,
            name,
            hold_secs,
            generates_token,
            listen_port,
            log_file,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject impossible values. Called by [`load`]; public so hand-built
    /// configs (tests, simulations) get the same checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.next_addr.is_empty() {
            return Err(ConfigError::EmptyNeighbourAddr);
        }
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.name.contains([':', ';']) {
            return Err(ConfigError::InvalidName(self.name.clone()));
        }
        if self.hold_secs == 0 {
            return Err(ConfigError::BadHoldTime("0".to_string()));
        }
        if self.listen_port == 0 {
            return Err(ConfigError::ListenPortOutOfRange(0));
        }
        Ok(())
    }

    pub fn hold_duration(&self) -> Duration {
        Duration::from_secs(self.hold_secs)
    }
}

fn derive_listen_port(name: &str, next_addr: &str) -> Result<u16, ConfigError> {
    for (canonical, port) in CANONICAL_PORTS {
        if name == canonical {
            return Ok(port);
        }
    }

    let (_, port_text) = next_addr
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::BadNeighbourAddr(next_addr.to_string()))?;
    let next_port: u16 = port_text
        .parse()
        .map_err(|_| ConfigError::BadNeighbourPort(port_text.to_string()))?;
    if next_port <= 1 {
        return Err(ConfigError::ListenPortOutOfRange(
            u32::from(next_port).saturating_sub(1),
        ));
    }
    Ok(next_port - 1)
}
