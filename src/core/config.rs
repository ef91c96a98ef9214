use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory the SQLite database lives in.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    4820
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: None,
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply environment overrides
    /// (OPENSHIP_HOST, OPENSHIP_PORT, OPENSHIP_DATA_DIR). Env wins.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.as_ref().exists() => {
                let content = std::fs::read_to_string(path.as_ref())
                    .with_context(|| format!("reading {}", path.as_ref().display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("parsing {}", path.as_ref().display()))?
            }
            Some(path) => {
                info!(
                    "No config at {}, using defaults.",
                    path.as_ref().display()
                );
                Self::default()
            }
            None => Self::default(),
        };

        if let Ok(host) = std::env::var("OPENSHIP_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("OPENSHIP_PORT") {
            config.port = port
                .parse()
                .with_context(|| format!("OPENSHIP_PORT '{port}' is not a port number"))?;
        }
        if let Ok(dir) = std::env::var("OPENSHIP_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }
        Ok(config)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    pub fn database_path(&self) -> PathBuf {
        let dir = self
            .data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("openship")))
            .unwrap_or_else(|| PathBuf::from("."));
        dir.join("openship.db")
    }
}
