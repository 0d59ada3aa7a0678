//! Runtime configuration for window-cache.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Every refill knob (TTL, pull sizes, amplification, store timeouts) lives here
//! as plain data; the pull source itself is injected separately.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::window::{CursorMode, SharedWindowConfig, WindowConfig, DEFAULT_AMPLIFICATION};

/// Which window variant the server exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Window held in this process.
    Local,
    /// Window held in the configured store.
    Shared,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Local => "local",
            Mode::Shared => "shared",
        }
    }
}

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "window-cache", about = "Pull-through window cache server")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Window variant to serve.
    #[arg(long, value_enum, default_value_t = Mode::Local)]
    pub mode: Mode,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Local window refill policy.
    pub window: LocalWindowSettings,

    /// Shared window settings.
    pub shared: SharedWindowSettings,

    /// Synthetic upstream settings.
    pub source: SourceConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,

    /// Largest `size` accepted by the `next` endpoint.
    pub max_request_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            max_request_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalWindowSettings {
    /// Batch lifetime in seconds.
    pub ttl_secs: u64,

    /// Pull size when a refill has no request size to amplify.
    pub default_pull_size: usize,

    /// Refill size multiplier applied to the request size.
    pub amplification: usize,
}

impl Default for LocalWindowSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 30,
            default_pull_size: 10,
            amplification: DEFAULT_AMPLIFICATION,
        }
    }
}

impl LocalWindowSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl From<&LocalWindowSettings> for WindowConfig {
    fn from(s: &LocalWindowSettings) -> Self {
        WindowConfig {
            ttl: s.ttl(),
            default_pull_size: s.default_pull_size,
            amplification: s.amplification,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedWindowSettings {
    /// Prefix for the four window keys.
    pub key_prefix: String,

    /// Batch size requested on every refill.
    pub pull_size: usize,

    /// Batch lifetime in seconds.
    pub ttl_secs: u64,

    /// Per store round-trip timeout in milliseconds.
    pub op_timeout_ms: u64,

    pub cursor_mode: CursorMode,

    /// Redis URL; an in-memory store is used when absent.
    pub redis_url: Option<String>,
}

impl Default for SharedWindowSettings {
    fn default() -> Self {
        Self {
            key_prefix: "window".to_string(),
            pull_size: 20,
            ttl_secs: 30,
            op_timeout_ms: 1000,
            cursor_mode: CursorMode::Snapshot,
            redis_url: None,
        }
    }
}

impl SharedWindowSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

impl From<&SharedWindowSettings> for SharedWindowConfig {
    fn from(s: &SharedWindowSettings) -> Self {
        SharedWindowConfig {
            key_prefix: s.key_prefix.clone(),
            pull_size: s.pull_size,
            ttl: s.ttl(),
            op_timeout: s.op_timeout(),
            cursor_mode: s.cursor_mode,
        }
    }
}

/// Synthetic sequence source settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// First value handed out.
    pub start: u64,

    /// Cap on a single batch (0 = unlimited).
    pub max_batch: usize,
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}
