//! Configuration for the dashboard.
//!
//! Settings are layered: TOML file → environment → CLI flags. Every field
//! has a default, so a missing file is fine; a file that exists but does not
//! parse is an error.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 5000
//! port_attempts = 10
//! open_browser = false
//! viewer_queue = 256
//!
//! [discovery]
//! roots = ["/home/me/code"]
//! max_depth = 4
//! reconcile_interval_secs = 10
//! collaborator_timeout_secs = 5
//!
//! [tunnel]
//! provider = "cloudflared"
//! command = "cloudflared"
//! args = ["tunnel", "--url", "http://localhost:{port}"]
//! start_timeout_secs = 30
//! max_restarts = 3
//!
//! [operator]
//! name = "Dana"
//!
//! [logging]
//! dir = "/var/log/specdash"
//! format = "json"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dashboard::{ServerConfig, ServiceConfig};
use crate::tunnel::CommandTunnelConfig;

pub const ENV_PORT: &str = "SPECDASH_PORT";
pub const ENV_ROOTS: &str = "SPECDASH_ROOTS";

/// Log line encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Consecutive ports to try when the first is taken
    #[serde(default = "default_port_attempts")]
    pub port_attempts: u16,
    #[serde(default)]
    pub open_browser: bool,
    /// Messages buffered per viewer before updates are skipped for it
    #[serde(default = "default_viewer_queue")]
    pub viewer_queue: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_port_attempts() -> u16 {
    10
}

fn default_viewer_queue() -> usize {
    256
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            port_attempts: default_port_attempts(),
            open_browser: false,
            viewer_queue: default_viewer_queue(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverySection {
    /// Directories scanned for workspaces; empty means the current directory
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_collaborator_timeout")]
    pub collaborator_timeout_secs: u64,
}

fn default_max_depth() -> usize {
    4
}

fn default_reconcile_interval() -> u64 {
    10
}

fn default_collaborator_timeout() -> u64 {
    5
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            max_depth: default_max_depth(),
            reconcile_interval_secs: default_reconcile_interval(),
            collaborator_timeout_secs: default_collaborator_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelSection {
    /// Provider label reported to viewers (defaults to the command name)
    #[serde(default)]
    pub provider: Option<String>,
    /// Command that opens the tunnel; no command disables tunnelling
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments; `{port}` is replaced with the dashboard's port
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
}

fn default_start_timeout() -> u64 {
    30
}

fn default_max_restarts() -> u32 {
    3
}

impl Default for TunnelSection {
    fn default() -> Self {
        Self {
            provider: None,
            command: None,
            args: Vec::new(),
            start_timeout_secs: default_start_timeout(),
            max_restarts: default_max_restarts(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSection {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Directory for daily-rolling log files; stderr only when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub format: LogFormat,
}

/// Parsed `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub tunnel: TunnelSection,
    #[serde(default)]
    pub operator: OperatorSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl DashboardConfig {
    /// `<config_dir>/specdash/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("specdash").join("config.toml"))
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config.toml")
    }

    /// Load `path` if it exists, otherwise defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `SPECDASH_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = lookup(ENV_PORT) {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("{} must be a port number, got '{}'", ENV_PORT, port))?;
        }
        if let Some(roots) = lookup(ENV_ROOTS) {
            self.discovery.roots = std::env::split_paths(&roots)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
        Ok(())
    }

    /// Roots to scan, falling back to `cwd` when none are configured.
    pub fn roots_or(&self, cwd: &Path) -> Vec<PathBuf> {
        if self.discovery.roots.is_empty() {
            vec![cwd.to_path_buf()]
        } else {
            self.discovery.roots.clone()
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            port_attempts: self.server.port_attempts,
            open_browser: self.server.open_browser,
            viewer_queue: self.server.viewer_queue.max(1),
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            reconcile_interval: Duration::from_secs(self.discovery.reconcile_interval_secs.max(1)),
            collaborator_timeout: Duration::from_secs(
                self.discovery.collaborator_timeout_secs.max(1),
            ),
            operator: self.operator_name(),
        }
    }

    /// Tunnel settings, or `None` when no command is configured.
    pub fn tunnel_config(&self) -> Option<CommandTunnelConfig> {
        let command = self.tunnel.command.clone()?;
        let provider = self.tunnel.provider.clone().unwrap_or_else(|| {
            Path::new(&command)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| command.clone())
        });
        Some(CommandTunnelConfig {
            provider,
            command,
            args: self.tunnel.args.clone(),
            start_timeout: Duration::from_secs(self.tunnel.start_timeout_secs.max(1)),
            max_restarts: self.tunnel.max_restarts,
        })
    }

    /// Display name for the person running the dashboard
    /// (config → git `user.name` → `$USER` → "operator").
    pub fn operator_name(&self) -> String {
        self.operator
            .name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .or_else(crate::vcs::git_user_name)
            .or_else(|| std::env::var("USER").ok().filter(|u| !u.is_empty()))
            .unwrap_or_else(|| "operator".to_string())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.discovery.reconcile_interval_secs == 0 {
            warnings.push("reconcile_interval_secs is 0; using 1 second".to_string());
        }
        if self.discovery.collaborator_timeout_secs == 0 {
            warnings.push("collaborator_timeout_secs is 0; using 1 second".to_string());
        }
        if self.discovery.max_depth == 0 {
            warnings.push("max_depth is 0; only the roots themselves are checked".to_string());
        }
        if self.server.viewer_queue == 0 {
            warnings.push("viewer_queue is 0; using 1".to_string());
        }
        for root in &self.discovery.roots {
            if !root.is_dir() {
                warnings.push(format!("Discovery root {} is not a directory", root.display()));
            }
        }
        if self.tunnel.command.is_none() && !self.tunnel.args.is_empty() {
            warnings.push("[tunnel] args are set but no command is configured".to_string());
        }

        warnings
    }
}
