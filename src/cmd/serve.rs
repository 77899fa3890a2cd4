//! Dashboard server command — `specdash serve`.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use specdash::config::DashboardConfig;
use specdash::dashboard::{self, Collaborators};
use specdash::discovery::FsDiscovery;
use specdash::parser::MarkdownParser;
use specdash::tunnel::{CommandTunnelProvider, TunnelProvider};
use specdash::watcher::NotifyChangeNotifier;

/// CLI flags layered over the loaded configuration.
pub struct ServeOverrides {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub roots: Vec<PathBuf>,
    pub interval: Option<u64>,
    pub open: bool,
}

pub async fn cmd_serve(mut config: DashboardConfig, overrides: ServeOverrides) -> Result<()> {
    if let Some(port) = overrides.port {
        config.server.port = port;
    }
    if let Some(host) = overrides.host {
        config.server.host = host;
    }
    if let Some(interval) = overrides.interval {
        config.discovery.reconcile_interval_secs = interval;
    }
    if overrides.open {
        config.server.open_browser = true;
    }

    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let roots = super::effective_roots(&config, &overrides.roots)?;
    tracing::info!(roots = ?roots, "scanning for workspaces");

    let collaborators = Collaborators {
        discovery: Arc::new(FsDiscovery::new(roots, config.discovery.max_depth)),
        parser: Arc::new(MarkdownParser),
        notifier: Arc::new(NotifyChangeNotifier),
    };

    let tunnel = config
        .tunnel_config()
        .map(|tunnel| Arc::new(CommandTunnelProvider::new(tunnel)) as Arc<dyn TunnelProvider>);

    dashboard::start_server(
        config.server_config(),
        collaborators,
        config.service_config(),
        tunnel,
    )
    .await
}
