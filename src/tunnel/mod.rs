//! Secure-tunnel lifecycle.
//!
//! The dashboard never reasons about tunnel internals. A [`TunnelProvider`]
//! does the work; [`TunnelManager`] makes `start` idempotent and `stop` a
//! no-op when idle, and exposes the provider's event stream so every event
//! can be relayed to viewers unchanged.

pub mod command;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};

use crate::errors::TunnelError;

pub use command::{CommandTunnelConfig, CommandTunnelProvider};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelInfo {
    pub provider: String,
    pub url: String,
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStatus {
    pub active: bool,
    pub info: Option<TunnelInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelMetrics {
    pub visitors: u64,
    pub requests: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelOptions {
    /// Local port the tunnel should expose.
    pub port: u16,
}

/// Lifecycle and metrics events emitted by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelEvent {
    Started(TunnelInfo),
    Stopped { reason: String },
    MetricsUpdated(TunnelMetrics),
    VisitorNew { visitor: String },
    RecoveryStart { attempt: u32 },
    RecoverySuccess(TunnelInfo),
    RecoveryFailed { attempt: u32, error: String },
}

#[async_trait]
pub trait TunnelProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self, options: TunnelOptions) -> Result<TunnelInfo, TunnelError>;

    async fn stop(&self) -> Result<(), TunnelError>;

    fn status(&self) -> TunnelStatus;

    fn subscribe(&self) -> broadcast::Receiver<TunnelEvent>;
}

/// Idempotent start/stop around an optional provider. Calls are serialized,
/// so concurrent requests never launch a second tunnel.
pub struct TunnelManager {
    provider: Option<Arc<dyn TunnelProvider>>,
    options: TunnelOptions,
    lifecycle: Mutex<()>,
}

impl TunnelManager {
    pub fn new(provider: Arc<dyn TunnelProvider>, options: TunnelOptions) -> Self {
        Self {
            provider: Some(provider),
            options,
            lifecycle: Mutex::new(()),
        }
    }

    /// A manager with no provider; `start` reports `NotConfigured`.
    pub fn disabled() -> Self {
        Self {
            provider: None,
            options: TunnelOptions { port: 0 },
            lifecycle: Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> Option<broadcast::Receiver<TunnelEvent>> {
        self.provider.as_ref().map(|p| p.subscribe())
    }

    pub fn status(&self) -> TunnelStatus {
        self.provider
            .as_ref()
            .map(|p| p.status())
            .unwrap_or_default()
    }

    /// Start the tunnel, or return the running one's info.
    pub async fn start(&self) -> Result<TunnelInfo, TunnelError> {
        let provider = self.provider.as_ref().ok_or(TunnelError::NotConfigured)?;
        let _lifecycle = self.lifecycle.lock().await;
        let status = provider.status();
        if status.active
            && let Some(info) = status.info
        {
            return Ok(info);
        }

        info!(provider = provider.name(), port = self.options.port, "starting tunnel");
        provider.start(self.options).await.inspect_err(|e| {
            warn!(provider = provider.name(), error = %e, "tunnel failed to start");
        })
    }

    /// Stop the tunnel if one is running.
    pub async fn stop(&self) -> Result<(), TunnelError> {
        let Some(provider) = self.provider.as_ref() else {
            return Ok(());
        };
        let _lifecycle = self.lifecycle.lock().await;
        if !provider.status().active {
            return Ok(());
        }
        info!(provider = provider.name(), "stopping tunnel");
        provider.stop().await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory provider that records calls and emits events like a real one.
    pub struct FakeTunnelProvider {
        pub starts: AtomicUsize,
        pub stops: AtomicUsize,
        pub fail_with: Mutex<Option<String>>,
        /// Simulated launch time.
        pub start_delay: Mutex<Option<std::time::Duration>>,
        info: Mutex<Option<TunnelInfo>>,
        events: broadcast::Sender<TunnelEvent>,
    }

    impl FakeTunnelProvider {
        pub fn new() -> Self {
            let (events, _) = broadcast::channel(32);
            Self {
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                fail_with: Mutex::new(None),
                start_delay: Mutex::new(None),
                info: Mutex::new(None),
                events,
            }
        }

        pub fn emit(&self, event: TunnelEvent) {
            let _ = self.events.send(event);
        }
    }

    #[async_trait]
    impl TunnelProvider for FakeTunnelProvider {
        fn name(&self) -> &str {
            "fake"
        }

        async fn start(&self, options: TunnelOptions) -> Result<TunnelInfo, TunnelError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            let delay = *self.start_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(msg) = self.fail_with.lock().unwrap().clone() {
                return Err(TunnelError::Provider(msg));
            }
            let info = TunnelInfo {
                provider: "fake".into(),
                url: format!("https://fake.example/{}", options.port),
                active: true,
            };
            *self.info.lock().unwrap() = Some(info.clone());
            self.emit(TunnelEvent::Started(info.clone()));
            Ok(info)
        }

        async fn stop(&self) -> Result<(), TunnelError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            *self.info.lock().unwrap() = None;
            self.emit(TunnelEvent::Stopped {
                reason: "stopped".into(),
            });
            Ok(())
        }

        fn status(&self) -> TunnelStatus {
            let info = self.info.lock().unwrap().clone();
            TunnelStatus {
                active: info.is_some(),
                info,
            }
        }

        fn subscribe(&self) -> broadcast::Receiver<TunnelEvent> {
            self.events.subscribe()
        }
    }
}
