//! Tunnel provider that drives an external tunnel CLI.
//!
//! The configured command is spawned with `{port}` substituted into its
//! arguments. The first `https://` URL printed on stdout or stderr is taken
//! as the public URL. If the process later dies on its own, up to
//! `max_restarts` relaunches are attempted before the tunnel is reported
//! stopped.
//!
//! `start` and `stop` are serialized, so at most one process is ever
//! launched. Each launch gets a new generation; a supervisor only touches
//! shared state while its generation is current.

use std::process::Stdio;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{TunnelEvent, TunnelInfo, TunnelOptions, TunnelProvider, TunnelStatus};
use crate::errors::TunnelError;

static URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https://[A-Za-z0-9.\-]+(?::\d+)?(?:/[^\s"'<>|]*)?"#).unwrap());

/// Delay between relaunch attempts grows by this much per attempt.
const RESTART_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct CommandTunnelConfig {
    pub provider: String,
    pub command: String,
    pub args: Vec<String>,
    pub start_timeout: Duration,
    pub max_restarts: u32,
}

#[derive(Default)]
struct Shared {
    info: Option<TunnelInfo>,
    stop: Option<oneshot::Sender<()>>,
    generation: u64,
}

struct RunningTunnel {
    child: Child,
    lines: mpsc::UnboundedReceiver<String>,
}

pub struct CommandTunnelProvider {
    config: Arc<CommandTunnelConfig>,
    shared: Arc<Mutex<Shared>>,
    events: broadcast::Sender<TunnelEvent>,
    /// Held across the whole of `start` and `stop`.
    lifecycle: AsyncMutex<()>,
}

impl CommandTunnelProvider {
    pub fn new(config: CommandTunnelConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config: Arc::new(config),
            shared: Arc::new(Mutex::new(Shared::default())),
            events,
            lifecycle: AsyncMutex::new(()),
        }
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        lock(&self.shared)
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// First public URL mentioned in a line of tunnel output.
pub fn extract_url(line: &str) -> Option<String> {
    URL_REGEX
        .find(line)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ')']).to_string())
}

fn spawn_line_reader<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

async fn launch(config: &CommandTunnelConfig, port: u16) -> Result<(String, RunningTunnel), TunnelError> {
    let port = port.to_string();
    let args: Vec<String> = config.args.iter().map(|a| a.replace("{port}", &port)).collect();

    let mut child = Command::new(&config.command)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| TunnelError::SpawnFailed {
            command: config.command.clone(),
            source,
        })?;

    let (tx, mut lines) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        spawn_line_reader(stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_line_reader(stderr, tx);
    }

    let found = tokio::time::timeout(config.start_timeout, async {
        while let Some(line) = lines.recv().await {
            debug!(line = %line, "tunnel output");
            if let Some(url) = extract_url(&line) {
                return Some(url);
            }
        }
        None
    })
    .await;

    match found {
        Ok(Some(url)) => Ok((url, RunningTunnel { child, lines })),
        Ok(None) => {
            let status = match child.wait().await {
                Ok(status) => status.to_string(),
                Err(e) => e.to_string(),
            };
            Err(TunnelError::ExitedEarly { status })
        }
        Err(_) => {
            let _ = child.kill().await;
            Err(TunnelError::NoUrl {
                command: config.command.clone(),
                secs: config.start_timeout.as_secs(),
            })
        }
    }
}

/// Owns a running tunnel process until it is stopped or gives up.
struct Supervisor {
    config: Arc<CommandTunnelConfig>,
    shared: Arc<Mutex<Shared>>,
    events: broadcast::Sender<TunnelEvent>,
    port: u16,
    generation: u64,
}

impl Supervisor {
    fn emit(&self, event: TunnelEvent) {
        let _ = self.events.send(event);
    }

    async fn run(self, mut running: RunningTunnel, mut stop_rx: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    let _ = running.child.kill().await;
                    self.finish("stopped".to_string());
                    return;
                }
                status = running.child.wait() => {
                    let reason = match status {
                        Ok(status) => format!("tunnel process exited ({})", status),
                        Err(e) => format!("lost track of tunnel process: {}", e),
                    };
                    warn!(reason = %reason, "tunnel process exited unexpectedly");
                    match self.recover().await {
                        Some(next) => running = next,
                        None => {
                            self.finish(reason);
                            return;
                        }
                    }
                }
                Some(line) = running.lines.recv() => {
                    debug!(line = %line, "tunnel output");
                }
            }
        }
    }

    async fn recover(&self) -> Option<RunningTunnel> {
        for attempt in 1..=self.config.max_restarts {
            self.emit(TunnelEvent::RecoveryStart { attempt });
            match launch(&self.config, self.port).await {
                Ok((url, running)) => {
                    let info = TunnelInfo {
                        provider: self.config.provider.clone(),
                        url,
                        active: true,
                    };
                    {
                        let mut shared = lock(&self.shared);
                        if shared.generation == self.generation {
                            shared.info = Some(info.clone());
                        }
                    }
                    info!(url = %info.url, attempt, "tunnel recovered");
                    self.emit(TunnelEvent::RecoverySuccess(info));
                    return Some(running);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "tunnel recovery attempt failed");
                    self.emit(TunnelEvent::RecoveryFailed {
                        attempt,
                        error: e.to_string(),
                    });
                    tokio::time::sleep(RESTART_BACKOFF * attempt).await;
                }
            }
        }
        None
    }

    fn finish(&self, reason: String) {
        {
            let mut shared = lock(&self.shared);
            if shared.generation == self.generation {
                shared.info = None;
                shared.stop = None;
            }
        }
        self.emit(TunnelEvent::Stopped { reason });
    }
}

#[async_trait]
impl TunnelProvider for CommandTunnelProvider {
    fn name(&self) -> &str {
        &self.config.provider
    }

    async fn start(&self, options: TunnelOptions) -> Result<TunnelInfo, TunnelError> {
        let _lifecycle = self.lifecycle.lock().await;
        if let Some(info) = self.shared().info.clone() {
            return Ok(info);
        }

        let (url, running) = launch(&self.config, options.port).await?;
        let info = TunnelInfo {
            provider: self.config.provider.clone(),
            url,
            active: true,
        };
        let (stop_tx, stop_rx) = oneshot::channel();
        let generation = {
            let mut shared = self.shared();
            shared.generation += 1;
            shared.info = Some(info.clone());
            shared.stop = Some(stop_tx);
            shared.generation
        };
        info!(url = %info.url, "tunnel started");
        let _ = self.events.send(TunnelEvent::Started(info.clone()));

        let supervisor = Supervisor {
            config: Arc::clone(&self.config),
            shared: Arc::clone(&self.shared),
            events: self.events.clone(),
            port: options.port,
            generation,
        };
        tokio::spawn(supervisor.run(running, stop_rx));
        Ok(info)
    }

    async fn stop(&self) -> Result<(), TunnelError> {
        let _lifecycle = self.lifecycle.lock().await;
        let stop = {
            let mut shared = self.shared();
            shared.info = None;
            shared.stop.take()
        };
        if let Some(stop) = stop {
            let _ = stop.send(());
        }
        Ok(())
    }

    fn status(&self) -> TunnelStatus {
        let info = self.shared().info.clone();
        TunnelStatus {
            active: info.is_some(),
            info,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<TunnelEvent> {
        self.events.subscribe()
    }
}
