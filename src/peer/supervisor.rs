//! Sidecar supervisor: owns the peer sidecar's lifecycle.
//!
//! `start()` submits at most one startup task, which waits for the single
//! launch slot and then drives launch attempts through the retry policy. On
//! success the process and its endpoint are published together under the
//! state lock. `stop()` cancels any startup in flight and terminates the
//! running sidecar (SIGTERM, grace period, SIGKILL). Process death is noticed
//! lazily, the next time someone asks whether the sidecar is running.

use super::launch::{self, LaunchedSidecar, SidecarProcess};
use super::readiness::OutputReader;
use super::{PeerProcess, PeerState};
use crate::config::PeerConfig;
use crate::retry::{self, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, Semaphore};
use tokio::task::JoinHandle;

/// Launches and supervises the peer sidecar process.
pub struct SidecarSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: PeerConfig,
    state: Mutex<SupervisorState>,
    /// One permit: launch attempts never overlap, even with a cancelled
    /// startup still being torn down. Closed on shutdown.
    launch_slot: Semaphore,
    shut_down: AtomicBool,
    /// Completes once the shutdown teardown has finished.
    teardown: OnceCell<()>,
}

#[derive(Default)]
struct SupervisorState {
    running: Option<RunningSidecar>,
    startup_task: Option<JoinHandle<()>>,
}

/// The installed sidecar. Process and endpoint are published and cleared together.
struct RunningSidecar {
    process: SidecarProcess,
    reader: OutputReader,
    endpoint: String,
    started_at: DateTime<Utc>,
}

impl From<LaunchedSidecar> for RunningSidecar {
    fn from(launched: LaunchedSidecar) -> Self {
        Self {
            process: launched.process,
            reader: launched.reader,
            endpoint: launched.endpoint,
            started_at: Utc::now(),
        }
    }
}

impl SupervisorState {
    fn is_starting(&self) -> bool {
        self.startup_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Whether the installed sidecar is alive. Clears it if it has exited.
    fn check_alive(&mut self) -> bool {
        let alive = match self.running.as_mut() {
            Some(running) => running.process.is_alive(),
            None => return false,
        };
        if !alive {
            if let Some(dead) = self.running.take() {
                tracing::warn!(
                    pid = dead.process.pid(),
                    endpoint = %dead.endpoint,
                    "peer sidecar exited unexpectedly"
                );
                dead.reader.abort();
            }
        }
        alive
    }
}

impl SidecarSupervisor {
    pub fn new(config: PeerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(SupervisorState::default()),
                launch_slot: Semaphore::new(1),
                shut_down: AtomicBool::new(false),
                teardown: OnceCell::new(),
            }),
        }
    }
}

/// Body of a startup task: launch with retries, then publish the result.
async fn run_startup(inner: Arc<Inner>) {
    let Ok(_slot) = inner.launch_slot.acquire().await else {
        tracing::debug!("launch slot closed, skipping sidecar startup");
        return;
    };

    let policy = RetryPolicy::new(inner.config.max_attempts(), inner.config.backoff_base());
    let outcome =
        retry::run_with_retries(&policy, |attempt| launch::attempt(&inner.config, attempt)).await;

    let mut state = inner.state.lock().await;
    state.startup_task = None;
    let Ok(launched) = outcome else {
        // Already logged by the retry loop
        return;
    };

    if let Some(mut previous) = state.running.take() {
        tracing::warn!(pid = previous.process.pid(), "replacing running sidecar");
        previous.reader.abort();
        previous.process.kill_now();
    }
    tracing::info!(
        pid = launched.process.pid(),
        endpoint = %launched.endpoint,
        announced = launched.announced,
        "peer sidecar is running"
    );
    state.running = Some(RunningSidecar::from(launched));
}

#[async_trait]
impl PeerProcess for SidecarSupervisor {
    fn name(&self) -> &str {
        "sidecar"
    }

    async fn start(&self) {
        if !self.inner.config.enabled {
            tracing::debug!("peer disabled, skipping sidecar startup");
            return;
        }

        let mut state = self.inner.state.lock().await;
        if self.inner.shut_down.load(Ordering::SeqCst) {
            tracing::debug!("supervisor shut down, ignoring start");
            return;
        }
        if state.is_starting() {
            tracing::debug!("peer sidecar already starting");
            return;
        }
        if state.check_alive() {
            tracing::debug!("peer sidecar already running");
            return;
        }

        let inner = Arc::clone(&self.inner);
        state.startup_task = Some(tokio::spawn(run_startup(inner)));
    }

    async fn stop(&self) {
        let mut state = self.inner.state.lock().await;

        if let Some(task) = state.startup_task.take() {
            task.abort();
            match task.await {
                Err(e) if e.is_panic() => {
                    tracing::error!(error = %e, "sidecar startup task panicked");
                }
                Err(_) => tracing::info!("cancelled sidecar startup"),
                Ok(()) => {}
            }
        }

        if let Some(running) = state.running.take() {
            running.reader.stop().await;
            running
                .process
                .terminate(self.inner.config.stop_grace())
                .await;
        }
    }

    async fn is_running(&self) -> bool {
        self.inner.state.lock().await.check_alive()
    }

    async fn endpoint_url(&self) -> Option<String> {
        let mut state = self.inner.state.lock().await;
        if !state.check_alive() {
            return None;
        }
        state.running.as_ref().map(|r| r.endpoint.clone())
    }

    async fn state(&self) -> PeerState {
        let mut state = self.inner.state.lock().await;
        if state.check_alive() {
            PeerState::Running
        } else if state.is_starting() {
            PeerState::Starting
        } else {
            PeerState::Stopped
        }
    }

    async fn started_at(&self) -> Option<DateTime<Utc>> {
        let mut state = self.inner.state.lock().await;
        if !state.check_alive() {
            return None;
        }
        state.running.as_ref().map(|r| r.started_at)
    }

    /// Later and concurrent callers wait for the first teardown to finish.
    async fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        self.inner
            .teardown
            .get_or_init(|| async {
                self.stop().await;
                self.inner.launch_slot.close();
                tracing::info!("sidecar supervisor shut down");
            })
            .await;
    }
}
