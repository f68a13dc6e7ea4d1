//! Single sidecar launch: spawn the peer script, wait (bounded) for it to
//! announce readiness, and confirm it is still alive.

use super::port;
use super::readiness::{self, OutputReader};
use crate::config::PeerConfig;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;

/// Path the sidecar serves WebTransport sessions on.
pub const WELL_KNOWN_PATH: &str = "/.well-known/webtransport";

/// Errors that can occur during a launch attempt.
#[derive(Debug)]
pub enum LaunchError {
    /// The sidecar script does not exist. Not retryable.
    Configuration { path: PathBuf },
    /// No free port could be obtained.
    PortAllocation { source: std::io::Error },
    /// The OS refused to start the process.
    Spawn {
        command: String,
        source: std::io::Error,
    },
    /// No readiness marker within the timeout. Only logged while the process is alive.
    ReadinessTimeout { timeout: Duration },
    /// The process exited before the readiness window closed.
    Exited { status: ExitStatus },
    /// Querying the process state failed.
    Io { source: std::io::Error },
}

impl LaunchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LaunchError::Configuration { .. })
    }
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchError::Configuration { path } => {
                write!(f, "peer sidecar script not found at {}", path.display())
            }
            LaunchError::PortAllocation { source } => {
                write!(f, "failed to allocate a sidecar port: {}", source)
            }
            LaunchError::Spawn { command, source } => {
                write!(f, "failed to spawn sidecar with {}: {}", command, source)
            }
            LaunchError::ReadinessTimeout { timeout } => write!(
                f,
                "sidecar did not announce readiness within {}ms",
                timeout.as_millis()
            ),
            LaunchError::Exited { status } => {
                write!(f, "sidecar process exited before becoming ready ({})", status)
            }
            LaunchError::Io { source } => {
                write!(f, "I/O error while checking sidecar: {}", source)
            }
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LaunchError::PortAllocation { source } => Some(source),
            LaunchError::Spawn { source, .. } => Some(source),
            LaunchError::Io { source } => Some(source),
            LaunchError::Configuration { .. }
            | LaunchError::ReadinessTimeout { .. }
            | LaunchError::Exited { .. } => None,
        }
    }
}

/// Owned handle to a running sidecar.
///
/// The child runs in its own process group. Dropping the handle kills the
/// whole group if the child has not exited yet.
#[derive(Debug)]
pub struct SidecarProcess {
    child: Child,
    pid: u32,
}

impl SidecarProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Non-blocking liveness check. Reaps the child if it has exited.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Like `is_alive`, but an unknown wait status counts as possibly running.
    fn may_be_running(&mut self) -> bool {
        status_may_be_running(&self.child.try_wait())
    }

    fn signal_group(&self, signal: Signal) {
        // pid 0 would address our own process group
        let pid = match i32::try_from(self.pid) {
            Ok(pid) if pid > 0 => pid,
            _ => return,
        };
        if let Err(e) = killpg(Pid::from_raw(pid), signal) {
            tracing::debug!(pid = self.pid, ?signal, error = %e, "failed to signal sidecar group");
        }
    }

    /// SIGTERM the process group, wait up to `grace`, then SIGKILL.
    pub async fn terminate(mut self, grace: Duration) {
        if !self.is_alive() {
            tracing::debug!(pid = self.pid, "sidecar already exited");
            return;
        }

        tracing::info!(pid = self.pid, grace_ms = grace.as_millis() as u64, "stopping sidecar");
        self.signal_group(Signal::SIGTERM);
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(pid = self.pid, %status, "sidecar exited");
                return;
            }
            Ok(Err(e)) => {
                tracing::warn!(pid = self.pid, error = %e, "failed waiting for sidecar exit");
            }
            Err(_) => {
                tracing::warn!(
                    pid = self.pid,
                    "sidecar ignored SIGTERM for {}ms, killing",
                    grace.as_millis()
                );
            }
        }

        self.signal_group(Signal::SIGKILL);
        if let Err(e) = self.child.kill().await {
            tracing::warn!(pid = self.pid, error = %e, "failed to kill sidecar");
        }
    }

    /// SIGKILL the process group without waiting.
    pub fn kill_now(&mut self) {
        if self.may_be_running() {
            self.signal_group(Signal::SIGKILL);
            let _ = self.child.start_kill();
        }
    }
}

impl Drop for SidecarProcess {
    fn drop(&mut self) {
        self.kill_now();
    }
}

fn status_may_be_running(status: &std::io::Result<Option<ExitStatus>>) -> bool {
    !matches!(status, Ok(Some(_)))
}

/// A sidecar that passed its launch checks.
#[derive(Debug)]
pub struct LaunchedSidecar {
    pub process: SidecarProcess,
    pub reader: OutputReader,
    pub endpoint: String,
    /// Whether the readiness marker was seen before the deadline.
    pub announced: bool,
}

/// Endpoint URL the sidecar serves on.
pub fn endpoint_url(host: &str, port: u16) -> String {
    format!("https://{host}:{port}{WELL_KNOWN_PATH}")
}

/// Resolve the configured script to an absolute path that exists.
fn resolve_script_path(configured: &Path) -> Result<PathBuf, LaunchError> {
    let path = std::path::absolute(configured).unwrap_or_else(|_| configured.to_path_buf());
    if !path.exists() {
        return Err(LaunchError::Configuration { path });
    }
    Ok(path)
}

fn build_command(config: &PeerConfig, script: &Path, host: &str, port: u16) -> Command {
    let workdir = script
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut command = Command::new(&config.command);
    command
        .arg(script)
        .current_dir(workdir)
        .env("PEER_HOST", host)
        .env("PEER_PORT", port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0) // New process group for clean kill
        .kill_on_drop(true);

    if let Some(cert) = config.cert_path.as_deref().filter(|c| !c.trim().is_empty()) {
        command.env("PEER_CERT", cert);
    }
    if let Some(key) = config.key_path.as_deref().filter(|k| !k.trim().is_empty()) {
        command.env("PEER_KEY", key);
    }
    command
}

/// Launch the sidecar once.
///
/// Readiness is advisory: a process that stays silent but alive past the
/// timeout is accepted with a warning. A process that has exited when the
/// readiness window closes fails the attempt.
pub async fn attempt(config: &PeerConfig, attempt: u32) -> Result<LaunchedSidecar, LaunchError> {
    let script = resolve_script_path(&config.script_path)?;
    let host = config.effective_host();
    let port = match config.port {
        Some(port) => port,
        None => port::allocate(host).map_err(|e| LaunchError::PortAllocation { source: e })?,
    };
    let endpoint = endpoint_url(host, port);

    tracing::info!(
        attempt,
        host,
        port,
        script = %script.display(),
        "starting peer sidecar"
    );

    let mut child = build_command(config, &script, host, port)
        .spawn()
        .map_err(|e| LaunchError::Spawn {
            command: config.command.clone(),
            source: e,
        })?;

    let pid = child.id().unwrap_or(0);
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut process = SidecarProcess { child, pid };
    tracing::debug!(pid, "sidecar process spawned");

    let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
        return Err(LaunchError::Io {
            source: std::io::Error::other("sidecar output pipes unavailable"),
        });
    };
    let (reader, ready) = readiness::watch(stdout, stderr, config.ready_marker.clone(), pid);

    let timeout = config.ready_timeout();
    let deadline = Instant::now() + timeout;
    let announced = match tokio::time::timeout_at(deadline, ready).await {
        Ok(Ok(())) => true,
        Ok(Err(_)) => {
            // Output closed without the marker; give the exit a chance to land
            let _ = tokio::time::timeout_at(deadline, process.child.wait()).await;
            false
        }
        Err(_) => false,
    };

    match process.child.try_wait() {
        Ok(None) => {}
        Ok(Some(status)) => {
            reader.stop().await;
            return Err(LaunchError::Exited { status });
        }
        Err(e) => {
            reader.stop().await;
            return Err(LaunchError::Io { source: e });
        }
    }

    if !announced {
        let advisory = LaunchError::ReadinessTimeout { timeout };
        tracing::warn!(pid, error = %advisory, "accepting live sidecar without readiness");
    }

    Ok(LaunchedSidecar {
        process,
        reader,
        endpoint,
        announced,
    })
}
