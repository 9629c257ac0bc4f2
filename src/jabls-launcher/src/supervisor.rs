//! Server process supervision.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{Mutex, oneshot, watch};
use tracing::{debug, info, warn};

use crate::catalog::ArchiveDescriptor;
use crate::error::{LauncherError, LauncherResult};

/// Log target for lines printed by the server process.
pub const SERVER_LOG_TARGET: &str = "jabls::server";

/// Tracked server child process.
struct ServerProcess {
    pid: Option<u32>,
    /// Distinguishes this child from any later respawn.
    generation: u64,
    /// Asks the monitor task to kill the child.
    kill_tx: Option<oneshot::Sender<()>>,
    /// Flips to true once the child has been reaped.
    exited: watch::Receiver<bool>,
}

impl ServerProcess {
    fn is_alive(&self) -> bool {
        !*self.exited.borrow()
    }
}

/// Spawns the server executable and tracks at most one live child.
pub struct ProcessSupervisor {
    process: Arc<Mutex<Option<ServerProcess>>>,
    generation: AtomicU64,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self {
            process: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    /// Start the server unless a tracked child is still alive.
    ///
    /// Returns `true` when a new process was spawned.
    pub async fn ensure_running(
        &self,
        descriptor: &ArchiveDescriptor,
        tree_root: &Path,
    ) -> LauncherResult<bool> {
        let mut slot = loop {
            let slot = self.process.lock().await;
            let stopping = match slot.as_ref() {
                Some(process) if process.is_alive() => {
                    if process.kill_tx.is_some() {
                        debug!("Server already running (pid {:?})", process.pid);
                        return Ok(false);
                    }
                    // Being stopped: wait for the old child before replacing it
                    Some(process.exited.clone())
                }
                _ => None,
            };
            let Some(mut exited) = stopping else {
                break slot;
            };
            drop(slot);
            let _ = exited.wait_for(|exited| *exited).await;
        };
        *slot = None;

        let working_dir = descriptor.working_dir(tree_root);
        let command_path = descriptor.executable_path(tree_root);

        let mut child = Command::new(&command_path)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LauncherError::Spawn {
                path: command_path.clone(),
                message: e.to_string(),
            })?;

        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, true));
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(false);

        *slot = Some(ServerProcess {
            pid,
            generation,
            kill_tx: Some(kill_tx),
            exited: exit_rx,
        });
        drop(slot);

        info!("Started server {} (pid {:?})", command_path.display(), pid);

        // Monitor: reap the child, clear the handle, then signal exit
        let process = self.process.clone();
        tokio::spawn(async move {
            // A dropped sender also means "kill": the supervisor is gone
            let finished = tokio::select! {
                status = child.wait() => Some(status),
                _ = &mut kill_rx => None,
            };

            let status = match finished {
                Some(status) => status,
                None => {
                    if let Err(e) = child.start_kill() {
                        debug!("Failed to kill server (pid {:?}): {}", pid, e);
                    }
                    child.wait().await
                }
            };

            match status {
                Ok(status) => info!("Server exited ({})", describe_exit(status)),
                Err(e) => warn!("Failed to wait for server (pid {:?}): {}", pid, e),
            }

            let mut slot = process.lock().await;
            if slot.as_ref().is_some_and(|p| p.generation == generation) {
                *slot = None;
            }
            drop(slot);

            let _ = exit_tx.send(true);
        });

        Ok(true)
    }

    /// Terminate the tracked server and wait until it has exited.
    ///
    /// The handle stays tracked until the monitor has reaped the child, so a
    /// concurrent `ensure_running` waits instead of spawning a second server.
    /// Resolves immediately when nothing was started.
    pub async fn stop(&self) {
        let mut exited = {
            let mut slot = self.process.lock().await;
            let Some(process) = slot.as_mut() else {
                return;
            };
            if let Some(kill_tx) = process.kill_tx.take() {
                info!("Stopping server (pid {:?})", process.pid);
                let _ = kill_tx.send(());
            }
            process.exited.clone()
        };
        let _ = exited.wait_for(|exited| *exited).await;
    }

    /// Whether a tracked child is alive.
    pub async fn is_running(&self) -> bool {
        self.process
            .lock()
            .await
            .as_ref()
            .is_some_and(ServerProcess::is_alive)
    }

    /// OS process id of the tracked child.
    pub async fn pid(&self) -> Option<u32> {
        self.process.lock().await.as_ref().and_then(|p| p.pid)
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward each output line of the child to the log.
async fn forward_output<R: AsyncRead + Unpin>(reader: R, is_stderr: bool) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if is_stderr {
                    warn!(target: SERVER_LOG_TARGET, "{}", line);
                } else {
                    info!(target: SERVER_LOG_TARGET, "{}", line);
                }
            }
            Err(e) => {
                debug!("Server output closed: {}", e);
                break;
            }
        }
    }
}

fn describe_exit(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("code={}", code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal={}", signal);
        }
    }

    status.to_string()
}
