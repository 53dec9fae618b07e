//! Process-spawning seam between the manager and the OS.
//!
//! A spawned process is seen by the manager only through a [`ProcessHandle`]:
//! a stream of output/exit events plus a [`ProcessControl`] for termination.
//! That keeps the manager's state machine independent of how processes are
//! actually launched (tokio here, a scripted fake in tests).

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use crate::forward::command::Invocation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
    /// Always the last event. `None` when killed by a signal.
    Exited(Option<i32>),
}

/// Termination side of a spawned process.
///
/// Dropping it without calling [`ProcessControl::terminate`] also kills the
/// process.
#[derive(Debug)]
pub struct ProcessControl {
    terminate: oneshot::Sender<()>,
    done: oneshot::Receiver<()>,
}

impl ProcessControl {
    pub fn new(terminate: oneshot::Sender<()>, done: oneshot::Receiver<()>) -> Self {
        Self { terminate, done }
    }

    /// Signals the process and waits up to `grace` for it to go away.
    /// Returns `false` if the wait timed out. Safe on already-exited processes.
    pub async fn terminate(self, grace: Duration) -> bool {
        let _ = self.terminate.send(());
        // A dropped sender means the supervising task is gone, which is as
        // good as an acknowledgement.
        tokio::time::timeout(grace, self.done).await.is_ok()
    }
}

#[derive(Debug)]
pub struct ProcessHandle {
    pub pid: Option<u32>,
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
    pub control: ProcessControl,
}

/// Launches forwarding processes. Must be called from within a tokio runtime.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, invocation: &Invocation) -> std::io::Result<ProcessHandle>;
}

// ── tokio implementation ──────────────────────────────────────────────────────

/// Spawns real processes with `tokio::process`, resolving the program
/// through `PATH` first.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSpawner;

fn resolve_program(program: &str) -> String {
    which::which(program)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| program.to_string())
}

fn pump_lines<R>(
    reader: R,
    tx: mpsc::UnboundedSender<ProcessEvent>,
    wrap: fn(String) -> ProcessEvent,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(wrap(line)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::debug!("port-forward: output read error: {e}");
                    break;
                }
            }
        }
    })
}

impl ProcessSpawner for TokioSpawner {
    fn spawn(&self, invocation: &Invocation) -> std::io::Result<ProcessHandle> {
        let program = resolve_program(&invocation.program);

        let mut child = Command::new(&program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (terminate_tx, terminate_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel();

        let stdout = child.stdout.take().map(|out| {
            pump_lines(out, events_tx.clone(), ProcessEvent::Stdout)
        });
        let stderr = child.stderr.take().map(|err| {
            pump_lines(err, events_tx.clone(), ProcessEvent::Stderr)
        });

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                // Fires on an explicit terminate and on the control being dropped.
                _ = terminate_rx => {
                    if let Err(e) = child.start_kill() {
                        log::debug!("port-forward: kill pid {pid:?} failed: {e}");
                    }
                    child.wait().await
                }
            };

            // Drain remaining output so Exited really is the last event.
            for pump in [stdout, stderr].into_iter().flatten() {
                let _ = pump.await;
            }

            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    log::warn!("port-forward: wait on pid {pid:?} failed: {e}");
                    None
                }
            };
            let _ = events_tx.send(ProcessEvent::Exited(code));
            let _ = done_tx.send(());
        });

        Ok(ProcessHandle {
            pid,
            events: events_rx,
            control: ProcessControl::new(terminate_tx, done_rx),
        })
    }
}

// ── scripted fake ─────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod fake {
    use std::io;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    /// How the next spawned fake process behaves.
    #[derive(Debug, Clone)]
    pub enum Script {
        /// Prints the kubectl ready line and keeps running.
        Ready,
        /// Writes the stderr lines, then exits with status 1.
        FailWith(Vec<String>),
        /// Never says anything.
        Silent,
        /// `spawn` itself fails.
        SpawnError(io::ErrorKind),
    }

    pub struct FakeSpawner {
        script: Mutex<Script>,
        pub calls: Mutex<Vec<Invocation>>,
        /// Event streams of spawned fakes, for driving them after startup.
        processes: Mutex<Vec<mpsc::UnboundedSender<ProcessEvent>>>,
        terminated: Arc<AtomicUsize>,
        /// `spawn#N` and `terminate#N` in the order they happened.
        history: Arc<Mutex<Vec<String>>>,
        next_pid: AtomicU32,
    }

    impl FakeSpawner {
        pub fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
                processes: Mutex::new(Vec::new()),
                terminated: Arc::new(AtomicUsize::new(0)),
                history: Arc::new(Mutex::new(Vec::new())),
                next_pid: AtomicU32::new(4000),
            })
        }

        pub fn set_script(&self, script: Script) {
            *self.script.lock() = script;
        }

        pub fn spawn_count(&self) -> usize {
            self.calls.lock().len()
        }

        pub fn terminated_count(&self) -> usize {
            self.terminated.load(Ordering::SeqCst)
        }

        pub fn history(&self) -> Vec<String> {
            self.history.lock().clone()
        }

        /// Sends an event to the `index`-th spawned process's stream.
        pub fn emit(&self, index: usize, event: ProcessEvent) {
            let processes = self.processes.lock();
            let _ = processes[index].send(event);
        }
    }

    fn ready_line(invocation: &Invocation) -> String {
        let ports = invocation
            .args
            .iter()
            .find(|a| a.contains(':') && !a.starts_with("--"))
            .cloned()
            .unwrap_or_default();
        let (local, remote) = ports.split_once(':').unwrap_or(("0", "0"));
        format!("Forwarding from 127.0.0.1:{local} -> {remote}")
    }

    impl ProcessSpawner for FakeSpawner {
        fn spawn(&self, invocation: &Invocation) -> io::Result<ProcessHandle> {
            let script = self.script.lock().clone();
            if let Script::SpawnError(kind) = script {
                return Err(io::Error::from(kind));
            }
            let index = {
                let mut calls = self.calls.lock();
                calls.push(invocation.clone());
                calls.len() - 1
            };
            self.history.lock().push(format!("spawn#{index}"));

            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let (terminate_tx, terminate_rx) = oneshot::channel::<()>();
            let (done_tx, done_rx) = oneshot::channel();

            match script {
                Script::Ready => {
                    let _ = events_tx.send(ProcessEvent::Stdout(ready_line(invocation)));
                }
                Script::FailWith(lines) => {
                    for line in lines {
                        let _ = events_tx.send(ProcessEvent::Stderr(line));
                    }
                    let _ = events_tx.send(ProcessEvent::Exited(Some(1)));
                }
                Script::Silent | Script::SpawnError(_) => {}
            }

            let terminated = Arc::clone(&self.terminated);
            let history = Arc::clone(&self.history);
            let exit_tx = events_tx.clone();
            tokio::spawn(async move {
                if terminate_rx.await.is_ok() {
                    terminated.fetch_add(1, Ordering::SeqCst);
                    history.lock().push(format!("terminate#{index}"));
                    let _ = exit_tx.send(ProcessEvent::Exited(None));
                }
                let _ = done_tx.send(());
            });

            self.processes.lock().push(events_tx);

            Ok(ProcessHandle {
                pid: Some(self.next_pid.fetch_add(1, Ordering::SeqCst)),
                events: events_rx,
                control: ProcessControl::new(terminate_tx, done_rx),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tokio_spawner_streams_output_then_exit() {
        let invocation = Invocation {
            program: "sh".into(),
            args: vec![
                "-c".into(),
                "echo 'Forwarding from 127.0.0.1:1 -> 2'; echo oops >&2; exit 3".into(),
            ],
        };
        let mut handle = TokioSpawner.spawn(&invocation).unwrap();

        let mut events = Vec::new();
        while let Some(event) = handle.events.recv().await {
            events.push(event);
        }

        assert!(events.contains(&ProcessEvent::Stdout("Forwarding from 127.0.0.1:1 -> 2".into())));
        assert!(events.contains(&ProcessEvent::Stderr("oops".into())));
        assert_eq!(events.last(), Some(&ProcessEvent::Exited(Some(3))));
    }

    #[tokio::test]
    async fn terminate_kills_long_running_process() {
        let invocation = Invocation {
            program: "sleep".into(),
            args: vec!["30".into()],
        };
        let mut handle = TokioSpawner.spawn(&invocation).unwrap();

        assert!(handle.control.terminate(Duration::from_secs(5)).await);
        let mut last = None;
        while let Some(event) = handle.events.recv().await {
            last = Some(event);
        }
        assert_eq!(last, Some(ProcessEvent::Exited(None)));
    }

    #[tokio::test]
    async fn missing_binary_is_not_found() {
        let invocation = Invocation {
            program: "definitely-not-kubectl-3f9a".into(),
            args: vec![],
        };
        let err = TokioSpawner.spawn(&invocation).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
