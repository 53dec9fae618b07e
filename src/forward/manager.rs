//! Registry and supervisor for `kubectl port-forward` sessions.
//!
//! One [`PortForwardManager`] is built when the host starts and shared (as an
//! `Arc`) with everything that needs to see or stop forwards. The table lives
//! behind a single lock; every check-then-insert and every removal happens in
//! one critical section, so nobody can observe a half-registered forward.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{ConnectionFailure, ForwardError};
use crate::forward::command::{self, ForwardRequest, KUBECTL};
use crate::forward::diagnostics;
use crate::forward::identity::ForwardId;
use crate::forward::ports::{LocalhostProbe, PortProbe};
use crate::forward::process::{ProcessControl, ProcessEvent, ProcessSpawner};
use crate::forward::state::{ForwardEvent, ForwardStatus};
use crate::models::forward::{PortForwardConfig, PortForwardInfo, ResourceType};

/// How far past a conflicting port to look for a suggestion.
const SUGGESTION_ATTEMPTS: u16 = 100;

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Binary to run; resolved through `PATH` by the spawner.
    pub program: String,
    /// Passed as `--kubeconfig` when set.
    pub kubeconfig: Option<PathBuf>,
    /// How long `start_forward` waits for kubectl to report the bind.
    pub start_timeout: Duration,
    /// How long a stop waits for the process to acknowledge termination.
    pub stop_grace: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            program: KUBECTL.to_string(),
            kubeconfig: None,
            start_timeout: Duration::from_secs(15),
            stop_grace: Duration::from_secs(5),
        }
    }
}

struct Entry {
    info: PortForwardInfo,
    control: Option<ProcessControl>,
    /// Distinguishes successive processes registered under the same id.
    session: u64,
}

type Table = HashMap<ForwardId, Entry>;

/// Outcome of inspecting the table for a new start.
enum Claim {
    Registered {
        session: u64,
        events: mpsc::UnboundedReceiver<ProcessEvent>,
    },
    Existing(PortForwardInfo),
    /// A failed record was taken out; its process must be stopped first.
    Replace(Entry),
    PortTaken(HashSet<u16>),
}

pub struct PortForwardManager {
    table: Arc<Mutex<Table>>,
    spawner: Arc<dyn ProcessSpawner>,
    probe: Arc<dyn PortProbe>,
    options: ManagerOptions,
    sessions: AtomicU64,
}

impl PortForwardManager {
    pub fn new(spawner: Arc<dyn ProcessSpawner>, options: ManagerOptions) -> Self {
        Self::with_probe(spawner, Arc::new(LocalhostProbe), options)
    }

    pub fn with_probe(
        spawner: Arc<dyn ProcessSpawner>,
        probe: Arc<dyn PortProbe>,
        options: ManagerOptions,
    ) -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
            spawner,
            probe,
            options,
            sessions: AtomicU64::new(1),
        }
    }

    // ── start ─────────────────────────────────────────────────────────────────

    /// Validates `config`, spawns one kubectl process and waits for it to
    /// report the bind.
    ///
    /// Starting an identity that is already starting or active returns the
    /// existing record without spawning. An identity whose record is in
    /// `Error` is replaced; its old process is stopped before the new one is
    /// spawned.
    pub async fn start_forward(
        &self,
        config: PortForwardConfig,
    ) -> Result<PortForwardInfo, ForwardError> {
        let request = ForwardRequest::try_from(&config)?;
        let id = request.id();

        let (session, events) = loop {
            let claim = {
                let mut table = self.table.lock();
                self.claim(&mut table, &request, &id)?
            };
            match claim {
                Claim::Registered { session, events } => break (session, events),
                Claim::Existing(info) => {
                    log::debug!("port-forward: {id} already {}", info.status.label());
                    return Ok(info);
                }
                Claim::Replace(stale) => {
                    log::info!("port-forward: replacing failed forward {id}");
                    if let Some(control) = stale.control {
                        self.await_termination(&id, control).await;
                    }
                }
                Claim::PortTaken(held) => {
                    return Err(ForwardError::PortInUse {
                        port: request.local_port,
                        suggestion: self.suggest_port(&held, request.local_port),
                    });
                }
            }
        };

        self.await_ready(id, session, events).await
    }

    /// The locked half of a start: decides what to do with `id` and, when
    /// the way is clear, spawns and registers the process.
    fn claim(
        &self,
        table: &mut Table,
        request: &ForwardRequest,
        id: &ForwardId,
    ) -> Result<Claim, ForwardError> {
        if let Some(existing) = table.get(id) {
            if existing.info.status.is_live() {
                return Ok(Claim::Existing(existing.info.clone()));
            }
        }
        if let Some(stale) = table.remove(id) {
            return Ok(Claim::Replace(stale));
        }
        if table.values().any(|e| e.info.local_port == request.local_port) {
            let held = table.values().map(|e| e.info.local_port).collect();
            return Ok(Claim::PortTaken(held));
        }

        let invocation = command::build(
            request,
            &self.options.program,
            self.options.kubeconfig.as_deref(),
        );
        log::info!("port-forward: spawning {}", invocation.display());

        let handle = self.spawner.spawn(&invocation).map_err(|e| {
            log::warn!("port-forward: spawn failed for {id}: {e}");
            if e.kind() == std::io::ErrorKind::NotFound {
                ForwardError::KubectlNotFound(e)
            } else {
                ForwardError::Spawn(e)
            }
        })?;

        let session = self.sessions.fetch_add(1, Ordering::Relaxed);
        table.insert(
            id.clone(),
            Entry {
                info: new_record(request, id.clone(), handle.pid),
                control: Some(handle.control),
                session,
            },
        );
        Ok(Claim::Registered {
            session,
            events: handle.events,
        })
    }

    async fn await_ready(
        &self,
        id: ForwardId,
        session: u64,
        mut events: mpsc::UnboundedReceiver<ProcessEvent>,
    ) -> Result<PortForwardInfo, ForwardError> {
        let outcome =
            tokio::time::timeout(self.options.start_timeout, wait_for_bind(&mut events)).await;

        let failure = match outcome {
            Ok(Ok(())) => {
                let ready = update(&self.table, &id, session, |entry| {
                    entry.info.status = entry.info.status.apply(ForwardEvent::Ready);
                });
                return match ready {
                    Some(info) => {
                        log::info!(
                            "port-forward: {} ready on 127.0.0.1:{} -> {}",
                            info.target(),
                            info.local_port,
                            info.remote_port
                        );
                        tokio::spawn(monitor(Arc::clone(&self.table), id, session, events));
                        Ok(info)
                    }
                    None => Err(ForwardError::StoppedDuringStartup(id.to_string())),
                };
            }
            Ok(Err(failure)) => ForwardError::Connection(failure),
            Err(_) => ForwardError::StartTimeout(self.options.start_timeout),
        };

        let removed = {
            let mut table = self.table.lock();
            let owned = table.get(&id).is_some_and(|entry| entry.session == session);
            if owned {
                table.remove(&id)
            } else {
                None
            }
        };
        let Some(entry) = removed else {
            // A concurrent stop took the record and the process with it.
            log::info!("port-forward: {id} stopped during startup");
            return Err(ForwardError::StoppedDuringStartup(id.to_string()));
        };

        log::warn!("port-forward: {id} failed to start: {failure}");
        if let Some(control) = entry.control {
            self.await_termination(&id, control).await;
        }
        Err(failure)
    }

    // ── stop ──────────────────────────────────────────────────────────────────

    /// Stops one forward. Unknown ids are a no-op returning `None`.
    pub async fn stop_forward(&self, id: &ForwardId) -> Option<PortForwardInfo> {
        let entry = self.table.lock().remove(id);
        match entry {
            Some(entry) => Some(self.finish(entry).await),
            None => {
                log::debug!("port-forward: stop requested for unknown forward {id}");
                None
            }
        }
    }

    /// Stops everything. Never fails, also on an empty table.
    pub async fn stop_all_forwards(&self) -> Vec<PortForwardInfo> {
        self.stop_where(|_| true).await
    }

    /// Stops pod forwards targeting `pod` in `namespace` under `context`.
    pub async fn stop_forwards_for_pod(
        &self,
        context: &str,
        namespace: &str,
        pod: &str,
    ) -> Vec<PortForwardInfo> {
        self.stop_where(|info| {
            info.resource_type == ResourceType::Pod
                && info.resource_name == pod
                && info.namespace == namespace
                && info.context == context
        })
        .await
    }

    /// Stops every forward running under `context`.
    pub async fn stop_forwards_for_context(&self, context: &str) -> Vec<PortForwardInfo> {
        self.stop_where(|info| info.context == context).await
    }

    async fn stop_where<F>(&self, matches: F) -> Vec<PortForwardInfo>
    where
        F: Fn(&PortForwardInfo) -> bool,
    {
        let entries: Vec<Entry> = {
            let mut table = self.table.lock();
            let ids: Vec<ForwardId> = table
                .values()
                .filter(|e| matches(&e.info))
                .map(|e| e.info.id.clone())
                .collect();
            ids.iter().filter_map(|id| table.remove(id)).collect()
        };

        let stops = entries.into_iter().map(|entry| self.finish(entry));
        futures::future::join_all(stops).await
    }

    async fn finish(&self, mut entry: Entry) -> PortForwardInfo {
        entry.info.status = entry.info.status.apply(ForwardEvent::Stop);
        if let Some(control) = entry.control.take() {
            self.await_termination(&entry.info.id, control).await;
        }
        log::info!("port-forward: stopped {}", entry.info.id);
        entry.info
    }

    async fn await_termination(&self, id: &ForwardId, control: ProcessControl) {
        if !control.terminate(self.options.stop_grace).await {
            log::warn!(
                "port-forward: {id} did not exit within {:?}",
                self.options.stop_grace
            );
        }
    }

    // ── queries ───────────────────────────────────────────────────────────────

    /// Snapshot of every forward, in no particular order.
    pub fn get_all_forwards(&self) -> Vec<PortForwardInfo> {
        self.table.lock().values().map(|e| e.info.clone()).collect()
    }

    pub fn get_forward_info(&self, id: &ForwardId) -> Option<PortForwardInfo> {
        self.table.lock().get(id).map(|e| e.info.clone())
    }

    /// Next port at or after `desired` that is not in `held` and that is
    /// bindable on this host. Called without the table lock.
    fn suggest_port(&self, held: &HashSet<u16>, desired: u16) -> Option<u16> {
        let end = desired.saturating_add(SUGGESTION_ATTEMPTS);
        (desired..=end).find(|port| !held.contains(port) && self.probe.is_free(*port))
    }
}

fn new_record(request: &ForwardRequest, id: ForwardId, pid: Option<u32>) -> PortForwardInfo {
    let name = request.target.name().to_string();
    PortForwardInfo {
        id,
        resource_type: request.target.resource_type(),
        resource_name: name.clone(),
        pod_name: name,
        container_name: request.target.container().map(str::to_string),
        namespace: request.namespace.clone(),
        context: request.context.clone(),
        local_port: request.local_port,
        remote_port: request.remote_port,
        pid,
        started_at: Utc::now(),
        status: ForwardStatus::Starting,
        last_error: None,
    }
}

/// Applies `change` to the entry if it still belongs to `session`.
fn update<F>(table: &Mutex<Table>, id: &ForwardId, session: u64, change: F) -> Option<PortForwardInfo>
where
    F: FnOnce(&mut Entry),
{
    let mut table = table.lock();
    let entry = table.get_mut(id).filter(|e| e.session == session)?;
    change(entry);
    Some(entry.info.clone())
}

/// Reads process events until kubectl reports the bind or fails.
async fn wait_for_bind(
    events: &mut mpsc::UnboundedReceiver<ProcessEvent>,
) -> Result<(), ConnectionFailure> {
    let mut last_stderr = None;

    while let Some(event) = events.recv().await {
        match event {
            ProcessEvent::Stdout(line) if diagnostics::is_ready_line(&line) => return Ok(()),
            ProcessEvent::Stdout(line) => log::debug!("port-forward: stdout: {line}"),
            ProcessEvent::Stderr(line) => {
                log::debug!("port-forward: stderr: {line}");
                if let Some(failure) = diagnostics::classify(&line) {
                    return Err(failure);
                }
                last_stderr = Some(line);
            }
            ProcessEvent::Exited(code) => {
                return Err(ConnectionFailure::Exited {
                    code,
                    message: last_stderr.unwrap_or_else(|| "exited before binding".to_string()),
                })
            }
        }
    }

    Err(ConnectionFailure::Exited {
        code: None,
        message: last_stderr.unwrap_or_else(|| "output closed before binding".to_string()),
    })
}

/// Follows an active forward until its process exits or its record goes away.
async fn monitor(
    table: Arc<Mutex<Table>>,
    id: ForwardId,
    session: u64,
    mut events: mpsc::UnboundedReceiver<ProcessEvent>,
) {
    let mut last_stderr: Option<String> = None;

    while let Some(event) = events.recv().await {
        let transition = match event {
            ProcessEvent::Stdout(line) => {
                log::trace!("port-forward: {id}: {line}");
                None
            }
            ProcessEvent::Stderr(line) => {
                last_stderr = Some(line.clone());
                if diagnostics::is_per_connection_error(&line) {
                    log::warn!("port-forward: {id}: {line}");
                    update(&table, &id, session, |entry| {
                        entry.info.last_error = Some(line);
                    });
                    None
                } else {
                    diagnostics::classify(&line).map(ForwardEvent::Failed)
                }
            }
            ProcessEvent::Exited(code) => Some(ForwardEvent::Exited {
                code,
                last_stderr: last_stderr.take(),
            }),
        };

        let Some(event) = transition else { continue };
        let exited = matches!(event, ForwardEvent::Exited { .. });

        let updated = update(&table, &id, session, |entry| {
            entry.info.status = entry.info.status.apply(event);
        });
        match updated {
            Some(info) => {
                if let ForwardStatus::Error { failure } = &info.status {
                    log::warn!("port-forward: {id} failed: {failure}");
                }
            }
            // Stopped or replaced; whoever removed it owns the process now.
            None => break,
        }
        if exited {
            break;
        }
    }
}
