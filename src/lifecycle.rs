//! Cleanup triggers for managed forwards.
//!
//! Event sources (pod watch, context poller, the host shutting down) push
//! [`LifecycleEvent`]s into a channel; [`spawn_cleanup_loop`] drains it into
//! the manager. Every handler is best-effort and never fails.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, ResourceExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::commands::kubeconfig;
use crate::forward::PortForwardManager;
use crate::models::forward::PortForwardInfo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    PodDeleted {
        context: String,
        namespace: String,
        pod: String,
    },
    /// The active context changed. Only forwards under `from` are stopped.
    ContextSwitched {
        from: Option<String>,
        to: Option<String>,
    },
    /// The host is going away.
    Deactivated,
}

impl PortForwardManager {
    pub async fn handle_lifecycle(&self, event: LifecycleEvent) -> Vec<PortForwardInfo> {
        let stopped = match &event {
            LifecycleEvent::PodDeleted {
                context,
                namespace,
                pod,
            } => self.stop_forwards_for_pod(context, namespace, pod).await,
            LifecycleEvent::ContextSwitched { from: Some(from), .. } => {
                self.stop_forwards_for_context(from).await
            }
            LifecycleEvent::ContextSwitched { from: None, .. } => Vec::new(),
            LifecycleEvent::Deactivated => self.stop_all_forwards().await,
        };

        if !stopped.is_empty() {
            log::info!(
                "lifecycle: {event:?} stopped {} forward(s)",
                stopped.len()
            );
        }
        stopped
    }
}

/// Feeds every received event into `manager` until all senders are gone.
/// `on_stopped` sees the forwards each event tore down.
pub fn spawn_cleanup_loop<F>(
    manager: Arc<PortForwardManager>,
    mut events: mpsc::Receiver<LifecycleEvent>,
    on_stopped: F,
) -> JoinHandle<()>
where
    F: Fn(&LifecycleEvent, &[PortForwardInfo]) + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let deactivated = event == LifecycleEvent::Deactivated;
            let stopped = manager.handle_lifecycle(event.clone()).await;
            if !stopped.is_empty() {
                on_stopped(&event, &stopped);
            }
            if deactivated {
                break;
            }
        }
        log::debug!("lifecycle: cleanup loop finished");
    })
}

// ── sources ───────────────────────────────────────────────────────────────────

/// Watches pods in `namespace` and reports deletions. Runs until the
/// receiving side is dropped.
pub async fn watch_pod_deletions(
    client: kube::Client,
    context: String,
    namespace: String,
    tx: mpsc::Sender<LifecycleEvent>,
) {
    let pods: Api<Pod> = Api::namespaced(client, &namespace);
    let mut stream = watcher::watcher(pods, watcher::Config::default())
        .default_backoff()
        .boxed();

    log::info!("lifecycle: watching pod deletions in {context}/{namespace}");

    while let Some(item) = stream.next().await {
        match item {
            Ok(Event::Delete(pod)) => {
                let event = LifecycleEvent::PodDeleted {
                    context: context.clone(),
                    namespace: namespace.clone(),
                    pod: pod.name_any(),
                };
                log::debug!("lifecycle: {event:?}");
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("lifecycle: pod watch in {context}/{namespace}: {e}"),
        }
    }
}

/// Polls the kubeconfig `current-context` every `interval` and reports
/// changes. Runs until the receiving side is dropped.
pub async fn watch_context_switches(
    kubeconfig_path: Option<PathBuf>,
    interval: Duration,
    tx: mpsc::Sender<LifecycleEvent>,
) {
    let mut current = kubeconfig::current_context(kubeconfig_path.as_deref());
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let next = kubeconfig::current_context(kubeconfig_path.as_deref());
        if next == current {
            continue;
        }
        let event = LifecycleEvent::ContextSwitched {
            from: current.clone(),
            to: next.clone(),
        };
        log::info!("lifecycle: context switched {current:?} -> {next:?}");
        current = next;
        if tx.send(event).await.is_err() {
            break;
        }
    }
}
