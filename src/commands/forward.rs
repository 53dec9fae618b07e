use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;

use crate::commands::kubeconfig;
use crate::config::Settings;
use crate::error::{ErrorCategory, ForwardError, Remedy};
use crate::forward::ports::{self, LocalhostProbe};
use crate::forward::process::TokioSpawner;
use crate::forward::PortForwardManager;
use crate::lifecycle::{self, LifecycleEvent};
use crate::models::forward::{PortForwardConfig, PortForwardInfo, ResourceType};
use crate::models::k8s::KubeContext;

/// Host-wide flags shared by the forwarding commands.
#[derive(Debug, Clone, Default)]
pub struct HostOptions {
    pub kubeconfig: Option<PathBuf>,
    pub json: bool,
}

// ── helpers ───────────────────────────────────────────────────────────────────

/// Fills an empty context with the current one and an empty namespace with
/// the context's default namespace (or `default`).
fn fill_defaults(
    config: &mut PortForwardConfig,
    current: Option<&str>,
    contexts: &[KubeContext],
) {
    if config.context.trim().is_empty() {
        if let Some(current) = current {
            config.context = current.to_string();
        }
    }
    if config.namespace.trim().is_empty() {
        config.namespace = contexts
            .iter()
            .find(|c| c.name == config.context)
            .and_then(|c| c.namespace.clone())
            .unwrap_or_else(|| "default".to_string());
    }
}

fn describe(config: &PortForwardConfig) -> String {
    let name = config
        .service_name
        .as_deref()
        .filter(|_| config.resource_type.as_deref() == Some("service"))
        .or(config.pod_name.as_deref())
        .unwrap_or("?");
    let kind = config.resource_type.as_deref().unwrap_or("pod");
    format!("{kind}/{name}")
}

fn remedy_hint(remedy: Remedy) -> &'static str {
    match remedy {
        Remedy::ChooseTarget => "check that the target exists and is running",
        Remedy::FixPermissions => "ask for create permission on pods/portforward",
        Remedy::Retry => "this may be transient, try again",
        Remedy::ChoosePort => "pick another local port or pass --auto-port",
        Remedy::FixConfiguration => "check the kubeconfig and context name",
    }
}

fn report_failure(target: &str, err: &ForwardError) {
    let label = match err.category() {
        ErrorCategory::Configuration => "invalid forward",
        ErrorCategory::Process => "cannot run kubectl",
        ErrorCategory::Connection => "connection failed",
        ErrorCategory::Conflict => "port conflict",
    };
    match err.remedy() {
        Some(remedy) => eprintln!("{target}: {label}: {err} ({})", remedy_hint(remedy)),
        None => eprintln!("{target}: {label}: {err}"),
    }
}

fn print_forward(info: &PortForwardInfo, json: bool) {
    if json {
        match serde_json::to_string(info) {
            Ok(line) => println!("{line}"),
            Err(e) => log::warn!("port-forward: cannot serialize {}: {e}", info.id),
        }
        return;
    }
    println!(
        "{:<8} {:<32} {:<16} {:<20} 127.0.0.1:{} -> {}",
        info.status.label(),
        info.target(),
        info.namespace,
        info.context,
        info.local_port,
        info.remote_port
    );
}

/// (context, namespace) pairs that hold at least one pod forward.
fn pod_scopes(forwards: &[PortForwardInfo]) -> BTreeSet<(String, String)> {
    forwards
        .iter()
        .filter(|f| f.resource_type == ResourceType::Pod)
        .map(|f| (f.context.clone(), f.namespace.clone()))
        .collect()
}

// ── commands ──────────────────────────────────────────────────────────────────

/// Starts `configs`, keeps them supervised until Ctrl-C, then stops them all.
///
/// A forward that fails to start is reported and skipped; the command only
/// fails when none of them started.
pub async fn run_forwards(
    configs: Vec<PortForwardConfig>,
    settings: Settings,
    host: HostOptions,
) -> anyhow::Result<()> {
    let kube = kubeconfig::load_kubeconfig(host.kubeconfig.as_deref());
    let current = kube.as_ref().and_then(|k| k.current_context.clone());
    let contexts = kube.map(kubeconfig::contexts_of).unwrap_or_default();

    let manager = Arc::new(PortForwardManager::new(
        Arc::new(TokioSpawner),
        settings.manager_options(host.kubeconfig.clone()),
    ));

    let mut started = Vec::new();
    for mut config in configs {
        fill_defaults(&mut config, current.as_deref(), &contexts);
        let target = describe(&config);

        if settings.auto_port && config.local_port != 0 {
            match ports::find_available_port(
                &LocalhostProbe,
                config.local_port,
                settings.port_search_attempts,
            ) {
                Ok(alloc) => {
                    if alloc.was_reassigned() {
                        log::info!(
                            "port-forward: {target}: local port {} taken, using {}",
                            alloc.requested,
                            alloc.assigned
                        );
                    }
                    config.local_port = alloc.assigned;
                }
                Err(e) => {
                    report_failure(&target, &e);
                    continue;
                }
            }
        }

        match manager.start_forward(config).await {
            Ok(info) => {
                print_forward(&info, host.json);
                started.push(info);
            }
            Err(e) => report_failure(&target, &e),
        }
    }

    if started.is_empty() {
        anyhow::bail!("no port-forward could be started");
    }

    let (tx, rx) = mpsc::channel(32);
    let mut sources = Vec::new();

    if settings.watch_pod_deletions {
        for (context, namespace) in pod_scopes(&started) {
            match kubeconfig::client_for_context(&context, host.kubeconfig.as_deref()).await {
                Ok(client) => sources.push(tokio::spawn(lifecycle::watch_pod_deletions(
                    client,
                    context,
                    namespace,
                    tx.clone(),
                ))),
                Err(e) => {
                    log::warn!("lifecycle: no pod deletion watch for {context}/{namespace}: {e:#}")
                }
            }
        }
    }
    sources.push(tokio::spawn(lifecycle::watch_context_switches(
        host.kubeconfig.clone(),
        settings.context_poll_interval(),
        tx.clone(),
    )));

    let json = host.json;
    let cleanup = lifecycle::spawn_cleanup_loop(Arc::clone(&manager), rx, move |event, stopped| {
        if *event == LifecycleEvent::Deactivated {
            return;
        }
        for info in stopped {
            eprintln!("{}: stopped after {event:?}", info.target());
            if json {
                print_forward(info, true);
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    log::info!("port-forward: shutting down");

    for source in &sources {
        source.abort();
    }
    if tx.send(LifecycleEvent::Deactivated).await.is_err() {
        manager.stop_all_forwards().await;
    }
    drop(tx);
    cleanup.await.context("cleanup task failed")?;

    Ok(())
}
