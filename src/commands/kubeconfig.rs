use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use kube::config::{KubeConfigOptions, Kubeconfig};

use crate::models::k8s::KubeContext;

// ── helpers ───────────────────────────────────────────────────────────────────

/// Merges `extra` into `base` by extending clusters, auth_infos, and contexts.
/// `base.current_context` wins; `extra.current_context` is used only if base has none.
fn merge_kubeconfig(mut base: Kubeconfig, extra: Kubeconfig) -> Kubeconfig {
    base.clusters.extend(extra.clusters);
    base.auth_infos.extend(extra.auth_infos);
    base.contexts.extend(extra.contexts);
    if base.current_context.is_none() {
        base.current_context = extra.current_context;
    }
    base
}

/// Regular, non-hidden files in `dir`, sorted so the merge order is stable.
fn scan_kube_dir(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            log::warn!("kubeconfig: cannot read directory {}: {e}", dir.display());
            return Vec::new();
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| !path.is_dir())
        .filter(|path| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            !name.starts_with('.')
        })
        .collect();

    paths.sort();
    paths
}

/// Parses each path as a kubeconfig and merges the ones that load.
fn load_from_paths(paths: &[PathBuf]) -> Option<Kubeconfig> {
    let mut merged: Option<Kubeconfig> = None;

    for path in paths {
        match Kubeconfig::read_from(path) {
            Ok(cfg) => {
                log::debug!(
                    "kubeconfig: ok   ({} context(s))   — {}",
                    cfg.contexts.len(),
                    path.display()
                );
                merged = Some(match merged.take() {
                    None => cfg,
                    Some(base) => merge_kubeconfig(base, cfg),
                });
            }
            Err(e) => {
                // Expected for unrelated files sitting in ~/.kube
                log::debug!("kubeconfig: skip (parse error: {e}) — {}", path.display());
            }
        }
    }

    merged
}

// ── loading ───────────────────────────────────────────────────────────────────

/// Loads the kubeconfig the same way every command sees it.
///
/// Resolution order:
/// 1. An explicit `--kubeconfig` path.
/// 2. `KUBECONFIG`, merged by `Kubeconfig::read()` with kubectl semantics.
/// 3. Every parseable file in `~/.kube`, merged in name order.
///
/// Returns `None` when nothing usable is found.
pub fn load_kubeconfig(explicit: Option<&Path>) -> Option<Kubeconfig> {
    if let Some(path) = explicit {
        return match Kubeconfig::read_from(path) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                log::warn!("kubeconfig: cannot read {}: {e}", path.display());
                None
            }
        };
    }

    let kube_env = std::env::var("KUBECONFIG").unwrap_or_default();
    if !kube_env.is_empty() {
        return match Kubeconfig::read() {
            Ok(cfg) => {
                log::debug!(
                    "kubeconfig: KUBECONFIG merged {} context(s)",
                    cfg.contexts.len()
                );
                Some(cfg)
            }
            Err(e) => {
                log::warn!("kubeconfig: Kubeconfig::read() failed: {e}");
                None
            }
        };
    }

    let kube_dir = dirs::home_dir()?.join(".kube");
    log::debug!("kubeconfig: KUBECONFIG not set, scanning {}", kube_dir.display());
    load_from_paths(&scan_kube_dir(&kube_dir))
}

pub fn contexts_of(kubeconfig: Kubeconfig) -> Vec<KubeContext> {
    let current = kubeconfig.current_context.clone().unwrap_or_default();

    let cluster_servers: HashMap<String, String> = kubeconfig
        .clusters
        .iter()
        .filter_map(|nc| {
            let server = nc.cluster.as_ref()?.server.clone()?;
            Some((nc.name.clone(), server))
        })
        .collect();

    kubeconfig
        .contexts
        .into_iter()
        .filter_map(|named| {
            let ctx = named.context?;
            let server_url = cluster_servers.get(&ctx.cluster).cloned();
            Some(KubeContext {
                is_active: named.name == current,
                name: named.name,
                cluster: ctx.cluster,
                user: ctx.user.unwrap_or_default(),
                namespace: ctx.namespace,
                server_url,
            })
        })
        .collect()
}

/// All contexts of the merged kubeconfig; empty when none can be found.
pub fn list_contexts(explicit: Option<&Path>) -> Vec<KubeContext> {
    load_kubeconfig(explicit).map(contexts_of).unwrap_or_default()
}

pub fn current_context(explicit: Option<&Path>) -> Option<String> {
    load_kubeconfig(explicit)?.current_context
}

/// Builds an API client bound to `context`.
pub async fn client_for_context(
    context: &str,
    explicit: Option<&Path>,
) -> anyhow::Result<kube::Client> {
    let kubeconfig = load_kubeconfig(explicit).context("no kubeconfig found")?;
    let options = KubeConfigOptions {
        context: Some(context.to_string()),
        ..Default::default()
    };
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .with_context(|| format!("cannot load context {context:?}"))?;
    kube::Client::try_from(config)
        .with_context(|| format!("cannot build client for context {context:?}"))
}

// ── commands ──────────────────────────────────────────────────────────────────

/// `contexts`: prints every context, marking the current one.
pub fn print_contexts(explicit: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let contexts = list_contexts(explicit);

    if json {
        for ctx in &contexts {
            println!("{}", serde_json::to_string(ctx)?);
        }
        return Ok(());
    }

    if contexts.is_empty() {
        println!("no kubeconfig contexts found");
        return Ok(());
    }
    for ctx in contexts {
        let marker = if ctx.is_active { "*" } else { " " };
        println!(
            "{marker} {:<30} {:<24} {}",
            ctx.name,
            ctx.namespace.as_deref().unwrap_or("default"),
            ctx.server_url.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
