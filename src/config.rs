// Forwards file: which forwards to run and how to supervise them
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::forward::command::KUBECTL;
use crate::forward::ManagerOptions;
use crate::models::forward::PortForwardConfig;

pub const DEFAULT_FORWARDS_FILE: &str = "forwards.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub start_timeout_secs: u64,
    pub stop_grace_secs: u64,
    /// Walk forward to the next free local port instead of failing.
    pub auto_port: bool,
    pub port_search_attempts: u16,
    pub context_poll_secs: u64,
    pub watch_pod_deletions: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            start_timeout_secs: 15,
            stop_grace_secs: 5,
            auto_port: false,
            port_search_attempts: 20,
            context_poll_secs: 5,
            watch_pod_deletions: true,
        }
    }
}

impl Settings {
    pub fn manager_options(&self, kubeconfig: Option<PathBuf>) -> ManagerOptions {
        ManagerOptions {
            program: KUBECTL.to_string(),
            kubeconfig,
            start_timeout: Duration::from_secs(self.start_timeout_secs.max(1)),
            stop_grace: Duration::from_secs(self.stop_grace_secs),
        }
    }

    pub fn context_poll_interval(&self) -> Duration {
        Duration::from_secs(self.context_poll_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardsFile {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub forwards: Vec<PortForwardConfig>,
}

impl ForwardsFile {
    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(raw).context("failed to parse forwards file")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file = Self::from_yaml(&raw).with_context(|| path.display().to_string())?;
        log::info!(
            "config: {} forward(s) from {}",
            file.forwards.len(),
            path.display()
        );
        Ok(file)
    }
}
