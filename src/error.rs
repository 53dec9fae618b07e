use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

// ── connection failures ───────────────────────────────────────────────────────

/// A failure reported by a running (or just exited) `kubectl port-forward`.
///
/// Cloneable so it can live both in a record's `Error` status and in the
/// error returned to whoever called `start_forward`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "camelCase")]
pub enum ConnectionFailure {
    #[error("pod is not running: {0}")]
    PodNotRunning(String),
    #[error("RBAC permission denied: {0}")]
    Forbidden(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("context not found: {0}")]
    ContextNotFound(String),
    #[error("local address already in use: {0}")]
    AddressInUse(String),
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("connection timeout: {0}")]
    Timeout(String),
    #[error("cluster unreachable: {0}")]
    Unreachable(String),
    #[error("lost connection to pod: {0}")]
    LostConnection(String),
    #[error("kubectl exited ({}): {message}", exit_code_label(.code))]
    Exited { code: Option<i32>, message: String },
    #[error("{0}")]
    Other(String),
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// What the user can do about a [`ConnectionFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Remedy {
    /// Pick a different pod/service (target missing or not running).
    ChooseTarget,
    /// Ask for RBAC permissions on `pods/portforward`.
    FixPermissions,
    /// Transient; calling `start_forward` again may succeed.
    Retry,
    /// Pick a different local port.
    ChoosePort,
    /// kubeconfig / context problem.
    FixConfiguration,
}

impl ConnectionFailure {
    pub fn remedy(&self) -> Remedy {
        match self {
            Self::PodNotRunning(_) | Self::NotFound(_) => Remedy::ChooseTarget,
            Self::Forbidden(_) => Remedy::FixPermissions,
            Self::ContextNotFound(_) => Remedy::FixConfiguration,
            Self::AddressInUse(_) => Remedy::ChoosePort,
            Self::ConnectionRefused(_)
            | Self::Timeout(_)
            | Self::Unreachable(_)
            | Self::LostConnection(_)
            | Self::Exited { .. }
            | Self::Other(_) => Remedy::Retry,
        }
    }
}

// ── forward errors ────────────────────────────────────────────────────────────

/// Broad error category, for callers that render messages per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected before anything was spawned. Never retried.
    Configuration,
    /// kubectl could not be launched at all.
    Process,
    /// kubectl ran but the tunnel could not be established.
    Connection,
    /// The requested local port is taken.
    Conflict,
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("resourceType must be \"pod\" or \"service\" (got {0:?})")]
    InvalidResourceType(String),
    #[error("Service name is required when resourceType is \"service\"")]
    MissingServiceName,
    #[error("Pod name is required when resourceType is \"pod\"")]
    MissingPodName,
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("{0} must be a port number between 1 and 65535")]
    InvalidPort(&'static str),

    #[error("kubectl not found, install it or add it to PATH: {0}")]
    KubectlNotFound(#[source] std::io::Error),
    #[error("failed to spawn kubectl port-forward: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Connection(#[from] ConnectionFailure),
    #[error("connection timeout: port-forward was not ready after {0:?}")]
    StartTimeout(Duration),
    #[error("port-forward {0} was stopped before it became ready")]
    StoppedDuringStartup(String),

    #[error("local port {port} is already in use{}", suggestion_label(.suggestion))]
    PortInUse { port: u16, suggestion: Option<u16> },
    #[error("no free local port in {start}..={end}")]
    NoFreePort { start: u16, end: u16 },
}

fn suggestion_label(suggestion: &Option<u16>) -> String {
    suggestion
        .map(|port| format!(" (try {port})"))
        .unwrap_or_default()
}

impl ForwardError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidResourceType(_)
            | Self::MissingServiceName
            | Self::MissingPodName
            | Self::MissingField(_)
            | Self::InvalidPort(_) => ErrorCategory::Configuration,
            Self::KubectlNotFound(_) | Self::Spawn(_) => ErrorCategory::Process,
            Self::Connection(ConnectionFailure::AddressInUse(_))
            | Self::PortInUse { .. }
            | Self::NoFreePort { .. } => ErrorCategory::Conflict,
            Self::Connection(_) | Self::StartTimeout(_) | Self::StoppedDuringStartup(_) => {
                ErrorCategory::Connection
            }
        }
    }

    /// Connection-level remedy, when the error came from kubectl itself.
    pub fn remedy(&self) -> Option<Remedy> {
        match self {
            Self::Connection(failure) => Some(failure.remedy()),
            Self::StartTimeout(_) => Some(Remedy::Retry),
            Self::PortInUse { .. } | Self::NoFreePort { .. } => Some(Remedy::ChoosePort),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.remedy() == Some(Remedy::Retry)
    }
}
