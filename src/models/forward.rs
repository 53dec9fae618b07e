// Port-forward request and record types
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::forward::identity::ForwardId;
use crate::forward::state::ForwardStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Pod,
    Service,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Pod => "pod",
            ResourceType::Service => "service",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A forward request as callers (and the forwards file) express it.
///
/// `resource_type` is kept as a free-form string here; it is turned into a
/// typed target exactly once, by `ForwardRequest::try_from`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortForwardConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// Only honoured for pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub local_port: u16,
    #[serde(default)]
    pub remote_port: u16,
}

impl PortForwardConfig {
    pub fn pod(name: &str, namespace: &str, context: &str, local_port: u16, remote_port: u16) -> Self {
        Self {
            resource_type: Some(ResourceType::Pod.as_str().to_string()),
            pod_name: Some(name.to_string()),
            namespace: namespace.to_string(),
            context: context.to_string(),
            local_port,
            remote_port,
            ..Default::default()
        }
    }

    pub fn service(
        name: &str,
        namespace: &str,
        context: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Self {
        Self {
            resource_type: Some(ResourceType::Service.as_str().to_string()),
            service_name: Some(name.to_string()),
            namespace: namespace.to_string(),
            context: context.to_string(),
            local_port,
            remote_port,
            ..Default::default()
        }
    }
}

/// Snapshot of one managed forward. Always a copy; mutating it has no
/// effect on the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortForwardInfo {
    pub id: ForwardId,
    pub resource_type: ResourceType,
    pub resource_name: String,
    /// Mirrors `resource_name` for consumers that only know pods.
    pub pod_name: String,
    pub container_name: Option<String>,
    pub namespace: String,
    pub context: String,
    pub local_port: u16,
    pub remote_port: u16,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub status: ForwardStatus,
    /// Most recent per-connection error; the forward itself stays up.
    pub last_error: Option<String>,
}

impl PortForwardInfo {
    /// `pod/web` or `service/web`.
    pub fn target(&self) -> String {
        format!("{}/{}", self.resource_type, self.resource_name)
    }
}
