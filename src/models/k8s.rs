// Kubeconfig-facing types shared by the host commands
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeContext {
    pub name: String,
    pub cluster: String,
    pub user: String,
    /// Default namespace of the context, used when a forward names none
    pub namespace: Option<String>,
    pub is_active: bool,
    /// API server URL, shown next to the context name
    pub server_url: Option<String>,
}
