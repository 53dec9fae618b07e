use std::fmt;

use serde::{Serialize, Serializer};

use crate::models::forward::ResourceType;

/// Identity of a forward: two requests are the same forward exactly when
/// every field matches. The resource type takes part, so `pod/api` and
/// `service/api` never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ForwardId {
    pub context: String,
    pub namespace: String,
    pub resource_type: ResourceType,
    pub resource_name: String,
    pub local_port: u16,
}

impl fmt::Display for ForwardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}:{}",
            self.context, self.namespace, self.resource_type, self.resource_name, self.local_port
        )
    }
}

impl Serialize for ForwardId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
