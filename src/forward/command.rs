//! Request normalization and the `kubectl port-forward` argument vector.

use std::path::Path;

use crate::error::ForwardError;
use crate::forward::identity::ForwardId;
use crate::models::forward::{PortForwardConfig, ResourceType};

pub const KUBECTL: &str = "kubectl";

/// What a forward points at. Services carry no container, so a container
/// selector can only ever be emitted for pods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardTarget {
    Pod { name: String, container: Option<String> },
    Service { name: String },
}

impl ForwardTarget {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            ForwardTarget::Pod { .. } => ResourceType::Pod,
            ForwardTarget::Service { .. } => ResourceType::Service,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ForwardTarget::Pod { name, .. } | ForwardTarget::Service { name } => name,
        }
    }

    pub fn container(&self) -> Option<&str> {
        match self {
            ForwardTarget::Pod { container, .. } => container.as_deref(),
            ForwardTarget::Service { .. } => None,
        }
    }

    /// `pod/<name>` or `service/<name>`.
    pub fn kubectl_ref(&self) -> String {
        format!("{}/{}", self.resource_type(), self.name())
    }
}

/// A validated [`PortForwardConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    pub target: ForwardTarget,
    pub namespace: String,
    pub context: String,
    pub local_port: u16,
    pub remote_port: u16,
}

impl ForwardRequest {
    pub fn id(&self) -> ForwardId {
        ForwardId {
            context: self.context.clone(),
            namespace: self.namespace.clone(),
            resource_type: self.target.resource_type(),
            resource_name: self.target.name().to_string(),
            local_port: self.local_port,
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn port(value: u16, field: &'static str) -> Result<u16, ForwardError> {
    if value == 0 {
        return Err(ForwardError::InvalidPort(field));
    }
    Ok(value)
}

impl TryFrom<&PortForwardConfig> for ForwardRequest {
    type Error = ForwardError;

    fn try_from(config: &PortForwardConfig) -> Result<Self, Self::Error> {
        // Absent resourceType means pod, for callers that predate services.
        let resource_type = match config.resource_type.as_deref().map(str::trim) {
            None | Some("pod") => ResourceType::Pod,
            Some("service") => ResourceType::Service,
            Some(other) => return Err(ForwardError::InvalidResourceType(other.to_string())),
        };

        let target = match resource_type {
            ResourceType::Pod => ForwardTarget::Pod {
                name: non_blank(config.pod_name.as_deref()).ok_or(ForwardError::MissingPodName)?,
                container: non_blank(config.container_name.as_deref()),
            },
            ResourceType::Service => ForwardTarget::Service {
                name: non_blank(config.service_name.as_deref())
                    .ok_or(ForwardError::MissingServiceName)?,
            },
        };

        let namespace = non_blank(Some(config.namespace.as_str()))
            .ok_or(ForwardError::MissingField("namespace"))?;
        let context = non_blank(Some(config.context.as_str()))
            .ok_or(ForwardError::MissingField("context"))?;

        Ok(ForwardRequest {
            target,
            namespace,
            context,
            local_port: port(config.local_port, "localPort")?,
            remote_port: port(config.remote_port, "remotePort")?,
        })
    }
}

/// A program plus its arguments, as handed to a process spawner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    /// Shell-quoted rendering, for logs.
    pub fn display(&self) -> String {
        let mut words = Vec::with_capacity(self.args.len() + 1);
        words.push(self.program.as_str());
        words.extend(self.args.iter().map(String::as_str));
        shell_words::join(words)
    }
}

/// Builds:
///
/// ```text
/// kubectl port-forward <pod/NAME|service/NAME> <local>:<remote> [-c CONTAINER]
///   --namespace=<ns> --context=<ctx> [--kubeconfig=<path>]
/// ```
pub fn build(request: &ForwardRequest, program: &str, kubeconfig: Option<&Path>) -> Invocation {
    let mut args = vec![
        "port-forward".to_string(),
        request.target.kubectl_ref(),
        format!("{}:{}", request.local_port, request.remote_port),
    ];

    if let Some(container) = request.target.container() {
        args.push("-c".to_string());
        args.push(container.to_string());
    }

    args.push(format!("--namespace={}", request.namespace));
    args.push(format!("--context={}", request.context));

    if let Some(path) = kubeconfig {
        args.push(format!("--kubeconfig={}", path.display()));
    }

    Invocation {
        program: program.to_string(),
        args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(config: &PortForwardConfig) -> Result<ForwardRequest, ForwardError> {
        ForwardRequest::try_from(config)
    }

    #[test]
    fn missing_resource_type_defaults_to_pod() {
        let mut config = PortForwardConfig::pod("test-pod", "default", "minikube", 50100, 8080);
        config.resource_type = None;
        let req = request(&config).unwrap();
        assert_eq!(req.target.resource_type(), ResourceType::Pod);
        assert_eq!(req.target.name(), "test-pod");
    }

    #[test]
    fn rejects_unknown_resource_type() {
        let mut config = PortForwardConfig::pod("web", "default", "minikube", 50100, 8080);
        config.resource_type = Some("deployment".into());
        let err = request(&config).unwrap_err();
        assert!(err
            .to_string()
            .contains("resourceType must be \"pod\" or \"service\""));
    }

    #[test]
    fn service_requires_service_name() {
        let mut config = PortForwardConfig::service("", "default", "minikube", 50100, 80);
        config.pod_name = Some("web".into());
        assert!(matches!(request(&config), Err(ForwardError::MissingServiceName)));

        config.service_name = Some("   ".into());
        assert!(matches!(request(&config), Err(ForwardError::MissingServiceName)));
    }

    #[test]
    fn pod_requires_pod_name() {
        let config = PortForwardConfig {
            namespace: "default".into(),
            context: "minikube".into(),
            local_port: 50100,
            remote_port: 8080,
            ..Default::default()
        };
        assert!(matches!(request(&config), Err(ForwardError::MissingPodName)));
    }

    #[test]
    fn rejects_missing_scope_and_zero_ports() {
        let config = PortForwardConfig::pod("web", "", "minikube", 50100, 8080);
        assert!(matches!(request(&config), Err(ForwardError::MissingField("namespace"))));

        let config = PortForwardConfig::pod("web", "default", " ", 50100, 8080);
        assert!(matches!(request(&config), Err(ForwardError::MissingField("context"))));

        let config = PortForwardConfig::pod("web", "default", "minikube", 0, 8080);
        assert!(matches!(request(&config), Err(ForwardError::InvalidPort("localPort"))));

        let config = PortForwardConfig::pod("web", "default", "minikube", 50100, 0);
        assert!(matches!(request(&config), Err(ForwardError::InvalidPort("remotePort"))));
    }

    #[test]
    fn pod_args_carry_container_selector() {
        let mut config = PortForwardConfig::pod("web-0", "default", "minikube", 50100, 8080);
        config.container_name = Some("sidecar".into());
        let invocation = build(&request(&config).unwrap(), KUBECTL, None);

        assert_eq!(invocation.program, "kubectl");
        assert_eq!(
            invocation.args,
            vec![
                "port-forward",
                "pod/web-0",
                "50100:8080",
                "-c",
                "sidecar",
                "--namespace=default",
                "--context=minikube",
            ]
        );
    }

    #[test]
    fn service_args_never_carry_container_selector() {
        let mut config = PortForwardConfig::service("web", "prod", "gke", 50101, 443);
        config.container_name = Some("ignored".into());
        let invocation = build(&request(&config).unwrap(), KUBECTL, Some(Path::new("/tmp/kc")));

        assert!(invocation.args.contains(&"service/web".to_string()));
        assert!(!invocation.args.contains(&"-c".to_string()));
        assert!(!invocation.args.iter().any(|a| a == "ignored"));
        assert_eq!(invocation.args.last().unwrap(), "--kubeconfig=/tmp/kc");
    }

    #[test]
    fn display_quotes_arguments() {
        let invocation = Invocation {
            program: "kubectl".into(),
            args: vec!["port-forward".into(), "--context=my ctx".into()],
        };
        assert_eq!(invocation.display(), "kubectl port-forward '--context=my ctx'");
    }
}
