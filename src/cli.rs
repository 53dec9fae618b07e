use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::DEFAULT_FORWARDS_FILE;
use crate::models::forward::PortForwardConfig;

#[derive(Debug, Parser)]
#[command(
    name = "cluster-forward",
    version,
    about = "Run and supervise kubectl port-forward sessions"
)]
pub struct Cli {
    /// Kubeconfig file (defaults to KUBECONFIG, then ~/.kube)
    #[arg(long, global = true, value_name = "PATH")]
    pub kubeconfig: Option<PathBuf>,

    /// More logging; repeat for trace output
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Print records as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Forward a single pod or service until Ctrl-C
    Forward(ForwardArgs),
    /// Start every forward listed in a forwards file until Ctrl-C
    Up {
        #[arg(short, long, default_value = DEFAULT_FORWARDS_FILE)]
        file: PathBuf,
    },
    /// List kubeconfig contexts
    Contexts,
}

#[derive(Debug, Clone, Args)]
pub struct ForwardArgs {
    /// pod/NAME, service/NAME or a bare pod name
    pub target: String,

    /// [LOCAL:]REMOTE
    pub ports: String,

    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Context to forward under (defaults to the current context)
    #[arg(long)]
    pub context: Option<String>,

    /// Container of the pod to forward to; ignored for services
    #[arg(short, long)]
    pub container: Option<String>,

    /// Use the next free local port when LOCAL is taken
    #[arg(long)]
    pub auto_port: bool,
}

/// `8080` forwards 8080 to 8080; `50100:8080` forwards 50100 to 8080.
pub fn parse_ports(ports: &str) -> anyhow::Result<(u16, u16)> {
    let parse = |s: &str| {
        s.trim()
            .parse::<u16>()
            .with_context(|| format!("invalid port {s:?} in {ports:?}"))
    };
    match ports.split_once(':') {
        Some((local, remote)) => Ok((parse(local)?, parse(remote)?)),
        None => {
            let port = parse(ports)?;
            Ok((port, port))
        }
    }
}

impl ForwardArgs {
    /// Namespace and context may come back empty; the host fills them from
    /// the kubeconfig.
    pub fn to_config(&self) -> anyhow::Result<PortForwardConfig> {
        let (local_port, remote_port) = parse_ports(&self.ports)?;

        let mut config = PortForwardConfig {
            namespace: self.namespace.clone().unwrap_or_default(),
            context: self.context.clone().unwrap_or_default(),
            local_port,
            remote_port,
            ..Default::default()
        };

        match self.target.split_once('/') {
            Some(("pod" | "pods" | "po", name)) => {
                config.resource_type = Some("pod".to_string());
                config.pod_name = Some(name.to_string());
                config.container_name = self.container.clone();
            }
            Some(("service" | "services" | "svc", name)) => {
                config.resource_type = Some("service".to_string());
                config.service_name = Some(name.to_string());
                config.container_name = self.container.clone();
            }
            // Left for validation to reject with the usual message.
            Some((kind, name)) => {
                config.resource_type = Some(kind.to_string());
                config.pod_name = Some(name.to_string());
            }
            None => {
                config.pod_name = Some(self.target.clone());
                config.container_name = self.container.clone();
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(target: &str, ports: &str) -> ForwardArgs {
        ForwardArgs {
            target: target.into(),
            ports: ports.into(),
            namespace: None,
            context: None,
            container: None,
            auto_port: false,
        }
    }

    #[test]
    fn parses_port_specs() {
        assert_eq!(parse_ports("8080").unwrap(), (8080, 8080));
        assert_eq!(parse_ports("50100:8080").unwrap(), (50100, 8080));
        assert!(parse_ports("http").is_err());
        assert!(parse_ports("70000:80").is_err());
    }

    #[test]
    fn bare_name_is_a_pod_without_resource_type() {
        let config = args("web-0", "8080").to_config().unwrap();
        assert_eq!(config.resource_type, None);
        assert_eq!(config.pod_name.as_deref(), Some("web-0"));
    }

    #[test]
    fn service_aliases_are_recognised() {
        let config = args("svc/web", "8443:443").to_config().unwrap();
        assert_eq!(config.resource_type.as_deref(), Some("service"));
        assert_eq!(config.service_name.as_deref(), Some("web"));
        assert_eq!((config.local_port, config.remote_port), (8443, 443));
    }

    #[test]
    fn unknown_kind_is_passed_through() {
        let config = args("deploy/web", "80").to_config().unwrap();
        assert_eq!(config.resource_type.as_deref(), Some("deploy"));
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "cluster-forward",
            "forward",
            "pod/web",
            "8080:80",
            "-n",
            "prod",
            "--json",
            "-vv",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Forward(args) => assert_eq!(args.namespace.as_deref(), Some("prod")),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
