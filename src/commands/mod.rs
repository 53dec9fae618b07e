pub mod forward;
pub mod kubeconfig;

use crate::cli::{Cli, Command};
use crate::config::{ForwardsFile, Settings};
use self::forward::HostOptions;

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let host = HostOptions {
        kubeconfig: cli.kubeconfig,
        json: cli.json,
    };

    match cli.command {
        Command::Contexts => kubeconfig::print_contexts(host.kubeconfig.as_deref(), host.json),
        Command::Forward(args) => {
            let config = args.to_config()?;
            let settings = Settings {
                auto_port: args.auto_port,
                ..Default::default()
            };
            forward::run_forwards(vec![config], settings, host).await
        }
        Command::Up { file } => {
            let file = ForwardsFile::load(&file)?;
            if file.forwards.is_empty() {
                anyhow::bail!("no forwards listed");
            }
            forward::run_forwards(file.forwards, file.settings, host).await
        }
    }
}
