//! `keel cluster apply`

use clap::Args;
use tracing::info;

use super::KubeConnector;
use crate::config::ClusterConfig;
use crate::infra::TerraformExecutor;
use crate::orchestrator::{ApplyOptions, ApplyOrchestrator, ApplyOutcome};
use crate::platform::Platform;
use crate::prompt::StdinPrompt;
use crate::Result;

/// Arguments for `keel cluster apply`
#[derive(Args, Debug, Clone, Default)]
pub struct ClusterApplyArgs {
    /// Upgrade the cluster without asking for confirmation
    #[arg(long)]
    pub confirm: bool,

    /// Skip installing or upgrading components
    #[arg(long)]
    pub skip_components: bool,

    /// Also upgrade the kubelet (experimental)
    #[arg(long)]
    pub upgrade_kubelets: bool,

    /// Stream provisioner output and log at debug level
    #[arg(short, long)]
    pub verbose: bool,
}

impl ClusterApplyArgs {
    /// Orchestrator options for these flags
    pub fn options(&self) -> ApplyOptions {
        ApplyOptions {
            confirm: self.confirm,
            skip_components: self.skip_components,
            upgrade_kubelets: self.upgrade_kubelets,
        }
    }
}

/// Run `keel cluster apply`
pub async fn run(config: ClusterConfig, args: ClusterApplyArgs) -> Result<()> {
    let platform = Platform::from_config(&config.cluster)?;
    let components = config.component_descriptors()?;

    let provisioner = TerraformExecutor::new(config.terraform_dir(), args.verbose);
    let prompt = StdinPrompt::default();
    let connector = KubeConnector;

    let mut orchestrator = ApplyOrchestrator::new(
        &provisioner,
        &prompt,
        &connector,
        platform,
        config.kubeconfig_path(),
        config.charts_dir(),
    )
    .with_components(components)
    .with_asset_dir(&config.cluster.asset_dir);
    if let Some(zone) = config.cluster.dns.as_ref().and_then(|d| d.manual_zone()) {
        orchestrator = orchestrator.with_manual_dns(zone);
    }

    match orchestrator.run(args.options()).await? {
        ApplyOutcome::Applied => {
            info!(cluster = %config.cluster.name, "Cluster is up to date");
            println!(
                "\nNow checkout the cluster with:\n  export KUBECONFIG={}",
                config.kubeconfig_path().display()
            );
        }
        ApplyOutcome::Aborted => println!("Aborted"),
    }
    Ok(())
}
