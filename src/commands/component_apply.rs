//! `keel component apply`
//!
//! Reconciles components against a cluster that has already been applied,
//! using the kubeconfig persisted in the asset directory.

use clap::Args;
use tracing::info;

use super::KubeConnector;
use crate::cluster::ClusterHandle;
use crate::config::ClusterConfig;
use crate::orchestrator::Connector;
use crate::release::ReleaseReconciler;
use crate::Result;

/// Arguments for `keel component apply`
#[derive(Args, Debug, Clone, Default)]
pub struct ComponentApplyArgs {
    /// Components to apply; all declared components when omitted
    pub names: Vec<String>,
}

/// Run `keel component apply`
pub async fn run(config: ClusterConfig, args: ComponentApplyArgs) -> Result<()> {
    // Resolve names first so a typo touches nothing
    let components = config.selected_descriptors(&args.names)?;
    if components.is_empty() {
        info!("No components declared");
        return Ok(());
    }

    let handle = ClusterHandle::load(config.kubeconfig_path())?;
    let session = KubeConnector.connect(&handle).await?;

    ReleaseReconciler::new(session.api.as_ref(), session.releases.as_ref())
        .reconcile_all(&components)
        .await?;

    info!(count = components.len(), "Components applied");
    Ok(())
}
