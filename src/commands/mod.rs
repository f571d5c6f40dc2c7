//! CLI commands

use std::sync::Arc;

use async_trait::async_trait;
use clap::Subcommand;
use tracing::debug;

use crate::cluster::{ClusterHandle, KubeClusterApi};
use crate::orchestrator::{ClusterSession, Connector};
use crate::release::HelmEngine;
use crate::Result;

pub mod cluster_apply;
pub mod component_apply;

pub use cluster_apply::ClusterApplyArgs;
pub use component_apply::ComponentApplyArgs;

/// `keel cluster` subcommands
#[derive(Subcommand, Debug)]
pub enum ClusterCommand {
    /// Deploy or update a cluster and its components
    ///
    /// Provisions the infrastructure, waits for the nodes to become Ready,
    /// upgrades the control plane of an existing cluster and installs or
    /// upgrades every declared component.
    Apply(ClusterApplyArgs),
}

/// `keel component` subcommands
#[derive(Subcommand, Debug)]
pub enum ComponentCommand {
    /// Install or upgrade components on an existing cluster
    Apply(ComponentApplyArgs),
}

/// Connects to a live cluster through kube-rs and the helm CLI
#[derive(Debug, Default)]
pub struct KubeConnector;

#[async_trait]
impl Connector for KubeConnector {
    async fn connect(&self, handle: &ClusterHandle) -> Result<ClusterSession> {
        debug!(kubeconfig = %handle.path().display(), "Connecting to cluster");
        let client = handle.client().await?;
        Ok(ClusterSession {
            api: Arc::new(KubeClusterApi::new(client)),
            releases: Arc::new(HelmEngine::new(handle.path())),
        })
    }
}
