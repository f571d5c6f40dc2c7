//! Platform abstraction
//!
//! A platform is where the cluster runs. The apply pipeline never inspects
//! platform types; it only looks at the static facts in a
//! [`PlatformDescriptor`]:
//!
//! - how many Ready nodes a healthy cluster has
//! - which [`Capability`] values it exposes (externally managed control
//!   plane, post-apply hook)
//!
//! # Supported Platforms
//!
//! - `bareMetal` - unmanaged, no hook
//! - `packet` - unmanaged, post-apply hook creates the cloud-controller secret
//! - `aws` - unmanaged, no hook
//! - `aks` - managed control plane; only worker nodes are visible

mod control_plane;
mod packet;

pub use control_plane::{control_plane_charts, CONTROL_PLANE_CHARTS, KUBELET_CHART};
pub use packet::{PacketCloudConfig, PACKET_AUTH_TOKEN_ENV, PACKET_CLOUD_CONFIG_SECRET};

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cluster::ClusterApi;
use crate::config::ClusterSpec;
use crate::Result;

/// Platform selection in the configuration file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PlatformConfig {
    /// Machines provisioned outside keel
    BareMetal,
    /// Equinix Metal (Packet)
    Packet {
        /// Project the machines are created in
        #[serde(rename = "projectId")]
        project_id: String,
    },
    /// Amazon Web Services
    Aws,
    /// Azure Kubernetes Service
    Aks,
}

impl PlatformConfig {
    /// Name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            PlatformConfig::BareMetal => "bareMetal",
            PlatformConfig::Packet { .. } => "packet",
            PlatformConfig::Aws => "aws",
            PlatformConfig::Aks => "aks",
        }
    }

    /// Whether the control plane is operated by a third party
    pub fn is_managed(&self) -> bool {
        matches!(self, PlatformConfig::Aks)
    }
}

/// Something a platform can do beyond the common pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Capability {
    /// Control plane is operated externally and never upgraded in-cluster
    Managed,
    /// Platform runs a hook after the control plane is settled
    PostApplyHook,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Managed => write!(f, "managed"),
            Capability::PostApplyHook => write!(f, "post-apply-hook"),
        }
    }
}

/// Static facts about the target platform
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformDescriptor {
    /// Platform name
    pub name: String,
    /// Ready nodes a healthy cluster reports
    pub expected_nodes: usize,
    /// Capabilities the platform exposes
    pub capabilities: BTreeSet<Capability>,
}

impl PlatformDescriptor {
    /// Descriptor with no capabilities
    pub fn new(name: impl Into<String>, expected_nodes: usize) -> Self {
        Self {
            name: name.into(),
            expected_nodes,
            capabilities: BTreeSet::new(),
        }
    }

    /// Add a capability
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    /// Whether the platform exposes `capability`
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Platform-specific work run once after the control plane is settled
#[async_trait]
pub trait PostApplyHook: Send + Sync {
    /// Run the hook against the cluster
    async fn run(&self, api: &dyn ClusterApi) -> Result<()>;
}

/// A platform: its descriptor plus the hook backing [`Capability::PostApplyHook`]
#[derive(Clone)]
pub struct Platform {
    descriptor: PlatformDescriptor,
    hook: Option<Arc<dyn PostApplyHook>>,
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("descriptor", &self.descriptor)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl Platform {
    /// Platform without a post-apply hook
    pub fn new(descriptor: PlatformDescriptor) -> Self {
        Self {
            descriptor,
            hook: None,
        }
    }

    /// Attach a post-apply hook, exposing the matching capability
    pub fn with_post_apply_hook(mut self, hook: Arc<dyn PostApplyHook>) -> Self {
        self.descriptor.capabilities.insert(Capability::PostApplyHook);
        self.hook = Some(hook);
        self
    }

    /// Build the platform for a cluster configuration.
    ///
    /// Platform credentials are read from the environment here so a missing
    /// token fails the run before any infrastructure is touched.
    pub fn from_config(cluster: &ClusterSpec) -> Result<Self> {
        let workers: usize = cluster.worker_pools.iter().map(|p| p.count).sum();
        let managed = cluster.platform.is_managed();
        let expected_nodes = if managed {
            workers
        } else {
            cluster.controller_count + workers
        };

        let mut descriptor = PlatformDescriptor::new(cluster.platform.name(), expected_nodes);
        if managed {
            descriptor = descriptor.with_capability(Capability::Managed);
        }
        let platform = Self::new(descriptor);

        Ok(match &cluster.platform {
            PlatformConfig::Packet { project_id } => platform
                .with_post_apply_hook(Arc::new(PacketCloudConfig::from_env(project_id)?)),
            _ => platform,
        })
    }

    /// Static facts about the platform
    pub fn descriptor(&self) -> &PlatformDescriptor {
        &self.descriptor
    }

    /// The post-apply hook, if the platform has one
    pub fn post_apply_hook(&self) -> Option<&dyn PostApplyHook> {
        self.hook.as_deref()
    }
}
