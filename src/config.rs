//! Cluster configuration file
//!
//! A single YAML document describes the cluster, the platform it runs on and
//! the components to install on it:
//!
//! ```yaml
//! cluster:
//!   name: prod
//!   assetDir: ./assets
//!   platform:
//!     kind: packet
//!     projectId: 3f1c...
//!   controllerCount: 3
//!   workerPools:
//!     - name: general
//!       count: 2
//!   dns:
//!     provider: manual
//!     zone: example.com
//! components:
//!   - name: cert-manager
//!     namespace: cert-manager
//!     chart: jetstack/cert-manager
//!     version: v1.14.4
//!     wait: true
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::dns::DnsConfig;
use crate::platform::PlatformConfig;
use crate::release::WorkloadDescriptor;
use crate::{Error, Result};

/// Root of the configuration file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Cluster and platform settings
    pub cluster: ClusterSpec,
    /// Components to install, in order
    #[serde(default)]
    pub components: Vec<ComponentConfig>,
}

/// Cluster settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Cluster name
    pub name: String,
    /// Directory holding provisioner state and rendered assets
    pub asset_dir: PathBuf,
    /// Target platform
    pub platform: PlatformConfig,
    /// Number of controller nodes
    #[serde(default = "default_controller_count")]
    pub controller_count: usize,
    /// Worker node pools
    #[serde(default)]
    pub worker_pools: Vec<WorkerPool>,
    /// DNS settings for the cluster's API endpoint
    #[serde(default)]
    pub dns: Option<DnsConfig>,
}

fn default_controller_count() -> usize {
    1
}

/// A pool of identical worker nodes
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPool {
    /// Pool name
    pub name: String,
    /// Number of nodes in the pool
    pub count: usize,
}

/// A component entry as written in the configuration file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentConfig {
    /// Release name
    pub name: String,
    /// Namespace to install the release into
    pub namespace: String,
    /// Chart reference (repo/chart, OCI URL or local path)
    pub chart: String,
    /// Chart version constraint
    #[serde(default)]
    pub version: Option<String>,
    /// Chart values
    #[serde(default)]
    pub values: Option<serde_yaml::Value>,
    /// Block until the release's resources are ready
    #[serde(default)]
    pub wait: bool,
}

impl ComponentConfig {
    /// Build the immutable descriptor used by the release reconciler
    pub fn to_descriptor(&self) -> Result<WorkloadDescriptor> {
        let values = self
            .values
            .as_ref()
            .map(serde_yaml::to_string)
            .transpose()
            .map_err(|e| {
                Error::config(format!("component {:?}: invalid values: {}", self.name, e))
            })?;

        Ok(WorkloadDescriptor {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            chart: self.chart.clone(),
            version: self.version.clone(),
            values,
            wait_for_ready: self.wait,
        })
    }
}

impl ClusterConfig {
    /// Read, parse and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ClusterConfig = serde_yaml::from_str(content)
            .map_err(|e| Error::config(format!("failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.cluster.name.trim().is_empty() {
            return Err(Error::config("cluster.name must not be empty"));
        }
        if self.cluster.controller_count == 0 {
            return Err(Error::config("cluster.controllerCount must be at least 1"));
        }
        if let Some(dns) = &self.cluster.dns {
            dns.validate()?;
        }

        let mut seen = HashSet::new();
        for component in &self.components {
            if component.name.trim().is_empty() {
                return Err(Error::config("component name must not be empty"));
            }
            if !seen.insert(component.name.as_str()) {
                return Err(Error::config(format!(
                    "component {:?} is declared more than once",
                    component.name
                )));
            }
            if component.namespace.trim().is_empty() {
                return Err(Error::config(format!(
                    "component {:?}: namespace must not be empty",
                    component.name
                )));
            }
            if component.chart.trim().is_empty() {
                return Err(Error::config(format!(
                    "component {:?}: chart must not be empty",
                    component.name
                )));
            }
        }

        Ok(())
    }

    /// Total worker nodes across all pools
    pub fn worker_count(&self) -> usize {
        self.cluster.worker_pools.iter().map(|p| p.count).sum()
    }

    /// Descriptors for every declared component, in declared order
    pub fn component_descriptors(&self) -> Result<Vec<WorkloadDescriptor>> {
        self.components.iter().map(|c| c.to_descriptor()).collect()
    }

    /// Descriptors for the named components, in declared configuration order.
    ///
    /// Unknown names are rejected before anything is touched.
    pub fn selected_descriptors(&self, names: &[String]) -> Result<Vec<WorkloadDescriptor>> {
        if names.is_empty() {
            return self.component_descriptors();
        }

        for name in names {
            if !self.components.iter().any(|c| &c.name == name) {
                return Err(Error::config(format!(
                    "component {:?} is not declared in the configuration",
                    name
                )));
            }
        }

        self.components
            .iter()
            .filter(|c| names.contains(&c.name))
            .map(|c| c.to_descriptor())
            .collect()
    }

    /// Path of the kubeconfig persisted in the asset directory
    pub fn kubeconfig_path(&self) -> PathBuf {
        self.cluster
            .asset_dir
            .join("cluster-assets")
            .join("auth")
            .join("kubeconfig")
    }

    /// Directory holding control-plane charts rendered by the provisioner
    pub fn charts_dir(&self) -> PathBuf {
        self.cluster.asset_dir.join("cluster-assets").join("charts")
    }

    /// Directory holding the provisioner's working tree and state
    pub fn terraform_dir(&self) -> PathBuf {
        self.cluster.asset_dir.join("terraform")
    }
}
