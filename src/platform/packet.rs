//! Packet (Equinix Metal) post-apply hook
//!
//! The Packet cloud-controller-manager reads its API credentials from a
//! secret in kube-system. The secret is written after the control plane is
//! settled so the controller can start managing load balancers and node
//! metadata.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use tracing::info;

use super::PostApplyHook;
use crate::cluster::ClusterApi;
use crate::{Error, Result};

/// Environment variable holding the Packet API token
pub const PACKET_AUTH_TOKEN_ENV: &str = "PACKET_AUTH_TOKEN";

/// Secret the cloud-controller-manager reads its credentials from
pub const PACKET_CLOUD_CONFIG_SECRET: &str = "packet-cloud-config";

const CLOUD_CONFIG_NAMESPACE: &str = "kube-system";

/// Writes the cloud-controller-manager credentials secret
#[derive(Clone)]
pub struct PacketCloudConfig {
    project_id: String,
    api_key: String,
}

impl fmt::Debug for PacketCloudConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketCloudConfig")
            .field("project_id", &self.project_id)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl PacketCloudConfig {
    /// Hook for an explicit project and API key
    pub fn new(project_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            api_key: api_key.into(),
        }
    }

    /// Hook for `project_id` with the API key from `PACKET_AUTH_TOKEN`
    pub fn from_env(project_id: &str) -> Result<Self> {
        let api_key = std::env::var(PACKET_AUTH_TOKEN_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                Error::config(format!(
                    "{} must be set for the packet platform",
                    PACKET_AUTH_TOKEN_ENV
                ))
            })?;
        Ok(Self::new(project_id, api_key))
    }

    fn secret_data(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("apiKey".to_string(), self.api_key.clone()),
            ("projectID".to_string(), self.project_id.clone()),
        ])
    }
}

#[async_trait]
impl PostApplyHook for PacketCloudConfig {
    async fn run(&self, api: &dyn ClusterApi) -> Result<()> {
        api.apply_secret(
            CLOUD_CONFIG_NAMESPACE,
            PACKET_CLOUD_CONFIG_SECRET,
            &self.secret_data(),
        )
        .await?;
        info!(
            secret = PACKET_CLOUD_CONFIG_SECRET,
            namespace = CLOUD_CONFIG_NAMESPACE,
            "Cloud controller credentials configured"
        );
        Ok(())
    }
}
