//! Infrastructure provisioning
//!
//! The provisioner owns every cloud or bare-metal resource the cluster runs
//! on. Keel only asks it three things: what would change ([`Provisioner::plan`]),
//! to make it so ([`Provisioner::apply`]), and for named outputs such as the
//! kubeconfig or DNS entries ([`Provisioner::output`]).

pub mod terraform;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;

use crate::{Error, Result};

pub use terraform::TerraformExecutor;

/// Provisioner output holding the admin kubeconfig
pub const KUBECONFIG_OUTPUT: &str = "kubeconfig";

/// Declarative infrastructure engine
///
/// This trait abstracts the provisioning tool for testability.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Whether the provisioner already tracks resources for this cluster
    async fn cluster_exists(&self) -> Result<bool>;

    /// Compute the diff between current and desired infrastructure
    ///
    /// # Returns
    ///
    /// A human-readable plan to present to the operator
    async fn plan(&self) -> Result<String>;

    /// Converge infrastructure to the desired state
    async fn apply(&self) -> Result<()>;

    /// Read a named output as JSON; an undefined output reads as `null`
    async fn output(&self, key: &str) -> Result<serde_json::Value>;
}

/// Read a named output and deserialize it into `T`
pub async fn output_as<T: DeserializeOwned>(provisioner: &dyn Provisioner, key: &str) -> Result<T> {
    let value = provisioner.output(key).await?;
    serde_json::from_value(value)
        .map_err(|e| Error::config(format!("provisioner output {:?} has unexpected shape: {}", key, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;

    #[tokio::test]
    async fn typed_outputs_deserialize() {
        let mut provisioner = MockProvisioner::new();
        provisioner
            .expect_output()
            .with(eq("worker_ips"))
            .returning(|_| Ok(serde_json::json!(["10.0.0.1", "10.0.0.2"])));

        let ips: Vec<String> = output_as(&provisioner, "worker_ips").await.unwrap();
        assert_eq!(ips, ["10.0.0.1", "10.0.0.2"]);
    }

    #[tokio::test]
    async fn mismatched_output_shape_is_reported() {
        let mut provisioner = MockProvisioner::new();
        provisioner
            .expect_output()
            .returning(|_| Ok(serde_json::json!({"not": "a list"})));

        let err = output_as::<Vec<String>>(&provisioner, "worker_ips")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("worker_ips"));
    }
}
