//! Cluster verification
//!
//! After the infrastructure is applied the pipeline waits until the API
//! server answers and exactly the expected number of nodes report Ready.
//! API errors while polling are treated as "not reachable yet"; only the
//! deadline ends the wait.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::cluster::ClusterApi;
use crate::{Error, Result};

/// Polling bounds for verification
#[derive(Clone, Debug)]
pub struct VerifyConfig {
    /// Give up after this long
    pub timeout: Duration,
    /// Time between node listings
    pub poll_interval: Duration,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// Waits for a cluster to reach its expected Ready node count
#[derive(Clone, Debug, Default)]
pub struct ClusterVerifier {
    config: VerifyConfig,
}

impl ClusterVerifier {
    /// Create a verifier with the given polling bounds
    pub fn new(config: VerifyConfig) -> Self {
        Self { config }
    }

    /// Poll until `expected_nodes` nodes are Ready or the timeout elapses.
    ///
    /// On timeout the error names the last observed Ready count.
    pub async fn verify(&self, api: &dyn ClusterApi, expected_nodes: usize) -> Result<()> {
        let deadline = Instant::now() + self.config.timeout;
        let mut observed = 0;

        info!(expected = expected_nodes, "Waiting for nodes to become Ready");

        loop {
            let last_error = match api.list_nodes().await {
                Ok(nodes) => {
                    observed = nodes.iter().filter(|n| n.ready).count();
                    if observed == expected_nodes {
                        info!(nodes = observed, "Cluster is ready");
                        return Ok(());
                    }
                    debug!(
                        ready = observed,
                        total = nodes.len(),
                        expected = expected_nodes,
                        "Nodes not ready yet"
                    );
                    None
                }
                Err(e) => {
                    debug!(error = %e, "Cluster API not reachable yet");
                    Some(e.to_string())
                }
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::VerificationFailed {
                    observed,
                    expected: expected_nodes,
                    last_error,
                });
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }
}
