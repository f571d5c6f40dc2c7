//! Helm-backed release engine
//!
//! Shells out to the `helm` binary with the cluster's persisted kubeconfig.
//! Values are written to a temporary file that lives for the duration of the
//! command.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

use super::{ReleaseEngine, ReleaseState, WorkloadDescriptor};
use crate::{exec, Error, Result};

/// Default time helm waits for a release's resources to become ready
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Release engine that shells out to helm
#[derive(Debug, Clone)]
pub struct HelmEngine {
    kubeconfig: PathBuf,
    wait_timeout: Duration,
}

impl HelmEngine {
    /// Create an engine talking to the cluster in `kubeconfig`
    pub fn new(kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            kubeconfig: kubeconfig.into(),
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    /// Override how long installs and upgrades wait for readiness
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Kubeconfig the engine passes to helm
    pub fn kubeconfig(&self) -> &Path {
        &self.kubeconfig
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("helm");
        cmd.arg("--kubeconfig").arg(&self.kubeconfig);
        cmd
    }

    async fn run_release(&self, args: Vec<String>, workload: &WorkloadDescriptor) -> Result<()> {
        // Held until helm exits so the values file is not removed early
        let values_file = match &workload.values {
            Some(values) => Some(write_values(values)?),
            None => None,
        };

        let mut cmd = self.command();
        cmd.args(&args);
        if let Some(file) = &values_file {
            cmd.arg("--values").arg(file.path());
        }

        debug!(command = %exec::describe(&cmd), "Running helm");
        exec::output(&mut cmd).await.map(|_| ())
    }
}

fn write_values(values: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("keel-values-")
        .suffix(".yaml")
        .tempfile()?;
    file.write_all(values.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Arguments for `helm install`
pub fn install_args(workload: &WorkloadDescriptor, wait_timeout: Duration) -> Vec<String> {
    let mut args = vec![
        "install".to_string(),
        workload.name.clone(),
        workload.chart.clone(),
        "--namespace".to_string(),
        workload.namespace.clone(),
    ];
    push_common_args(&mut args, workload, wait_timeout);
    args
}

/// Arguments for `helm upgrade`; always forces recreation of resources that
/// cannot be patched in place
pub fn upgrade_args(workload: &WorkloadDescriptor, wait_timeout: Duration) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        workload.name.clone(),
        workload.chart.clone(),
        "--namespace".to_string(),
        workload.namespace.clone(),
        "--force".to_string(),
    ];
    push_common_args(&mut args, workload, wait_timeout);
    args
}

fn push_common_args(args: &mut Vec<String>, workload: &WorkloadDescriptor, wait_timeout: Duration) {
    if let Some(version) = &workload.version {
        args.push("--version".to_string());
        args.push(version.clone());
    }
    if workload.wait_for_ready {
        args.push("--wait".to_string());
        args.push("--timeout".to_string());
        args.push(format!("{}s", wait_timeout.as_secs()));
    }
}

/// Whether helm's stderr says the release has no history
pub fn is_release_not_found(stderr: &str) -> bool {
    stderr.contains("release: not found")
}

/// Interpret `helm history -o json` output
pub fn parse_history(stdout: &str) -> Result<ReleaseState> {
    let revisions: Vec<serde_json::Value> = serde_json::from_str(stdout.trim())
        .map_err(|e| Error::command_failed("helm history", format!("unexpected output: {}", e)))?;
    Ok(if revisions.is_empty() {
        ReleaseState::Absent
    } else {
        ReleaseState::Present
    })
}

#[async_trait]
impl ReleaseEngine for HelmEngine {
    async fn history(&self, release: &str, namespace: &str) -> Result<ReleaseState> {
        let mut cmd = self.command();
        cmd.args([
            "history",
            release,
            "--namespace",
            namespace,
            "--max",
            "1",
            "--output",
            "json",
        ]);

        let out = exec::raw_output(&mut cmd).await?;
        if out.status.success() {
            return parse_history(&String::from_utf8_lossy(&out.stdout));
        }

        let stderr = String::from_utf8_lossy(&out.stderr);
        if is_release_not_found(&stderr) {
            return Ok(ReleaseState::Absent);
        }
        Err(Error::command_failed(
            exec::describe(&cmd),
            stderr.trim().to_string(),
        ))
    }

    async fn install(&self, workload: &WorkloadDescriptor) -> Result<()> {
        self.run_release(install_args(workload, self.wait_timeout), workload)
            .await
    }

    async fn upgrade(&self, workload: &WorkloadDescriptor) -> Result<()> {
        self.run_release(upgrade_args(workload, self.wait_timeout), workload)
            .await
    }
}
