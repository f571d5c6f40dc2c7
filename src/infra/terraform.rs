//! Terraform-backed provisioner
//!
//! Runs the `terraform` binary against the cluster's working directory inside
//! the asset directory. The directory is initialised once per process before
//! the first command that needs state.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::Provisioner;
use crate::{exec, Error, Result};

/// Provisioner that shells out to terraform
#[derive(Debug)]
pub struct TerraformExecutor {
    working_dir: PathBuf,
    verbose: bool,
    initialized: OnceCell<()>,
}

impl TerraformExecutor {
    /// Create an executor for the given working directory
    ///
    /// With `verbose` set, apply output is streamed through the log as it
    /// arrives instead of only being surfaced on failure.
    pub fn new(working_dir: impl Into<PathBuf>, verbose: bool) -> Self {
        Self {
            working_dir: working_dir.into(),
            verbose,
            initialized: OnceCell::new(),
        }
    }

    /// The terraform working directory
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("terraform");
        cmd.args(args)
            .current_dir(&self.working_dir)
            .env("TF_IN_AUTOMATION", "1");
        cmd
    }

    async fn ensure_initialized(&self) -> Result<()> {
        self.initialized
            .get_or_try_init(|| async {
                if !self.working_dir.is_dir() {
                    return Err(Error::config(format!(
                        "terraform working directory {} does not exist",
                        self.working_dir.display()
                    )));
                }
                debug!(dir = %self.working_dir.display(), "Initializing terraform");
                exec::output(&mut self.command(&["init", "-input=false", "-no-color"])).await?;
                Ok(())
            })
            .await
            .map(|_| ())
    }
}

/// Whether `terraform output -json` (all outputs) shows a provisioned cluster
///
/// An empty state prints `{}`; any recorded output means a previous apply
/// created the cluster.
pub fn outputs_show_cluster(stdout: &str) -> Result<bool> {
    let stdout = stdout.trim();
    if stdout.is_empty() {
        return Ok(false);
    }
    let outputs: serde_json::Map<String, serde_json::Value> = serde_json::from_str(stdout)
        .map_err(|e| Error::config(format!("terraform outputs are not a JSON object: {}", e)))?;
    Ok(!outputs.is_empty())
}

/// Whether terraform's stderr says the working directory has no state yet
pub fn is_missing_state(stderr: &str) -> bool {
    stderr.contains("No state file was found")
}

/// Whether terraform's stderr says the requested output is not defined
pub fn is_missing_output(stderr: &str) -> bool {
    stderr.contains("Output") && stderr.contains("not found")
}

#[async_trait]
impl Provisioner for TerraformExecutor {
    async fn cluster_exists(&self) -> Result<bool> {
        self.ensure_initialized().await?;
        let mut cmd = self.command(&["output", "-json", "-no-color"]);
        let out = exec::raw_output(&mut cmd).await?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            if is_missing_state(&stderr) {
                debug!(dir = %self.working_dir.display(), "No terraform state yet");
                return Ok(false);
            }
            return Err(Error::command_failed(
                exec::describe(&cmd),
                stderr.trim().to_string(),
            ));
        }
        outputs_show_cluster(&String::from_utf8_lossy(&out.stdout))
    }

    async fn plan(&self) -> Result<String> {
        self.ensure_initialized().await?;
        exec::output(&mut self.command(&["plan", "-input=false", "-no-color"])).await
    }

    async fn apply(&self) -> Result<()> {
        self.ensure_initialized().await?;
        info!("Applying infrastructure, this may take a while...");
        let mut cmd = self.command(&["apply", "-input=false", "-auto-approve", "-no-color"]);
        if self.verbose {
            exec::stream(&mut cmd).await
        } else {
            exec::output(&mut cmd).await.map(|_| ())
        }
    }

    async fn output(&self, key: &str) -> Result<serde_json::Value> {
        self.ensure_initialized().await?;
        let mut cmd = self.command(&["output", "-json", key]);
        let out = exec::raw_output(&mut cmd).await?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            if is_missing_output(&stderr) {
                debug!(output = %key, "Terraform output not defined");
                return Ok(serde_json::Value::Null);
            }
            return Err(Error::command_failed(
                exec::describe(&cmd),
                stderr.trim().to_string(),
            ));
        }
        serde_json::from_slice(&out.stdout).map_err(|e| {
            Error::config(format!("terraform output {:?} is not valid JSON: {}", key, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_outputs_mean_no_cluster() {
        assert!(!outputs_show_cluster("{}\n").unwrap());
        assert!(!outputs_show_cluster("").unwrap());
        assert!(outputs_show_cluster(
            r#"{"kubeconfig":{"sensitive":true,"type":"string","value":"apiVersion: v1"}}"#
        )
        .unwrap());
        assert!(outputs_show_cluster("[]").is_err());
    }

    #[test]
    fn missing_state_is_recognised() {
        assert!(is_missing_state(
            "\u{1b}[31mNo state file was found!\n\nState management commands require a state file."
        ));
        assert!(!is_missing_state("Error: Failed to load state"));
    }

    fn terraform_installed() -> bool {
        std::process::Command::new("terraform")
            .arg("version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    // =========================================================================
    // Story: a freshly initialised working directory is a bootstrap, not an
    // existing cluster
    // =========================================================================
    #[tokio::test]
    async fn story_fresh_working_dir_has_no_cluster() {
        if !terraform_installed() {
            eprintln!("terraform not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("main.tf"),
            "output \"kubeconfig\" {\n  value = \"apiVersion: v1\"\n}\n",
        )
        .unwrap();

        let executor = TerraformExecutor::new(dir.path(), false);
        let exists = executor.cluster_exists().await;
        assert!(matches!(exists, Ok(false)), "{:?}", exists);
    }

    #[test]
    fn undefined_output_is_recognised() {
        assert!(is_missing_output(
            "Error: Output \"kubelet_values\" not found\n\nThe output variable requested could not be found"
        ));
        assert!(!is_missing_output("Error: Failed to load state"));
    }

    #[tokio::test]
    async fn missing_working_dir_is_a_config_error() {
        let executor = TerraformExecutor::new("/nonexistent/keel/terraform", false);
        assert!(matches!(
            executor.cluster_exists().await,
            Err(Error::Config(_))
        ));
    }
}
