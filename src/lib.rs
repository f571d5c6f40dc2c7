//! Keel - one-shot apply pipeline for a Kubernetes cluster and its components
//!
//! A single `keel cluster apply` run provisions or updates the cluster
//! infrastructure, verifies that the expected nodes joined, labels every
//! namespace with the ownership label, upgrades the control plane when the
//! cluster already existed, runs the platform's post-apply hook and finally
//! installs or upgrades every declared component as a Helm release.
//!
//! # Modules
//!
//! - [`orchestrator`] - The apply state machine
//! - [`release`] - Release engine seam (Helm) and the component release reconciler
//! - [`verify`] - Cluster verification (expected Ready node count)
//! - [`namespaces`] - Namespace ownership label reconciliation
//! - [`infra`] - Infrastructure provisioner seam (Terraform)
//! - [`platform`] - Platform descriptors, capabilities and post-apply hooks
//! - [`cluster`] - Cluster credentials and the Kubernetes API seam
//! - [`config`] - Cluster configuration file
//! - [`dns`] - Manual DNS entry confirmation
//! - [`prompt`] - Operator confirmation
//! - [`commands`] - CLI commands
//! - [`exec`] - Running external tools
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod cluster;
pub mod commands;
pub mod config;
pub mod dns;
pub mod error;
pub mod exec;
pub mod infra;
pub mod namespaces;
pub mod orchestrator;
pub mod platform;
pub mod prompt;
pub mod release;
pub mod verify;

pub use error::{Error, ReleaseError};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

use clap::{Parser, Subcommand};

/// Label set on every namespace to mark it as owned by keel.
///
/// The value is always the namespace's own name.
pub const NAMESPACE_LABEL_KEY: &str = "keel.dev/name";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "keel";

/// Namespace holding keel's own control-plane workloads
pub const KEEL_SYSTEM_NAMESPACE: &str = "keel-system";

/// Keel - provision and upgrade Kubernetes clusters and their components
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the cluster configuration file
    #[arg(long, global = true, env = "KEEL_CONFIG", default_value = "keel.yaml")]
    pub config: std::path::PathBuf,

    /// Command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage the cluster
    #[command(subcommand)]
    Cluster(commands::ClusterCommand),

    /// Manage cluster components
    #[command(subcommand)]
    Component(commands::ComponentCommand),
}

impl Cli {
    /// Whether verbose output was requested by the selected command
    pub fn verbose(&self) -> bool {
        match &self.command {
            Commands::Cluster(commands::ClusterCommand::Apply(args)) => args.verbose,
            Commands::Component(_) => false,
        }
    }

    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let config = config::ClusterConfig::load(&self.config)?;
        match self.command {
            Commands::Cluster(commands::ClusterCommand::Apply(args)) => {
                commands::cluster_apply::run(config, args).await
            }
            Commands::Component(commands::ComponentCommand::Apply(args)) => {
                commands::component_apply::run(config, args).await
            }
        }
    }
}
