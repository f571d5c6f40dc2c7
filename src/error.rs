//! Error types for keel
//!
//! Every step of the apply pipeline fails with its own variant so the
//! operator can tell from the message alone which step broke and why.
//! Declining the confirmation prompt is not an error; see
//! [`ApplyOutcome::Aborted`](crate::orchestrator::ApplyOutcome::Aborted).

use thiserror::Error;

use crate::orchestrator::ApplyState;

/// Main error type for keel operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid or unreadable configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An external tool (terraform, helm) exited unsuccessfully
    #[error("command failed: {command}: {message}")]
    CommandFailed {
        /// The command line that failed
        command: String,
        /// Captured stderr, or a description of the failure
        message: String,
    },

    /// Reading operator input failed
    #[error("prompt error: {0}")]
    Prompt(String),

    /// Computing the infrastructure diff failed
    #[error("planning infrastructure: {0}")]
    InfraPlanFailed(#[source] Box<Error>),

    /// Applying the infrastructure failed; reported verbatim
    #[error("applying infrastructure: {0}")]
    InfraApplyFailed(#[source] Box<Error>),

    /// Cluster credentials could not be derived from provisioner outputs
    #[error("retrieving cluster credentials: {0}")]
    CredentialRetrievalFailed(#[source] Box<Error>),

    /// The expected number of Ready nodes never showed up
    #[error(
        "verifying cluster: expected {expected} Ready nodes, observed {observed}{}",
        .last_error.as_ref().map(|e| format!(" (last error: {e})")).unwrap_or_default()
    )]
    VerificationFailed {
        /// Ready nodes seen on the last successful poll
        observed: usize,
        /// Ready nodes required by the platform
        expected: usize,
        /// Last API error seen while polling, if any
        last_error: Option<String>,
    },

    /// Labeling a namespace with the ownership label failed
    #[error("reconciling namespace {namespace:?}: {source}")]
    NamespaceReconcileFailed {
        /// Namespace being labeled
        namespace: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// A control-plane release failed to install or upgrade
    #[error("upgrading control plane component {component:?}: {source}")]
    ControlPlaneUpgradeFailed {
        /// Control-plane component name
        component: String,
        /// Underlying failure
        #[source]
        source: ReleaseError,
    },

    /// Values for a control-plane chart could not be read from the provisioner
    #[error("reading values for control plane component {component:?}: {source}")]
    ControlPlaneValuesFailed {
        /// Control-plane component name
        component: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// The platform post-apply hook failed
    #[error("running platform post-apply hook: {0}")]
    PostHookFailed(#[source] Box<Error>),

    /// A user-declared component failed to install or upgrade
    #[error("applying component {component:?}: {source}")]
    ComponentReconcileFailed {
        /// Component name
        component: String,
        /// Underlying failure
        #[source]
        source: ReleaseError,
    },
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a command failure for the given command line
    pub fn command_failed(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a prompt error with the given message
    pub fn prompt(msg: impl Into<String>) -> Self {
        Self::Prompt(msg.into())
    }

    /// The pipeline step this error belongs to, if it came from one
    pub fn step(&self) -> Option<ApplyState> {
        match self {
            Error::InfraPlanFailed(_) => Some(ApplyState::PlanIfExists),
            Error::InfraApplyFailed(_) => Some(ApplyState::ApplyInfra),
            Error::CredentialRetrievalFailed(_) => Some(ApplyState::ObtainCredentials),
            Error::VerificationFailed { .. } => Some(ApplyState::VerifyCluster),
            Error::NamespaceReconcileFailed { .. } => Some(ApplyState::ReconcileNamespaces),
            Error::ControlPlaneValuesFailed { .. } | Error::ControlPlaneUpgradeFailed { .. } => {
                Some(ApplyState::ControlPlaneUpgrade)
            }
            Error::PostHookFailed(_) => Some(ApplyState::PostApplyHook),
            Error::ComponentReconcileFailed { .. } => Some(ApplyState::ReconcileComponents),
            _ => None,
        }
    }
}

/// Errors from reconciling a single release
///
/// The first two variants mean nothing was changed for the release; the last
/// two mean the release engine may have partially applied resources.
#[derive(Debug, Error)]
pub enum ReleaseError {
    /// The target namespace could not be created
    #[error("ensuring namespace {namespace:?} exists: {source}")]
    NamespaceEnsureFailed {
        /// Target namespace
        namespace: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Release history could not be queried (distinct from "not found")
    #[error("querying history of release {release:?}: {source}")]
    ReleaseQueryFailed {
        /// Release name
        release: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Fresh install failed
    #[error("installing release {release:?}: {source}")]
    InstallFailed {
        /// Release name
        release: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// In-place upgrade failed
    #[error("upgrading release {release:?}: {source}")]
    UpgradeFailed {
        /// Release name
        release: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },
}

impl ReleaseError {
    /// Whether the release engine may have changed cluster state before failing
    pub fn partially_applied(&self) -> bool {
        matches!(
            self,
            ReleaseError::InstallFailed { .. } | ReleaseError::UpgradeFailed { .. }
        )
    }
}
