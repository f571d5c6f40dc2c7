//! Apply orchestrator
//!
//! One `cluster apply` run is a linear state machine:
//!
//! ```text
//! Start -> PlanIfExists -> ConfirmGate -> ApplyInfra -> ObtainCredentials
//!       -> VerifyCluster -> ReconcileNamespaces -> [ControlPlaneUpgrade]
//!       -> [PostApplyHook] -> [ReconcileComponents] -> Done
//! ```
//!
//! Bracketed steps are conditional. The first error ends the run; nothing
//! already applied is rolled back, and re-running apply is the recovery path.
//! Declining the confirmation gate ends the run with
//! [`ApplyOutcome::Aborted`], which is not an error.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::cluster::{ClusterApi, ClusterHandle};
use crate::infra::{output_as, Provisioner, KUBECONFIG_OUTPUT};
use crate::platform::{control_plane_charts, Capability, Platform};
use crate::prompt::Prompt;
use crate::release::{ReleaseEngine, ReleaseReconciler, WorkloadDescriptor};
use crate::verify::{ClusterVerifier, VerifyConfig};
use crate::{dns, namespaces, Error, Result, NAMESPACE_LABEL_KEY};

/// Steps of an apply run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyState {
    /// Run started
    Start,
    /// Diff the infrastructure of an existing cluster
    PlanIfExists,
    /// Operator confirms the diff
    ConfirmGate,
    /// Converge the infrastructure
    ApplyInfra,
    /// Derive cluster credentials from provisioner outputs
    ObtainCredentials,
    /// Wait for the expected Ready nodes
    VerifyCluster,
    /// Label every namespace with the ownership label
    ReconcileNamespaces,
    /// Upgrade control-plane releases of a pre-existing, unmanaged cluster
    ControlPlaneUpgrade,
    /// Platform-specific hook
    PostApplyHook,
    /// Install or upgrade declared components
    ReconcileComponents,
    /// Run finished successfully
    Done,
}

impl fmt::Display for ApplyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApplyState::Start => "Start",
            ApplyState::PlanIfExists => "PlanIfExists",
            ApplyState::ConfirmGate => "ConfirmGate",
            ApplyState::ApplyInfra => "ApplyInfra",
            ApplyState::ObtainCredentials => "ObtainCredentials",
            ApplyState::VerifyCluster => "VerifyCluster",
            ApplyState::ReconcileNamespaces => "ReconcileNamespaces",
            ApplyState::ControlPlaneUpgrade => "ControlPlaneUpgrade",
            ApplyState::PostApplyHook => "PostApplyHook",
            ApplyState::ReconcileComponents => "ReconcileComponents",
            ApplyState::Done => "Done",
        };
        f.write_str(name)
    }
}

/// Operator choices for one run, fixed before the run starts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Skip the confirmation gate for an existing cluster
    pub confirm: bool,
    /// Do not reconcile declared components
    pub skip_components: bool,
    /// Append the kubelet chart to the control-plane upgrade
    pub upgrade_kubelets: bool,
}

/// How a run ended, when it did not fail
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Every step completed
    Applied,
    /// The operator declined the plan; nothing was changed
    Aborted,
}

/// API access to a cluster for the duration of one run
#[derive(Clone)]
pub struct ClusterSession {
    /// Kubernetes API
    pub api: Arc<dyn ClusterApi>,
    /// Release engine bound to the same cluster
    pub releases: Arc<dyn ReleaseEngine>,
}

/// Turns cluster credentials into API access
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to the cluster addressed by `handle`
    async fn connect(&self, handle: &ClusterHandle) -> Result<ClusterSession>;
}

/// Sequences one apply run
pub struct ApplyOrchestrator<'a> {
    provisioner: &'a dyn Provisioner,
    prompt: &'a dyn Prompt,
    connector: &'a dyn Connector,
    platform: Platform,
    kubeconfig_path: PathBuf,
    charts_dir: PathBuf,
    components: Vec<WorkloadDescriptor>,
    manual_dns_zone: Option<String>,
    asset_dir: Option<PathBuf>,
    verify: VerifyConfig,
}

impl<'a> ApplyOrchestrator<'a> {
    /// Create an orchestrator.
    ///
    /// The kubeconfig is persisted at `kubeconfig_path`; control-plane charts
    /// are read from `charts_dir`.
    pub fn new(
        provisioner: &'a dyn Provisioner,
        prompt: &'a dyn Prompt,
        connector: &'a dyn Connector,
        platform: Platform,
        kubeconfig_path: impl Into<PathBuf>,
        charts_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            provisioner,
            prompt,
            connector,
            platform,
            kubeconfig_path: kubeconfig_path.into(),
            charts_dir: charts_dir.into(),
            components: Vec::new(),
            manual_dns_zone: None,
            asset_dir: None,
            verify: VerifyConfig::default(),
        }
    }

    /// Components to reconcile, in declared order
    pub fn with_components(mut self, components: Vec<WorkloadDescriptor>) -> Self {
        self.components = components;
        self
    }

    /// Ask the operator to create DNS entries for `zone` after the apply
    pub fn with_manual_dns(mut self, zone: impl Into<String>) -> Self {
        self.manual_dns_zone = Some(zone.into());
        self
    }

    /// Report `dir` as the asset location once the infrastructure is applied
    pub fn with_asset_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.asset_dir = Some(dir.into());
        self
    }

    /// Override verification polling bounds
    pub fn with_verify_config(mut self, verify: VerifyConfig) -> Self {
        self.verify = verify;
        self
    }

    /// Run every step in order
    pub async fn run(&self, options: ApplyOptions) -> Result<ApplyOutcome> {
        let descriptor = self.platform.descriptor();
        enter(ApplyState::Start);
        info!(
            platform = %descriptor.name,
            expected_nodes = descriptor.expected_nodes,
            ?options,
            "Starting cluster apply"
        );

        enter(ApplyState::PlanIfExists);
        let exists = self
            .provisioner
            .cluster_exists()
            .await
            .map_err(|e| Error::InfraPlanFailed(Box::new(e)))?;

        if !exists {
            skip(ApplyState::PlanIfExists, "no existing cluster");
            skip(ApplyState::ConfirmGate, "no existing cluster");
        } else if options.confirm {
            skip(ApplyState::PlanIfExists, "apply pre-confirmed");
            skip(ApplyState::ConfirmGate, "apply pre-confirmed");
        } else {
            let plan = self
                .provisioner
                .plan()
                .await
                .map_err(|e| Error::InfraPlanFailed(Box::new(e)))?;

            enter(ApplyState::ConfirmGate);
            println!("{}", plan);
            if !self
                .prompt
                .confirm("Cluster already exists. Do you want to apply the changes above?")
                .await?
            {
                warn!("Cluster apply cancelled");
                return Ok(ApplyOutcome::Aborted);
            }
        }

        enter(ApplyState::ApplyInfra);
        self.provisioner
            .apply()
            .await
            .map_err(|e| Error::InfraApplyFailed(Box::new(e)))?;
        if let Some(zone) = &self.manual_dns_zone {
            dns::manual_config_prompt(zone, self.provisioner, self.prompt)
                .await
                .map_err(|e| Error::InfraApplyFailed(Box::new(e)))?;
        }
        if let Some(dir) = &self.asset_dir {
            info!(
                platform = %descriptor.name,
                assets = %dir.display(),
                "Your configurations are stored in the asset directory"
            );
        }

        enter(ApplyState::ObtainCredentials);
        let session = self
            .obtain_credentials()
            .await
            .map_err(|e| Error::CredentialRetrievalFailed(Box::new(e)))?;
        let api = session.api.as_ref();
        let reconciler = ReleaseReconciler::new(api, session.releases.as_ref());

        enter(ApplyState::VerifyCluster);
        ClusterVerifier::new(self.verify.clone())
            .verify(api, descriptor.expected_nodes)
            .await?;

        enter(ApplyState::ReconcileNamespaces);
        namespaces::reconcile_all(api, NAMESPACE_LABEL_KEY).await?;

        if !exists {
            skip(ApplyState::ControlPlaneUpgrade, "cluster was just created");
        } else if descriptor.has(Capability::Managed) {
            skip(ApplyState::ControlPlaneUpgrade, "control plane is managed by the platform");
        } else {
            enter(ApplyState::ControlPlaneUpgrade);
            self.upgrade_control_plane(&reconciler, options.upgrade_kubelets)
                .await?;
        }

        match self.platform.post_apply_hook() {
            Some(hook) if descriptor.has(Capability::PostApplyHook) => {
                enter(ApplyState::PostApplyHook);
                hook.run(api)
                    .await
                    .map_err(|e| Error::PostHookFailed(Box::new(e)))?;
            }
            _ => skip(ApplyState::PostApplyHook, "platform has no post-apply hook"),
        }

        if options.skip_components {
            skip(ApplyState::ReconcileComponents, "--skip-components set");
        } else if self.components.is_empty() {
            skip(ApplyState::ReconcileComponents, "no components declared");
        } else {
            enter(ApplyState::ReconcileComponents);
            reconciler.reconcile_all(&self.components).await?;
        }

        enter(ApplyState::Done);
        info!("Cluster apply complete");
        Ok(ApplyOutcome::Applied)
    }

    async fn obtain_credentials(&self) -> Result<ClusterSession> {
        let kubeconfig: String = output_as(self.provisioner, KUBECONFIG_OUTPUT).await?;
        let handle = ClusterHandle::persist(kubeconfig.into_bytes(), &self.kubeconfig_path)?;
        info!(kubeconfig = %handle.path().display(), "Cluster credentials stored");
        self.connector.connect(&handle).await
    }

    async fn upgrade_control_plane(
        &self,
        reconciler: &ReleaseReconciler<'_>,
        upgrade_kubelets: bool,
    ) -> Result<()> {
        let charts = control_plane_charts(&self.charts_dir, upgrade_kubelets);
        for chart in charts {
            let workload = self.with_control_plane_values(chart).await?;
            reconciler
                .reconcile(&workload)
                .await
                .map_err(|source| Error::ControlPlaneUpgradeFailed {
                    component: workload.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn with_control_plane_values(
        &self,
        workload: WorkloadDescriptor,
    ) -> Result<WorkloadDescriptor> {
        let key = control_plane_values_output(&workload.name);
        let values = self
            .provisioner
            .output(&key)
            .await
            .and_then(values_document)
            .map_err(|e| Error::ControlPlaneValuesFailed {
                component: workload.name.clone(),
                source: Box::new(e),
            })?;

        Ok(match values {
            Some(values) => workload.with_values(values),
            None => workload,
        })
    }
}

/// Provisioner output holding values for a control-plane chart
pub fn control_plane_values_output(component: &str) -> String {
    format!("{}_values", component)
}

/// Turn a provisioner output into a values document; `null` means no values
fn values_document(value: serde_json::Value) -> Result<Option<String>> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s)),
        other => serde_yaml::to_string(&other)
            .map(Some)
            .map_err(|e| Error::config(format!("values are not representable as YAML: {}", e))),
    }
}

fn enter(state: ApplyState) {
    info!(step = %state, "Entering step");
}

fn skip(state: ApplyState, reason: &str) {
    info!(step = %state, reason, "Skipping step");
}
