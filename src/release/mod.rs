//! Component releases
//!
//! Every workload keel installs, control-plane chart or user component, is a
//! named release managed by a release engine (Helm). The [`ReleaseReconciler`]
//! decides per workload whether to install or upgrade:
//!
//! 1. Ensure the target namespace exists
//! 2. Query release history (absence is the only "not found")
//! 3. Absent: fresh install; Present: in-place upgrade that recreates
//!    resources the engine cannot patch
//!
//! Workloads are reconciled one at a time in declared order. Declared order is
//! the only dependency mechanism: a workload others depend on sets
//! `wait_for_ready` so the next one starts only after it is ready.

pub mod helm;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::cluster::ClusterApi;
use crate::{Error, ReleaseError, Result};

pub use helm::HelmEngine;

/// A workload to install as a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadDescriptor {
    /// Release name
    pub name: String,
    /// Namespace the release is installed into
    pub namespace: String,
    /// Chart reference (repo/chart, OCI URL or local path)
    pub chart: String,
    /// Chart version constraint
    pub version: Option<String>,
    /// Values document (YAML)
    pub values: Option<String>,
    /// Block until the release's resources are ready
    pub wait_for_ready: bool,
}

impl WorkloadDescriptor {
    /// Descriptor for a chart with no version pin or values
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        chart: impl Into<String>,
        wait_for_ready: bool,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            chart: chart.into(),
            version: None,
            values: None,
            wait_for_ready,
        }
    }

    /// Attach a values document
    pub fn with_values(mut self, values: impl Into<String>) -> Self {
        self.values = Some(values.into());
        self
    }
}

/// Whether a release already exists, derived fresh from release history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseState {
    /// No history for the release name
    Absent,
    /// The release has at least one revision
    Present,
}

/// What the reconciler did for a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseAction {
    /// Fresh install
    Installed,
    /// In-place upgrade
    Upgraded,
}

/// Release engine operations
///
/// This trait abstracts the package-release tool for testability.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReleaseEngine: Send + Sync {
    /// Look up release history; a missing release is `Ok(Absent)`, not an error
    async fn history(&self, release: &str, namespace: &str) -> Result<ReleaseState>;

    /// Install a new release, waiting for readiness if the descriptor asks to
    async fn install(&self, workload: &WorkloadDescriptor) -> Result<()>;

    /// Upgrade an existing release, recreating resources that cannot be patched
    async fn upgrade(&self, workload: &WorkloadDescriptor) -> Result<()>;
}

/// Installs or upgrades workloads against one cluster
pub struct ReleaseReconciler<'a> {
    api: &'a dyn ClusterApi,
    engine: &'a dyn ReleaseEngine,
}

impl<'a> ReleaseReconciler<'a> {
    /// Create a reconciler for the cluster behind `api` and `engine`
    pub fn new(api: &'a dyn ClusterApi, engine: &'a dyn ReleaseEngine) -> Self {
        Self { api, engine }
    }

    /// Install or upgrade a single workload
    pub async fn reconcile(
        &self,
        workload: &WorkloadDescriptor,
    ) -> std::result::Result<ReleaseAction, ReleaseError> {
        self.api
            .ensure_namespace(&workload.namespace)
            .await
            .map_err(|e| ReleaseError::NamespaceEnsureFailed {
                namespace: workload.namespace.clone(),
                source: Box::new(e),
            })?;

        let state = self
            .engine
            .history(&workload.name, &workload.namespace)
            .await
            .map_err(|e| ReleaseError::ReleaseQueryFailed {
                release: workload.name.clone(),
                source: Box::new(e),
            })?;

        match state {
            ReleaseState::Absent => {
                info!(
                    release = %workload.name,
                    namespace = %workload.namespace,
                    wait = workload.wait_for_ready,
                    "Installing release"
                );
                self.engine
                    .install(workload)
                    .await
                    .map_err(|e| ReleaseError::InstallFailed {
                        release: workload.name.clone(),
                        source: Box::new(e),
                    })?;
                Ok(ReleaseAction::Installed)
            }
            ReleaseState::Present => {
                info!(
                    release = %workload.name,
                    namespace = %workload.namespace,
                    wait = workload.wait_for_ready,
                    "Upgrading release"
                );
                self.engine
                    .upgrade(workload)
                    .await
                    .map_err(|e| ReleaseError::UpgradeFailed {
                        release: workload.name.clone(),
                        source: Box::new(e),
                    })?;
                Ok(ReleaseAction::Upgraded)
            }
        }
    }

    /// Reconcile workloads strictly in order, stopping at the first failure
    pub async fn reconcile_all(&self, workloads: &[WorkloadDescriptor]) -> Result<()> {
        for workload in workloads {
            self.reconcile(workload)
                .await
                .map_err(|source| Error::ComponentReconcileFailed {
                    component: workload.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApi;
    use mockall::predicate::*;
    use mockall::Sequence;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    fn workload(name: &str) -> WorkloadDescriptor {
        WorkloadDescriptor::new(name, "monitoring", format!("charts/{}", name), false)
    }

    fn namespaces_ok() -> MockClusterApi {
        let mut api = MockClusterApi::new();
        api.expect_ensure_namespace().returning(|_| Ok(()));
        api
    }

    // ==========================================================================
    // Story: Install versus upgrade is decided from release history
    // ==========================================================================

    #[tokio::test]
    async fn absent_release_is_installed_into_its_namespace() {
        let mut seq = Sequence::new();
        let mut api = MockClusterApi::new();
        api.expect_ensure_namespace()
            .with(eq("monitoring"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let mut engine = MockReleaseEngine::new();
        engine
            .expect_history()
            .with(eq("grafana"), eq("monitoring"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(ReleaseState::Absent));
        engine
            .expect_install()
            .with(eq(workload("grafana")))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        engine.expect_upgrade().never();

        let action = ReleaseReconciler::new(&api, &engine)
            .reconcile(&workload("grafana"))
            .await
            .unwrap();
        assert_eq!(action, ReleaseAction::Installed);
    }

    #[tokio::test]
    async fn present_release_is_upgraded() {
        let api = namespaces_ok();
        let mut engine = MockReleaseEngine::new();
        engine
            .expect_history()
            .returning(|_, _| Ok(ReleaseState::Present));
        engine.expect_install().never();
        engine.expect_upgrade().times(1).returning(|_| Ok(()));

        let action = ReleaseReconciler::new(&api, &engine)
            .reconcile(&workload("grafana"))
            .await
            .unwrap();
        assert_eq!(action, ReleaseAction::Upgraded);
    }

    #[tokio::test]
    async fn second_run_upgrades_what_the_first_installed() {
        let api = namespaces_ok();
        let installed: Arc<Mutex<HashSet<String>>> = Arc::default();

        let mut engine = MockReleaseEngine::new();
        let state = installed.clone();
        engine.expect_history().returning(move |name, _| {
            Ok(if state.lock().unwrap().contains(name) {
                ReleaseState::Present
            } else {
                ReleaseState::Absent
            })
        });
        let state = installed.clone();
        engine.expect_install().times(1).returning(move |w| {
            state.lock().unwrap().insert(w.name.clone());
            Ok(())
        });
        engine.expect_upgrade().times(1).returning(|_| Ok(()));

        let reconciler = ReleaseReconciler::new(&api, &engine);
        let first = reconciler.reconcile(&workload("grafana")).await.unwrap();
        let second = reconciler.reconcile(&workload("grafana")).await.unwrap();
        assert_eq!(
            (first, second),
            (ReleaseAction::Installed, ReleaseAction::Upgraded)
        );
    }

    // ==========================================================================
    // Story: Failures say whether anything was touched
    // ==========================================================================

    #[tokio::test]
    async fn namespace_failure_touches_nothing() {
        let mut api = MockClusterApi::new();
        api.expect_ensure_namespace()
            .returning(|_| Err(Error::command_failed("create namespace", "forbidden")));
        let mut engine = MockReleaseEngine::new();
        engine.expect_history().never();

        let err = ReleaseReconciler::new(&api, &engine)
            .reconcile(&workload("grafana"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::NamespaceEnsureFailed { .. }));
        assert!(!err.partially_applied());
    }

    #[tokio::test]
    async fn history_failure_is_not_treated_as_absent() {
        let api = namespaces_ok();
        let mut engine = MockReleaseEngine::new();
        engine
            .expect_history()
            .returning(|_, _| Err(Error::command_failed("helm history", "cluster unreachable")));
        engine.expect_install().never();
        engine.expect_upgrade().never();

        let err = ReleaseReconciler::new(&api, &engine)
            .reconcile(&workload("grafana"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::ReleaseQueryFailed { .. }));
    }

    #[tokio::test]
    async fn install_failure_is_partially_applied() {
        let api = namespaces_ok();
        let mut engine = MockReleaseEngine::new();
        engine
            .expect_history()
            .returning(|_, _| Ok(ReleaseState::Absent));
        engine
            .expect_install()
            .returning(|_| Err(Error::command_failed("helm install", "timed out waiting")));

        let err = ReleaseReconciler::new(&api, &engine)
            .reconcile(&workload("grafana"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::InstallFailed { .. }));
        assert!(err.partially_applied());
    }

    #[tokio::test]
    async fn upgrade_failure_is_distinct_from_install_failure() {
        let api = namespaces_ok();
        let mut engine = MockReleaseEngine::new();
        engine
            .expect_history()
            .returning(|_, _| Ok(ReleaseState::Present));
        engine
            .expect_upgrade()
            .returning(|_| Err(Error::command_failed("helm upgrade", "conflict")));

        let err = ReleaseReconciler::new(&api, &engine)
            .reconcile(&workload("grafana"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::UpgradeFailed { .. }));
    }

    // ==========================================================================
    // Story: Bulk reconciliation is ordered and fail-fast
    // ==========================================================================

    #[tokio::test]
    async fn workloads_are_visited_in_declared_order() {
        let api = namespaces_ok();
        let visited: Arc<Mutex<Vec<String>>> = Arc::default();

        let mut engine = MockReleaseEngine::new();
        engine
            .expect_history()
            .returning(|_, _| Ok(ReleaseState::Absent));
        let log = visited.clone();
        engine.expect_install().returning(move |w| {
            log.lock().unwrap().push(w.name.clone());
            Ok(())
        });

        let workloads = [workload("c"), workload("a"), workload("b")];
        ReleaseReconciler::new(&api, &engine)
            .reconcile_all(&workloads)
            .await
            .unwrap();
        assert_eq!(*visited.lock().unwrap(), ["c", "a", "b"]);
    }

    #[tokio::test]
    async fn failure_stops_remaining_workloads() {
        let api = namespaces_ok();
        let mut engine = MockReleaseEngine::new();
        engine
            .expect_history()
            .with(eq("first"), always())
            .times(1)
            .returning(|_, _| Ok(ReleaseState::Absent));
        engine
            .expect_history()
            .with(eq("second"), always())
            .times(1)
            .returning(|_, _| Ok(ReleaseState::Absent));
        engine
            .expect_history()
            .with(eq("third"), always())
            .never();
        engine
            .expect_install()
            .with(function(|w: &WorkloadDescriptor| w.name == "first"))
            .returning(|_| Ok(()));
        engine
            .expect_install()
            .with(function(|w: &WorkloadDescriptor| w.name == "second"))
            .returning(|_| Err(Error::command_failed("helm install", "bad chart")));

        let workloads = [workload("first"), workload("second"), workload("third")];
        match ReleaseReconciler::new(&api, &engine)
            .reconcile_all(&workloads)
            .await
        {
            Err(Error::ComponentReconcileFailed { component, source }) => {
                assert_eq!(component, "second");
                assert!(matches!(source, ReleaseError::InstallFailed { .. }));
            }
            other => panic!("expected ComponentReconcileFailed, got {:?}", other),
        }
    }
}
