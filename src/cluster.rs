//! Cluster credentials and Kubernetes API access
//!
//! [`ClusterHandle`] is the kubeconfig produced by the provisioner. It lives
//! for one apply run and is handed by reference to every step that talks to
//! the cluster. [`ClusterApi`] is the narrow slice of the Kubernetes API the
//! pipeline needs, abstracted so it can be mocked in tests.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Node, Secret};
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::{Error, Result, FIELD_MANAGER};

/// Connection timeout for API clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Read timeout for API clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials addressing a live cluster's API server
///
/// The kubeconfig is kept as opaque bytes and persisted at `path` so external
/// tools (helm) and the operator can use it too.
#[derive(Clone)]
pub struct ClusterHandle {
    kubeconfig: Vec<u8>,
    path: PathBuf,
}

impl fmt::Debug for ClusterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterHandle")
            .field("path", &self.path)
            .field("kubeconfig", &"<redacted>")
            .finish()
    }
}

impl ClusterHandle {
    /// Write the kubeconfig to `path` and return a handle for it
    pub fn persist(kubeconfig: Vec<u8>, path: impl Into<PathBuf>) -> Result<Self> {
        if kubeconfig.is_empty() {
            return Err(Error::config("kubeconfig is empty"));
        }
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_private(&path, &kubeconfig)?;
        Ok(Self { kubeconfig, path })
    }

    /// Load a previously persisted kubeconfig
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let kubeconfig = std::fs::read(&path).map_err(|e| {
            Error::config(format!(
                "failed to read kubeconfig {}: {} (has the cluster been applied?)",
                path.display(),
                e
            ))
        })?;
        if kubeconfig.is_empty() {
            return Err(Error::config(format!("kubeconfig {} is empty", path.display())));
        }
        Ok(Self { kubeconfig, path })
    }

    /// Raw kubeconfig bytes
    pub fn kubeconfig(&self) -> &[u8] {
        &self.kubeconfig
    }

    /// Where the kubeconfig is stored on disk
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build a Kubernetes client from the kubeconfig
    pub async fn client(&self) -> Result<Client> {
        let text = std::str::from_utf8(&self.kubeconfig)
            .map_err(|e| Error::config(format!("kubeconfig is not valid UTF-8: {}", e)))?;
        let kubeconfig = Kubeconfig::from_yaml(text)
            .map_err(|e| Error::config(format!("failed to parse kubeconfig: {}", e)))?;
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?;
        config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
        config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
        Ok(Client::try_from(config)?)
    }
}

/// Write `contents` readable by the owner only, tightening an existing file
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        // mode only applies on creation
        if path.exists() {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.flush()?;
    Ok(())
}

/// Server-side apply parameters for ownership labels
///
/// Forced so the label is taken over when another field manager (for example
/// `kubectl label`) last wrote it.
pub fn label_patch_params() -> PatchParams {
    PatchParams::apply(FIELD_MANAGER).force()
}

/// Readiness of a single node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    /// Node name
    pub name: String,
    /// Whether the node reports the Ready condition as True
    pub ready: bool,
}

/// A namespace and its current labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceInfo {
    /// Namespace name
    pub name: String,
    /// Current labels
    pub labels: BTreeMap<String, String>,
}

/// Kubernetes API operations used by the apply pipeline
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List every node with its readiness
    async fn list_nodes(&self) -> Result<Vec<NodeStatus>>;

    /// List every namespace with its labels
    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>>;

    /// Create a namespace; an existing namespace is not an error
    async fn ensure_namespace(&self, name: &str) -> Result<()>;

    /// Create or patch a namespace so it carries `labels`
    async fn apply_namespace_labels(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Create or update an Opaque secret with string data
    async fn apply_secret(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<()>;
}

/// Whether a node reports Ready=True
pub fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false)
}

/// Real Kubernetes client implementation
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Create a new KubeClusterApi wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_nodes(&self) -> Result<Vec<NodeStatus>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default()).await?;
        Ok(nodes
            .items
            .iter()
            .map(|node| NodeStatus {
                name: node.metadata.name.clone().unwrap_or_default(),
                ready: node_is_ready(node),
            })
            .collect())
    }

    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespaces = api.list(&ListParams::default()).await?;
        Ok(namespaces
            .items
            .into_iter()
            .map(|ns| NamespaceInfo {
                name: ns.metadata.name.unwrap_or_default(),
                labels: ns.metadata.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: kube::core::ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(namespace = %name, "Namespace already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_namespace_labels(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {
                "name": name,
                "labels": labels
            }
        });
        api.patch(name, &label_patch_params(), &Patch::Apply(&ns))
            .await?;
        Ok(())
    }

    async fn apply_secret(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "type": "Opaque",
            "metadata": {
                "name": name,
                "namespace": namespace
            },
            "stringData": data
        });
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&secret),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus as K8sNodeStatus};

    fn node_with(conditions: Vec<(&str, &str)>) -> Node {
        Node {
            status: Some(K8sNodeStatus {
                conditions: Some(
                    conditions
                        .into_iter()
                        .map(|(t, s)| NodeCondition {
                            type_: t.to_string(),
                            status: s.to_string(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn node_readiness_follows_ready_condition() {
        assert!(node_is_ready(&node_with(vec![("Ready", "True")])));
        assert!(!node_is_ready(&node_with(vec![("Ready", "False")])));
        assert!(!node_is_ready(&node_with(vec![("MemoryPressure", "True")])));
        assert!(!node_is_ready(&Node::default()));
    }

    #[test]
    fn handle_persists_and_reloads_kubeconfig() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster-assets/auth/kubeconfig");

        let handle = ClusterHandle::persist(b"apiVersion: v1\n".to_vec(), &path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"apiVersion: v1\n");

        let loaded = ClusterHandle::load(&path).unwrap();
        assert_eq!(loaded.kubeconfig(), handle.kubeconfig());
        assert_eq!(loaded.path(), path.as_path());
    }

    #[cfg(unix)]
    #[test]
    fn persisted_kubeconfig_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth/kubeconfig");
        ClusterHandle::persist(b"apiVersion: v1\n".to_vec(), &path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        // A file left readable by an earlier run is tightened on rewrite
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        ClusterHandle::persist(b"apiVersion: v1\nkind: Config\n".to_vec(), &path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(
            std::fs::read(&path).unwrap(),
            b"apiVersion: v1\nkind: Config\n"
        );
    }

    #[test]
    fn ownership_labels_take_over_conflicting_managers() {
        let params = label_patch_params();
        assert!(params.force);
        assert_eq!(params.field_manager.as_deref(), Some(FIELD_MANAGER));
    }

    #[test]
    fn empty_kubeconfig_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ClusterHandle::persist(Vec::new(), dir.path().join("kc")).is_err());
    }

    #[test]
    fn debug_output_redacts_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let handle =
            ClusterHandle::persist(b"token: s3cr3t".to_vec(), dir.path().join("kc")).unwrap();
        let rendered = format!("{:?}", handle);
        assert!(!rendered.contains("s3cr3t"));
        assert!(rendered.contains("redacted"));
    }

    #[tokio::test]
    async fn garbage_kubeconfig_fails_client_construction() {
        let dir = tempfile::tempdir().unwrap();
        let handle =
            ClusterHandle::persist(b"::: not yaml :::".to_vec(), dir.path().join("kc")).unwrap();
        assert!(matches!(handle.client().await, Err(Error::Config(_))));
    }
}
