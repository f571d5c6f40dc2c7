//! Namespace ownership labels
//!
//! Every namespace in the cluster carries `<label key> = <namespace name>`.
//! Namespaces that already carry the label are left untouched, so running the
//! reconciler again is a no-op. The first failure aborts the whole pass.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::cluster::{ClusterApi, NamespaceInfo};
use crate::{Error, Result};

/// Whether a namespace already carries its ownership label
pub fn has_ownership_label(ns: &NamespaceInfo, label_key: &str) -> bool {
    ns.labels.get(label_key) == Some(&ns.name)
}

/// Label every namespace with `label_key = <namespace name>`
///
/// # Returns
///
/// The number of namespaces that had to be patched
pub async fn reconcile_all(api: &dyn ClusterApi, label_key: &str) -> Result<usize> {
    let namespaces = api.list_namespaces().await.map_err(|e| Error::NamespaceReconcileFailed {
        namespace: "*".to_string(),
        source: Box::new(e),
    })?;

    let mut patched = 0;
    for ns in &namespaces {
        if has_ownership_label(ns, label_key) {
            debug!(namespace = %ns.name, "Namespace already labeled");
            continue;
        }

        let labels = BTreeMap::from([(label_key.to_string(), ns.name.clone())]);
        api.apply_namespace_labels(&ns.name, &labels)
            .await
            .map_err(|e| Error::NamespaceReconcileFailed {
                namespace: ns.name.clone(),
                source: Box::new(e),
            })?;
        patched += 1;
    }

    info!(
        total = namespaces.len(),
        patched, "Namespaces carry ownership label"
    );
    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApi;
    use crate::NAMESPACE_LABEL_KEY;
    use mockall::predicate::*;
    use std::sync::{Arc, Mutex};

    fn ns(name: &str, labels: &[(&str, &str)]) -> NamespaceInfo {
        NamespaceInfo {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn labels_every_unlabeled_namespace() {
        let mut api = MockClusterApi::new();
        api.expect_list_namespaces().returning(|| {
            Ok(vec![
                ns("default", &[]),
                ns("kube-system", &[("team", "platform")]),
            ])
        });
        api.expect_apply_namespace_labels()
            .with(
                eq("default"),
                eq(BTreeMap::from([(
                    NAMESPACE_LABEL_KEY.to_string(),
                    "default".to_string(),
                )])),
            )
            .times(1)
            .returning(|_, _| Ok(()));
        api.expect_apply_namespace_labels()
            .with(eq("kube-system"), always())
            .times(1)
            .returning(|_, _| Ok(()));

        assert_eq!(reconcile_all(&api, NAMESPACE_LABEL_KEY).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn second_pass_is_a_no_op() {
        // Shared label store standing in for the API server
        let store = Arc::new(Mutex::new(vec![ns("default", &[]), ns("monitoring", &[])]));

        let mut api = MockClusterApi::new();
        let list_store = store.clone();
        api.expect_list_namespaces()
            .returning(move || Ok(list_store.lock().unwrap().clone()));
        let patch_store = store.clone();
        api.expect_apply_namespace_labels()
            .times(2)
            .returning(move |name, labels| {
                let mut namespaces = patch_store.lock().unwrap();
                let target = namespaces.iter_mut().find(|n| n.name == name).unwrap();
                target.labels.extend(labels.clone());
                Ok(())
            });

        assert_eq!(reconcile_all(&api, NAMESPACE_LABEL_KEY).await.unwrap(), 2);
        let after_first = store.lock().unwrap().clone();

        assert_eq!(reconcile_all(&api, NAMESPACE_LABEL_KEY).await.unwrap(), 0);
        assert_eq!(*store.lock().unwrap(), after_first);
    }

    #[tokio::test]
    async fn wrong_label_value_is_corrected() {
        let mut api = MockClusterApi::new();
        api.expect_list_namespaces()
            .returning(|| Ok(vec![ns("monitoring", &[(NAMESPACE_LABEL_KEY, "old-name")])]));
        api.expect_apply_namespace_labels()
            .times(1)
            .returning(|_, _| Ok(()));

        assert_eq!(reconcile_all(&api, NAMESPACE_LABEL_KEY).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn first_failure_aborts_remaining_namespaces() {
        let mut api = MockClusterApi::new();
        api.expect_list_namespaces()
            .returning(|| Ok(vec![ns("a", &[]), ns("b", &[]), ns("c", &[])]));
        api.expect_apply_namespace_labels()
            .with(eq("a"), always())
            .times(1)
            .returning(|_, _| Ok(()));
        api.expect_apply_namespace_labels()
            .with(eq("b"), always())
            .times(1)
            .returning(|_, _| Err(Error::command_failed("patch", "forbidden")));
        api.expect_apply_namespace_labels()
            .with(eq("c"), always())
            .never();

        match reconcile_all(&api, NAMESPACE_LABEL_KEY).await {
            Err(Error::NamespaceReconcileFailed { namespace, .. }) => assert_eq!(namespace, "b"),
            other => panic!("expected NamespaceReconcileFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn listing_failure_is_fatal() {
        let mut api = MockClusterApi::new();
        api.expect_list_namespaces()
            .returning(|| Err(Error::command_failed("list", "unauthorized")));

        assert!(matches!(
            reconcile_all(&api, NAMESPACE_LABEL_KEY).await,
            Err(Error::NamespaceReconcileFailed { .. })
        ));
    }
}
