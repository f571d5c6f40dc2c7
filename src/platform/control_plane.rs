//! Control-plane charts
//!
//! The provisioner renders one chart per control-plane component into the
//! asset directory. They are upgraded in this exact order; later components
//! rely on earlier ones being ready, so every release waits.

use std::path::Path;

use crate::release::WorkloadDescriptor;
use crate::KEEL_SYSTEM_NAMESPACE;

/// Control-plane components as `(name, namespace)`, in upgrade order
pub const CONTROL_PLANE_CHARTS: &[(&str, &str)] = &[
    ("bootstrap-secrets", "kube-system"),
    ("pod-checkpointer", "kube-system"),
    ("kube-apiserver", "kube-system"),
    ("kubernetes", "kube-system"),
    ("calico", "kube-system"),
    ("keel", KEEL_SYSTEM_NAMESPACE),
    ("admission-webhook-server", KEEL_SYSTEM_NAMESPACE),
    ("node-local-dns", "kube-system"),
];

/// Kubelet chart, upgraded last and only on request
pub const KUBELET_CHART: (&str, &str) = ("kubelet", "kube-system");

/// Build the ordered control-plane descriptor list.
///
/// Charts are read from `<charts_dir>/<namespace>/<name>`.
pub fn control_plane_charts(charts_dir: &Path, upgrade_kubelets: bool) -> Vec<WorkloadDescriptor> {
    let kubelet = upgrade_kubelets.then_some(&KUBELET_CHART);
    CONTROL_PLANE_CHARTS
        .iter()
        .chain(kubelet)
        .map(|(name, namespace)| {
            let chart = charts_dir.join(namespace).join(name);
            WorkloadDescriptor::new(*name, *namespace, chart.to_string_lossy(), true)
        })
        .collect()
}
