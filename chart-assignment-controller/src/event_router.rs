//! Maps pod changes back to the ChartAssignments whose target namespace
//! contains the pod.

use chart_assignment_apis::ChartAssignment;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use kube_runtime::reflector::{ObjectRef, Store};

/// All ChartAssignments in the controller's cache targeting the namespace of
/// the pod. Only reads the cache, so it is safe to use as watch mapper.
pub(crate) fn assignments_for_pod(
    assignments: &Store<ChartAssignment>,
    pod: &Pod,
) -> Vec<ObjectRef<ChartAssignment>> {
    let namespace = match pod.namespace() {
        Some(namespace) => namespace,
        None => return vec![],
    };
    assignments
        .state()
        .iter()
        .filter(|a| a.spec.namespace_name == namespace)
        .map(|a| ObjectRef::from_obj(a.as_ref()))
        .collect()
}
