use chart_assignment_apis::{
    ChartAssignmentConditionType, ChartAssignmentPhase, ChartAssignmentStatus, ConditionStatus,
};
use k8s_openapi::{
    api::core::v1::Pod,
    chrono::{DateTime, Utc},
};
use kube::ResourceExt;

use crate::{
    assignment_modifications::AssignmentModifications, cluster_api::ClusterApi,
    errors::ControllerError, release::{ReleaseEngine, ReleaseStatus},
};

fn is_ready(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Running") | Some("Succeeded")
    )
}

/// Projects the release status and the pods of the target namespace onto the
/// assignment status. `pods` is `None` if the namespace does not exist.
///
/// Readiness is only given if the release is settled. This is an incomplete
/// heuristic, it reports an empty namespace as ready.
pub(crate) fn project_status(
    status: &mut ChartAssignmentStatus,
    generation: i64,
    release: &ReleaseStatus,
    pods: Option<&[Pod]>,
    now: DateTime<Utc>,
) {
    let settled = release.phase == ChartAssignmentPhase::Settled;
    status.observed_generation = generation;
    status.phase = Some(release.phase);
    status.set_condition(
        ChartAssignmentConditionType::Settled,
        settled.into(),
        release.error.clone().unwrap_or_default(),
        now,
    );
    let pods = match pods {
        Some(pods) => pods,
        None => {
            status.set_condition(
                ChartAssignmentConditionType::Ready,
                ConditionStatus::False,
                "waiting for namespace creation",
                now,
            );
            return;
        }
    };
    if !settled {
        status.set_condition(
            ChartAssignmentConditionType::Ready,
            ConditionStatus::False,
            "Release not settled yet",
            now,
        );
        return;
    }
    let total = pods.len();
    let ready = pods.iter().filter(|p| is_ready(p)).count();
    if ready == total {
        status.phase = Some(ChartAssignmentPhase::Ready);
    }
    status.set_condition(
        ChartAssignmentConditionType::Ready,
        (ready == total).into(),
        format!("{}/{} pods are running or succeeded", ready, total),
        now,
    );
}

/// Computes and persists the status of the assignment. Nothing is written if
/// the release is unknown or already deleted, as the assignment may have
/// been garbage collected by then.
pub(crate) async fn set_status(
    store: &dyn ClusterApi,
    releases: &dyn ReleaseEngine,
    event: &mut AssignmentModifications,
) -> Result<(), ControllerError> {
    let release = match releases.status(event.name_any().as_str()) {
        Some(release) if release.phase != ChartAssignmentPhase::Deleted => release,
        _ => return Ok(()),
    };
    let namespace = event.spec.namespace_name.clone();
    let pods = match store.get_namespace(namespace.as_str()).await? {
        Some(_) => Some(store.list_pods(namespace.as_str()).await?),
        None => None,
    };
    let generation = event.metadata.generation.unwrap_or_default();
    let status = event.status.get_or_insert_with(Default::default);
    project_status(status, generation, &release, pods.as_deref(), Utc::now());
    if event.replace_status(store).await? {
        debug!(
            "updated status of ChartAssignment {} to {:?}",
            event.name_any(),
            event.phase()
        );
    }
    Ok(())
}
