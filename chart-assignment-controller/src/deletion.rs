use chart_assignment_apis::ChartAssignmentPhase;
use kube::ResourceExt;

use crate::{
    FINALIZER, assignment_modifications::AssignmentModifications, cluster_api::ClusterApi,
    errors::ControllerError, release::ReleaseEngine, utils::remove_finalizer,
};

/// Requests teardown of the release and drops our finalizer once the release
/// engine confirms the deletion, so garbage collection can continue. Does not
/// wait for the teardown; the caller requeues to observe progress. The release
/// is forgotten once the finalizer is gone.
pub(crate) async fn ensure_deleted(
    store: &dyn ClusterApi,
    releases: &dyn ReleaseEngine,
    event: &mut AssignmentModifications,
) -> Result<(), ControllerError> {
    let name = event.name_any();
    releases.ensure_deleted(name.as_str());
    let status = releases
        .status(name.as_str())
        .ok_or_else(|| ControllerError::ReleaseStatusNotFound(name.clone()))?;
    if status.phase != ChartAssignmentPhase::Deleted {
        debug!("deletion of release {} still in progress", name);
        return Ok(());
    }
    if remove_finalizer(event.finalizers_mut(), FINALIZER) {
        match event.patch_spec(store).await {
            Ok(_) => info!("removed finalizer from ChartAssignment {}", name),
            // Garbage collected in the meantime.
            Err(ControllerError::AssignmentGone(_)) => (),
            Err(e) => return Err(e),
        }
    }
    releases.forget(name.as_str());
    Ok(())
}
