use crate::{cluster_api::ClusterApi, errors::ControllerError};
use chart_assignment_apis::ChartAssignment;
use json_patch::diff;
use kube::ResourceExt;
use std::ops::DerefMut;

/// Helper construct to track and persist changes made to a [`ChartAssignment`]
/// during a single reconciliation.
pub(crate) struct AssignmentModifications {
    original: ChartAssignment,
    pub modified: ChartAssignment,
}

impl std::ops::Deref for AssignmentModifications {
    type Target = ChartAssignment;

    fn deref(&self) -> &Self::Target {
        &self.modified
    }
}

impl DerefMut for AssignmentModifications {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.modified
    }
}

impl AssignmentModifications {
    pub(crate) fn new(original: ChartAssignment) -> Self {
        let modified = original.clone();
        Self { original, modified }
    }

    fn status_has_changed(&self) -> bool {
        self.original.status != self.modified.status
    }

    /// JSON patch of everything but the status sub-resource.
    fn get_spec_patch(&self) -> Result<Option<json_patch::Patch>, ControllerError> {
        let mut original = self.original.clone();
        let mut modified = self.modified.clone();
        original.status = None;
        modified.status = None;
        let patch = diff(
            &serde_json::to_value(&original)?,
            &serde_json::to_value(&modified)?,
        );
        if patch.0.is_empty() {
            Ok(None)
        } else {
            Ok(Some(patch))
        }
    }

    /// Patches metadata and spec modifications, returns `true` if anything was written.
    pub(crate) async fn patch_spec(
        &mut self,
        store: &dyn ClusterApi,
    ) -> Result<bool, ControllerError> {
        if let Some(patch) = self.get_spec_patch()? {
            let name = self.original.name_any();
            debug!(
                "Patch ChartAssignment {} ({:?}) with {}",
                name,
                self.original.resource_version(),
                serde_json::to_string(&patch)?
            );
            let status = self.modified.status.clone();
            let new = store.patch_assignment(name.as_str(), patch).await?;
            self.original = new.clone();
            self.modified = new;
            // Keep pending status modifications.
            self.modified.status = status;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Replaces the status sub-resource if it changed, returns `true` if it was written.
    ///
    /// The `resourceVersion` of the last observed object is sent along, so concurrent
    /// writers are detected as conflicts.
    pub(crate) async fn replace_status(
        &mut self,
        store: &dyn ClusterApi,
    ) -> Result<bool, ControllerError> {
        if self.status_has_changed() {
            let new = store.replace_assignment_status(&self.modified).await?;
            self.original = new.clone();
            self.modified = new;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
