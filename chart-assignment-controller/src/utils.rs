use chart_assignment_apis::ChartAssignment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::errors::ControllerError;

/// Adds the finalizer unless it is already present, returns `true` if it was added.
pub(crate) fn add_finalizer(finalizers: &mut Vec<String>, finalizer: &str) -> bool {
    if finalizers.iter().any(|f| f.as_str() == finalizer) {
        false
    } else {
        finalizers.push(finalizer.to_string());
        true
    }
}

/// Removes exactly the given finalizer, returns `true` if it was present.
pub(crate) fn remove_finalizer(finalizers: &mut Vec<String>, finalizer: &str) -> bool {
    let len = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    finalizers.len() != len
}

/// Ensures the owner reference is set and returns `true` if it did not exist
/// before. Existing references are detected by UID and replaced in place.
pub(crate) fn set_owner_reference(meta: &mut ObjectMeta, reference: OwnerReference) -> bool {
    let references = meta.owner_references.get_or_insert_with(Vec::new);
    if let Some(existing) = references.iter_mut().find(|r| r.uid == reference.uid) {
        *existing = reference;
        false
    } else {
        references.push(reference);
        true
    }
}

/// Owner reference pointing at the given [`ChartAssignment`], blocking
/// deletion of the owner until the dependent is gone.
pub(crate) fn owner_reference(
    assignment: &ChartAssignment,
) -> Result<OwnerReference, ControllerError> {
    let uid = assignment.uid().ok_or_else(|| {
        ControllerError::InvalidObject(format!(
            "ChartAssignment {} has no uid",
            assignment.name_any()
        ))
    })?;
    Ok(OwnerReference {
        api_version: ChartAssignment::api_version(&()).to_string(),
        kind: ChartAssignment::kind(&()).to_string(),
        name: assignment.name_any(),
        uid,
        block_owner_deletion: Some(true),
        controller: None,
    })
}

pub(crate) fn metric_name(name: &str) -> String {
    format!("chart_assignment_{}", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(uid: &str, name: &str) -> OwnerReference {
        OwnerReference {
            api_version: "apps.cloudrobotics.com/v1alpha1".to_string(),
            kind: "ChartAssignment".to_string(),
            name: name.to_string(),
            uid: uid.to_string(),
            block_owner_deletion: Some(true),
            controller: None,
        }
    }

    #[test]
    fn owner_reference_is_deduplicated_by_uid() {
        let mut meta = ObjectMeta::default();
        assert!(set_owner_reference(&mut meta, reference("uid-1", "app")));
        assert!(!set_owner_reference(&mut meta, reference("uid-1", "app")));
        assert_eq!(meta.owner_references.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn owner_reference_with_same_uid_is_replaced() {
        let mut meta = ObjectMeta::default();
        set_owner_reference(&mut meta, reference("uid-1", "old"));
        assert!(!set_owner_reference(&mut meta, reference("uid-1", "new")));
        let refs = meta.owner_references.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "new");
    }

    #[test]
    fn owner_references_of_others_are_kept() {
        let mut meta = ObjectMeta {
            owner_references: Some(vec![reference("uid-other", "other")]),
            ..Default::default()
        };
        assert!(set_owner_reference(&mut meta, reference("uid-1", "app")));
        assert_eq!(meta.owner_references.unwrap().len(), 2);
    }

    #[test]
    fn finalizers() {
        let mut finalizers = vec!["other".to_string()];
        assert!(add_finalizer(&mut finalizers, "mine"));
        assert!(!add_finalizer(&mut finalizers, "mine"));
        assert_eq!(finalizers, vec!["other", "mine"]);
        assert!(remove_finalizer(&mut finalizers, "mine"));
        assert!(!remove_finalizer(&mut finalizers, "mine"));
        assert_eq!(finalizers, vec!["other"]);
    }
}
