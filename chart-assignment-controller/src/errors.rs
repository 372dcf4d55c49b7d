/// Extension methods for Kubernetes API errors.
pub(crate) trait ExtKubeApiError {
    fn is_not_found(&self) -> bool;
    fn is_conflict(&self) -> bool;
}

impl ExtKubeApiError for kube::Error {
    fn is_not_found(&self) -> bool {
        match self {
            kube::Error::Api(e) if e.code == 404 || e.code == 410 => true,
            _ => false,
        }
    }

    fn is_conflict(&self) -> bool {
        match self {
            kube::Error::Api(e) if e.code == 409 => true,
            _ => false,
        }
    }
}

/// Classification the reconciler uses to pick its requeue policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    /// The object vanished, which is treated as completed cleanup.
    NotFound,
    /// A precondition which resolves itself through normal cluster activity.
    Transient,
    /// Optimistic concurrency conflict on write.
    Conflict,
    Fatal,
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum ControllerError {
    /// A namespace with the same name is still being deleted, which happens
    /// if a ChartAssignment is deleted and recreated shortly after. This may
    /// last minutes if the namespace contains resources that are slow to delete.
    #[error("namespace {name:?} was marked for deletion at {since}, skipping")]
    NamespaceDeletionInProgress { name: String, since: String },
    /// The service account controller has not yet created the default
    /// service account. Workloads must not start before it carries the image
    /// pull secret.
    #[error("ServiceAccount \"{namespace}:default\" not yet created")]
    ServiceAccountNotProvisioned { namespace: String },
    /// The default service account is still missing past the grace deadline.
    #[error("getting ServiceAccount \"{namespace}:default\" failed: not found")]
    ServiceAccountMissing { namespace: String },
    /// The ChartAssignment itself was deleted while it was reconciled.
    #[error("ChartAssignment {0} no longer exists")]
    AssignmentGone(String),
    #[error("release status of {0} not found")]
    ReleaseStatusNotFound(String),
    /// The object lacks metadata required by the controller.
    #[error("{0}")]
    InvalidObject(String),
    /// Kubernetes API error
    #[error("{0}")]
    KubeApi(#[from] kube::Error),
    /// Serialization errors
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
    /// Any other kind of errors
    #[error("{0}")]
    Any(#[from] anyhow::Error),
}

impl ControllerError {
    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            ControllerError::NamespaceDeletionInProgress { .. }
            | ControllerError::ServiceAccountNotProvisioned { .. } => ErrorKind::Transient,
            ControllerError::AssignmentGone(_) => ErrorKind::NotFound,
            ControllerError::KubeApi(e) if e.is_conflict() => ErrorKind::Conflict,
            _ => ErrorKind::Fatal,
        }
    }
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> ControllerError {
    ControllerError::KubeApi(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} (test)", reason),
        reason: reason.to_string(),
        code,
    }))
}
