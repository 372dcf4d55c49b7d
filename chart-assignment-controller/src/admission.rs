//! Validation of ChartAssignments before they are persisted.

use chart_assignment_apis::ChartAssignment;
use kube::core::{
    DynamicObject,
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
};

const DNS1123_LABEL_MAX_LENGTH: usize = 63;
const DNS1123_SUBDOMAIN_MAX_LENGTH: usize = 253;

const DNS1123_LABEL_ERROR: &'static str = "a lowercase RFC 1123 label must consist of lower case alphanumeric characters or '-', and must start and end with an alphanumeric character (e.g. 'my-name',  or '123-abc', regex used for validation is '[a-z0-9]([-a-z0-9]*[a-z0-9])?')";
const DNS1123_SUBDOMAIN_ERROR: &'static str = "a lowercase RFC 1123 subdomain must consist of lower case alphanumeric characters, '-' or '.', and must start and end with an alphanumeric character (e.g. 'example.com', regex used for validation is '[a-z0-9]([-a-z0-9]*[a-z0-9])?(\\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*')";

#[derive(thiserror::Error, Debug, PartialEq)]
pub(crate) enum ValidationError {
    #[error("cluster name missing")]
    ClusterNameMissing,
    #[error("invalid cluster name {actual:?}, expected {expected:?}")]
    UnexpectedClusterName { actual: String, expected: String },
    #[error("namespace name missing")]
    NamespaceNameMissing,
    #[error("invalid namespace name {name:?}: {}", .errors.join(", "))]
    InvalidNamespaceName { name: String, errors: Vec<String> },
    #[error("invalid cluster name {name:?}: {}", .errors.join(", "))]
    InvalidClusterName { name: String, errors: Vec<String> },
    #[error("target namespace name must not be changed")]
    NamespaceNameChanged,
    #[error("target cluster name must not be changed")]
    ClusterNameChanged,
    #[error("chart repository, name, and version must be empty for inline charts")]
    InlineChartWithReference,
    #[error("non-inline chart must be fully specified")]
    IncompleteChart,
}

fn is_dns1123_label(value: &str) -> bool {
    let bytes = value.as_bytes();
    let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            alnum(first) && alnum(last) && bytes.iter().all(|b| alnum(b) || *b == b'-')
        }
        _ => false,
    }
}

/// Checks whether the value is a DNS-1123 label (e.g. a namespace name).
pub(crate) fn validate_dns1123_label(value: &str) -> Vec<String> {
    let mut errors = vec![];
    if value.len() > DNS1123_LABEL_MAX_LENGTH {
        errors.push(format!(
            "must be no more than {} characters",
            DNS1123_LABEL_MAX_LENGTH
        ));
    }
    if !is_dns1123_label(value) {
        errors.push(DNS1123_LABEL_ERROR.to_string());
    }
    errors
}

/// Checks whether the value is a DNS-1123 subdomain (e.g. a cluster name).
pub(crate) fn validate_dns1123_subdomain(value: &str) -> Vec<String> {
    let mut errors = vec![];
    if value.len() > DNS1123_SUBDOMAIN_MAX_LENGTH {
        errors.push(format!(
            "must be no more than {} characters",
            DNS1123_SUBDOMAIN_MAX_LENGTH
        ));
    }
    if !value.split('.').all(is_dns1123_label) {
        errors.push(DNS1123_SUBDOMAIN_ERROR.to_string());
    }
    errors
}

/// Stateless validator for ChartAssignments, optionally bound to the cluster
/// it serves.
#[derive(Clone, Debug, Default)]
pub(crate) struct AssignmentValidator {
    cluster_name: Option<String>,
}

impl AssignmentValidator {
    pub fn new(cluster_name: Option<String>) -> Self {
        Self { cluster_name }
    }

    /// Validates `current`, and on updates the transition from `old`.
    /// Rules are checked in order and the first violation is returned.
    pub fn validate(
        &self,
        current: &ChartAssignment,
        old: Option<&ChartAssignment>,
    ) -> Result<(), ValidationError> {
        let spec = &current.spec;
        if spec.cluster_name.is_empty() {
            return Err(ValidationError::ClusterNameMissing);
        }
        if let Some(expected) = &self.cluster_name {
            if &spec.cluster_name != expected {
                return Err(ValidationError::UnexpectedClusterName {
                    actual: spec.cluster_name.clone(),
                    expected: expected.clone(),
                });
            }
        }
        if spec.namespace_name.is_empty() {
            return Err(ValidationError::NamespaceNameMissing);
        }
        let errors = validate_dns1123_label(&spec.namespace_name);
        if !errors.is_empty() {
            return Err(ValidationError::InvalidNamespaceName {
                name: spec.namespace_name.clone(),
                errors,
            });
        }
        let errors = validate_dns1123_subdomain(&spec.cluster_name);
        if !errors.is_empty() {
            return Err(ValidationError::InvalidClusterName {
                name: spec.cluster_name.clone(),
                errors,
            });
        }
        if let Some(old) = old {
            if spec.namespace_name != old.spec.namespace_name {
                return Err(ValidationError::NamespaceNameChanged);
            }
            if spec.cluster_name != old.spec.cluster_name {
                return Err(ValidationError::ClusterNameChanged);
            }
        }
        let chart = &spec.chart;
        if chart.is_inline() {
            if chart.has_reference_fields() {
                return Err(ValidationError::InlineChartWithReference);
            }
        } else if !chart.is_fully_referenced() {
            return Err(ValidationError::IncompleteChart);
        }
        Ok(())
    }

    /// Handles an AdmissionReview, denying invalid ChartAssignments with the
    /// reason of the first violated rule.
    pub fn review(&self, review: AdmissionReview<ChartAssignment>) -> AdmissionReview<DynamicObject> {
        let request: AdmissionRequest<ChartAssignment> = match review.try_into() {
            Ok(request) => request,
            Err(e) => {
                warn!("invalid admission review: {}", e);
                return AdmissionResponse::invalid(e.to_string()).into_review();
            }
        };
        let response = AdmissionResponse::from(&request);
        let response = match &request.object {
            // Nothing to validate on deletion.
            None => response,
            Some(current) => match self.validate(current, request.old_object.as_ref()) {
                Ok(()) => response,
                Err(e) => {
                    info!(
                        "denied {:?} of ChartAssignment {}: {}",
                        request.operation, request.name, e
                    );
                    response.deny(e.to_string())
                }
            },
        };
        response.into_review()
    }
}
