use k8s_openapi::chrono::{DateTime, SecondsFormat, Utc};
use kube::CustomResource;

use schemars::{
    JsonSchema,
    schema::{InstanceType, Schema, SchemaObject},
};
use serde::{Deserialize, Serialize};

pub const API_GROUP: &'static str = "apps.cloudrobotics.com";

/// Lifecycle phase of a [`ChartAssignment`], mirrored from the release it drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ChartAssignmentPhase {
    /// The release has been requested but has not been applied yet.
    Pending,
    /// The desired chart has been fully applied, no changes are pending.
    Settled,
    /// Settled and all pods in the target namespace are running or succeeded.
    Ready,
    /// The release engine reported an error.
    Failed,
    /// All resources of the release have been removed.
    Deleted,
}

impl std::fmt::Display for ChartAssignmentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ChartAssignmentConditionType {
    Settled,
    Ready,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(v: bool) -> Self {
        if v { Self::True } else { Self::False }
    }
}

/// We maintain our own Condition type as the one from k8s_openapi has no lastUpdateTime.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ChartAssignmentCondition {
    /// type of condition.
    #[serde(rename = "type")]
    pub type_: ChartAssignmentConditionType,

    /// status of the condition, one of True, False, Unknown.
    pub status: ConditionStatus,

    /// message is a human readable message with details about the current state. This may be an empty string.
    #[serde(default)]
    pub message: String,

    /// lastUpdateTime is the last time status or message of the condition changed.
    #[serde(rename = "lastUpdateTime", skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,

    /// lastTransitionTime is the last time the condition transitioned from one status to another.
    #[serde(rename = "lastTransitionTime", skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Assignment of a Helm chart to a namespace on a specific cluster.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "apps.cloudrobotics.com",
    version = "v1alpha1",
    kind = "ChartAssignment",
    derive = "PartialEq",
    status = "ChartAssignmentStatus",
    printcolumn = r#"{
        "name":"Cluster",
        "type": "string",
        "jsonPath": ".spec.clusterName"
    }"#,
    printcolumn = r#"{
        "name":"Namespace",
        "type": "string",
        "jsonPath": ".spec.namespaceName"
    }"#,
    printcolumn = r#"{
        "name":"Phase",
        "type": "string",
        "jsonPath": ".status.phase",
        "description": "Phase of the release, Ready if settled and all pods are running or succeeded."
    }"#
)]
#[serde(rename_all = "camelCase")]
pub struct ChartAssignmentSpec {
    /// The cluster to deploy the chart to, immutable.
    pub cluster_name: String,
    /// The namespace the chart is installed into, immutable. The namespace is
    /// created if it does not exist and is owned by the ChartAssignment.
    pub namespace_name: String,
    /// The chart to install.
    pub chart: AssignedChart,
}

/// Either an inline chart payload or a `{repository, name, version}` reference
/// to a chart in a remote repository.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
pub struct AssignedChart {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repository: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Base64 encoded chart archive.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub inline: String,
    /// Values passed to the chart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub values: Option<serde_json::Value>,
}

fn preserve_unknown_fields(_: &mut schemars::r#gen::SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}

impl AssignedChart {
    pub fn is_inline(&self) -> bool {
        !self.inline.is_empty()
    }

    pub fn has_reference_fields(&self) -> bool {
        !self.repository.is_empty() || !self.name.is_empty() || !self.version.is_empty()
    }

    pub fn is_fully_referenced(&self) -> bool {
        !self.repository.is_empty() && !self.name.is_empty() && !self.version.is_empty()
    }
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartAssignmentStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<ChartAssignmentPhase>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ChartAssignmentCondition>,
}

impl ChartAssignmentStatus {
    /// Adds or updates the condition of the given type. `lastUpdateTime` is
    /// bumped if status or message change, `lastTransitionTime` only if the
    /// status changes.
    pub fn set_condition(
        &mut self,
        tpe: ChartAssignmentConditionType,
        status: ConditionStatus,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        let message = message.into();
        let now = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == tpe) {
            if existing.status != status || existing.message != message {
                existing.last_update_time = Some(now.clone());
            }
            if existing.status != status {
                existing.last_transition_time = Some(now);
            }
            existing.status = status;
            existing.message = message;
        } else {
            self.conditions.push(ChartAssignmentCondition {
                type_: tpe,
                status,
                message,
                last_update_time: Some(now.clone()),
                last_transition_time: Some(now),
            });
        }
    }

    pub fn condition(&self, tpe: ChartAssignmentConditionType) -> Option<&ChartAssignmentCondition> {
        self.conditions.iter().find(|c| c.type_ == tpe)
    }

    /// Whether the condition of the given type is present with status True.
    pub fn in_condition(&self, tpe: ChartAssignmentConditionType) -> bool {
        self.condition(tpe)
            .map_or(false, |c| c.status == ConditionStatus::True)
    }
}

impl ChartAssignment {
    pub fn is_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn phase(&self) -> Option<ChartAssignmentPhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }
}
