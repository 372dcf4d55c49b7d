//! In-memory cluster and object builders for unit tests.

use async_trait::async_trait;
use chart_assignment_apis::{AssignedChart, ChartAssignment, ChartAssignmentSpec};
use k8s_openapi::{
    api::core::v1::{Namespace, Pod, PodStatus, Secret, ServiceAccount},
    apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time},
    chrono::{Duration, Utc},
};
use kube::ResourceExt;
use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use crate::{
    cluster_api::ClusterApi,
    errors::{ControllerError, api_error},
    provisioner::PullSecret,
};

type Key = (String, String);

#[derive(Default)]
struct State {
    assignments: BTreeMap<String, ChartAssignment>,
    namespaces: BTreeMap<String, Namespace>,
    secrets: BTreeMap<Key, Secret>,
    service_accounts: BTreeMap<Key, ServiceAccount>,
    pods: Vec<Pod>,
    writes: usize,
    resource_version: u64,
    status_conflict: bool,
    status_gone: bool,
    pods_not_found: bool,
}

impl State {
    fn next_resource_version(&mut self) -> Option<String> {
        self.writes += 1;
        self.resource_version += 1;
        Some(format!("{}", 100 + self.resource_version))
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// [`ClusterApi`] keeping objects in memory and counting writes. Status
/// replacements check the resource version like the API server does.
#[derive(Default)]
pub(crate) struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn writes(&self) -> usize {
        self.state().writes
    }

    /// Lets every following status replacement fail with a conflict.
    pub fn fail_status_with_conflict(&self) {
        self.state().status_conflict = true;
    }

    /// Lets the assignment vanish right before its next status replacement.
    pub fn delete_assignment_before_status(&self) {
        self.state().status_gone = true;
    }

    /// Lets every following pod listing fail with a 404.
    pub fn fail_pod_list_with_not_found(&self) {
        self.state().pods_not_found = true;
    }

    pub fn put_assignment(&self, assignment: ChartAssignment) {
        self.state()
            .assignments
            .insert(assignment.name_any(), assignment);
    }

    pub fn put_namespace(&self, namespace: Namespace) {
        self.state()
            .namespaces
            .insert(namespace.name_any(), namespace);
    }

    pub fn put_secret(&self, secret: Secret) {
        let k = key(&secret.namespace().unwrap_or_default(), &secret.name_any());
        self.state().secrets.insert(k, secret);
    }

    pub fn put_service_account(&self, sa: ServiceAccount) {
        let k = key(&sa.namespace().unwrap_or_default(), &sa.name_any());
        self.state().service_accounts.insert(k, sa);
    }

    pub fn put_pod(&self, pod: Pod) {
        self.state().pods.push(pod);
    }

    pub fn assignment(&self, name: &str) -> Option<ChartAssignment> {
        self.state().assignments.get(name).cloned()
    }

    pub fn namespace(&self, name: &str) -> Option<Namespace> {
        self.state().namespaces.get(name).cloned()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state().secrets.get(&key(namespace, name)).cloned()
    }

    pub fn service_account(&self, namespace: &str, name: &str) -> Option<ServiceAccount> {
        self.state()
            .service_accounts
            .get(&key(namespace, name))
            .cloned()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_assignment(
        &self,
        name: &str,
    ) -> Result<Option<ChartAssignment>, ControllerError> {
        Ok(self.assignment(name))
    }

    async fn patch_assignment(
        &self,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<ChartAssignment, ControllerError> {
        let mut state = self.state();
        let stored = state
            .assignments
            .get(name)
            .cloned()
            .ok_or_else(|| ControllerError::AssignmentGone(name.to_string()))?;
        let mut value = serde_json::to_value(&stored)?;
        json_patch::patch(&mut value, &patch.0).map_err(anyhow::Error::new)?;
        let mut patched: ChartAssignment = serde_json::from_value(value)?;
        patched.metadata.resource_version = state.next_resource_version();
        if patched.metadata.deletion_timestamp.is_some() && patched.finalizers().is_empty() {
            state.assignments.remove(name);
        } else {
            state.assignments.insert(name.to_string(), patched.clone());
        }
        Ok(patched)
    }

    async fn replace_assignment_status(
        &self,
        assignment: &ChartAssignment,
    ) -> Result<ChartAssignment, ControllerError> {
        let mut state = self.state();
        let name = assignment.name_any();
        if state.status_gone {
            state.assignments.remove(&name);
        }
        let mut stored = state
            .assignments
            .get(&name)
            .cloned()
            .ok_or_else(|| ControllerError::AssignmentGone(name.clone()))?;
        if state.status_conflict || stored.resource_version() != assignment.resource_version() {
            return Err(api_error(409, "Conflict"));
        }
        stored.status = assignment.status.clone();
        stored.metadata.resource_version = state.next_resource_version();
        state.assignments.insert(name, stored.clone());
        Ok(stored)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, ControllerError> {
        Ok(self.namespace(name))
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, ControllerError> {
        let mut state = self.state();
        let name = namespace.name_any();
        if state.namespaces.contains_key(&name) {
            return Err(api_error(409, "AlreadyExists"));
        }
        let mut created = namespace.clone();
        created.metadata.resource_version = state.next_resource_version();
        created.metadata.creation_timestamp = Some(Time(Utc::now()));
        state.namespaces.insert(name, created.clone());
        Ok(created)
    }

    async fn replace_namespace(
        &self,
        namespace: &Namespace,
    ) -> Result<Namespace, ControllerError> {
        let mut state = self.state();
        let name = namespace.name_any();
        if !state.namespaces.contains_key(&name) {
            return Err(api_error(404, "NotFound"));
        }
        let mut replaced = namespace.clone();
        replaced.metadata.resource_version = state.next_resource_version();
        state.namespaces.insert(name, replaced.clone());
        Ok(replaced)
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, ControllerError> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ControllerError> {
        let mut state = self.state();
        let k = key(&secret.namespace().unwrap_or_default(), &secret.name_any());
        if state.secrets.contains_key(&k) {
            return Err(api_error(409, "AlreadyExists"));
        }
        let mut created = secret.clone();
        created.metadata.resource_version = state.next_resource_version();
        state.secrets.insert(k, created.clone());
        Ok(created)
    }

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, ControllerError> {
        Ok(self.service_account(namespace, name))
    }

    async fn replace_service_account(
        &self,
        service_account: &ServiceAccount,
    ) -> Result<ServiceAccount, ControllerError> {
        let mut state = self.state();
        let k = key(
            &service_account.namespace().unwrap_or_default(),
            &service_account.name_any(),
        );
        if !state.service_accounts.contains_key(&k) {
            return Err(api_error(404, "NotFound"));
        }
        let mut replaced = service_account.clone();
        replaced.metadata.resource_version = state.next_resource_version();
        state.service_accounts.insert(k, replaced.clone());
        Ok(replaced)
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ControllerError> {
        let state = self.state();
        if state.pods_not_found {
            return Err(api_error(404, "NotFound"));
        }
        Ok(state
            .pods
            .iter()
            .filter(|p| p.namespace().as_deref() == Some(namespace))
            .cloned()
            .collect())
    }
}

/// A ChartAssignment referencing a chart from a repository.
pub(crate) fn assignment(name: &str, cluster: &str, namespace: &str) -> ChartAssignment {
    let mut a = ChartAssignment::new(
        name,
        ChartAssignmentSpec {
            cluster_name: cluster.to_string(),
            namespace_name: namespace.to_string(),
            chart: AssignedChart {
                repository: "https://charts.example.com".to_string(),
                name: "nginx".to_string(),
                version: "1.0.0".to_string(),
                ..Default::default()
            },
        },
    );
    a.metadata.uid = Some(format!("uid-{}", name));
    a.metadata.generation = Some(1);
    a.metadata.resource_version = Some("1".to_string());
    a
}

/// A namespace created `age` ago, optionally marked for deletion
/// `deleting_for` ago.
pub(crate) fn namespace(name: &str, age: Duration, deleting_for: Option<Duration>) -> Namespace {
    let now = Utc::now();
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            creation_timestamp: Some(Time(now - age)),
            deletion_timestamp: deleting_for.map(|d| Time(now - d)),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub(crate) fn pull_secret() -> PullSecret {
    PullSecret {
        name: "gcr-json-key".to_string(),
        source_namespace: "default".to_string(),
    }
}

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        resource_version: Some("1".to_string()),
        ..Default::default()
    }
}

pub(crate) fn secret(namespace: &str, name: &str) -> Secret {
    Secret {
        metadata: meta(namespace, name),
        ..Default::default()
    }
}

pub(crate) fn service_account(namespace: &str, name: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: meta(namespace, name),
        ..Default::default()
    }
}

pub(crate) fn pod(namespace: &str, name: &str, phase: &str) -> Pod {
    Pod {
        metadata: meta(namespace, name),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}
