use async_trait::async_trait;
use chart_assignment_apis::ChartAssignment;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, ServiceAccount};
use kube::{
    Api, Client, ResourceExt,
    api::{ListParams, Patch, PatchParams, PostParams},
};
use serde::de::DeserializeOwned;

use crate::{
    MANAGER,
    errors::{ControllerError, ExtKubeApiError},
};

/// The subset of the Kubernetes API the ChartAssignment controller reads and
/// writes. Lookups return `None` for objects which do not exist, writes report
/// conflicts through [`ControllerError::kind`]. Writes to a ChartAssignment
/// which no longer exists fail with [`ControllerError::AssignmentGone`].
#[async_trait]
pub(crate) trait ClusterApi: Send + Sync {
    async fn get_assignment(&self, name: &str)
    -> Result<Option<ChartAssignment>, ControllerError>;

    async fn patch_assignment(
        &self,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<ChartAssignment, ControllerError>;

    async fn replace_assignment_status(
        &self,
        assignment: &ChartAssignment,
    ) -> Result<ChartAssignment, ControllerError>;

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, ControllerError>;

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, ControllerError>;

    async fn replace_namespace(&self, namespace: &Namespace)
    -> Result<Namespace, ControllerError>;

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, ControllerError>;

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ControllerError>;

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, ControllerError>;

    async fn replace_service_account(
        &self,
        service_account: &ServiceAccount,
    ) -> Result<ServiceAccount, ControllerError>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ControllerError>;
}

/// [`ClusterApi`] backed by the Kubernetes API server.
pub(crate) struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn post_params() -> PostParams {
        let mut pp = PostParams::default();
        pp.field_manager = Some(MANAGER.to_string());
        pp
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn get_opt<K>(api: Api<K>, name: &str) -> Result<Option<K>, ControllerError>
where
    K: Clone + DeserializeOwned + std::fmt::Debug,
{
    match api.get(name).await {
        Ok(o) => Ok(Some(o)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e)?,
    }
}

/// Writes to a ChartAssignment report its disappearance as
/// [`ControllerError::AssignmentGone`], unlike lookups of dependent objects.
fn assignment_write<T>(name: &str, result: Result<T, kube::Error>) -> Result<T, ControllerError> {
    match result {
        Ok(o) => Ok(o),
        Err(e) if e.is_not_found() => Err(ControllerError::AssignmentGone(name.to_string())),
        Err(e) => Err(e)?,
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_assignment(
        &self,
        name: &str,
    ) -> Result<Option<ChartAssignment>, ControllerError> {
        get_opt(Api::<ChartAssignment>::all(self.client.clone()), name).await
    }

    async fn patch_assignment(
        &self,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<ChartAssignment, ControllerError> {
        let api = Api::<ChartAssignment>::all(self.client.clone());
        let pp = PatchParams {
            field_manager: Some(MANAGER.to_string()),
            ..Default::default()
        };
        assignment_write(name, api.patch(name, &pp, &Patch::<()>::Json(patch)).await)
    }

    async fn replace_assignment_status(
        &self,
        assignment: &ChartAssignment,
    ) -> Result<ChartAssignment, ControllerError> {
        let api = Api::<ChartAssignment>::all(self.client.clone());
        let name = assignment.name_any();
        let result = api
            .replace_status(
                name.as_str(),
                &Self::post_params(),
                serde_json::to_vec(assignment)?,
            )
            .await;
        assignment_write(name.as_str(), result)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, ControllerError> {
        get_opt(Api::<Namespace>::all(self.client.clone()), name).await
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, ControllerError> {
        let api = Api::<Namespace>::all(self.client.clone());
        Ok(api.create(&Self::post_params(), namespace).await?)
    }

    async fn replace_namespace(
        &self,
        namespace: &Namespace,
    ) -> Result<Namespace, ControllerError> {
        let api = Api::<Namespace>::all(self.client.clone());
        let name = namespace.name_any();
        Ok(api
            .replace(name.as_str(), &Self::post_params(), namespace)
            .await?)
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, ControllerError> {
        get_opt(self.namespaced::<Secret>(namespace), name).await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ControllerError> {
        let namespace = secret.namespace().unwrap_or_default();
        let api = self.namespaced::<Secret>(namespace.as_str());
        Ok(api.create(&Self::post_params(), secret).await?)
    }

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, ControllerError> {
        get_opt(self.namespaced::<ServiceAccount>(namespace), name).await
    }

    async fn replace_service_account(
        &self,
        service_account: &ServiceAccount,
    ) -> Result<ServiceAccount, ControllerError> {
        let namespace = service_account.namespace().unwrap_or_default();
        let name = service_account.name_any();
        let api = self.namespaced::<ServiceAccount>(namespace.as_str());
        Ok(api
            .replace(name.as_str(), &Self::post_params(), service_account)
            .await?)
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ControllerError> {
        let api = self.namespaced::<Pod>(namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }
}
