use std::fmt::Debug;

use async_trait::async_trait;
use kube::{
    api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    client::Client,
    error::ErrorResponse,
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tracing::*;

/// Any typed object the reconciler reads or writes
pub trait ApiObject:
    Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Debug + Send + Sync + 'static
{
}

impl<K> ApiObject for K where
    K: Resource<DynamicType = ()>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static
{
}

/// The subset of the Kubernetes API the reconciler uses.
///
/// `namespace` is `None` for cluster scoped kinds. Objects passed to `create`, `update` and
/// `update_status` carry their own name and namespace. `update` and `update_status` send the
/// object's resourceVersion, so stale writes fail with a `409 Conflict`.
#[async_trait]
pub trait ClusterApi: Send + Sync + 'static {
    async fn get<K: ApiObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>, kube::Error>;

    /// `labels` is a label selector such as `app=x,tier=y`; empty selects everything
    async fn list<K: ApiObject>(
        &self,
        namespace: Option<&str>,
        labels: &str,
    ) -> Result<Vec<K>, kube::Error>;

    async fn create<K: ApiObject>(&self, obj: &K) -> Result<K, kube::Error>;

    async fn update<K: ApiObject>(&self, obj: &K) -> Result<K, kube::Error>;

    async fn update_status<K: ApiObject>(&self, obj: &K) -> Result<K, kube::Error>;

    /// Returns false when the object did not exist
    async fn delete<K: ApiObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, kube::Error>;
}

/// `ClusterApi` backed by a real API server
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        KubeClusterApi { client }
    }

    fn api<K: ApiObject>(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = ApiResource::erase::<K>(&());
        match namespace {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

fn to_dynamic<K: ApiObject>(obj: &K) -> Result<DynamicObject, kube::Error> {
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(kube::Error::SerdeError)
}

fn from_dynamic<K: ApiObject>(obj: DynamicObject) -> Result<K, kube::Error> {
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(kube::Error::SerdeError)
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get<K: ApiObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>, kube::Error> {
        match self.api::<K>(namespace).get_opt(name).await? {
            Some(obj) => Ok(Some(from_dynamic(obj)?)),
            None => Ok(None),
        }
    }

    async fn list<K: ApiObject>(
        &self,
        namespace: Option<&str>,
        labels: &str,
    ) -> Result<Vec<K>, kube::Error> {
        let mut params = ListParams::default();
        if !labels.is_empty() {
            params = params.labels(labels);
        }
        self.api::<K>(namespace)
            .list(&params)
            .await?
            .items
            .into_iter()
            .map(from_dynamic)
            .collect()
    }

    async fn create<K: ApiObject>(&self, obj: &K) -> Result<K, kube::Error> {
        debug!("Creating {} {}", K::kind(&()), obj.name_any());
        let created = self
            .api::<K>(obj.namespace().as_deref())
            .create(&PostParams::default(), &to_dynamic(obj)?)
            .await?;
        from_dynamic(created)
    }

    async fn update<K: ApiObject>(&self, obj: &K) -> Result<K, kube::Error> {
        debug!("Updating {} {}", K::kind(&()), obj.name_any());
        let updated = self
            .api::<K>(obj.namespace().as_deref())
            .replace(&obj.name_any(), &PostParams::default(), &to_dynamic(obj)?)
            .await?;
        from_dynamic(updated)
    }

    async fn update_status<K: ApiObject>(&self, obj: &K) -> Result<K, kube::Error> {
        debug!("Updating status of {} {}", K::kind(&()), obj.name_any());
        let value = serde_json::to_value(obj).map_err(kube::Error::SerdeError)?;
        // resourceVersion in the body turns the merge patch into a guarded write
        let patch = Patch::Merge(json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": value.get("status").cloned().unwrap_or_default(),
        }));
        let updated = self
            .api::<K>(obj.namespace().as_deref())
            .patch_status(&obj.name_any(), &PatchParams::default(), &patch)
            .await?;
        from_dynamic(updated)
    }

    async fn delete<K: ApiObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, kube::Error> {
        debug!("Deleting {} {}", K::kind(&()), name);
        match self
            .api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
