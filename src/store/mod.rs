//! Generic typed object store
//!
//! One interface, parameterized by resource kind, replaces a hand-written
//! accessor per kind. `KubeStore` talks to the API server through `kube::Api`;
//! `MemoryStore` keeps objects in-process.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("conflict writing {kind} {namespace}/{name}: object was modified")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Failed to (de)serialize object: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Optimistic-lock failures: the caller must re-read before retrying
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Typed CRUD access to one resource kind
///
/// `namespace` is ignored for cluster-scoped kinds.
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Clone + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError>;

    /// List objects, optionally filtered by an equality label selector (`k=v,k2=v2`)
    async fn list(&self, namespace: &str, label_selector: Option<&str>)
        -> Result<Vec<K>, StoreError>;

    async fn create(&self, namespace: &str, obj: &K) -> Result<K, StoreError>;

    /// Full update; fails with `Conflict` when `resourceVersion` is stale
    async fn replace(&self, namespace: &str, obj: &K) -> Result<K, StoreError>;

    /// JSON merge-patch of the main resource
    async fn patch_merge(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, StoreError>;

    /// JSON merge-patch of the status subresource (`{"status": ...}`)
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, StoreError>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

/// Builds an `Api<K>` for the resource's scope
pub trait ApiScope {
    fn api<K>(client: Client, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = Self, DynamicType = ()>;
}

impl ApiScope for NamespaceResourceScope {
    fn api<K>(client: Client, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = Self, DynamicType = ()>,
    {
        Api::namespaced(client, namespace)
    }
}

impl ApiScope for ClusterResourceScope {
    fn api<K>(client: Client, _namespace: &str) -> Api<K>
    where
        K: Resource<Scope = Self, DynamicType = ()>,
    {
        Api::all(client)
    }
}

/// Object store backed by the Kubernetes API server
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = ()>,
    K::Scope: ApiScope,
{
    fn api(&self, namespace: &str) -> Api<K> {
        <K::Scope as ApiScope>::api(self.client.clone(), namespace)
    }
}

/// Translate API-server status codes into store errors
fn map_kube_error<K: Resource<DynamicType = ()>>(
    err: kube::Error,
    namespace: &str,
    name: &str,
) -> StoreError {
    let kind = K::kind(&()).to_string();
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            StoreError::AlreadyExists {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            }
        }
        kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        _ => StoreError::Kube(err),
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
    K::Scope: ApiScope,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        self.api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error::<K>(e, namespace, name))
    }

    async fn list(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, StoreError> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = self.api(namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn create(&self, namespace: &str, obj: &K) -> Result<K, StoreError> {
        let name = obj.name_any();
        self.api(namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| map_kube_error::<K>(e, namespace, &name))
    }

    async fn replace(&self, namespace: &str, obj: &K) -> Result<K, StoreError> {
        let name = obj.name_any();
        self.api(namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| map_kube_error::<K>(e, namespace, &name))
    }

    async fn patch_merge(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, StoreError> {
        self.api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| map_kube_error::<K>(e, namespace, name))
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, StoreError> {
        self.api(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| map_kube_error::<K>(e, namespace, name))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        match self
            .api(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(map_kube_error::<K>(e, namespace, name)),
        }
    }
}

/// Move a Release to a different strategy step without a read-modify-write
pub async fn set_target_step(
    releases: &dyn ObjectStore<crate::crd::Release>,
    namespace: &str,
    release: &str,
    step: i32,
) -> Result<crate::crd::Release, StoreError> {
    releases
        .patch_merge(
            namespace,
            release,
            &serde_json::json!({ "spec": { "targetStep": step } }),
        )
        .await
}
