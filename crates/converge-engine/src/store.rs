//! Object-store port
//!
//! Controllers talk to the platform's object store only through
//! [`ObjectStore`]. [`KubeStore`] is the production implementation on top of
//! `kube::Api`; writes that carry a resource version fail with
//! [`StoreError::Conflict`] when the object changed underneath.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use converge_common::kube_utils::selector_string;

use crate::error::StoreError;

/// Equality label selector (`key=value` for every entry)
pub type LabelSelector = BTreeMap<String, String>;

/// Bounds every stored kind satisfies
pub trait StoreObject:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Kind name of a stored type, for errors and logs
pub fn kind_of<K: StoreObject>() -> String {
    K::kind(&()).to_string()
}

/// Namespaced CRUD over one kind
#[async_trait]
pub trait ObjectStore<K: StoreObject>: Send + Sync {
    /// Fetch an object; `None` when it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError>;

    /// List objects in a namespace whose labels match the selector
    async fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<K>, StoreError>;

    /// Create an object; fails with `AlreadyExists` if the name is taken
    async fn create(&self, obj: &K) -> Result<K, StoreError>;

    /// Replace an object's spec and metadata; fails with `Conflict` when its
    /// resource version is stale
    async fn replace(&self, obj: &K) -> Result<K, StoreError>;

    /// Merge-patch the status subresource
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Set the finalizer list, guarded by the object's resource version
    async fn set_finalizers(&self, obj: &K, finalizers: &[String]) -> Result<(), StoreError>;

    /// Delete an object with background propagation
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

/// [`ObjectStore`] backed by the Kubernetes API
pub struct KubeStore<K> {
    client: Client,
    field_manager: &'static str,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    /// Create a store writing as `field_manager`
    pub fn new(client: Client, field_manager: &'static str) -> Self {
        Self {
            client,
            field_manager,
            _kind: PhantomData,
        }
    }
}

impl<K> KubeStore<K>
where
    K: StoreObject + Resource<Scope = NamespaceResourceScope>,
{
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn error(name: &str, e: kube::Error) -> StoreError {
        StoreError::from_kube(&kind_of::<K>(), name, e)
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: StoreObject + Resource<Scope = NamespaceResourceScope>,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        self.api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| Self::error(name, e))
    }

    async fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<K>, StoreError> {
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(&selector_string(selector));
        }
        self.api(namespace)
            .list(&params)
            .await
            .map(|list| list.items)
            .map_err(|e| Self::error("<list>", e))
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let name = obj.name_any();
        let namespace = obj.namespace().unwrap_or_default();
        self.api(&namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| Self::error(&name, e))
    }

    async fn replace(&self, obj: &K) -> Result<K, StoreError> {
        let name = obj.name_any();
        let namespace = obj.namespace().unwrap_or_default();
        self.api(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| Self::error(&name, e))
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let patch = serde_json::json!({ "status": status });
        self.api(namespace)
            .patch_status(name, &PatchParams::apply(self.field_manager), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| Self::error(name, e))
    }

    async fn set_finalizers(&self, obj: &K, finalizers: &[String]) -> Result<(), StoreError> {
        let name = obj.name_any();
        let namespace = obj.namespace().unwrap_or_default();
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": obj.resource_version(),
            }
        });
        self.api(&namespace)
            .patch(&name, &PatchParams::apply(self.field_manager), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| Self::error(&name, e))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.api(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| Self::error(name, e))
    }
}

/// Delete an object, treating "already gone" as success
pub async fn delete_if_present<K: StoreObject>(
    store: &dyn ObjectStore<K>,
    namespace: &str,
    name: &str,
) -> Result<bool, StoreError> {
    match store.delete(namespace, name).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}
