//! In-memory [`ObjectStore`] for tests
//!
//! Behaves like the API server where the controllers can tell the difference:
//! resource versions bump on every write, stale writes conflict, deleting an
//! object with finalizers only marks it, and removing the last finalizer of a
//! marked object removes it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::store::{kind_of, LabelSelector, ObjectStore, StoreObject};

type Key = (String, String);

/// Thread-safe in-memory object store
pub struct MemoryStore<K> {
    objects: Mutex<BTreeMap<Key, K>>,
    resource_version: AtomicU64,
    failing_deletes: Mutex<BTreeSet<String>>,
    vanishing: Mutex<BTreeSet<String>>,
    deleted: Mutex<Vec<String>>,
}

impl<K: StoreObject> Default for MemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: StoreObject> MemoryStore<K> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            resource_version: AtomicU64::new(1),
            failing_deletes: Mutex::new(BTreeSet::new()),
            vanishing: Mutex::new(BTreeSet::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    /// Seed an object as if it had been created by a user
    ///
    /// Keeps any creation timestamp already set on `obj`.
    pub fn insert(&self, mut obj: K) -> K {
        self.stamp_new(&mut obj);
        self.objects.lock().insert(key_of(&obj), obj.clone());
        obj
    }

    /// Current copy of an object
    pub fn snapshot(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Every object, ordered by namespace and name
    pub fn all(&self) -> Vec<K> {
        self.objects.lock().values().cloned().collect()
    }

    /// Names of objects removed through `delete`, in order
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    /// Make every later delete of `name` fail with a server error
    pub fn fail_deletes_of(&self, name: &str) {
        self.failing_deletes.lock().insert(name.to_string());
    }

    /// Let another writer remove `name` just before the next delete of it
    ///
    /// The object stays visible to reads until then, and that delete
    /// reports not found.
    pub fn vanish_on_delete(&self, name: &str) {
        self.vanishing.lock().insert(name.to_string());
    }

    /// Overwrite an object without any checks (simulates another writer)
    pub fn put(&self, mut obj: K) {
        obj.meta_mut().resource_version = Some(self.bump());
        self.objects.lock().insert(key_of(&obj), obj);
    }

    fn bump(&self) -> String {
        self.resource_version
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
    }

    fn stamp_new(&self, obj: &mut K) {
        let rv = self.bump();
        let meta = obj.meta_mut();
        meta.resource_version = Some(rv);
        if meta.uid.is_none() {
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = Some(Time(Utc::now()));
        }
        if meta.namespace.is_none() {
            meta.namespace = Some("default".to_string());
        }
    }

    fn not_found(name: &str) -> StoreError {
        StoreError::NotFound {
            kind: kind_of::<K>(),
            name: name.to_string(),
        }
    }

    fn conflict(name: &str) -> StoreError {
        StoreError::Conflict {
            kind: kind_of::<K>(),
            name: name.to_string(),
        }
    }
}

fn key_of<K: StoreObject>(obj: &K) -> Key {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

fn matches(labels: &BTreeMap<String, String>, selector: &LabelSelector) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

/// RFC 7386 JSON merge patch
fn merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match patch {
        serde_json::Value::Object(entries) => {
            if !target.is_object() {
                *target = serde_json::Value::Object(Default::default());
            }
            if let serde_json::Value::Object(map) = target {
                for (k, v) in entries {
                    if v.is_null() {
                        map.remove(k);
                    } else {
                        merge_patch(map.entry(k.clone()).or_insert(serde_json::Value::Null), v);
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

fn to_value<K: StoreObject>(obj: &K) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(obj).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn from_value<K: StoreObject>(value: serde_json::Value) -> Result<K, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait]
impl<K: StoreObject> ObjectStore<K> for MemoryStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        Ok(self.snapshot(namespace, name))
    }

    async fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<K>, StoreError> {
        Ok(self
            .objects
            .lock()
            .iter()
            .filter(|((ns, _), obj)| ns == namespace && matches(obj.labels(), selector))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let mut obj = obj.clone();
        let key = key_of(&obj);
        let mut objects = self.objects.lock();
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: kind_of::<K>(),
                name: key.1,
            });
        }
        obj.meta_mut().uid = None;
        self.stamp_new(&mut obj);
        objects.insert(key_of(&obj), obj.clone());
        Ok(obj)
    }

    async fn replace(&self, obj: &K) -> Result<K, StoreError> {
        let key = key_of(obj);
        let mut objects = self.objects.lock();
        let stored = objects.get(&key).ok_or_else(|| Self::not_found(&key.1))?;
        if obj.resource_version().is_some() && obj.resource_version() != stored.resource_version()
        {
            return Err(Self::conflict(&key.1));
        }

        // Status and server-owned metadata are not writable through replace
        let mut value = to_value(obj)?;
        let stored_value = to_value(stored)?;
        match stored_value.get("status") {
            Some(status) => value["status"] = status.clone(),
            None => {
                if let Some(map) = value.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        let mut replaced: K = from_value(value)?;
        let meta = replaced.meta_mut();
        meta.uid = stored.meta().uid.clone();
        meta.creation_timestamp = stored.meta().creation_timestamp.clone();
        meta.deletion_timestamp = stored.meta().deletion_timestamp.clone();
        meta.resource_version = Some(self.bump());
        objects.insert(key, replaced.clone());
        Ok(replaced)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let key = (namespace.to_string(), name.to_string());
        let mut objects = self.objects.lock();
        let stored = objects.get(&key).ok_or_else(|| Self::not_found(name))?;
        let mut value = to_value(stored)?;
        merge_patch(&mut value, &serde_json::json!({ "status": status }));
        let mut patched: K = from_value(value)?;
        patched.meta_mut().resource_version = Some(self.bump());
        objects.insert(key, patched);
        Ok(())
    }

    async fn set_finalizers(&self, obj: &K, finalizers: &[String]) -> Result<(), StoreError> {
        let key = key_of(obj);
        let mut objects = self.objects.lock();
        let stored = objects.get(&key).ok_or_else(|| Self::not_found(&key.1))?;
        if obj.resource_version() != stored.resource_version() {
            return Err(Self::conflict(&key.1));
        }
        let mut updated = stored.clone();
        if finalizers.is_empty() && updated.meta().deletion_timestamp.is_some() {
            objects.remove(&key);
            self.deleted.lock().push(key.1);
            return Ok(());
        }
        let meta = updated.meta_mut();
        meta.finalizers = if finalizers.is_empty() {
            None
        } else {
            Some(finalizers.to_vec())
        };
        meta.resource_version = Some(self.bump());
        objects.insert(key, updated);
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        if self.failing_deletes.lock().contains(name) {
            return Err(StoreError::Api {
                code: Some(500),
                message: format!("injected delete failure for {}", name),
            });
        }
        let key = (namespace.to_string(), name.to_string());
        let mut objects = self.objects.lock();
        if self.vanishing.lock().remove(name) {
            objects.remove(&key);
            return Err(Self::not_found(name));
        }
        let stored = objects.get_mut(&key).ok_or_else(|| Self::not_found(name))?;
        if stored.finalizers().is_empty() {
            objects.remove(&key);
            self.deleted.lock().push(name.to_string());
        } else if stored.meta().deletion_timestamp.is_none() {
            let rv = self.bump();
            let meta = stored.meta_mut();
            meta.deletion_timestamp = Some(Time(Utc::now()));
            meta.resource_version = Some(rv);
        }
        Ok(())
    }
}
