//! In-process object store
//!
//! Mirrors the API-server behaviour the coordinator relies on: optimistic
//! locking on `resourceVersion`, JSON merge-patch, and a status subresource
//! that main-resource writes cannot touch.

use super::{ObjectStore, StoreError};
use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

type Key = (String, String);

pub struct MemoryStore<K> {
    objects: Mutex<BTreeMap<Key, K>>,
    version: AtomicU64,
    writes: AtomicU64,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            version: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }
}

impl<K> MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes (create, replace, patch, delete)
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Snapshot of a stored object without going through the async interface
    pub fn peek(&self, namespace: &str, name: &str) -> Option<K> {
        self.lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<Key, K>> {
        // A panicking writer cannot leave a half-written object behind: every
        // write inserts a fully built value.
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn kind() -> String {
        K::kind(&()).to_string()
    }

    fn not_found(namespace: &str, name: &str) -> StoreError {
        StoreError::NotFound {
            kind: Self::kind(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    fn apply_patch(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
        status_only: bool,
    ) -> Result<K, StoreError> {
        let mut objects = self.lock();
        let key = (namespace.to_string(), name.to_string());
        let current = objects
            .get(&key)
            .ok_or_else(|| Self::not_found(namespace, name))?;

        let mut value = serde_json::to_value(current)?;
        if status_only {
            if let Some(status) = patch.get("status") {
                let target = value
                    .as_object_mut()
                    .map(|o| o.entry("status").or_insert(serde_json::Value::Null));
                if let Some(target) = target {
                    merge_patch(target, status);
                }
            }
        } else {
            let mut patch = patch.clone();
            if let Some(obj) = patch.as_object_mut() {
                obj.remove("status");
            }
            merge_patch(&mut value, &patch);
        }

        let mut updated: K = serde_json::from_value(value)?;
        updated.meta_mut().resource_version = Some(self.next_version());
        objects.insert(key, updated.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        Ok(self.peek(namespace, name))
    }

    async fn list(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, StoreError> {
        let requirements = label_selector.map(parse_selector).unwrap_or_default();
        Ok(self
            .lock()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, obj)| obj)
            .filter(|obj| matches_selector(obj.labels(), &requirements))
            .cloned()
            .collect())
    }

    async fn create(&self, namespace: &str, obj: &K) -> Result<K, StoreError> {
        let name = obj.name_any();
        let mut objects = self.lock();
        let key = (namespace.to_string(), name.clone());
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: Self::kind(),
                namespace: namespace.to_string(),
                name,
            });
        }

        let mut created = obj.clone();
        let meta = created.meta_mut();
        meta.resource_version = Some(self.next_version());
        if meta.namespace.is_none() && !namespace.is_empty() {
            meta.namespace = Some(namespace.to_string());
        }
        objects.insert(key, created.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn replace(&self, namespace: &str, obj: &K) -> Result<K, StoreError> {
        let name = obj.name_any();
        let mut objects = self.lock();
        let key = (namespace.to_string(), name.clone());
        let current = objects
            .get(&key)
            .ok_or_else(|| Self::not_found(namespace, &name))?;

        if let Some(version) = &obj.meta().resource_version {
            if current.meta().resource_version.as_ref() != Some(version) {
                return Err(StoreError::Conflict {
                    kind: Self::kind(),
                    namespace: namespace.to_string(),
                    name,
                });
            }
        }

        // Main-resource updates never change the status subresource
        let mut value = serde_json::to_value(obj)?;
        let status = serde_json::to_value(current)?
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        if let Some(map) = value.as_object_mut() {
            if status.is_null() {
                map.remove("status");
            } else {
                map.insert("status".to_string(), status);
            }
        }

        let mut updated: K = serde_json::from_value(value)?;
        updated.meta_mut().resource_version = Some(self.next_version());
        objects.insert(key, updated.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn patch_merge(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, StoreError> {
        self.apply_patch(namespace, name, patch, false)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, StoreError> {
        self.apply_patch(namespace, name, patch, true)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let removed = self
            .lock()
            .remove(&(namespace.to_string(), name.to_string()));
        if removed.is_some() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// RFC 7386 JSON merge-patch
pub fn merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
    let patch_map = match patch.as_object() {
        Some(map) => map,
        None => {
            *target = patch.clone();
            return;
        }
    };

    if !target.is_object() {
        *target = serde_json::Value::Object(serde_json::Map::new());
    }

    if let Some(target_map) = target.as_object_mut() {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                let entry = target_map
                    .entry(key.clone())
                    .or_insert(serde_json::Value::Null);
                merge_patch(entry, value);
            }
        }
    }
}

/// One `key=value` or bare `key` (exists) requirement
#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    Exists(String),
}

fn parse_selector(selector: &str) -> Vec<Requirement> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|part| match part.split_once('=') {
            Some((k, v)) => Requirement::Equals(
                k.trim_end_matches('=').trim().to_string(),
                v.trim_start_matches('=').trim().to_string(),
            ),
            None => Requirement::Exists(part.to_string()),
        })
        .collect()
}

fn matches_selector(labels: &BTreeMap<String, String>, requirements: &[Requirement]) -> bool {
    requirements.iter().all(|req| match req {
        Requirement::Equals(k, v) => labels.get(k) == Some(v),
        Requirement::Exists(k) => labels.contains_key(k),
    })
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
