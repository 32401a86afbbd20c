// Copyright 2025 The Kubernetes Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory resource store.
//!
//! Behaves like a single API server: monotonically increasing
//! resourceVersions, uid assignment on create, optimistic concurrency on
//! update, and cascading deletion of objects whose owner references point at
//! a deleted object.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{
    object_key, EventType, ResourceEvent, ResourceKind, ResourceStore, Result, StoreError,
    StoredObject, EVENT_CHANNEL_CAPACITY,
};

/// `(kind, namespace, name)`
type ObjectKey = (String, String, String);

#[derive(Default)]
struct MemoryState {
    objects: BTreeMap<ObjectKey, Value>,
    next_version: u64,

    /// Remaining forced update conflicts per kind.
    injected_conflicts: HashMap<String, u32>,

    /// Successful writes (create and update) per kind.
    writes: HashMap<String, u64>,
}

impl MemoryState {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn record_write(&mut self, kind: &str) {
        *self.writes.entry(kind.to_string()).or_default() += 1;
    }
}

/// An in-process [`ResourceStore`].
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<ResourceEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(MemoryState::default()),
            events,
        }
    }

    /// Makes the next `count` updates of kind `K` fail with a conflict,
    /// as if another writer got there first.
    pub fn inject_conflicts<K: StoredObject>(&self, count: u32) {
        let mut state = self.state();
        state
            .injected_conflicts
            .insert(K::kind(&()).to_string(), count);
    }

    /// Number of successful creates and updates of kind `K` so far.
    pub fn write_count<K: StoredObject>(&self) -> u64 {
        self.state()
            .writes
            .get(&*K::kind(&()))
            .copied()
            .unwrap_or(0)
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, kind: &str, event_type: EventType, namespace: &str, name: &str, value: &Value) {
        let Some(kind) = ResourceKind::from_kind(kind) else {
            return;
        };
        let env_name = match kind {
            ResourceKind::Frontend | ResourceKind::Bundle => value
                .pointer("/spec/envName")
                .and_then(Value::as_str)
                .map(str::to_string),
            ResourceKind::FrontendEnvironment => Some(name.to_string()),
            _ => None,
        };
        // No receivers is fine; events are advisory.
        let _ = self.events.send(ResourceEvent {
            kind,
            event_type,
            namespace: namespace.to_string(),
            name: name.to_string(),
            env_name,
        });
    }

    /// Removes an object and everything it transitively owns.
    ///
    /// Returns the removed objects so events can be sent after the lock is released.
    fn remove_cascading(state: &mut MemoryState, key: &ObjectKey) -> Vec<(ObjectKey, Value)> {
        let mut removed = Vec::new();
        let mut pending = vec![key.clone()];

        while let Some(key) = pending.pop() {
            let Some(value) = state.objects.remove(&key) else {
                continue;
            };
            if let Some(uid) = value.pointer("/metadata/uid").and_then(Value::as_str) {
                let dependents = state
                    .objects
                    .iter()
                    .filter(|((_, ns, _), obj)| ns == &key.1 && is_owned_by(obj, uid))
                    .map(|(k, _)| k.clone());
                pending.extend(dependents);
            }
            removed.push((key, value));
        }

        removed
    }
}

fn is_owned_by(value: &Value, uid: &str) -> bool {
    value
        .pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .is_some_and(|refs| {
            refs.iter()
                .any(|r| r.get("uid").and_then(Value::as_str) == Some(uid))
        })
}

fn generate_uid() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let key = (K::kind(&()).to_string(), namespace.to_string(), name.to_string());
        let value = self.state().objects.get(&key).cloned();
        value
            .map(|v| serde_json::from_value(v).map_err(StoreError::from))
            .transpose()
    }

    async fn list<K: StoredObject>(&self, namespace: Option<&str>) -> Result<Vec<K>> {
        let kind = K::kind(&()).to_string();
        let values: Vec<Value> = self
            .state()
            .objects
            .iter()
            .filter(|((k, ns, _), _)| k == &kind && namespace.map_or(true, |n| n == ns.as_str()))
            .map(|(_, v)| v.clone())
            .collect();
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(StoreError::from))
            .collect()
    }

    async fn create<K: StoredObject>(&self, object: &K) -> Result<K> {
        let kind = K::kind(&()).to_string();
        let (namespace, name) = object_key(object)?;
        let key = (kind.clone(), namespace.clone(), name.clone());

        let mut created = object.clone();
        let value = {
            let mut state = self.state();
            if state.objects.contains_key(&key) {
                return Err(StoreError::AlreadyExists {
                    kind,
                    namespace,
                    name,
                });
            }
            let meta = created.meta_mut();
            meta.resource_version = Some(state.bump_version());
            meta.uid.get_or_insert_with(generate_uid);
            let value = serde_json::to_value(&created)?;
            state.objects.insert(key, value.clone());
            state.record_write(&kind);
            value
        };

        self.emit(&kind, EventType::Applied, &namespace, &name, &value);
        Ok(created)
    }

    async fn update<K: StoredObject>(&self, object: &K) -> Result<K> {
        let kind = K::kind(&()).to_string();
        let (namespace, name) = object_key(object)?;
        let key = (kind.clone(), namespace.clone(), name.clone());

        let mut updated = object.clone();
        let value = {
            let mut state = self.state();
            let conflict = || StoreError::Conflict {
                kind: kind.clone(),
                namespace: namespace.clone(),
                name: name.clone(),
            };

            let Some(current) = state.objects.get(&key) else {
                return Err(StoreError::NotFound {
                    kind: kind.clone(),
                    namespace: namespace.clone(),
                    name: name.clone(),
                });
            };
            let current_version = current
                .pointer("/metadata/resourceVersion")
                .and_then(Value::as_str)
                .map(str::to_string);
            let current_uid = current
                .pointer("/metadata/uid")
                .and_then(Value::as_str)
                .map(str::to_string);

            if let Some(remaining) = state.injected_conflicts.get_mut(&kind) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(conflict());
                }
            }

            // An update without a token is unconditional, as on the API server.
            if let Some(token) = &updated.meta().resource_version {
                if current_version.as_ref() != Some(token) {
                    return Err(conflict());
                }
            }

            let meta = updated.meta_mut();
            meta.resource_version = Some(state.bump_version());
            meta.uid = current_uid;
            let value = serde_json::to_value(&updated)?;
            state.objects.insert(key, value.clone());
            state.record_write(&kind);
            value
        };

        self.emit(&kind, EventType::Applied, &namespace, &name, &value);
        Ok(updated)
    }

    async fn delete<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<()> {
        let kind = K::kind(&()).to_string();
        let key = (kind.clone(), namespace.to_string(), name.to_string());

        let removed = {
            let mut state = self.state();
            if !state.objects.contains_key(&key) {
                return Err(StoreError::NotFound {
                    kind,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                });
            }
            Self::remove_cascading(&mut state, &key)
        };

        for ((kind, namespace, name), value) in &removed {
            tracing::trace!(%kind, %namespace, %name, "deleted object");
            self.emit(kind, EventType::Deleted, namespace, name, value);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.events.subscribe()
    }
}
