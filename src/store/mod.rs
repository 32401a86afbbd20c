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

//! Resource store abstraction.
//!
//! The reconcile engine only ever talks to the cluster through
//! [`ResourceStore`]. Two implementations are provided:
//! - [`MemoryStore`]: in-process, used by tests and for embedding
//! - [`KubeStore`]: backed by the Kubernetes API server via kube-rs
//!
//! Every object carries its `metadata.resourceVersion` as the concurrency
//! token. `update` succeeds only when the token matches the stored object.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

mod kube_store;
mod memory;

pub use kube_store::KubeStore;
pub use memory::MemoryStore;

/// Capacity of the change event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Errors returned by store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
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

    #[error("{kind} {namespace}/{name} has been modified; resourceVersion is stale")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("invalid {kind} object: {reason}")]
    Invalid { kind: String, reason: String },

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True for a stale concurrency token or a lost create race.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::AlreadyExists { .. }
        )
    }

    /// True for errors that are expected to clear up on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Conflict { .. } | StoreError::AlreadyExists { .. } => true,
            StoreError::NotFound { .. } => true,
            StoreError::Kube(kube::Error::Api(resp)) => resp.code == 409 || resp.code >= 500,
            StoreError::Kube(_) => true,
            StoreError::Invalid { .. } | StoreError::Serialization(_) => false,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Objects the store can hold: any namespaced, statically typed Kubernetes resource.
pub trait StoredObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoredObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Kinds that produce change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Frontend,
    FrontendEnvironment,
    Bundle,
    Deployment,
    Ingress,
    ConfigMap,
}

impl ResourceKind {
    /// Maps a Kubernetes kind name to a known kind.
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "Frontend" => Some(Self::Frontend),
            "FrontendEnvironment" => Some(Self::FrontendEnvironment),
            "Bundle" => Some(Self::Bundle),
            "Deployment" => Some(Self::Deployment),
            "Ingress" => Some(Self::Ingress),
            "ConfigMap" => Some(Self::ConfigMap),
            _ => None,
        }
    }

    /// Returns the kind for a statically typed resource.
    pub fn of<K: StoredObject>() -> Option<Self> {
        Self::from_kind(&K::kind(&()))
    }

    /// True for the three input kinds the operator watches.
    pub fn is_input(self) -> bool {
        matches!(
            self,
            Self::Frontend | Self::FrontendEnvironment | Self::Bundle
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Frontend => "Frontend",
            Self::FrontendEnvironment => "FrontendEnvironment",
            Self::Bundle => "Bundle",
            Self::Deployment => "Deployment",
            Self::Ingress => "Ingress",
            Self::ConfigMap => "ConfigMap",
        };
        f.write_str(s)
    }
}

/// What happened to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Applied,
    Deleted,
}

/// A change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEvent {
    pub kind: ResourceKind,
    pub event_type: EventType,
    pub namespace: String,
    pub name: String,

    /// Environment the object was bound to in the state this event reports.
    ///
    /// `spec.envName` for Frontends and Bundles, the object's own name for
    /// FrontendEnvironments, `None` for derived kinds.
    pub env_name: Option<String>,
}

/// Read/write access to cluster objects plus change notifications.
///
/// `list` returns objects ordered by `(namespace, name)`. A `namespace` of
/// `None` lists across all namespaces.
#[async_trait]
pub trait ResourceStore: Send + Sync + 'static {
    /// Fetches an object; `None` when it does not exist.
    async fn get<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// Lists objects of one kind.
    async fn list<K: StoredObject>(&self, namespace: Option<&str>) -> Result<Vec<K>>;

    /// Creates an object; fails with `AlreadyExists` if the name is taken.
    async fn create<K: StoredObject>(&self, object: &K) -> Result<K>;

    /// Replaces an object; fails with `Conflict` if its resourceVersion is stale.
    async fn update<K: StoredObject>(&self, object: &K) -> Result<K>;

    /// Deletes an object.
    async fn delete<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<()>;

    /// Subscribes to change events for every kind the store tracks.
    fn subscribe(&self) -> broadcast::Receiver<ResourceEvent>;
}

/// Returns `(namespace, name)` of an object or an `Invalid` error.
pub(crate) fn object_key<K: StoredObject>(object: &K) -> Result<(String, String)> {
    let meta = object.meta();
    let invalid = |reason: &str| StoreError::Invalid {
        kind: K::kind(&()).to_string(),
        reason: reason.to_string(),
    };
    let name = meta.name.clone().ok_or_else(|| invalid("metadata.name is required"))?;
    let namespace = meta
        .namespace
        .clone()
        .ok_or_else(|| invalid("metadata.namespace is required"))?;
    Ok((namespace, name))
}
