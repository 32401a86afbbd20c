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

//! Resource store backed by the Kubernetes API server.

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Client, ResourceExt};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::{
    object_key, EventType, ResourceEvent, ResourceKind, ResourceStore, Result, StoreError,
    StoredObject, EVENT_CHANNEL_CAPACITY,
};
use crate::crd::{Bundle, Frontend, FrontendEnvironment};

/// Watch timeout; must stay below the client read timeout so idle watches
/// are closed by the server first.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// A [`ResourceStore`] talking to the API server.
///
/// Change events come from watchers on the three input kinds, started with
/// [`KubeStore::run_watchers`].
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    watch_namespace: Option<String>,
    events: broadcast::Sender<ResourceEvent>,
}

impl KubeStore {
    /// Creates a store; `watch_namespace` of `None` watches all namespaces.
    pub fn new(client: Client, watch_namespace: Option<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            client,
            watch_namespace,
            events,
        }
    }

    fn api<K: StoredObject>(&self, namespace: Option<&str>) -> Api<K> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    /// Runs watchers for Frontend, FrontendEnvironment and Bundle until cancelled,
    /// forwarding every change to subscribers.
    pub async fn run_watchers(&self, cancel: CancellationToken) {
        tracing::info!(
            namespace = self.watch_namespace.as_deref().unwrap_or("*"),
            "starting resource watchers"
        );

        tokio::select! {
            _ = self.watch::<Frontend>(|fe| Some(fe.spec.env_name.clone())) => {}
            _ = self.watch::<FrontendEnvironment>(|env| Some(env.name_any())) => {}
            _ = self.watch::<Bundle>(|b| Some(b.spec.env_name.clone())) => {}
            _ = cancel.cancelled() => {
                tracing::info!("resource watchers stopped");
            }
        }
    }

    async fn watch<K>(&self, env_of: impl Fn(&K) -> Option<String>)
    where
        K: StoredObject,
    {
        let Some(kind) = ResourceKind::of::<K>() else {
            return;
        };
        let api = self.api::<K>(self.watch_namespace.as_deref());
        let config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
        let mut stream = std::pin::pin!(watcher::watcher(api, config).default_backoff());

        while let Some(item) = stream.next().await {
            if let Some(event) = resource_event(kind, item, &env_of) {
                tracing::trace!(?event, "resource event");
                let _ = self.events.send(event);
            }
        }
    }
}

/// Translates one watcher item into a change event.
///
/// Init markers and errors produce nothing. After an error the watcher
/// stream applies its own backoff before retrying.
fn resource_event<K: StoredObject>(
    kind: ResourceKind,
    item: std::result::Result<Event<K>, watcher::Error>,
    env_of: &impl Fn(&K) -> Option<String>,
) -> Option<ResourceEvent> {
    let (event_type, object) = match item {
        Ok(Event::Apply(obj)) | Ok(Event::InitApply(obj)) => (EventType::Applied, obj),
        Ok(Event::Delete(obj)) => (EventType::Deleted, obj),
        Ok(Event::Init) | Ok(Event::InitDone) => {
            tracing::debug!(%kind, "watcher initialized");
            return None;
        }
        Err(e) => {
            tracing::warn!(%kind, error = %e, "watch error");
            return None;
        }
    };

    Some(ResourceEvent {
        kind,
        event_type,
        namespace: object.namespace().unwrap_or_default(),
        name: object.name_any(),
        env_name: env_of(&object),
    })
}

fn map_api_error<K: StoredObject>(err: kube::Error, namespace: &str, name: &str) -> StoreError {
    let kind = K::kind(&()).to_string();
    let namespace = namespace.to_string();
    let name = name.to_string();
    match err {
        kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound {
            kind,
            namespace,
            name,
        },
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            StoreError::AlreadyExists {
                kind,
                namespace,
                name,
            }
        }
        kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict {
            kind,
            namespace,
            name,
        },
        other => StoreError::Kube(other),
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.api::<K>(Some(namespace))
            .get_opt(name)
            .await
            .map_err(|e| map_api_error::<K>(e, namespace, name))
    }

    async fn list<K: StoredObject>(&self, namespace: Option<&str>) -> Result<Vec<K>> {
        let mut items = self
            .api::<K>(namespace)
            .list(&ListParams::default())
            .await?
            .items;
        items.sort_by(|a, b| {
            (a.namespace(), a.name_any()).cmp(&(b.namespace(), b.name_any()))
        });
        Ok(items)
    }

    async fn create<K: StoredObject>(&self, object: &K) -> Result<K> {
        let (namespace, name) = object_key(object)?;
        self.api::<K>(Some(&namespace))
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| map_api_error::<K>(e, &namespace, &name))
    }

    async fn update<K: StoredObject>(&self, object: &K) -> Result<K> {
        let (namespace, name) = object_key(object)?;
        self.api::<K>(Some(&namespace))
            .replace(&name, &PostParams::default(), object)
            .await
            .map_err(|e| map_api_error::<K>(e, &namespace, &name))
    }

    async fn delete<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<()> {
        self.api::<K>(Some(namespace))
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| map_api_error::<K>(e, namespace, name))
    }

    fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.events.subscribe()
    }
}
