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

//! The frontend controller.
//!
//! Change events for Frontends, Bundles and FrontendEnvironments are mapped to
//! the environment they affect and fed into a coalescing work queue keyed by
//! environment. A pool of workers drains the queue, running one
//! [`Reconciler::reconcile`] per key under a deadline.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::OperatorConfig;
use crate::controller::{Controller, ControllerError, Result};
use crate::controller_context::ControllerContext;
use crate::crd::{Bundle, Frontend, FrontendEnvironment};
use crate::reconcile::{EnvKey, ReconcileError, ReconcileOutcome, Reconciler};
use crate::store::{EventType, ResourceEvent, ResourceKind, ResourceStore};
use crate::workqueue::WorkQueue;

/// Name of the frontend controller.
pub const CONTROLLER_NAME: &str = "frontend";

type ObjectId = (ResourceKind, String, String);

/// Last known environment of every Frontend and Bundle.
///
/// Lets an event for an object that moved or disappeared also wake the
/// environment it used to belong to.
#[derive(Debug, Default)]
pub struct EnvIndex {
    bindings: HashMap<ObjectId, String>,
}

impl EnvIndex {
    /// Records `event` and returns the environments it affects.
    pub fn apply(&mut self, event: &ResourceEvent) -> BTreeSet<EnvKey> {
        let mut keys = BTreeSet::new();
        let env_key = |env: &str| EnvKey::new(event.namespace.clone(), env);

        match event.kind {
            ResourceKind::FrontendEnvironment => {
                keys.insert(env_key(&event.name));
            }
            ResourceKind::Frontend | ResourceKind::Bundle => {
                let id = (event.kind, event.namespace.clone(), event.name.clone());
                let previous = match (event.event_type, &event.env_name) {
                    (EventType::Applied, Some(env)) => self.bindings.insert(id, env.clone()),
                    _ => self.bindings.remove(&id),
                };
                keys.extend(previous.as_deref().map(env_key));
                keys.extend(event.env_name.as_deref().map(env_key));
            }
            // Derived objects are written by the reconciler itself.
            ResourceKind::Deployment | ResourceKind::Ingress | ResourceKind::ConfigMap => {}
        }

        keys
    }

    /// Records the current binding of an object without producing keys.
    pub fn record(&mut self, kind: ResourceKind, namespace: &str, name: &str, env: &str) {
        self.bindings
            .insert((kind, namespace.to_string(), name.to_string()), env.to_string());
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

struct ControllerState<S: ResourceStore> {
    store: Arc<S>,
    reconciler: Reconciler<S>,
    queue: Arc<WorkQueue<EnvKey>>,
    index: Mutex<EnvIndex>,
    concurrent_syncs: usize,
    reconcile_timeout: Duration,
    active_workers: AtomicUsize,
}

/// Reconciles the derived objects of every frontend environment.
pub struct FrontendController<S: ResourceStore> {
    state: Arc<ControllerState<S>>,
}

impl<S: ResourceStore> FrontendController<S> {
    /// Creates the controller; fails if the configuration cannot run it.
    pub fn new(store: Arc<S>, config: &OperatorConfig) -> Result<Self> {
        if config.generic.concurrent_syncs == 0 {
            return Err(ControllerError::InvalidConfig {
                name: CONTROLLER_NAME.to_string(),
                reason: "concurrentSyncs must be at least 1".to_string(),
            });
        }
        if config.reconcile.timeout.is_zero() {
            return Err(ControllerError::InvalidConfig {
                name: CONTROLLER_NAME.to_string(),
                reason: "reconcile timeout must be positive".to_string(),
            });
        }

        let state = ControllerState {
            reconciler: Reconciler::new(store.clone(), config),
            store,
            queue: WorkQueue::new(
                config.reconcile.failure_base_delay,
                config.reconcile.failure_max_delay,
            ),
            index: Mutex::new(EnvIndex::default()),
            concurrent_syncs: config.generic.concurrent_syncs,
            reconcile_timeout: config.reconcile.timeout,
            active_workers: AtomicUsize::new(0),
        };
        Ok(Self {
            state: Arc::new(state),
        })
    }

    /// The work queue of environment keys.
    pub fn queue(&self) -> &Arc<WorkQueue<EnvKey>> {
        &self.state.queue
    }
}

impl<S: ResourceStore> ControllerState<S> {
    fn index(&self) -> std::sync::MutexGuard<'_, EnvIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_event(&self, event: &ResourceEvent) {
        if !event.kind.is_input() {
            return;
        }
        let keys = self.index().apply(event);
        for key in keys {
            tracing::trace!(kind = %event.kind, name = %event.name, env = %key, "enqueue");
            self.queue.add(key);
        }
    }

    /// Enqueues every known environment and refreshes the binding index.
    async fn resync(&self, namespace: Option<&str>) {
        let mut keys = BTreeSet::new();

        match self.store.list::<FrontendEnvironment>(namespace).await {
            Ok(envs) => keys.extend(
                envs.iter()
                    .map(|env| EnvKey::new(env.namespace().unwrap_or_default(), env.name_any())),
            ),
            Err(e) => tracing::warn!(error = %e, "failed to list environments for resync"),
        }

        let frontends = self.store.list::<Frontend>(namespace).await;
        let bundles = self.store.list::<Bundle>(namespace).await;
        {
            let mut index = self.index();
            match frontends {
                Ok(frontends) => {
                    for fe in frontends {
                        let ns = fe.namespace().unwrap_or_default();
                        index.record(ResourceKind::Frontend, &ns, &fe.name_any(), &fe.spec.env_name);
                        keys.insert(EnvKey::new(ns, fe.spec.env_name.clone()));
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to list frontends for resync"),
            }
            match bundles {
                Ok(bundles) => {
                    for b in bundles {
                        let ns = b.namespace().unwrap_or_default();
                        index.record(ResourceKind::Bundle, &ns, &b.name_any(), &b.spec.env_name);
                        keys.insert(EnvKey::new(ns, b.spec.env_name.clone()));
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to list bundles for resync"),
            }
        }

        tracing::debug!(environments = keys.len(), "resync");
        for key in keys {
            self.queue.add(key);
        }
    }

    /// Runs one reconcile and requeues the key according to its outcome.
    async fn process(&self, key: &EnvKey) {
        let result = match tokio::time::timeout(
            self.reconcile_timeout,
            self.reconciler.reconcile(key),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ReconcileError::Timeout {
                key: key.clone(),
                timeout: self.reconcile_timeout,
            }),
        };

        match result {
            Ok(ReconcileOutcome::Converged(_)) => self.queue.forget(key),
            // Creating the environment enqueues its key again.
            Ok(ReconcileOutcome::Deferred) => {
                self.queue.forget(key);
                tracing::debug!(env = %key, "environment not found, dropping key");
            }
            Err(e) => {
                let delay = self.queue.add_rate_limited(key.clone());
                let requeues = self.queue.num_requeues(key);
                if e.is_transient() {
                    tracing::warn!(env = %key, error = %e, requeues, delay_ms = delay.as_millis() as u64, "reconcile failed, requeueing");
                } else {
                    tracing::error!(env = %key, error = %e, requeues, delay_ms = delay.as_millis() as u64, "reconcile failed, requeueing");
                }
            }
        }
    }

    async fn run_worker(self: Arc<Self>, id: usize) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(worker = id, "worker started");

        while let Some(key) = self.queue.get().await {
            self.process(&key).await;
            self.queue.done(&key);
        }

        self.active_workers.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(worker = id, "worker stopped");
    }
}

#[async_trait]
impl<S: ResourceStore> Controller for FrontendController<S> {
    fn name(&self) -> &str {
        CONTROLLER_NAME
    }

    async fn run(&self, ctx: ControllerContext, cancel: CancellationToken) -> Result<()> {
        let controller = self.state.clone();
        let namespace = ctx.config.generic.watch_namespace().map(str::to_string);

        // Subscribe before listing so nothing between the two is missed.
        let mut events = controller.store.subscribe();
        controller.resync(namespace.as_deref()).await;

        let mut workers = JoinSet::new();
        for id in 0..controller.concurrent_syncs {
            workers.spawn(controller.clone().run_worker(id));
        }

        let resync = tokio::time::sleep(ctx.resync_period());
        tokio::pin!(resync);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => {
                        if namespace.as_deref().map_or(true, |ns| ns == event.namespace) {
                            controller.handle_event(&event);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "event stream lagged, resyncing");
                        controller.resync(namespace.as_deref()).await;
                    }
                    Err(RecvError::Closed) => {
                        controller.queue.shut_down();
                        return Err(ControllerError::Runtime {
                            name: CONTROLLER_NAME.to_string(),
                            source: "resource event stream closed".into(),
                        });
                    }
                },
                () = &mut resync => {
                    controller.resync(namespace.as_deref()).await;
                    resync.as_mut().reset(tokio::time::Instant::now() + ctx.resync_period());
                }
            }
        }

        tracing::info!(controller = CONTROLLER_NAME, "stopping workers");
        controller.queue.shut_down();
        while workers.join_next().await.is_some() {}
        Ok(())
    }

    fn health_check(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        let state = &self.state;
        let healthy = !state.queue.is_shutting_down()
            && state.active_workers.load(Ordering::SeqCst) == state.concurrent_syncs;
        Box::pin(async move { healthy })
    }

    fn worker_count(&self) -> usize {
        self.state.concurrent_syncs
    }
}
