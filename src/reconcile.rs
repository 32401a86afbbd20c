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

//! Reconciliation of one frontend environment.
//!
//! A reconcile gathers the environment and everything bound to it, renders
//! the desired Deployments, Ingresses and the shared ConfigMap, and applies
//! them with resourceVersion-checked writes. Writes are skipped when the live
//! object already matches.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use thiserror::Error;

use crate::aggregate::{aggregate, AggregateError};
use crate::config::{OperatorConfig, RenderConfig};
use crate::crd::{Bundle, Frontend, FrontendEnvironment};
use crate::render::{live_hash, render, render_config_map};
use crate::retry::{retry_if, RetryPolicy};
use crate::store::{ResourceStore, StoreError, StoredObject};

/// Errors of a single reconcile.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid Frontend {namespace}/{name}: {reason}")]
    InvalidSpec {
        namespace: String,
        name: String,
        reason: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] AggregateError),

    #[error("reconcile of {key} timed out after {timeout:?}")]
    Timeout { key: EnvKey, timeout: Duration },

    #[error("{kind} {namespace}/{name} still conflicting after {attempts} attempts")]
    ConflictRetriesExhausted {
        kind: String,
        namespace: String,
        name: String,
        attempts: u32,
    },

    #[error("objects of {count} Frontend(s) failed to apply, first error: {first}")]
    FrontendsFailed {
        count: usize,
        first: Box<ReconcileError>,
    },
}

impl ReconcileError {
    fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Store(e) if e.is_conflict())
    }

    /// True for failures expected to clear up on a later attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcileError::Store(e) => e.is_transient(),
            ReconcileError::Timeout { .. } | ReconcileError::ConflictRetriesExhausted { .. } => {
                true
            }
            ReconcileError::FrontendsFailed { first, .. } => first.is_transient(),
            ReconcileError::InvalidSpec { .. } | ReconcileError::Serialization(_) => false,
        }
    }
}

/// Identifies one environment: the unit of reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvKey {
    pub namespace: String,
    pub name: String,
}

impl EnvKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for EnvKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What an apply did to one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyAction {
    Created,
    Updated,
    Deleted,
    Unchanged,
}

/// Write counts of a converged reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl ApplySummary {
    fn record(&mut self, action: ApplyAction) {
        match action {
            ApplyAction::Created => self.created += 1,
            ApplyAction::Updated => self.updated += 1,
            ApplyAction::Deleted => self.deleted += 1,
            ApplyAction::Unchanged => self.unchanged += 1,
        }
    }

    /// Number of objects written.
    pub fn writes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Result of a successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The environment does not exist (yet); nothing was written.
    Deferred,
    /// Every derived object matches the desired state.
    Converged(ApplySummary),
}

/// Reconciles environments against a [`ResourceStore`].
pub struct Reconciler<S> {
    store: Arc<S>,
    render: RenderConfig,
    retry: RetryPolicy,
}

impl<S: ResourceStore> Reconciler<S> {
    pub fn new(store: Arc<S>, config: &OperatorConfig) -> Self {
        Self {
            store,
            render: config.render.clone(),
            retry: config.reconcile.retry_policy(),
        }
    }

    /// Brings every object derived from the environment `key` in line with
    /// the current Frontends and Bundles.
    pub async fn reconcile(&self, key: &EnvKey) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(environment) = self
            .store
            .get::<FrontendEnvironment>(&key.namespace, &key.name)
            .await?
        else {
            tracing::debug!(env = %key, "environment not found, deferring");
            return Ok(ReconcileOutcome::Deferred);
        };

        let frontends: Vec<Frontend> = self
            .store
            .list::<Frontend>(Some(&key.namespace))
            .await?
            .into_iter()
            .filter(|fe| fe.is_bound_to(&key.name))
            .collect();

        for frontend in &frontends {
            validate_frontend(frontend)?;
        }

        let mut summary = ApplySummary::default();
        let mut failures = Vec::new();

        // A Frontend whose objects cannot be written must not hold back the
        // others or the environment's ConfigMap.
        for frontend in &frontends {
            if let Err(e) = self.apply_frontend(frontend, &environment, &mut summary).await {
                tracing::warn!(
                    env = %key,
                    frontend = %frontend.name_any(),
                    error = %e,
                    "failed to apply frontend objects"
                );
                failures.push(e);
            }
        }

        summary.record(self.apply_config_map(&environment, key).await?);

        let count = failures.len();
        if let Some(first) = failures.into_iter().next() {
            return Err(ReconcileError::FrontendsFailed {
                count,
                first: Box::new(first),
            });
        }

        if summary.writes() > 0 {
            tracing::info!(
                env = %key,
                frontends = frontends.len(),
                created = summary.created,
                updated = summary.updated,
                deleted = summary.deleted,
                unchanged = summary.unchanged,
                "environment reconciled"
            );
        } else {
            tracing::debug!(env = %key, unchanged = summary.unchanged, "environment up to date");
        }

        Ok(ReconcileOutcome::Converged(summary))
    }

    /// Applies the Deployment and Ingress of one Frontend.
    async fn apply_frontend(
        &self,
        frontend: &Frontend,
        environment: &FrontendEnvironment,
        summary: &mut ApplySummary,
    ) -> Result<(), ReconcileError> {
        let rendered = render(frontend, environment, &self.render);
        summary.record(self.apply_hashed(&rendered.deployment).await?);

        match &rendered.ingress {
            Some(ingress) => summary.record(self.apply_hashed(ingress).await?),
            None => {
                if let Some(action) = self.remove_owned::<Ingress>(frontend).await? {
                    summary.record(action);
                }
            }
        }
        Ok(())
    }

    /// Deletes the object named after `frontend` if `frontend` owns it.
    async fn remove_owned<K: StoredObject>(
        &self,
        frontend: &Frontend,
    ) -> Result<Option<ApplyAction>, ReconcileError> {
        let namespace = frontend.namespace().unwrap_or_default();
        let name = frontend.name_any();

        let Some(live) = self.store.get::<K>(&namespace, &name).await? else {
            return Ok(None);
        };
        let Some(uid) = frontend.uid() else {
            return Ok(None);
        };
        if !live.owner_references().iter().any(|r| r.uid == uid) {
            return Ok(None);
        }

        match self.store.delete::<K>(&namespace, &name).await {
            Ok(()) | Err(StoreError::NotFound { .. }) => Ok(Some(ApplyAction::Deleted)),
            Err(e) => Err(e.into()),
        }
    }

    /// Applies a Deployment or Ingress, comparing desired-hash annotations.
    ///
    /// On conflict the live object is fetched again and the same desired
    /// content re-applied.
    async fn apply_hashed<K: StoredObject>(&self, desired: &K) -> Result<ApplyAction, ReconcileError> {
        let namespace = desired.namespace().unwrap_or_default();
        let name = desired.name_any();

        retry_if(
            &self.retry,
            &format!("apply {} {namespace}/{name}", K::kind(&())),
            StoreError::is_conflict,
            move |_| self.apply_hashed_once(desired),
        )
        .await
        .map_err(|e| self.exhausted::<K>(e.into(), &namespace, &name))
    }

    async fn apply_hashed_once<K: StoredObject>(&self, desired: &K) -> Result<ApplyAction, StoreError> {
        let namespace = desired.namespace().unwrap_or_default();
        let name = desired.name_any();

        match self.store.get::<K>(&namespace, &name).await? {
            None => {
                self.store.create(desired).await?;
                Ok(ApplyAction::Created)
            }
            Some(live) if live_hash(live.meta()) == live_hash(desired.meta()) => {
                Ok(ApplyAction::Unchanged)
            }
            Some(live) => {
                let mut next = desired.clone();
                next.meta_mut().resource_version = live.meta().resource_version.clone();
                self.store.update(&next).await?;
                Ok(ApplyAction::Updated)
            }
        }
    }

    /// Rebuilds and applies the environment's ConfigMap.
    ///
    /// Every attempt re-reads the Frontends and Bundles, so a retry after a
    /// conflict writes the aggregate of the latest inputs.
    async fn apply_config_map(
        &self,
        environment: &FrontendEnvironment,
        key: &EnvKey,
    ) -> Result<ApplyAction, ReconcileError> {
        retry_if(
            &self.retry,
            &format!("apply ConfigMap {key}"),
            ReconcileError::is_conflict,
            move |_| self.apply_config_map_once(environment, key),
        )
        .await
        .map_err(|e| self.exhausted::<ConfigMap>(e, &key.namespace, &key.name))
    }

    async fn apply_config_map_once(
        &self,
        environment: &FrontendEnvironment,
        key: &EnvKey,
    ) -> Result<ApplyAction, ReconcileError> {
        let frontends = self.store.list::<Frontend>(Some(&key.namespace)).await?;
        let bundles = self.store.list::<Bundle>(Some(&key.namespace)).await?;
        let data = aggregate(&key.name, &frontends, &bundles)?;
        let desired = render_config_map(environment, data);

        match self.store.get::<ConfigMap>(&key.namespace, &key.name).await? {
            None => {
                self.store.create(&desired).await?;
                Ok(ApplyAction::Created)
            }
            Some(live) if data_of(&live) == data_of(&desired) => Ok(ApplyAction::Unchanged),
            Some(live) => {
                let mut next = desired;
                next.metadata.resource_version = live.metadata.resource_version;
                self.store.update(&next).await?;
                Ok(ApplyAction::Updated)
            }
        }
    }

    fn exhausted<K: StoredObject>(&self, err: ReconcileError, namespace: &str, name: &str) -> ReconcileError {
        if err.is_conflict() {
            ReconcileError::ConflictRetriesExhausted {
                kind: K::kind(&()).to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
                attempts: self.retry.max_attempts,
            }
        } else {
            err
        }
    }
}

fn data_of(cm: &ConfigMap) -> BTreeMap<String, String> {
    cm.data.clone().unwrap_or_default()
}

/// Rejects Frontends that cannot be rendered into a runnable workload.
pub fn validate_frontend(frontend: &Frontend) -> Result<(), ReconcileError> {
    if frontend.spec.image.trim().is_empty() {
        return Err(ReconcileError::InvalidSpec {
            namespace: frontend.namespace().unwrap_or_default(),
            name: frontend.name_any(),
            reason: "spec.image must not be empty".to_string(),
        });
    }
    Ok(())
}
