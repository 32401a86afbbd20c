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

//! Configuration structures for the operator.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Main configuration for the frontend operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfig {
    /// Process-wide settings.
    #[serde(default)]
    pub generic: GenericConfig,

    /// Reconcile loop tuning.
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Shape of the rendered workload objects.
    #[serde(default)]
    pub render: RenderConfig,
}

/// Generic configuration of the operator process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericConfig {
    /// Kubeconfig file for talking to the apiserver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,

    /// Master URL to build a client from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<String>,

    /// Namespace to watch. Empty watches all namespaces.
    #[serde(default)]
    pub namespace: String,

    /// Number of environments reconciled concurrently.
    #[serde(default = "default_concurrent_syncs")]
    pub concurrent_syncs: usize,

    /// Period after which every known environment is reconciled again.
    #[serde(default = "default_resync_period", with = "humantime_serde")]
    pub resync_period: Duration,

    /// The duration between each controller starting.
    #[serde(
        default = "default_controller_start_interval",
        with = "humantime_serde"
    )]
    pub controller_start_interval: Duration,

    /// How long to wait for controllers to stop.
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// The address to serve health checks on.
    #[serde(default = "default_bind_address")]
    pub healthz_bind_address: String,

    /// The port to serve health checks on.
    #[serde(default = "default_healthz_port")]
    pub healthz_bind_port: u16,
}

impl Default for GenericConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            master: None,
            namespace: String::new(),
            concurrent_syncs: default_concurrent_syncs(),
            resync_period: default_resync_period(),
            controller_start_interval: default_controller_start_interval(),
            shutdown_timeout: default_shutdown_timeout(),
            healthz_bind_address: default_bind_address(),
            healthz_bind_port: default_healthz_port(),
        }
    }
}

impl GenericConfig {
    /// The namespace to watch, `None` meaning all namespaces.
    pub fn watch_namespace(&self) -> Option<&str> {
        if self.namespace.is_empty() {
            None
        } else {
            Some(&self.namespace)
        }
    }
}

fn default_concurrent_syncs() -> usize {
    5
}

fn default_resync_period() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_controller_start_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_healthz_port() -> u16 {
    8081
}

/// Reconcile loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileConfig {
    /// Deadline for a single reconcile.
    #[serde(default = "default_reconcile_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Attempts per object before a write conflict fails the reconcile.
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,

    /// First conflict backoff.
    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Upper bound for conflict backoff.
    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,

    /// First requeue delay after a failed or deferred reconcile.
    #[serde(default = "default_failure_base_delay", with = "humantime_serde")]
    pub failure_base_delay: Duration,

    /// Upper bound for failure requeue delays.
    #[serde(default = "default_failure_max_delay", with = "humantime_serde")]
    pub failure_max_delay: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            timeout: default_reconcile_timeout(),
            max_conflict_retries: default_max_conflict_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            failure_base_delay: default_failure_base_delay(),
            failure_max_delay: default_failure_max_delay(),
        }
    }
}

impl ReconcileConfig {
    /// Retry policy for conflicting writes.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_conflict_retries.max(1),
            initial_delay: self.initial_backoff,
            max_delay: self.max_backoff,
            ..RetryPolicy::default()
        }
    }
}

fn default_reconcile_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_conflict_retries() -> u32 {
    5
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(50)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(2)
}

fn default_failure_base_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_failure_max_delay() -> Duration {
    Duration::from_secs(5 * 60)
}

/// Settings for rendered Deployments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderConfig {
    /// Port the frontend container serves on, named `web`.
    #[serde(default = "default_container_port")]
    pub container_port: i32,

    #[serde(default = "default_replicas")]
    pub replicas: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            container_port: default_container_port(),
            replicas: default_replicas(),
            image_pull_policy: None,
        }
    }
}

fn default_container_port() -> i32 {
    8000
}

fn default_replicas() -> i32 {
    1
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
