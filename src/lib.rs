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

//! frontend-operator - reconciles Frontend, FrontendEnvironment and Bundle
//! resources into the Deployments, Ingresses and shared ConfigMaps that serve
//! a federated web console.
//!
//! The crate provides:
//! - Custom resource definitions ([`crd`])
//! - A resource store abstraction with Kubernetes and in-memory backends
//! - The pure rendering and aggregation engines
//! - The environment reconciler and its controller
//! - Controller manager, configuration and health checks

#![warn(clippy::all)]

pub mod aggregate;
pub mod config;
pub mod controller;
pub mod controller_context;
pub mod controller_manager;
pub mod crd;
pub mod frontend_controller;
pub mod health;
pub mod reconcile;
pub mod render;
pub mod retry;
pub mod store;
pub mod workqueue;

// Re-export commonly used types
pub use aggregate::aggregate;
pub use config::OperatorConfig;
pub use controller::{Controller, ControllerError};
pub use controller_context::ControllerContext;
pub use controller_manager::ControllerManager;
pub use frontend_controller::FrontendController;
pub use reconcile::{EnvKey, ReconcileError, ReconcileOutcome, Reconciler};
pub use render::render;
pub use store::{KubeStore, MemoryStore, ResourceStore, StoreError};

/// Semantic version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name used in logs and the `app.kubernetes.io/managed-by` label.
pub const OPERATOR_NAME: &str = "frontend-operator";
