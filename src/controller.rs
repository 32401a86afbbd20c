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

//! Core controller traits and types.
//!
//! This module defines the base interface that all controllers must implement.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

// Re-export cancellation token for use in controller interface
pub use tokio_util::sync::CancellationToken;

use crate::controller_context::ControllerContext;
use crate::health::{BoxFuture, HealthChecker};

/// Errors that can occur when running a controller.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("controller {name} failed to start: {source}")]
    StartFailed {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("controller {name} runtime error: {source}")]
    Runtime {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid configuration for controller {name}: {reason}")]
    InvalidConfig { name: String, reason: String },
}

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, ControllerError>;

/// The base trait that all controllers must implement.
///
/// A controller watches the shared state of the cluster through a resource
/// store and makes changes attempting to move the current state towards the
/// desired state.
///
/// # Lifecycle
///
/// 1. The controller is constructed and registered with the
///    [`ControllerManager`](crate::controller_manager::ControllerManager)
/// 2. [`Controller::run`] is called with a cancellation token
/// 3. The controller runs until the token is cancelled or an error occurs
/// 4. [`Controller::shutdown`] is called to clean up resources
#[async_trait]
pub trait Controller: Send + Sync + 'static {
    /// Returns the canonical name of this controller.
    ///
    /// This name is used for logging and health checks.
    fn name(&self) -> &str;

    /// Runs the controller's main loop.
    ///
    /// This method should block until:
    /// - The cancellation token is triggered
    /// - A fatal error occurs
    ///
    /// When the token is cancelled, the controller should gracefully shut down
    /// and return `Ok(())`.
    async fn run(&self, ctx: ControllerContext, cancel: CancellationToken) -> Result<()>;

    /// Optional health check for the controller.
    ///
    /// The default implementation always returns `true`.
    fn health_check(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async { true })
    }

    /// Optional graceful shutdown hook.
    ///
    /// Called after the main loop exits but before the controller is
    /// considered fully stopped.
    fn shutdown(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    /// Returns the number of workers this controller uses.
    fn worker_count(&self) -> usize {
        1
    }
}

/// Exposes a controller's [`Controller::health_check`] to the health registry.
pub struct ControllerHealth(pub Arc<dyn Controller>);

impl HealthChecker for ControllerHealth {
    fn check(&self) -> BoxFuture<'_, bool> {
        self.0.health_check()
    }

    fn name(&self) -> &str {
        self.0.name()
    }
}
