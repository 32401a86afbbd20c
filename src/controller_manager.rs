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

//! Controller manager - the main orchestrator.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::OperatorConfig;
use crate::controller::{Controller, ControllerError, ControllerHealth, Result};
use crate::controller_context::ControllerContext;
use crate::health::HealthRegistry;

/// The controller manager.
///
/// This is the main orchestrator that:
/// 1. Manages the lifecycle of all registered controllers
/// 2. Provides the shared context (config, resync periods)
/// 3. Handles graceful shutdown
pub struct ControllerManager {
    /// Configuration for this instance.
    config: Arc<OperatorConfig>,

    /// Registered controllers, started in registration order.
    controllers: Vec<Arc<dyn Controller>>,

    /// Root cancellation token for shutdown.
    shutdown_token: CancellationToken,

    /// Controllers that are currently running.
    running_controllers: Arc<tokio::sync::RwLock<HashSet<String>>>,
}

impl ControllerManager {
    /// Creates a new controller manager.
    pub fn new(config: Arc<OperatorConfig>) -> Self {
        Self {
            config,
            controllers: Vec::new(),
            shutdown_token: CancellationToken::new(),
            running_controllers: Arc::new(tokio::sync::RwLock::new(HashSet::new())),
        }
    }

    /// Adds a controller.
    pub fn register(&mut self, controller: Arc<dyn Controller>) -> &mut Self {
        tracing::debug!(controller = %controller.name(), "registered controller");
        self.controllers.push(controller);
        self
    }

    /// Registers every controller's health check with `registry`.
    pub async fn register_health_checks(&self, registry: &HealthRegistry) {
        for controller in &self.controllers {
            registry
                .register(Arc::new(ControllerHealth(controller.clone())))
                .await;
        }
    }

    /// Returns the shutdown cancellation token.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Names of the controllers currently running.
    pub async fn running_controllers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.running_controllers.read().await.iter().cloned().collect();
        names.sort();
        names
    }

    /// Runs all registered controllers until shutdown or a controller fails.
    pub async fn run(&self) -> Result<()> {
        tracing::info!("starting frontend-operator controllers");

        if self.controllers.is_empty() {
            tracing::warn!("no controllers registered, exiting");
            return Ok(());
        }

        let ctx = ControllerContext::new(self.config.clone());
        self.run_controllers(ctx).await
    }

    /// Runs all controllers concurrently.
    async fn run_controllers(&self, ctx: ControllerContext) -> Result<()> {
        let start_interval = self.config.generic.controller_start_interval;

        let mut join_set = JoinSet::new();

        for controller in self.controllers.iter().cloned() {
            let name = controller.name().to_string();
            let ctx = ctx.clone();
            let cancel = self.shutdown_token.clone();
            let running = self.running_controllers.clone();

            // Add up to 100% jitter to the start time
            let jitter = rand::random::<f64>();
            let delay = start_interval.mul_f64(1.0 + jitter);

            join_set.spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return (name, Ok(())),
                }

                tracing::info!(
                    controller = %name,
                    workers = controller.worker_count(),
                    "starting controller"
                );

                running.write().await.insert(name.clone());
                let result = controller.run(ctx, cancel).await;
                running.write().await.remove(&name);

                if let Err(e) = controller.shutdown().await {
                    tracing::warn!(controller = %name, error = %e, "controller shutdown hook failed");
                }

                match result {
                    Ok(()) => {
                        tracing::info!(controller = %name, "controller terminated successfully");
                    }
                    Err(ref e) => {
                        tracing::error!(controller = %name, error = %e, "controller terminated with error");
                    }
                }

                (name, result)
            });
        }

        tokio::select! {
            result = async {
                while let Some(result) = join_set.join_next().await {
                    match result {
                        Ok((name, Ok(()))) => {
                            tracing::debug!(controller = %name, "controller finished");
                        }
                        Ok((name, Err(e))) => {
                            return Err::<(), _>(ControllerError::Runtime {
                                name,
                                source: e.into(),
                            });
                        }
                        Err(e) => {
                            if e.is_panic() {
                                tracing::error!("controller task panicked");
                            }
                            return Err(ControllerError::Runtime {
                                name: "unknown".to_string(),
                                source: e.into(),
                            });
                        }
                    }
                }
                Ok(())
            } => {
                if result.is_err() {
                    // Stop the siblings of the failed controller.
                    self.shutdown_token.cancel();
                    self.drain(&mut join_set).await;
                }
                return result;
            }

            _ = self.shutdown_token.cancelled() => {
                tracing::info!("shutdown signal received, waiting for controllers to stop");
            }
        }

        self.drain(&mut join_set).await;
        Ok(())
    }

    /// Waits for remaining controllers, giving up after the shutdown timeout.
    async fn drain(&self, join_set: &mut JoinSet<(String, Result<()>)>) {
        let shutdown_timeout = self.config.generic.shutdown_timeout;
        let deadline = tokio::time::Instant::now() + shutdown_timeout;

        while !join_set.is_empty() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());

            if remaining.is_zero() {
                let running = self.running_controllers().await;
                if !running.is_empty() {
                    tracing::warn!(
                        controllers = ?running,
                        "shutdown timeout reached, controllers still running"
                    );
                }
                join_set.abort_all();
                break;
            }

            tokio::select! {
                result = join_set.join_next() => {
                    match result {
                        Some(Ok((name, Ok(())))) => {
                            tracing::debug!(controller = %name, "controller stopped");
                        }
                        Some(Ok((name, Err(e)))) => {
                            tracing::warn!(controller = %name, error = %e, "controller stopped with error");
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "controller task failed");
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep(remaining.min(Duration::from_secs(1))) => {
                    let running = self.running_controllers().await;
                    if !running.is_empty() {
                        tracing::debug!(controllers = ?running, "still waiting for controllers");
                    }
                }
            }
        }
    }

    /// Initiates a graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("initiating graceful shutdown");
        self.shutdown_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Waiting {
        name: &'static str,
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Controller for Waiting {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, _ctx: ControllerContext, cancel: CancellationToken) -> Result<()> {
            cancel.cancelled().await;
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Controller for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn run(&self, _ctx: ControllerContext, _cancel: CancellationToken) -> Result<()> {
            // Give the other controllers time to start.
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(ControllerError::InvalidConfig {
                name: "failing".into(),
                reason: "broken".into(),
            })
        }
    }

    fn fast_config() -> Arc<OperatorConfig> {
        let mut config = OperatorConfig::default();
        config.generic.controller_start_interval = Duration::from_millis(1);
        config.generic.shutdown_timeout = Duration::from_secs(2);
        Arc::new(config)
    }

    #[tokio::test]
    async fn test_run_without_controllers_returns() {
        let manager = ControllerManager::new(fast_config());
        assert!(manager.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_stops_controllers() {
        let stopped = Arc::new(AtomicBool::new(false));
        let mut manager = ControllerManager::new(fast_config());
        manager.register(Arc::new(Waiting {
            name: "waiting",
            stopped: stopped.clone(),
        }));
        let manager = Arc::new(manager);

        let handle = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.run().await })
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while manager.running_controllers().await.is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "controller never started");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(manager.running_controllers().await, vec!["waiting"]);

        manager.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(stopped.load(Ordering::SeqCst));
        assert!(manager.running_controllers().await.is_empty());
    }

    #[tokio::test]
    async fn test_failing_controller_stops_the_rest() {
        let stopped = Arc::new(AtomicBool::new(false));
        let mut manager = ControllerManager::new(fast_config());
        manager
            .register(Arc::new(Waiting {
                name: "waiting",
                stopped: stopped.clone(),
            }))
            .register(Arc::new(Failing));

        let result = tokio::time::timeout(Duration::from_secs(3), manager.run())
            .await
            .unwrap();
        assert!(matches!(result, Err(ControllerError::Runtime { ref name, .. }) if name == "failing"));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_health_checks_registered() {
        let mut manager = ControllerManager::new(fast_config());
        manager.register(Arc::new(Failing));
        let registry = HealthRegistry::new();
        manager.register_health_checks(&registry).await;
        assert_eq!(registry.len().await, 1);
    }
}
