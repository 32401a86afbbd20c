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

//! Controller context - shared resources for all controllers.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::config::OperatorConfig;

/// Shared context for all controllers.
#[derive(Clone)]
pub struct ControllerContext {
    /// Configuration for this operator instance.
    pub config: Arc<OperatorConfig>,

    /// Function to generate resync periods.
    ///
    /// This is randomized per call so replicas and controllers do not all
    /// relist at the same time.
    pub resync_period_fn: Arc<dyn Fn() -> Duration + Send + Sync>,
}

impl ControllerContext {
    /// Creates a context whose resync periods jitter above `config.generic.resync_period`.
    pub fn new(config: Arc<OperatorConfig>) -> Self {
        let resync_period_fn = Arc::new(resync_period_fn(config.generic.resync_period));
        Self::with_resync_period_fn(config, resync_period_fn)
    }

    /// Creates a context with a custom resync period function.
    pub fn with_resync_period_fn(
        config: Arc<OperatorConfig>,
        resync_period_fn: Arc<dyn Fn() -> Duration + Send + Sync>,
    ) -> Self {
        Self {
            config,
            resync_period_fn,
        }
    }

    /// Returns a resync period for a controller.
    pub fn resync_period(&self) -> Duration {
        (self.resync_period_fn)()
    }
}

/// Creates a resync period function with the given base duration.
///
/// The returned function adds random jitter to avoid all controllers
/// syncing at the same time.
pub fn resync_period_fn(base: Duration) -> impl Fn() -> Duration + Send + Sync {
    move || {
        let mut rng = rand::thread_rng();
        // Add between 0 and 100% jitter
        let jitter = rng.gen_range(0.0..1.0);
        base.mul_f64(1.0 + jitter)
    }
}
