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

//! Bundle CRD: a navigation grouping over frontends.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A Bundle groups frontends of one environment into a navigation tree.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cloud.redhat.com",
    version = "v1alpha1",
    kind = "Bundle",
    namespaced,
    printcolumn = r#"{"name":"ID","type":"string","jsonPath":".spec.id"}"#,
    printcolumn = r#"{"name":"Environment","type":"string","jsonPath":".spec.envName"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BundleSpec {
    pub id: String,

    #[serde(default)]
    pub title: String,

    /// Frontend names in navigation order
    #[serde(default)]
    pub app_list: Vec<String>,

    pub env_name: String,
}

impl Bundle {
    /// Returns true if this bundle is bound to the named environment.
    pub fn is_bound_to(&self, env_name: &str) -> bool {
        self.spec.env_name == env_name
    }
}
