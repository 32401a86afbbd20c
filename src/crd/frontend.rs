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

//! Frontend CRD: one deployable micro-application.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Extension type whose properties contribute navigation items to bundles.
pub const FRONTEND_EXTENSION_TYPE: &str = "cloud.redhat.com/frontend";

/// A Frontend declares a single micro-application bound to one environment.
///
/// Example:
/// ```yaml
/// apiVersion: cloud.redhat.com/v1alpha1
/// kind: Frontend
/// metadata:
///   name: inventory
///   namespace: default
/// spec:
///   envName: stage
///   image: quay.io/example/inventory:abc123
///   frontend:
///     paths: ["/apps/inventory"]
///   module:
///     manifestLocation: /apps/inventory/fed-mods.json
///     modules:
///       - id: inventory
///         module: ./RootApp
///         routes:
///           - pathname: /insights/inventory
///   extensions:
///     - type: cloud.redhat.com/frontend
///       properties:
///         title: Inventory
///         href: /insights/inventory
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cloud.redhat.com",
    version = "v1alpha1",
    kind = "Frontend",
    namespaced,
    printcolumn = r#"{"name":"Environment","type":"string","jsonPath":".spec.envName"}"#,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FrontendSpec {
    /// Name of the FrontendEnvironment (same namespace) this frontend deploys into
    pub env_name: String,

    /// Human-readable title
    #[serde(default)]
    pub title: String,

    /// Repository the deployment configuration is sourced from
    #[serde(default)]
    pub deployment_repo: String,

    /// Container image reference
    pub image: String,

    /// API versions the application talks to
    #[serde(default)]
    pub api: ApiInfo,

    /// Paths the application is served under
    #[serde(default)]
    pub frontend: FrontendInfo,

    /// Module federation descriptor
    #[serde(default)]
    pub module: FedModule,

    /// Typed extension points; navigation lives here
    #[serde(default)]
    pub extensions: Vec<Extension>,
}

/// API versions consumed by the frontend.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ApiInfo {
    #[serde(default)]
    pub versions: Vec<String>,
}

/// Served path list.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct FrontendInfo {
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Module federation descriptor.
///
/// Serialized verbatim into `fed-modules.json`; field order is the output order.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FedModule {
    #[serde(default)]
    pub manifest_location: String,

    /// Remote modules in declared order
    #[serde(default)]
    pub modules: Vec<Module>,
}

/// A remotely loadable module.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Module {
    pub id: String,

    /// Entrypoint exposed by the federated container (e.g. `./RootApp`)
    pub module: String,

    /// Routes in precedence order
    #[serde(default)]
    pub routes: Vec<Route>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Route {
    pub pathname: String,
}

/// An extension point contribution.
///
/// `properties` is kept as raw JSON here and only given a shape by whoever
/// consumes the extension type.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Extension {
    #[serde(rename = "type")]
    pub type_: String,

    #[serde(default)]
    #[schemars(schema_with = "super::preserve_unknown_fields")]
    pub properties: serde_json::Value,
}

impl Frontend {
    /// Returns true if this frontend is bound to the named environment.
    pub fn is_bound_to(&self, env_name: &str) -> bool {
        self.spec.env_name == env_name
    }

    /// Extensions that contribute navigation, with their position in `spec.extensions`.
    pub fn navigation_extensions(&self) -> impl Iterator<Item = (usize, &Extension)> {
        self.spec
            .extensions
            .iter()
            .enumerate()
            .filter(|(_, ext)| ext.type_ == FRONTEND_EXTENSION_TYPE)
    }
}
