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

//! FrontendEnvironment CRD.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A deployment environment for frontends.
///
/// Owns exactly one ConfigMap of the same name holding the aggregated
/// federation and navigation documents. Frontends reference it by name only,
/// so deleting it is never blocked by them.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cloud.redhat.com",
    version = "v1alpha1",
    kind = "FrontendEnvironment",
    namespaced,
    printcolumn = r#"{"name":"Hostname","type":"string","jsonPath":".spec.hostname"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FrontendEnvironmentSpec {
    /// SSO endpoint injected into every frontend container
    pub sso: String,

    /// Host all frontend ingresses of this environment are served on
    #[serde(default)]
    pub hostname: String,

    /// Ingress class for rendered ingresses; cluster default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class: Option<String>,

    /// Secret holding the TLS certificate for `hostname`; plain HTTP when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret_name: Option<String>,
}
