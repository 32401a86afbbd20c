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

//! Custom resource definitions reconciled by the operator.
//!
//! All three kinds live in the `cloud.redhat.com` group and are namespaced.
//! Frontends and Bundles bind to a FrontendEnvironment in their own namespace
//! through `spec.envName`.

mod bundle;
mod environment;
mod frontend;

pub use bundle::{Bundle, BundleSpec};
pub use environment::{FrontendEnvironment, FrontendEnvironmentSpec};
pub use frontend::{
    ApiInfo, Extension, FedModule, Frontend, FrontendInfo, FrontendSpec, Module, Route,
    FRONTEND_EXTENSION_TYPE,
};

use kube::CustomResourceExt;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};

/// API group shared by every kind in this module.
pub const API_GROUP: &str = "cloud.redhat.com";

/// Renders the CustomResourceDefinitions of all three kinds as a multi-document YAML stream.
pub fn crd_manifests() -> Result<String, serde_yaml::Error> {
    let crds = [Frontend::crd(), FrontendEnvironment::crd(), Bundle::crd()];
    let mut out = String::new();
    for crd in &crds {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(crd)?);
    }
    Ok(out)
}

/// Schema for free-form JSON objects: the API server must keep every field.
pub(crate) fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        extensions: [(
            "x-kubernetes-preserve-unknown-fields".to_string(),
            serde_json::Value::Bool(true),
        )]
        .into_iter()
        .collect(),
        ..Default::default()
    })
}
