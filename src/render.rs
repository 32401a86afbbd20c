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

//! Rendering of the objects derived from a Frontend.
//!
//! Everything here is a pure function of its inputs: the same Frontend and
//! FrontendEnvironment always produce the same objects, including the
//! desired-hash annotation the reconciler diffs against.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::RenderConfig;
use crate::crd::{Frontend, FrontendEnvironment};

/// Annotation holding the hash of the rendered labels and spec.
pub const DESIRED_HASH_ANNOTATION: &str = "frontend.cloud.redhat.com/desired-hash";

/// Value of `app.kubernetes.io/managed-by` on everything rendered here.
pub const MANAGED_BY: &str = crate::OPERATOR_NAME;

/// Name of the container and service port.
pub const WEB_PORT_NAME: &str = "web";

/// Objects derived from one Frontend.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedObjects {
    pub deployment: Deployment,
    /// `None` when the Frontend serves no paths.
    pub ingress: Option<Ingress>,
}

/// Renders the Deployment and Ingress of `frontend` in `environment`.
pub fn render(
    frontend: &Frontend,
    environment: &FrontendEnvironment,
    config: &RenderConfig,
) -> RenderedObjects {
    RenderedObjects {
        deployment: render_deployment(frontend, environment, config),
        ingress: render_ingress(frontend, environment),
    }
}

/// Labels shared by a Frontend's derived objects and pods.
pub fn frontend_labels(frontend: &Frontend) -> BTreeMap<String, String> {
    let name = frontend.name_any();
    let namespace = frontend.namespace().unwrap_or_default();

    let mut labels = BTreeMap::new();
    labels.insert("frontend".to_string(), name.clone());
    labels.insert("app.kubernetes.io/name".to_string(), name.clone());
    labels.insert(
        "app.kubernetes.io/instance".to_string(),
        format!("{namespace}-{name}"),
    );
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        MANAGED_BY.to_string(),
    );
    labels
}

fn selector_labels(labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    labels
        .iter()
        .filter(|(k, _)| k.as_str() == "frontend" || k.as_str() == "app.kubernetes.io/instance")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn render_deployment(
    frontend: &Frontend,
    environment: &FrontendEnvironment,
    config: &RenderConfig,
) -> Deployment {
    let name = frontend.name_any();
    let labels = frontend_labels(frontend);

    let mut env = vec![
        EnvVar {
            name: "SSO_URL".to_string(),
            value: Some(environment.spec.sso.clone()),
            ..Default::default()
        },
        EnvVar {
            name: "ENV_NAME".to_string(),
            value: Some(environment.name_any()),
            ..Default::default()
        },
    ];
    if let Some(path) = frontend.spec.frontend.paths.first() {
        env.push(EnvVar {
            name: "ROUTE_PATH".to_string(),
            value: Some(path.clone()),
            ..Default::default()
        });
    }

    let container = Container {
        name: name.clone(),
        image: Some(frontend.spec.image.clone()),
        image_pull_policy: config.image_pull_policy.clone(),
        env: Some(env),
        ports: Some(vec![ContainerPort {
            name: Some(WEB_PORT_NAME.to_string()),
            container_port: config.container_port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let spec = DeploymentSpec {
        replicas: Some(config.replicas),
        selector: LabelSelector {
            match_labels: Some(selector_labels(&labels)),
            ..Default::default()
        },
        template: PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(labels.clone()),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![container],
                ..Default::default()
            }),
        },
        ..Default::default()
    };

    Deployment {
        metadata: owned_metadata(frontend, &labels, &spec),
        spec: Some(spec),
        ..Default::default()
    }
}

/// An Ingress needs rules or a default backend, and a default backend would
/// claim every unmatched request of the ingress class, so a Frontend without
/// paths gets no Ingress.
fn render_ingress(frontend: &Frontend, environment: &FrontendEnvironment) -> Option<Ingress> {
    if frontend.spec.frontend.paths.is_empty() {
        return None;
    }

    let name = frontend.name_any();
    let labels = frontend_labels(frontend);
    // An empty hostname leaves the rule matching any host.
    let host = Some(environment.spec.hostname.clone()).filter(|h| !h.is_empty());

    let paths = frontend
        .spec
        .frontend
        .paths
        .iter()
        .map(|path| HTTPIngressPath {
            path: Some(path.clone()),
            path_type: "Prefix".to_string(),
            backend: IngressBackend {
                service: Some(IngressServiceBackend {
                    name: name.clone(),
                    port: Some(ServiceBackendPort {
                        name: Some(WEB_PORT_NAME.to_string()),
                        number: None,
                    }),
                }),
                resource: None,
            },
        })
        .collect::<Vec<_>>();

    let tls = environment.spec.tls_secret_name.as_ref().map(|secret| {
        vec![IngressTLS {
            hosts: host.clone().map(|h| vec![h]),
            secret_name: Some(secret.clone()),
        }]
    });

    let spec = IngressSpec {
        ingress_class_name: environment.spec.ingress_class.clone(),
        rules: Some(vec![IngressRule {
            host,
            http: Some(HTTPIngressRuleValue { paths }),
        }]),
        tls,
        ..Default::default()
    };

    Some(Ingress {
        metadata: owned_metadata(frontend, &labels, &spec),
        spec: Some(spec),
        ..Default::default()
    })
}

/// Metadata for an object owned by `frontend`, carrying the desired hash of
/// `labels` and `spec`.
fn owned_metadata<S: Serialize>(
    frontend: &Frontend,
    labels: &BTreeMap<String, String>,
    spec: &S,
) -> ObjectMeta {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        DESIRED_HASH_ANNOTATION.to_string(),
        desired_hash(labels, spec),
    );

    ObjectMeta {
        name: Some(frontend.name_any()),
        namespace: frontend.namespace(),
        labels: Some(labels.clone()),
        annotations: Some(annotations),
        owner_references: frontend.controller_owner_ref(&()).map(|r| vec![r]),
        ..Default::default()
    }
}

/// Renders the environment's ConfigMap around already aggregated `data`.
pub fn render_config_map(
    environment: &FrontendEnvironment,
    data: BTreeMap<String, String>,
) -> ConfigMap {
    let mut labels = BTreeMap::new();
    labels.insert(
        "frontend-environment".to_string(),
        environment.name_any(),
    );
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        MANAGED_BY.to_string(),
    );

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(environment.name_any()),
            namespace: environment.namespace(),
            labels: Some(labels),
            owner_references: environment.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// SHA-256 over the labels and spec, hex encoded.
pub fn desired_hash<S: Serialize>(labels: &BTreeMap<String, String>, spec: &S) -> String {
    let mut hasher = Sha256::new();
    // Both serialize deterministically: BTreeMap keys are ordered and
    // k8s-openapi structs serialize in field order.
    if let Ok(bytes) = serde_json::to_vec(labels) {
        hasher.update(&bytes);
    }
    if let Ok(bytes) = serde_json::to_vec(spec) {
        hasher.update(&bytes);
    }
    format!("{:x}", hasher.finalize())
}

/// Reads the desired-hash annotation of a live object.
pub fn live_hash(meta: &ObjectMeta) -> Option<&str> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(DESIRED_HASH_ANNOTATION))
        .map(String::as_str)
}
