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

//! End-to-end tests of the frontend controller against an in-memory store.
//!
//! Each test runs the controller the way the operator binary does, then
//! polls the store until the derived objects converge.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::networking::v1::Ingress;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use frontend_operator::aggregate::FED_MODULES_KEY;
use frontend_operator::controller::Controller;
use frontend_operator::crd::{
    Bundle, BundleSpec, Extension, FedModule, Frontend, FrontendEnvironment,
    FrontendEnvironmentSpec, FrontendInfo, FrontendSpec, Module, Route, FRONTEND_EXTENSION_TYPE,
};
use frontend_operator::store::{MemoryStore, ResourceStore};
use frontend_operator::{ControllerContext, FrontendController, OperatorConfig};

const NAMESPACE: &str = "default";
const POLL_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

const SCENARIO_FED_MODULES: &str = r#"{"test-frontend":{"manifestLocation":"/apps/inventory/fed-mods.json","modules":[{"id":"test","module":"./RootApp","routes":[{"pathname":"/test/href"}]}]}}"#;
const SCENARIO_BUNDLE: &str =
    r#"{"id":"test-bundle","title":"","navItems":[{"title":"Test","href":"/test/href"}]}"#;

struct Harness {
    store: Arc<MemoryStore>,
    cancel: CancellationToken,
    handle: JoinHandle<frontend_operator::controller::Result<()>>,
}

impl Harness {
    async fn start() -> Self {
        Self::start_with(Arc::new(MemoryStore::new())).await
    }

    async fn start_with(store: Arc<MemoryStore>) -> Self {
        let mut config = OperatorConfig::default();
        config.generic.concurrent_syncs = 2;
        config.reconcile.initial_backoff = Duration::from_millis(1);
        config.reconcile.max_backoff = Duration::from_millis(10);
        config.reconcile.failure_base_delay = Duration::from_millis(10);
        config.reconcile.failure_max_delay = Duration::from_millis(200);
        let config = Arc::new(config);

        let controller = FrontendController::new(store.clone(), &config).unwrap();
        let ctx = ControllerContext::with_resync_period_fn(
            config,
            Arc::new(|| Duration::from_secs(3600)),
        );
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { controller.run(ctx, cancel).await })
        };

        Self {
            store,
            cancel,
            handle,
        }
    }

    async fn stop(self) {
        self.cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    async fn config_map(&self, name: &str) -> Option<ConfigMap> {
        self.store.get::<ConfigMap>(NAMESPACE, name).await.unwrap()
    }

    async fn deployment(&self, name: &str) -> Option<Deployment> {
        self.store.get::<Deployment>(NAMESPACE, name).await.unwrap()
    }

    async fn ingress(&self, name: &str) -> Option<Ingress> {
        self.store.get::<Ingress>(NAMESPACE, name).await.unwrap()
    }
}

/// Polls `check` until it returns true or the timeout expires.
async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    loop {
        if check().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn data_of(cm: &ConfigMap, key: &str) -> Option<String> {
    cm.data.as_ref().and_then(|d| d.get(key).cloned())
}

fn environment(name: &str) -> FrontendEnvironment {
    let mut env = FrontendEnvironment::new(
        name,
        FrontendEnvironmentSpec {
            sso: "https://sso.example.com/auth".into(),
            hostname: "console.example.com".into(),
            ..Default::default()
        },
    );
    env.metadata.namespace = Some(NAMESPACE.into());
    env
}

fn frontend(name: &str, env: &str) -> Frontend {
    let mut fe = Frontend::new(
        name,
        FrontendSpec {
            env_name: env.into(),
            title: name.into(),
            image: format!("quay.io/example/{name}:1"),
            frontend: FrontendInfo {
                paths: vec![format!("/apps/{name}")],
            },
            module: FedModule {
                manifest_location: format!("/apps/{name}/fed-mods.json"),
                modules: vec![Module {
                    id: name.into(),
                    module: "./RootApp".into(),
                    routes: vec![Route {
                        pathname: format!("/{name}"),
                    }],
                }],
            },
            ..Default::default()
        },
    );
    fe.metadata.namespace = Some(NAMESPACE.into());
    fe
}

fn with_nav(mut fe: Frontend, title: &str) -> Frontend {
    fe.spec.extensions.push(Extension {
        type_: FRONTEND_EXTENSION_TYPE.into(),
        properties: json!({ "title": title }),
    });
    fe
}

fn scenario_frontend() -> Frontend {
    let mut fe = frontend("test-frontend", "test-env");
    fe.spec.frontend.paths = vec!["/things/test".into()];
    fe.spec.module = FedModule {
        manifest_location: "/apps/inventory/fed-mods.json".into(),
        modules: vec![Module {
            id: "test".into(),
            module: "./RootApp".into(),
            routes: vec![Route {
                pathname: "/test/href".into(),
            }],
        }],
    };
    fe.spec.extensions = vec![Extension {
        type_: FRONTEND_EXTENSION_TYPE.into(),
        properties: json!({
            "title": "Test",
            "groupID": "",
            "navItems": {},
            "appId": "",
            "href": "/test/href"
        }),
    }];
    fe
}

fn bundle(name: &str, id: &str, env: &str, apps: &[&str]) -> Bundle {
    let mut b = Bundle::new(
        name,
        BundleSpec {
            id: id.into(),
            title: String::new(),
            app_list: apps.iter().map(|a| a.to_string()).collect(),
            env_name: env.into(),
        },
    );
    b.metadata.namespace = Some(NAMESPACE.into());
    b
}

#[tokio::test]
async fn test_scenario_produces_all_derived_objects() {
    let harness = Harness::start().await;
    let h = &harness;

    h.store.create(&scenario_frontend()).await.unwrap();
    h.store.create(&environment("test-env")).await.unwrap();
    h.store
        .create(&bundle("test-env", "test-bundle", "test-env", &["test-frontend"]))
        .await
        .unwrap();

    eventually("scenario config map", move || async move {
        h.config_map("test-env").await.is_some_and(|cm| {
            data_of(&cm, FED_MODULES_KEY).as_deref() == Some(SCENARIO_FED_MODULES)
                && data_of(&cm, "test-env.json").as_deref() == Some(SCENARIO_BUNDLE)
        })
    })
    .await;

    let deployment = h.deployment("test-frontend").await.expect("deployment");
    let container = &deployment.spec.unwrap().template.spec.unwrap().containers[0];
    assert_eq!(container.image.as_deref(), Some("quay.io/example/test-frontend:1"));

    let ingress = h.ingress("test-frontend").await.expect("ingress");
    let rule = &ingress.spec.unwrap().rules.unwrap()[0];
    assert_eq!(rule.host.as_deref(), Some("console.example.com"));
    assert_eq!(rule.http.as_ref().unwrap().paths[0].path.as_deref(), Some("/things/test"));

    let cm = h.config_map("test-env").await.unwrap();
    assert_eq!(cm.data.unwrap().len(), 2);

    harness.stop().await;
}

#[tokio::test]
async fn test_converged_state_is_not_rewritten() {
    let harness = Harness::start().await;
    let h = &harness;
    h.store.create(&environment("stage")).await.unwrap();
    h.store.create(&frontend("inventory", "stage")).await.unwrap();

    eventually("inventory deployment", move || async move {
        h.deployment("inventory").await.is_some()
            && h.config_map("stage")
                .await
                .and_then(|cm| data_of(&cm, FED_MODULES_KEY))
                .is_some_and(|doc| doc.contains("inventory"))
    })
    .await;

    // Let queued duplicates drain before sampling.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let before = (
        h.store.write_count::<Deployment>(),
        h.store.write_count::<Ingress>(),
        h.store.write_count::<ConfigMap>(),
    );

    // A new environment wakes only itself.
    h.store.create(&environment("prod")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(750)).await;

    assert_eq!(h.store.write_count::<Deployment>(), before.0);
    assert_eq!(h.store.write_count::<Ingress>(), before.1);
    // Only the new environment's ConfigMap was written.
    assert_eq!(h.store.write_count::<ConfigMap>(), before.2 + 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_removed_inputs_leave_the_config_map() {
    let harness = Harness::start().await;
    let h = &harness;
    h.store.create(&environment("stage")).await.unwrap();
    h.store
        .create(&with_nav(frontend("inventory", "stage"), "Inventory"))
        .await
        .unwrap();
    h.store
        .create(&with_nav(frontend("advisor", "stage"), "Advisor"))
        .await
        .unwrap();
    h.store
        .create(&bundle("insights", "insights", "stage", &["inventory", "advisor"]))
        .await
        .unwrap();

    eventually("both frontends aggregated", move || async move {
        h.config_map("stage").await.is_some_and(|cm| {
            data_of(&cm, FED_MODULES_KEY)
                .is_some_and(|doc| doc.contains("inventory") && doc.contains("advisor"))
                && data_of(&cm, "insights.json").as_deref()
                    == Some(r#"{"id":"insights","title":"","navItems":[{"title":"Inventory"},{"title":"Advisor"}]}"#)
        })
    })
    .await;

    // The Bundle still lists advisor, so only the Frontend's contribution goes.
    h.store.delete::<Frontend>(NAMESPACE, "advisor").await.unwrap();
    eventually("advisor removed from modules and navigation", move || async move {
        h.config_map("stage").await.is_some_and(|cm| {
            data_of(&cm, FED_MODULES_KEY)
                .is_some_and(|doc| doc.contains("inventory") && !doc.contains("advisor"))
                && data_of(&cm, "insights.json").as_deref()
                    == Some(r#"{"id":"insights","title":"","navItems":[{"title":"Inventory"}]}"#)
        })
    })
    .await;

    h.store.delete::<Bundle>(NAMESPACE, "insights").await.unwrap();
    eventually("bundle document removed", move || async move {
        h.config_map("stage")
            .await
            .is_some_and(|cm| data_of(&cm, "insights.json").is_none())
    })
    .await;

    harness.stop().await;
}

#[tokio::test]
async fn test_moving_a_frontend_updates_both_environments() {
    let harness = Harness::start().await;
    let h = &harness;
    h.store.create(&environment("stage")).await.unwrap();
    h.store.create(&environment("prod")).await.unwrap();
    h.store.create(&frontend("inventory", "stage")).await.unwrap();

    eventually("inventory in stage", move || async move {
        h.config_map("stage")
            .await
            .and_then(|cm| data_of(&cm, FED_MODULES_KEY))
            .is_some_and(|doc| doc.contains("inventory"))
    })
    .await;

    let mut moved = h
        .store
        .get::<Frontend>(NAMESPACE, "inventory")
        .await
        .unwrap()
        .unwrap();
    moved.spec.env_name = "prod".into();
    h.store.update(&moved).await.unwrap();

    eventually("inventory moved to prod", move || async move {
        let stage = h
            .config_map("stage")
            .await
            .and_then(|cm| data_of(&cm, FED_MODULES_KEY));
        let prod = h
            .config_map("prod")
            .await
            .and_then(|cm| data_of(&cm, FED_MODULES_KEY));
        stage.as_deref() == Some("{}") && prod.is_some_and(|doc| doc.contains("inventory"))
    })
    .await;

    harness.stop().await;
}

#[tokio::test]
async fn test_deleting_a_frontend_removes_only_its_objects() {
    let harness = Harness::start().await;
    let h = &harness;
    h.store.create(&environment("stage")).await.unwrap();
    h.store.create(&frontend("inventory", "stage")).await.unwrap();
    h.store.create(&frontend("advisor", "stage")).await.unwrap();

    eventually("both deployments", move || async move {
        h.deployment("inventory").await.is_some() && h.deployment("advisor").await.is_some()
    })
    .await;

    h.store.delete::<Frontend>(NAMESPACE, "advisor").await.unwrap();

    eventually("advisor objects gone", move || async move {
        h.deployment("advisor").await.is_none() && h.ingress("advisor").await.is_none()
    })
    .await;
    eventually("config map without advisor", move || async move {
        h.config_map("stage")
            .await
            .and_then(|cm| data_of(&cm, FED_MODULES_KEY))
            .is_some_and(|doc| !doc.contains("advisor"))
    })
    .await;

    assert!(h.deployment("inventory").await.is_some());
    assert!(h.ingress("inventory").await.is_some());

    harness.stop().await;
}

#[tokio::test]
async fn test_conflicting_writes_are_retried() {
    let store = Arc::new(MemoryStore::new());
    store.create(&environment("stage")).await.unwrap();
    store.create(&frontend("inventory", "stage")).await.unwrap();
    let harness = Harness::start_with(store).await;
    let h = &harness;

    eventually("initial convergence", move || async move {
        h.deployment("inventory").await.is_some()
    })
    .await;

    h.store.inject_conflicts::<Deployment>(2);
    let mut updated = h
        .store
        .get::<Frontend>(NAMESPACE, "inventory")
        .await
        .unwrap()
        .unwrap();
    updated.spec.image = "quay.io/example/inventory:2".into();
    h.store.update(&updated).await.unwrap();

    eventually("new image rolled out", move || async move {
        h.deployment("inventory")
            .await
            .and_then(|d| d.spec)
            .and_then(|s| s.template.spec)
            .and_then(|s| s.containers.first().and_then(|c| c.image.clone()))
            .as_deref()
            == Some("quay.io/example/inventory:2")
    })
    .await;

    harness.stop().await;
}

#[tokio::test]
async fn test_frontend_waits_for_its_environment() {
    let harness = Harness::start().await;
    let h = &harness;
    h.store.create(&frontend("inventory", "stage")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(h.deployment("inventory").await.is_none());
    assert!(h.config_map("stage").await.is_none());

    h.store.create(&environment("stage")).await.unwrap();
    eventually("deferred frontend reconciled", move || async move {
        h.deployment("inventory").await.is_some() && h.config_map("stage").await.is_some()
    })
    .await;

    harness.stop().await;
}
