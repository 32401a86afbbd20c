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

//! Aggregation of an environment's shared configuration documents.
//!
//! [`aggregate`] is a pure function from the current Frontends and Bundles to
//! the `data` of the environment's ConfigMap:
//! - `fed-modules.json`: every bound Frontend's module federation descriptor,
//!   keyed by Frontend name
//! - `<bundle>.json`: one navigation document per bound Bundle
//!
//! The output never depends on the order of its inputs. Declared orders
//! (modules, routes, `appList`, extensions) are kept as-is.

use std::collections::BTreeMap;

use kube::ResourceExt;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::crd::{Bundle, FedModule, Frontend};

/// ConfigMap key of the module federation document.
pub const FED_MODULES_KEY: &str = "fed-modules.json";

/// Errors while building the documents.
#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("failed to serialize {document}: {source}")]
    Serialization {
        document: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Reasons an extension's properties are not a navigation item.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NavItemError {
    #[error("navigation properties must be a JSON object")]
    NotAnObject,

    #[error("navigation item has no title")]
    MissingTitle,

    #[error("field {field} must be a string")]
    NotAString { field: String },

    #[error("navItems must be an array")]
    NestedNotAnArray,
}

/// One navigation entry contributed by a frontend extension.
///
/// Known fields are emitted in this order; empty optional fields are left
/// out. Unknown properties follow in key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavItem {
    pub title: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub group_id: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nav_items: Vec<NavItem>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub app_id: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub href: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl NavItem {
    /// Validates free-form extension properties into a navigation item.
    ///
    /// `groupID`/`appID` are accepted as spellings of `groupId`/`appId`; an
    /// empty object or `null` for `navItems` means no children.
    pub fn from_properties(properties: &Value) -> Result<Self, NavItemError> {
        let Value::Object(map) = properties else {
            return Err(NavItemError::NotAnObject);
        };
        Self::from_map(map)
    }

    fn from_map(map: &Map<String, Value>) -> Result<Self, NavItemError> {
        let mut item = NavItem::default();
        let mut title = None;

        for (key, value) in map {
            match key.as_str() {
                "title" => title = Some(string_field(key, value)?),
                "groupId" | "groupID" => item.group_id = string_field(key, value)?,
                "appId" | "appID" => item.app_id = string_field(key, value)?,
                "href" => item.href = string_field(key, value)?,
                "navItems" => item.nav_items = nested_items(value)?,
                _ => {
                    item.extra.insert(key.clone(), value.clone());
                }
            }
        }

        item.title = title.ok_or(NavItemError::MissingTitle)?;
        if item.title.is_empty() {
            return Err(NavItemError::MissingTitle);
        }
        Ok(item)
    }
}

fn string_field(key: &str, value: &Value) -> Result<String, NavItemError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Null => Ok(String::new()),
        _ => Err(NavItemError::NotAString {
            field: key.to_string(),
        }),
    }
}

fn nested_items(value: &Value) -> Result<Vec<NavItem>, NavItemError> {
    match value {
        Value::Array(items) => items.iter().map(NavItem::from_properties).collect(),
        Value::Null => Ok(Vec::new()),
        Value::Object(map) if map.is_empty() => Ok(Vec::new()),
        _ => Err(NavItemError::NestedNotAnArray),
    }
}

/// Navigation document of one bundle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleDocument {
    pub id: String,
    pub title: String,
    pub nav_items: Vec<NavItem>,
}

/// ConfigMap key of a bundle's document.
pub fn bundle_document_key(bundle: &Bundle) -> String {
    format!("{}.json", bundle.name_any())
}

/// Builds the ConfigMap data for `environment_name`.
///
/// Inputs not bound to the environment are ignored, so callers may pass
/// everything in the namespace.
pub fn aggregate(
    environment_name: &str,
    frontends: &[Frontend],
    bundles: &[Bundle],
) -> Result<BTreeMap<String, String>, AggregateError> {
    let mut bound: Vec<&Frontend> = frontends
        .iter()
        .filter(|fe| fe.is_bound_to(environment_name))
        .collect();
    bound.sort_by_key(|fe| (fe.name_any(), fe.namespace()));

    // First occurrence wins on duplicate names so the result stays order independent.
    let mut by_name: BTreeMap<String, &Frontend> = BTreeMap::new();
    for fe in &bound {
        by_name.entry(fe.name_any()).or_insert(fe);
    }

    let mut data = BTreeMap::new();

    let fed_modules: BTreeMap<&str, &FedModule> = by_name
        .iter()
        .map(|(name, fe)| (name.as_str(), &fe.spec.module))
        .collect();
    data.insert(
        FED_MODULES_KEY.to_string(),
        to_json(FED_MODULES_KEY, &fed_modules)?,
    );

    let mut bound_bundles: Vec<&Bundle> = bundles
        .iter()
        .filter(|b| b.is_bound_to(environment_name))
        .collect();
    bound_bundles.sort_by_key(|b| (b.name_any(), b.namespace()));

    for bundle in bound_bundles {
        let key = bundle_document_key(bundle);
        if key == FED_MODULES_KEY || data.contains_key(&key) {
            tracing::warn!(
                env = %environment_name,
                bundle = %bundle.name_any(),
                "bundle document key collides with an existing document, skipping"
            );
            continue;
        }
        let document = bundle_document(bundle, &by_name);
        data.insert(key.clone(), to_json(&key, &document)?);
    }

    Ok(data)
}

/// Concatenates, in `appList` order, the navigation items of every listed frontend.
fn bundle_document(bundle: &Bundle, frontends: &BTreeMap<String, &Frontend>) -> BundleDocument {
    let mut nav_items = Vec::new();

    for app in &bundle.spec.app_list {
        let Some(frontend) = frontends.get(app) else {
            tracing::debug!(
                bundle = %bundle.name_any(),
                frontend = %app,
                "bundle lists a frontend that is not bound to its environment"
            );
            continue;
        };

        for (index, extension) in frontend.navigation_extensions() {
            match NavItem::from_properties(&extension.properties) {
                Ok(item) => nav_items.push(item),
                Err(e) => tracing::warn!(
                    bundle = %bundle.name_any(),
                    frontend = %app,
                    extension = index,
                    error = %e,
                    "skipping malformed navigation extension"
                ),
            }
        }
    }

    BundleDocument {
        id: bundle.spec.id.clone(),
        title: bundle.spec.title.clone(),
        nav_items,
    }
}

fn to_json<T: Serialize>(document: &str, value: &T) -> Result<String, AggregateError> {
    serde_json::to_string(value).map_err(|source| AggregateError::Serialization {
        document: document.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{BundleSpec, Extension, FrontendSpec, Module, Route, FRONTEND_EXTENSION_TYPE};
    use serde_json::json;

    fn frontend(name: &str, env: &str, nav: Vec<Value>) -> Frontend {
        let mut fe = Frontend::new(
            name,
            FrontendSpec {
                env_name: env.into(),
                image: format!("quay.io/example/{name}:1"),
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
                extensions: nav
                    .into_iter()
                    .map(|properties| Extension {
                        type_: FRONTEND_EXTENSION_TYPE.into(),
                        properties,
                    })
                    .collect(),
                ..Default::default()
            },
        );
        fe.metadata.namespace = Some("default".into());
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
        b.metadata.namespace = Some("default".into());
        b
    }

    #[test]
    fn test_single_frontend_documents() {
        let mut fe = frontend(
            "test-frontend",
            "test-env",
            vec![json!({
                "title": "Test",
                "groupID": "",
                "navItems": {},
                "appId": "",
                "href": "/test/href"
            })],
        );
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
        let b = bundle("test-env", "test-bundle", "test-env", &["test-frontend"]);

        let data = aggregate("test-env", &[fe], &[b]).unwrap();

        assert_eq!(data.len(), 2);
        assert_eq!(
            data[FED_MODULES_KEY],
            r#"{"test-frontend":{"manifestLocation":"/apps/inventory/fed-mods.json","modules":[{"id":"test","module":"./RootApp","routes":[{"pathname":"/test/href"}]}]}}"#
        );
        assert_eq!(
            data["test-env.json"],
            r#"{"id":"test-bundle","title":"","navItems":[{"title":"Test","href":"/test/href"}]}"#
        );
    }

    #[test]
    fn test_output_independent_of_input_order() {
        let frontends = vec![
            frontend("b", "stage", vec![json!({"title": "B"})]),
            frontend("a", "stage", vec![json!({"title": "A"})]),
            frontend("c", "stage", vec![]),
        ];
        let bundles = vec![
            bundle("nav-2", "two", "stage", &["c", "a"]),
            bundle("nav-1", "one", "stage", &["b"]),
        ];

        let forward = aggregate("stage", &frontends, &bundles).unwrap();

        let mut fe_rev = frontends.clone();
        fe_rev.reverse();
        let mut b_rev = bundles.clone();
        b_rev.reverse();
        let reversed = aggregate("stage", &fe_rev, &b_rev).unwrap();

        assert_eq!(forward, reversed);
        assert!(forward[FED_MODULES_KEY].starts_with(r#"{"a":"#));
    }

    #[test]
    fn test_app_list_order_is_kept() {
        let frontends = vec![
            frontend("a", "stage", vec![json!({"title": "A"})]),
            frontend("b", "stage", vec![json!({"title": "B1"}), json!({"title": "B2"})]),
        ];
        let bundles = vec![bundle("nav", "nav", "stage", &["b", "a"])];

        let data = aggregate("stage", &frontends, &bundles).unwrap();
        assert_eq!(
            data["nav.json"],
            r#"{"id":"nav","title":"","navItems":[{"title":"B1"},{"title":"B2"},{"title":"A"}]}"#
        );
    }

    #[test]
    fn test_missing_and_foreign_apps_are_skipped() {
        let frontends = vec![
            frontend("a", "stage", vec![json!({"title": "A"})]),
            frontend("other-env", "prod", vec![json!({"title": "Prod"})]),
        ];
        let bundles = vec![
            bundle("nav", "nav", "stage", &["ghost", "other-env", "a"]),
            bundle("prod-nav", "prod", "prod", &["other-env"]),
        ];

        let data = aggregate("stage", &frontends, &bundles).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(
            data["nav.json"],
            r#"{"id":"nav","title":"","navItems":[{"title":"A"}]}"#
        );
        assert!(!data[FED_MODULES_KEY].contains("other-env"));
    }

    #[test]
    fn test_empty_environment_still_has_fed_modules() {
        let data = aggregate("stage", &[], &[]).unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[FED_MODULES_KEY], "{}");
    }

    #[test]
    fn test_malformed_extension_is_skipped() {
        let frontends = vec![frontend(
            "a",
            "stage",
            vec![
                json!("not an object"),
                json!({"href": "/no/title"}),
                json!({"title": "Good", "navItems": 7}),
                json!({"title": "Kept"}),
            ],
        )];
        let bundles = vec![bundle("nav", "nav", "stage", &["a"])];

        let data = aggregate("stage", &frontends, &bundles).unwrap();
        assert_eq!(
            data["nav.json"],
            r#"{"id":"nav","title":"","navItems":[{"title":"Kept"}]}"#
        );
    }

    #[test]
    fn test_nav_item_fields_and_extras() {
        let item = NavItem::from_properties(&json!({
            "zeta": true,
            "href": "/x",
            "appID": "app",
            "title": "Parent",
            "alpha": 1,
            "navItems": [{"title": "Child", "groupId": "g"}]
        }))
        .unwrap();

        assert_eq!(item.app_id, "app");
        assert_eq!(item.nav_items.len(), 1);
        assert_eq!(
            serde_json::to_string(&item).unwrap(),
            r#"{"title":"Parent","navItems":[{"title":"Child","groupId":"g"}],"appId":"app","href":"/x","alpha":1,"zeta":true}"#
        );
    }

    #[test]
    fn test_nav_item_errors() {
        assert_eq!(
            NavItem::from_properties(&json!([])),
            Err(NavItemError::NotAnObject)
        );
        assert_eq!(
            NavItem::from_properties(&json!({"title": ""})),
            Err(NavItemError::MissingTitle)
        );
        assert_eq!(
            NavItem::from_properties(&json!({"title": "x", "href": 3})),
            Err(NavItemError::NotAString {
                field: "href".into()
            })
        );
    }

    #[test]
    fn test_colliding_bundle_name_is_skipped() {
        let bundles = vec![bundle("fed-modules", "x", "stage", &[])];
        let data = aggregate("stage", &[], &bundles).unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[FED_MODULES_KEY], "{}");
    }
}
