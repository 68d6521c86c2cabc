//! Parsing of the JSON the client prints.
//!
//! Both API revisions are reduced to [`RecipeMatch`] / [`PackageInfo`].

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::client::{normalize_reference, PackageInfo, RecipeMatch};
use crate::error::{ClientError, ClientResult};

fn invalid(what: &str) -> ClientError {
    ClientError::InvalidResponse(what.to_string())
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| {
                    let text = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), text)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Same recipe, ignoring revisions and user/channel.
fn same_recipe(printed: &str, name_version: &str) -> bool {
    normalize_reference(printed).split('@').next() == Some(name_version)
}

// ---------------------------------------------------------------------------
// V1: `search --json` and `create --json`
// ---------------------------------------------------------------------------

/// `{"results": [{"remote": .., "items": [{"recipe": {"id": ..}, "packages": [..]}]}]}`
pub fn parse_v1_search(json: &str) -> ClientResult<Vec<RecipeMatch>> {
    let root: Value = serde_json::from_str(json)?;
    let results = root
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("search output has no `results` array"))?;

    let mut matches = Vec::new();
    for result in results {
        let items = result.get("items").and_then(Value::as_array);
        for item in items.into_iter().flatten() {
            let reference = item
                .pointer("/recipe/id")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("search item has no recipe id"))?;
            let packages = item
                .get("packages")
                .and_then(Value::as_array)
                .map(|pkgs| pkgs.iter().filter_map(v1_package).collect())
                .unwrap_or_default();
            matches.push(RecipeMatch {
                reference: normalize_reference(reference).to_string(),
                packages,
            });
        }
    }
    Ok(matches)
}

fn v1_package(value: &Value) -> Option<PackageInfo> {
    Some(PackageInfo {
        id: value.get("id")?.as_str()?.to_string(),
        settings: string_map(value.get("settings")),
        options: string_map(value.get("options")),
    })
}

/// Package id of `name_version` from `create --json` output.
pub fn parse_v1_create(json: &str, name_version: &str) -> ClientResult<Option<String>> {
    let root: Value = serde_json::from_str(json)?;
    let installed = root
        .get("installed")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("create output has no `installed` array"))?;

    Ok(installed
        .iter()
        .filter(|entry| {
            entry
                .pointer("/recipe/id")
                .and_then(Value::as_str)
                .is_some_and(|id| same_recipe(id, name_version))
        })
        .find_map(|entry| {
            entry
                .get("packages")?
                .as_array()?
                .iter()
                .find_map(|p| p.get("id")?.as_str().map(str::to_string))
        }))
}

// ---------------------------------------------------------------------------
// V2: `list --format=json` and `create --format=json`
// ---------------------------------------------------------------------------

/// `{"<remote>": {"<ref>": {"revisions": {"<rrev>": {"packages": {..}}}}}}`
///
/// A remote that reports `{"error": ..}` (nothing matched) yields no matches.
pub fn parse_v2_list(json: &str, remote: &str) -> ClientResult<Vec<RecipeMatch>> {
    let root: Value = serde_json::from_str(json)?;
    let Some(listing) = root.get(remote).and_then(Value::as_object) else {
        return Ok(Vec::new());
    };
    if listing.contains_key("error") {
        return Ok(Vec::new());
    }

    Ok(listing
        .iter()
        .map(|(reference, body)| RecipeMatch {
            reference: normalize_reference(reference).to_string(),
            packages: v2_packages(body),
        })
        .collect())
}

fn v2_packages(recipe: &Value) -> Vec<PackageInfo> {
    let empty = Map::new();
    let revisions = recipe
        .get("revisions")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let mut packages: Vec<PackageInfo> = Vec::new();
    for revision in revisions.values() {
        let Some(pkgs) = revision.get("packages").and_then(Value::as_object) else {
            continue;
        };
        for (id, body) in pkgs {
            if packages.iter().any(|p| &p.id == id) {
                continue;
            }
            packages.push(PackageInfo {
                id: id.clone(),
                settings: string_map(body.pointer("/info/settings")),
                options: string_map(body.pointer("/info/options")),
            });
        }
    }
    packages
}

/// Package id of `name_version` from the dependency graph printed by
/// `create --format=json`.
pub fn parse_v2_create(json: &str, name_version: &str) -> ClientResult<Option<String>> {
    let root: Value = serde_json::from_str(json)?;
    let nodes = root
        .pointer("/graph/nodes")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("create output has no graph nodes"))?;

    Ok(nodes.values().find_map(|node| {
        let reference = node.get("ref")?.as_str()?;
        if !same_recipe(reference, name_version) {
            return None;
        }
        node.get("package_id")?.as_str().map(str::to_string)
    }))
}
