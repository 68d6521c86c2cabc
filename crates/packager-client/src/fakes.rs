//! In-memory package client (testing only)
//!
//! `MemoryRemote` keeps a local cache and any number of named remotes in
//! memory. Builds register packages locally, uploads copy them to a remote,
//! and search/remove operate on the remote copy.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use packager_core::{BuildConfiguration, PackageReference, Secret};

use crate::client::{
    pattern_matches, ClientApi, CreateOutcome, CreateRequest, PackageClient, PackageInfo,
    RecipeMatch,
};
use crate::error::{ClientError, ClientResult};

/// Recipe text → package id → package.
type Registry = BTreeMap<String, BTreeMap<String, PackageInfo>>;

#[derive(Debug, Default)]
struct RemoteState {
    url: String,
    recipes: Registry,
}

#[derive(Debug, Default)]
struct State {
    local: Registry,
    remotes: BTreeMap<String, RemoteState>,
    credentials: BTreeMap<String, (String, String)>,
    logged_in: BTreeSet<String>,
    failing: Vec<(String, String)>,
    config_installs: Vec<String>,
    creates: usize,
    uploads: usize,
}

/// In-memory [`PackageClient`].
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept `user`/`password` on `remote`. Remotes without an entry
    /// accept any login.
    pub fn with_credentials(self, remote: &str, user: &str, password: &str) -> Self {
        self.lock()
            .credentials
            .insert(remote.to_string(), (user.to_string(), password.to_string()));
        self
    }

    /// Make every build whose settings contain `key=value` fail.
    pub fn failing_when(self, key: &str, value: &str) -> Self {
        self.lock().failing.push((key.to_string(), value.to_string()));
        self
    }

    /// Number of successful `create` calls.
    pub fn creates(&self) -> usize {
        self.lock().creates
    }

    /// Number of successful `upload` calls.
    pub fn uploads(&self) -> usize {
        self.lock().uploads
    }

    /// URL registered for a remote.
    pub fn remote_url(&self, name: &str) -> Option<String> {
        self.lock().remotes.get(name).map(|r| r.url.clone())
    }

    /// URLs passed to `config_install`, in order.
    pub fn config_installs(&self) -> Vec<String> {
        self.lock().config_installs.clone()
    }

    /// Package ids in the local cache for a recipe.
    pub fn local_packages(&self, reference: &PackageReference) -> Vec<String> {
        self.lock()
            .local
            .get(&reference.to_string())
            .map(|pkgs| pkgs.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means another test thread panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn recipe_matches(registry: &Registry, pattern: &str) -> Vec<String> {
    registry
        .keys()
        .filter(|r| pattern_matches(pattern, r) || pattern_matches(pattern, r.trim_end_matches('@')))
        .cloned()
        .collect()
}

#[async_trait]
impl PackageClient for MemoryRemote {
    fn api(&self) -> ClientApi {
        ClientApi::V2
    }

    async fn version(&self) -> ClientResult<String> {
        Ok("2.0.0-memory".to_string())
    }

    async fn create(&self, request: &CreateRequest) -> ClientResult<CreateOutcome> {
        let mut state = self.lock();
        let fails = state
            .failing
            .iter()
            .any(|(k, v)| request.settings.get(k) == Some(v));
        if fails {
            return Ok(CreateOutcome {
                exit_code: 1,
                package_id: None,
                tail: vec!["ERROR: build failed".to_string()],
            });
        }

        let id = BuildConfiguration::new(request.settings.clone())
            .with_options(request.options.clone())
            .id()
            .as_str()
            .to_string();
        let package = PackageInfo {
            id: id.clone(),
            settings: request.settings.clone(),
            options: request.options.clone(),
        };
        state
            .local
            .entry(request.reference.to_string())
            .or_default()
            .insert(id.clone(), package);
        state.creates += 1;

        Ok(CreateOutcome {
            exit_code: 0,
            package_id: Some(id.clone()),
            tail: vec![format!("{}: Package '{id}' created", request.reference)],
        })
    }

    async fn add_remote(&self, name: &str, url: &str) -> ClientResult<()> {
        let mut state = self.lock();
        state.remotes.entry(name.to_string()).or_default().url = url.to_string();
        Ok(())
    }

    async fn authenticate(&self, remote: &str, user: &str, password: &Secret) -> ClientResult<()> {
        let mut state = self.lock();
        if !state.remotes.contains_key(remote) {
            return Err(ClientError::RemoteNotFound(remote.to_string()));
        }
        if let Some((expected_user, expected_password)) = state.credentials.get(remote) {
            if expected_user != user || expected_password != password.expose() {
                return Err(ClientError::AuthenticationFailed {
                    remote: remote.to_string(),
                    user: user.to_string(),
                });
            }
        }
        state.logged_in.insert(remote.to_string());
        Ok(())
    }

    async fn upload(
        &self,
        reference: &PackageReference,
        package_id: Option<&str>,
        remote: &str,
        _retry: u32,
    ) -> ClientResult<()> {
        let mut state = self.lock();
        let state = &mut *state;
        if !state.remotes.contains_key(remote) {
            return Err(ClientError::RemoteNotFound(remote.to_string()));
        }
        if state.credentials.contains_key(remote) && !state.logged_in.contains(remote) {
            return Err(ClientError::NotAuthenticated(remote.to_string()));
        }

        let key = reference.to_string();
        let local = state
            .local
            .get(&key)
            .ok_or_else(|| ClientError::NotFound(key.clone()))?;
        let packages: Vec<PackageInfo> = match package_id {
            Some(id) => vec![local
                .get(id)
                .cloned()
                .ok_or_else(|| ClientError::NotFound(format!("{key}:{id}")))?],
            None => local.values().cloned().collect(),
        };

        let target = state
            .remotes
            .get_mut(remote)
            .ok_or_else(|| ClientError::RemoteNotFound(remote.to_string()))?
            .recipes
            .entry(key)
            .or_default();
        for package in packages {
            target.insert(package.id.clone(), package);
        }
        state.uploads += 1;
        Ok(())
    }

    async fn search_recipes(&self, pattern: &str, remote: &str) -> ClientResult<Vec<RecipeMatch>> {
        let state = self.lock();
        let remote = state
            .remotes
            .get(remote)
            .ok_or_else(|| ClientError::RemoteNotFound(remote.to_string()))?;
        Ok(recipe_matches(&remote.recipes, pattern)
            .into_iter()
            .map(|reference| RecipeMatch {
                reference,
                packages: Vec::new(),
            })
            .collect())
    }

    async fn search_packages(
        &self,
        reference: &PackageReference,
        remote: &str,
    ) -> ClientResult<Vec<PackageInfo>> {
        let state = self.lock();
        let remote = state
            .remotes
            .get(remote)
            .ok_or_else(|| ClientError::RemoteNotFound(remote.to_string()))?;
        Ok(remote
            .recipes
            .get(&reference.to_string())
            .map(|pkgs| pkgs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn remove(&self, pattern: &str, remote: &str) -> ClientResult<Vec<String>> {
        let mut state = self.lock();
        let state = &mut *state;
        if state.credentials.contains_key(remote) && !state.logged_in.contains(remote) {
            return Err(ClientError::NotAuthenticated(remote.to_string()));
        }
        let remote = state
            .remotes
            .get_mut(remote)
            .ok_or_else(|| ClientError::RemoteNotFound(remote.to_string()))?;
        let removed = recipe_matches(&remote.recipes, pattern);
        for reference in &removed {
            remote.recipes.remove(reference);
        }
        Ok(removed)
    }

    async fn config_install(&self, url: &str) -> ClientResult<()> {
        self.lock().config_installs.push(url.to_string());
        Ok(())
    }
}
