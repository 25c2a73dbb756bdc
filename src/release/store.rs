//! Release storage interface and the in-memory driver
//!
//! The store linearizes per release name; implementations must be safe for
//! concurrent use across reconcilers.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::release::types::Release;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("release: not found")]
    NotFound,

    #[error("release: already exists")]
    AlreadyExists,

    #[error("{0} has no deployed releases")]
    NoDeployedReleases(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Centralized not-found predicate. Typed variants are matched directly;
/// foreign backend messages are matched by the substrings the upstream
/// storage layer is known to emit.
pub fn is_not_found(err: &StoreError) -> bool {
    match err {
        StoreError::NotFound | StoreError::NoDeployedReleases(_) => true,
        StoreError::Backend(msg) => {
            msg.contains("not found") || msg.contains("has no deployed releases")
        }
        StoreError::AlreadyExists => false,
    }
}

#[async_trait]
pub trait ReleaseStore: Send + Sync {
    async fn get(&self, name: &str, version: u32) -> Result<Release, StoreError>;

    async fn create(&self, release: &Release) -> Result<(), StoreError>;

    /// Replace an existing version in place (e.g. to mark it superseded).
    async fn update(&self, release: &Release) -> Result<(), StoreError>;

    async fn delete(&self, name: &str, version: u32) -> Result<Release, StoreError>;

    /// All stored versions for a name, ascending by version. An unknown name
    /// yields an empty history, not an error.
    async fn history(&self, name: &str) -> Result<Vec<Release>, StoreError>;

    /// The currently deployed version for a name.
    async fn deployed(&self, name: &str) -> Result<Release, StoreError>;
}

/// In-memory driver keyed by `(name, version)`.
#[derive(Default)]
pub struct MemoryStore {
    releases: RwLock<HashMap<String, BTreeMap<u32, Release>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReleaseStore for MemoryStore {
    async fn get(&self, name: &str, version: u32) -> Result<Release, StoreError> {
        self.releases
            .read()
            .await
            .get(name)
            .and_then(|versions| versions.get(&version))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn create(&self, release: &Release) -> Result<(), StoreError> {
        let mut releases = self.releases.write().await;
        let versions = releases.entry(release.name.clone()).or_default();
        if versions.contains_key(&release.version) {
            return Err(StoreError::AlreadyExists);
        }
        versions.insert(release.version, release.clone());
        Ok(())
    }

    async fn update(&self, release: &Release) -> Result<(), StoreError> {
        let mut releases = self.releases.write().await;
        let versions = releases.get_mut(&release.name).ok_or(StoreError::NotFound)?;
        if !versions.contains_key(&release.version) {
            return Err(StoreError::NotFound);
        }
        versions.insert(release.version, release.clone());
        Ok(())
    }

    async fn delete(&self, name: &str, version: u32) -> Result<Release, StoreError> {
        let mut releases = self.releases.write().await;
        let versions = releases.get_mut(name).ok_or(StoreError::NotFound)?;
        let removed = versions.remove(&version).ok_or(StoreError::NotFound)?;
        if versions.is_empty() {
            releases.remove(name);
        }
        Ok(removed)
    }

    async fn history(&self, name: &str) -> Result<Vec<Release>, StoreError> {
        Ok(self
            .releases
            .read()
            .await
            .get(name)
            .map(|versions| versions.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn deployed(&self, name: &str) -> Result<Release, StoreError> {
        self.releases
            .read()
            .await
            .get(name)
            .and_then(|versions| versions.values().rev().find(|r| r.is_deployed()))
            .cloned()
            .ok_or_else(|| StoreError::NoDeployedReleases(name.to_string()))
    }
}
