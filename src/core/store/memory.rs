//! In-process policy store
//!
//! Keeps one policy per scope behind a lock. Failures can be scripted per
//! operation so callers can exercise retry and partial-failure paths.
//! Written policies get a fresh etag (hex SHA-256 of the stored document);
//! a write carrying a stale etag is rejected as `Aborted`.

use super::{GetPolicyOptions, PolicyStore};
use crate::core::error::{StoreError, StoreErrorKind};
use crate::core::iam::Policy;
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

#[derive(Debug, Default)]
struct MemoryState {
    policies: HashMap<String, Policy>,
    get_failures: VecDeque<StoreError>,
    set_failures: VecDeque<StoreError>,
    always_fail_set: Option<StoreError>,
    get_calls: usize,
    set_calls: usize,
}

/// Policy store backed by a `HashMap`
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    state: Mutex<MemoryState>,
}

fn compute_etag(policy: &Policy) -> String {
    let mut unversioned = policy.clone();
    unversioned.etag.clear();
    let bytes = serde_json::to_vec(&unversioned).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the policy of a scope, assigning it an etag
    pub fn insert(&self, scope: impl Into<String>, mut policy: Policy) {
        policy.etag = compute_etag(&policy);
        self.state.lock().policies.insert(scope.into(), policy);
    }

    /// Current stored policy of a scope
    pub fn policy(&self, scope: &str) -> Option<Policy> {
        self.state.lock().policies.get(scope).cloned()
    }

    /// Fail the next fetch with `error`; queued failures are used in order
    pub fn fail_next_get(&self, error: StoreError) {
        self.state.lock().get_failures.push_back(error);
    }

    /// Fail the next write with `error`; queued failures are used in order
    pub fn fail_next_set(&self, error: StoreError) {
        self.state.lock().set_failures.push_back(error);
    }

    /// Fail every write with `error`
    pub fn fail_all_sets(&self, error: StoreError) {
        self.state.lock().always_fail_set = Some(error);
    }

    pub fn get_calls(&self) -> usize {
        self.state.lock().get_calls
    }

    pub fn set_calls(&self) -> usize {
        self.state.lock().set_calls
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn get_policy(
        &self,
        scope: &str,
        _options: GetPolicyOptions,
    ) -> Result<Policy, StoreError> {
        let mut state = self.state.lock();
        state.get_calls += 1;
        if let Some(error) = state.get_failures.pop_front() {
            return Err(error);
        }
        Ok(state.policies.get(scope).cloned().unwrap_or_default())
    }

    async fn set_policy(&self, scope: &str, policy: &Policy) -> Result<Policy, StoreError> {
        let mut state = self.state.lock();
        state.set_calls += 1;
        if let Some(error) = state.set_failures.pop_front() {
            return Err(error);
        }
        if let Some(error) = &state.always_fail_set {
            return Err(error.clone());
        }

        let current_etag = state
            .policies
            .get(scope)
            .map(|p| p.etag.as_str())
            .unwrap_or_default();
        if !policy.etag.is_empty() && policy.etag != current_etag {
            return Err(StoreError::new(
                StoreErrorKind::Aborted,
                format!("etag {} does not match current etag for {}", policy.etag, scope),
            ));
        }

        let mut stored = policy.clone();
        stored.etag = compute_etag(&stored);
        debug!(scope, etag = %stored.etag, "stored policy");
        state.policies.insert(scope.to_string(), stored.clone());
        Ok(stored)
    }
}
