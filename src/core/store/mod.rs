//! Policy store clients
//!
//! One client is supplied per resource-hierarchy level. Clients only move
//! documents; they never merge or interpret bindings.

mod memory;
mod rest;

pub use memory::MemoryPolicyStore;
pub use rest::{RestPolicyStore, DEFAULT_ENDPOINT};

use crate::core::error::StoreError;
use crate::core::iam::{Policy, CONDITIONAL_POLICY_VERSION};
use async_trait::async_trait;

/// Options sent with a policy fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetPolicyOptions {
    /// Highest policy schema version the caller understands
    pub requested_policy_version: i32,
}

impl Default for GetPolicyOptions {
    fn default() -> Self {
        GetPolicyOptions {
            requested_policy_version: CONDITIONAL_POLICY_VERSION,
        }
    }
}

/// Read and write access to the policy document of a scope
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get_policy(
        &self,
        scope: &str,
        options: GetPolicyOptions,
    ) -> Result<Policy, StoreError>;

    /// Replace the policy; returns the document as stored
    async fn set_policy(&self, scope: &str, policy: &Policy) -> Result<Policy, StoreError>;
}
