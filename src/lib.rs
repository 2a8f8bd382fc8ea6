//! # aod-rs - Time-bound IAM grants
//!
//! `aod-rs` grants principals temporary access to organizations, folders and
//! projects and removes it again once it is no longer needed. Every grant is
//! a conditional IAM binding whose condition expires at a fixed instant:
//!
//! - **Reconciliation** of fetched policies: merge new grants, drop expired
//!   ones, strip revoked members
//! - **Foreign bindings** (anything without the managed condition title) are
//!   never touched
//! - **Retries** with Fibonacci backoff around each scope's
//!   fetch-reconcile-write cycle
//! - **Partial failure**: one scope failing never blocks the others
//!
//! ## Quick Start
//!
//! ```rust
//! use aod_rs::{Expiry, IamHandler, IamRequest, MemoryPolicyStore};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> aod_rs::Result<()> {
//! let request = IamRequest::from_yaml(
//!     r#"
//! policies:
//!   - resource: projects/my-project
//!     bindings:
//!       - role: roles/viewer
//!         members:
//!           - user:alice@example.com
//! "#,
//! )?;
//!
//! let store = Arc::new(MemoryPolicyStore::new());
//! let handler = IamHandler::builder().stores(store.clone()).build()?;
//!
//! let expiry = Expiry::new(chrono::Utc::now() + chrono::Duration::hours(2));
//! let report = handler.grant(&request, expiry, &CancellationToken::new()).await;
//! assert!(report.is_success());
//!
//! let policy = store.policy("projects/my-project").unwrap();
//! assert_eq!(policy.version, 3);
//! # Ok(())
//! # }
//! ```
//!
//! ## Pure reconciliation
//!
//! The reconciler works on policy values alone and can be used without any
//! store:
//!
//! ```rust
//! use aod_rs::{add_bindings, BindingRequest, Expiry, ManagedCondition, Policy};
//! use chrono::{Duration, Utc};
//!
//! let now = Utc::now();
//! let requested = [BindingRequest::new("roles/viewer", ["user:bob@example.com"])];
//! let result = add_bindings(
//!     Policy::new(),
//!     &requested,
//!     &Expiry::new(now + Duration::hours(1)),
//!     &ManagedCondition::default(),
//!     now,
//! );
//! assert_eq!(result.policy.bindings.len(), 1);
//! assert!(result.warnings.is_empty());
//! ```

pub mod core;

pub use crate::core::audit::{policy_delta, BindingDelta, DeltaAction};
pub use crate::core::config::{AodConfig, ConditionConfig, StoreConfig};
pub use crate::core::error::{
    AodError, ExpiryDecodeError, ExpiryRangeError, ReconcileError, Result, ScopeError, StoreError, StoreErrorKind,
    ValidationErrors,
};
pub use crate::core::handler::{IamHandler, IamHandlerBuilder, IamResponse, ReconcileReport};
pub use crate::core::iam::{
    add_bindings, remove_bindings, Binding, BindingWarning, Condition, Expiry, ManagedCondition,
    Policy, Reconciliation, CONDITIONAL_POLICY_VERSION, DEFAULT_CONDITION_TITLE,
};
pub use crate::core::request::{
    read_request_from_path, BindingRequest, IamRequest, ResourcePolicyRequest, MAX_REQUEST_BYTES,
};
pub use crate::core::retry::{retry, FibonacciBackoff, RetryConfig, RetryError, Retryable};
pub use crate::core::store::{
    GetPolicyOptions, MemoryPolicyStore, PolicyStore, RestPolicyStore, DEFAULT_ENDPOINT,
};
pub use crate::core::validation::{validate_member, validate_request, ScopeKind, USER_MEMBER_KIND};
