//! Identity and Access Management (IAM) policy reconciliation
//!
//! Provides the pieces that operate on a single policy document:
//! - Policy, binding and condition types matching the store's JSON shape
//! - The expiry codec for managed conditions
//! - Pure add/remove passes over a fetched policy

mod condition;
mod policy;
mod reconcile;

pub use condition::{Expiry, ManagedCondition, DEFAULT_CONDITION_TITLE};
pub use policy::{Binding, Condition, Policy, CONDITIONAL_POLICY_VERSION};
pub use reconcile::{add_bindings, remove_bindings, BindingWarning, Reconciliation};
