//! Engine implementation
//!
//! Leaves first: `iam` holds the policy model, expiry codec and reconciler;
//! `retry` and `store` wrap the remote I/O; `handler` ties them together
//! per scope.

pub mod audit;
pub mod config;
pub mod error;
pub mod handler;
pub mod iam;
pub mod request;
pub mod retry;
pub mod store;
pub mod validation;
