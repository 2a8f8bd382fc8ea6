//! Request handling across resource scopes
//!
//! [`IamHandler`] dispatches every scope of a request to the store for its
//! hierarchy level and runs one retried fetch-reconcile-write cycle per
//! scope. Distinct scopes run concurrently; entries repeating a scope run one
//! after another. A failure is recorded against its scope and the others
//! carry on.

use crate::core::audit::{policy_delta, BindingDelta};
use crate::core::config::AodConfig;
use crate::core::error::{AodError, ReconcileError, Result, ScopeError, StoreError};
use crate::core::iam::{
    add_bindings, remove_bindings, Expiry, ManagedCondition, Policy, Reconciliation,
};
use crate::core::request::{BindingRequest, IamRequest, ResourcePolicyRequest};
use crate::core::retry::{retry, RetryConfig, RetryError, Retryable};
use crate::core::store::{GetPolicyOptions, PolicyStore};
use crate::core::validation::ScopeKind;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of a successfully written scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IamResponse {
    pub resource: String,
    /// Policy as stored after the write
    pub policy: Policy,
    /// Managed bindings left in place because their expiry was unreadable
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<BindingDelta>,
}

/// Per-scope results of one request
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Completed scopes, in request order
    pub responses: Vec<IamResponse>,
    /// Failed scopes, in request order
    pub failures: Vec<ScopeError>,
}

impl ReconcileReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Every failure joined into one error, if any scope failed
    pub fn error(&self) -> Option<ReconcileError> {
        if self.failures.is_empty() {
            None
        } else {
            Some(ReconcileError {
                failures: self.failures.clone(),
            })
        }
    }

    /// The completed scopes, or every failure joined into one error
    pub fn into_result(self) -> Result<Vec<IamResponse>> {
        if self.failures.is_empty() {
            Ok(self.responses)
        } else {
            Err(AodError::Reconcile(ReconcileError {
                failures: self.failures,
            }))
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Mode<'a> {
    Grant(&'a Expiry),
    Revoke,
}

/// Failure of one step inside a reconciliation attempt
#[derive(Debug)]
struct StepError {
    operation: &'static str,
    source: StoreError,
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to {} IAM policy: {}", self.operation, self.source)
    }
}

impl Retryable for StepError {
    fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

struct Attempt {
    written: Policy,
    reconciliation: Reconciliation,
    changes: Vec<BindingDelta>,
}

/// Applies IAM requests against organization, folder and project stores
pub struct IamHandler {
    organizations: Arc<dyn PolicyStore>,
    folders: Arc<dyn PolicyStore>,
    projects: Arc<dyn PolicyStore>,
    retry: RetryConfig,
    condition: ManagedCondition,
    max_concurrency: usize,
}

impl fmt::Debug for IamHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IamHandler")
            .field("retry", &self.retry)
            .field("condition", &self.condition)
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

impl IamHandler {
    pub fn builder() -> IamHandlerBuilder {
        IamHandlerBuilder::new()
    }

    pub fn condition(&self) -> &ManagedCondition {
        &self.condition
    }

    /// Grant every binding of `request` until `expiry`
    pub async fn grant(
        &self,
        request: &IamRequest,
        expiry: Expiry,
        cancel: &CancellationToken,
    ) -> ReconcileReport {
        info!(
            scopes = request.resource_policies.len(),
            expiry = %expiry.at(),
            "granting IAM bindings"
        );
        self.run(request, Mode::Grant(&expiry), cancel).await
    }

    /// Remove every binding of `request` and sweep expired grants
    pub async fn revoke(
        &self,
        request: &IamRequest,
        cancel: &CancellationToken,
    ) -> ReconcileReport {
        info!(
            scopes = request.resource_policies.len(),
            "removing IAM bindings"
        );
        self.run(request, Mode::Revoke, cancel).await
    }

    async fn run(
        &self,
        request: &IamRequest,
        mode: Mode<'_>,
        cancel: &CancellationToken,
    ) -> ReconcileReport {
        // entries naming the same scope share one document and run in turn
        let mut groups: Vec<Vec<(usize, &ResourcePolicyRequest)>> = Vec::new();
        let mut slots: HashMap<&str, usize> = HashMap::new();
        for (index, policy_request) in request.resource_policies.iter().enumerate() {
            let slot = *slots
                .entry(policy_request.scope.as_str())
                .or_insert_with(|| {
                    groups.push(Vec::new());
                    groups.len() - 1
                });
            groups[slot].push((index, policy_request));
        }

        let grouped: Vec<Vec<_>> = stream::iter(groups)
            .map(|entries| async move {
                let mut results = Vec::with_capacity(entries.len());
                for (index, policy_request) in entries {
                    results.push((index, self.handle_scope(policy_request, mode, cancel).await));
                }
                results
            })
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut results: Vec<_> = grouped.into_iter().flatten().collect();
        results.sort_by_key(|(index, _)| *index);

        let mut report = ReconcileReport::default();
        for (_, result) in results {
            match result {
                Ok(response) => report.responses.push(response),
                Err(error) => {
                    warn!(scope = error.scope(), error = %error, "scope failed");
                    report.failures.push(error);
                }
            }
        }
        report
    }

    fn store_for(&self, kind: ScopeKind) -> &dyn PolicyStore {
        match kind {
            ScopeKind::Organizations => self.organizations.as_ref(),
            ScopeKind::Folders => self.folders.as_ref(),
            ScopeKind::Projects => self.projects.as_ref(),
        }
    }

    async fn handle_scope(
        &self,
        policy_request: &ResourcePolicyRequest,
        mode: Mode<'_>,
        cancel: &CancellationToken,
    ) -> std::result::Result<IamResponse, ScopeError> {
        let scope = policy_request.scope.as_str();
        let Some(kind) = ScopeKind::from_scope(scope) else {
            return Err(ScopeError::InvalidScope {
                scope: scope.to_string(),
            });
        };
        let store = self.store_for(kind);
        let bindings = policy_request.bindings.as_slice();
        let condition = &self.condition;

        info!(scope, kind = %kind, "reconciling policy");

        let outcome = retry(&self.retry, cancel, |attempt| {
            reconcile_once(store, scope, bindings, mode, condition, attempt)
        })
        .await;

        match outcome {
            Ok(attempt) => {
                for warning in &attempt.reconciliation.warnings {
                    warn!(scope, role = %warning.role, error = %warning.error, "kept binding with unreadable expiry");
                }
                info!(scope, changes = attempt.changes.len(), "policy written");
                Ok(IamResponse {
                    resource: scope.to_string(),
                    policy: attempt.written,
                    warnings: attempt
                        .reconciliation
                        .warnings
                        .iter()
                        .map(ToString::to_string)
                        .collect(),
                    changes: attempt.changes,
                })
            }
            Err(RetryError::Cancelled) => Err(ScopeError::Cancelled {
                scope: scope.to_string(),
            }),
            Err(RetryError::Permanent { error, .. }) => Err(ScopeError::Store {
                scope: scope.to_string(),
                operation: error.operation,
                source: error.source,
            }),
            Err(RetryError::Exhausted { attempts, last }) => Err(ScopeError::RetriesExhausted {
                scope: scope.to_string(),
                attempts,
                source: last.source,
            }),
        }
    }
}

/// One fetch-reconcile-write cycle; the policy is fetched fresh every time
async fn reconcile_once(
    store: &dyn PolicyStore,
    scope: &str,
    bindings: &[BindingRequest],
    mode: Mode<'_>,
    condition: &ManagedCondition,
    attempt: u32,
) -> std::result::Result<Attempt, StepError> {
    debug!(scope, attempt, "fetching policy");
    let fetched = store
        .get_policy(scope, GetPolicyOptions::default())
        .await
        .map_err(|source| StepError {
            operation: "get",
            source,
        })?;

    let now = Utc::now();
    let reconciliation = match mode {
        Mode::Grant(expiry) => add_bindings(fetched.clone(), bindings, expiry, condition, now),
        Mode::Revoke => remove_bindings(fetched.clone(), bindings, condition, now),
    };

    debug!(scope, attempt, bindings = reconciliation.policy.bindings.len(), "writing policy");
    let written = store
        .set_policy(scope, &reconciliation.policy)
        .await
        .map_err(|source| StepError {
            operation: "set",
            source,
        })?;

    let changes = policy_delta(&fetched, &written);
    Ok(Attempt {
        written,
        reconciliation,
        changes,
    })
}

/// Builder for [`IamHandler`]
///
/// # Examples
///
/// ```
/// use aod_rs::{IamHandler, MemoryPolicyStore};
/// use std::sync::Arc;
///
/// let store = Arc::new(MemoryPolicyStore::new());
/// let handler = IamHandler::builder()
///     .stores(store)
///     .condition_title("break-glass")
///     .build()
///     .unwrap();
/// assert_eq!(handler.condition().title, "break-glass");
/// ```
pub struct IamHandlerBuilder {
    organizations: Option<Arc<dyn PolicyStore>>,
    folders: Option<Arc<dyn PolicyStore>>,
    projects: Option<Arc<dyn PolicyStore>>,
    retry: RetryConfig,
    condition: ManagedCondition,
    max_concurrency: usize,
}

impl IamHandlerBuilder {
    pub fn new() -> Self {
        let defaults = AodConfig::default();
        IamHandlerBuilder {
            organizations: None,
            folders: None,
            projects: None,
            retry: defaults.retry.clone(),
            condition: defaults.managed_condition(),
            max_concurrency: defaults.max_concurrency,
        }
    }

    /// Take retry, condition and concurrency settings from `config`
    pub fn config(mut self, config: &AodConfig) -> Self {
        self.retry = config.retry.clone();
        self.condition = config.managed_condition();
        self.max_concurrency = config.max_concurrency;
        self
    }

    /// Use one store for every hierarchy level
    pub fn stores(self, store: Arc<dyn PolicyStore>) -> Self {
        self.organizations(store.clone())
            .folders(store.clone())
            .projects(store)
    }

    pub fn organizations(mut self, store: Arc<dyn PolicyStore>) -> Self {
        self.organizations = Some(store);
        self
    }

    pub fn folders(mut self, store: Arc<dyn PolicyStore>) -> Self {
        self.folders = Some(store);
        self
    }

    pub fn projects(mut self, store: Arc<dyn PolicyStore>) -> Self {
        self.projects = Some(store);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn condition(mut self, condition: ManagedCondition) -> Self {
        self.condition = condition;
        self
    }

    /// Override only the condition title, keeping the description
    pub fn condition_title(mut self, title: impl Into<String>) -> Self {
        self.condition.title = title.into();
        self
    }

    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn build(self) -> Result<IamHandler> {
        let missing = |level: &str| AodError::InvalidConfig(format!("{} store must be set", level));

        let organizations = self.organizations.ok_or_else(|| missing("organizations"))?;
        let folders = self.folders.ok_or_else(|| missing("folders"))?;
        let projects = self.projects.ok_or_else(|| missing("projects"))?;

        if self.condition.title.trim().is_empty() {
            return Err(AodError::InvalidConfig(
                "condition title must not be empty".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(AodError::InvalidConfig(
                "max_concurrency must be at least 1".to_string(),
            ));
        }

        debug!(
            title = %self.condition.title,
            max_retries = self.retry.max_retries,
            max_concurrency = self.max_concurrency,
            "built IAM handler"
        );

        Ok(IamHandler {
            organizations,
            folders,
            projects,
            retry: self.retry,
            condition: self.condition,
            max_concurrency: self.max_concurrency,
        })
    }
}

impl Default for IamHandlerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryPolicyStore;

    fn viewer_request(scope: &str) -> IamRequest {
        IamRequest::new(vec![ResourcePolicyRequest::new(
            scope,
            vec![BindingRequest::new("roles/viewer", ["user:a@example.com"])],
        )])
    }

    #[test]
    fn test_builder_requires_stores() {
        let err = IamHandler::builder().build().unwrap_err();
        assert!(err.to_string().contains("organizations store must be set"));

        let store = Arc::new(MemoryPolicyStore::new());
        let err = IamHandler::builder()
            .organizations(store.clone())
            .projects(store)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("folders store must be set"));
    }

    #[test]
    fn test_builder_rejects_zero_concurrency() {
        let err = IamHandler::builder()
            .stores(Arc::new(MemoryPolicyStore::new()))
            .max_concurrency(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, AodError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_dispatch_by_scope_kind() {
        let organizations = Arc::new(MemoryPolicyStore::new());
        let folders = Arc::new(MemoryPolicyStore::new());
        let projects = Arc::new(MemoryPolicyStore::new());
        let handler = IamHandler::builder()
            .organizations(organizations.clone())
            .folders(folders.clone())
            .projects(projects.clone())
            .build()
            .unwrap();

        let expiry = Expiry::new(Utc::now() + chrono::Duration::hours(1));
        let report = handler
            .grant(&viewer_request("folders/42"), expiry, &CancellationToken::new())
            .await;

        assert!(report.is_success());
        assert_eq!(folders.set_calls(), 1);
        assert_eq!(organizations.get_calls(), 0);
        assert_eq!(projects.get_calls(), 0);
        assert_eq!(report.responses[0].resource, "folders/42");
        assert_eq!(report.responses[0].changes.len(), 1);
    }

    #[tokio::test]
    async fn test_revoke_reports_removed_members() {
        let store = Arc::new(MemoryPolicyStore::new());
        let handler = IamHandler::builder().stores(store.clone()).build().unwrap();
        let request = viewer_request("projects/p");
        let cancel = CancellationToken::new();

        let expiry = Expiry::new(Utc::now() + chrono::Duration::hours(1));
        assert!(handler.grant(&request, expiry, &cancel).await.is_success());

        let responses = handler.revoke(&request, &cancel).await.into_result().unwrap();
        assert!(responses[0].policy.bindings.is_empty());
        assert_eq!(responses[0].changes.len(), 1);
        assert_eq!(responses[0].changes[0].member, "user:a@example.com");
        assert!(store.policy("projects/p").unwrap().bindings.is_empty());
    }

    #[tokio::test]
    async fn test_into_result_joins_failures() {
        let handler = IamHandler::builder()
            .stores(Arc::new(MemoryPolicyStore::new()))
            .build()
            .unwrap();

        let err = handler
            .revoke(&viewer_request("buckets/b"), &CancellationToken::new())
            .await
            .into_result()
            .unwrap_err();
        match err {
            AodError::Reconcile(error) => assert_eq!(error.failures.len(), 1),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_response_serializes_without_empty_lists() {
        let store = Arc::new(MemoryPolicyStore::new());
        let handler = IamHandler::builder().stores(store).build().unwrap();

        let report = handler
            .revoke(&IamRequest::new(vec![ResourcePolicyRequest::new("projects/p", vec![])]), &CancellationToken::new())
            .await;

        let json = serde_json::to_value(&report.responses[0]).unwrap();
        assert_eq!(json["resource"], "projects/p");
        assert!(json.get("warnings").is_none());
        assert!(json.get("changes").is_none());
    }
}
