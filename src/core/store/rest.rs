//! Resource Manager REST client
//!
//! Speaks the `v3` JSON surface: `POST {endpoint}{scope}:getIamPolicy` and
//! `POST {endpoint}{scope}:setIamPolicy`. HTTP failures are mapped onto
//! [`StoreErrorKind`] so the retry loop can tell transient from permanent.

use super::{GetPolicyOptions, PolicyStore};
use crate::core::error::{AodError, StoreError, StoreErrorKind};
use crate::core::iam::Policy;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, trace};

pub const DEFAULT_ENDPOINT: &str = "https://cloudresourcemanager.googleapis.com/v3/";

/// Policy store talking to a Resource Manager compatible HTTP endpoint
#[derive(Debug, Clone)]
pub struct RestPolicyStore {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl RestPolicyStore {
    /// Build a client; `endpoint` gets a trailing slash if it lacks one
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AodError> {
        let mut endpoint = endpoint.into();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(RestPolicyStore {
            client,
            endpoint,
            token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, scope: &str, method: &str) -> String {
        format!("{}{}:{}", self.endpoint, scope, method)
    }

    async fn call(
        &self,
        scope: &str,
        method: &str,
        body: serde_json::Value,
    ) -> Result<Policy, StoreError> {
        let url = self.url(scope, method);
        debug!(%url, "calling policy store");

        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        trace!(%status, body = %text, "policy store response");

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|e| e.error.message)
                .ok()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("{} returned {}", method, status));
            return Err(StoreError::new(kind_for_status(status), message));
        }

        serde_json::from_str(&text).map_err(|e| {
            StoreError::new(
                StoreErrorKind::Internal,
                format!("malformed policy in {} response: {}", method, e),
            )
        })
    }
}

/// Map an HTTP status onto a store error kind
pub(crate) fn kind_for_status(status: StatusCode) -> StoreErrorKind {
    match status.as_u16() {
        400 => StoreErrorKind::InvalidArgument,
        401 => StoreErrorKind::Unauthenticated,
        403 => StoreErrorKind::PermissionDenied,
        404 => StoreErrorKind::NotFound,
        409 => StoreErrorKind::Aborted,
        412 => StoreErrorKind::FailedPrecondition,
        429 => StoreErrorKind::ResourceExhausted,
        500 => StoreErrorKind::Internal,
        503 => StoreErrorKind::Unavailable,
        504 => StoreErrorKind::DeadlineExceeded,
        code if code >= 500 => StoreErrorKind::Unavailable,
        _ => StoreErrorKind::InvalidArgument,
    }
}

fn transport_error(err: reqwest::Error) -> StoreError {
    let kind = if err.is_timeout() {
        StoreErrorKind::DeadlineExceeded
    } else if err.is_decode() {
        StoreErrorKind::Internal
    } else {
        StoreErrorKind::Unavailable
    };
    StoreError::new(kind, err.to_string())
}

#[async_trait]
impl PolicyStore for RestPolicyStore {
    async fn get_policy(
        &self,
        scope: &str,
        options: GetPolicyOptions,
    ) -> Result<Policy, StoreError> {
        let body = json!({
            "options": { "requestedPolicyVersion": options.requested_policy_version }
        });
        self.call(scope, "getIamPolicy", body).await
    }

    async fn set_policy(&self, scope: &str, policy: &Policy) -> Result<Policy, StoreError> {
        self.call(scope, "setIamPolicy", json!({ "policy": policy })).await
    }
}
