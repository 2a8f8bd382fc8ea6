//! Access request documents
//!
//! A request lists, per resource scope, the role bindings to grant or
//! revoke. Requests are read from YAML files of at most 64,000 bytes.

use crate::core::error::{AodError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Largest request file accepted, in bytes
pub const MAX_REQUEST_BYTES: u64 = 64 * 1_000;

/// Members to bind to a role
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingRequest {
    /// Principals in `user:<email>` form
    #[serde(default)]
    pub members: BTreeSet<String>,

    pub role: String,
}

impl BindingRequest {
    pub fn new<I, S>(role: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BindingRequest {
            members: members.into_iter().map(Into::into).collect(),
            role: role.into(),
        }
    }
}

/// Bindings requested for one scope
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourcePolicyRequest {
    /// Hierarchy path such as `projects/my-project`
    #[serde(rename = "resource")]
    pub scope: String,

    #[serde(default)]
    pub bindings: Vec<BindingRequest>,
}

impl ResourcePolicyRequest {
    pub fn new(scope: impl Into<String>, bindings: Vec<BindingRequest>) -> Self {
        ResourcePolicyRequest {
            scope: scope.into(),
            bindings,
        }
    }
}

/// A full request across any number of scopes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IamRequest {
    #[serde(rename = "policies", default)]
    pub resource_policies: Vec<ResourcePolicyRequest>,
}

impl IamRequest {
    pub fn new(resource_policies: Vec<ResourcePolicyRequest>) -> Self {
        IamRequest { resource_policies }
    }

    /// Parse a request from YAML text; empty input is an empty request
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(IamRequest::default());
        }
        serde_yaml::from_str(text).map_err(|source| AodError::Yaml {
            target: "IamRequest",
            source,
        })
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|source| AodError::Yaml {
            target: "IamRequest",
            source,
        })
    }
}

/// Read a request from a file, ignoring anything past [`MAX_REQUEST_BYTES`]
pub fn read_request_from_path(path: impl AsRef<Path>) -> Result<IamRequest> {
    let path = path.as_ref();
    let io_err = |source| AodError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    let mut text = String::new();
    file.take(MAX_REQUEST_BYTES)
        .read_to_string(&mut text)
        .map_err(io_err)?;

    IamRequest::from_yaml(&text)
}
