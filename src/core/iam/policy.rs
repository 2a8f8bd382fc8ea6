//! IAM policy document structure
//!
//! Mirrors the JSON shape used by resource-hierarchy policy stores: a policy
//! is a list of role bindings, each optionally gated by a condition.
//! Conditional bindings are only understood by policy version 3.

use serde::{Deserialize, Serialize};

/// Policy schema version that supports conditional bindings
pub const CONDITIONAL_POLICY_VERSION: i32 = 3;

/// Boolean predicate gating a binding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    pub expression: String,
}

/// Association of a role with a set of principals
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    /// Role identifier, e.g. `roles/viewer`
    pub role: String,

    /// Principals in `kind:identifier` form
    #[serde(default)]
    pub members: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl Binding {
    /// True if this binding carries a condition with the given title
    pub fn is_managed_by(&self, title: &str) -> bool {
        self.condition.as_ref().is_some_and(|c| c.title == title)
    }
}

/// A complete policy document for one scope
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Policy schema version (0, 1 or 3)
    #[serde(default)]
    pub version: i32,

    #[serde(default)]
    pub bindings: Vec<Binding>,

    /// Opaque concurrency token returned by the store, sent back on write
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
}

impl Policy {
    /// Create a new empty policy
    pub fn new() -> Self {
        Policy::default()
    }

    /// Add a binding to this policy
    pub fn add_binding(&mut self, binding: Binding) {
        self.bindings.push(binding);
    }

    /// True if any binding is gated by a condition
    pub fn has_conditions(&self) -> bool {
        self.bindings.iter().any(|b| b.condition.is_some())
    }

    /// Parse policy from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize policy to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
