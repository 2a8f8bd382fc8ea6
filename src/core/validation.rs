//! Validation for request scopes and members
//!
//! Scopes are resource-hierarchy paths whose first segment selects the
//! policy store: `organizations/…`, `folders/…` or `projects/…`.
//! Members must be users identified by e-mail, `user:<email>`.

use crate::core::error::ValidationErrors;
use crate::core::request::IamRequest;
use std::fmt;
use validator::ValidateEmail;

/// The only member kind accepted in requests
pub const USER_MEMBER_KIND: &str = "user";

/// Level of the resource hierarchy a scope points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Organizations,
    Folders,
    Projects,
}

impl ScopeKind {
    /// Select the hierarchy level from the first path segment
    ///
    /// # Examples
    ///
    /// ```
    /// use aod_rs::ScopeKind;
    ///
    /// assert_eq!(ScopeKind::from_scope("projects/foo"), Some(ScopeKind::Projects));
    /// assert_eq!(ScopeKind::from_scope("folders/123/bar"), Some(ScopeKind::Folders));
    /// assert_eq!(ScopeKind::from_scope("buckets/foo"), None);
    /// ```
    pub fn from_scope(scope: &str) -> Option<Self> {
        match scope.split('/').next() {
            Some("organizations") => Some(ScopeKind::Organizations),
            Some("folders") => Some(ScopeKind::Folders),
            Some("projects") => Some(ScopeKind::Projects),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScopeKind::Organizations => "organizations",
            ScopeKind::Folders => "folders",
            ScopeKind::Projects => "projects",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check a single member, returning every problem found with it
pub fn validate_member(member: &str) -> Vec<String> {
    let Some((kind, email)) = member.split_once(':') else {
        return vec![format!(
            "member {:?} is not a valid format (expected \"user:<email>\")",
            member
        )];
    };

    let mut problems = Vec::new();
    if kind != USER_MEMBER_KIND {
        problems.push(format!(
            "member {:?} is not of \"user\" type (got {:?})",
            member, kind
        ));
    }
    if !email.to_string().validate_email() {
        problems.push(format!(
            "member {:?} does not appear to be a valid email address (got {:?})",
            member, email
        ));
    }
    problems
}

/// Validate a whole request, collecting every problem rather than stopping at the first
pub fn validate_request(request: &IamRequest) -> Result<(), ValidationErrors> {
    let mut problems = Vec::new();

    if request.resource_policies.is_empty() {
        problems.push("policies not found".to_string());
    }

    for policy in &request.resource_policies {
        if ScopeKind::from_scope(&policy.scope).is_none() {
            problems.push(format!(
                "resource {:?} isn't one of [organizations, folders, projects]",
                policy.scope
            ));
        }

        for binding in &policy.bindings {
            for member in &binding.members {
                problems.extend(validate_member(member));
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(problems))
    }
}
