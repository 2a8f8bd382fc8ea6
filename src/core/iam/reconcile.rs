//! Merge and cleanup of managed bindings
//!
//! Both passes take the fetched policy by value and return the policy to
//! write back, so a caller holding the fetched copy never sees it change.
//!
//! Rules shared by both passes:
//! - Bindings without the managed condition title are never touched.
//! - Managed bindings whose expiry has passed are dropped, whatever roles
//!   the request mentions.
//! - Managed bindings whose expiry cannot be decoded are kept as they are
//!   and reported as warnings.

use super::condition::{Expiry, ManagedCondition};
use super::policy::{Binding, Policy, CONDITIONAL_POLICY_VERSION};
use crate::core::error::ExpiryDecodeError;
use crate::core::request::BindingRequest;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

/// A managed binding whose expiry could not be determined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingWarning {
    pub role: String,
    pub error: ExpiryDecodeError,
}

impl fmt::Display for BindingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to check expiry of binding for role {}: {}",
            self.role, self.error
        )
    }
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Policy to write back
    pub policy: Policy,
    /// Non-fatal problems found while sweeping
    pub warnings: Vec<BindingWarning>,
}

/// Requested members per role, unioned across duplicate role entries
type RoleMembers<'a> = BTreeMap<&'a str, BTreeSet<&'a str>>;

fn requested_members(requested: &[BindingRequest]) -> RoleMembers<'_> {
    let mut by_role: RoleMembers<'_> = BTreeMap::new();
    for binding in requested {
        by_role
            .entry(binding.role.as_str())
            .or_default()
            .extend(binding.members.iter().map(String::as_str));
    }
    by_role
}

/// Drop expired managed bindings and strip `revoked` members from live ones
fn sweep(
    policy: Policy,
    revoked: &RoleMembers<'_>,
    title: &str,
    now: DateTime<Utc>,
) -> Reconciliation {
    let Policy {
        version,
        bindings,
        etag,
    } = policy;

    let mut warnings = Vec::new();
    let mut kept = Vec::with_capacity(bindings.len());

    for mut binding in bindings {
        let expression = binding
            .condition
            .as_ref()
            .filter(|c| c.title == title)
            .map(|c| c.expression.clone());
        let Some(expression) = expression else {
            kept.push(binding);
            continue;
        };

        let expiry = match Expiry::decode(&expression) {
            Ok(expiry) => expiry,
            Err(error) => {
                warnings.push(BindingWarning {
                    role: binding.role.clone(),
                    error,
                });
                kept.push(binding);
                continue;
            }
        };

        if expiry.is_expired_at(now) {
            debug!(role = %binding.role, expiry = %expiry.at(), "dropping expired binding");
            continue;
        }

        let Some(members) = revoked.get(binding.role.as_str()) else {
            kept.push(binding);
            continue;
        };

        binding.members.retain(|m| !members.contains(m.as_str()));
        if !binding.members.is_empty() {
            kept.push(binding);
        }
    }

    Reconciliation {
        policy: Policy {
            version,
            bindings: kept,
            etag,
        },
        warnings,
    }
}

/// Grant `requested` until `expiry`
///
/// Requested members are first removed from live managed bindings of the
/// same role, then bound again under one binding per role carrying the new
/// expiry. A live binding that already has the identical role and
/// condition absorbs the new members instead of being duplicated.
pub fn add_bindings(
    policy: Policy,
    requested: &[BindingRequest],
    expiry: &Expiry,
    managed: &ManagedCondition,
    now: DateTime<Utc>,
) -> Reconciliation {
    let wanted = requested_members(requested);
    let Reconciliation {
        mut policy,
        warnings,
    } = sweep(policy, &wanted, &managed.title, now);

    let condition = managed.for_expiry(expiry);
    for (role, members) in wanted {
        if members.is_empty() {
            continue;
        }

        let existing = policy
            .bindings
            .iter_mut()
            .find(|b| b.role == role && b.condition.as_ref() == Some(&condition));

        match existing {
            Some(binding) => {
                let merged: BTreeSet<String> = binding
                    .members
                    .drain(..)
                    .chain(members.iter().map(|m| m.to_string()))
                    .collect();
                binding.members = merged.into_iter().collect();
            }
            None => policy.add_binding(Binding {
                role: role.to_string(),
                members: members.iter().map(|m| m.to_string()).collect(),
                condition: Some(condition.clone()),
            }),
        }
    }

    policy.version = CONDITIONAL_POLICY_VERSION;
    Reconciliation { policy, warnings }
}

/// Revoke `requested` ahead of expiry and sweep expired bindings
pub fn remove_bindings(
    policy: Policy,
    requested: &[BindingRequest],
    managed: &ManagedCondition,
    now: DateTime<Utc>,
) -> Reconciliation {
    let revoked = requested_members(requested);
    let mut result = sweep(policy, &revoked, &managed.title, now);
    if result.policy.has_conditions() {
        result.policy.version = CONDITIONAL_POLICY_VERSION;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::iam::Condition;
    use chrono::Duration;

    fn managed() -> ManagedCondition {
        ManagedCondition::default()
    }

    fn managed_binding(role: &str, members: &[&str], expiry: DateTime<Utc>) -> Binding {
        Binding {
            role: role.to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
            condition: Some(managed().for_expiry(&Expiry::new(expiry))),
        }
    }

    fn plain_binding(role: &str, members: &[&str]) -> Binding {
        Binding {
            role: role.to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
            condition: None,
        }
    }

    fn policy_of(bindings: Vec<Binding>) -> Policy {
        Policy {
            version: 1,
            bindings,
            etag: "etag-1".to_string(),
        }
    }

    #[test]
    fn test_fresh_grant() {
        let now = Utc::now();
        let expiry = Expiry::new(now + Duration::hours(2));
        let requested = [BindingRequest::new("viewer", ["u2", "u1"])];

        let result = add_bindings(Policy::new(), &requested, &expiry, &managed(), now);

        assert!(result.warnings.is_empty());
        assert_eq!(result.policy.version, 3);
        assert_eq!(result.policy.bindings.len(), 1);
        let binding = &result.policy.bindings[0];
        assert_eq!(binding.role, "viewer");
        assert_eq!(binding.members, vec!["u1", "u2"]);
        let condition = binding.condition.as_ref().unwrap();
        assert_eq!(condition.title, "abcxyz-aod-expiry");
        assert_eq!(condition.expression, expiry.encode());
    }

    #[test]
    fn test_expired_bindings_swept_on_add() {
        let now = Utc::now();
        let policy = policy_of(vec![managed_binding(
            "viewer",
            &["u1"],
            now - Duration::hours(1),
        )]);
        let requested = [BindingRequest::new("editor", ["u3"])];
        let expiry = Expiry::new(now + Duration::hours(1));

        let result = add_bindings(policy, &requested, &expiry, &managed(), now);

        let roles: Vec<&str> = result.policy.bindings.iter().map(|b| b.role.as_str()).collect();
        assert_eq!(roles, vec!["editor"]);
        assert_eq!(result.policy.etag, "etag-1");
    }

    #[test]
    fn test_partial_removal_keeps_condition() {
        let now = Utc::now();
        let original = managed_binding("viewer", &["u1", "u2"], now + Duration::hours(3));
        let policy = policy_of(vec![original.clone()]);

        let result = remove_bindings(
            policy,
            &[BindingRequest::new("viewer", ["u1"])],
            &managed(),
            now,
        );

        assert_eq!(result.policy.bindings.len(), 1);
        let binding = &result.policy.bindings[0];
        assert_eq!(binding.members, vec!["u2"]);
        assert_eq!(binding.condition, original.condition);
        assert_eq!(result.policy.version, 3);
    }

    #[test]
    fn test_removal_drops_emptied_binding() {
        let now = Utc::now();
        let policy = policy_of(vec![
            managed_binding("viewer", &["u1"], now + Duration::hours(3)),
            plain_binding("owner", &["u9"]),
        ]);

        let result = remove_bindings(
            policy,
            &[BindingRequest::new("viewer", ["u1"])],
            &managed(),
            now,
        );

        assert_eq!(result.policy.bindings, vec![plain_binding("owner", &["u9"])]);
        // no conditional bindings left, so the fetched version stands
        assert_eq!(result.policy.version, 1);
    }

    #[test]
    fn test_malformed_condition_preserved() {
        let now = Utc::now();
        let malformed = Binding {
            role: "viewer".to_string(),
            members: vec!["u1".to_string()],
            condition: Some(Condition {
                title: managed().title,
                description: String::new(),
                expression: "request.time < timestamp('not-a-time')".to_string(),
            }),
        };
        let policy = policy_of(vec![malformed.clone()]);
        let expiry = Expiry::new(now + Duration::hours(1));

        let added = add_bindings(
            policy.clone(),
            &[BindingRequest::new("viewer", ["u1", "u2"])],
            &expiry,
            &managed(),
            now,
        );
        assert_eq!(added.warnings.len(), 1);
        assert_eq!(added.warnings[0].role, "viewer");
        assert!(added.policy.bindings.contains(&malformed));
        assert_eq!(added.policy.bindings.len(), 2);

        let removed = remove_bindings(
            policy,
            &[BindingRequest::new("viewer", ["u1"])],
            &managed(),
            now,
        );
        assert_eq!(removed.warnings.len(), 1);
        assert_eq!(removed.policy.bindings, vec![malformed]);
    }

    #[test]
    fn test_foreign_bindings_untouched() {
        let now = Utc::now();
        let foreign_conditional = Binding {
            role: "viewer".to_string(),
            members: vec!["u1".to_string()],
            condition: Some(Condition {
                title: "someone-else".to_string(),
                description: String::new(),
                expression: Expiry::new(now - Duration::days(1)).encode(),
            }),
        };
        let foreign_plain = plain_binding("viewer", &["u1", "u2"]);
        let policy = policy_of(vec![foreign_conditional.clone(), foreign_plain.clone()]);

        let result = remove_bindings(
            policy,
            &[BindingRequest::new("viewer", ["u1", "u2"])],
            &managed(),
            now,
        );

        assert_eq!(
            result.policy.bindings,
            vec![foreign_conditional, foreign_plain]
        );
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_duplicate_roles_are_unioned() {
        let now = Utc::now();
        let requested = [
            BindingRequest::new("viewer", ["u1"]),
            BindingRequest::new("viewer", ["u2", "u1"]),
        ];
        let expiry = Expiry::new(now + Duration::hours(1));

        let result = add_bindings(Policy::new(), &requested, &expiry, &managed(), now);

        assert_eq!(result.policy.bindings.len(), 1);
        assert_eq!(result.policy.bindings[0].members, vec!["u1", "u2"]);
    }

    #[test]
    fn test_regrant_replaces_expiry() {
        let now = Utc::now();
        let first = Expiry::new(now + Duration::hours(1));
        let later = Expiry::new(now + Duration::hours(5));
        let requested = [BindingRequest::new("viewer", ["u1", "u2"])];

        let once = add_bindings(Policy::new(), &requested, &first, &managed(), now);
        let twice = add_bindings(once.policy, &requested, &later, &managed(), now);

        assert_eq!(twice.policy.bindings.len(), 1);
        let condition = twice.policy.bindings[0].condition.as_ref().unwrap();
        assert_eq!(condition.expression, later.encode());
    }

    #[test]
    fn test_partial_regrant_keeps_others_on_old_expiry() {
        let now = Utc::now();
        let first = Expiry::new(now + Duration::hours(1));
        let later = Expiry::new(now + Duration::hours(5));

        let once = add_bindings(
            Policy::new(),
            &[BindingRequest::new("viewer", ["u1", "u2"])],
            &first,
            &managed(),
            now,
        );
        let twice = add_bindings(
            once.policy,
            &[BindingRequest::new("viewer", ["u1"])],
            &later,
            &managed(),
            now,
        );

        let mut by_members: Vec<(Vec<String>, String)> = twice
            .policy
            .bindings
            .iter()
            .map(|b| (b.members.clone(), b.condition.clone().unwrap().expression))
            .collect();
        by_members.sort();
        assert_eq!(
            by_members,
            vec![
                (vec!["u1".to_string()], later.encode()),
                (vec!["u2".to_string()], first.encode()),
            ]
        );
    }

    #[test]
    fn test_same_expiry_merges_into_one_binding() {
        let now = Utc::now();
        let expiry = Expiry::new(now + Duration::hours(1));

        let once = add_bindings(
            Policy::new(),
            &[BindingRequest::new("viewer", ["u1"])],
            &expiry,
            &managed(),
            now,
        );
        let twice = add_bindings(
            once.policy,
            &[BindingRequest::new("viewer", ["u2"])],
            &expiry,
            &managed(),
            now,
        );

        assert_eq!(twice.policy.bindings.len(), 1);
        assert_eq!(twice.policy.bindings[0].members, vec!["u1", "u2"]);
    }

    #[test]
    fn test_custom_title_ignores_default_bindings() {
        let now = Utc::now();
        let default_managed = managed_binding("viewer", &["u1"], now - Duration::hours(1));
        let policy = policy_of(vec![default_managed.clone()]);

        let custom = ManagedCondition::new("team-x-expiry");
        let result = remove_bindings(policy, &[], &custom, now);

        assert_eq!(result.policy.bindings, vec![default_managed]);
    }

    #[test]
    fn test_empty_member_set_adds_nothing() {
        let now = Utc::now();
        let requested = [BindingRequest::new("viewer", Vec::<String>::new())];
        let expiry = Expiry::new(now + Duration::hours(1));

        let result = add_bindings(Policy::new(), &requested, &expiry, &managed(), now);

        assert!(result.policy.bindings.is_empty());
        assert_eq!(result.policy.version, 3);
    }

    #[test]
    fn test_warning_display() {
        let warning = BindingWarning {
            role: "roles/viewer".to_string(),
            error: Expiry::decode("bogus").unwrap_err(),
        };
        let text = warning.to_string();
        assert!(text.starts_with("failed to check expiry of binding for role roles/viewer"));
        assert!(text.contains("does not match format"));
    }
}
