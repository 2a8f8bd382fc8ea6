//! Change records between a fetched and a written policy
//!
//! Deltas are computed per (role, member, condition) triple, so a member
//! moved from one managed binding to another shows up as one removal and
//! one addition.

use crate::core::iam::{Condition, Policy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Kind of change applied to a member of a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeltaAction {
    Add,
    Remove,
}

/// One member gained or lost on a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingDelta {
    pub action: DeltaAction,
    pub role: String,
    pub member: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

type Grant<'a> = (&'a str, &'a str, Option<&'a Condition>);

fn grants(policy: &Policy) -> Vec<Grant<'_>> {
    policy
        .bindings
        .iter()
        .flat_map(|b| {
            b.members
                .iter()
                .map(move |m| (b.role.as_str(), m.as_str(), b.condition.as_ref()))
        })
        .collect()
}

/// Deltas turning `before` into `after`: removals first, then additions,
/// each in binding order
pub fn policy_delta(before: &Policy, after: &Policy) -> Vec<BindingDelta> {
    let old = grants(before);
    let new = grants(after);
    let old_set: HashSet<Grant<'_>> = old.iter().copied().collect();
    let new_set: HashSet<Grant<'_>> = new.iter().copied().collect();

    let mut seen = HashSet::new();
    let removed = old
        .iter()
        .filter(|g| !new_set.contains(*g))
        .map(|g| (DeltaAction::Remove, *g));
    let added = new
        .iter()
        .filter(|g| !old_set.contains(*g))
        .map(|g| (DeltaAction::Add, *g));

    removed
        .chain(added)
        .filter(|entry| seen.insert(*entry))
        .map(|(action, (role, member, condition))| BindingDelta {
            action,
            role: role.to_string(),
            member: member.to_string(),
            condition: condition.cloned(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::iam::Binding;

    fn binding(role: &str, members: &[&str], title: Option<&str>) -> Binding {
        Binding {
            role: role.to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
            condition: title.map(|t| Condition {
                title: t.to_string(),
                description: String::new(),
                expression: "request.time < timestamp('2024-06-01T00:00:00Z')".to_string(),
            }),
        }
    }

    fn policy(bindings: Vec<Binding>) -> Policy {
        Policy {
            version: 3,
            bindings,
            etag: String::new(),
        }
    }

    #[test]
    fn test_unchanged_policy_has_no_deltas() {
        let p = policy(vec![binding("roles/viewer", &["user:a@example.com"], Some("t"))]);
        assert!(policy_delta(&p, &p.clone()).is_empty());
    }

    #[test]
    fn test_add_and_remove_members() {
        let before = policy(vec![
            binding("roles/owner", &["user:root@example.com"], None),
            binding("roles/viewer", &["user:a@example.com", "user:b@example.com"], Some("t")),
        ]);
        let after = policy(vec![
            binding("roles/owner", &["user:root@example.com"], None),
            binding("roles/viewer", &["user:b@example.com"], Some("t")),
            binding("roles/editor", &["user:c@example.com"], Some("t")),
        ]);

        let deltas = policy_delta(&before, &after);
        let summary: Vec<(DeltaAction, &str, &str)> = deltas
            .iter()
            .map(|d| (d.action, d.role.as_str(), d.member.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (DeltaAction::Remove, "roles/viewer", "user:a@example.com"),
                (DeltaAction::Add, "roles/editor", "user:c@example.com"),
            ]
        );
        assert_eq!(deltas[1].condition.as_ref().map(|c| c.title.as_str()), Some("t"));
    }

    #[test]
    fn test_duplicate_grants_reported_once() {
        let before = policy(vec![]);
        let after = policy(vec![
            binding("roles/viewer", &["user:a@example.com"], Some("t")),
            binding("roles/viewer", &["user:a@example.com"], Some("t")),
        ]);
        assert_eq!(policy_delta(&before, &after).len(), 1);
    }

    #[test]
    fn test_delta_serializes_action_uppercase() {
        let delta = BindingDelta {
            action: DeltaAction::Remove,
            role: "roles/viewer".to_string(),
            member: "user:a@example.com".to_string(),
            condition: None,
        };
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["action"], "REMOVE");
        assert!(json.get("condition").is_none());
    }
}
