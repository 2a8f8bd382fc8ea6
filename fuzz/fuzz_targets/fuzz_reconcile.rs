#![no_main]
use aod_rs::{
    add_bindings, remove_bindings, Binding, BindingRequest, Condition, Expiry, ManagedCondition,
    Policy,
};
use arbitrary::Arbitrary;
use chrono::{DateTime, Duration, Utc};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FuzzBinding {
    role: u8,
    members: Vec<u8>,
    managed: bool,
    expression: String,
}

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    bindings: Vec<FuzzBinding>,
    requests: Vec<(u8, Vec<u8>)>,
    expiry_minutes: i16,
    grant: bool,
}

fn role(n: u8) -> String {
    format!("roles/r{}", n % 8)
}

fn member(n: u8) -> String {
    format!("user:m{}@example.com", n % 16)
}

fuzz_target!(|input: FuzzInput| {
    let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
    let managed = ManagedCondition::default();

    let policy = Policy {
        version: 1,
        bindings: input
            .bindings
            .iter()
            .map(|b| Binding {
                role: role(b.role),
                members: b.members.iter().map(|m| member(*m)).collect(),
                condition: Some(Condition {
                    title: if b.managed { managed.title.clone() } else { "other".to_string() },
                    description: String::new(),
                    expression: b.expression.clone(),
                }),
            })
            .collect(),
        etag: String::new(),
    };
    let requests: Vec<BindingRequest> = input
        .requests
        .iter()
        .map(|(r, members)| BindingRequest::new(role(*r), members.iter().map(|m| member(*m))))
        .collect();

    let result = if input.grant {
        let expiry = Expiry::new(now + Duration::minutes(input.expiry_minutes as i64));
        add_bindings(policy.clone(), &requests, &expiry, &managed, now)
    } else {
        remove_bindings(policy.clone(), &requests, &managed, now)
    };

    // foreign bindings are carried over untouched and in order
    let foreign = |p: &Policy| -> Vec<Binding> {
        p.bindings
            .iter()
            .filter(|b| !b.is_managed_by(&managed.title))
            .cloned()
            .collect()
    };
    assert_eq!(foreign(&result.policy), foreign(&policy));
});
