#![no_main]
use aod_rs::Expiry;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|expression: &str| {
    let Ok(expiry) = Expiry::decode(expression) else {
        return;
    };
    // offsets can push the instant outside the four-digit years RFC 3339 allows
    let Ok(truncated) = Expiry::try_new(expiry.at()) else {
        return;
    };
    assert_eq!(Expiry::decode(&truncated.encode()), Ok(truncated));
});
