#![no_main]
use aod_rs::{validate_request, IamRequest};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(request) = IamRequest::from_yaml(text) {
        let _ = validate_request(&request);
    }
});
