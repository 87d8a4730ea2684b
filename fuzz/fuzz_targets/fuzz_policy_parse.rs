#![no_main]
use catrole::{PermissionResolver, PolicyDocument, PolicySource, SourcedDocument};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    // Malformed documents must be rejected, never panic
    let Ok(document) = PolicyDocument::parse(raw) else {
        return;
    };

    let sourced = SourcedDocument::new("Fuzz", PolicySource::Inline, document);
    let _ = PermissionResolver::new().resolve(std::slice::from_ref(&sourced), std::slice::from_ref(&sourced));
});
