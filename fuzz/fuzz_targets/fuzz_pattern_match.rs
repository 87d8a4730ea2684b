#![no_main]
use arbitrary::Arbitrary;
use catrole::PatternMatcher;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    outer: String,
    inner: String,
    candidate: String,
}

fuzz_target!(|input: Input| {
    let (Ok(outer), Ok(inner)) = (
        PatternMatcher::compile_action(&input.outer),
        PatternMatcher::compile_action(&input.inner),
    ) else {
        return;
    };

    // Containment must agree with matching
    if outer.covers(&inner) && inner.matches(&input.candidate) {
        assert!(outer.matches(&input.candidate));
    }

    let _ = PatternMatcher::compile(&input.candidate).map(|p| p.matches(&input.outer));
});
