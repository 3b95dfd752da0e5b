//! Fuzz target: full template expansion
//!
//! Tests expand_template() with arbitrary JSON documents.
//! Targets:
//! - Panics in the visitor on unexpected shapes of sections
//! - Cycles through dependsOn, reference() and nested deployments
//! - Nest and merge on duplicate or self-referencing ids

#![no_main]
use libfuzzer_sys::fuzz_target;

use arm_expand_core::{expand_template, ExpansionOptions};

fuzz_target!(|data: &[u8]| {
    if data.len() > 64 * 1024 {
        return;
    }
    let Ok(template) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let _ = expand_template(&template, &serde_json::json!({}), ExpansionOptions::default());
});
