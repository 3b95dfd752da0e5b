//! Fuzz target: expression tokenizer and parser
//!
//! Targets:
//! - Panics on unterminated strings, brackets and calls
//! - Byte indexing on multi-byte UTF-8
//! - Stack overflow from deeply nested calls
//! - Evaluation of whatever parses must return, not panic

#![no_main]
use libfuzzer_sys::fuzz_target;

use arm_expand_core::eval::compiler;
use arm_expand_core::eval::context::TemplateContext;
use arm_expand_core::expr;
use arm_expand_core::ExpansionOptions;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    if input.len() > 4096 {
        return;
    }

    let _ = expr::is_expression(input);
    let _ = expr::literal_text(input);

    if expr::parse(input).is_ok() {
        let ctx = TemplateContext::new(ExpansionOptions::default());
        let _ = compiler::evaluate(&ctx, input);
    }
});
