//! Lenient JSON reading for the `json()` function.
//!
//! Template authors commonly write JSON inside single-quoted expression
//! strings, so `json()` accepts single-quoted strings as well as the strict
//! form. Single-quoted strings are rewritten to double-quoted ones and the
//! result is handed to `serde_json`.

use serde_json::Value as JsonValue;

/// Parses `source`, accepting single-quoted strings.
///
/// An empty (or whitespace-only) document parses as null.
pub fn parse_lenient(source: &str) -> Result<JsonValue, serde_json::Error> {
    if source.trim().is_empty() {
        return Ok(JsonValue::Null);
    }
    serde_json::from_str(&normalize_quotes(source))
}

fn normalize_quotes(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                out.push('"');
                while let Some(c) = chars.next() {
                    out.push(c);
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                out.push(escaped);
                            }
                        }
                        '"' => break,
                        _ => {}
                    }
                }
            }
            '\'' => {
                out.push('"');
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some('\'') => out.push('\''),
                            Some(escaped) => {
                                out.push('\\');
                                out.push(escaped);
                            }
                            None => out.push('\\'),
                        },
                        '"' => out.push_str("\\\""),
                        '\'' => break,
                        c => out.push(c),
                    }
                }
                out.push('"');
            }
            c => out.push(c),
        }
    }
    out
}
