//! String, encoding and URI functions.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{ExpressionError, FunctionErrorKind, Result};
use crate::eval::builtins::{
    expect_args, expect_array, expect_int, expect_object, expect_string,
};
use crate::eval::context::Context;
use crate::eval::registry::FunctionDescriptor;
use crate::eval::value::{Map, MapExt, Value};
use crate::eval::{format, json};

pub(super) const FUNCTIONS: &[FunctionDescriptor] = &[
    FunctionDescriptor::eager("base64", eval_base64),
    FunctionDescriptor::eager("base64ToJson", eval_base64_to_json),
    FunctionDescriptor::eager("base64ToString", eval_base64_to_string),
    FunctionDescriptor::eager("buildUri", eval_build_uri),
    FunctionDescriptor::eager("dataUri", eval_data_uri),
    FunctionDescriptor::eager("dataUriToString", eval_data_uri_to_string),
    FunctionDescriptor::eager("endsWith", eval_ends_with),
    FunctionDescriptor::eager("format", eval_format),
    FunctionDescriptor::eager("guid", eval_guid),
    FunctionDescriptor::eager("newGuid", eval_new_guid),
    FunctionDescriptor::eager("padLeft", eval_pad_left),
    FunctionDescriptor::eager("parseUri", eval_parse_uri),
    FunctionDescriptor::eager("replace", eval_replace),
    FunctionDescriptor::eager("split", eval_split),
    FunctionDescriptor::eager("startsWith", eval_starts_with),
    FunctionDescriptor::eager("string", eval_string),
    FunctionDescriptor::eager("substring", eval_substring),
    FunctionDescriptor::eager("toLower", eval_to_lower),
    FunctionDescriptor::eager("toUpper", eval_to_upper),
    FunctionDescriptor::eager("trim", eval_trim),
    FunctionDescriptor::eager("uniqueString", eval_unique_string),
    FunctionDescriptor::eager("uri", eval_uri),
    FunctionDescriptor::eager("uriComponent", eval_uri_component),
    FunctionDescriptor::eager("uriComponentToString", eval_uri_component_to_string),
];

const DATA_URI_PREFIX: &str = "data:text/plain;charset=utf8;base64,";

/// SHA-256 over the URL namespace GUID (in its little-endian field layout)
/// followed by the UTF-8 bytes of each part.
fn unique_digest<'a>(parts: impl IntoIterator<Item = &'a str>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::NAMESPACE_URL.to_bytes_le());
    for part in parts {
        hasher.update(part.as_bytes());
    }
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// A 14 character deterministic identifier for the given parts. Missing
/// parts are skipped.
pub fn unique_id(parts: &[Option<&str>]) -> String {
    hex(&unique_digest(parts.iter().flatten().copied())[..7])
}

fn string_args(function: &str, args: &[Value]) -> Result<Vec<String>> {
    expect_args(function, args, 1, usize::MAX)?;
    (0..args.len())
        .map(|i| expect_string(function, args, i))
        .collect()
}

/// The `uniqueString` of the given parts.
pub fn unique_string(parts: &[&str]) -> String {
    let mut id = hex(&unique_digest(parts.iter().copied())[..7]);
    id.truncate(13);
    id
}

/// The `guid` of the given parts.
pub fn deterministic_guid(parts: &[&str]) -> String {
    let digest = unique_digest(parts.iter().copied());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes_le(bytes).to_string()
}

fn eval_unique_string(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    let parts = string_args("uniqueString", args)?;
    let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
    Ok(Value::String(unique_string(&parts)))
}

fn eval_guid(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    let parts = string_args("guid", args)?;
    let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
    Ok(Value::String(deterministic_guid(&parts)))
}

fn eval_new_guid(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("newGuid", args, 0, 0)?;
    Ok(Value::String(Uuid::new_v4().to_string()))
}

fn eval_base64(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("base64", args, 1, 1)?;
    let input = expect_string("base64", args, 0)?;
    Ok(Value::String(STANDARD.encode(input)))
}

fn decode_base64(function: &str, encoded: &str) -> Result<String> {
    let bytes = STANDARD.decode(encoded.trim()).map_err(|err| {
        ExpressionError::function(function, FunctionErrorKind::InvalidFormat, err.to_string())
    })?;
    String::from_utf8(bytes).map_err(|err| {
        ExpressionError::function(function, FunctionErrorKind::InvalidFormat, err.to_string())
    })
}

fn eval_base64_to_string(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("base64ToString", args, 1, 1)?;
    let encoded = expect_string("base64ToString", args, 0)?;
    decode_base64("base64ToString", &encoded).map(Value::String)
}

fn eval_base64_to_json(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("base64ToJson", args, 1, 1)?;
    let encoded = expect_string("base64ToJson", args, 0)?;
    let decoded = decode_base64("base64ToJson", &encoded)?;
    let parsed = json::parse_lenient(&decoded).map_err(|err| {
        ExpressionError::function("base64ToJson", FunctionErrorKind::InvalidFormat, err.to_string())
    })?;
    Ok(Value::from_json(&parsed))
}

fn eval_data_uri(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("dataUri", args, 1, 1)?;
    let input = expect_string("dataUri", args, 0)?;
    Ok(Value::String(format!("{}{}", DATA_URI_PREFIX, STANDARD.encode(input))))
}

fn eval_data_uri_to_string(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("dataUriToString", args, 1, 1)?;
    let input = expect_string("dataUriToString", args, 0)?;
    let invalid = || ExpressionError::argument("dataUriToString", "argument 1", "a data URI");
    let rest = input.strip_prefix("data:").ok_or_else(invalid)?;
    let (header, data) = rest.split_once(',').ok_or_else(invalid)?;
    if header
        .split(';')
        .any(|p| p.trim().eq_ignore_ascii_case("base64"))
    {
        decode_base64("dataUriToString", data).map(Value::String)
    } else {
        Ok(Value::String(data.to_string()))
    }
}

fn eval_ends_with(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("endsWith", args, 2, 2)?;
    let value = expect_string("endsWith", args, 0)?.to_lowercase();
    let suffix = expect_string("endsWith", args, 1)?.to_lowercase();
    Ok(Value::Bool(value.ends_with(&suffix)))
}

fn eval_starts_with(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("startsWith", args, 2, 2)?;
    let value = expect_string("startsWith", args, 0)?.to_lowercase();
    let prefix = expect_string("startsWith", args, 1)?.to_lowercase();
    Ok(Value::Bool(value.starts_with(&prefix)))
}

fn eval_format(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("format", args, 2, usize::MAX)?;
    let pattern = expect_string("format", args, 0)?;
    let values = args[1..]
        .iter()
        .map(|v| v.clone().materialize(ctx))
        .collect::<Result<Vec<_>>>()?;
    format::composite(&pattern, &values)
        .map(Value::String)
        .map_err(|reason| ExpressionError::function("format", FunctionErrorKind::InvalidFormat, reason))
}

fn eval_pad_left(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("padLeft", args, 2, 3)?;
    let value = match &args[0] {
        Value::Int(n) => n.to_string(),
        _ => expect_string("padLeft", args, 0)?,
    };
    let width = expect_int("padLeft", args, 1)?;
    let pad = match args.get(2) {
        Some(_) => {
            let pad = expect_string("padLeft", args, 2)?;
            let mut chars = pad.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => {
                    return Err(ExpressionError::argument(
                        "padLeft",
                        "paddingCharacter",
                        "a single character",
                    ))
                }
            }
        }
        None => ' ',
    };
    let missing = usize::try_from(width)
        .unwrap_or(0)
        .saturating_sub(value.chars().count());
    let mut padded: String = std::iter::repeat(pad).take(missing).collect();
    padded.push_str(&value);
    Ok(Value::String(padded))
}

fn eval_replace(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("replace", args, 3, 3)?;
    let value = expect_string("replace", args, 0)?;
    let old = expect_string("replace", args, 1)?;
    let new = expect_string("replace", args, 2)?;
    if old.is_empty() {
        return Ok(Value::String(value));
    }
    Ok(Value::String(value.replace(&old, &new)))
}

fn eval_split(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("split", args, 2, 2)?;
    let value = expect_string("split", args, 0)?;
    let delimiters = match &args[1] {
        Value::Array(_) => {
            let items = expect_array(ctx, "split", args, 1)?;
            (0..items.len())
                .map(|i| expect_string("split", &items, i))
                .collect::<Result<Vec<_>>>()?
        }
        _ => vec![expect_string("split", args, 1)?],
    };
    let delimiters: Vec<String> = delimiters.into_iter().filter(|d| !d.is_empty()).collect();

    let mut parts = Vec::new();
    let mut rest = value.as_str();
    loop {
        let next = delimiters
            .iter()
            .filter_map(|d| rest.find(d.as_str()).map(|at| (at, d.len())))
            .min_by_key(|&(at, _)| at);
        match next {
            Some((at, len)) => {
                parts.push(Value::String(rest[..at].to_string()));
                rest = &rest[at + len..];
            }
            None => {
                parts.push(Value::String(rest.to_string()));
                break;
            }
        }
    }
    Ok(Value::Array(parts))
}

fn eval_string(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("string", args, 1, 1)?;
    let value = args[0].clone().materialize(ctx)?;
    Ok(Value::String(match value {
        Value::String(s) => s,
        Value::Array(_) | Value::Object(_) => value.to_json().to_string(),
        other => other.to_display_string(),
    }))
}

fn eval_substring(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("substring", args, 2, 3)?;
    let value = expect_string("substring", args, 0)?;
    let chars: Vec<char> = value.chars().collect();
    let start = expect_int("substring", args, 1)?;
    let length = match args.get(2) {
        Some(_) => expect_int("substring", args, 2)?,
        None => (chars.len() as i64).saturating_sub(start),
    };
    let out_of_range = || {
        ExpressionError::function(
            "substring",
            FunctionErrorKind::OutOfRange,
            format!(
                "start {} and length {} are out of range for a string of {} characters",
                start,
                length,
                chars.len()
            ),
        )
    };
    let start_index = usize::try_from(start).map_err(|_| out_of_range())?;
    let length = usize::try_from(length).map_err(|_| out_of_range())?;
    let end = start_index
        .checked_add(length)
        .filter(|&end| end <= chars.len())
        .ok_or_else(out_of_range)?;
    Ok(Value::String(chars[start_index..end].iter().collect()))
}

fn eval_to_lower(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("toLower", args, 1, 1)?;
    Ok(Value::String(expect_string("toLower", args, 0)?.to_lowercase()))
}

fn eval_to_upper(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("toUpper", args, 1, 1)?;
    Ok(Value::String(expect_string("toUpper", args, 0)?.to_uppercase()))
}

fn eval_trim(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("trim", args, 1, 1)?;
    Ok(Value::String(expect_string("trim", args, 0)?.trim().to_string()))
}

fn parse_url(function: &str, source: &str) -> Result<url::Url> {
    url::Url::parse(source).map_err(|err| {
        ExpressionError::function(function, FunctionErrorKind::InvalidFormat, err.to_string())
    })
}

fn eval_uri(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("uri", args, 2, 2)?;
    let base = expect_string("uri", args, 0)?;
    let relative = expect_string("uri", args, 1)?;
    let joined = parse_url("uri", &base)?.join(&relative).map_err(|err| {
        ExpressionError::function("uri", FunctionErrorKind::InvalidFormat, err.to_string())
    })?;
    Ok(Value::String(joined.to_string()))
}

/// Form-encodes a component with lowercase escapes and `+` for spaces.
fn encode_component(input: &str) -> String {
    let encoded = urlencoding::encode(input);
    let mut out = String::with_capacity(encoded.len());
    let mut chars = encoded.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let escape: String = chars.by_ref().take(2).collect();
        if escape == "20" {
            out.push('+');
        } else {
            out.push('%');
            out.push_str(&escape.to_ascii_lowercase());
        }
    }
    out
}

fn eval_uri_component(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("uriComponent", args, 1, 1)?;
    let input = expect_string("uriComponent", args, 0)?;
    Ok(Value::String(encode_component(&input)))
}

fn eval_uri_component_to_string(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("uriComponentToString", args, 1, 1)?;
    let input = expect_string("uriComponentToString", args, 0)?.replace('+', " ");
    let decoded = urlencoding::decode(&input).map_err(|err| {
        ExpressionError::function(
            "uriComponentToString",
            FunctionErrorKind::InvalidFormat,
            err.to_string(),
        )
    })?;
    Ok(Value::String(decoded.into_owned()))
}

fn eval_parse_uri(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("parseUri", args, 1, 1)?;
    let source = expect_string("parseUri", args, 0)?;
    let url = parse_url("parseUri", &source)?;
    let mut entries: Map = vec![
        ("scheme".to_string(), Value::string(url.scheme())),
        (
            "host".to_string(),
            Value::string(url.host_str().unwrap_or_default()),
        ),
        (
            "port".to_string(),
            url.port().map_or(Value::Null, |p| Value::Int(i64::from(p))),
        ),
    ];
    if url.path() != "/" && !url.path().is_empty() {
        entries.set("path", Value::string(url.path()));
    }
    if let Some(query) = url.query() {
        entries.set("query", Value::String(format!("?{}", query)));
    }
    Ok(Value::Object(entries))
}

fn eval_build_uri(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("buildUri", args, 1, 1)?;
    let parts = expect_object(ctx, "buildUri", args, 0)?;
    let part = |name: &str| -> Option<String> {
        match parts.get_ci(name) {
            Some(Value::Null) | None => None,
            Some(value) => Some(value.to_display_string()),
        }
    };
    let scheme = part("scheme")
        .ok_or_else(|| ExpressionError::argument("buildUri", "scheme", "a URI scheme"))?;
    let host = part("host").ok_or_else(|| ExpressionError::argument("buildUri", "host", "a host"))?;

    let mut uri = format!("{}://{}", scheme, host);
    if let Some(port) = part("port") {
        uri.push(':');
        uri.push_str(&port);
    }
    match part("path") {
        Some(path) if path.starts_with('/') => uri.push_str(&path),
        Some(path) => {
            uri.push('/');
            uri.push_str(&path);
        }
        None => uri.push('/'),
    }
    if let Some(query) = part("query").filter(|q| !q.is_empty()) {
        if !query.starts_with('?') {
            uri.push('?');
        }
        uri.push_str(&query);
    }
    Ok(Value::String(uri))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::builtins::test_support::{eval, eval_json};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_unique_string() {
        assert_eq!(eval_json("[uniqueString('One')]"), json!("b0ef330613636"));
        assert_eq!(
            eval_json("[uniqueString('One', 'Two', 'Three')]"),
            json!("4b9fe86f643d6")
        );
        assert!(eval("[uniqueString()]").is_err());
        assert!(eval("[uniqueString(1)]").is_err());
    }

    #[test]
    fn test_unique_id_skips_missing_parts() {
        assert_eq!(unique_id(&[Some("test"), Some("123")]), "0b0d0856d2b1e9");
        assert_eq!(unique_id(&[Some("test123")]), "0b0d0856d2b1e9");
        assert_eq!(unique_id(&[None, Some("test"), Some("123")]), "0b0d0856d2b1e9");
        assert_eq!(unique_id(&[Some("test"), Some("1234")]), "9c7543ad4767e2");
    }

    #[test]
    fn test_guid() {
        assert_eq!(
            eval_json("[guid('abc')]"),
            json!("aea04463-c5e4-0660-08c9-c1a9fbfccf0b")
        );
        let Value::String(a) = eval("[newGuid()]").unwrap() else {
            panic!("expected a string");
        };
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_base64() {
        assert_eq!(eval_json("[base64('one, two, three')]"), json!("b25lLCB0d28sIHRocmVl"));
        assert_eq!(
            eval_json("[base64ToString('b25lLCB0d28sIHRocmVl')]"),
            json!("one, two, three")
        );
        assert_eq!(
            eval_json("[base64ToJson('eydvbmUnOiAnYScsICd0d28nOiAnYid9')]"),
            json!({"one": "a", "two": "b"})
        );
        assert!(eval("[base64(1)]").is_err());
        assert!(eval("[base64ToString('***')]").is_err());
    }

    #[test]
    fn test_data_uri() {
        assert_eq!(
            eval_json("[dataUri('Hello')]"),
            json!("data:text/plain;charset=utf8;base64,SGVsbG8=")
        );
        assert_eq!(
            eval_json("[dataUriToString('data:;base64,SGVsbG8sIFdvcmxkIQ==')]"),
            json!("Hello, World!")
        );
        assert_eq!(
            eval_json("[dataUriToString('data:,SGVsbG8sIFdvcmxkIQ==')]"),
            json!("SGVsbG8sIFdvcmxkIQ==")
        );
        assert!(eval("[dataUriToString('SGVsbG8sIFdvcmxkIQ==')]").is_err());
    }

    #[test]
    fn test_starts_ends_with_ignore_case() {
        assert_eq!(eval_json("[endsWith('abcdef', 'F')]"), json!(true));
        assert_eq!(eval_json("[endsWith('abcdef', 'e')]"), json!(false));
        assert_eq!(eval_json("[startsWith('abcdef', 'A')]"), json!(true));
    }

    #[test]
    fn test_format() {
        assert_eq!(
            eval_json("[format('{0}, {1}. Formatted number: {2:N0}', 'Hello', 'User', 8175133)]"),
            json!("Hello, User. Formatted number: 8,175,133")
        );
        assert_eq!(
            eval_json("[json(format('{{''a'': ''{0}''}}', 'b'))]"),
            json!({"a": "b"})
        );
        assert!(eval("[format('{0}')]").is_err());
        assert!(eval("[format(1, '1')]").is_err());
    }

    #[test]
    fn test_pad_left() {
        assert_eq!(eval_json("[padLeft('123', 10, '0')]"), json!("0000000123"));
        assert_eq!(eval_json("[padLeft('123', 10)]"), json!("       123"));
        assert_eq!(eval_json("[padLeft(7, 3, '0')]"), json!("007"));
        assert!(eval("[padLeft('test')]").is_err());
        assert!(eval("[padLeft('test', 10, 'ab')]").is_err());
    }

    #[test]
    fn test_replace_split() {
        assert_eq!(eval_json("[replace('This is a test', 'i', 'b')]"), json!("Thbs bs a test"));
        assert_eq!(eval_json("[replace('abc', 'B', 'x')]"), json!("abc"));
        assert_eq!(
            eval_json("[split('one;two,three', createArray(';', ','))]"),
            json!(["one", "two", "three"])
        );
        assert_eq!(eval_json("[split('a b', ' ')]"), json!(["a", "b"]));
        assert!(eval("[split(1, 1)]").is_err());
    }

    #[test]
    fn test_string_conversion() {
        assert_eq!(eval_json("[string('a')]"), json!("a"));
        assert_eq!(eval_json("[string(true())]"), json!("True"));
        assert_eq!(eval_json("[string(5)]"), json!("5"));
        assert_eq!(eval_json("[string(null())]"), json!(""));
        assert_eq!(
            eval_json("[string(createObject('a', createArray(1, 'b')))]"),
            json!("{\"a\":[1,\"b\"]}")
        );
    }

    #[test]
    fn test_substring() {
        assert_eq!(eval_json("[substring('This is a test', 0, 4)]"), json!("This"));
        assert_eq!(eval_json("[substring('This is a test', 10)]"), json!("test"));
        assert!(eval("[substring('abc', 2, 5)]").is_err());
        assert!(eval("[substring('abc', -1)]").is_err());
    }

    #[test]
    fn test_substring_extreme_start() {
        assert!(matches!(
            eval("[substring('abc', -9223372036854775808)]"),
            Err(ExpressionError::Function { kind: FunctionErrorKind::OutOfRange, .. })
        ));
        assert!(eval("[substring('abc', 9223372036854775807)]").is_err());
    }

    #[test]
    fn test_case_and_trim() {
        assert_eq!(eval_json("[toLower('One Two')]"), json!("one two"));
        assert_eq!(eval_json("[toUpper('One Two')]"), json!("ONE TWO"));
        assert_eq!(eval_json("[trim('  a b  ')]"), json!("a b"));
        assert!(eval("[toLower(2)]").is_err());
    }

    #[test]
    fn test_uri() {
        assert_eq!(
            eval_json("[uri('http://contoso.org/firstpath', 'myscript.sh')]"),
            json!("http://contoso.org/myscript.sh")
        );
        assert_eq!(
            eval_json("[uri('http://contoso.org/firstpath/', 'myscript.sh')]"),
            json!("http://contoso.org/firstpath/myscript.sh")
        );
        assert_eq!(
            eval_json("[uri('http://contoso.org/firstpath/azuredeploy.json/', 'myscript.sh')]"),
            json!("http://contoso.org/firstpath/azuredeploy.json/myscript.sh")
        );
        assert!(eval("[uri('http://contoso.org/firstpath', 2)]").is_err());
    }

    #[test]
    fn test_uri_component() {
        assert_eq!(
            eval_json("[uriComponent('http://contoso.com/resources/nested/azuredeploy.json')]"),
            json!("http%3a%2f%2fcontoso.com%2fresources%2fnested%2fazuredeploy.json")
        );
        assert_eq!(eval_json("[uriComponent('a b')]"), json!("a+b"));
        assert_eq!(
            eval_json("[uriComponentToString('http%3a%2f%2fcontoso.com%2fresources%2fnested%2fazuredeploy.json')]"),
            json!("http://contoso.com/resources/nested/azuredeploy.json")
        );
    }

    #[test]
    fn test_parse_uri() {
        assert_eq!(
            eval_json("[parseUri('https://example.com:1234/foo/bar')]"),
            json!({"scheme": "https", "host": "example.com", "port": 1234, "path": "/foo/bar"})
        );
        assert_eq!(
            eval_json("[parseUri('https://example.com/')]"),
            json!({"scheme": "https", "host": "example.com", "port": null})
        );
        assert_eq!(
            eval_json("[parseUri('https://example.com/foo/bar?a=1&b=2')]"),
            json!({"scheme": "https", "host": "example.com", "port": null, "path": "/foo/bar", "query": "?a=1&b=2"})
        );
    }

    #[test]
    fn test_build_uri() {
        assert_eq!(
            eval_json("[buildUri(createObject('scheme', 'https', 'host', 'example.com', 'port', 1234, 'path', '/foo/bar'))]"),
            json!("https://example.com:1234/foo/bar")
        );
        assert_eq!(
            eval_json("[buildUri(createObject('scheme', 'https', 'host', 'example.com'))]"),
            json!("https://example.com/")
        );
        assert_eq!(
            eval_json("[buildUri(parseUri('https://example.com/foo/bar?a=1&b=2'))]"),
            json!("https://example.com/foo/bar?a=1&b=2")
        );
        assert!(eval("[buildUri(1)]").is_err());
    }
}
