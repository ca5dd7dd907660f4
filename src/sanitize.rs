//! # Payload sanitization
//!
//! Turns arbitrary client JSON into a tree that only holds strings, numbers,
//! booleans and nested maps, with normalized keys and markup-free text.
//! Every stored payload passes through [`sanitize`].

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::PipelineError;

/// Sanitized map of normalized keys to sanitized values.
pub type Payload = BTreeMap<String, PayloadValue>;

/// A value that survived sanitization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Map(Payload),
}

impl PayloadValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// Integer view, truncating floats and parsing numeric strings.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::Float(value) if value.is_finite() => Some(value.trunc() as i64),
            Self::String(value) => value.trim().parse().ok(),
            Self::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }
}

static SCRIPT_STYLE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:script|style)\b[^>]*>.*?</(?:script|style)\s*>")
        .expect("script/style pattern is valid")
});
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[a-zA-Z/!?][^>]*>").expect("tag pattern is valid"));
static PERCENT_OCTET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%[a-fA-F0-9]{2}").expect("octet pattern is valid"));
static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\r\n\t ]+").expect("whitespace pattern is valid"));

/// Normalize a map key: lowercase, keep only `[a-z0-9_-]`.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-'))
        .collect()
}

/// Plain-text cleanup applied to every string value and to free-text fields.
pub fn sanitize_text(value: &str) -> String {
    let mut text = SCRIPT_STYLE_BLOCK.replace_all(value, "").into_owned();
    text = TAG.replace_all(&text, "").into_owned();
    text = text.replace('<', "&lt;");

    // Removing one octet can join the neighbours into another.
    loop {
        let stripped = PERCENT_OCTET.replace_all(&text, "");
        if stripped.len() == text.len() {
            break;
        }
        text = stripped.into_owned();
    }

    let text: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();

    WHITESPACE_RUN.replace_all(&text, " ").trim().to_string()
}

/// Sanitize a JSON container into a [`Payload`].
///
/// Objects keep their (normalized) keys; arrays become maps keyed by element
/// index. Scalars at the top level carry no keys and yield an empty payload.
pub fn sanitize(value: &JsonValue) -> Payload {
    match value {
        JsonValue::Object(map) => sanitize_entries(map.iter()),
        JsonValue::Array(items) => {
            sanitize_entries(items.iter().enumerate().map(|(i, v)| (i.to_string(), v)))
        }
        _ => Payload::new(),
    }
}

fn sanitize_entries<'a, I, K>(entries: I) -> Payload
where
    I: IntoIterator<Item = (K, &'a JsonValue)>,
    K: AsRef<str>,
{
    let mut payload = Payload::new();
    for (raw_key, value) in entries {
        let key = sanitize_key(raw_key.as_ref());
        if key.is_empty() {
            continue;
        }
        if let Some(clean) = sanitize_value(value) {
            payload.insert(key, clean);
        }
    }
    payload
}

fn sanitize_value(value: &JsonValue) -> Option<PayloadValue> {
    match value {
        JsonValue::Null => None,
        JsonValue::Bool(flag) => Some(PayloadValue::Bool(*flag)),
        JsonValue::Number(number) => number
            .as_i64()
            .map(PayloadValue::Integer)
            .or_else(|| number.as_f64().map(PayloadValue::Float)),
        JsonValue::String(text) => Some(PayloadValue::String(sanitize_text(text))),
        JsonValue::Object(_) | JsonValue::Array(_) => Some(PayloadValue::Map(sanitize(value))),
    }
}

/// Result of decoding a raw client payload.
#[derive(Debug, Default)]
pub struct DecodedPayload {
    pub payload: Payload,
    /// Set when a string payload was not valid JSON; the payload is then empty.
    pub error: Option<PipelineError>,
}

/// Decode and sanitize a raw payload field.
///
/// Strings are unescaped (backslashes removed) and parsed as JSON first.
/// Missing fields behave like `"{}"`.
pub fn decode_payload(raw: Option<&JsonValue>) -> DecodedPayload {
    match raw {
        None | Some(JsonValue::Null) => DecodedPayload::default(),
        Some(JsonValue::String(text)) => {
            let unescaped = strip_slashes(text);
            if unescaped.trim().is_empty() {
                return DecodedPayload::default();
            }
            match serde_json::from_str::<JsonValue>(&unescaped) {
                Ok(parsed) => DecodedPayload {
                    payload: sanitize(&parsed),
                    error: None,
                },
                Err(err) => DecodedPayload {
                    payload: Payload::new(),
                    error: Some(PipelineError::Decode(err.to_string())),
                },
            }
        }
        Some(other) => DecodedPayload {
            payload: sanitize(other),
            error: None,
        },
    }
}

/// Remove one level of backslash escaping (`\x` becomes `x`, `\\` becomes `\`).
fn strip_slashes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Render a payload back into JSON for storage.
pub fn to_json(payload: &Payload) -> JsonValue {
    serde_json::to_value(payload).unwrap_or_else(|_| JsonValue::Object(Default::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_lowercased_and_reduced() {
        let payload = sanitize(&json!({"Page-URL": "a", "Click Count!": 3, "???": "dropped"}));

        assert_eq!(payload.get("page-url"), Some(&PayloadValue::String("a".into())));
        assert_eq!(payload.get("clickcount"), Some(&PayloadValue::Integer(3)));
        assert_eq!(payload.len(), 2);
    }

    #[test]
    fn markup_and_whitespace_are_stripped() {
        let payload = sanitize(&json!({
            "a": "<script>alert(1)</script>hi",
            "b": "  <b>bold</b>\n\ttext  ",
            "c": "100%20off",
            "d": "3 < 4",
        }));

        assert_eq!(payload["a"], PayloadValue::String("hi".into()));
        assert_eq!(payload["b"], PayloadValue::String("bold text".into()));
        assert_eq!(payload["c"], PayloadValue::String("100off".into()));
        assert_eq!(payload["d"], PayloadValue::String("3 &lt; 4".into()));
    }

    #[test]
    fn script_block_with_uppercase_and_newlines_removed() {
        assert_eq!(
            sanitize_text("x<SCRIPT type=\"text/javascript\">\nvar a = 1;\n</SCRIPT>y"),
            "xy"
        );
        assert_eq!(sanitize_text("<style>p{}</style>ok"), "ok");
    }

    #[test]
    fn numbers_keep_their_kind() {
        let payload = sanitize(&json!({"int": 42, "neg": -7, "float": 1.5, "numeric_text": "12"}));

        assert_eq!(payload["int"], PayloadValue::Integer(42));
        assert_eq!(payload["neg"], PayloadValue::Integer(-7));
        assert_eq!(payload["float"], PayloadValue::Float(1.5));
        assert_eq!(payload["numeric_text"], PayloadValue::String("12".into()));
    }

    #[test]
    fn nulls_are_dropped_and_bools_kept() {
        let payload = sanitize(&json!({"gone": null, "flag": false}));

        assert!(!payload.contains_key("gone"));
        assert_eq!(payload["flag"], PayloadValue::Bool(false));
    }

    #[test]
    fn nested_objects_and_arrays_recurse() {
        let payload = sanitize(&json!({
            "Outer": {"Inner": "<i>x</i>", "drop": null},
            "list": ["a", 2, null],
        }));

        let PayloadValue::Map(outer) = &payload["outer"] else {
            panic!("expected map");
        };
        assert_eq!(outer["inner"], PayloadValue::String("x".into()));
        assert!(!outer.contains_key("drop"));

        let PayloadValue::Map(list) = &payload["list"] else {
            panic!("expected map");
        };
        assert_eq!(list["0"], PayloadValue::String("a".into()));
        assert_eq!(list["1"], PayloadValue::Integer(2));
        assert!(!list.contains_key("2"));
    }

    #[test]
    fn later_duplicate_keys_win() {
        let payload = sanitize(&json!({"Key": 1, "key": 2}));
        assert_eq!(payload.len(), 1);
        assert!(matches!(payload["key"], PayloadValue::Integer(_)));
    }

    #[test]
    fn decode_parses_escaped_string() {
        let raw = json!(r#"{\"page\":\"/home\",\"x\":10}"#);
        let decoded = decode_payload(Some(&raw));

        assert!(decoded.error.is_none());
        assert_eq!(decoded.payload["page"], PayloadValue::String("/home".into()));
        assert_eq!(decoded.payload["x"], PayloadValue::Integer(10));
    }

    #[test]
    fn decode_failure_yields_empty_payload_and_error() {
        let raw = json!("{not json");
        let decoded = decode_payload(Some(&raw));

        assert!(decoded.payload.is_empty());
        assert!(matches!(decoded.error, Some(PipelineError::Decode(_))));
    }

    #[test]
    fn decode_missing_or_scalar_is_empty() {
        assert!(decode_payload(None).payload.is_empty());
        assert!(decode_payload(Some(&json!(""))).error.is_none());

        let scalar = decode_payload(Some(&json!("5")));
        assert!(scalar.payload.is_empty());
        assert!(scalar.error.is_none());
    }

    #[test]
    fn decode_accepts_structured_json() {
        let raw = json!({"A": "b"});
        let decoded = decode_payload(Some(&raw));
        assert_eq!(decoded.payload["a"], PayloadValue::String("b".into()));
    }

    #[test]
    fn payload_renders_back_to_plain_json() {
        let payload = sanitize(&json!({"a": 1, "b": {"c": "d"}, "e": true}));
        assert_eq!(to_json(&payload), json!({"a": 1, "b": {"c": "d"}, "e": true}));
    }
}
