//! String and value helpers shared across the runtime.

use serde_json::Value;

/// Broad classification of a JSON value, used wherever the runtime needs
/// "same shape or not" decisions (diffing, prop checks, deep comparisons).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

/// Classify a value. Two values of different kinds are never patched in
/// place; they are replaced wholesale.
pub fn value_kind(value: &Value) -> ValueKind {
    match value {
        Value::Null => ValueKind::Null,
        Value::Bool(_) => ValueKind::Bool,
        Value::Number(_) => ValueKind::Number,
        Value::String(_) => ValueKind::String,
        Value::Array(_) => ValueKind::Array,
        Value::Object(_) => ValueKind::Object,
    }
}

/// Whether a value differs from its previous one.
pub fn has_changed(value: &Value, old_value: &Value) -> bool {
    value != old_value
}

/// Convert a hyphenated name to camel case (`some-prop` -> `someProp`).
/// A hyphen not followed by a word character is kept as-is.
pub fn camelize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '-' {
            match chars.peek() {
                Some(&next) if next.is_ascii_alphanumeric() || next == '_' => {
                    chars.next();
                    out.push(next.to_ascii_uppercase());
                }
                _ => out.push('-'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Convert a camel-cased name to hyphenated lower case
/// (`someProp` -> `some-prop`).
pub fn hyphenate(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev_is_word = false;
    for ch in s.chars() {
        if ch.is_ascii_uppercase() && prev_is_word {
            out.push('-');
        }
        prev_is_word = ch.is_ascii_alphanumeric() || ch == '_';
        out.push(ch.to_ascii_lowercase());
    }
    out
}

/// Upper-case the first character.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Event name to its handler prop key (`tap` -> `onTap`).
pub fn to_handler_key(event: &str) -> String {
    if event.is_empty() {
        String::new()
    } else {
        format!("on{}", capitalize(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_camelize() {
        assert_eq!(camelize("some-prop"), "someProp");
        assert_eq!(camelize("a-b-c"), "aBC");
        assert_eq!(camelize("already"), "already");
        assert_eq!(camelize("trailing-"), "trailing-");
        assert_eq!(camelize("a--b"), "a-B");
    }

    #[test]
    fn test_hyphenate() {
        assert_eq!(hyphenate("someProp"), "some-prop");
        assert_eq!(hyphenate("FooBar"), "foo-bar");
        assert_eq!(hyphenate("ABC"), "a-b-c");
        assert_eq!(hyphenate("plain"), "plain");
    }

    #[test]
    fn test_handler_key() {
        assert_eq!(to_handler_key("tap"), "onTap");
        assert_eq!(to_handler_key(""), "");
    }

    #[test]
    fn test_value_kind() {
        assert_eq!(value_kind(&json!(null)), ValueKind::Null);
        assert_eq!(value_kind(&json!(1)), ValueKind::Number);
        assert_eq!(value_kind(&json!([1])), ValueKind::Array);
        assert_ne!(value_kind(&json!([1])), value_kind(&json!({"a": 1})));
    }
}
