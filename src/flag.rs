//! Typed CLI flags built from schema properties.
//!
//! Every flag holds a [`FlagValue`], a closed set of kinds that parse raw CLI
//! strings and produce the JSON value placed in the request body.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;

use crate::error::FlagError;

/// Prefix that turns a flag value into a file path read at dispatch time.
pub const INDIRECTION_PREFIX: char = '@';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    String,
    Enum,
    Integer,
    Boolean,
    Array,
    Map,
    Any,
    Base64,
}

impl FlagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Enum => "string (enum)",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Map => "map",
            Self::Any => "any",
            Self::Base64 => "base64",
        }
    }
}

/// Parsed state of a flag, one variant per kind.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagValue {
    String(String),
    Enum {
        allowed: Vec<String>,
        value: Option<String>,
    },
    Integer(Option<i64>),
    Boolean(Option<bool>),
    Array(Vec<String>),
    Map(BTreeMap<String, String>),
    Any(Value),
    Base64(String),
}

impl FlagValue {
    /// Fresh, unset value of `kind`.
    pub fn empty(kind: FlagKind) -> Self {
        match kind {
            FlagKind::String => Self::String(String::new()),
            FlagKind::Enum => Self::Enum {
                allowed: Vec::new(),
                value: None,
            },
            FlagKind::Integer => Self::Integer(None),
            FlagKind::Boolean => Self::Boolean(None),
            FlagKind::Array => Self::Array(Vec::new()),
            FlagKind::Map => Self::Map(BTreeMap::new()),
            FlagKind::Any => Self::Any(Value::Null),
            FlagKind::Base64 => Self::Base64(String::new()),
        }
    }

    pub fn kind(&self) -> FlagKind {
        match self {
            Self::String(_) => FlagKind::String,
            Self::Enum { .. } => FlagKind::Enum,
            Self::Integer(_) => FlagKind::Integer,
            Self::Boolean(_) => FlagKind::Boolean,
            Self::Array(_) => FlagKind::Array,
            Self::Map(_) => FlagKind::Map,
            Self::Any(_) => FlagKind::Any,
            Self::Base64(_) => FlagKind::Base64,
        }
    }

    fn parse(&mut self, name: &str, raw: &str) -> Result<(), FlagError> {
        match self {
            Self::String(s) => *s = raw.to_string(),
            Self::Enum { allowed, value } => {
                if !allowed.iter().any(|v| v == raw) {
                    return Err(FlagError::InvalidEnum {
                        flag: name.to_string(),
                        value: raw.to_string(),
                        allowed: allowed.join(" "),
                    });
                }
                *value = Some(raw.to_string());
            }
            Self::Integer(n) => {
                let parsed = raw.parse().map_err(|source| FlagError::InvalidInteger {
                    flag: name.to_string(),
                    value: raw.to_string(),
                    source,
                })?;
                *n = Some(parsed);
            }
            Self::Boolean(b) => *b = Some(parse_bool(name, raw)?),
            Self::Array(items) => items.extend(split_csv(name, raw)?),
            Self::Map(map) => map.extend(parse_pairs(name, raw)?),
            Self::Any(v) => {
                *v = match parse_pairs(name, raw) {
                    Ok(pairs) if !pairs.is_empty() => Value::Object(
                        pairs
                            .into_iter()
                            .map(|(k, v)| (k, Value::String(v)))
                            .collect(),
                    ),
                    _ => Value::String(raw.to_string()),
                };
            }
            Self::Base64(s) => *s = BASE64.encode(raw.as_bytes()),
        }
        Ok(())
    }

    fn render(&self) -> String {
        match self {
            Self::String(s) | Self::Base64(s) => s.clone(),
            Self::Enum { value, .. } => value.clone().unwrap_or_default(),
            Self::Integer(n) => n.map(|n| n.to_string()).unwrap_or_default(),
            Self::Boolean(b) => b.map(|b| b.to_string()).unwrap_or_default(),
            Self::Array(_) | Self::Map(_) | Self::Any(_) => self.value().to_string(),
        }
    }

    fn value(&self) -> Value {
        match self {
            Self::String(s) | Self::Base64(s) => Value::String(s.clone()),
            Self::Enum { value, .. } => Value::String(value.clone().unwrap_or_default()),
            Self::Integer(n) => n.map(Value::from).unwrap_or(Value::Null),
            Self::Boolean(b) => b.map(Value::Bool).unwrap_or(Value::Null),
            Self::Array(items) => Value::from(items.clone()),
            Self::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
            Self::Any(v) => v.clone(),
        }
    }
}

/// A CLI flag materialized from a schema property.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct Flag {
    pub name: String,
    pub description: String,
    pub required: bool,
    /// Default shown in help; never sent, so server-side defaults apply.
    pub default: Option<String>,
    value: FlagValue,
    indirect: Option<String>,
    set: bool,
}

impl Flag {
    pub fn new(name: impl Into<String>, kind: FlagKind) -> Self {
        Self::with_value(name, FlagValue::empty(kind))
    }

    pub fn with_value(name: impl Into<String>, value: FlagValue) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            required: false,
            default: None,
            value,
            indirect: None,
            set: false,
        }
    }

    pub fn enumeration(name: impl Into<String>, values: &[String]) -> Self {
        let mut flag = Self::new(name, FlagKind::Enum);
        flag.add_values(values);
        flag
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn kind(&self) -> FlagKind {
        self.value.kind()
    }

    pub fn is_set(&self) -> bool {
        self.set
    }

    /// Parse one raw CLI occurrence.
    ///
    /// `@<path>` is kept as a file reference for request assembly instead of
    /// being parsed.
    pub fn set(&mut self, raw: &str) -> Result<(), FlagError> {
        if let Some(path) = raw.strip_prefix(INDIRECTION_PREFIX) {
            self.indirect = Some(path.to_string());
        } else {
            self.value.parse(&self.name, raw)?;
            self.indirect = None;
        }
        self.set = true;
        Ok(())
    }

    /// Canonical string form, as printed and completed.
    pub fn render(&self) -> String {
        match &self.indirect {
            Some(path) => format!("{INDIRECTION_PREFIX}{path}"),
            None => self.value.render(),
        }
    }

    /// JSON value for the request body.
    pub fn value(&self) -> Value {
        self.value.value()
    }

    /// File path from an `@<path>` value, if any.
    pub fn indirection(&self) -> Option<&str> {
        self.indirect.as_deref()
    }

    /// Union `values` into the accepted set of an enum flag. No-op for other
    /// kinds.
    pub fn add_values(&mut self, values: &[String]) {
        if let FlagValue::Enum { allowed, .. } = &mut self.value {
            for v in values {
                let v = v.trim();
                if !allowed.iter().any(|a| a == v) {
                    allowed.push(v.to_string());
                }
            }
        }
    }

    pub fn allowed_values(&self) -> &[String] {
        match &self.value {
            FlagValue::Enum { allowed, .. } => allowed,
            _ => &[],
        }
    }

    /// Overwrite the items of an array flag and mark it set.
    pub fn replace_items(&mut self, items: Vec<String>) -> bool {
        match &mut self.value {
            FlagValue::Array(current) => {
                *current = items;
                self.indirect = None;
                self.set = true;
                true
            }
            _ => false,
        }
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, FlagError> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(FlagError::InvalidBoolean {
            flag: name.to_string(),
            value: raw.to_string(),
        }),
    }
}

/// `key1:value1,key2:value2` → pairs. Each field must hold exactly one colon.
fn parse_pairs(name: &str, raw: &str) -> Result<Vec<(String, String)>, FlagError> {
    split_csv(name, raw)?
        .into_iter()
        .map(|pair| {
            let mut parts = pair.split(':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(k), Some(v), None) => Ok((k.to_string(), v.to_string())),
                _ => Err(FlagError::InvalidPair {
                    flag: name.to_string(),
                    pair,
                }),
            }
        })
        .collect()
}

/// Split one CSV record. Fields may be wrapped in double quotes, with `""`
/// standing for a literal quote. Empty input yields no fields.
pub fn split_csv(name: &str, raw: &str) -> Result<Vec<String>, FlagError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = raw.chars().peekable();
    let mut quoted = false;
    let mut at_field_start = true;

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => quoted = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if at_field_start => {
                quoted = true;
                at_field_start = false;
            }
            ',' => {
                fields.push(std::mem::take(&mut field));
                at_field_start = true;
            }
            _ => {
                field.push(c);
                at_field_start = false;
            }
        }
    }

    if quoted {
        return Err(FlagError::UnterminatedQuote {
            flag: name.to_string(),
            value: raw.to_string(),
        });
    }
    fields.push(field);
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_flag_defaults_to_empty() {
        let mut flag = Flag::new("name", FlagKind::String);
        assert!(!flag.is_set());
        assert_eq!(flag.value(), json!(""));

        flag.set("pod-1").unwrap();
        assert!(flag.is_set());
        assert_eq!(flag.render(), "pod-1");
        assert_eq!(flag.value(), json!("pod-1"));
    }

    #[test]
    fn enum_flag_rejects_unknown_values_listing_the_set() {
        let mut flag = Flag::enumeration("algorithm", &["AES".into(), "RSA".into()]);
        flag.set("RSA").unwrap();
        assert_eq!(flag.value(), json!("RSA"));

        let err = flag.set("DES").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("--algorithm"), "got: {msg}");
        assert!(msg.contains("[AES RSA]"), "got: {msg}");
    }

    #[test]
    fn enum_values_are_unioned() {
        let mut flag = Flag::enumeration("mode", &["a".into(), "b".into()]);
        flag.add_values(&["b".into(), " c ".into()]);
        assert_eq!(flag.allowed_values(), ["a", "b", "c"]);
    }

    #[test]
    fn integer_flag_parses_base10() {
        let mut flag = Flag::new("count", FlagKind::Integer);
        assert_eq!(flag.value(), Value::Null);
        flag.set("42").unwrap();
        assert_eq!(flag.value(), json!(42));
        assert_eq!(flag.render(), "42");
        assert!(matches!(
            flag.set("forty"),
            Err(FlagError::InvalidInteger { .. })
        ));
    }

    #[test]
    fn boolean_flag_accepts_literals() {
        let mut flag = Flag::new("verbose", FlagKind::Boolean);
        flag.set("1").unwrap();
        assert_eq!(flag.value(), json!(true));
        flag.set("false").unwrap();
        assert_eq!(flag.value(), json!(false));
        assert!(flag.set("maybe").is_err());
    }

    #[test]
    fn array_flag_appends_across_sets() {
        let mut flag = Flag::new("hashes", FlagKind::Array);
        flag.set("a,b").unwrap();
        flag.set("c").unwrap();
        assert_eq!(flag.value(), json!(["a", "b", "c"]));
        assert_eq!(flag.render(), r#"["a","b","c"]"#);
    }

    #[test]
    fn array_flag_empty_input_is_empty_list() {
        let mut flag = Flag::new("hashes", FlagKind::Array);
        flag.set("").unwrap();
        assert_eq!(flag.value(), json!([]));
    }

    #[test]
    fn array_flag_honors_quotes() {
        let mut flag = Flag::new("names", FlagKind::Array);
        flag.set(r#""a,b",c,"say ""hi""""#).unwrap();
        assert_eq!(flag.value(), json!(["a,b", "c", r#"say "hi""#]));
        assert!(matches!(
            flag.set(r#""open"#),
            Err(FlagError::UnterminatedQuote { .. })
        ));
    }

    #[test]
    fn map_flag_parses_pairs() {
        let mut flag = Flag::new("labels", FlagKind::Map);
        flag.set("key1:value1,key2:value2").unwrap();
        assert_eq!(flag.value(), json!({"key1": "value1", "key2": "value2"}));
    }

    #[test]
    fn map_flag_rejects_pair_without_colon() {
        let mut flag = Flag::new("labels", FlagKind::Map);
        let err = flag.set("key1").unwrap_err();
        assert!(matches!(err, FlagError::InvalidPair { ref pair, .. } if pair == "key1"));
        assert!(flag.set("a:b:c").is_err());
    }

    #[test]
    fn any_flag_falls_back_to_raw_string() {
        let mut flag = Flag::new("fields", FlagKind::Any);
        flag.set("a:1,b:2").unwrap();
        assert_eq!(flag.value(), json!({"a": "1", "b": "2"}));

        flag.set("plain text").unwrap();
        assert_eq!(flag.value(), json!("plain text"));
    }

    #[test]
    fn base64_flag_encodes_input() {
        let mut flag = Flag::new("data", FlagKind::Base64);
        flag.set("hello").unwrap();
        assert_eq!(flag.value(), json!("aGVsbG8="));
    }

    #[test]
    fn indirection_is_kept_for_every_kind() {
        let mut flag = Flag::new("count", FlagKind::Integer);
        flag.set("@count.txt").unwrap();
        assert!(flag.is_set());
        assert_eq!(flag.indirection(), Some("count.txt"));
        assert_eq!(flag.render(), "@count.txt");

        flag.set("7").unwrap();
        assert_eq!(flag.indirection(), None);
        assert_eq!(flag.value(), json!(7));
    }

    #[test]
    fn replace_items_only_applies_to_arrays() {
        let mut array = Flag::new("hashes", FlagKind::Array);
        array.set("old").unwrap();
        assert!(array.replace_items(vec!["x".into(), "y".into()]));
        assert_eq!(array.value(), json!(["x", "y"]));

        let mut string = Flag::new("name", FlagKind::String);
        assert!(!string.replace_items(vec!["x".into()]));
        assert!(!string.is_set());
    }

    #[test]
    fn split_csv_keeps_empty_fields() {
        assert_eq!(split_csv("f", "a,,b").unwrap(), vec!["a", "", "b"]);
        assert!(split_csv("f", "").unwrap().is_empty());
    }
}
