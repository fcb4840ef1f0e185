//! Setting definitions and values
//!
//! A module declares `SettingDef`s; the profile cache clones them into
//! `SettingInstance`s bound to a tenant's stored value. Every kind knows how
//! to validate a value, convert it to and from its stored JSON form, and
//! parse it from operator text.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::errors::SettingError;

static SNOWFLAKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,20}$").expect("valid regex"));

/// Closed set of setting value shapes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SettingKind {
    Boolean,
    Number {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Text {
        #[serde(default)]
        max_length: Option<usize>,
    },
    Select {
        options: Vec<String>,
    },
    Role,
    Channel,
    Member,
    Array {
        item: Box<SettingKind>,
    },
    Complex {
        fields: BTreeMap<String, SettingKind>,
        #[serde(default)]
        optional: Vec<String>,
    },
}

/// A live setting value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<SettingValue>),
    Map(BTreeMap<String, SettingValue>),
}

impl SettingValue {
    pub fn text(value: impl Into<String>) -> Self {
        SettingValue::Text(value.into())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SettingValue::Null)
    }

    fn type_name(&self) -> &'static str {
        match self {
            SettingValue::Null => "null",
            SettingValue::Bool(_) => "boolean",
            SettingValue::Number(_) => "number",
            SettingValue::Text(_) => "text",
            SettingValue::List(_) => "list",
            SettingValue::Map(_) => "map",
        }
    }
}

impl std::fmt::Display for SettingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingValue::Null => write!(f, "none"),
            SettingValue::Bool(b) => write!(f, "{}", b),
            SettingValue::Number(n) => write!(f, "{}", n),
            SettingValue::Text(s) => write!(f, "{}", s),
            SettingValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "{}", parts.join(", "))
            }
            SettingValue::Map(fields) => {
                let parts: Vec<String> = fields.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                write!(f, "{}", parts.join(", "))
            }
        }
    }
}

fn mismatch(expected: &str, found: &str) -> SettingError {
    SettingError::TypeMismatch {
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "text",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

fn number_to_json(n: f64) -> Result<Value, SettingError> {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return Ok(Value::from(n as i64));
    }
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| SettingError::Parse(format!("{} is not a finite number", n)))
}

fn strip_mention(input: &str) -> &str {
    let inner = input
        .strip_prefix("<@&")
        .or_else(|| input.strip_prefix("<@!"))
        .or_else(|| input.strip_prefix("<@"))
        .or_else(|| input.strip_prefix("<#"));
    match inner {
        Some(rest) => rest.strip_suffix('>').unwrap_or(rest),
        None => input,
    }
}

impl SettingKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            SettingKind::Boolean => "boolean",
            SettingKind::Number { .. } => "number",
            SettingKind::Text { .. } => "text",
            SettingKind::Select { .. } => "select",
            SettingKind::Role => "role",
            SettingKind::Channel => "channel",
            SettingKind::Member => "member",
            SettingKind::Array { .. } => "array",
            SettingKind::Complex { .. } => "complex",
        }
    }

    fn is_id(&self) -> bool {
        matches!(self, SettingKind::Role | SettingKind::Channel | SettingKind::Member)
    }

    /// Check that `value` is acceptable for this kind
    pub fn validate(&self, value: &SettingValue) -> Result<(), SettingError> {
        match (self, value) {
            (SettingKind::Boolean, SettingValue::Bool(_)) => Ok(()),
            (SettingKind::Number { min, max }, SettingValue::Number(n)) => {
                let lo = min.unwrap_or(f64::NEG_INFINITY);
                let hi = max.unwrap_or(f64::INFINITY);
                if n.is_nan() || *n < lo || *n > hi {
                    return Err(SettingError::OutOfRange { value: *n, min: lo, max: hi });
                }
                Ok(())
            }
            (SettingKind::Text { max_length }, SettingValue::Text(s)) => match max_length {
                Some(limit) if s.chars().count() > *limit => Err(SettingError::TooLong(*limit)),
                _ => Ok(()),
            },
            (SettingKind::Select { options }, SettingValue::Text(s)) => {
                if options.iter().any(|o| o == s) {
                    Ok(())
                } else {
                    Err(SettingError::InvalidOption(s.clone()))
                }
            }
            (kind, SettingValue::Null) if kind.is_id() => Ok(()),
            (kind, SettingValue::Text(s)) if kind.is_id() => {
                if SNOWFLAKE.is_match(s) {
                    Ok(())
                } else {
                    Err(SettingError::InvalidId(s.clone()))
                }
            }
            (SettingKind::Array { item }, SettingValue::List(items)) => {
                items.iter().try_for_each(|v| item.validate(v))
            }
            (SettingKind::Complex { fields, optional }, SettingValue::Map(values)) => {
                for (name, kind) in fields {
                    match values.get(name) {
                        Some(v) => kind.validate(v)?,
                        None if optional.contains(name) => {}
                        None => return Err(SettingError::MissingField(name.clone())),
                    }
                }
                Ok(())
            }
            (kind, other) => Err(mismatch(kind.type_name(), other.type_name())),
        }
    }

    /// Validate and convert to the stored JSON form
    pub fn to_database(&self, value: &SettingValue) -> Result<Value, SettingError> {
        self.validate(value)?;
        self.encode(value)
    }

    fn encode(&self, value: &SettingValue) -> Result<Value, SettingError> {
        Ok(match (self, value) {
            (_, SettingValue::Null) => Value::Null,
            (_, SettingValue::Bool(b)) => Value::Bool(*b),
            (_, SettingValue::Number(n)) => number_to_json(*n)?,
            (_, SettingValue::Text(s)) => Value::String(s.clone()),
            (SettingKind::Array { item }, SettingValue::List(items)) => Value::Array(
                items
                    .iter()
                    .map(|v| item.encode(v))
                    .collect::<Result<_, _>>()?,
            ),
            (SettingKind::Complex { fields, .. }, SettingValue::Map(values)) => {
                let mut out = serde_json::Map::new();
                for (name, v) in values {
                    if let Some(kind) = fields.get(name) {
                        out.insert(name.clone(), kind.encode(v)?);
                    }
                }
                Value::Object(out)
            }
            (kind, other) => return Err(mismatch(kind.type_name(), other.type_name())),
        })
    }

    /// Convert a stored JSON value back into a live value
    pub fn from_database(&self, raw: &Value) -> Result<SettingValue, SettingError> {
        let value = match (self, raw) {
            (SettingKind::Boolean, Value::Bool(b)) => SettingValue::Bool(*b),
            (SettingKind::Number { .. }, Value::Number(n)) => {
                SettingValue::Number(n.as_f64().ok_or_else(|| SettingError::Parse(n.to_string()))?)
            }
            (SettingKind::Text { .. } | SettingKind::Select { .. }, Value::String(s)) => {
                SettingValue::Text(s.clone())
            }
            (kind, Value::Null) if kind.is_id() => SettingValue::Null,
            (kind, Value::String(s)) if kind.is_id() => SettingValue::Text(s.clone()),
            (kind, Value::Number(n)) if kind.is_id() => SettingValue::Text(n.to_string()),
            (SettingKind::Array { item }, Value::Array(items)) => SettingValue::List(
                items
                    .iter()
                    .map(|v| item.from_database(v))
                    .collect::<Result<_, _>>()?,
            ),
            (SettingKind::Complex { fields, .. }, Value::Object(map)) => {
                let mut out = BTreeMap::new();
                for (name, kind) in fields {
                    if let Some(v) = map.get(name) {
                        out.insert(name.clone(), kind.from_database(v)?);
                    }
                }
                SettingValue::Map(out)
            }
            (kind, other) => return Err(mismatch(kind.type_name(), json_type(other))),
        };
        self.validate(&value)?;
        Ok(value)
    }

    /// Parse operator-typed text into a value of this kind
    pub fn parse_input(&self, input: &str) -> Result<SettingValue, SettingError> {
        let input = input.trim();
        let value = match self {
            SettingKind::Boolean => match input.to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" | "enable" | "enabled" => SettingValue::Bool(true),
                "false" | "no" | "off" | "0" | "disable" | "disabled" => SettingValue::Bool(false),
                _ => return Err(SettingError::Parse(format!("'{}' is not a boolean", input))),
            },
            SettingKind::Number { .. } => input
                .parse::<f64>()
                .map(SettingValue::Number)
                .map_err(|_| SettingError::Parse(format!("'{}' is not a number", input)))?,
            SettingKind::Text { .. } => SettingValue::text(input),
            SettingKind::Select { options } => options
                .iter()
                .find(|o| o.eq_ignore_ascii_case(input))
                .map(|o| SettingValue::text(o.as_str()))
                .ok_or_else(|| SettingError::InvalidOption(input.to_string()))?,
            SettingKind::Role | SettingKind::Channel | SettingKind::Member => {
                if input.eq_ignore_ascii_case("none") {
                    SettingValue::Null
                } else {
                    SettingValue::text(strip_mention(input))
                }
            }
            SettingKind::Array { item } => SettingValue::List(
                input
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| item.parse_input(s))
                    .collect::<Result<_, _>>()?,
            ),
            SettingKind::Complex { .. } => {
                let raw: Value =
                    serde_json::from_str(input).map_err(|e| SettingError::Parse(e.to_string()))?;
                return self.from_database(&raw);
            }
        };
        self.validate(&value)?;
        Ok(value)
    }
}

/// A setting a module declares for tenants or members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingDef {
    pub id: String,
    pub name: String,
    pub description: String,
    pub kind: SettingKind,
    pub default: SettingValue,
    /// Name and description are translation keys
    #[serde(default)]
    pub locales: bool,
    /// Declaring module, filled in at load
    #[serde(default)]
    pub module: String,
}

impl SettingDef {
    pub fn new(id: impl Into<String>, kind: SettingKind, default: SettingValue) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            kind,
            default,
            locales: false,
            module: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn localized(mut self) -> Self {
        self.locales = true;
        self
    }

    /// Bind an independent copy of this definition to `value`
    pub fn instantiate(&self, value: SettingValue) -> SettingInstance {
        SettingInstance {
            def: self.clone(),
            value,
        }
    }

    /// Bind a copy to the stored value, or to the default when absent
    pub fn from_stored(&self, raw: Option<&Value>) -> Result<SettingInstance, SettingError> {
        match raw {
            Some(raw) => Ok(self.instantiate(self.kind.from_database(raw)?)),
            None => Ok(self.instantiate(self.default.clone())),
        }
    }
}

/// A definition bound to a live value
#[derive(Debug, Clone, PartialEq)]
pub struct SettingInstance {
    pub def: SettingDef,
    pub value: SettingValue,
}

impl SettingInstance {
    pub fn id(&self) -> &str {
        &self.def.id
    }

    pub fn to_database(&self) -> Result<Value, SettingError> {
        self.def.kind.to_database(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn language() -> SettingKind {
        SettingKind::Select {
            options: vec!["en".into(), "pt".into()],
        }
    }

    #[test]
    fn boolean_input_words() {
        let kind = SettingKind::Boolean;
        assert_eq!(kind.parse_input("Yes").unwrap(), SettingValue::Bool(true));
        assert_eq!(kind.parse_input("off").unwrap(), SettingValue::Bool(false));
        assert!(kind.parse_input("maybe").is_err());
    }

    #[test]
    fn number_range_is_enforced() {
        let kind = SettingKind::Number { min: Some(1.0), max: Some(10.0) };
        assert!(kind.parse_input("5").is_ok());
        assert!(matches!(kind.parse_input("11"), Err(SettingError::OutOfRange { .. })));
        assert!(matches!(kind.from_database(&json!(0)), Err(SettingError::OutOfRange { .. })));
    }

    #[test]
    fn whole_numbers_are_stored_as_integers() {
        let kind = SettingKind::Number { min: None, max: None };
        assert_eq!(kind.to_database(&SettingValue::Number(3.0)).unwrap(), json!(3));
        assert_eq!(kind.to_database(&SettingValue::Number(2.5)).unwrap(), json!(2.5));
    }

    #[test]
    fn text_length_limit() {
        let kind = SettingKind::Text { max_length: Some(3) };
        assert!(kind.parse_input("abc").is_ok());
        assert_eq!(kind.parse_input("abcd"), Err(SettingError::TooLong(3)));
    }

    #[test]
    fn select_normalizes_case() {
        assert_eq!(language().parse_input("PT").unwrap(), SettingValue::text("pt"));
        assert!(matches!(language().parse_input("de"), Err(SettingError::InvalidOption(_))));
        assert!(language().from_database(&json!("fr")).is_err());
    }

    #[test]
    fn id_kinds_strip_mentions() {
        assert_eq!(SettingKind::Role.parse_input("<@&123>").unwrap(), SettingValue::text("123"));
        assert_eq!(SettingKind::Channel.parse_input("<#42>").unwrap(), SettingValue::text("42"));
        assert_eq!(SettingKind::Member.parse_input("<@!7>").unwrap(), SettingValue::text("7"));
        assert_eq!(SettingKind::Role.parse_input("none").unwrap(), SettingValue::Null);
        assert!(matches!(SettingKind::Role.parse_input("abc"), Err(SettingError::InvalidId(_))));
    }

    #[test]
    fn numeric_ids_from_database_become_text() {
        assert_eq!(SettingKind::Channel.from_database(&json!(99)).unwrap(), SettingValue::text("99"));
    }

    #[test]
    fn array_of_roles() {
        let kind = SettingKind::Array { item: Box::new(SettingKind::Role) };
        let value = kind.parse_input("<@&1>, 2,").unwrap();
        assert_eq!(
            value,
            SettingValue::List(vec![SettingValue::text("1"), SettingValue::text("2")])
        );
        assert_eq!(kind.to_database(&value).unwrap(), json!(["1", "2"]));
    }

    #[test]
    fn complex_requires_non_optional_fields() {
        let kind = SettingKind::Complex {
            fields: BTreeMap::from([
                ("channel".to_string(), SettingKind::Channel),
                ("message".to_string(), SettingKind::Text { max_length: None }),
            ]),
            optional: vec!["message".into()],
        };

        let value = kind.parse_input(r#"{"channel": "5"}"#).unwrap();
        assert_eq!(kind.to_database(&value).unwrap(), json!({"channel": "5"}));
        assert_eq!(
            kind.parse_input(r#"{"message": "hi"}"#),
            Err(SettingError::MissingField("channel".into()))
        );
    }

    #[test]
    fn stored_values_round_trip_per_kind() {
        let cases = vec![
            (SettingKind::Boolean, SettingValue::Bool(true)),
            (SettingKind::Number { min: None, max: None }, SettingValue::Number(1.5)),
            (SettingKind::Text { max_length: None }, SettingValue::text("hello")),
            (language(), SettingValue::text("en")),
            (SettingKind::Member, SettingValue::Null),
        ];
        for (kind, value) in cases {
            let stored = kind.to_database(&value).unwrap();
            assert_eq!(kind.from_database(&stored).unwrap(), value, "{}", kind.type_name());
        }
    }

    #[test]
    fn instances_are_independent_copies() {
        let def = SettingDef::new("language", language(), SettingValue::text("en"));
        let mut a = def.from_stored(None).unwrap();
        let b = def.from_stored(Some(&json!("pt"))).unwrap();
        a.value = SettingValue::text("pt");

        assert_eq!(def.default, SettingValue::text("en"));
        assert_eq!(b.value, SettingValue::text("pt"));
        assert_eq!(a.id(), "language");
    }

    #[test]
    fn kind_deserializes_from_tagged_json() {
        let kind: SettingKind =
            serde_json::from_value(json!({"type": "number", "min": 0.0})).unwrap();
        assert_eq!(kind, SettingKind::Number { min: Some(0.0), max: None });
    }
}
