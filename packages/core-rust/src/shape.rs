//! Input shapes: the declared contract an action's raw input is parsed
//! against before anything else runs.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::entity::FieldType;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static email pattern")
});

/// Machine-readable reason attached to every field diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    Required,
    InvalidType,
    InvalidString,
    InvalidEnumValue,
    InvalidDate,
    TooSmall,
    TooBig,
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    /// Dotted path to the offending value; empty for the input root.
    pub path: String,
    pub message: String,
    pub code: IssueCode,
}

impl FieldIssue {
    #[must_use]
    pub fn new(path: impl Into<String>, code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            code,
        }
    }
}

/// What a shape field accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShapeKind {
    /// A declared entity field.
    Field {
        field_type: FieldType,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        options: Vec<String>,
    },
    /// A record identifier.
    Uuid,
    Integer {
        min: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    /// One of a fixed set of strings.
    OneOf { values: Vec<String> },
    /// A flat object whose keys must come from `keys`.
    Object { keys: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeField {
    pub name: String,
    pub kind: ShapeKind,
    /// Must be present (after defaults are applied).
    pub required: bool,
    /// May be explicitly set to `null`.
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ShapeField {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ShapeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            nullable: false,
            default: None,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Declared input contract for one action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputShape {
    pub fields: Vec<ShapeField>,
}

impl InputShape {
    #[must_use]
    pub fn new(fields: Vec<ShapeField>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&ShapeField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Parses `input` against the shape.
    ///
    /// Unknown keys are dropped and defaults are filled in for omitted
    /// fields. All offending fields are reported, not just the first.
    ///
    /// # Errors
    ///
    /// Returns one [`FieldIssue`] per field that violates the shape.
    pub fn parse(&self, input: &Value) -> Result<Map<String, Value>, Vec<FieldIssue>> {
        let empty = Map::new();
        let object = match input {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(vec![FieldIssue::new(
                    "",
                    IssueCode::InvalidType,
                    format!("expected object, received {}", type_name(other)),
                )])
            }
        };

        let mut parsed = Map::new();
        let mut issues = Vec::new();
        for field in &self.fields {
            match object.get(&field.name) {
                None => {
                    if let Some(default) = &field.default {
                        parsed.insert(field.name.clone(), default.clone());
                    } else if field.required {
                        issues.push(FieldIssue::new(&field.name, IssueCode::Required, "required"));
                    }
                }
                Some(Value::Null) => {
                    if field.nullable {
                        parsed.insert(field.name.clone(), Value::Null);
                    } else if let Some(default) = &field.default {
                        parsed.insert(field.name.clone(), default.clone());
                    } else {
                        issues.push(FieldIssue::new(
                            &field.name,
                            IssueCode::Required,
                            "must not be null",
                        ));
                    }
                }
                Some(value) => match check_kind(&field.kind, value) {
                    Ok(()) => {
                        parsed.insert(field.name.clone(), value.clone());
                    }
                    Err(issue) => issues.push(FieldIssue {
                        path: join_path(&field.name, &issue.path),
                        ..issue
                    }),
                },
            }
        }

        if issues.is_empty() {
            Ok(parsed)
        } else {
            Err(issues)
        }
    }

    /// JSON-schema-like description for protocol adapters.
    #[must_use]
    pub fn describe(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            let mut prop = match &field.kind {
                ShapeKind::Field { field_type, options } => {
                    let mut p = json!({ "type": json_type(*field_type), "format": field_type.as_str() });
                    if !options.is_empty() {
                        p["enum"] = json!(options);
                    }
                    p
                }
                ShapeKind::Uuid => json!({ "type": "string", "format": "uuid" }),
                ShapeKind::Integer { min, max } => {
                    let mut p = json!({ "type": "integer", "minimum": min });
                    if let Some(max) = max {
                        p["maximum"] = json!(max);
                    }
                    p
                }
                ShapeKind::OneOf { values } => json!({ "type": "string", "enum": values }),
                ShapeKind::Object { keys } => json!({ "type": "object", "propertyNames": { "enum": keys } }),
            };
            if field.nullable {
                prop["nullable"] = json!(true);
            }
            if let Some(default) = &field.default {
                prop["default"] = default.clone();
            }
            if field.required {
                required.push(field.name.clone());
            }
            properties.insert(field.name.clone(), prop);
        }
        json!({ "type": "object", "properties": properties, "required": required })
    }
}

fn join_path(base: &str, inner: &str) -> String {
    if inner.is_empty() {
        base.to_string()
    } else {
        format!("{base}.{inner}")
    }
}

fn json_type(field_type: FieldType) -> &'static str {
    if field_type.is_numeric() {
        "number"
    } else if field_type == FieldType::Boolean {
        "boolean"
    } else {
        "string"
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check_kind(kind: &ShapeKind, value: &Value) -> Result<(), FieldIssue> {
    match kind {
        ShapeKind::Field { field_type, options } => check_field_value(*field_type, options, value),
        ShapeKind::Uuid => match value.as_str() {
            Some(s) if uuid::Uuid::parse_str(s).is_ok() => Ok(()),
            Some(_) => Err(FieldIssue::new("", IssueCode::InvalidString, "invalid uuid")),
            None => Err(expected("string", value)),
        },
        ShapeKind::Integer { min, max } => {
            let Some(n) = value.as_i64() else {
                return Err(expected("integer", value));
            };
            if n < *min {
                return Err(FieldIssue::new(
                    "",
                    IssueCode::TooSmall,
                    format!("must be greater than or equal to {min}"),
                ));
            }
            if let Some(max) = max {
                if n > *max {
                    return Err(FieldIssue::new(
                        "",
                        IssueCode::TooBig,
                        format!("must be less than or equal to {max}"),
                    ));
                }
            }
            Ok(())
        }
        ShapeKind::OneOf { values } => match value.as_str() {
            Some(s) if values.iter().any(|v| v == s) => Ok(()),
            Some(s) => Err(FieldIssue::new(
                "",
                IssueCode::InvalidEnumValue,
                format!("`{s}` is not one of: {}", values.join(", ")),
            )),
            None => Err(expected("string", value)),
        },
        ShapeKind::Object { keys } => {
            let Some(map) = value.as_object() else {
                return Err(expected("object", value));
            };
            match map.keys().find(|k| !keys.contains(k)) {
                Some(unknown) => Err(FieldIssue::new(
                    unknown.as_str(),
                    IssueCode::InvalidEnumValue,
                    format!("`{unknown}` is not a filterable field"),
                )),
                None => Ok(()),
            }
        }
    }
}

fn expected(what: &str, value: &Value) -> FieldIssue {
    FieldIssue::new(
        "",
        IssueCode::InvalidType,
        format!("expected {what}, received {}", type_name(value)),
    )
}

/// Checks a single non-null value against a logical field type.
///
/// Shared by input validation and by default-value checks, so a default
/// that would be rejected as input is rejected as a default too.
///
/// # Errors
///
/// Returns a [`FieldIssue`] with an empty path describing the mismatch.
pub fn check_field_value(
    field_type: FieldType,
    options: &[String],
    value: &Value,
) -> Result<(), FieldIssue> {
    match field_type {
        FieldType::Boolean => value.as_bool().map(|_| ()).ok_or_else(|| expected("boolean", value)),
        FieldType::Number | FieldType::Currency => {
            value.as_f64().map(|_| ()).ok_or_else(|| expected("number", value))
        }
        FieldType::Percentage => {
            let n = value.as_f64().ok_or_else(|| expected("number", value))?;
            if n < 0.0 {
                Err(FieldIssue::new("", IssueCode::TooSmall, "must be at least 0"))
            } else if n > 100.0 {
                Err(FieldIssue::new("", IssueCode::TooBig, "must be at most 100"))
            } else {
                Ok(())
            }
        }
        FieldType::Text | FieldType::Phone | FieldType::RichText => {
            value.as_str().map(|_| ()).ok_or_else(|| expected("string", value))
        }
        FieldType::Email => {
            let s = value.as_str().ok_or_else(|| expected("string", value))?;
            if EMAIL.is_match(s) {
                Ok(())
            } else {
                Err(FieldIssue::new("", IssueCode::InvalidString, "invalid email"))
            }
        }
        FieldType::Url => {
            let s = value.as_str().ok_or_else(|| expected("string", value))?;
            let valid = s
                .split_once("://")
                .is_some_and(|(scheme, rest)| matches!(scheme, "http" | "https") && !rest.is_empty());
            if valid {
                Ok(())
            } else {
                Err(FieldIssue::new("", IssueCode::InvalidString, "invalid url"))
            }
        }
        FieldType::Enum => {
            let s = value.as_str().ok_or_else(|| expected("string", value))?;
            if options.is_empty() || options.iter().any(|o| o == s) {
                Ok(())
            } else {
                Err(FieldIssue::new(
                    "",
                    IssueCode::InvalidEnumValue,
                    format!("`{s}` is not one of: {}", options.join(", ")),
                ))
            }
        }
        FieldType::Date => {
            let s = value.as_str().ok_or_else(|| expected("string", value))?;
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(|_| ())
                .map_err(|_| FieldIssue::new("", IssueCode::InvalidDate, "expected YYYY-MM-DD"))
        }
        FieldType::Datetime => {
            let s = value.as_str().ok_or_else(|| expected("string", value))?;
            DateTime::parse_from_rfc3339(s)
                .map(|_| ())
                .map_err(|_| FieldIssue::new("", IssueCode::InvalidDate, "expected RFC 3339 datetime"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> InputShape {
        InputShape::new(vec![
            ShapeField::new("title", ShapeKind::Field { field_type: FieldType::Text, options: vec![] })
                .required(),
            ShapeField::new(
                "status",
                ShapeKind::Field {
                    field_type: FieldType::Enum,
                    options: vec!["todo".into(), "done".into()],
                },
            )
            .with_default(json!("todo")),
            ShapeField::new("email", ShapeKind::Field { field_type: FieldType::Email, options: vec![] })
                .nullable(),
            ShapeField::new("projectId", ShapeKind::Uuid).nullable(),
        ])
    }

    #[test]
    fn applies_defaults_and_strips_unknown_keys() {
        let parsed = shape().parse(&json!({"title": "Write docs", "bogus": 1})).unwrap();
        assert_eq!(parsed.get("status"), Some(&json!("todo")));
        assert!(!parsed.contains_key("bogus"));
    }

    #[test]
    fn reports_every_offending_field() {
        let issues = shape()
            .parse(&json!({"status": "archived", "email": "nope", "projectId": "x"}))
            .unwrap_err();
        let codes: Vec<(&str, IssueCode)> =
            issues.iter().map(|i| (i.path.as_str(), i.code)).collect();
        assert_eq!(
            codes,
            vec![
                ("title", IssueCode::Required),
                ("status", IssueCode::InvalidEnumValue),
                ("email", IssueCode::InvalidString),
                ("projectId", IssueCode::InvalidString),
            ]
        );
    }

    #[test]
    fn null_only_allowed_for_nullable_fields() {
        let parsed = shape().parse(&json!({"title": "t", "email": null})).unwrap();
        assert_eq!(parsed.get("email"), Some(&Value::Null));

        let issues = shape().parse(&json!({"title": null})).unwrap_err();
        assert_eq!(issues[0].code, IssueCode::Required);
    }

    #[test]
    fn non_object_input_rejected_at_root() {
        let issues = shape().parse(&json!([1, 2])).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "");
        assert_eq!(issues[0].code, IssueCode::InvalidType);
    }

    #[test]
    fn enum_without_options_degrades_to_free_text() {
        assert!(check_field_value(FieldType::Enum, &[], &json!("anything")).is_ok());
    }

    #[test]
    fn field_type_checks() {
        assert!(check_field_value(FieldType::Percentage, &[], &json!(42.5)).is_ok());
        assert_eq!(
            check_field_value(FieldType::Percentage, &[], &json!(140)).unwrap_err().code,
            IssueCode::TooBig
        );
        assert!(check_field_value(FieldType::Date, &[], &json!("2024-02-29")).is_ok());
        assert_eq!(
            check_field_value(FieldType::Date, &[], &json!("2024-13-01")).unwrap_err().code,
            IssueCode::InvalidDate
        );
        assert!(check_field_value(FieldType::Datetime, &[], &json!("2024-05-01T10:00:00Z")).is_ok());
        assert!(check_field_value(FieldType::Url, &[], &json!("https://example.com")).is_ok());
        assert!(check_field_value(FieldType::Url, &[], &json!("ftp://example.com")).is_err());
        assert_eq!(
            check_field_value(FieldType::Boolean, &[], &json!("true")).unwrap_err().code,
            IssueCode::InvalidType
        );
    }

    #[test]
    fn integer_and_object_kinds() {
        let shape = InputShape::new(vec![
            ShapeField::new("limit", ShapeKind::Integer { min: 1, max: Some(100) }),
            ShapeField::new("where", ShapeKind::Object { keys: vec!["status".into()] }),
        ]);
        let issues = shape
            .parse(&json!({"limit": 500, "where": {"secret": 1}}))
            .unwrap_err();
        assert_eq!(issues[0].code, IssueCode::TooBig);
        assert_eq!(issues[1].path, "where.secret");
    }

    #[test]
    fn describe_marks_required_fields() {
        let described = shape().describe();
        assert_eq!(described["required"], json!(["title"]));
        assert_eq!(described["properties"]["status"]["default"], json!("todo"));
    }
}
