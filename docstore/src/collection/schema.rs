use crate::collection::Document;
use crate::common::Value;
use crate::errors::{DocStoreError, DocStoreResult, ErrorKind};
use crate::filter::{field_equals, Pattern};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Expected JSON type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    #[serde(alias = "document")]
    Object,
}

impl FieldType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => matches!(value, Value::I64(_)),
            FieldType::Boolean => value.is_bool(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_document(),
        }
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        };
        write!(f, "{}", name)
    }
}

/// Constraints on one field.
///
/// `min` and `max` bound numbers by value and strings and arrays by length.
/// `pattern` applies to strings. A missing or null field only fails when it
/// is `required`; the other constraints are skipped for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

impl FieldRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn of_type(mut self, field_type: FieldType) -> Self {
        self.field_type = Some(field_type);
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }

    pub fn one_of<T: Into<Value>>(mut self, values: Vec<T>) -> Self {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    fn check(&self, field: &str, value: Option<&Value>, errors: &mut Vec<String>) {
        let value = match value {
            Some(value) if !value.is_null() => value,
            _ => {
                if self.required {
                    errors.push(format!("{} is required", field));
                }
                return;
            }
        };

        if let Some(field_type) = &self.field_type {
            if !field_type.accepts(value) {
                errors.push(format!(
                    "{} must be of type {}, found {}",
                    field,
                    field_type,
                    value.type_name()
                ));
                return;
            }
        }

        let measured = match value {
            Value::String(s) => Some(s.chars().count() as f64),
            Value::Array(items) => Some(items.len() as f64),
            number if number.is_number() => number.as_f64(),
            _ => None,
        };
        if let Some(measured) = measured {
            if let Some(min) = self.min {
                if measured < min {
                    errors.push(format!("{} is below the minimum {}", field, min));
                }
            }
            if let Some(max) = self.max {
                if measured > max {
                    errors.push(format!("{} is above the maximum {}", field, max));
                }
            }
        }

        if let (Some(source), Value::String(text)) = (&self.pattern, value) {
            match Pattern::compile(source) {
                Ok(pattern) if pattern.is_match(text) => {}
                Ok(_) => errors.push(format!("{} does not match pattern {}", field, source)),
                Err(_) => errors.push(format!("{} has an invalid pattern {}", field, source)),
            }
        }

        if let Some(allowed) = &self.allowed {
            if !allowed.iter().any(|candidate| field_equals(value, candidate)) {
                errors.push(format!("{} must be one of {}", field, Value::from(allowed.clone())));
            }
        }
    }
}

/// Validation rules keyed by dot path.
///
/// Serializes as a plain map so a schema can be written as a document:
///
/// ```rust,ignore
/// let schema = Schema::from_document(&doc! {
///     "name": { "required": true, "type": "string" },
///     "age": { "type": "integer", "min": 0 },
/// })?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    rules: IndexMap<String, FieldRule>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: &str, rule: FieldRule) -> Self {
        self.rules.insert(field.to_string(), rule);
        self
    }

    pub fn from_document(document: &Document) -> DocStoreResult<Schema> {
        let schema: Schema = serde_json::from_value(document.to_json()).map_err(|err| {
            log::error!("Invalid schema definition: {}", err);
            DocStoreError::new(
                &format!("Invalid schema definition: {}", err),
                ErrorKind::ValidationError,
            )
        })?;
        schema.check_patterns()?;
        Ok(schema)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &IndexMap<String, FieldRule> {
        &self.rules
    }

    /// Fails when a rule carries a pattern that does not compile.
    pub fn check_patterns(&self) -> DocStoreResult<()> {
        for rule in self.rules.values() {
            if let Some(pattern) = &rule.pattern {
                Pattern::compile(pattern)?;
            }
        }
        Ok(())
    }

    /// Validates a document, reporting every violation in one error.
    pub fn validate(&self, document: &Document) -> DocStoreResult<()> {
        let mut errors = Vec::new();
        for (field, rule) in &self.rules {
            rule.check(field, document.get_ref(field), &mut errors);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            let message = format!("Schema validation failed: {}", errors.join("; "));
            log::error!("{}", message);
            Err(DocStoreError::new(&message, ErrorKind::ValidationError))
        }
    }
}
