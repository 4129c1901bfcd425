use crate::core::NodeValue;
use crate::parser::{ParseError, Record};
use std::collections::BTreeMap;
use std::fmt;

/// Declared type of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    List,
    Map,
    Integer,
    /// Any number, integer or not
    Number,
    Bool,
    /// Presence only
    Any,
}

impl FieldType {
    pub fn matches(self, value: &NodeValue) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::List => value.is_array(),
            FieldType::Map => value.is_object(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Any => true,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::List => "list",
            FieldType::Map => "map",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Bool => "bool",
            FieldType::Any => "any",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Short name of a decoded value's kind, for error messages.
pub fn value_kind(value: &NodeValue) -> &'static str {
    match value {
        NodeValue::Null => "null",
        NodeValue::Bool(_) => "bool",
        NodeValue::Number(n) if n.is_f64() => "number",
        NodeValue::Number(_) => "integer",
        NodeValue::String(_) => "string",
        NodeValue::Array(_) => "list",
        NodeValue::Object(_) => "map",
    }
}

/// Expected shape of a structured response.
///
/// ```
/// use turnflow::parser::{FieldType, Schema};
///
/// let schema = Schema::new()
///     .required("explanation", FieldType::String)
///     .optional("suggestion_questions", FieldType::List);
/// assert!(schema.is_required("explanation"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    required: Vec<String>,
    optional: Vec<String>,
    types: BTreeMap<String, FieldType>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        let name = name.into();
        self.types.insert(name.clone(), ty);
        self.required.push(name);
        self
    }

    pub fn optional(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        let name = name.into();
        self.types.insert(name.clone(), ty);
        self.optional.push(name);
        self
    }

    /// Requires presence without constraining the type.
    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|f| f == name)
    }

    pub fn required_fields(&self) -> &[String] {
        &self.required
    }

    pub fn optional_fields(&self) -> &[String] {
        &self.optional
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.types.get(name).copied()
    }

    /// Every required field must be present and every present typed field must match.
    /// Fields the schema does not mention are ignored.
    pub fn validate(&self, record: &Record) -> Result<(), ParseError> {
        if let Some(missing) = self.required.iter().find(|f| !record.contains_key(f.as_str())) {
            return Err(ParseError::MissingField(missing.clone()));
        }
        for (field, ty) in &self.types {
            if let Some(value) = record.get(field) {
                if !ty.matches(value) {
                    return Err(ParseError::WrongType {
                        field: field.clone(),
                        expected: *ty,
                        found: value_kind(value),
                    });
                }
            }
        }
        Ok(())
    }
}
