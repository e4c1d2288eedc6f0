//! Structural contract validation.
//!
//! A [`Contract`] describes the required shape of a JSON payload: which
//! fields must be present and what type-shape each field must have.
//! Validation is purely structural (no semantic checks) and never
//! mutates its input. Contracts are declared per worker (input and output)
//! and enforced both before dispatch and after completion.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type-shape of a JSON value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Object,
    Array,
    String,
    Number,
    Boolean,
    Null,
    /// Matches any value. Useful for pass-through fields.
    Any,
}

impl Shape {
    /// Check whether a JSON value has this shape.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Shape::Object => value.is_object(),
            Shape::Array => value.is_array(),
            Shape::String => value.is_string(),
            Shape::Number => value.is_number(),
            Shape::Boolean => value.is_boolean(),
            Shape::Null => value.is_null(),
            Shape::Any => true,
        }
    }

    /// The actual shape of a JSON value, for diagnostics.
    pub fn of(value: &Value) -> Shape {
        match value {
            Value::Object(_) => Shape::Object,
            Value::Array(_) => Shape::Array,
            Value::String(_) => Shape::String,
            Value::Number(_) => Shape::Number,
            Value::Bool(_) => Shape::Boolean,
            Value::Null => Shape::Null,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Shape::Object => "object",
            Shape::Array => "array",
            Shape::String => "string",
            Shape::Number => "number",
            Shape::Boolean => "boolean",
            Shape::Null => "null",
            Shape::Any => "any",
        }
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declaration of a single payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name within the payload object.
    pub name: String,
    /// Expected type-shape of the field value.
    pub shape: Shape,
    /// Whether the field must be present.
    #[serde(default)]
    pub required: bool,
    /// Nested field specs, checked when `shape` is `Object`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSpec>,
    /// Item shape, checked per element when `shape` is `Array`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Shape>,
}

impl FieldSpec {
    /// A required field of the given shape.
    pub fn required(name: &str, shape: Shape) -> Self {
        Self {
            name: name.to_string(),
            shape,
            required: true,
            fields: Vec::new(),
            items: None,
        }
    }

    /// An optional field of the given shape.
    pub fn optional(name: &str, shape: Shape) -> Self {
        Self {
            name: name.to_string(),
            shape,
            required: false,
            fields: Vec::new(),
            items: None,
        }
    }

    /// Attach nested field specs (meaningful for `Object` fields).
    pub fn with_fields(mut self, fields: Vec<FieldSpec>) -> Self {
        self.fields = fields;
        self
    }

    /// Attach an item shape (meaningful for `Array` fields).
    pub fn with_items(mut self, items: Shape) -> Self {
        self.items = Some(items);
        self
    }
}

/// A structural schema for an object payload.
///
/// The empty contract accepts any object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl Contract {
    /// A contract that accepts any object payload.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// Validate a payload against this contract.
    ///
    /// The payload must be a JSON object; every declared required field
    /// must be present, and every present declared field must match its
    /// declared shape. Undeclared fields are allowed.
    pub fn validate(&self, payload: &Value) -> ValidationResult {
        let mut violations = Vec::new();

        let Some(object) = payload.as_object() else {
            violations.push(Violation {
                field: "$".to_string(),
                problem: ViolationKind::WrongShape {
                    expected: Shape::Object,
                    actual: Shape::of(payload),
                },
            });
            return ValidationResult::Invalid(violations);
        };

        for spec in &self.fields {
            check_field(spec, object, &spec.name, &mut violations);
        }

        if violations.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid(violations)
        }
    }
}

fn check_field(
    spec: &FieldSpec,
    object: &serde_json::Map<String, Value>,
    path: &str,
    violations: &mut Vec<Violation>,
) {
    let Some(value) = object.get(&spec.name) else {
        if spec.required {
            violations.push(Violation {
                field: path.to_string(),
                problem: ViolationKind::MissingField,
            });
        }
        return;
    };

    if !spec.shape.matches(value) {
        violations.push(Violation {
            field: path.to_string(),
            problem: ViolationKind::WrongShape {
                expected: spec.shape,
                actual: Shape::of(value),
            },
        });
        return;
    }

    match (spec.shape, value) {
        (Shape::Object, Value::Object(nested)) => {
            for child in &spec.fields {
                let child_path = format!("{}.{}", path, child.name);
                check_field(child, nested, &child_path, violations);
            }
        }
        (Shape::Array, Value::Array(items)) => {
            if let Some(item_shape) = spec.items {
                for (i, item) in items.iter().enumerate() {
                    if !item_shape.matches(item) {
                        violations.push(Violation {
                            field: format!("{}[{}]", path, i),
                            problem: ViolationKind::WrongShape {
                                expected: item_shape,
                                actual: Shape::of(item),
                            },
                        });
                    }
                }
            }
        }
        _ => {}
    }
}

/// Outcome of contract validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Valid,
    Invalid(Vec<Violation>),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    /// The field-level violations, empty when valid.
    pub fn violations(&self) -> &[Violation] {
        match self {
            ValidationResult::Valid => &[],
            ValidationResult::Invalid(v) => v,
        }
    }
}

/// A single field-level contract violation.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    /// Dotted path to the offending field (`$` for the payload root).
    pub field: String,
    pub problem: ViolationKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViolationKind {
    /// A required field is absent.
    MissingField,
    /// A field is present with the wrong type-shape.
    WrongShape { expected: Shape, actual: Shape },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.problem {
            ViolationKind::MissingField => {
                write!(f, "{}: required field missing", self.field)
            }
            ViolationKind::WrongShape { expected, actual } => {
                write!(f, "{}: expected {}, got {}", self.field, expected, actual)
            }
        }
    }
}

/// Join violations into a single human-readable message.
pub fn describe_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
