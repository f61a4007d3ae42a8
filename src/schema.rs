//! Opaque payload validators.
//!
//! The backend interface stores one validator per payload position (RPC
//! parameter, channel packet, signal data, ...). A validator is a capability:
//! it either accepts a JSON value or reports where and why it does not. The
//! port never inspects payloads beyond calling these.
//!
//! A small combinator set covers the shapes local application endpoints
//! describe in practice; anything richer can be plugged in through
//! [`from_fn`] or a custom [`Schema`] implementation.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Why a value was rejected, and where in the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIssue {
    /// Slash-separated path into the value; empty for the root.
    pub path: String,
    pub message: String,
}

impl SchemaIssue {
    pub fn at_root(message: impl Into<String>) -> Self {
        Self {
            path: String::new(),
            message: message.into(),
        }
    }

    pub fn at(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// A payload validator.
pub trait Schema: Send + Sync {
    fn validate(&self, value: &Value) -> Result<(), SchemaIssue>;
}

/// Shared handle to a validator.
pub type SchemaRef = Arc<dyn Schema>;

struct Any;

impl Schema for Any {
    fn validate(&self, _value: &Value) -> Result<(), SchemaIssue> {
        Ok(())
    }
}

struct Integer;

impl Schema for Integer {
    fn validate(&self, value: &Value) -> Result<(), SchemaIssue> {
        if value.as_i64().is_some() || value.as_u64().is_some() {
            Ok(())
        } else {
            Err(SchemaIssue::at_root("expected an integer"))
        }
    }
}

struct Number;

impl Schema for Number {
    fn validate(&self, value: &Value) -> Result<(), SchemaIssue> {
        if value.is_number() {
            Ok(())
        } else {
            Err(SchemaIssue::at_root("expected a number"))
        }
    }
}

struct Str;

impl Schema for Str {
    fn validate(&self, value: &Value) -> Result<(), SchemaIssue> {
        if value.is_string() {
            Ok(())
        } else {
            Err(SchemaIssue::at_root("expected a string"))
        }
    }
}

struct Bool;

impl Schema for Bool {
    fn validate(&self, value: &Value) -> Result<(), SchemaIssue> {
        if value.is_boolean() {
            Ok(())
        } else {
            Err(SchemaIssue::at_root("expected a boolean"))
        }
    }
}

struct ObjectShape {
    fields: Vec<(String, SchemaRef)>,
}

impl Schema for ObjectShape {
    fn validate(&self, value: &Value) -> Result<(), SchemaIssue> {
        let map = value
            .as_object()
            .ok_or_else(|| SchemaIssue::at_root("expected an object"))?;
        for (name, schema) in &self.fields {
            let member = map
                .get(name)
                .ok_or_else(|| SchemaIssue::at(name.clone(), "missing required member"))?;
            schema.validate(member).map_err(|issue| {
                let path = if issue.path.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", name, issue.path)
                };
                SchemaIssue::at(path, issue.message)
            })?;
        }
        Ok(())
    }
}

struct ArrayOf {
    element: SchemaRef,
}

impl Schema for ArrayOf {
    fn validate(&self, value: &Value) -> Result<(), SchemaIssue> {
        let items = value
            .as_array()
            .ok_or_else(|| SchemaIssue::at_root("expected an array"))?;
        for (index, item) in items.iter().enumerate() {
            self.element.validate(item).map_err(|issue| {
                let path = if issue.path.is_empty() {
                    index.to_string()
                } else {
                    format!("{}/{}", index, issue.path)
                };
                SchemaIssue::at(path, issue.message)
            })?;
        }
        Ok(())
    }
}

struct FnSchema<F>(F);

impl<F> Schema for FnSchema<F>
where
    F: Fn(&Value) -> Result<(), SchemaIssue> + Send + Sync,
{
    fn validate(&self, value: &Value) -> Result<(), SchemaIssue> {
        (self.0)(value)
    }
}

/// Accepts every value.
pub fn any() -> SchemaRef {
    Arc::new(Any)
}

/// Accepts JSON integers.
pub fn integer() -> SchemaRef {
    Arc::new(Integer)
}

/// Accepts any JSON number.
pub fn number() -> SchemaRef {
    Arc::new(Number)
}

/// Accepts JSON strings.
pub fn string() -> SchemaRef {
    Arc::new(Str)
}

/// Accepts JSON booleans.
pub fn boolean() -> SchemaRef {
    Arc::new(Bool)
}

/// Accepts objects carrying at least the given members, each validating
/// against its schema. Unknown members are allowed.
pub fn object<N: Into<String>>(fields: impl IntoIterator<Item = (N, SchemaRef)>) -> SchemaRef {
    Arc::new(ObjectShape {
        fields: fields
            .into_iter()
            .map(|(name, schema)| (name.into(), schema))
            .collect(),
    })
}

/// Accepts arrays whose every element validates against `element`.
pub fn array_of(element: SchemaRef) -> SchemaRef {
    Arc::new(ArrayOf { element })
}

/// Wrap a closure as a validator.
pub fn from_fn(
    validate: impl Fn(&Value) -> Result<(), SchemaIssue> + Send + Sync + 'static,
) -> SchemaRef {
    Arc::new(FnSchema(validate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars() {
        assert!(integer().validate(&json!(3)).is_ok());
        assert!(integer().validate(&json!(3.5)).is_err());
        assert!(integer().validate(&json!("3")).is_err());
        assert!(number().validate(&json!(3.5)).is_ok());
        assert!(string().validate(&json!("x")).is_ok());
        assert!(boolean().validate(&json!(true)).is_ok());
        assert!(any().validate(&json!(null)).is_ok());
    }

    #[test]
    fn test_object_shape() {
        let shape = object([("a", integer()), ("b", integer())]);
        assert!(shape.validate(&json!({"a": 2, "b": 3})).is_ok());
        assert!(shape.validate(&json!({"a": 2, "b": 3, "extra": 1})).is_ok());

        let issue = shape.validate(&json!({"a": 2})).unwrap_err();
        assert_eq!(issue.path, "b");

        let issue = shape.validate(&json!({"a": "x", "b": 3})).unwrap_err();
        assert_eq!(issue.path, "a");
        assert_eq!(issue.to_string(), "a: expected an integer");
    }

    #[test]
    fn test_nested_issue_path() {
        let shape = object([("outer", object([("inner", string())]))]);
        let issue = shape
            .validate(&json!({"outer": {"inner": 1}}))
            .unwrap_err();
        assert_eq!(issue.path, "outer/inner");
    }

    #[test]
    fn test_array_of() {
        let schema = array_of(integer());
        assert!(schema.validate(&json!([1, 2, 3])).is_ok());
        let issue = schema.validate(&json!([1, "x"])).unwrap_err();
        assert_eq!(issue.path, "1");
    }

    #[test]
    fn test_from_fn() {
        let even = from_fn(|value| {
            if value.as_i64().is_some_and(|n| n % 2 == 0) {
                Ok(())
            } else {
                Err(SchemaIssue::at_root("expected an even integer"))
            }
        });
        assert!(even.validate(&json!(2)).is_ok());
        assert!(even.validate(&json!(3)).is_err());
    }
}
