//! Incoming payload checks.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Structural description of an object payload.
pub trait PayloadSchema: Send + Sync {
    fn name(&self) -> &str;

    /// Every violation found in `value`; empty means valid.
    fn check(&self, value: &Value) -> Vec<String>;
}

/// Schema backed by a serde type: a payload is valid when it deserializes into `T`.
pub struct TypedSchema<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    pub fn new() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> PayloadSchema for TypedSchema<T> {
    fn name(&self) -> &str {
        self.name
    }

    fn check(&self, value: &Value) -> Vec<String> {
        match T::deserialize(value) {
            Ok(_) => Vec::new(),
            Err(e) => vec![e.to_string()],
        }
    }
}

/// Declared type of an injected payload slice.
#[derive(Clone, Default)]
pub enum ParamType {
    #[default]
    Any,
    String,
    Number,
    Boolean,
    Object(Arc<dyn PayloadSchema>),
}

impl ParamType {
    pub fn typed<T: DeserializeOwned + 'static>() -> Self {
        Self::Object(Arc::new(TypedSchema::<T>::new()))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Any => "any",
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object(schema) => schema.name(),
        }
    }
}

impl fmt::Debug for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(schema) => write!(f, "Object({})", schema.name()),
            other => f.write_str(other.name()),
        }
    }
}

/// Structural validator consulted for object-typed parameters.
#[async_trait]
pub trait PayloadValidator: Send + Sync {
    async fn validate(&self, value: &Value, schema: &dyn PayloadSchema) -> Vec<String>;
}

/// Runs the schema's own check.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaValidator;

#[async_trait]
impl PayloadValidator for SchemaValidator {
    async fn validate(&self, value: &Value, schema: &dyn PayloadSchema) -> Vec<String> {
        schema.check(value)
    }
}

/// Check one payload slice against its declared type. `Err` carries the rejection reason.
pub async fn check_value(
    value: Option<&Value>,
    ty: &ParamType,
    validator: &dyn PayloadValidator,
) -> Result<(), String> {
    let value = match value {
        None | Some(Value::Null) => return Err("payload is missing".to_string()),
        Some(v) => v,
    };

    let type_matches = match ty {
        ParamType::Any => true,
        ParamType::String => value.is_string(),
        ParamType::Number => value.as_f64().is_some_and(|n| !n.is_nan()),
        ParamType::Boolean => value.is_boolean(),
        ParamType::Object(schema) => {
            let errors = validator.validate(value, schema.as_ref()).await;
            if !errors.is_empty() {
                return Err(format!(
                    "payload does not match {}: {}",
                    schema.name(),
                    errors.join("; ")
                ));
            }
            true
        }
    };

    if type_matches {
        Ok(())
    } else {
        Err(format!("expected {}, got {}", ty.name(), json_type(value)))
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[allow(dead_code)]
    #[derive(Deserialize)]
    struct ChatMessage {
        room: String,
        text: String,
    }

    #[tokio::test]
    async fn missing_and_null_slots_are_rejected() {
        let err = check_value(None, &ParamType::Any, &SchemaValidator)
            .await
            .unwrap_err();
        assert!(err.contains("missing"));
        assert!(check_value(Some(&Value::Null), &ParamType::String, &SchemaValidator)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn primitives_are_checked_by_kind() {
        assert!(check_value(Some(&json!("hi")), &ParamType::String, &SchemaValidator)
            .await
            .is_ok());
        assert!(check_value(Some(&json!(3.5)), &ParamType::Number, &SchemaValidator)
            .await
            .is_ok());
        assert!(check_value(Some(&json!(true)), &ParamType::Boolean, &SchemaValidator)
            .await
            .is_ok());

        let err = check_value(Some(&json!("3")), &ParamType::Number, &SchemaValidator)
            .await
            .unwrap_err();
        assert_eq!(err, "expected number, got string");
    }

    #[tokio::test]
    async fn object_payloads_go_through_the_schema() {
        let ty = ParamType::typed::<ChatMessage>();
        let ok = json!({"room": "lobby", "text": "hello"});
        assert!(check_value(Some(&ok), &ty, &SchemaValidator).await.is_ok());

        let bad = json!({"room": "lobby"});
        let err = check_value(Some(&bad), &ty, &SchemaValidator)
            .await
            .unwrap_err();
        assert!(err.contains("text"), "{err}");
    }
}
