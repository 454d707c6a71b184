//! Final answers and structured output.

use std::fmt;
use std::sync::Arc;

use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};

/// What a prompt call returns
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Raw final text of the model
    pub final_response: String,

    /// Validated structured value, when a response schema was configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_response: Option<Value>,
}

impl LlmResponse {
    pub fn text(final_response: impl Into<String>) -> Self {
        Self {
            final_response: final_response.into(),
            parsed_response: None,
        }
    }

    /// Typed view of the structured value
    pub fn parsed<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.parsed_response
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| AgentError::StructuredOutput(e.to_string()))
    }
}

type Validator = dyn Fn(Value) -> std::result::Result<Value, serde_json::Error> + Send + Sync;

/// Structured output contract derived from a Rust type
#[derive(Clone)]
pub struct ResponseSchema {
    name: String,
    schema: RootSchema,
    validator: Arc<Validator>,
}

impl fmt::Debug for ResponseSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSchema").field("name", &self.name).finish_non_exhaustive()
    }
}

impl ResponseSchema {
    /// Schema of `T`; values are validated by deserializing into `T`.
    pub fn of<T>() -> Self
    where
        T: JsonSchema + DeserializeOwned + Serialize + 'static,
    {
        Self {
            name: T::schema_name(),
            schema: schemars::schema_for!(T),
            validator: Arc::new(|value: Value| {
                let typed: T = serde_json::from_value(value)?;
                serde_json::to_value(typed)
            }),
        }
    }

    /// Use a different schema name in requests
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn schema(&self) -> &RootSchema {
        &self.schema
    }

    /// Schema as a JSON value, ready for a `response_format` payload
    pub fn json_schema(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.schema)?)
    }

    /// Parse `text` as JSON and validate it against the type
    pub fn validate(&self, text: &str) -> Result<Value> {
        let raw: Value = serde_json::from_str(text)
            .map_err(|e| AgentError::StructuredOutput(format!("response is not valid JSON: {e}")))?;
        (self.validator)(raw).map_err(|e| {
            AgentError::StructuredOutput(format!("response does not match '{}': {e}", self.name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Outcome of an arithmetic task
    #[derive(Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
    struct MathResult {
        result: f64,
        explanation: String,
    }

    #[test]
    fn test_schema_round_trip() {
        let schema = ResponseSchema::of::<MathResult>();
        let original = MathResult {
            result: 28.0,
            explanation: "(4 + 3) * 4".into(),
        };

        let text = serde_json::to_string(&original).unwrap();
        let validated = schema.validate(&text).unwrap();
        let response = LlmResponse {
            final_response: text,
            parsed_response: Some(validated),
        };

        assert_eq!(response.parsed::<MathResult>().unwrap(), Some(original));
    }

    #[test]
    fn test_invalid_json_rejected() {
        let schema = ResponseSchema::of::<MathResult>();
        let err = schema.validate("twenty eight").unwrap_err();
        assert!(matches!(err, AgentError::StructuredOutput(_)));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let schema = ResponseSchema::of::<MathResult>();
        let err = schema.validate(r#"{"result": "lots"}"#).unwrap_err();
        assert!(matches!(err, AgentError::StructuredOutput(msg) if msg.contains("MathResult")));
    }

    #[test]
    fn test_json_schema_payload() {
        let schema = ResponseSchema::of::<MathResult>().named("math_result");
        let json = schema.json_schema().unwrap();

        assert_eq!(schema.name(), "math_result");
        assert!(json["properties"]["result"].is_object());
        assert_eq!(json["description"], "Outcome of an arithmetic task");
    }

    #[test]
    fn test_plain_response_has_no_parsed_value() {
        let response = LlmResponse::text("hello");
        assert_eq!(response.parsed::<MathResult>().unwrap(), None);
    }
}
