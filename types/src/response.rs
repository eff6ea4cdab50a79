//! Response envelope validation.
//!
//! A validated response has the shape `{ error?, [field]?: { error? } }`.
//! Truthiness follows the conventions of the scripts that produce these
//! envelopes: `null`, `false`, `0` and `""` are falsy, everything else
//! (including empty objects and arrays) is truthy.

use serde_json::Value;

use crate::error::LoadError;

pub const DEFAULT_RESPONSE_FIELD: &str = "response";

/// How a raw callback payload becomes a load result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePolicy {
    /// When false the payload resolves the load unconditionally.
    pub check_response: bool,
    /// Field holding the data (and possibly a nested `error`).
    pub field_name: String,
}

impl Default for ResponsePolicy {
    fn default() -> Self {
        Self {
            check_response: true,
            field_name: DEFAULT_RESPONSE_FIELD.to_string(),
        }
    }
}

impl ResponsePolicy {
    /// Turn a callback payload into the load outcome.
    ///
    /// With validation enabled, the load rejects when the payload is falsy
    /// (with the payload itself), when it carries a truthy `error`, or when
    /// its response field carries a truthy `error`. Otherwise it resolves
    /// with the response field, falling back to the whole payload when the
    /// field is missing or falsy.
    pub fn interpret(&self, payload: Value) -> Result<Value, LoadError> {
        if !self.check_response {
            return Ok(payload);
        }

        if !is_truthy(&payload) {
            return Err(LoadError::ServerReportedError(payload));
        }

        if let Some(error) = truthy_field(&payload, "error") {
            return Err(LoadError::ServerReportedError(error.clone()));
        }

        if let Some(data) = truthy_field(&payload, &self.field_name) {
            if let Some(error) = truthy_field(data, "error") {
                return Err(LoadError::ServerReportedError(error.clone()));
            }
            return Ok(data.clone());
        }

        Ok(payload)
    }
}

fn truthy_field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    value.as_object()?.get(name).filter(|v| is_truthy(v))
}

#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
