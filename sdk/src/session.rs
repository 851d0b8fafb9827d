//! Session, context values and chat history types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single typed context variable
///
/// Serializes as the bare JSON value, so a context map round-trips through
/// plain JSON objects supplied by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    String(String),
    Number(f64),
    Boolean(bool),
    Json(Value),
}

impl ContextValue {
    /// Storage tag for the value variant
    pub fn value_type(&self) -> &'static str {
        match self {
            ContextValue::String(_) => "string",
            ContextValue::Number(_) => "number",
            ContextValue::Boolean(_) => "boolean",
            ContextValue::Json(_) => "json",
        }
    }

    /// Borrow the value as a string slice, if it is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContextValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert into a plain JSON value
    pub fn to_json(&self) -> Value {
        match self {
            ContextValue::String(s) => Value::String(s.clone()),
            ContextValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ContextValue::Boolean(b) => Value::Bool(*b),
            ContextValue::Json(v) => v.clone(),
        }
    }
}

impl From<Value> for ContextValue {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => ContextValue::String(s),
            Value::Bool(b) => ContextValue::Boolean(b),
            Value::Number(n) => match n.as_f64() {
                Some(f) => ContextValue::Number(f),
                None => ContextValue::Json(Value::Number(n)),
            },
            other => ContextValue::Json(other),
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::String(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::String(value)
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        ContextValue::Number(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValue::Boolean(value)
    }
}

/// Session-scoped key/value state
pub type ContextMap = BTreeMap<String, ContextValue>;

/// Build a context map from a JSON object; non-object values yield an empty map
pub fn context_from_json(value: Value) -> ContextMap {
    match value {
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| (k, ContextValue::from(v)))
            .collect(),
        _ => ContextMap::new(),
    }
}

/// Render a context map as a JSON object
pub fn context_to_json(context: &ContextMap) -> Value {
    Value::Object(
        context
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

/// One completed conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub turn_id: String,
    /// 1-based position in the session's history
    pub sequence: i64,
    pub user_input: String,
    pub assistant_output: String,
    /// Unix millis when the request arrived
    pub user_at: i64,
    /// Unix millis when the response was assembled
    pub assistant_at: i64,
    pub intention_id: String,
    pub plan_ids: Vec<String>,
    pub request_id: String,
    pub context_version: u64,
}

/// Durable conversation identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    /// Unix millis
    pub created_at: i64,
    /// Unix millis; never decreases
    pub last_accessed: i64,
    pub is_active: bool,
    pub context: ContextMap,
    /// Incremented on every refinement
    pub context_version: u64,
    pub chat_history: Vec<ChatTurn>,
}

/// Result of a context refinement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedContext {
    /// Full merged session context after the refinement
    pub data: ContextMap,
    pub version: u64,
    /// Intention that triggered the refinement
    pub intention_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_value_from_json() {
        assert_eq!(ContextValue::from(json!("sales")), ContextValue::from("sales"));
        assert_eq!(ContextValue::from(json!(3)), ContextValue::Number(3.0));
        assert_eq!(ContextValue::from(json!(true)), ContextValue::Boolean(true));
        assert_eq!(
            ContextValue::from(json!({"a": 1})),
            ContextValue::Json(json!({"a": 1}))
        );
        assert_eq!(ContextValue::from(json!(null)), ContextValue::Json(Value::Null));
    }

    #[test]
    fn test_context_map_json_shape() {
        let context = context_from_json(json!({
            "database": "sales",
            "limit": 5,
            "debug": false,
            "tables": ["orders"]
        }));

        assert_eq!(context.len(), 4);
        assert_eq!(context["database"].value_type(), "string");
        assert_eq!(context["limit"].value_type(), "number");
        assert_eq!(context["debug"].value_type(), "boolean");
        assert_eq!(context["tables"].value_type(), "json");

        let rendered = context_to_json(&context);
        assert_eq!(rendered["database"], json!("sales"));
        assert_eq!(rendered["tables"], json!(["orders"]));
    }

    #[test]
    fn test_untagged_serialization() {
        let value = ContextValue::String("orders".to_string());
        assert_eq!(serde_json::to_string(&value).unwrap(), "\"orders\"");

        let parsed: ContextValue = serde_json::from_str("42.5").unwrap();
        assert_eq!(parsed, ContextValue::Number(42.5));
    }

    #[test]
    fn test_non_object_context_is_empty() {
        assert!(context_from_json(json!([1, 2, 3])).is_empty());
    }
}
