//! Order - 注文レコードのドメインモデル
//!
//! # 構成
//! - **OrderId**: 呼び出し側が指定する文字列キー（store 内で一意）
//! - **OrderDocument**: 任意の key/value を持つ JSON object
//! - **OrderRecord**: store が保持する document + timestamps

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::errors::OrderError;

/// Caller-supplied order key.
///
/// Never blank. Cache keys and store rows are both derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Validate a raw id (path segment, test input, ...).
    pub fn parse(raw: impl Into<String>) -> Result<Self, OrderError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(OrderError::MissingId);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key used in the lookup cache: `order:<id>`.
    pub fn cache_key(&self) -> String {
        format!("order:{}", self.0)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Open-ended order payload.
///
/// Serialized as a JSON object everywhere: JSONB in the store, text in the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderDocument(Map<String, Value>);

impl OrderDocument {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Build a document from any JSON value. Non-objects are rejected.
    pub fn from_value(value: Value) -> Result<Self, OrderError> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(OrderError::InvalidDocument(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Extract the order id carried in the `id` field.
    ///
    /// Strings must be non-blank; integers are accepted as their decimal text.
    /// Everything else counts as a missing id.
    pub fn order_id(&self) -> Result<OrderId, OrderError> {
        match self.0.get("id") {
            Some(Value::String(raw)) => OrderId::parse(raw.as_str()),
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => OrderId::parse(n.to_string()),
            _ => Err(OrderError::MissingId),
        }
    }

    /// Shallow merge: top-level keys of `patch` overwrite ours, nested values are
    /// replaced wholesale.
    pub fn merge(&mut self, patch: OrderDocument) {
        for (key, value) in patch.0 {
            self.0.insert(key, value);
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Text form stored in the cache.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }

    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Map<String, Value>>(text).map(Self)
    }
}

impl From<Map<String, Value>> for OrderDocument {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// A row of the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub document: OrderDocument,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn doc(value: Value) -> OrderDocument {
        OrderDocument::from_value(value).unwrap()
    }

    #[test]
    fn cache_key_is_prefixed() {
        let id = OrderId::parse("A-1").unwrap();
        assert_eq!(id.cache_key(), "order:A-1");
    }

    #[rstest]
    #[case::string(json!({"id": "A-1"}), "A-1")]
    #[case::integer(json!({"id": 42}), "42")]
    fn order_id_is_extracted(#[case] body: Value, #[case] expected: &str) {
        assert_eq!(doc(body).order_id().unwrap().as_str(), expected);
    }

    #[rstest]
    #[case::absent(json!({"item": "book"}))]
    #[case::null(json!({"id": null}))]
    #[case::blank(json!({"id": "  "}))]
    #[case::float(json!({"id": 1.5}))]
    #[case::boolean(json!({"id": true}))]
    #[case::object(json!({"id": {"nested": 1}}))]
    fn unusable_ids_count_as_missing(#[case] body: Value) {
        assert!(matches!(doc(body).order_id(), Err(OrderError::MissingId)));
    }

    #[test]
    fn non_object_documents_are_rejected() {
        let err = OrderDocument::from_value(json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn merge_is_shallow() {
        let mut current = doc(json!({"id": "A-1", "a": 1, "nested": {"x": 1, "y": 2}}));
        current.merge(doc(json!({"b": 2, "nested": {"x": 9}})));

        assert_eq!(
            current.into_value(),
            json!({"id": "A-1", "a": 1, "b": 2, "nested": {"x": 9}})
        );
    }

    #[test]
    fn text_form_survives_the_cache() {
        let original = doc(json!({"id": "A-1", "qty": 3}));
        let text = original.to_text().unwrap();
        assert_eq!(OrderDocument::from_text(&text).unwrap(), original);
        assert!(OrderDocument::from_text("TEST_MESSAGE").is_err());
    }
}
