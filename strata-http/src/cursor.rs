use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// Opaque pagination continuation handed out alongside paginated results.
///
/// A cursor is a flat map of scalar fields (typically `limit` and `offset`).
/// It serializes to a JSON object and, for continuation links, to a
/// query-string of lowercased field names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(Map<String, Value>);

impl Cursor {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a cursor from any serializable struct with scalar fields.
    pub fn from_params<T: Serialize>(params: &T) -> Result<Self, Error> {
        match serde_json::to_value(params) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(Error::internal(format!(
                "cursor must serialize to an object, got {other}"
            ))),
            Err(e) => Err(Error::internal(format!("serializing cursor: {e}"))),
        }
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Query-string form: lowercased field names joined with `&`, prefixed
    /// with `?`. Fields appear in the cursor's own order.
    pub fn to_query_string(&self) -> String {
        let mut ser = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.0 {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            ser.append_pair(&key.to_lowercase(), &text);
        }
        format!("?{}", ser.finish())
    }
}
