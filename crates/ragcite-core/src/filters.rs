//! Filter decoding and merging for the `content` tool.

use serde_json::Value;

use crate::{Error, Result};

pub type Filters = serde_json::Map<String, Value>;

/// Key the document store uses for a document's own identity.
pub const PRIMARY_ID_KEY: &str = "id";
/// Alias models tend to use (and the tool description advertises).
pub const DOCUMENT_ID_KEY: &str = "document_id";

/// Decode a `filters` argument that may arrive as a JSON object or as a
/// JSON-encoded string (flat schemas). Both shapes decode to the same map.
pub fn decode_filters(tool: &str, value: Option<&Value>) -> Result<Option<Filters>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => Ok(Some(map)),
                Ok(Value::Null) => Ok(None),
                Ok(_) => Err(Error::InvalidArguments {
                    tool: tool.to_string(),
                    message: "filters must encode a JSON object".to_string(),
                }),
                Err(e) => Err(Error::InvalidArguments {
                    tool: tool.to_string(),
                    message: format!("filters is not valid JSON: {e}"),
                }),
            }
        }
        Some(_) => Err(Error::InvalidArguments {
            tool: tool.to_string(),
            message: "filters must be an object or a JSON-encoded object string".to_string(),
        }),
    }
}

/// Combine caller filters with the agent's baseline filters.
///
/// A top-level `document_id` key is renamed to `id`. Non-empty baselines are
/// AND-ed in; empty caller filters fall back to the baseline.
pub fn merge_content_filters(caller: Option<Filters>, baseline: &Filters) -> Filters {
    let Some(mut caller) = caller.filter(|f| !f.is_empty()) else {
        return baseline.clone();
    };
    if let Some(v) = caller.remove(DOCUMENT_ID_KEY) {
        caller.insert(PRIMARY_ID_KEY.to_string(), v);
    }
    if baseline.is_empty() {
        return caller;
    }
    let mut merged = Filters::new();
    merged.insert(
        "$and".to_string(),
        Value::Array(vec![Value::Object(caller), Value::Object(baseline.clone())]),
    );
    merged
}
