//! Item helpers.
//!
//! Items are plain JSON objects. A handful of system properties carry the
//! sync metadata the service attaches to every row.

use crate::{error::Result, Error};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Row identifier column. Also the default pull ordering column.
pub const ID: &str = "id";
/// Optimistic concurrency token assigned by the service.
pub const VERSION: &str = "version";
/// Last modification time assigned by the service.
pub const UPDATED_AT: &str = "updatedAt";
/// Creation time assigned by the service.
pub const CREATED_AT: &str = "createdAt";
/// Soft delete flag (tombstone).
pub const DELETED: &str = "deleted";

/// All service-managed columns.
pub const SYSTEM_PROPERTIES: [&str; 4] = [VERSION, UPDATED_AT, CREATED_AT, DELETED];

/// Get the item's id, if it has a non-empty string id.
pub fn id(item: &Value) -> Option<&str> {
    item.get(ID)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

/// Get the item's id or fail with `InvalidItem`.
pub fn require_id(item: &Value) -> Result<&str> {
    if !item.is_object() {
        return Err(Error::InvalidItem("item must be a JSON object".into()));
    }
    id(item).ok_or_else(|| Error::InvalidItem("item must have a non-empty string 'id'".into()))
}

/// Get the item's version token.
pub fn version(item: &Value) -> Option<&str> {
    item.get(VERSION).and_then(Value::as_str)
}

/// Check the soft delete flag. Absent means not deleted.
pub fn is_deleted(item: &Value) -> bool {
    item.get(DELETED).and_then(Value::as_bool).unwrap_or(false)
}

/// Parse the item's `updatedAt` column.
pub fn updated_at(item: &Value) -> Option<DateTime<Utc>> {
    item.get(UPDATED_AT)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Set a string column on an object item. Non-objects are left alone.
pub fn set_str(item: &mut Value, column: &str, value: &str) {
    if let Some(obj) = item.as_object_mut() {
        obj.insert(column.to_string(), Value::String(value.to_string()));
    }
}

/// Return a copy of the item without service-managed columns.
pub fn without_system_properties(item: &Value) -> Value {
    match item {
        Value::Object(obj) => {
            let stripped: Map<String, Value> = obj
                .iter()
                .filter(|(k, _)| !SYSTEM_PROPERTIES.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(stripped)
        }
        other => other.clone(),
    }
}

/// A minimal item carrying only an id (and version when known).
pub fn tombstone(id: &str, version: Option<&str>) -> Value {
    let mut obj = Map::new();
    obj.insert(ID.to_string(), Value::String(id.to_string()));
    if let Some(version) = version {
        obj.insert(VERSION.to_string(), Value::String(version.to_string()));
    }
    Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_lookup() {
        assert_eq!(id(&json!({"id": "a"})), Some("a"));
        assert_eq!(id(&json!({"id": ""})), None);
        assert_eq!(id(&json!({"id": 5})), None);
        assert!(require_id(&json!([1, 2])).is_err());
        assert!(require_id(&json!({"text": "x"})).is_err());
    }

    #[test]
    fn deleted_flag() {
        assert!(is_deleted(&json!({"id": "a", "deleted": true})));
        assert!(!is_deleted(&json!({"id": "a", "deleted": false})));
        assert!(!is_deleted(&json!({"id": "a"})));
    }

    #[test]
    fn parse_updated_at() {
        let item = json!({"id": "a", "updatedAt": "2024-01-02T03:04:05Z"});
        let ts = updated_at(&item).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-02T03:04:05+00:00");
        assert!(updated_at(&json!({"updatedAt": "yesterday"})).is_none());
    }

    #[test]
    fn strips_system_properties() {
        let item = json!({
            "id": "a",
            "text": "hello",
            "version": "AAAB",
            "updatedAt": "2024-01-02T03:04:05Z",
            "deleted": false
        });
        assert_eq!(
            without_system_properties(&item),
            json!({"id": "a", "text": "hello"})
        );
    }

    #[test]
    fn tombstone_shape() {
        assert_eq!(tombstone("a", None), json!({"id": "a"}));
        assert_eq!(tombstone("a", Some("v1")), json!({"id": "a", "version": "v1"}));
    }
}
