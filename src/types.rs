//! Core types shared by the cache coordinator and storage strategies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque preference payload: string keys mapped to arbitrary JSON values.
pub type PayloadMap = serde_json::Map<String, Value>;

/// Identifies one logical preference record in a storage strategy call.
///
/// `tag` names the record within a cache instance; the cache treats it as
/// opaque. Everything in `scope` is passed through to the backend unmodified
/// (e.g. a tenant or user id for namespacing) and is flattened alongside the
/// tag when the context is serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HabitContext {
  pub tag: String,
  #[serde(flatten)]
  pub scope: serde_json::Map<String, Value>,
}

impl HabitContext {
  /// Context carrying only a tag.
  pub fn for_tag(tag: impl Into<String>) -> Self {
    Self {
      tag: tag.into(),
      scope: serde_json::Map::new(),
    }
  }

  /// Attach a pass-through field for the backend.
  pub fn with_scope(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.scope.insert(key.into(), value.into());
    self
  }
}

/// The unit of storage: a tag plus its preference payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitRecord {
  pub key: String,
  pub data: PayloadMap,
}

/// Acknowledgement from a strategy write capability.
///
/// A strategy without write support acks with `success: false` instead of
/// raising.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteAck {
  pub success: bool,
}

impl WriteAck {
  /// The write was applied.
  pub fn ok() -> Self {
    Self { success: true }
  }

  /// The backend has no write capability; nothing was stored.
  pub fn unsupported() -> Self {
    Self { success: false }
  }
}

/// Build a tag from a component identifier and an optional sub-path.
///
/// Components that persist several records distinguish them by sub-path,
/// e.g. `"issue-table/filters"` next to `"issue-table/columns"`.
pub fn compose_tag(id: &str, path: Option<&str>) -> String {
  match path {
    Some(path) => format!("{}/{}", id, path),
    None => id.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_compose_tag_with_and_without_path() {
    assert_eq!(compose_tag("issue-table", None), "issue-table");
    assert_eq!(
      compose_tag("issue-table", Some("filters")),
      "issue-table/filters"
    );
  }

  #[test]
  fn test_payload_equality_ignores_insertion_order() {
    let mut first = PayloadMap::new();
    first.insert("theme".into(), json!("dark"));
    first.insert("width".into(), json!(120));

    let mut second = PayloadMap::new();
    second.insert("width".into(), json!(120));
    second.insert("theme".into(), json!("dark"));

    assert_eq!(first, second);
  }

  #[test]
  fn test_context_scope_flattens_into_serialized_form() {
    let context = HabitContext::for_tag("board").with_scope("team", "ops");

    let value = serde_json::to_value(&context).unwrap();
    assert_eq!(value, json!({ "tag": "board", "team": "ops" }));

    let back: HabitContext = serde_json::from_value(value).unwrap();
    assert_eq!(back.tag, "board");
    assert_eq!(back.scope.get("team"), Some(&json!("ops")));
  }
}
