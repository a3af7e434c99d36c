//! Concrete provider adapters

pub mod neon;
pub mod supabase;

use serde_json::Value;

/// First non-empty string found at any of the JSON pointer paths
///
/// Providers move fields between nesting levels across API versions; every
/// adapter parse function reads through this instead of fixing one shape.
pub(crate) fn pluck<'a>(value: &'a Value, pointers: &[&str]) -> Option<&'a str> {
    pointers
        .iter()
        .filter_map(|p| value.pointer(p))
        .filter_map(Value::as_str)
        .find(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pluck_prefers_earlier_pointers_but_skips_empty() {
        let value = json!({
            "a": { "host": "" },
            "b": { "host": "db.example.com" }
        });
        let host = pluck(&value, &["/a/host", "/b/host"]);
        assert_eq!(host, Some("db.example.com"));
    }

    #[test]
    fn pluck_returns_none_when_absent() {
        let value = json!({ "x": 1 });
        assert_eq!(pluck(&value, &["/a/host"]), None);
    }
}
