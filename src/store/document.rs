//! Raw policy store document as it appears on the wire.

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::marker::PhantomData;

/// Map entries in document order, duplicates kept so callers can report them.
#[derive(Debug)]
pub(crate) struct Entries<V>(pub Vec<(String, V)>);

impl<V> Default for Entries<V> {
    fn default() -> Self {
        Entries(Vec::new())
    }
}

impl<V> Entries<V> {
    /// First key that appears more than once.
    pub(crate) fn duplicate_key(&self) -> Option<&str> {
        let mut seen = std::collections::HashSet::new();
        self.0
            .iter()
            .map(|(k, _)| k.as_str())
            .find(|k| !seen.insert(*k))
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for Entries<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for EntriesVisitor<V> {
            type Value = Entries<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, V>()? {
                    entries.push((key, value));
                }
                Ok(Entries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

/// Top-level store document.
#[derive(Debug, Deserialize)]
pub(crate) struct RawDocument {
    #[serde(default)]
    pub cedar_version: Option<String>,
    pub policy_stores: Entries<RawStore>,
}

/// One named store inside the document.
#[derive(Debug, Deserialize)]
pub(crate) struct RawStore {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub policies: Entries<RawPolicy>,
    #[serde(default)]
    pub policy_text: Option<String>,
}

/// One policy entry of a store's `policies` map.
#[derive(Debug, Deserialize)]
pub(crate) struct RawPolicy {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub creation_date: Option<String>,
    #[serde(default)]
    pub encoding: PolicyEncoding,
    pub policy_content: String,
}

/// How `policy_content` is encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum PolicyEncoding {
    #[default]
    None,
    Base64,
}

/// Parse the document, JSON when it starts with `{` and YAML otherwise.
pub(crate) fn parse_document(raw: &str) -> crate::Result<RawDocument> {
    let trimmed = raw.trim_start();
    if trimmed.trim_end().is_empty() {
        return Err(crate::Error::parse("policy store document is empty"));
    }

    if trimmed.starts_with('{') {
        serde_json::from_str(raw).map_err(|e| crate::Error::Parse {
            message: format!("invalid policy store document: {}", strip_location(&e.to_string())),
            policy_id: None,
            line: Some(e.line()).filter(|l| *l > 0),
            column: Some(e.column()).filter(|c| *c > 0),
        })
    } else {
        serde_yaml::from_str(raw).map_err(|e| {
            let location = e.location();
            crate::Error::Parse {
                message: format!("invalid policy store document: {}", strip_location(&e.to_string())),
                policy_id: None,
                line: location.as_ref().map(|l| l.line()),
                column: location.as_ref().map(|l| l.column()),
            }
        })
    }
}

/// Drop the trailing ` at line X column Y` serde adds, since the error carries it already.
fn strip_location(message: &str) -> &str {
    match message.rfind(" at line ") {
        Some(idx) => &message[..idx],
        None => message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_keep_order_and_duplicates() {
        let doc: RawDocument = serde_json::from_str(
            r#"{"policy_stores": {"b": {}, "a": {}, "b": {"name": "again"}}}"#,
        )
        .unwrap();
        let keys: Vec<_> = doc.policy_stores.0.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "a", "b"]);
        assert_eq!(doc.policy_stores.duplicate_key(), Some("b"));
    }

    #[test]
    fn test_parse_yaml_document() {
        let doc = parse_document(
            r#"
cedar_version: v4.0.0
policy_stores:
  store1:
    name: Store
    policies:
      p1:
        encoding: base64
        policy_content: cGVybWl0KHByaW5jaXBhbCwgYWN0aW9uLCByZXNvdXJjZSk7
"#,
        )
        .unwrap();

        assert_eq!(doc.cedar_version.as_deref(), Some("v4.0.0"));
        let (id, store) = &doc.policy_stores.0[0];
        assert_eq!(id, "store1");
        assert_eq!(store.policies.0[0].1.encoding, PolicyEncoding::Base64);
    }

    #[test]
    fn test_parse_json_error_has_location() {
        let err = parse_document("{\n  \"policy_stores\": [1, 2]\n}").unwrap_err();
        match err {
            crate::Error::Parse { line, message, .. } => {
                assert_eq!(line, Some(2));
                assert!(!message.contains(" at line "), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_empty_and_missing_fields() {
        assert!(parse_document("   ").is_err());
        assert!(parse_document("{}").is_err());
        assert!(parse_document(r#"{"policy_stores": {"s": {"policies": {"p": {}}}}}"#).is_err());
    }
}
