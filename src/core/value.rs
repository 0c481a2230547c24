//! Runtime values seen by condition expressions.

use crate::policy::{EntityUid, IdentifierCase};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;

/// Key marking a JSON object as an entity reference: `{"__entity": {"type": "User", "id": "alice"}}`.
pub const ENTITY_ESCAPE: &str = "__entity";

/// A typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Long(i64),
    /// Floating point number
    Decimal(f64),
    /// String
    String(String),
    /// Unordered collection
    Set(Vec<Value>),
    /// Named attributes
    Record(BTreeMap<String, Value>),
    /// Reference to an entity
    Entity(EntityUid),
}

impl Value {
    /// Name of this value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Long(_) => "long",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Set(_) => "set",
            Value::Record(_) => "record",
            Value::Entity(_) => "entity",
        }
    }

    /// Semantic equality used by `==`, `!=`, `in` and the set methods.
    ///
    /// Numbers compare by value across long/decimal, sets ignore order and duplicates,
    /// and an untyped entity reference equals any entity with the same id.
    pub fn semantic_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Long(a), Value::Decimal(b)) | (Value::Decimal(b), Value::Long(a)) => {
                (*a as f64) == *b
            }
            (Value::Set(a), Value::Set(b)) => {
                a.iter().all(|x| b.iter().any(|y| x.semantic_eq(y)))
                    && b.iter().all(|y| a.iter().any(|x| x.semantic_eq(y)))
            }
            (Value::Record(a), Value::Record(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|w| v.semantic_eq(w)))
            }
            (Value::Entity(a), Value::Entity(b)) => a.matches(b),
            _ => self == other,
        }
    }

    /// Convert a JSON value into a typed value.
    ///
    /// `path` names the attribute for error messages. `null` is rejected, as are numbers
    /// that fit neither `i64` nor a finite `f64`.
    pub fn from_json(path: &str, json: &serde_json::Value, case: IdentifierCase) -> Result<Self> {
        use serde_json::Value as Json;

        match json {
            Json::Null => Err(Error::invalid_context_value(path, "null is not a valid value")),
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Long(i))
                } else if let Some(f) = n.as_f64().filter(|f| f.is_finite()) {
                    Ok(Value::Decimal(f))
                } else {
                    Err(Error::invalid_context_value(path, format!("number {} is out of range", n)))
                }
            }
            Json::String(s) => Ok(Value::String(s.clone())),
            Json::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| Value::from_json(&format!("{}[{}]", path, i), item, case))
                .collect::<Result<Vec<_>>>()
                .map(Value::Set),
            Json::Object(map) => {
                if let Some(escape) = map.get(ENTITY_ESCAPE) {
                    if map.len() != 1 {
                        return Err(Error::invalid_context_value(
                            path,
                            format!("`{}` cannot be mixed with other keys", ENTITY_ESCAPE),
                        ));
                    }
                    return entity_from_json(path, escape, case).map(Value::Entity);
                }
                map.iter()
                    .map(|(k, v)| {
                        let child = if path.is_empty() {
                            k.clone()
                        } else {
                            format!("{}.{}", path, k)
                        };
                        Value::from_json(&child, v, case).map(|v| (k.clone(), v))
                    })
                    .collect::<Result<BTreeMap<_, _>>>()
                    .map(Value::Record)
            }
        }
    }

    /// Convert back to JSON, using the `__entity` form for entity references.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Value::Bool(b) => Json::Bool(*b),
            Value::Long(n) => Json::from(*n),
            Value::Decimal(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Set(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Record(fields) => Json::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Entity(uid) => {
                let mut inner = serde_json::Map::new();
                if let Some(t) = uid.entity_type() {
                    inner.insert("type".into(), Json::String(t.to_string()));
                }
                inner.insert("id".into(), Json::String(uid.id().to_string()));
                let mut outer = serde_json::Map::new();
                outer.insert(ENTITY_ESCAPE.into(), Json::Object(inner));
                Json::Object(outer)
            }
        }
    }
}

/// Accepts `{"type": T, "id": I}`, `{"id": I}` or a `Type::"id"` string.
fn entity_from_json(path: &str, json: &serde_json::Value, case: IdentifierCase) -> Result<EntityUid> {
    match json {
        serde_json::Value::String(raw) => EntityUid::parse(raw, case)
            .map_err(|e| Error::invalid_context_value(path, e.to_string())),
        serde_json::Value::Object(map) => {
            let id = match map.get("id") {
                Some(serde_json::Value::String(id)) if !id.trim().is_empty() => id.trim(),
                _ => {
                    return Err(Error::invalid_context_value(
                        path,
                        "entity reference needs a non-empty string `id`",
                    ))
                }
            };
            let uid = match map.get("type") {
                None => EntityUid::untyped(id),
                Some(serde_json::Value::String(t)) if crate::policy::is_type_path(t) => {
                    EntityUid::new(t.split("::").map(str::trim).collect::<Vec<_>>().join("::"), id)
                }
                Some(other) => {
                    return Err(Error::invalid_context_value(
                        path,
                        format!("invalid entity type {}", other),
                    ))
                }
            };
            Ok(uid.canonical(case))
        }
        other => Err(Error::invalid_context_value(
            path,
            format!("invalid entity reference {}", other),
        )),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Entity(uid) => write!(f, "{}", uid),
            other => write!(f, "{}", other.to_json()),
        }
    }
}
