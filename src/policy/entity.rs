//! Entity identifiers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// How identifiers are canonicalized before matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierCase {
    /// Identifiers keep their case; matching is case-sensitive
    #[default]
    Preserve,
    /// Type names and ids are lower-cased on both sides
    Lower,
}

impl IdentifierCase {
    /// Apply this case rule to an identifier.
    pub fn apply(&self, s: &str) -> String {
        match self {
            IdentifierCase::Preserve => s.to_string(),
            IdentifierCase::Lower => s.to_lowercase(),
        }
    }
}

impl FromStr for IdentifierCase {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "preserve" => Ok(IdentifierCase::Preserve),
            "lower" | "lowercase" => Ok(IdentifierCase::Lower),
            _ => Err(crate::Error::config(format!(
                "Unknown identifier case: {} (expected `preserve` or `lower`)",
                s
            ))),
        }
    }
}

/// Unique identifier of an entity: an optional type path and an id.
///
/// `Jans::User::"alice"` has type `Jans::User` and id `alice`. A bare identifier such
/// as `alice` is untyped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityUid {
    entity_type: Option<String>,
    id: String,
}

impl EntityUid {
    /// Create a typed entity uid.
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type.into()),
            id: id.into(),
        }
    }

    /// Create an untyped entity uid.
    pub fn untyped(id: impl Into<String>) -> Self {
        Self {
            entity_type: None,
            id: id.into(),
        }
    }

    /// Parse a request identifier into a canonical uid.
    ///
    /// Accepts `Type::"id"`, `Ns::Type::"id"` or a bare id. Whitespace around the
    /// identifier and around `::` separators is dropped.
    pub fn parse(raw: &str, case: IdentifierCase) -> crate::Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(crate::Error::invalid_request("identifier cannot be empty"));
        }

        let Some(quote) = raw.find('"') else {
            return Ok(Self::untyped(case.apply(raw)));
        };

        if !raw.ends_with('"') || raw.len() == quote + 1 {
            return Err(crate::Error::invalid_request(format!(
                "malformed entity identifier: {}",
                raw
            )));
        }
        let id = unescape(&raw[quote + 1..raw.len() - 1]);
        if id.trim().is_empty() {
            return Err(crate::Error::invalid_request(format!(
                "entity id cannot be empty: {}",
                raw
            )));
        }
        let prefix = raw[..quote].trim_end();
        if prefix.is_empty() {
            return Ok(Self::untyped(case.apply(&id)));
        }
        let Some(type_path) = prefix.strip_suffix("::") else {
            return Err(crate::Error::invalid_request(format!(
                "malformed entity identifier: {}",
                raw
            )));
        };

        if !is_type_path(type_path) {
            return Err(crate::Error::invalid_request(format!(
                "invalid entity type in identifier: {}",
                raw
            )));
        }
        let segments: Vec<&str> = type_path.split("::").map(str::trim).collect();
        Ok(Self::new(case.apply(&segments.join("::")), case.apply(&id)))
    }

    /// Apply a case rule to an already-built uid.
    pub fn canonical(&self, case: IdentifierCase) -> Self {
        Self {
            entity_type: self.entity_type.as_deref().map(|t| case.apply(t)),
            id: case.apply(&self.id),
        }
    }

    /// The entity type path, if any.
    pub fn entity_type(&self) -> Option<&str> {
        self.entity_type.as_deref()
    }

    /// The entity id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Check whether this uid, used as a policy reference, denotes `other`.
    ///
    /// An untyped reference matches any entity with the same id.
    pub fn matches(&self, other: &EntityUid) -> bool {
        if self.id != other.id {
            return false;
        }
        match (&self.entity_type, &other.entity_type) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl fmt::Display for EntityUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entity_type {
            Some(t) => write!(f, "{}::\"{}\"", t, self.id.replace('\\', "\\\\").replace('"', "\\\"")),
            None => write!(f, "{}", self.id),
        }
    }
}

impl Serialize for EntityUid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EntityUid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        EntityUid::parse(&raw, IdentifierCase::Preserve).map_err(serde::de::Error::custom)
    }
}

/// Check that `s` is a valid identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Check that `s` is a `::`-separated path of identifiers, such as `Jans::User`.
pub(crate) fn is_type_path(s: &str) -> bool {
    s.split("::").map(str::trim).all(is_identifier)
}

/// Resolve backslash escapes in a quoted identifier.
pub(crate) fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
