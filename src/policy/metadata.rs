//! Policy metadata carried alongside the parsed policy.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Metadata associated with a policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyMetadata {
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When the policy was created, if the store records it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDateTime>,
}

impl PolicyMetadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the creation date.
    pub fn with_created_at(mut self, created_at: NaiveDateTime) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Parse a store `creation_date` value.
    ///
    /// Accepts RFC 3339 timestamps and naive `YYYY-MM-DDTHH:MM:SS[.frac]` values.
    pub fn parse_creation_date(raw: &str) -> crate::Result<NaiveDateTime> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.naive_utc());
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map_err(|e| crate::Error::parse(format!("Invalid creation_date `{}`: {}", raw, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_metadata_builder_pattern() {
        let created = PolicyMetadata::parse_creation_date("2024-11-07T07:49:11").unwrap();
        let metadata = PolicyMetadata::new()
            .with_description("Admins can read")
            .with_created_at(created);

        assert_eq!(metadata.description.as_deref(), Some("Admins can read"));
        assert_eq!(metadata.created_at, Some(created));
    }

    #[test]
    fn test_parse_creation_date_formats() {
        let naive = PolicyMetadata::parse_creation_date("2024-11-07T07:49:11.813002").unwrap();
        assert_eq!(naive.year(), 2024);
        assert_eq!(naive.hour(), 7);

        let rfc = PolicyMetadata::parse_creation_date("2024-11-07T09:49:11+02:00").unwrap();
        assert_eq!(rfc.hour(), 7);

        assert!(PolicyMetadata::parse_creation_date("yesterday").is_err());
    }
}
