//! Bootstrap configuration.
//!
//! A [`BootstrapConfig`] is usually built from a flat key/value mapping, where keys may
//! carry the `CEDARLING_` prefix and are matched case-insensitively:
//!
//! | Key                     | Meaning                                         |
//! |-------------------------|-------------------------------------------------|
//! | `APPLICATION_NAME`      | Free-form label used in logs                    |
//! | `POLICY_STORE_ID`       | Store to select from the document (required)    |
//! | `LOCAL_POLICY_STORE`    | Document content, as a string or inline object  |
//! | `POLICY_STORE_LOCAL_FN` | Path to a document file                         |
//! | `POLICY_STORE_URI`      | Remote document location                        |
//! | `MAX_POLICIES`          | Largest store accepted by the loader            |
//! | `IDENTIFIER_CASE`       | `preserve` or `lower`                           |
//! | `DECISION_LOG`          | Emit decision log events (`true`/`false`)       |
//!
//! Exactly one of the three policy store keys must be present. Unknown keys are ignored.

use crate::error::ErrorContext;
use crate::policy::IdentifierCase;
use crate::store::{LoadOptions, DEFAULT_MAX_POLICIES};
use crate::{Error, Result};

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix accepted on every configuration key and used for environment variables.
pub const ENV_PREFIX: &str = "CEDARLING";

/// Where the policy store document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyStoreSource {
    /// Document content supplied directly
    Local(String),
    /// Document read from a file when the engine is created
    File(PathBuf),
    /// Document fetched through a caller-supplied fetcher
    Remote(String),
}

impl PolicyStoreSource {
    /// Short name of the source kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PolicyStoreSource::Local(_) => "local",
            PolicyStoreSource::File(_) => "file",
            PolicyStoreSource::Remote(_) => "remote",
        }
    }
}

/// Typed bootstrap configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapConfig {
    /// Label attached to decision logs
    pub application_name: String,
    /// Id of the store to select from the document
    pub policy_store_id: String,
    /// Where the document comes from
    pub policy_store: PolicyStoreSource,
    /// Maximum number of policies in the selected store
    pub max_policies: usize,
    /// Case rule for identifiers in policies and requests
    pub identifier_case: IdentifierCase,
    /// Whether every decision is logged
    pub decision_log: bool,
}

impl BootstrapConfig {
    /// Create a configuration with defaults for everything but the store.
    pub fn new(policy_store_id: impl Into<String>, policy_store: PolicyStoreSource) -> Self {
        Self {
            application_name: String::new(),
            policy_store_id: policy_store_id.into(),
            policy_store,
            max_policies: DEFAULT_MAX_POLICIES,
            identifier_case: IdentifierCase::Preserve,
            decision_log: true,
        }
    }

    /// Set the application name.
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into().trim().to_string();
        self
    }

    /// Set the policy limit.
    pub fn with_max_policies(mut self, max_policies: usize) -> Self {
        self.max_policies = max_policies;
        self
    }

    /// Set the identifier case rule.
    pub fn with_identifier_case(mut self, case: IdentifierCase) -> Self {
        self.identifier_case = case;
        self
    }

    /// Enable or disable the decision log.
    pub fn with_decision_log(mut self, enabled: bool) -> Self {
        self.decision_log = enabled;
        self
    }

    /// Build a configuration from a key/value mapping.
    pub fn from_map(map: HashMap<String, JsonValue>) -> Result<Self> {
        let mut application_name = String::new();
        let mut policy_store_id = None;
        let mut sources = Vec::new();
        let mut max_policies = DEFAULT_MAX_POLICIES;
        let mut identifier_case = IdentifierCase::Preserve;
        let mut decision_log = true;

        // Sorted so that conflicts are reported the same way every time.
        let mut entries: Vec<_> = map.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        for (raw_key, value) in entries {
            let key = normalize_key(&raw_key);
            match key.as_str() {
                "APPLICATION_NAME" => {
                    application_name = string_value(&value).with_key(&key)?.trim().to_string();
                }
                "POLICY_STORE_ID" => {
                    policy_store_id = Some(string_value(&value).with_key(&key)?);
                }
                "LOCAL_POLICY_STORE" => {
                    let content = match value {
                        JsonValue::Object(_) => serde_json::to_string(&value)?,
                        other => string_value(&other).with_key(&key)?,
                    };
                    sources.push((key, PolicyStoreSource::Local(content)));
                }
                "POLICY_STORE_LOCAL_FN" => {
                    let path = string_value(&value).with_key(&key)?;
                    sources.push((key, PolicyStoreSource::File(PathBuf::from(path))));
                }
                "POLICY_STORE_URI" => {
                    let uri = string_value(&value).with_key(&key)?;
                    sources.push((key, PolicyStoreSource::Remote(uri)));
                }
                "MAX_POLICIES" => {
                    max_policies = usize_value(&value).with_key(&key)?;
                }
                "IDENTIFIER_CASE" => {
                    identifier_case = string_value(&value)
                        .and_then(|s| s.parse())
                        .with_key(&key)?;
                }
                "DECISION_LOG" => {
                    decision_log = bool_value(&value).with_key(&key)?;
                }
                _ => debug!(key = %raw_key, "Ignoring unknown configuration key"),
            }
        }

        let policy_store_id = policy_store_id
            .ok_or_else(|| Error::config_key("policy store id is required", "POLICY_STORE_ID"))?;

        let policy_store = match sources.len() {
            0 => {
                return Err(Error::config_key(
                    "one of LOCAL_POLICY_STORE, POLICY_STORE_LOCAL_FN or POLICY_STORE_URI is required",
                    "LOCAL_POLICY_STORE",
                ))
            }
            1 => sources.remove(0).1,
            _ => {
                let keys: Vec<_> = sources.iter().map(|(k, _)| k.as_str()).collect();
                return Err(Error::config_key(
                    format!("only one policy store source may be set, found {}", keys.join(", ")),
                    sources[1].0.clone(),
                ));
            }
        };

        let config = Self {
            application_name,
            policy_store_id,
            policy_store,
            max_policies,
            identifier_case,
            decision_log,
        };
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from `CEDARLING_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .map_err(|e| Error::config(e.to_string()))?;
        Self::from_settings(settings)
    }

    /// Build a configuration from a JSON, YAML or TOML file.
    ///
    /// The format follows the file extension. The loader folds nested keys to lower case,
    /// so an embedded store should be given as a string or through `POLICY_STORE_LOCAL_FN`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        Self::from_settings(settings)
    }

    fn from_settings(settings: config::Config) -> Result<Self> {
        let map: HashMap<String, JsonValue> = settings
            .try_deserialize()
            .map_err(|e| Error::config(e.to_string()))?;
        Self::from_map(map)
    }

    /// Check the configuration before anything is loaded.
    pub fn validate(&self) -> Result<()> {
        if self.policy_store_id.trim().is_empty() {
            return Err(Error::config_key(
                "policy store id cannot be empty",
                "POLICY_STORE_ID",
            ));
        }

        if self.max_policies == 0 {
            return Err(Error::config_key(
                "max policies must be greater than 0",
                "MAX_POLICIES",
            ));
        }

        match &self.policy_store {
            PolicyStoreSource::Local(content) if content.trim().is_empty() => Err(
                Error::config_key("local policy store cannot be empty", "LOCAL_POLICY_STORE"),
            ),
            PolicyStoreSource::File(path) if path.as_os_str().is_empty() => Err(
                Error::config_key("policy store path cannot be empty", "POLICY_STORE_LOCAL_FN"),
            ),
            PolicyStoreSource::Remote(uri) if uri.trim().is_empty() => Err(Error::config_key(
                "policy store uri cannot be empty",
                "POLICY_STORE_URI",
            )),
            _ => Ok(()),
        }
    }

    /// Options for the store loader.
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            max_policies: self.max_policies,
            identifier_case: self.identifier_case,
        }
    }
}

fn normalize_key(key: &str) -> String {
    let upper = key.trim().to_uppercase();
    match upper.strip_prefix(ENV_PREFIX) {
        Some(rest) if rest.starts_with('_') => rest[1..].to_string(),
        _ => upper,
    }
}

fn string_value(value: &JsonValue) -> Result<String> {
    match value {
        JsonValue::String(s) => Ok(s.clone()),
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::Bool(b) => Ok(b.to_string()),
        other => Err(Error::config(format!("expected a string, found {}", other))),
    }
}

fn usize_value(value: &JsonValue) -> Result<usize> {
    let parsed = match value {
        JsonValue::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| Error::config(format!("expected a positive integer, found {}", value)))
}

fn bool_value(value: &JsonValue) -> Result<bool> {
    match value {
        JsonValue::Bool(b) => Ok(*b),
        JsonValue::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "enabled" | "on" | "1" => Ok(true),
            "false" | "disabled" | "off" | "0" => Ok(false),
            _ => Err(Error::config(format!("expected a boolean, found `{}`", s))),
        },
        other => Err(Error::config(format!("expected a boolean, found {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn map(value: JsonValue) -> HashMap<String, JsonValue> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_from_map_minimal() {
        let config = BootstrapConfig::from_map(map(json!({
            "CEDARLING_POLICY_STORE_ID": "store1",
            "CEDARLING_LOCAL_POLICY_STORE": "{\"policy_stores\": {}}"
        })))
        .unwrap();

        assert_eq!(config.policy_store_id, "store1");
        assert_eq!(
            config.policy_store,
            PolicyStoreSource::Local("{\"policy_stores\": {}}".into())
        );
        assert_eq!(config.max_policies, DEFAULT_MAX_POLICIES);
        assert_eq!(config.identifier_case, IdentifierCase::Preserve);
        assert!(config.decision_log);
        assert!(config.application_name.is_empty());
    }

    #[test]
    fn test_from_map_keys_case_insensitive() {
        let config = BootstrapConfig::from_map(map(json!({
            "application_name": "  my-app ",
            "cedarling_policy_store_id": "store1",
            "Policy_Store_Local_Fn": "/etc/cedarling/store.yaml",
            "MAX_POLICIES": "25",
            "IDENTIFIER_CASE": "lower",
            "DECISION_LOG": "off",
            "SOMETHING_ELSE": 1
        })))
        .unwrap();

        assert_eq!(config.application_name, "my-app");
        assert_eq!(
            config.policy_store,
            PolicyStoreSource::File(PathBuf::from("/etc/cedarling/store.yaml"))
        );
        assert_eq!(config.max_policies, 25);
        assert_eq!(config.identifier_case, IdentifierCase::Lower);
        assert!(!config.decision_log);
    }

    #[test]
    fn test_inline_store_object() {
        let config = BootstrapConfig::from_map(map(json!({
            "POLICY_STORE_ID": "store1",
            "LOCAL_POLICY_STORE": {"policy_stores": {"store1": {"policies": {}}}}
        })))
        .unwrap();

        let PolicyStoreSource::Local(content) = config.policy_store else {
            panic!("expected a local store");
        };
        let parsed: JsonValue = serde_json::from_str(&content).unwrap();
        assert!(parsed["policy_stores"]["store1"].is_object());
    }

    #[test]
    fn test_missing_store_id() {
        let err = BootstrapConfig::from_map(map(json!({
            "LOCAL_POLICY_STORE": "{}"
        })))
        .unwrap_err();
        match err {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("POLICY_STORE_ID")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_and_conflicting_sources() {
        let err = BootstrapConfig::from_map(map(json!({"POLICY_STORE_ID": "s"}))).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));

        let err = BootstrapConfig::from_map(map(json!({
            "POLICY_STORE_ID": "s",
            "LOCAL_POLICY_STORE": "{}",
            "POLICY_STORE_URI": "https://example.com/store.json"
        })))
        .unwrap_err();
        assert!(err.to_string().contains("only one policy store source"));
    }

    #[test]
    fn test_invalid_values() {
        for (key, value) in [
            ("MAX_POLICIES", json!("many")),
            ("MAX_POLICIES", json!(0)),
            ("IDENTIFIER_CASE", json!("upper")),
            ("DECISION_LOG", json!("maybe")),
            ("POLICY_STORE_ID", json!(" ")),
        ] {
            let mut raw = map(json!({
                "POLICY_STORE_ID": "store1",
                "LOCAL_POLICY_STORE": "{}"
            }));
            raw.insert(key.to_string(), value);
            let err = BootstrapConfig::from_map(raw).unwrap_err();
            match err {
                Error::Config { key: Some(k), .. } => assert_eq!(k, key),
                other => panic!("unexpected error for {key}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_validate_empty_source() {
        let config = BootstrapConfig::new("store1", PolicyStoreSource::Remote("  ".into()));
        assert!(config.validate().is_err());

        let config = BootstrapConfig::new("store1", PolicyStoreSource::Local("{}".into()))
            .with_application_name("app")
            .with_max_policies(5);
        assert!(config.validate().is_ok());
        assert_eq!(config.load_options().max_policies, 5);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"POLICY_STORE_ID": "store1", "POLICY_STORE_URI": "https://example.com/s.json", "DECISION_LOG": false}}"#
        )
        .unwrap();

        let config = BootstrapConfig::from_file(file.path()).unwrap();
        assert_eq!(config.policy_store_id, "store1");
        assert_eq!(
            config.policy_store,
            PolicyStoreSource::Remote("https://example.com/s.json".into())
        );
        assert!(!config.decision_log);
    }

    #[test]
    fn test_from_file_missing() {
        let err = BootstrapConfig::from_file("/nonexistent/cedarling.yaml").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
