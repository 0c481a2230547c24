//! Policy store loading.
//!
//! A policy store document bundles one or more named stores. Loading parses the whole
//! document and every policy in it, then selects one store by id. Loading is pure: the
//! caller supplies the document text, and nothing here touches the filesystem or network.
//!
//! ```json
//! {
//!   "cedar_version": "v4.0.0",
//!   "policy_stores": {
//!     "store1": {
//!       "name": "Example",
//!       "policies": {
//!         "p1": {
//!           "description": "A may read doc1",
//!           "creation_date": "2024-11-07T07:49:11.813002",
//!           "encoding": "none",
//!           "policy_content": "permit(principal == \"A\", action == \"read\", resource == \"doc1\");"
//!         }
//!       }
//!     }
//!   }
//! }
//! ```

mod document;

use crate::error::ErrorContext;
use crate::policy::{parse_policies, parse_policy, IdentifierCase, PolicyMetadata, PolicySet, PolicySummary};
use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use document::{parse_document, PolicyEncoding, RawPolicy, RawStore};
use semver::Version;
use serde::Serialize;
use tracing::debug;

/// Default maximum number of policies per store.
pub const DEFAULT_MAX_POLICIES: usize = 10_000;

/// Options controlling how a store document is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Maximum number of policies a single store may hold
    pub max_policies: usize,
    /// Case rule applied to entity literals in policies
    pub identifier_case: IdentifierCase,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            max_policies: DEFAULT_MAX_POLICIES,
            identifier_case: IdentifierCase::Preserve,
        }
    }
}

/// A loaded, immutable policy store.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyStore {
    /// Store id (its key in the document)
    pub id: String,
    /// Human-readable name
    pub name: Option<String>,
    /// Description
    pub description: Option<String>,
    /// Store version, or a prefix of the fingerprint when the document has none
    pub version: String,
    /// Policy language version declared by the document
    pub cedar_version: Option<Version>,
    /// blake3 hash of the whole document
    pub fingerprint: String,
    /// The store's policies
    pub policies: PolicySet,
}

impl PolicyStore {
    /// Short description suitable for listings.
    pub fn summary(&self) -> StoreSummary {
        StoreSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            policy_count: self.policies.len(),
            policies: self.policies.summaries(),
        }
    }
}

/// Listing entry for a loaded store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    /// Store id
    pub id: String,
    /// Store name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Store version
    pub version: String,
    /// Number of policies
    pub policy_count: usize,
    /// Policies, sorted by id
    pub policies: Vec<PolicySummary>,
}

/// Load the store `store_id` from a policy store document.
pub fn load(raw: &str, store_id: &str, options: &LoadOptions) -> Result<PolicyStore> {
    load_all(raw, options)?
        .into_iter()
        .find(|store| store.id == store_id)
        .ok_or_else(|| Error::StoreNotFound {
            store_id: store_id.to_string(),
        })
}

/// Load every store in a policy store document.
pub fn load_all(raw: &str, options: &LoadOptions) -> Result<Vec<PolicyStore>> {
    let document = parse_document(raw)?;

    let cedar_version = match document.cedar_version {
        Some(v) => Some(parse_cedar_version(&v)?),
        None => None,
    };

    if let Some(id) = document.policy_stores.duplicate_key() {
        return Err(Error::parse(format!("duplicate policy store id `{}`", id)));
    }

    let fingerprint = blake3::hash(raw.as_bytes()).to_hex().to_string();

    document
        .policy_stores
        .0
        .into_iter()
        .map(|(id, store)| build_store(id, store, &fingerprint, cedar_version.clone(), options))
        .collect()
}

fn build_store(
    id: String,
    raw: RawStore,
    fingerprint: &str,
    cedar_version: Option<Version>,
    options: &LoadOptions,
) -> Result<PolicyStore> {
    let mut policies = PolicySet::new(id.clone());

    if let Some(policy_id) = raw.policies.duplicate_key() {
        return Err(Error::DuplicatePolicyId {
            store_id: id,
            policy_id: policy_id.to_string(),
        });
    }
    check_limit(&id, raw.policies.0.len(), options)?;

    for (policy_id, entry) in raw.policies.0 {
        let policy = build_policy(&policy_id, entry, options)?;
        policies.add(policy)?;
    }

    if let Some(text) = raw.policy_text.as_deref() {
        let parsed = parse_policies(text, options.identifier_case).in_policy("policy_text")?;
        check_limit(&id, policies.len() + parsed.len(), options)?;
        for policy in parsed {
            policies.add(policy)?;
        }
    }

    debug!(store_id = %id, policies = policies.len(), "Parsed policy store");

    Ok(PolicyStore {
        name: raw.name.filter(|n| !n.trim().is_empty()),
        description: raw.description.filter(|d| !d.trim().is_empty()),
        version: raw
            .version
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| fingerprint[..16].to_string()),
        cedar_version,
        fingerprint: fingerprint.to_string(),
        policies,
        id,
    })
}

fn build_policy(policy_id: &str, entry: RawPolicy, options: &LoadOptions) -> Result<crate::Policy> {
    let text = match entry.encoding {
        PolicyEncoding::None => entry.policy_content,
        PolicyEncoding::Base64 => decode_base64(policy_id, &entry.policy_content)?,
    };

    let mut policy = parse_policy(policy_id, &text, options.identifier_case).in_policy(policy_id)?;

    let mut metadata = PolicyMetadata::new();
    if let Some(description) = entry.description.filter(|d| !d.trim().is_empty()) {
        metadata = metadata.with_description(description);
    }
    if let Some(raw_date) = entry.creation_date.filter(|d| !d.trim().is_empty()) {
        let created = PolicyMetadata::parse_creation_date(&raw_date).in_policy(policy_id)?;
        metadata = metadata.with_created_at(created);
    }
    policy.metadata = metadata;

    Ok(policy)
}

fn decode_base64(policy_id: &str, content: &str) -> Result<String> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64.decode(compact).map_err(|e| Error::Encoding {
        policy_id: policy_id.to_string(),
        message: format!("invalid base64: {}", e),
    })?;
    String::from_utf8(bytes).map_err(|e| Error::Encoding {
        policy_id: policy_id.to_string(),
        message: format!("decoded content is not UTF-8: {}", e),
    })
}

fn check_limit(store_id: &str, count: usize, options: &LoadOptions) -> Result<()> {
    if count > options.max_policies {
        return Err(Error::PolicyLimit {
            store_id: store_id.to_string(),
            count,
            limit: options.max_policies,
        });
    }
    Ok(())
}

/// Parse a semantic version with an optional `v` prefix.
fn parse_cedar_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim();
    let version = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(version)
        .map_err(|e| Error::parse(format!("invalid cedar_version `{}`: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{EntityUid, ScopeConstraint};

    const EXAMPLE: &str = r#"{
        "cedar_version": "v4.0.0",
        "policy_stores": {
            "store1": {
                "name": "Example",
                "policies": {
                    "policy permit principal==A...": {
                        "description": "A may read doc1",
                        "creation_date": "2024-11-07T07:49:11.813002",
                        "policy_content": "permit(principal == \"A\", action == \"read\", resource == \"doc1\");"
                    }
                }
            },
            "store2": {
                "version": "2.1.0",
                "policy_text": "@id(\"deny-all\") forbid(principal, action, resource);"
            }
        }
    }"#;

    #[test]
    fn test_load_example_store() {
        let store = load(EXAMPLE, "store1", &LoadOptions::default()).unwrap();

        assert_eq!(store.id, "store1");
        assert_eq!(store.name.as_deref(), Some("Example"));
        assert_eq!(store.cedar_version, Some(Version::new(4, 0, 0)));
        assert_eq!(store.version, &store.fingerprint[..16]);
        assert_eq!(store.policies.len(), 1);

        let policy = store.policies.get("policy permit principal==A...").unwrap();
        assert_eq!(
            policy.scope.principal,
            ScopeConstraint::Eq(EntityUid::untyped("A"))
        );
        assert_eq!(policy.metadata.description.as_deref(), Some("A may read doc1"));
        assert!(policy.metadata.created_at.is_some());
    }

    #[test]
    fn test_load_policy_text() {
        let store = load(EXAMPLE, "store2", &LoadOptions::default()).unwrap();
        assert_eq!(store.version, "2.1.0");
        assert_eq!(store.policies.ids(), vec!["deny-all"]);
    }

    #[test]
    fn test_load_is_deterministic() {
        let a = load(EXAMPLE, "store1", &LoadOptions::default()).unwrap();
        let b = load(EXAMPLE, "store1", &LoadOptions::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_token_metadata_is_ignored() {
        let raw = r#"{
            "policy_stores": {
                "s": {
                    "policy_text": "permit(principal, action, resource);",
                    "schema": "eyJKYW5zIjp7fX0=",
                    "trusted_issuers": {"idp": {"name": "IDP", "openid_configuration_endpoint": "https://idp/.well-known"}}
                }
            }
        }"#;
        let store = load(raw, "s", &LoadOptions::default()).unwrap();
        assert_eq!(store.policies.len(), 1);
    }

    #[test]
    fn test_store_not_found() {
        let err = load(EXAMPLE, "store9", &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, Error::StoreNotFound { ref store_id } if store_id == "store9"));
    }

    #[test]
    fn test_bad_policy_in_other_store_fails_load() {
        let raw = r#"{"policy_stores": {
            "good": {"policy_text": "permit(principal, action, resource);"},
            "bad": {"policies": {"p1": {"policy_content": "permit(principal, action"}}}
        }}"#;
        let err = load(raw, "good", &LoadOptions::default()).unwrap_err();
        match err {
            Error::Parse { policy_id, .. } => assert_eq!(policy_id.as_deref(), Some("p1")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_policy_ids() {
        let raw = r#"{"policy_stores": {"s": {"policies": {
            "p1": {"policy_content": "permit(principal, action, resource);"},
            "p1": {"policy_content": "forbid(principal, action, resource);"}
        }}}}"#;
        assert!(matches!(
            load(raw, "s", &LoadOptions::default()).unwrap_err(),
            Error::DuplicatePolicyId { .. }
        ));

        let raw = r#"{"policy_stores": {"s": {
            "policies": {"p1": {"policy_content": "permit(principal, action, resource);"}},
            "policy_text": "@id(\"p1\") forbid(principal, action, resource);"
        }}}"#;
        assert!(matches!(
            load(raw, "s", &LoadOptions::default()).unwrap_err(),
            Error::DuplicatePolicyId { .. }
        ));
    }

    #[test]
    fn test_base64_policy() {
        let content = BASE64.encode(r#"forbid(principal == User::"eve", action, resource);"#);
        let raw = format!(
            r#"{{"policy_stores": {{"s": {{"policies": {{"p": {{"encoding": "base64", "policy_content": "{}"}}}}}}}}}}"#,
            content
        );
        let store = load(&raw, "s", &LoadOptions::default()).unwrap();
        assert!(!store.policies.get("p").unwrap().is_permit());

        let raw = r#"{"policy_stores": {"s": {"policies": {"p": {"encoding": "base64", "policy_content": "!!!"}}}}}"#;
        assert!(matches!(
            load(raw, "s", &LoadOptions::default()).unwrap_err(),
            Error::Encoding { .. }
        ));
    }

    #[test]
    fn test_policy_limit() {
        let raw = r#"{"policy_stores": {"s": {"policy_text": "permit(principal, action, resource); forbid(principal, action, resource);"}}}"#;
        let options = LoadOptions {
            max_policies: 1,
            ..LoadOptions::default()
        };
        assert!(matches!(
            load(raw, "s", &options).unwrap_err(),
            Error::PolicyLimit { count: 2, limit: 1, .. }
        ));
    }

    #[test]
    fn test_invalid_cedar_version() {
        let raw = r#"{"cedar_version": "four", "policy_stores": {}}"#;
        assert!(load_all(raw, &LoadOptions::default()).is_err());

        assert_eq!(parse_cedar_version("4.0.0").unwrap(), Version::new(4, 0, 0));
        assert_eq!(
            parse_cedar_version("v4.0.0-beta.1").unwrap().pre.as_str(),
            "beta.1"
        );
        assert!(parse_cedar_version("04.01.00").is_err());
        assert!(parse_cedar_version("4.0").is_err());
    }

    #[test]
    fn test_identifier_case_applies_to_policies() {
        let raw = r#"{"policy_stores": {"s": {"policy_text": "permit(principal == User::\"Alice\", action, resource);"}}}"#;
        let options = LoadOptions {
            identifier_case: IdentifierCase::Lower,
            ..LoadOptions::default()
        };
        let store = load(raw, "s", &options).unwrap();
        let policy = store.policies.get("policy0").unwrap();
        assert_eq!(
            policy.scope.principal,
            ScopeConstraint::Eq(EntityUid::new("user", "alice"))
        );
    }
}
