//! Policy data structures and representations.
//!
//! This module defines the policy language types: policies, scopes, conditions and
//! the policy sets a store is made of, together with the parser that produces them.

mod condition;
mod decision;
mod entity;
mod lexer;
mod metadata;
pub mod parser;
mod scope;

pub use condition::{BinaryOp, Condition, ConditionKind, Expr, Literal, Method, Pattern, Var};
pub use decision::{Decision, Effect};
pub use entity::{EntityUid, IdentifierCase};
pub use metadata::PolicyMetadata;
pub use parser::{parse_expression, parse_policies, parse_policy};
pub use scope::{PolicyScope, ScopeConstraint};

pub(crate) use entity::is_type_path;

use crate::error::ErrorContext;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// A parsed policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    /// Unique identifier within its store
    pub id: String,
    /// Whether a satisfied policy permits or forbids
    pub effect: Effect,
    /// Principal, action and resource constraints
    pub scope: PolicyScope,
    /// `when` / `unless` clauses in source order
    pub conditions: Vec<Condition>,
    /// `@key("value")` annotations
    pub annotations: BTreeMap<String, String>,
    /// Store-level metadata
    pub metadata: PolicyMetadata,
    /// The policy text as written
    pub source: String,
}

impl Policy {
    /// Parse a single policy with identifiers kept as written.
    pub fn parse(id: impl Into<String>, text: &str) -> crate::Result<Self> {
        let id = id.into();
        parse_policy(&id, text, IdentifierCase::Preserve).in_policy(id.as_str())
    }

    /// Create a policy builder.
    pub fn builder(id: impl Into<String>, effect: Effect) -> PolicyBuilder {
        PolicyBuilder::new(id, effect)
    }

    /// Check if this is a `permit` policy.
    pub fn is_permit(&self) -> bool {
        self.effect == Effect::Permit
    }

    /// Get an annotation value.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// Builder for creating policies in code.
#[derive(Debug)]
pub struct PolicyBuilder {
    id: String,
    effect: Effect,
    scope: PolicyScope,
    conditions: Vec<Condition>,
    annotations: BTreeMap<String, String>,
    metadata: PolicyMetadata,
}

impl PolicyBuilder {
    /// Create a new builder for an unconstrained policy.
    pub fn new(id: impl Into<String>, effect: Effect) -> Self {
        Self {
            id: id.into(),
            effect,
            scope: PolicyScope::unconstrained(),
            conditions: Vec::new(),
            annotations: BTreeMap::new(),
            metadata: PolicyMetadata::default(),
        }
    }

    /// Set the principal constraint.
    pub fn principal(mut self, constraint: ScopeConstraint) -> Self {
        self.scope.principal = constraint;
        self
    }

    /// Set the action constraint.
    pub fn action(mut self, constraint: ScopeConstraint) -> Self {
        self.scope.action = constraint;
        self
    }

    /// Set the resource constraint.
    pub fn resource(mut self, constraint: ScopeConstraint) -> Self {
        self.scope.resource = constraint;
        self
    }

    /// Add a `when` clause.
    pub fn when(mut self, expr: Expr) -> Self {
        self.conditions.push(Condition::when(expr));
        self
    }

    /// Add an `unless` clause.
    pub fn unless(mut self, expr: Expr) -> Self {
        self.conditions.push(Condition::unless(expr));
        self
    }

    /// Add an annotation.
    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    /// Build the policy.
    ///
    /// Fails if a condition holds an entity literal without a type, which has no
    /// policy text form.
    pub fn build(self) -> crate::Result<Policy> {
        for condition in &self.conditions {
            if let Some(uid) = condition.expr.find_untyped_entity() {
                return Err(crate::Error::Parse {
                    message: format!("entity literal {} in a condition needs a type", uid),
                    policy_id: Some(self.id.clone()),
                    line: None,
                    column: None,
                });
            }
        }

        let mut source = String::new();
        for (key, value) in &self.annotations {
            source.push_str(&format!("@{}({:?})\n", key, value));
        }
        source.push_str(&format!("{}({})", self.effect, self.scope));
        for condition in &self.conditions {
            source.push_str(&format!(" {} {{ {} }}", condition.kind.as_str(), condition.expr));
        }
        source.push(';');

        Ok(Policy {
            id: self.id,
            effect: self.effect,
            scope: self.scope,
            conditions: self.conditions,
            annotations: self.annotations,
            metadata: self.metadata,
            source,
        })
    }
}

/// The policies of one store, with unique ids and precomputed effect partitions.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySet {
    store_id: String,
    policies: Vec<Policy>,
    index: HashMap<String, usize>,
    permits: Vec<usize>,
    forbids: Vec<usize>,
}

impl PolicySet {
    /// Create an empty policy set for a store.
    pub fn new(store_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            policies: Vec::new(),
            index: HashMap::new(),
            permits: Vec::new(),
            forbids: Vec::new(),
        }
    }

    /// Build a policy set from policies, rejecting duplicate ids.
    pub fn from_policies(
        store_id: impl Into<String>,
        policies: impl IntoIterator<Item = Policy>,
    ) -> crate::Result<Self> {
        let mut set = Self::new(store_id);
        for policy in policies {
            set.add(policy)?;
        }
        Ok(set)
    }

    /// Add a policy.
    pub fn add(&mut self, policy: Policy) -> crate::Result<()> {
        if self.index.contains_key(&policy.id) {
            return Err(crate::Error::DuplicatePolicyId {
                store_id: self.store_id.clone(),
                policy_id: policy.id,
            });
        }

        let idx = self.policies.len();
        match policy.effect {
            Effect::Permit => self.permits.push(idx),
            Effect::Forbid => self.forbids.push(idx),
        }
        self.index.insert(policy.id.clone(), idx);
        self.policies.push(policy);
        Ok(())
    }

    /// The store this set belongs to.
    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Look up a policy by id.
    pub fn get(&self, id: &str) -> Option<&Policy> {
        self.index.get(id).map(|&idx| &self.policies[idx])
    }

    /// Number of policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Iterate over all policies in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter()
    }

    /// Iterate over `permit` policies.
    pub fn permits(&self) -> impl Iterator<Item = &Policy> {
        self.permits.iter().map(|&idx| &self.policies[idx])
    }

    /// Iterate over `forbid` policies.
    pub fn forbids(&self) -> impl Iterator<Item = &Policy> {
        self.forbids.iter().map(|&idx| &self.policies[idx])
    }

    /// Policy ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.policies.iter().map(|p| p.id.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Summaries of every policy, sorted by id.
    pub fn summaries(&self) -> Vec<PolicySummary> {
        let mut summaries: Vec<PolicySummary> = self
            .policies
            .iter()
            .map(|p| PolicySummary {
                id: p.id.clone(),
                effect: p.effect,
                description: p.metadata.description.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }
}

/// Short description of a loaded policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicySummary {
    /// Policy id
    pub id: String,
    /// Policy effect
    pub effect: Effect,
    /// Optional description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parse() {
        let policy = Policy::parse(
            "p1",
            r#"permit(principal == "A", action == "read", resource == "doc1");"#,
        )
        .unwrap();
        assert_eq!(policy.id, "p1");
        assert!(policy.is_permit());
    }

    #[test]
    fn test_policy_parse_error_names_policy() {
        let err = Policy::parse("p1", "permit(principal, action, resource").unwrap_err();
        assert!(err.to_string().contains("`p1`"), "{err}");
    }

    #[test]
    fn test_policy_builder() {
        let policy = Policy::builder("deny-guests", Effect::Forbid)
            .principal(ScopeConstraint::In(vec![EntityUid::new("Role", "guest")]))
            .annotation("id", "deny-guests")
            .description("Guests are read-only")
            .build()
            .unwrap();

        assert_eq!(policy.effect, Effect::Forbid);
        assert_eq!(policy.annotation("id"), Some("deny-guests"));
        assert_eq!(policy.metadata.description.as_deref(), Some("Guests are read-only"));
        assert!(policy.source.contains(r#"forbid(principal in Role::"guest", action, resource);"#));
    }

    #[test]
    fn test_policy_builder_source_reparses() {
        let owner = Expr::binary(
            BinaryOp::Eq,
            Expr::GetAttr(Box::new(Expr::Var(Var::Resource)), "owner".into()),
            Expr::Literal(Literal::Entity(EntityUid::new("User", "alice"))),
        );
        let policy = Policy::builder("owner", Effect::Permit)
            .when(owner)
            .build()
            .unwrap();
        let reparsed = Policy::parse("owner", &policy.source).unwrap();
        assert_eq!(reparsed.conditions, policy.conditions);

        let untyped = Expr::binary(
            BinaryOp::Eq,
            Expr::Var(Var::Principal),
            Expr::Literal(Literal::Entity(EntityUid::untyped("alice"))),
        );
        let err = Policy::builder("untyped", Effect::Permit)
            .when(untyped)
            .build()
            .unwrap_err();
        assert!(matches!(err, crate::Error::Parse { ref policy_id, .. }
            if policy_id.as_deref() == Some("untyped")));
    }

    #[test]
    fn test_policy_set_partitions() {
        let set = PolicySet::from_policies(
            "store1",
            vec![
                Policy::builder("b", Effect::Permit).build().unwrap(),
                Policy::builder("a", Effect::Forbid).build().unwrap(),
                Policy::builder("c", Effect::Permit).build().unwrap(),
            ],
        )
        .unwrap();

        assert_eq!(set.len(), 3);
        assert_eq!(set.permits().count(), 2);
        assert_eq!(set.forbids().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(set.ids(), vec!["a", "b", "c"]);
        assert!(set.get("c").is_some());
        assert!(set.get("d").is_none());
    }

    #[test]
    fn test_policy_set_rejects_duplicates() {
        let err = PolicySet::from_policies(
            "store1",
            vec![
                Policy::builder("a", Effect::Permit).build().unwrap(),
                Policy::builder("a", Effect::Forbid).build().unwrap(),
            ],
        )
        .unwrap_err();

        assert!(matches!(
            err,
            crate::Error::DuplicatePolicyId { ref store_id, ref policy_id }
                if store_id == "store1" && policy_id == "a"
        ));
    }
}
