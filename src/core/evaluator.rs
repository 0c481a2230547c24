//! Policy evaluator implementation.

use super::expression::{evaluate_bool, EvaluationError};
use crate::api::{AuthorizeResult, EvaluationContext, PolicyEvaluationError};
use crate::policy::{ConditionKind, EntityUid, Policy, PolicySet, ScopeConstraint};

use tracing::{debug, warn};

/// The policy evaluator that processes policy sets against contexts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator {
    /// Whether to log every policy's outcome at debug level
    enable_tracing: bool,
}

impl Evaluator {
    /// Create a new evaluator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable per-policy tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    /// Evaluate a policy set against the given context.
    ///
    /// Any satisfied `forbid` denies. Otherwise any satisfied `permit` allows. Otherwise
    /// the request is denied with no reasons. A condition that fails to evaluate leaves
    /// its policy unsatisfied and is reported in [`AuthorizeResult::errors`].
    pub fn evaluate(&self, policies: &PolicySet, context: &EvaluationContext) -> AuthorizeResult {
        let mut errors = Vec::new();

        let mut forbids = self.satisfied(policies.forbids(), context, &mut errors);
        let mut permits = self.satisfied(policies.permits(), context, &mut errors);

        errors.sort();
        forbids.sort_unstable();
        permits.sort_unstable();

        let result = if !forbids.is_empty() {
            AuthorizeResult::deny(forbids)
        } else if !permits.is_empty() {
            AuthorizeResult::allow(permits)
        } else {
            AuthorizeResult::deny(Vec::new())
        };
        result.with_errors(errors)
    }

    fn satisfied<'p>(
        &self,
        policies: impl Iterator<Item = &'p Policy>,
        context: &EvaluationContext,
        errors: &mut Vec<PolicyEvaluationError>,
    ) -> Vec<String> {
        let mut ids = Vec::new();
        for policy in policies {
            match is_satisfied(policy, context) {
                Ok(true) => {
                    if self.enable_tracing {
                        debug!(policy_id = %policy.id, effect = %policy.effect, "Policy satisfied");
                    }
                    ids.push(policy.id.clone());
                }
                Ok(false) => {
                    if self.enable_tracing {
                        debug!(policy_id = %policy.id, effect = %policy.effect, "Policy not satisfied");
                    }
                }
                Err(e) => {
                    warn!(policy_id = %policy.id, error = %e, "Condition evaluation failed");
                    errors.push(PolicyEvaluationError {
                        policy_id: policy.id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        ids
    }
}

/// Evaluate a policy set with a default evaluator.
pub fn evaluate(policies: &PolicySet, context: &EvaluationContext) -> AuthorizeResult {
    Evaluator::new().evaluate(policies, context)
}

/// Check the scope, then every `when` (must hold) and `unless` (must not hold).
pub fn is_satisfied(policy: &Policy, context: &EvaluationContext) -> Result<bool, EvaluationError> {
    let scope = &policy.scope;

    let scope_matches = constraint_matches(&scope.principal, context.principal(), context)
        && constraint_matches(&scope.action, context.action(), context)
        && constraint_matches(&scope.resource, context.resource(), context);
    if !scope_matches {
        return Ok(false);
    }

    for condition in &policy.conditions {
        let holds = evaluate_bool(&condition.expr, context)?;
        let passes = match condition.kind {
            ConditionKind::When => holds,
            ConditionKind::Unless => !holds,
        };
        if !passes {
            return Ok(false);
        }
    }
    Ok(true)
}

fn constraint_matches(
    constraint: &ScopeConstraint,
    uid: &EntityUid,
    context: &EvaluationContext,
) -> bool {
    let entities = context.entities();
    match constraint {
        ScopeConstraint::Any => true,
        ScopeConstraint::Eq(target) => target.matches(uid),
        ScopeConstraint::In(targets) => targets.iter().any(|t| entities.is_in(uid, t)),
        ScopeConstraint::Is {
            entity_type,
            in_entity,
        } => {
            uid.entity_type() == Some(entity_type.as_str())
                && in_entity.as_ref().map_or(true, |t| entities.is_in(uid, t))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ContextBuilder, Request};
    use crate::policy::{parse_policies, Decision, IdentifierCase};
    use serde_json::json;

    fn policy_set(text: &str) -> PolicySet {
        let policies = parse_policies(text, IdentifierCase::Preserve).unwrap();
        PolicySet::from_policies("test", policies).unwrap()
    }

    fn ctx(principal: &str, action: &str, resource: &str, context: serde_json::Value) -> EvaluationContext {
        ContextBuilder::new()
            .build(principal, action, resource, &context)
            .unwrap()
    }

    #[test]
    fn test_simple_permit() {
        let set = policy_set(
            r#"@id("p1") permit(principal == "A", action == "read", resource == "doc1");"#,
        );

        let result = evaluate(&set, &ctx("A", "read", "doc1", json!({})));
        assert_eq!(result.decision, Decision::Allow);
        assert_eq!(result.reasons, vec!["p1"]);

        let result = evaluate(&set, &ctx("A", "write", "doc1", json!({})));
        assert_eq!(result.decision, Decision::Deny);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn test_deny_overrides() {
        let set = policy_set(
            r#"
            @id("allow-read") permit(principal, action == "read", resource);
            @id("block-a") forbid(principal == "A", action, resource);
            "#,
        );

        let result = evaluate(&set, &ctx("A", "read", "doc1", json!({})));
        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(result.reasons, vec!["block-a"]);

        let result = evaluate(&set, &ctx("B", "read", "doc1", json!({})));
        assert_eq!(result.decision, Decision::Allow);
        assert_eq!(result.reasons, vec!["allow-read"]);
    }

    #[test]
    fn test_empty_set_denies() {
        let set = PolicySet::new("empty");
        let result = evaluate(&set, &ctx("A", "read", "doc1", json!({})));
        assert_eq!(result, AuthorizeResult::deny(Vec::new()));
    }

    #[test]
    fn test_reasons_sorted() {
        let set = policy_set(
            r#"
            @id("z") permit(principal, action, resource);
            @id("a") permit(principal, action, resource);
            @id("m") permit(principal, action, resource);
            "#,
        );
        let result = evaluate(&set, &ctx("A", "read", "doc1", json!({})));
        assert_eq!(result.reasons, vec!["a", "m", "z"]);
    }

    #[test]
    fn test_conditions() {
        let set = policy_set(
            r#"
            @id("internal") permit(principal, action, resource)
            when { context.network == "internal" }
            unless { context.suspended };
            "#,
        );

        let allowed = evaluate(
            &set,
            &ctx("A", "read", "doc1", json!({"network": "internal", "suspended": false})),
        );
        assert!(allowed.is_allowed());

        let suspended = evaluate(
            &set,
            &ctx("A", "read", "doc1", json!({"network": "internal", "suspended": true})),
        );
        assert!(!suspended.is_allowed());
    }

    #[test]
    fn test_condition_error_is_not_satisfied() {
        let set = policy_set(
            r#"
            @id("needs-ip") permit(principal, action, resource) when { context.ip == "10.0.0.1" };
            @id("broken-forbid") forbid(principal, action, resource) when { context.level > 3 };
            "#,
        );

        let result = evaluate(&set, &ctx("A", "read", "doc1", json!({"ip": "10.0.0.1"})));
        assert_eq!(result.decision, Decision::Allow);
        assert_eq!(result.reasons, vec!["needs-ip"]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].policy_id, "broken-forbid");
    }

    #[test]
    fn test_scope_hierarchy_and_type() {
        let set = policy_set(
            r#"
            @id("devs-read") permit(
                principal in Group::"devs",
                action in [Action::"read", Action::"list"],
                resource is Doc in Folder::"shared"
            );
            "#,
        );

        let request = Request::builder(r#"User::"alice""#, r#"Action::"list""#, r#"Doc::"d1""#)
            .entity(r#"User::"alice""#, json!({}), vec![r#"Group::"devs""#.into()])
            .entity(r#"Doc::"d1""#, json!({}), vec![r#"Folder::"shared""#.into()])
            .build();
        let context = ContextBuilder::new().build_request(&request).unwrap();
        assert!(evaluate(&set, &context).is_allowed());

        let request = Request::builder(r#"User::"bob""#, r#"Action::"list""#, r#"Doc::"d1""#)
            .entity(r#"Doc::"d1""#, json!({}), vec![r#"Folder::"shared""#.into()])
            .build();
        let context = ContextBuilder::new().build_request(&request).unwrap();
        assert!(!evaluate(&set, &context).is_allowed());
    }

    #[test]
    fn test_forbid_reports_permit_errors() {
        let set = policy_set(
            r#"
            @id("f") forbid(principal, action, resource);
            @id("p") permit(principal, action, resource) when { context.missing };
            "#,
        );
        let result = Evaluator::new()
            .with_tracing(true)
            .evaluate(&set, &ctx("A", "read", "doc1", json!({})));
        assert_eq!(result.reasons, vec!["f"]);
        assert_eq!(result.errors.len(), 1);
    }
}
