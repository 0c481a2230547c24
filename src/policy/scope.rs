//! Policy scope constraints over principal, action and resource.

use super::EntityUid;
use std::fmt;

/// Constraint on one scope variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeConstraint {
    /// No constraint (`principal`)
    Any,
    /// Exact match (`principal == User::"alice"`)
    Eq(EntityUid),
    /// Membership in one of the entities, directly or through parents
    /// (`principal in Group::"admins"`, `action in [Action::"read", Action::"list"]`)
    In(Vec<EntityUid>),
    /// Entity type test with an optional membership target
    /// (`resource is Document in Folder::"shared"`)
    Is {
        /// Required entity type
        entity_type: String,
        /// Optional `in` target
        in_entity: Option<EntityUid>,
    },
}

impl ScopeConstraint {
    /// Check whether this constraint accepts every entity.
    pub fn is_any(&self) -> bool {
        matches!(self, ScopeConstraint::Any)
    }

    /// Write the constraint after the variable name, as it appears in policy text.
    pub(crate) fn fmt_with(&self, var: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeConstraint::Any => write!(f, "{}", var),
            ScopeConstraint::Eq(uid) => write!(f, "{} == {}", var, Ref(uid)),
            ScopeConstraint::In(uids) if uids.len() == 1 => {
                write!(f, "{} in {}", var, Ref(&uids[0]))
            }
            ScopeConstraint::In(uids) => {
                write!(f, "{} in [", var)?;
                for (i, uid) in uids.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", Ref(uid))?;
                }
                write!(f, "]")
            }
            ScopeConstraint::Is {
                entity_type,
                in_entity: None,
            } => write!(f, "{} is {}", var, entity_type),
            ScopeConstraint::Is {
                entity_type,
                in_entity: Some(uid),
            } => write!(f, "{} is {} in {}", var, entity_type, Ref(uid)),
        }
    }
}

/// Renders untyped references as quoted strings, like they are written in policies.
struct Ref<'a>(&'a EntityUid);

impl fmt::Display for Ref<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.entity_type() {
            Some(_) => write!(f, "{}", self.0),
            None => write!(f, "\"{}\"", self.0.id().replace('\\', "\\\\").replace('"', "\\\"")),
        }
    }
}

/// The full scope of a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyScope {
    /// Principal constraint
    pub principal: ScopeConstraint,
    /// Action constraint
    pub action: ScopeConstraint,
    /// Resource constraint
    pub resource: ScopeConstraint,
}

impl PolicyScope {
    /// A scope that matches every request.
    pub fn unconstrained() -> Self {
        Self {
            principal: ScopeConstraint::Any,
            action: ScopeConstraint::Any,
            resource: ScopeConstraint::Any,
        }
    }
}

impl fmt::Display for PolicyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.principal.fmt_with("principal", f)?;
        write!(f, ", ")?;
        self.action.fmt_with("action", f)?;
        write!(f, ", ")?;
        self.resource.fmt_with("resource", f)
    }
}
