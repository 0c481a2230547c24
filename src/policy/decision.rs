//! Decision and effect types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The outcome of an authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    /// The request is permitted
    Allow,
    /// The request is denied
    Deny,
}

impl Decision {
    /// Check if this decision allows the request.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Check if this decision denies the request.
    pub fn is_denied(&self) -> bool {
        matches!(self, Decision::Deny)
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "ALLOW",
            Decision::Deny => "DENY",
        }
    }
}

impl Default for Decision {
    fn default() -> Self {
        Decision::Deny
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Decision {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow" => Ok(Decision::Allow),
            "deny" => Ok(Decision::Deny),
            _ => Err(crate::Error::parse(format!("Unknown decision: {}", s))),
        }
    }
}

/// The effect a policy has when it is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// `permit`
    Permit,
    /// `forbid`
    Forbid,
}

impl Effect {
    /// Get the policy keyword.
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Permit => "permit",
            Effect::Forbid => "forbid",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
