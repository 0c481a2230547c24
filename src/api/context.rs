//! Authorization requests and the evaluation context built from them.
//!
//! A [`Request`] is what callers hand to [`Cedarling::authorize`](crate::Cedarling::authorize):
//! raw identifiers plus a JSON context. The [`ContextBuilder`] canonicalizes and type-checks
//! it into an immutable [`EvaluationContext`] that owns deep copies of everything it needs.

use crate::core::{Entities, Entity, Value};
use crate::policy::{EntityUid, IdentifierCase};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An authorization request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Principal identifier (`Type::"id"` or a bare id)
    pub principal: String,
    /// Action identifier
    pub action: String,
    /// Resource identifier
    pub resource: String,
    /// Context attributes; must be a JSON object or null
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub context: serde_json::Value,
    /// Attribute and hierarchy data for entities referenced by the request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<EntityData>,
}

impl Request {
    /// Create a request with an empty context.
    pub fn new(
        principal: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            principal: principal.into(),
            action: action.into(),
            resource: resource.into(),
            context: serde_json::Value::Null,
            entities: Vec::new(),
        }
    }

    /// Create a request builder.
    pub fn builder(
        principal: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> RequestBuilder {
        RequestBuilder {
            request: Self::new(principal, action, resource),
        }
    }
}

/// Entity data carried by a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    /// Entity identifier
    pub uid: String,
    /// Attributes; must be a JSON object or null
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub attrs: serde_json::Value,
    /// Direct parent identifiers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
}

/// Builder for requests.
#[derive(Debug)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    /// Set the context.
    pub fn context(mut self, context: serde_json::Value) -> Self {
        self.request.context = context;
        self
    }

    /// Add entity data.
    pub fn entity(
        mut self,
        uid: impl Into<String>,
        attrs: serde_json::Value,
        parents: Vec<String>,
    ) -> Self {
        self.request.entities.push(EntityData {
            uid: uid.into(),
            attrs,
            parents,
        });
        self
    }

    /// Build the request.
    pub fn build(self) -> Request {
        self.request
    }
}

/// Normalized, immutable input to policy evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationContext {
    principal: EntityUid,
    action: EntityUid,
    resource: EntityUid,
    context: Value,
    entities: Entities,
}

impl EvaluationContext {
    /// The canonical principal.
    pub fn principal(&self) -> &EntityUid {
        &self.principal
    }

    /// The canonical action.
    pub fn action(&self) -> &EntityUid {
        &self.action
    }

    /// The canonical resource.
    pub fn resource(&self) -> &EntityUid {
        &self.resource
    }

    /// The context record.
    pub fn context(&self) -> &Value {
        &self.context
    }

    /// Entity data for this request.
    pub fn entities(&self) -> &Entities {
        &self.entities
    }
}

/// Turns raw requests into evaluation contexts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextBuilder {
    case: IdentifierCase,
}

impl ContextBuilder {
    /// Create a builder that keeps identifier case.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the identifier case rule.
    pub fn with_identifier_case(mut self, case: IdentifierCase) -> Self {
        self.case = case;
        self
    }

    /// Build a context from identifiers and a JSON context with no entity data.
    pub fn build(
        &self,
        principal: &str,
        action: &str,
        resource: &str,
        context: &serde_json::Value,
    ) -> Result<EvaluationContext> {
        Ok(EvaluationContext {
            principal: self.uid(principal, "principal")?,
            action: self.uid(action, "action")?,
            resource: self.uid(resource, "resource")?,
            context: Value::Record(self.record("context", context)?),
            entities: Entities::new(),
        })
    }

    /// Build a context from a full request.
    pub fn build_request(&self, request: &Request) -> Result<EvaluationContext> {
        let mut ctx = self.build(
            &request.principal,
            &request.action,
            &request.resource,
            &request.context,
        )?;

        for (i, data) in request.entities.iter().enumerate() {
            let field = format!("entities[{}]", i);
            let uid = self.uid(&data.uid, &format!("{}.uid", field))?;
            let attrs = self.record(&format!("{}.attrs", field), &data.attrs)?;
            let parents = data
                .parents
                .iter()
                .enumerate()
                .map(|(j, p)| self.uid(p, &format!("{}.parents[{}]", field, j)))
                .collect::<Result<Vec<_>>>()?;

            ctx.entities.insert(Entity {
                uid,
                attrs,
                parents,
            });
        }

        Ok(ctx)
    }

    fn uid(&self, raw: &str, field: &str) -> Result<EntityUid> {
        EntityUid::parse(raw, self.case).map_err(|e| match e {
            Error::InvalidRequest { message, .. } => Error::invalid_request_field(message, field),
            other => other,
        })
    }

    fn record(&self, path: &str, json: &serde_json::Value) -> Result<BTreeMap<String, Value>> {
        if json.is_null() {
            return Ok(BTreeMap::new());
        }
        if !json.is_object() {
            return Err(Error::invalid_context_value(
                path,
                format!("expected an object, found {}", json_type(json)),
            ));
        }

        let value = Value::from_json("", json, self.case).map_err(|e| match e {
            Error::InvalidContextValue { attribute, reason } if attribute.is_empty() => {
                Error::invalid_context_value(path, reason)
            }
            Error::InvalidContextValue { attribute, reason } => {
                Error::invalid_context_value(format!("{}.{}", path, attribute), reason)
            }
            other => other,
        })?;
        match value {
            Value::Record(fields) => Ok(fields),
            other => Err(Error::invalid_context_value(
                path,
                format!("expected a record, found {}", other.type_name()),
            )),
        }
    }
}

fn json_type(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
