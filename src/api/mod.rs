//! Public API for Cedarling.
//!
//! This module provides the [`Cedarling`] engine, the request types it accepts and the
//! result types it returns.

mod context;
mod decision;
mod engine;

pub use context::{ContextBuilder, EntityData, EvaluationContext, Request, RequestBuilder};
pub use decision::{AuthorizeResult, DecisionLogEntry, PolicyEvaluationError};
pub use engine::{Cedarling, CedarlingBuilder, PolicyStoreFetcher};
