//! # Cedarling
//!
//! Local, policy-backed authorization decisions. Cedarling loads a policy store document
//! once at startup and answers "may this principal perform this action on this resource,
//! given this context?" in-process, with no network round trip per request.
//!
//! ## Features
//!
//! - **Policy Stores**: JSON or YAML documents holding one or more named stores
//! - **Policy Language**: `permit`/`forbid` policies with scope constraints, entity
//!   hierarchy, and `when`/`unless` conditions
//! - **Deny Overrides**: any satisfied `forbid` wins, and nothing is allowed by default
//! - **Diagnostics**: conditions that fail to evaluate are reported, never fatal
//! - **Decision Log**: one structured `tracing` event per decision
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cedarling::{BootstrapConfig, Cedarling, Decision, PolicyStoreSource, Request};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = r#"{
//!         "policy_stores": {
//!             "store1": {
//!                 "policies": {
//!                     "p1": {
//!                         "policy_content": "permit(principal == \"A\", action == \"read\", resource == \"doc1\");"
//!                     }
//!                 }
//!             }
//!         }
//!     }"#;
//!
//!     let cedarling = Cedarling::new(
//!         BootstrapConfig::new("store1", PolicyStoreSource::Local(store.into()))
//!             .with_application_name("docs"),
//!     )?;
//!
//!     let result = cedarling.authorize(Request::new("A", "read", "doc1"))?;
//!
//!     match result.decision {
//!         Decision::Allow => println!("Allowed by {:?}", result.reasons),
//!         Decision::Deny => println!("Denied"),
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod api;
pub mod config;
pub mod core;
pub mod error;
pub mod policy;
pub mod store;
pub mod telemetry;

// Re-export main types for convenience
pub use api::{
    AuthorizeResult, Cedarling, CedarlingBuilder, ContextBuilder, EntityData,
    EvaluationContext, PolicyEvaluationError, PolicyStoreFetcher, Request, RequestBuilder,
};
pub use config::{BootstrapConfig, PolicyStoreSource};
pub use error::{Error, Result};
pub use policy::{Decision, Effect, EntityUid, IdentifierCase, Policy, PolicySet};
pub use store::{LoadOptions, PolicyStore};
pub use telemetry::TelemetryMetrics;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
