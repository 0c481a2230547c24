//! The Cedarling authorization engine.

use super::{AuthorizeResult, ContextBuilder, DecisionLogEntry, Request};
use crate::config::{BootstrapConfig, PolicyStoreSource};
use crate::core::Evaluator;
use crate::store::{self, PolicyStore};
use crate::telemetry::{Telemetry, TelemetryMetrics};
use crate::{Error, Result};

use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Fetches a remote policy store document.
///
/// Cedarling does no network I/O of its own. Callers that configure a
/// [`PolicyStoreSource::Remote`] store supply a fetcher, which is called once while the
/// engine is built.
pub trait PolicyStoreFetcher: Send + Sync {
    /// Return the document found at `uri`.
    fn fetch(&self, uri: &str) -> Result<String>;
}

impl<F> PolicyStoreFetcher for F
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn fetch(&self, uri: &str) -> Result<String> {
        self(uri)
    }
}

/// Local authorization engine.
///
/// The policy store is loaded once, when the engine is built, and never changes
/// afterwards. `Cedarling` is `Send + Sync`; share it behind an [`Arc`] to authorize
/// from many threads.
#[derive(Debug)]
pub struct Cedarling {
    /// Configuration the engine was built with
    config: BootstrapConfig,
    /// The selected store
    store: Arc<PolicyStore>,
    /// Policy evaluator
    evaluator: Evaluator,
    /// Request canonicalization
    context_builder: ContextBuilder,
    /// Request counters
    telemetry: Telemetry,
}

impl Cedarling {
    /// Create an engine builder.
    pub fn builder() -> CedarlingBuilder {
        CedarlingBuilder::new()
    }

    /// Create an engine from a configuration.
    ///
    /// Fails if the configuration is invalid, the document cannot be read or parsed, or the
    /// configured store id is not in the document. A `Remote` source needs a fetcher, see
    /// [`CedarlingBuilder::with_fetcher`].
    pub fn new(config: BootstrapConfig) -> Result<Self> {
        Self::builder().with_config(config).build()
    }

    /// Create an engine from a key/value configuration mapping.
    pub fn from_map(map: HashMap<String, serde_json::Value>) -> Result<Self> {
        Self::new(BootstrapConfig::from_map(map)?)
    }

    /// Decide whether the principal may perform the action on the resource.
    ///
    /// Returns an error only for malformed requests. A request that no policy permits is
    /// a DENY result, not an error.
    pub fn authorize(&self, request: Request) -> Result<AuthorizeResult> {
        let start = Instant::now();

        let context = match self.context_builder.build_request(&request) {
            Ok(context) => context,
            Err(e) => {
                self.telemetry.record_request_error();
                warn!(error = %e, category = e.category(), "Rejected authorization request");
                return Err(e);
            }
        };

        let result = self.evaluator.evaluate(&self.store.policies, &context);
        let elapsed = start.elapsed();

        self.telemetry
            .record_decision(result.decision, result.errors.len(), elapsed);

        if self.config.decision_log {
            DecisionLogEntry {
                request_id: Uuid::new_v4(),
                timestamp: Utc::now(),
                application_name: self.config.application_name.clone(),
                policy_store_id: self.store.id.clone(),
                policy_store_version: self.store.version.clone(),
                principal: context.principal().to_string(),
                action: context.action().to_string(),
                resource: context.resource().to_string(),
                decision: result.decision,
                reasons: result.reasons.clone(),
                error_count: result.errors.len(),
                decision_time_ms: 0.0,
            }
            .with_decision_time(elapsed)
            .emit();
        }

        Ok(result)
    }

    /// The configured application name.
    pub fn application_name(&self) -> &str {
        &self.config.application_name
    }

    /// The loaded policy store.
    pub fn policy_store(&self) -> &PolicyStore {
        &self.store
    }

    /// The configuration the engine was built with.
    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Snapshot of the request counters.
    pub fn metrics(&self) -> TelemetryMetrics {
        self.telemetry.metrics()
    }
}

/// Builder for creating a [`Cedarling`].
#[derive(Default)]
pub struct CedarlingBuilder {
    config: Option<BootstrapConfig>,
    fetcher: Option<Arc<dyn PolicyStoreFetcher>>,
    policy_tracing: bool,
}

impl fmt::Debug for CedarlingBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CedarlingBuilder")
            .field("config", &self.config)
            .field("fetcher", &self.fetcher.as_ref().map(|_| "<fetcher>"))
            .field("policy_tracing", &self.policy_tracing)
            .finish()
    }
}

impl CedarlingBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: BootstrapConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the fetcher used for `Remote` policy stores.
    pub fn with_fetcher(mut self, fetcher: impl PolicyStoreFetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// Log every policy's outcome at debug level.
    pub fn with_policy_tracing(mut self, enabled: bool) -> Self {
        self.policy_tracing = enabled;
        self
    }

    /// Validate the configuration, load the policy store and build the engine.
    pub fn build(self) -> Result<Cedarling> {
        let config = self
            .config
            .ok_or_else(|| Error::config("bootstrap configuration is required"))?;
        config.validate()?;

        let raw = read_source(&config.policy_store, self.fetcher.as_deref())?;
        let store = store::load(&raw, &config.policy_store_id, &config.load_options())?;

        info!(
            application_name = %config.application_name,
            policy_store_id = %store.id,
            policy_store_version = %store.version,
            policy_count = store.policies.len(),
            source = config.policy_store.kind(),
            "Policy store loaded"
        );

        Ok(Cedarling {
            context_builder: ContextBuilder::new().with_identifier_case(config.identifier_case),
            evaluator: Evaluator::new().with_tracing(self.policy_tracing),
            store: Arc::new(store),
            telemetry: Telemetry::new(),
            config,
        })
    }
}

fn read_source(
    source: &PolicyStoreSource,
    fetcher: Option<&dyn PolicyStoreFetcher>,
) -> Result<String> {
    match source {
        PolicyStoreSource::Local(content) => Ok(content.clone()),
        PolicyStoreSource::File(path) => std::fs::read_to_string(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        }),
        PolicyStoreSource::Remote(uri) => {
            let fetcher = fetcher.ok_or_else(|| {
                Error::config_key(
                    "a remote policy store needs a fetcher",
                    "POLICY_STORE_URI",
                )
            })?;
            fetcher.fetch(uri)
        }
    }
}
