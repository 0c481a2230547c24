//! Cedarling command line tool.
//!
//! Answers one authorization request against a policy store file, or validates a store
//! document and lists what it contains.

use cedarling::store::{self, LoadOptions};
use cedarling::{
    BootstrapConfig, Cedarling, EntityData, IdentifierCase, PolicyStoreSource, Request,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Cedarling
#[derive(Parser, Debug)]
#[command(name = "cedarling")]
#[command(about = "Local policy-backed authorization decisions")]
#[command(version)]
struct Args {
    /// Log level, used when RUST_LOG is not set
    #[arg(long, env = "CEDARLING_LOG_LEVEL", default_value = "warn", global = true)]
    log_level: String,

    /// Enable JSON log format
    #[arg(long, env = "CEDARLING_JSON_LOGS", global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decide a single request and print the result as JSON
    Authorize {
        /// Policy store document (JSON or YAML)
        #[arg(long, env = "CEDARLING_POLICY_STORE_LOCAL_FN")]
        store: PathBuf,

        /// Store to select from the document
        #[arg(long, env = "CEDARLING_POLICY_STORE_ID")]
        store_id: String,

        /// Principal identifier, e.g. `User::"alice"`
        #[arg(long)]
        principal: String,

        /// Action identifier
        #[arg(long)]
        action: String,

        /// Resource identifier
        #[arg(long)]
        resource: String,

        /// Context as a JSON object
        #[arg(long)]
        context: Option<String>,

        /// JSON file with an array of entities (`uid`, `attrs`, `parents`)
        #[arg(long)]
        entities: Option<PathBuf>,

        /// Identifier case rule: `preserve` or `lower`
        #[arg(long, env = "CEDARLING_IDENTIFIER_CASE", default_value = "preserve")]
        identifier_case: IdentifierCase,

        /// Do not emit the decision log event
        #[arg(long)]
        no_decision_log: bool,
    },

    /// Parse a policy store document and list its stores and policies
    Validate {
        /// Policy store document (JSON or YAML)
        #[arg(long, env = "CEDARLING_POLICY_STORE_LOCAL_FN")]
        store: PathBuf,

        /// Only check that this store exists
        #[arg(long)]
        store_id: Option<String>,

        /// Identifier case rule: `preserve` or `lower`
        #[arg(long, env = "CEDARLING_IDENTIFIER_CASE", default_value = "preserve")]
        identifier_case: IdentifierCase,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs)?;

    match args.command {
        Command::Authorize {
            store,
            store_id,
            principal,
            action,
            resource,
            context,
            entities,
            identifier_case,
            no_decision_log,
        } => {
            let config = BootstrapConfig::new(store_id, PolicyStoreSource::File(store))
                .with_application_name(cedarling::NAME)
                .with_identifier_case(identifier_case)
                .with_decision_log(!no_decision_log);
            let engine = Cedarling::new(config).context("failed to load policy store")?;

            let context = match context {
                Some(raw) => serde_json::from_str(&raw).context("--context is not valid JSON")?,
                None => serde_json::Value::Null,
            };
            let entities = match entities {
                Some(path) => read_entities(&path)?,
                None => Vec::new(),
            };

            let request = Request {
                principal,
                action,
                resource,
                context,
                entities,
            };
            let result = engine.authorize(request)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Validate {
            store,
            store_id,
            identifier_case,
        } => {
            let raw = std::fs::read_to_string(&store)
                .with_context(|| format!("failed to read {}", store.display()))?;
            let options = LoadOptions {
                identifier_case,
                ..LoadOptions::default()
            };

            let stores = match store_id {
                Some(id) => vec![store::load(&raw, &id, &options)?],
                None => store::load_all(&raw, &options)?,
            };
            info!("Validated {} policy stores from {:?}", stores.len(), store);

            let summaries: Vec<_> = stores.iter().map(|s| s.summary()).collect();
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
    }

    Ok(())
}

/// Initialize the logging system on stderr, leaving stdout for results.
fn init_logging(level: &str, json_format: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level `{}`", level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let result = if json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to set logging subscriber: {}", e))
}

fn read_entities(path: &Path) -> anyhow::Result<Vec<EntityData>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not an entity array", path.display()))
}
