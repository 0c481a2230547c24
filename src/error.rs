//! Error types for Cedarling.
//!
//! Construction failures (configuration and policy store loading) and per-request
//! failures share one [`Error`] type. A request that is rejected with an error is
//! different from a request that is denied: denials are returned as
//! [`AuthorizeResult`](crate::AuthorizeResult) values, never as errors.

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Cedarling.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid bootstrap configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Detailed error message
        message: String,
        /// Configuration key that caused the error
        key: Option<String>,
    },

    /// Syntax error in the policy store document or in a policy
    #[error("Policy parse error{}: {message}", location(.policy_id, .line, .column))]
    Parse {
        /// Detailed error message
        message: String,
        /// Policy being parsed, if the error is inside a policy
        policy_id: Option<String>,
        /// 1-based line number, if known
        line: Option<usize>,
        /// 1-based column number, if known
        column: Option<usize>,
    },

    /// The configured policy store id is not present in the document
    #[error("Policy store `{store_id}` not found in the policy store document")]
    StoreNotFound {
        /// The requested store id
        store_id: String,
    },

    /// Two policies in the same store share an id
    #[error("Duplicate policy id `{policy_id}` in policy store `{store_id}`")]
    DuplicatePolicyId {
        /// Store containing the duplicate
        store_id: String,
        /// The duplicated policy id
        policy_id: String,
    },

    /// A store holds more policies than the configured limit
    #[error("Policy store `{store_id}` has {count} policies, the limit is {limit}")]
    PolicyLimit {
        /// Store exceeding the limit
        store_id: String,
        /// Number of policies found
        count: usize,
        /// Configured maximum
        limit: usize,
    },

    /// Policy content could not be decoded
    #[error("Could not decode policy `{policy_id}`: {message}")]
    Encoding {
        /// Policy whose content is malformed
        policy_id: String,
        /// Detailed error message
        message: String,
    },

    /// Malformed authorization request
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Detailed error message
        message: String,
        /// Request field that caused the error
        field: Option<String>,
    },

    /// A context attribute has a type that cannot be evaluated
    #[error("Invalid context value for `{attribute}`: {reason}")]
    InvalidContextValue {
        /// Dotted path of the offending attribute
        attribute: String,
        /// Why the value was rejected
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Internal error (unexpected condition)
    #[error("Internal error: {message}")]
    Internal {
        /// Detailed error message
        message: String,
    },
}

fn location(policy_id: &Option<String>, line: &Option<usize>, column: &Option<usize>) -> String {
    let mut out = String::new();
    if let Some(id) = policy_id {
        out.push_str(&format!(" in policy `{}`", id));
    }
    match (line, column) {
        (Some(line), Some(column)) => out.push_str(&format!(" at {}:{}", line, column)),
        (Some(line), None) => out.push_str(&format!(" at line {}", line)),
        _ => {}
    }
    out
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: None,
        }
    }

    /// Create a configuration error for a specific key.
    pub fn config_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create a parse error without location.
    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse {
            message: message.into(),
            policy_id: None,
            line: None,
            column: None,
        }
    }

    /// Create a parse error at a line and column.
    pub fn parse_at(message: impl Into<String>, line: usize, column: usize) -> Self {
        Error::Parse {
            message: message.into(),
            policy_id: None,
            line: Some(line),
            column: Some(column),
        }
    }

    /// Create a request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Error::InvalidRequest {
            message: message.into(),
            field: None,
        }
    }

    /// Create a request error for a specific field.
    pub fn invalid_request_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Error::InvalidRequest {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an invalid context value error.
    pub fn invalid_context_value(attribute: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidContextValue {
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    /// Check if this error comes from loading the policy store.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            Error::Parse { .. }
                | Error::StoreNotFound { .. }
                | Error::DuplicatePolicyId { .. }
                | Error::PolicyLimit { .. }
                | Error::Encoding { .. }
        )
    }

    /// Check if this error rejects a single authorization request.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidRequest { .. } | Error::InvalidContextValue { .. }
        )
    }

    /// Get the error category for metrics and logs.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config",
            Error::Parse { .. } => "parse",
            Error::StoreNotFound { .. } => "store_not_found",
            Error::DuplicatePolicyId { .. } => "duplicate_policy_id",
            Error::PolicyLimit { .. } => "policy_limit",
            Error::Encoding { .. } => "encoding",
            Error::InvalidRequest { .. } => "invalid_request",
            Error::InvalidContextValue { .. } => "invalid_context_value",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Yaml(_) => "yaml",
            Error::Internal { .. } => "internal",
        }
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Attach the policy id to parse errors.
    fn in_policy(self, policy_id: impl Into<String>) -> Result<T>;

    /// Attach the key to configuration errors.
    fn with_key(self, key: impl Into<String>) -> Result<T>;
}

impl<T> ErrorContext<T> for Result<T> {
    fn in_policy(self, policy_id: impl Into<String>) -> Result<T> {
        self.map_err(|e| match e {
            Error::Parse {
                message,
                line,
                column,
                ..
            } => Error::Parse {
                message,
                policy_id: Some(policy_id.into()),
                line,
                column,
            },
            other => other,
        })
    }

    fn with_key(self, key: impl Into<String>) -> Result<T> {
        self.map_err(|e| match e {
            Error::Config { message, .. } => Error::Config {
                message,
                key: Some(key.into()),
            },
            other => other,
        })
    }
}
