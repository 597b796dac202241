//! Error types for difftest
//!
//! Only session-fatal conditions live here. Per-server query failures are
//! carried as [`QueryError`] values so that one server's error never aborts
//! the other server's evaluation or the rest of the session.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for difftest
#[derive(Error, Debug)]
pub enum Error {
    // === Expression Errors ===
    #[error("Parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("Unbound name '{name}' at offset {offset}")]
    UnboundName { name: String, offset: usize },

    #[error("Error {message} in construction of: {source_text}")]
    Construction {
        source_text: String,
        message: String,
    },

    #[error("Invalid define '{source_text}': {message}")]
    Definition {
        source_text: String,
        message: String,
    },

    // === Connection Errors ===
    #[error("Failed to connect to {endpoint}: {error}")]
    Connect { endpoint: String, error: String },

    #[error("Connection to {endpoint} timed out after {secs} seconds")]
    ConnectTimeout { endpoint: String, secs: u64 },

    // === Session Errors ===
    #[error("Session is closed; no further operations accepted")]
    SessionClosed,

    #[error("Session is already running")]
    SessionRunning,

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === Script Errors ===
    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    #[error("Invalid test script '{path}': {message}")]
    Script { path: String, message: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a parse error at a byte offset
    pub fn parse(offset: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            message: message.into(),
        }
    }

    /// Create a construction error for a test's source text
    pub fn construction(source_text: &str, message: impl fmt::Display) -> Self {
        Self::Construction {
            source_text: source_text.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a define directive error
    pub fn definition(source_text: &str, message: impl fmt::Display) -> Self {
        Self::Definition {
            source_text: source_text.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a connection failure error
    pub fn connect(endpoint: &str, error: impl fmt::Display) -> Self {
        Self::Connect {
            endpoint: endpoint.to_string(),
            error: error.to_string(),
        }
    }

    /// Create a script error
    pub fn script(path: &str, message: impl fmt::Display) -> Self {
        Self::Script {
            path: path.to_string(),
            message: message.to_string(),
        }
    }
}

/// An error reported by one server for one query
///
/// Scoped to that server only. Also used for cursor materialization
/// failures and per-case timeouts.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QueryError {
    /// Error class, e.g. `ReqlRuntimeError`
    pub name: String,
    pub message: String,
}

impl QueryError {
    pub const RUNTIME: &'static str = "ReqlRuntimeError";
    pub const COMPILE: &'static str = "ReqlCompileError";
    pub const CLIENT: &'static str = "ClientError";
    pub const TIMEOUT: &'static str = "Timeout";

    pub fn new(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(Self::RUNTIME, message)
    }

    pub fn compile(message: impl Into<String>) -> Self {
        Self::new(Self::COMPILE, message)
    }

    pub fn client(message: impl Into<String>) -> Self {
        Self::new(Self::CLIENT, message)
    }

    pub fn timeout(secs: u64) -> Self {
        Self::new(
            Self::TIMEOUT,
            format!("No response within {} seconds", secs),
        )
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for QueryError {}

impl From<Error> for QueryError {
    fn from(e: Error) -> Self {
        QueryError::client(e.to_string())
    }
}
