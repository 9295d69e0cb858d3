//! Error types for gassist

use std::fmt;

use thiserror::Error;

/// Result type alias using gassist's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// The remote entity an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Event,
    Email,
    Task,
    TaskList,
}

impl EntityKind {
    /// Human label used in tool messages ("Event", "Task", ...)
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Event => "Event",
            EntityKind::Email => "Email",
            EntityKind::Task => "Task",
            EntityKind::TaskList => "Task list",
        }
    }

    /// Where the entity lives, for "No event with ID 'x' exists in the calendar"
    pub fn container(&self) -> &'static str {
        match self {
            EntityKind::Event => "the calendar",
            EntityKind::Email => "the mailbox",
            EntityKind::Task => "the task list",
            EntityKind::TaskList => "the account",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label().to_lowercase())
    }
}

/// Coarse error classification exposed to tool callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Authorization,
    ResourceExhausted,
    RemoteApi,
    Io,
    PartialFailure,
    InvalidRequest,
    Config,
    Internal,
}

/// Main error type for gassist
#[derive(Error, Debug)]
pub enum Error {
    // Remote entity errors
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("{kind} already deleted: {id}")]
    AlreadyGone { kind: EntityKind, id: String },

    // Authentication errors
    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("OAuth error: {0}")]
    OAuth(String),

    // Local resources
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    // Remote API errors
    #[error("Remote API error {status}: {message}")]
    RemoteApi { status: u16, message: String },

    // Bulk operations
    #[error("{failed} of {total} items failed")]
    PartialFailure { failed: usize, total: usize },

    // Tool / protocol errors
    #[error("MCP protocol error: {0}")]
    McpProtocol(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Classify into the caller-facing taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } | Error::AlreadyGone { .. } => ErrorKind::NotFound,
            Error::Authorization(_) | Error::OAuth(_) => ErrorKind::Authorization,
            Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Error::RemoteApi { .. } | Error::Http(_) => ErrorKind::RemoteApi,
            Error::Io(_) => ErrorKind::Io,
            Error::PartialFailure { .. } => ErrorKind::PartialFailure,
            Error::McpProtocol(_) | Error::InvalidRequest(_) | Error::ToolNotFound(_) => {
                ErrorKind::InvalidRequest
            }
            Error::Config(_) | Error::InvalidConfig { .. } | Error::TomlParse(_) => {
                ErrorKind::Config
            }
            Error::Json(_) | Error::Other(_) | Error::Anyhow(_) => ErrorKind::Internal,
        }
    }

    /// Returns an error code suitable for structured tool and MCP error responses
    pub fn code(&self) -> &'static str {
        match self {
            Error::AlreadyGone { .. } => "ALREADY_GONE",
            Error::ToolNotFound(_) => "TOOL_NOT_FOUND",
            _ => match self.kind() {
                ErrorKind::NotFound => "NOT_FOUND",
                ErrorKind::Authorization => "AUTHORIZATION_FAILED",
                ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
                ErrorKind::RemoteApi => "REMOTE_API_ERROR",
                ErrorKind::Io => "IO_ERROR",
                ErrorKind::PartialFailure => "PARTIAL_FAILURE",
                ErrorKind::InvalidRequest => "INVALID_REQUEST",
                ErrorKind::Config => "CONFIG_ERROR",
                ErrorKind::Internal => "INTERNAL_ERROR",
            },
        }
    }

    /// Returns a user-friendly action message for recoverable errors
    pub fn action_hint(&self) -> Option<&'static str> {
        match self.kind() {
            ErrorKind::Authorization => {
                Some("Run `gassist auth login` and complete the browser consent flow")
            }
            ErrorKind::ResourceExhausted => Some("Free a local port or wait and try again"),
            ErrorKind::Config => Some("Check ~/.config/gassist/config.toml"),
            _ => None,
        }
    }

    /// Remote HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::RemoteApi { status, .. } => Some(*status),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Re-interpret a remote failure against the entity that was requested.
    ///
    /// 404 becomes `NotFound` and 410 becomes `AlreadyGone`, both echoing `id`.
    /// Every other error passes through unchanged.
    pub fn for_entity(self, kind: EntityKind, id: &str) -> Self {
        match self.status() {
            Some(404) => Error::NotFound {
                kind,
                id: id.to_string(),
            },
            Some(410) => Error::AlreadyGone {
                kind,
                id: id.to_string(),
            },
            _ => self,
        }
    }

    /// Short headline for a tool error result
    pub fn headline(&self) -> String {
        match self {
            Error::NotFound { kind, .. } => format!("{} not found", kind.label()),
            Error::AlreadyGone { kind, .. } => format!("{} already deleted", kind.label()),
            Error::Authorization(_) | Error::OAuth(_) => "Authorization failed".to_string(),
            Error::ResourceExhausted(_) => "Local resources unavailable".to_string(),
            Error::InvalidRequest(_) | Error::ToolNotFound(_) => "Invalid request".to_string(),
            _ => "An unexpected error occurred".to_string(),
        }
    }

    /// Longer explanation for a tool error result
    pub fn details(&self) -> String {
        match self {
            Error::NotFound { kind, id } => format!(
                "No {} with ID '{}' exists in {}",
                kind,
                id,
                kind.container()
            ),
            Error::AlreadyGone { kind, id } => {
                format!("{} with ID '{}' was already deleted", kind.label(), id)
            }
            other => other.to_string(),
        }
    }
}
