//! Error types for qail-mysql.

use std::fmt;

use thiserror::Error;

use crate::protocol::error_code;

/// MySQL driver error types.
#[derive(Debug, Error)]
pub enum MySqlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame header, sequence mismatch or truncated stream.
    #[error("Framing error: {0}")]
    Framing(String),

    /// Unexpected packet for the current state, or a malformed packet body.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error: {0}")]
    Server(ServerError),

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(ServerError),

    #[error("Invalid syntax: {0}")]
    InvalidSyntax(ServerError),

    #[error("Unsupported server: {0}")]
    UnsupportedServer(String),

    #[error("Unsupported auth plugin: {0}")]
    UnsupportedAuthPlugin(String),

    #[error("Server does not support TLS but a secure connection is required")]
    SecureConnectionRequired,

    #[error("Auth error: {0}")]
    Auth(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Connection closed")]
    Closed,

    /// A per-row callback failed; reported once the exchange has drained.
    #[error("Row handler failed: {0}")]
    RowHandler(Box<dyn std::error::Error + Send + Sync>),

    /// A column value could not be converted to the requested type.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The bound parameters do not match the prepared statement.
    #[error("Parameter mismatch: {0}")]
    ParameterMismatch(String),

    #[error("Timeout")]
    Timeout,
}

impl MySqlError {
    /// The server error carried by this error, if any.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            MySqlError::Server(e) | MySqlError::DuplicateEntry(e) | MySqlError::InvalidSyntax(e) => {
                Some(e)
            }
            _ => None,
        }
    }

    /// Whether the connection can no longer be used after this error.
    pub fn is_connection_fatal(&self) -> bool {
        match self {
            MySqlError::Io(_)
            | MySqlError::Framing(_)
            | MySqlError::Protocol(_)
            | MySqlError::Tls(_)
            | MySqlError::Closed
            | MySqlError::Timeout => true,
            other => other
                .server_error()
                .is_some_and(|e| error_code::is_connection_fatal(e.code)),
        }
    }
}

/// An ERR packet as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: u16,
    /// Five-character SQLSTATE, absent on pre-4.1 style errors.
    pub sql_state: Option<String>,
    pub message: String,
}

impl ServerError {
    /// Map the error code onto the richer local error kinds.
    pub fn into_error(self) -> MySqlError {
        match self.code {
            error_code::ER_DUP_ENTRY | error_code::ER_DUP_ENTRY_WITH_KEY_NAME => {
                MySqlError::DuplicateEntry(self)
            }
            error_code::ER_PARSE_ERROR | error_code::ER_SYNTAX_ERROR => {
                MySqlError::InvalidSyntax(self)
            }
            _ => MySqlError::Server(self),
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql_state {
            Some(state) => write!(f, "{} ({}): {}", self.code, state, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

/// Result type for MySQL operations.
pub type MySqlResult<T> = Result<T, MySqlError>;
