//! Error types for wire protocol operations.

use std::fmt;

/// The primary error type for all mywire operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (transport, handshake, disconnect)
    Connection(ConnectionError),
    /// Errors the server reported inside a well-formed packet
    Query(QueryError),
    /// Protocol errors (wire-level: framing, truncation, desync)
    Protocol(ProtocolError),
    /// Type conversion errors when extracting values from rows
    Type(TypeError),
    /// I/O errors
    Io(std::io::Error),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Authentication failed or was refused
    Authentication,
    /// Connection lost during operation
    Disconnected,
    /// TLS negotiation failed
    Tls,
    /// A command was issued in a state that forbids it
    OutOfSync,
}

/// An error the server reported in an error packet.
///
/// These are recoverable: the packet itself decoded fine, the *statement*
/// failed, and the connection stays usable.
#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    /// Server error code (e.g. 1062 for ER_DUP_ENTRY)
    pub code: u16,
    /// Five-character SQLSTATE, "HY000" when the server omitted it
    pub sqlstate: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    /// Offending payload bytes, when they were cheap to keep
    pub raw_data: Option<Vec<u8>>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl Error {
    /// Is this a connection error that likely requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Protocol(_) | Error::Io(_))
    }

    /// Get the server error code, if the server reported one.
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Error::Query(q) => Some(q.code),
            _ => None,
        }
    }

    /// Get SQLSTATE if available (e.g. "23000" for constraint violations).
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => Some(q.sqlstate.as_str()),
            _ => None,
        }
    }
}

impl QueryError {
    /// Is this a unique constraint violation?
    pub fn is_duplicate_key(&self) -> bool {
        // MySQL error code 1062 = ER_DUP_ENTRY
        self.code == 1062
    }

    /// Is this a foreign key constraint violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        // MySQL error codes 1451, 1452 = foreign key violations
        self.code == 1451 || self.code == 1452
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                write!(
                    f,
                    "Server error {} (SQLSTATE {}): {}",
                    e.code, e.sqlstate, e.message
                )
            }
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Protocol(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (SQLSTATE {})", self.message, self.sqlstate)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, found {}", self.expected, self.actual)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

/// Result type alias for mywire operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_helpers() {
        let query = QueryError {
            kind: QueryErrorKind::Constraint,
            code: 1062,
            sqlstate: "23000".to_string(),
            message: "Duplicate entry".to_string(),
        };

        assert!(query.is_duplicate_key());
        assert!(!query.is_foreign_key_violation());

        let err = Error::Query(query);
        assert_eq!(err.server_code(), Some(1062));
        assert_eq!(err.sqlstate(), Some("23000"));
        assert!(!err.is_connection_error());
    }

    #[test]
    fn connection_error_flags() {
        let err = Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Disconnected,
            message: "lost connection".to_string(),
            source: None,
        });
        assert!(err.is_connection_error());
        assert_eq!(err.sqlstate(), None);

        let err = Error::Protocol(ProtocolError {
            message: "truncated packet".to_string(),
            raw_data: None,
            source: None,
        });
        assert!(err.is_connection_error());
    }

    #[test]
    fn display_includes_code_and_sqlstate() {
        let err = Error::Query(QueryError {
            kind: QueryErrorKind::Syntax,
            code: 1064,
            sqlstate: "42000".to_string(),
            message: "You have an error in your SQL syntax".to_string(),
        });
        let text = err.to_string();
        assert!(text.contains("1064"));
        assert!(text.contains("42000"));
    }
}
