//! Error types for votestore

use std::fmt;
use std::io;

/// Result type alias for vote store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for vote store operations
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(io::Error),

    /// Parse error in the vote log
    Parse(String),

    /// Vote document not found
    NotFound(String),

    /// A vote already exists for this (review, user) pair
    Conflict {
        /// Review the vote belongs to
        review_id: String,
        /// User who cast the vote
        user_id: String,
    },

    /// Field cannot be stored (empty, or contains a separator)
    InvalidField(&'static str),

    /// Vote log holds more records than its header can count
    LogFull,

    /// Store is closed
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Parse(msg) => write!(f, "Parse error: {}", msg),
            Error::NotFound(id) => write!(f, "Vote not found: {}", id),
            Error::Conflict { review_id, user_id } => write!(
                f,
                "Vote already exists for review {} and user {}",
                review_id, user_id
            ),
            Error::InvalidField(field) => write!(f, "Invalid value for field '{}'", field),
            Error::LogFull => write!(f, "Vote log record count overflow; compact the store"),
            Error::Closed => write!(f, "Vote store is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        Error::Parse(format!("{:?}", err))
    }
}
