//! Error types for the DNP3 stack.
//!
//! Two classes of failure exist. Contract violations (bad argument sizes,
//! iterator misuse, unassignable classes, indices outside the configured
//! range) carry the call site that raised them. Everything else is a
//! protocol or I/O condition.

use std::panic::Location;

use thiserror::Error;

use crate::types::DataType;

/// Result type alias for DNP3 operations.
pub type Result<T> = std::result::Result<T, Dnp3Error>;

/// DNP3 stack error types.
#[derive(Debug, Error)]
pub enum Dnp3Error {
    /// Illegal argument passed by the caller
    #[error("Illegal argument: {message} ({location})")]
    Argument {
        message: String,
        location: &'static Location<'static>,
    },

    /// Object iterator dereferenced or advanced past its end
    #[error("Iterator out of bounds ({location})")]
    IteratorOutOfBounds { location: &'static Location<'static> },

    /// Object iterator dereferenced on a header that carries no data
    #[error("Iterator has no data ({location})")]
    IteratorNoData { location: &'static Location<'static> },

    /// Point index outside the configured range
    #[error("Index {index} out of bounds for {data_type} (count {count}) ({location})")]
    IndexOutOfBounds {
        data_type: DataType,
        index: usize,
        count: usize,
        location: &'static Location<'static>,
    },

    /// Event class cannot be assigned for this point type
    #[error("Class cannot be assigned for {0}")]
    ClassNotAssignable(DataType),

    /// Deadband cannot be assigned for this point type
    #[error("Deadband cannot be assigned for {0}")]
    DeadbandNotAssignable(DataType),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Not connected to remote
    #[error("Not connected")]
    NotConnected,

    /// Connection timeout
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid link frame
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Invalid application header or object data
    #[error("Invalid object data: {0}")]
    InvalidObject(String),

    /// Unknown qualifier code
    #[error("Unknown qualifier code: 0x{0:02X}")]
    UnknownQualifier(u8),

    /// Object group/variation not known to this stack
    #[error("Unknown object: g{group}v{variation}")]
    UnknownObject { group: u8, variation: u8 },

    /// Unknown application function code
    #[error("Unknown function code: {0}")]
    UnknownFunctionCode(u8),

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// Codec error
    #[error("Codec error: {0}")]
    Codec(String),
}

impl Dnp3Error {
    /// Create an argument error at the caller's location.
    #[track_caller]
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument {
            message: msg.into(),
            location: Location::caller(),
        }
    }

    /// Create an iterator out-of-bounds error at the caller's location.
    #[track_caller]
    pub fn iterator_out_of_bounds() -> Self {
        Self::IteratorOutOfBounds {
            location: Location::caller(),
        }
    }

    /// Create an iterator no-data error at the caller's location.
    #[track_caller]
    pub fn iterator_no_data() -> Self {
        Self::IteratorNoData {
            location: Location::caller(),
        }
    }

    /// Create an index out-of-bounds error at the caller's location.
    #[track_caller]
    pub fn index_out_of_bounds(data_type: DataType, index: usize, count: usize) -> Self {
        Self::IndexOutOfBounds {
            data_type,
            index,
            count,
            location: Location::caller(),
        }
    }

    /// Create an invalid frame error.
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }

    /// Create an invalid object error.
    pub fn invalid_object(msg: impl Into<String>) -> Self {
        Self::InvalidObject(msg.into())
    }

    /// Source location for contract violations.
    pub fn location(&self) -> Option<&'static Location<'static>> {
        match self {
            Self::Argument { location, .. }
            | Self::IteratorOutOfBounds { location }
            | Self::IteratorNoData { location }
            | Self::IndexOutOfBounds { location, .. } => Some(location),
            _ => None,
        }
    }

    /// Check if this error is a contract violation (caller bug or
    /// configuration mismatch) rather than a protocol or I/O condition.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::Argument { .. }
                | Self::IteratorOutOfBounds { .. }
                | Self::IteratorNoData { .. }
                | Self::IndexOutOfBounds { .. }
                | Self::ClassNotAssignable(_)
                | Self::DeadbandNotAssignable(_)
        )
    }

    /// Check if this error indicates a connection problem.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::NotConnected | Self::ConnectionTimeout | Self::Io(_)
        )
    }
}
