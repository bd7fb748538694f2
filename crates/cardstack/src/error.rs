//! Error types for channel, context and layer stack operations

use thiserror::Error;

/// Result type alias for cardstack operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the layer stack and the reader plumbing under it.
///
/// `Connection` and `Transport` are runtime conditions a caller may react
/// to (see [`Error::is_recoverable`]). Every other variant is a programming
/// or configuration error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A context could not be established on the reader
    #[error("cannot connect to reader '{reader}': {reason}")]
    Connection {
        reader: String,
        reason: ConnectionFailure,
    },

    /// A stack or terminal layer was used without a live context
    #[error("no open reader context")]
    NotConnected,

    /// The layer is already mounted in this stack or another one
    #[error("layer '{layer}' is already mounted")]
    AlreadyMounted { layer: String },

    /// The terminal layer cannot be released
    #[error("layer '{layer}' cannot be removed from the stack")]
    NotRemovable { layer: String },

    /// The layer is not mounted in the stack it was looked up in
    #[error("layer '{layer}' is not mounted in this stack")]
    NotFound { layer: String },

    /// A layer tried to forward but nothing sits below it
    #[error("layer '{layer}' has no layer below it to forward to")]
    BrokenChain { layer: String },

    /// A command could not be encoded as a short APDU
    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },

    /// The exchange with the card failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl Error {
    /// Whether the error describes a runtime condition rather than a bug.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Connection { .. } | Error::Transport(_))
    }
}

/// Why a reader connection could not be opened
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionFailure {
    #[error("reader not found")]
    ReaderAbsent,

    #[error("reader is held by another connection")]
    ReaderBusy,

    #[error("no card present")]
    NoCard,

    #[error("driver failure: {0}")]
    Driver(String),
}

/// Failure of a single command/response exchange
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("timed out waiting for the card")]
    Timeout,

    #[error("card was removed")]
    CardRemoved,

    #[error("card was reset")]
    CardReset,

    #[error("reader is no longer available")]
    ReaderUnavailable,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("driver failure: {0}")]
    Driver(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_split() {
        assert!(Error::Transport(TransportError::Timeout).is_recoverable());
        assert!(Error::Connection {
            reader: "R".into(),
            reason: ConnectionFailure::ReaderBusy,
        }
        .is_recoverable());

        assert!(!Error::NotConnected.is_recoverable());
        assert!(!Error::BrokenChain { layer: "x".into() }.is_recoverable());
        assert!(!Error::NotRemovable { layer: "PC/SC".into() }.is_recoverable());
        assert!(!Error::InvalidCommand { reason: "x".into() }.is_recoverable());
    }

    #[test]
    fn test_display_names_layer() {
        let err = Error::AlreadyMounted { layer: "trace".into() };
        assert_eq!(err.to_string(), "layer 'trace' is already mounted");
    }
}
