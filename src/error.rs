//! Contains the `Error` and `Result` types that `mongoc` uses.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bson::Document;

const RECOVERING_CODES: [i32; 5] = [11600, 11602, 13436, 189, 91];
const NOTWRITABLEPRIMARY_CODES: [i32; 3] = [10107, 13435, 10058];
const SHUTTING_DOWN_CODES: [i32; 2] = [11600, 91];

/// The result type for all methods that can return an error in the `mongoc` crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in the `mongoc` crate. The inner
/// [`ErrorKind`](enum.ErrorKind.html) is wrapped in a `Box` to keep the error small and
/// cheaply cloneable.
#[derive(Clone, Debug, Error)]
#[error("{kind}")]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Box<ErrorKind>,

    #[source]
    pub(crate) source: Option<Box<Error>>,

    pub(crate) server_response: Option<Box<Document>>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
            source: None,
            server_response: None,
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Error {
        ErrorKind::Internal {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Error {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_response(message: impl Into<String>) -> Error {
        ErrorKind::InvalidResponse {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_cursor(message: impl Into<String>) -> Error {
        ErrorKind::InvalidCursor {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn stream(message: impl Into<String>) -> Error {
        ErrorKind::Stream {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn server_selection(message: impl Into<String>) -> Error {
        ErrorKind::ServerSelection {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn network_timeout() -> Error {
        ErrorKind::Io(Arc::new(std::io::ErrorKind::TimedOut.into())).into()
    }

    pub(crate) fn with_source(mut self, source: impl Into<Option<Error>>) -> Self {
        self.source = source.into().map(Box::new);
        self
    }

    pub(crate) fn with_server_response(mut self, response: Document) -> Self {
        self.server_response = Some(Box::new(response));
        self
    }

    /// The raw reply the server sent for the failed command, if any.
    pub fn server_response(&self) -> Option<&Document> {
        self.server_response.as_deref()
    }

    pub(crate) fn is_state_change_error(&self) -> bool {
        self.is_recovering() || self.is_notwritableprimary()
    }

    pub(crate) fn is_network_timeout(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::TimedOut)
            || self.source.as_ref().is_some_and(|s| s.is_network_timeout())
    }

    pub(crate) fn is_non_timeout_network_error(&self) -> bool {
        self.is_network_error() && !self.is_network_timeout()
    }

    /// Whether this error was caused by the transport: a failed connect, read, or write, a short
    /// read, or a timeout.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self.kind.as_ref(),
            ErrorKind::Io(..) | ErrorKind::Stream { .. }
        )
    }

    pub(crate) fn is_server_selection_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::ServerSelection { .. })
    }

    pub(crate) fn is_incompatible_server(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::IncompatibleServer { .. })
    }

    /// Gets the code from this error for performing SDAM updates, if applicable.
    pub(crate) fn sdam_code(&self) -> Option<i32> {
        match self.kind.as_ref() {
            ErrorKind::Command(command_error) if command_error.code != 0 => {
                Some(command_error.code)
            }
            _ => None,
        }
        .or_else(|| self.source.as_ref().and_then(|s| s.sdam_code()))
    }

    /// Gets the server-reported code from this error, if any.
    pub fn code(&self) -> Option<i32> {
        self.sdam_code()
    }

    /// Gets the server-reported message for this error, if applicable.
    pub fn message(&self) -> Option<&str> {
        match self.kind.as_ref() {
            ErrorKind::Command(command_error) => Some(command_error.message.as_str()),
            _ => self.source.as_ref().and_then(|s| s.message()),
        }
    }

    fn message_contains(&self, needle: &str) -> bool {
        self.message().is_some_and(|m| m.contains(needle))
    }

    /// If this error corresponds to a "not writable primary" error. A recognised code always
    /// takes precedence over message matching, which only applies when the server sent no code.
    pub(crate) fn is_notwritableprimary(&self) -> bool {
        if self.is_recovering() {
            return false;
        }
        match self.sdam_code() {
            Some(code) => NOTWRITABLEPRIMARY_CODES.contains(&code),
            None => self.message_contains("not master"),
        }
    }

    /// If this error corresponds to a "node is recovering" error.
    pub(crate) fn is_recovering(&self) -> bool {
        match self.sdam_code() {
            Some(code) => RECOVERING_CODES.contains(&code),
            None => {
                self.message_contains("not master or secondary")
                    || self.message_contains("node is recovering")
            }
        }
    }

    /// If this error corresponds to a "node is shutting down" error.
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.sdam_code()
            .map(|code| SHUTTING_DOWN_CODES.contains(&code))
            .unwrap_or(false)
    }

    /// If a change stream may transparently re-establish its cursor after this error.
    pub(crate) fn is_resumable(&self) -> bool {
        self.is_network_error()
            || self.is_state_change_error()
            || self.message_contains("not master")
            || self.message_contains("node is recovering")
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        Self::new(err.into())
    }
}

impl From<crate::bson::de::Error> for ErrorKind {
    fn from(err: crate::bson::de::Error) -> Self {
        Self::BsonDeserialization(err)
    }
}

impl From<crate::bson::ser::Error> for ErrorKind {
    fn from(err: crate::bson::ser::Error) -> Self {
        Self::BsonSerialization(err)
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<std::io::ErrorKind> for ErrorKind {
    fn from(err: std::io::ErrorKind) -> Self {
        Self::Io(Arc::new(err.into()))
    }
}

/// The types of errors that can occur.
#[allow(missing_docs)]
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An invalid argument was provided.
    #[error("An invalid argument was provided: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// Wrapper around `bson::de::Error`.
    #[error("{0}")]
    BsonDeserialization(crate::bson::de::Error),

    /// Wrapper around `bson::ser::Error`.
    #[error("{0}")]
    BsonSerialization(crate::bson::ser::Error),

    /// The server returned an error to an attempted operation.
    #[error("Command failed: {0}")]
    Command(CommandError),

    /// A server's advertised wire version range does not overlap the range this crate supports.
    #[error("{message}")]
    #[non_exhaustive]
    IncompatibleServer { message: String },

    #[error("Internal error: {message}")]
    #[non_exhaustive]
    Internal { message: String },

    /// Wrapper around [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html).
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// A reply had a shape that could not be interpreted as a cursor.
    #[error("{message}")]
    #[non_exhaustive]
    InvalidCursor { message: String },

    /// The server returned an invalid reply to a database operation.
    #[error("The server returned an invalid reply to a database operation: {message}")]
    #[non_exhaustive]
    InvalidResponse { message: String },

    /// A change stream document did not carry the `_id` field needed to resume.
    #[error("Cannot provide resume functionality when the resume token is missing")]
    MissingResumeToken,

    /// No server satisfying the selection criteria could be found.
    #[error("{message}")]
    #[non_exhaustive]
    ServerSelection { message: String },

    /// A socket-level failure, including reads that returned fewer bytes than required.
    #[error("{message}")]
    #[non_exhaustive]
    Stream { message: String },
}

/// An error that occurred due to a database command failing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub struct CommandError {
    /// Identifies the type of error. Zero when the server did not send a code.
    #[serde(default)]
    pub code: i32,

    /// The name associated with the error code.
    #[serde(rename = "codeName", default)]
    pub code_name: String,

    /// A description of the error that occurred.
    #[serde(rename = "errmsg", default = "String::new")]
    pub message: String,
}

impl CommandError {
    pub(crate) fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            code_name: String::new(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "Error code {} ({}): {}",
            self.code, self.code_name, self.message
        )
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn command_error(code: i32, message: &str) -> Error {
        ErrorKind::Command(CommandError::new(code, message)).into()
    }

    #[test]
    fn not_master_code_wins_over_message() {
        let err = command_error(10107, "node is recovering");
        assert!(err.is_notwritableprimary());
        assert!(!err.is_recovering());
    }

    #[test]
    fn message_matching_only_without_code() {
        assert!(command_error(0, "not master").is_notwritableprimary());
        assert!(command_error(0, "node is recovering").is_recovering());
        assert!(command_error(0, "not master or secondary").is_recovering());
        assert!(!command_error(0, "not master or secondary").is_notwritableprimary());
        assert!(!command_error(2, "not master").is_notwritableprimary());
    }

    #[test]
    fn resumable_classification() {
        assert!(command_error(10107, "").is_resumable());
        assert!(command_error(91, "").is_resumable());
        assert!(command_error(0, "not master").is_resumable());
        assert!(Error::stream("socket closed").is_resumable());
        assert!(Error::network_timeout().is_resumable());
        assert!(!command_error(2, "bad value").is_resumable());
        assert!(!Error::new(ErrorKind::MissingResumeToken).is_resumable());
    }

    #[test]
    fn shutting_down() {
        assert!(command_error(91, "").is_shutting_down());
        assert!(!command_error(189, "").is_shutting_down());
    }

    #[test]
    fn command_error_display() {
        let mut err = CommandError::new(13435, "not master and secondaryOk=false");
        err.code_name = "NotPrimaryNoSecondaryOk".to_string();
        assert_eq!(
            Error::from(ErrorKind::Command(err)).to_string(),
            "Command failed: Error code 13435 (NotPrimaryNoSecondaryOk): not master and \
             secondaryOk=false"
        );
    }
}
