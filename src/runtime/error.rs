//! Error types crossing the op boundary.

use super::op_driver::PromiseId;
use std::fmt;
use std::panic::Location;
use thiserror::Error;

/// A native-looking script error.
///
/// This is what a script observes when an op rejects: the host's tagged
/// failure rebuilt through the error class registry, or a setup error raised
/// synchronously by the host. `location` points at the script call site that
/// issued the op; bridge frames are never recorded.
#[derive(Error, Clone, PartialEq, Eq)]
#[error("{name}: {message}")]
pub struct JsError {
    /// Error class name, e.g. `TypeError` or `NotFound`
    pub name: String,
    pub message: String,
    /// OS-style error code, e.g. `ENOENT`
    pub code: Option<String>,
    pub location: Option<&'static Location<'static>>,
}

impl JsError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            code: None,
            location: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new("Error", message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        Self::new("RangeError", message)
    }

    /// Raised by resource-backed ops when a resource id is stale or closed.
    pub fn bad_resource(message: impl Into<String>) -> Self {
        Self::new("BadResource", message)
    }

    /// Raised when a pending op is abandoned before it settles.
    pub fn interrupted(message: impl Into<String>) -> Self {
        Self::new("Interrupted", message)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_location(mut self, location: &'static Location<'static>) -> Self {
        self.location = Some(location);
        self
    }
}

impl fmt::Debug for JsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)?;
        if let Some(code) = &self.code {
            write!(f, " [{code}]")?;
        }
        if let Some(location) = self.location {
            write!(f, "\n    at {location}")?;
        }
        Ok(())
    }
}

/// Errors raised by the bridge itself.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The host refused an op before any remote work started.
    #[error(transparent)]
    Setup(#[from] JsError),

    /// A second builder was registered for an existing error class.
    #[error("Error class for \"{0}\" already registered")]
    ErrorClassAlreadyRegistered(String),

    /// The host delivered a completion for an id that is not pending.
    #[error("Protocol violation: no pending op for promise id {0}")]
    UnknownPromiseId(PromiseId),

    /// The host's flat completion list could not be decoded.
    #[error("Protocol violation: malformed completions: {0}")]
    MalformedCompletions(String),

    /// A microtask failed and no exception reporter was installed.
    #[error("Uncaught {0}")]
    UncaughtException(JsError),

    #[error("Op '{0}' is already registered")]
    OpAlreadyRegistered(String),

    #[error("Promise id space exhausted")]
    PromiseIdsExhausted,

    #[error("Invalid bridge configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
