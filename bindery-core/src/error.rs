use crate::Category;
use std::{borrow::Cow, io};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure surfaced by the binding layer.
///
/// Declaration problems are [`BindingError`]s and are raised when a slot is
/// created. Everything that goes wrong afterwards, while setting, executing,
/// fetching or reading values, is an [`ExecutionError`].
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl Error {
    pub fn is_binding(&self) -> bool {
        matches!(self, Error::Binding(..))
    }

    pub fn is_execution(&self) -> bool {
        matches!(self, Error::Execution(..))
    }

    /// The transform failure carried by this error, if any.
    pub fn transform_error(&self) -> Option<&anyhow::Error> {
        match self {
            Error::Execution(ExecutionError::Transform(e)) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        ExecutionError::Io(value).into()
    }
}

#[derive(Debug, Error)]
pub enum BindingError {
    /// The native link refused the key/category pair.
    #[error("Cannot bind `{key}` as {category}: {cause:#}")]
    Rejected {
        key: String,
        category: Category,
        cause: anyhow::Error,
    },
    #[error("Output columns are numbered from 1, got {0}")]
    InvalidIndex(usize),
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Type mismatch: expected a value of category {expected}, got `{actual}`")]
    TypeMismatch {
        expected: Category,
        actual: &'static str,
    },
    #[error("Type cast exception: cannot convert {value} into `{target}`")]
    Cast { value: String, target: &'static str },
    #[error("{0:#}")]
    Native(anyhow::Error),
    #[error("Transform failed: {0:#}")]
    Transform(anyhow::Error),
    #[error("Could not open the channel: {0:#}")]
    Channel(anyhow::Error),
    #[error("Object codec failed: {0:#}")]
    Codec(anyhow::Error),
    #[error("I/O failure: {0}")]
    Io(io::Error),
    #[error("Invalid state: {0}")]
    InvalidState(Cow<'static, str>),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("The {0} is closed")]
    Closed(&'static str),
    #[error("Another call is already in flight on this connection")]
    Busy,
    #[error("Background task did not complete: {0}")]
    Task(String),
}

impl ExecutionError {
    /// Wraps a failure reported by the native link and logs it.
    pub(crate) fn native(error: anyhow::Error) -> Error {
        let error = ExecutionError::Native(error);
        log::error!("{}", error);
        error.into()
    }

    pub(crate) fn invalid_state(message: impl Into<Cow<'static, str>>) -> Error {
        let error = ExecutionError::InvalidState(message.into());
        log::error!("{}", error);
        error.into()
    }
}
