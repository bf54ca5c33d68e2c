use std::error::Error as StdError;
use std::fmt::{self, Debug, Display};

use converse_model::{ErrorKind, ModelProviderError};

use crate::executor::ExecutionError;
use crate::function::{AggregatedFunctionCallError, FunctionThrow};
use crate::prompt::ContentError;

/// The error type for session operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Another response is in flight.
    #[error("the session is already responding")]
    AlreadyResponding,
    /// The user prompt couldn't be resolved.
    #[error("invalid user content: {0}")]
    InvalidUserContent(#[source] ContentError),
    /// The system prompt couldn't be resolved.
    #[error("invalid system content: {0}")]
    InvalidSystemContent(#[source] ContentError),
    /// One or more function calls failed.
    #[error(transparent)]
    AggregatedFunctionCalls(#[from] AggregatedFunctionCallError),
    /// A function call failed, reported by a delegate that stops at the
    /// first failure.
    #[error(transparent)]
    FunctionCall(#[from] FunctionThrow),
    /// The model asked for a function that isn't registered.
    #[error("the model called an unknown function `{0}`")]
    UnknownFunction(String),
    /// The model kept asking for function calls.
    #[error("function calls didn't settle after {0} iterations")]
    FunctionCallLimitExceeded(usize),
    /// The response was stopped, reset or dropped.
    #[error("the response was cancelled")]
    Cancelled,
    /// The model backend failed.
    #[error(transparent)]
    Model(ModelError),
}

impl Error {
    /// Returns `true` if this is a cancellation.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<ExecutionError> for Error {
    fn from(value: ExecutionError) -> Self {
        match value {
            ExecutionError::Aggregated(err) => Error::AggregatedFunctionCalls(err),
            ExecutionError::Function(err) => Error::FunctionCall(err),
            ExecutionError::Cancelled => Error::Cancelled,
        }
    }
}

/// An error from the model backend, exactly as the backend reported it.
pub struct ModelError(Box<dyn ModelProviderError>);

impl ModelError {
    #[inline]
    pub(crate) fn new(inner: Box<dyn ModelProviderError>) -> Self {
        Self(inner)
    }

    /// Returns the kind reported by the backend.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.0.kind()
    }

    /// Returns the backend error.
    #[inline]
    pub fn get_ref(&self) -> &dyn ModelProviderError {
        &*self.0
    }

    /// Takes the backend error out.
    #[inline]
    pub fn into_inner(self) -> Box<dyn ModelProviderError> {
        self.0
    }
}

impl Debug for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&*self.0, f)
    }
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&*self.0, f)
    }
}

impl StdError for ModelError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}
