use std::error::Error;

use crate::error::ErrorKind;
use crate::request::ModelRequest;
use crate::response::ModelResponse;

/// The error type for a model provider.
pub trait ModelProviderError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;
}

/// A type that represents a model backend, which is an entry for sampling
/// requests and controlling the generation.
///
/// Callers may hold the provider for the whole lifetime of a session, and
/// call [`stop`](Self::stop) from a different task than the one driving
/// the response.
pub trait ModelProvider: Send + Sync {
    /// The error type that may be returned by the provider.
    type Error: ModelProviderError;

    /// The response type for this provider.
    type Response: ModelResponse<Error = Self::Error>;

    /// Sends a request to the model.
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;

    /// Halts any in-flight generation as soon as possible.
    ///
    /// This is best-effort: responses that are still polled should finish
    /// shortly after, either normally or with an error.
    fn stop(&self) {}

    /// Clears any context the backend keeps between requests.
    fn reset(&self) {}
}
