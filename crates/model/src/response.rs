use std::pin::Pin;
use std::task::{self, Poll};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::provider::ModelProviderError;

/// A response from the model provider.
pub trait ModelResponse: Sized + Send + 'static {
    /// The error type that may be returned by the provider.
    type Error: ModelProviderError;

    /// Attempts to pull out the next event from the response.
    ///
    /// # Return value
    ///
    /// There are several possible return values, each indicating a
    /// distinct response state:
    ///
    /// - `Poll::Pending` means that this response is still waiting for
    ///   the next event. Implementations will ensure that the current
    ///   task will be notified when the next event may be ready.
    /// - `Poll::Ready(Ok(Some(event)))` means the response has an event
    ///   to deliver, and may produce further events on subsequent
    ///   `poll_next_event` calls.
    /// - `Poll::Ready(Ok(None))` means the response has completed.
    /// - `Poll::Ready(Err(error))` means an error occurred while
    ///   processing the response.
    ///
    /// Calling this method after completion should always return `None`.
    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>>;

    /// Returns what the backend knows about this generation.
    ///
    /// Call it after polling all events, values reported earlier may be
    /// incomplete.
    fn stats(&self) -> ResponseStats {
        ResponseStats::default()
    }
}

/// Statistics a backend may report for a finished response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseStats {
    /// Number of generated tokens, if the backend counts them.
    pub generated_tokens: Option<u64>,
    /// The model's confidence in the response, in `0.0..=1.0`.
    pub confidence: Option<f64>,
}

/// The reason why a model response has finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFinishReason {
    /// The model needs to call functions.
    FunctionCalls,
    /// The model has finished generating text.
    Stop,
    /// The generation hit the token limit.
    Length,
}

/// Describes a function call request from the model.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionCallRequest {
    /// The unique identifier for the function call request.
    pub id: String,
    /// The name of the function to call.
    pub name: String,
    /// The arguments to pass to the function.
    pub arguments: Map<String, Value>,
}

/// The event from a model response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelResponseEvent {
    /// The response has been completed.
    Completed(ModelFinishReason),
    /// Received a generated token.
    TokenDelta(String),
    /// Received a function call request.
    FunctionCall(FunctionCallRequest),
}
