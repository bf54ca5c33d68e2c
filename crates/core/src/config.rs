//! Session configuration.

use converse_model::CompletionOptions;
use serde::{Deserialize, Serialize};

/// Tunes how a session drives the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How many rounds of function calls a single turn may run before it
    /// fails with [`Error::FunctionCallLimitExceeded`](crate::Error).
    pub max_function_call_iterations: usize,
    /// Number of tokens buffered for a stream before generation waits for
    /// the consumer.
    pub stream_buffer: usize,
    /// Options sent with every completion. `force_functions` only applies
    /// to the first completion of a turn.
    pub options: CompletionOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_function_call_iterations: 8,
            stream_buffer: 64,
            options: CompletionOptions::default(),
        }
    }
}
