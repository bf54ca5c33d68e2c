//! Core logic including the session loop, function execution, transcripts,
//! configurations, etc.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

pub mod config;
mod error;
pub mod executor;
pub mod function;
mod model_client;
pub mod prompt;
mod session;
pub mod transcript;

pub use config::SessionConfig;
pub use error::{Error, ModelError};
pub use executor::{
    FunctionCallDelegate, ParallelExecutor, SequentialExecutor,
    execute_parallel_function_calls,
};
pub use function::{Function, FunctionCall, FunctionReturn, FunctionThrow};
pub use prompt::{ContentError, Prompt};
pub use session::{
    AgentSession, AgentSessionBuilder, ResolvedCompletion, SessionStage,
    StreamAbortHandle, StreamHandle,
};
pub use transcript::{CompletionMetrics, EntryId, Transcript, TranscriptEntry};
