//! An out-of-the-box conversation session that assembles built-in functions
//! and model providers.
//!
//! The crate includes a CLI tool that replays a scripted model in the
//! terminal. And you can also use it as a library to bring tool-augmented
//! conversations into your own host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod functions;
mod script;
mod session;

pub use script::{Script, ScriptError};
pub use session::SessionBuilder;

/// Re-exports of [`converse_core`] crate.
pub mod core {
    pub use converse_core::*;
}
