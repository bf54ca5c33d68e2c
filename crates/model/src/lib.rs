//! An abstraction layer for the language model backing a conversation.
//!
//! This crate establishes the protocol between a session and an inference
//! backend: the messages it is given, the functions it may call, and the
//! events it streams back while generating. A backend may run locally or
//! remotely, the session doesn't care.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod message;
mod provider;
mod request;
mod response;

pub use error::*;
pub use message::*;
pub use provider::*;
pub use request::*;
pub use response::*;
