//! A set of built-in functions that models can call.

mod glob;
mod read_file;

pub use glob::GlobFunction;
pub use read_file::ReadFileFunction;
