use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Message;

/// A request to be sent to the model provider.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelRequest {
    /// The input messages, in conversation order.
    pub messages: Vec<Message>,
    /// Functions that are available to the model.
    pub functions: Vec<FunctionDefinition>,
    /// Sampling options for this request.
    pub options: CompletionOptions,
}

/// Options that tune a single completion.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionOptions {
    /// Forces the model to call at least one function, only meaningful
    /// when `functions` is not empty.
    pub force_functions: bool,
    /// The maximum number of tokens to generate.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Sequences that end the generation when produced.
    pub stop_sequences: Vec<String>,
}

/// Describes a function that can be called by the model.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Name of the function.
    pub name: String,
    /// Description of the function.
    pub description: String,
    /// Parameters definition of the function.
    ///
    /// For most model backends, the parameters should typically be
    /// defined by a [JSON schema](https://json-schema.org/).
    pub parameters: Value,
}
