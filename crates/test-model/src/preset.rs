use converse_model::FunctionCallRequest;
use serde::{Deserialize, Serialize};

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "token")]
    Token(String),
    #[serde(rename = "function_call")]
    FunctionCall(FunctionCallRequest),
}

/// The preset response for one request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, the request will fail in the first `failures` attempts.
    /// `Some(0)` means the request will fail infinitely.
    #[serde(default)]
    pub failures: Option<u64>,
    /// Overrides the provider's delay between events, in milliseconds.
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            failures: None,
            delay_ms: None,
        }
    }

    /// Creates a text-only response, splitting `text` into word tokens.
    pub fn with_text(text: &str) -> Self {
        let mut events = vec![];
        let mut words = text.split(' ').peekable();
        while let Some(word) = words.next() {
            let mut token = word.to_owned();
            if words.peek().is_some() {
                token.push(' ');
            }
            events.push(PresetEvent::Token(token));
        }
        Self::with_events(events)
    }

    /// Sets failure times before a successful response. `0` means the
    /// response will always be a failure.
    #[inline]
    pub fn with_failures(mut self, failures: u64) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Sets the delay between events of this response.
    #[inline]
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    #[inline]
    pub(crate) fn has_function_call(&self) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event, PresetEvent::FunctionCall(_)))
    }
}

/// Builds a function call event with the arguments of a JSON object.
///
/// # Panics
///
/// Panics if `arguments` is not a JSON object.
pub fn function_call(
    id: &str,
    name: &str,
    arguments: serde_json::Value,
) -> PresetEvent {
    let serde_json::Value::Object(arguments) = arguments else {
        panic!("function call arguments must be an object");
    };
    PresetEvent::FunctionCall(FunctionCallRequest {
        id: id.to_owned(),
        name: name.to_owned(),
        arguments,
    })
}
