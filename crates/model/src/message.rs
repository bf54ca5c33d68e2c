use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::response::FunctionCallRequest;

/// The author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Instructions that steer the model.
    System,
    /// The human side of the conversation.
    User,
    /// The model itself.
    Assistant,
    /// The output of a function the model asked for.
    Tool,
}

/// An image attached to a message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImagePart {
    path: PathBuf,
}

impl ImagePart {
    /// Creates an image part that refers to the file at `path`.
    ///
    /// Backends expect the path to point at a readable file, callers
    /// should check it before building the message.
    #[inline]
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Returns the path to the image file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A piece of message content.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text(String),
    /// An image.
    Image(ImagePart),
}

/// A complete message in the conversation.
///
/// Messages can't be modified once constructed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    function_calls: Vec<FunctionCallRequest>,
}

impl Message {
    /// Creates a system message.
    #[inline]
    pub fn system(content: Vec<ContentPart>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Creates a user message.
    #[inline]
    pub fn user(content: Vec<ContentPart>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Creates an assistant message with the function calls it requested.
    #[inline]
    pub fn assistant<S: Into<String>>(
        text: S,
        function_calls: Vec<FunctionCallRequest>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: text_content(text.into()),
            tool_name: None,
            function_calls,
        }
    }

    /// Creates a message that carries the output of the function `name`.
    #[inline]
    pub fn tool<N: Into<String>, S: Into<String>>(name: N, output: S) -> Self {
        Self {
            role: Role::Tool,
            content: text_content(output.into()),
            tool_name: Some(name.into()),
            function_calls: vec![],
        }
    }

    fn with_role(role: Role, content: Vec<ContentPart>) -> Self {
        Self {
            role,
            content,
            tool_name: None,
            function_calls: vec![],
        }
    }

    /// Returns the author of this message.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the content parts of this message.
    #[inline]
    pub fn content(&self) -> &[ContentPart] {
        &self.content
    }

    /// Returns the name of the function that produced this message, only
    /// tool messages have one.
    #[inline]
    pub fn tool_name(&self) -> Option<&str> {
        self.tool_name.as_deref()
    }

    /// Returns the function calls requested by this message.
    #[inline]
    pub fn function_calls(&self) -> &[FunctionCallRequest] {
        &self.function_calls
    }

    /// Concatenates all text parts of this message.
    pub fn text(&self) -> String {
        let mut text = String::new();
        for part in &self.content {
            if let ContentPart::Text(part) = part {
                text.push_str(part);
            }
        }
        text
    }
}

fn text_content(text: String) -> Vec<ContentPart> {
    if text.is_empty() {
        vec![]
    } else {
        vec![ContentPart::Text(text)]
    }
}

impl From<&str> for ContentPart {
    #[inline]
    fn from(value: &str) -> Self {
        ContentPart::Text(value.to_owned())
    }
}

impl From<String> for ContentPart {
    #[inline]
    fn from(value: String) -> Self {
        ContentPart::Text(value)
    }
}
