//! Content supplied by the caller, before it becomes a message.

use std::io;
use std::path::{Path, PathBuf};

use converse_model::{ContentPart, ImagePart};

/// Why a prompt couldn't be turned into message content.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    /// The prompt has neither text nor attachments.
    #[error("the content is empty")]
    Empty,
    /// An attached image can't be accessed.
    #[error("cannot load image `{}`: {source}", .path.display())]
    ImageUnavailable {
        /// Path of the image.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// An attached image path isn't a regular file.
    #[error("`{}` is not a file", .path.display())]
    NotAFile {
        /// Path of the image.
        path: PathBuf,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum PromptPart {
    Text(String),
    Image(PathBuf),
}

/// Text and attachments that form a user or system message.
///
/// Attachments are only checked when the prompt is resolved, so building
/// a prompt never fails.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Prompt {
    parts: Vec<PromptPart>,
}

impl Prompt {
    /// Creates an empty prompt.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends text.
    #[inline]
    pub fn with_text<S: Into<String>>(mut self, text: S) -> Self {
        self.parts.push(PromptPart::Text(text.into()));
        self
    }

    /// Attaches the image file at `path`.
    #[inline]
    pub fn with_image<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.parts.push(PromptPart::Image(path.into()));
        self
    }

    /// Returns `true` if the prompt has no text or attachments.
    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|part| match part {
            PromptPart::Text(text) => text.is_empty(),
            PromptPart::Image(_) => false,
        })
    }

    /// Resolves the prompt into message content.
    ///
    /// Every attached image must exist and be a regular file, its path is
    /// canonicalized so the backend doesn't depend on the working directory.
    pub async fn resolve(&self) -> Result<Vec<ContentPart>, ContentError> {
        if self.is_empty() {
            return Err(ContentError::Empty);
        }

        let mut content = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            match part {
                PromptPart::Text(text) if text.is_empty() => {}
                PromptPart::Text(text) => {
                    content.push(ContentPart::Text(text.clone()));
                }
                PromptPart::Image(path) => {
                    content.push(ContentPart::Image(resolve_image(path).await?));
                }
            }
        }
        Ok(content)
    }
}

async fn resolve_image(path: &Path) -> Result<ImagePart, ContentError> {
    let unavailable = |source: io::Error| ContentError::ImageUnavailable {
        path: path.to_path_buf(),
        source,
    };
    let metadata = tokio::fs::metadata(path).await.map_err(unavailable)?;
    if !metadata.is_file() {
        return Err(ContentError::NotAFile {
            path: path.to_path_buf(),
        });
    }
    let canonical = tokio::fs::canonicalize(path).await.map_err(unavailable)?;
    Ok(ImagePart::new(canonical))
}

impl From<&str> for Prompt {
    #[inline]
    fn from(value: &str) -> Self {
        Prompt::new().with_text(value)
    }
}

impl From<String> for Prompt {
    #[inline]
    fn from(value: String) -> Self {
        Prompt::new().with_text(value)
    }
}

impl From<&String> for Prompt {
    #[inline]
    fn from(value: &String) -> Self {
        Prompt::new().with_text(value.as_str())
    }
}
