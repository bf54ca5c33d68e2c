use std::io;
use std::path::Path;

use converse_core::SessionConfig;
use converse_test_model::{PresetResponse, TestModelProvider};
use serde::{Deserialize, Serialize};

/// Why a script couldn't be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// The script file can't be read.
    #[error("cannot read script: {0}")]
    Io(#[from] io::Error),
    /// The script isn't valid.
    #[error("invalid script: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A scripted conversation: the session configuration and the responses
/// the model gives, one per request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    /// Configuration of the session.
    #[serde(default)]
    pub config: SessionConfig,
    /// Responses of the model, in request order.
    pub responses: Vec<PresetResponse>,
}

impl Script {
    /// Loads a JSON script from `path`.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScriptError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let script: Script = serde_json::from_slice(&bytes)?;
        debug!(
            "loaded {} responses from {}",
            script.responses.len(),
            path.display()
        );
        Ok(script)
    }

    /// Splits the script into a model that replays the responses and the
    /// session configuration.
    pub fn into_parts(self) -> (TestModelProvider, SessionConfig) {
        (TestModelProvider::with_responses(self.responses), self.config)
    }
}
