use std::path::Path;

use converse_core::function::{Error as FunctionError, Function};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use tokio::task::spawn_blocking;

const MAX_MATCHES: usize = 50;

#[derive(Deserialize, JsonSchema)]
pub struct GlobParameters {
    #[schemars(description = "The glob pattern, must be relative to `path`.")]
    pattern: String,
    #[schemars(description = "Absolute path to search in.")]
    path: String,
}

/// A function for finding files using glob patterns.
///
/// Returns at most 50 matching paths.
pub struct GlobFunction {
    parameter_schema: Value,
}

impl GlobFunction {
    /// Creates a new glob function.
    #[inline]
    pub fn new() -> Self {
        GlobFunction {
            parameter_schema: schema_for!(GlobParameters).to_value(),
        }
    }
}

impl Default for GlobFunction {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Function for GlobFunction {
    type Input = GlobParameters;
    type Output = Vec<String>;

    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        r#"
Find files and directories using glob patterns.
This function supports standard glob syntax like *, ?, and ** for recursive searches."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: GlobParameters,
    ) -> impl Future<Output = Result<Vec<String>, FunctionError>> + Send + 'static
    {
        async move {
            if Path::new(&input.pattern).is_absolute() {
                return Err(FunctionError::invalid_arguments()
                    .with_reason("`pattern` must be relative to `path`"));
            }
            if !Path::new(&input.path).is_absolute() {
                return Err(FunctionError::invalid_arguments()
                    .with_reason("`path` must be absolute"));
            }

            let mut pattern = input.path;
            if !pattern.ends_with('/') {
                pattern.push('/');
            }
            pattern.push_str(&input.pattern);
            let paths = glob::glob(&pattern).map_err(|err| {
                FunctionError::invalid_arguments().with_reason(err.to_string())
            })?;

            debug!("searching {pattern}");
            spawn_blocking(move || {
                paths
                    .flatten()
                    .take(MAX_MATCHES)
                    .map(|path| path.to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
            })
            .await
            .map_err(|_| {
                FunctionError::execution_error()
                    .with_reason("Failed to execute glob")
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use converse_core::function::ErrorKind;

    use super::*;

    #[tokio::test]
    async fn test_input_validation() {
        let function = GlobFunction::new();

        let err = function
            .execute(GlobParameters {
                pattern: "*.rs".to_owned(),
                path: "some/relative/path".to_owned(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);

        let err = function
            .execute(GlobParameters {
                pattern: "/*.*".to_owned(),
                path: "/some/absolute/path".to_owned(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);

        let matches = function
            .execute(GlobParameters {
                pattern: "*".to_owned(),
                path: "/".to_owned(),
            })
            .await
            .unwrap();
        assert!(!matches.is_empty());
        assert!(matches.len() <= MAX_MATCHES);
    }

    #[tokio::test]
    async fn test_finds_created_file() {
        let dir = env::temp_dir().join("converse-glob-test");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("notes.md"), b"# notes").await.unwrap();

        let matches = GlobFunction::new()
            .execute(GlobParameters {
                pattern: "*.md".to_owned(),
                path: dir.to_string_lossy().into_owned(),
            })
            .await;
        tokio::fs::remove_dir_all(&dir).await.ok();

        let matches = matches.unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches[0].ends_with("notes.md"));
    }
}
