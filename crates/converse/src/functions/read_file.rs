use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use converse_core::function::{Error as FunctionError, Function};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use tokio::task::spawn_blocking;

const MAX_LINES: usize = 50;

#[derive(Deserialize, JsonSchema)]
pub struct ReadFileItem {
    #[schemars(description = "Absolute path to the file.")]
    path: String,
    #[schemars(description = "1-based start line to read from, default to 1.")]
    start_line: Option<usize>,
}

#[derive(Deserialize, JsonSchema)]
pub struct ReadFileParameters {
    #[schemars(description = "Files to read.")]
    files: Vec<ReadFileItem>,
}

/// A function for reading file content with line numbers.
pub struct ReadFileFunction {
    parameter_schema: Value,
}

impl ReadFileFunction {
    /// Creates a new read file function.
    #[inline]
    pub fn new() -> Self {
        ReadFileFunction {
            parameter_schema: schema_for!(ReadFileParameters).to_value(),
        }
    }
}

impl Default for ReadFileFunction {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Function for ReadFileFunction {
    type Input = ReadFileParameters;
    type Output = String;

    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        r#"
Reads files from absolute paths and returns their contents prefixed with line numbers.
Each file includes a path and a 1-based start line, and returns up to 50 lines."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: ReadFileParameters,
    ) -> impl Future<Output = Result<String, FunctionError>> + Send + 'static
    {
        async move {
            let mut result = String::new();
            for file in input.files {
                if !Path::new(&file.path).is_absolute() {
                    return Err(FunctionError::invalid_arguments()
                        .with_reason("`path` must be absolute"));
                }
                let start_line = file.start_line.unwrap_or(1);
                if start_line == 0 {
                    return Err(FunctionError::invalid_arguments()
                        .with_reason("`start_line` must be 1-based"));
                }

                debug!("reading {} from line {start_line}", file.path);
                let section = spawn_blocking(move || {
                    read_file_section(&file.path, start_line)
                })
                .await
                .map_err(|_| {
                    FunctionError::execution_error()
                        .with_reason("Failed to read file")
                })??;

                if !result.is_empty() {
                    result.push('\n');
                }
                result.push_str(&section);
            }
            Ok(result)
        }
    }
}

fn read_file_section(
    path: &str,
    start_line: usize,
) -> Result<String, FunctionError> {
    let file = File::open(path).map_err(|err| {
        FunctionError::execution_error().with_reason(err.to_string())
    })?;
    format_reader_section(path, file, start_line)
}

fn format_reader_section<R: Read>(
    path: &str,
    reader: R,
    start_line: usize,
) -> Result<String, FunctionError> {
    let lines = BufReader::new(reader)
        .lines()
        .skip(start_line.saturating_sub(1))
        .take(MAX_LINES)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            FunctionError::execution_error().with_reason(err.to_string())
        })?;

    let mut result = format!("==> {path} <==\n");
    let last_line_no = start_line + lines.len().saturating_sub(1);
    let width = last_line_no.to_string().len();
    for (offset, line) in lines.into_iter().enumerate() {
        let line_no = start_line + offset;
        result.push_str(&format!("{line_no:>width$}: {line}\n"));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_read_file_section_formats_lines() {
        let input = b"first\nsecond\nthird\n";

        let output =
            format_reader_section("/fake/path", Cursor::new(input), 2).unwrap();
        let mut output_lines = output.lines();

        assert_eq!(output_lines.next().unwrap(), "==> /fake/path <==");
        assert_eq!(output_lines.next().unwrap(), "2: second");
        assert_eq!(output_lines.next().unwrap(), "3: third");
        assert!(output_lines.next().is_none());
    }

    #[test]
    fn test_read_file_section_respects_limit() {
        let input = "line\n".repeat(MAX_LINES + 10);

        let output =
            format_reader_section("/fake/path", Cursor::new(input), 1).unwrap();
        let lines = output.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), MAX_LINES + 1);
        assert_eq!(lines[1], " 1: line");
    }

    #[tokio::test]
    async fn test_relative_path_is_rejected() {
        let function = ReadFileFunction::new();
        let err = function
            .execute(ReadFileParameters {
                files: vec![ReadFileItem {
                    path: "relative.txt".to_owned(),
                    start_line: None,
                }],
            })
            .await
            .unwrap_err();
        assert_eq!(
            err.kind(),
            converse_core::function::ErrorKind::InvalidArguments
        );
    }
}
