//! Output formatting: pretty JSON or a compact human-readable line.

use std::io::Write;

use serde_json::Value;

use crate::cli::Format;
use crate::error::CliError;

/// Renders a [`Value`] as either pretty JSON or a one-line summary.
#[derive(Debug, Clone, Copy)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Build a formatter for `format`.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Write `value` to `writer` in the selected format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write itself fails.
    pub fn write<W: Write>(&self, writer: &mut W, value: &Value) -> Result<(), CliError> {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value).map_err(|e| CliError::Format(e.to_string()))?;
                writeln!(writer)?;
            }
            Format::Text => {
                writeln!(writer, "{}", summarize(value))?;
            }
        }
        Ok(())
    }
}

fn summarize(value: &Value) -> String {
    match value {
        Value::Array(items) => items.iter().map(summarize).collect::<Vec<_>>().join("\n"),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}={}", compact(v)))
            .collect::<Vec<_>>()
            .join(" "),
        other => compact(other),
    }
}

fn compact(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_format_summarizes_an_object_as_key_value_pairs() {
        let format = OutputFormat::new(Format::Text);
        let mut buf = Vec::new();
        format.write(&mut buf, &json!({ "job_id": "abc", "status": "pending" })).unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert!(out.contains("job_id=abc"));
        assert!(out.contains("status=pending"));
    }

    #[test]
    fn json_format_pretty_prints() {
        let format = OutputFormat::new(Format::Json);
        let mut buf = Vec::new();
        format.write(&mut buf, &json!({ "a": 1 })).unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert!(out.contains('\n'));
    }
}
