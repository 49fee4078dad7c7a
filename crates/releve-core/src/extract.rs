//! Document-to-text extraction
//!
//! The conversion itself is delegated to an external utility. Its contract:
//! given a document path, produce UTF-8 text that keeps the page layout (column
//! alignment) with pages separated by form feeds.

use std::fs;
use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::config::ScanConfig;
use crate::error::{Error, Result};

/// Turns a statement document into layout-preserving text
pub trait TextExtractor: Send + Sync {
    /// Extract the full text of the document at `path`
    fn extract(&self, path: &Path) -> Result<String>;
}

/// Runs an external command that writes the extracted text to a file
///
/// Invocation: `<program> <args...> <output file> <document>`.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
}

impl CommandExtractor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(&config.extractor_program, config.extractor_args.clone())
    }
}

impl TextExtractor for CommandExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        let dir = tempfile::tempdir()?;
        let output_path = dir.path().join("extracted.txt");

        debug!("Extracting text from {}", path.display());
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&output_path)
            .arg(path)
            .output()
            .map_err(|e| Error::Extraction(format!("Failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(Error::Extraction(format!(
                "{} exited with {} on {}: {}",
                self.program,
                output.status,
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = fs::read_to_string(&output_path).map_err(|e| {
            Error::Extraction(format!("No usable text for {}: {}", path.display(), e))
        })?;

        Ok(text.trim_end().to_string())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> CommandExtractor {
        // `sh -c script out doc` binds $0 = output file, $1 = document
        CommandExtractor::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[test]
    fn test_command_output_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("statement.pdf");
        fs::write(&doc, "page one\x0cpage two\n\n  \n").unwrap();

        let text = shell(r#"cat "$1" > "$0""#).extract(&doc).unwrap();
        assert_eq!(text, "page one\x0cpage two");
    }

    #[test]
    fn test_failing_command() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("statement.pdf");
        fs::write(&doc, "x").unwrap();

        let err = shell("echo broken >&2; exit 3").extract(&doc).unwrap_err();
        match err {
            Error::Extraction(msg) => assert!(msg.contains("broken")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_program() {
        let extractor = CommandExtractor::new("releve-no-such-program", vec![]);
        let err = extractor.extract(Path::new("/nonexistent.pdf")).unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[test]
    fn test_command_without_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("statement.pdf");
        fs::write(&doc, "x").unwrap();

        let err = shell("true").extract(&doc).unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }
}
