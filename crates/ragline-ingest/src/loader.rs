use std::fs;
use std::path::{Path, PathBuf};

use ragline_core::{IngestError, Metadata};
use serde_json::Value;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Rough page estimate for plain text.
const CHARS_PER_PAGE: usize = 3000;

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDocument {
    pub content: String,
    /// `filename`, `file_type` and `encoding`.
    pub metadata: Metadata,
    pub file_type: String,
    pub file_size: u64,
    pub num_pages: usize,
}

#[derive(Debug, Clone)]
pub struct DocumentLoader {
    max_file_size: u64,
}

impl Default for DocumentLoader {
    fn default() -> Self {
        Self { max_file_size: DEFAULT_MAX_FILE_SIZE }
    }
}

impl DocumentLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn supports_format(&self, extension: &str) -> bool {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        SUPPORTED_EXTENSIONS.contains(&ext.as_str())
    }

    pub fn load(&self, path: &Path) -> Result<LoadedDocument, IngestError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !self.supports_format(&extension) {
            return Err(IngestError::UnsupportedFormat {
                extension,
                supported: SUPPORTED_EXTENSIONS.join(", "),
            });
        }

        let file_size = fs::metadata(path)?.len();
        if file_size > self.max_file_size {
            return Err(IngestError::FileTooLarge { size: file_size, max: self.max_file_size });
        }

        let bytes = fs::read(path)?;
        let (content, encoding) = decode_text(bytes);

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| IngestError::Parsing(format!("no file name in {}", path.display())))?;
        let file_type = if extension == "txt" { "txt" } else { "markdown" }.to_string();

        let mut metadata = Metadata::new();
        metadata.insert("filename".into(), Value::String(filename));
        metadata.insert("file_type".into(), Value::String(file_type.clone()));
        metadata.insert("encoding".into(), Value::String(encoding.into()));

        tracing::info!(
            path = %path.display(),
            content_len = content.len(),
            encoding,
            "document loaded"
        );

        let num_pages = (content.chars().count() / CHARS_PER_PAGE).max(1);
        Ok(LoadedDocument { content, metadata, file_type, file_size, num_pages })
    }

    /// Supported files under `root`, sorted by path.
    pub fn collect_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|p| {
                p.extension().and_then(|s| s.to_str()).is_some_and(|e| self.supports_format(e))
            })
            .collect();
        files.sort();
        files
    }
}

/// UTF-8 first, Latin-1 otherwise (every byte sequence is valid Latin-1).
fn decode_text(bytes: Vec<u8>) -> (String, &'static str) {
    match String::from_utf8(bytes) {
        Ok(s) => (s, "utf-8"),
        Err(e) => {
            let latin1 = e.into_bytes().into_iter().map(char::from).collect();
            (latin1, "latin-1")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_utf8_falls_back_to_latin1() {
        let (text, encoding) = decode_text(vec![b'c', b'a', b'f', 0xE9]);
        assert_eq!(text, "café");
        assert_eq!(encoding, "latin-1");
    }

    #[test]
    fn extension_matching_ignores_case_and_dot() {
        let loader = DocumentLoader::new();
        assert!(loader.supports_format(".MD"));
        assert!(loader.supports_format("markdown"));
        assert!(!loader.supports_format("pdf"));
    }
}
