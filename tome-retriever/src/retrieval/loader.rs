//! Document loading.
//!
//! [`DocumentLoader`] is the seam for the raw-document collaborator: given a
//! validated path it yields the documents underneath it. The default
//! [`FsDocumentLoader`] reads plain-text files; per-format parsers (PDF,
//! DOCX, ...) plug in behind the same trait.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A loaded source document, before chunking.
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// Absolute path the content was read from.
    pub path: PathBuf,
    /// Document text.
    pub content: String,
}

/// Collaborator interface for turning a path into raw documents.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Load every document under `path`: the file itself, or for a
    /// directory, all supported files beneath it (recursively). A missing or
    /// unreadable path yields an empty list, not an error; whether the
    /// overall request found *any* documents is the caller's concern.
    async fn load(&self, path: &Path) -> anyhow::Result<Vec<RawDocument>>;
}

/// Default file-extension whitelist for directory traversal.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

/// Filesystem loader for plain-text documents.
///
/// Files named directly are always read as UTF-8 text regardless of
/// extension; directory walks only pick up files whose extension is in the
/// configured set.
#[derive(Debug, Clone)]
pub struct FsDocumentLoader {
    extensions: Vec<String>,
}

impl Default for FsDocumentLoader {
    fn default() -> Self {
        Self {
            extensions: SUPPORTED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl FsDocumentLoader {
    pub fn new(extensions: Vec<String>) -> Self {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    fn is_supported(&self, path: &Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }

    async fn read_file(&self, path: &Path) -> Option<RawDocument> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Some(RawDocument {
                path: path.to_path_buf(),
                content,
            }),
            Err(e) => {
                warn!("skipping unreadable file {}: {}", path.display(), e);
                None
            }
        }
    }
}

#[async_trait]
impl DocumentLoader for FsDocumentLoader {
    async fn load(&self, path: &Path) -> anyhow::Result<Vec<RawDocument>> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) => {
                warn!("document path {} does not exist: {}", path.display(), e);
                return Ok(Vec::new());
            }
        };

        let mut documents = Vec::new();

        if metadata.is_file() {
            documents.extend(self.read_file(path).await);
            return Ok(documents);
        }

        // Depth-first traversal with an explicit stack; unreadable
        // directories are logged and skipped so one bad entry cannot sink
        // the whole request.
        let mut dir_stack = vec![path.to_path_buf()];
        while let Some(current) = dir_stack.pop() {
            let mut read_dir = match tokio::fs::read_dir(&current).await {
                Ok(rd) => rd,
                Err(e) => {
                    warn!("failed to read directory {}: {}", current.display(), e);
                    continue;
                }
            };

            while let Some(entry) = read_dir.next_entry().await? {
                let entry_path = entry.path();
                let entry_type = match entry.file_type().await {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("failed to stat {}: {}", entry_path.display(), e);
                        continue;
                    }
                };

                if entry_type.is_dir() {
                    dir_stack.push(entry_path);
                } else if entry_type.is_file() && self.is_supported(&entry_path) {
                    documents.extend(self.read_file(&entry_path).await);
                }
            }
        }

        debug!(
            "loaded {} documents from {}",
            documents.len(),
            path.display()
        );
        Ok(documents)
    }
}
