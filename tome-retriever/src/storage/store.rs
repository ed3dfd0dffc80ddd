//! Persistent index store.
//!
//! Layout: one directory per cache key under the store root, named from the
//! sanitized key plus a blake3 fingerprint (so distinct keys can never
//! collide after sanitization):
//!
//! ```text
//! <root>/
//!   docs_a.txt_docs_b.txt-3f2a9c1d/
//!     metadata.json     -- StoreMetadata record
//!     chunks.json       -- [IndexedChunk]
//!     embeddings.bin    -- raw little-endian f16 block, row-major
//! ```
//!
//! Writers stage a complete entry in a hidden temp directory inside the root
//! and rename it into place, so a crash or concurrent reader never observes
//! a partially written entry. Overwrites (force rebuild) swap directories:
//! the old entry is renamed aside, the new one renamed in, the old one
//! deleted. Hidden `.tmp-*` / `.old-*` residue from a crash is ignored by
//! enumeration.

use crate::error::{RetrieveError, Result};
use crate::retrieval::vector_index::{IndexedChunk, VectorIndex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Version tag of the on-disk entry format. Entries written under another
/// version are rejected as corrupt rather than misread.
pub const STORE_FORMAT_VERSION: u32 = 1;

const METADATA_FILE: &str = "metadata.json";
const CHUNKS_FILE: &str = "chunks.json";
const EMBEDDINGS_FILE: &str = "embeddings.bin";

/// Metadata record stored next to each persisted index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    /// On-disk format version ([`STORE_FORMAT_VERSION`]).
    #[serde(default)]
    pub format_version: u32,
    /// Canonical (root-relative, sorted) document path set.
    pub document_path: Vec<String>,
    /// Number of source documents the index was built from.
    pub document_count: usize,
    /// Number of chunks in the index.
    pub chunk_count: usize,
    /// When the index was built.
    pub created_at: DateTime<Utc>,
    /// Identity of the embedding model the index was built under.
    pub embedding_model: String,
    /// Embedding dimension, needed to decode the embedding block.
    pub dimension: usize,
}

/// A persisted entry as reported by [`PersistentStore::list`].
#[derive(Debug, Clone, Serialize)]
pub struct PersistedEntry {
    /// Directory name of the entry.
    pub name: String,
    /// Absolute path of the entry directory.
    pub path: PathBuf,
    pub metadata: StoreMetadata,
}

/// Disk tier of the index cache.
#[derive(Debug, Clone)]
pub struct PersistentStore {
    root: PathBuf,
}

impl PersistentStore {
    /// Open (creating if necessary) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| RetrieveError::store_io(root.display().to_string(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory name for a cache key: the key with path-hostile characters
    /// replaced, plus a short blake3 fingerprint of the exact key.
    pub fn entry_name(key: &str) -> String {
        let sanitized: String = key
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
                _ => '_',
            })
            .collect();
        // Keep names readable even for large path sets.
        let head: String = sanitized.chars().take(80).collect();
        let fingerprint = blake3::hash(key.as_bytes());
        format!("{head}-{}", &hex::encode(fingerprint.as_bytes())[..8])
    }

    /// Absolute directory path for a cache key's entry.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(Self::entry_name(key))
    }

    /// Whether a persisted entry exists for the key.
    pub async fn exists(&self, key: &str) -> bool {
        tokio::fs::try_exists(self.entry_path(key).join(METADATA_FILE))
            .await
            .unwrap_or(false)
    }

    /// Atomically persist an index and its metadata, replacing any existing
    /// entry for the key.
    pub async fn save(
        &self,
        key: &str,
        index: &VectorIndex,
        metadata: &StoreMetadata,
    ) -> Result<PathBuf> {
        let io = |e: &dyn std::fmt::Display| RetrieveError::store_io(key, e);

        // Stage the complete entry in a hidden directory inside the root so
        // the final rename stays on one filesystem.
        let staging = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempdir_in(&self.root)
            .map_err(|e| io(&e))?
            .keep();

        let metadata_json = serde_json::to_vec_pretty(metadata).map_err(|e| io(&e))?;
        let chunks_json = serde_json::to_vec(index.chunks()).map_err(|e| io(&e))?;

        let write_result: std::io::Result<()> = async {
            tokio::fs::write(staging.join(METADATA_FILE), &metadata_json).await?;
            tokio::fs::write(staging.join(CHUNKS_FILE), &chunks_json).await?;
            tokio::fs::write(staging.join(EMBEDDINGS_FILE), index.embedding_bytes()).await?;
            Ok(())
        }
        .await;
        if let Err(e) = write_result {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(io(&e));
        }

        let destination = self.entry_path(key);

        // Swap: move any existing entry aside, move the staged entry in,
        // then delete the displaced one. The destination directory itself is
        // what matters here, metadata or not, or the final rename would trip
        // over it.
        let destination_exists = tokio::fs::try_exists(&destination).await.unwrap_or(false);
        let displaced = if destination_exists {
            let holder = tempfile::Builder::new()
                .prefix(".old-")
                .tempdir_in(&self.root)
                .map_err(|e| io(&e))?
                .keep();
            let _ = tokio::fs::remove_dir(&holder).await;
            if let Err(e) = tokio::fs::rename(&destination, &holder).await {
                let _ = tokio::fs::remove_dir_all(&staging).await;
                return Err(io(&e));
            }
            Some(holder)
        } else {
            None
        };

        if let Err(e) = tokio::fs::rename(&staging, &destination).await {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(io(&e));
        }
        if let Some(old) = displaced {
            if let Err(e) = tokio::fs::remove_dir_all(&old).await {
                warn!("failed to remove displaced entry {}: {e}", old.display());
            }
        }

        info!(
            "persisted index for {key:?} at {} ({} chunks)",
            destination.display(),
            metadata.chunk_count
        );
        Ok(destination)
    }

    /// Load a persisted index.
    ///
    /// Fails with [`RetrieveError::PersistMissing`] when no entry exists,
    /// [`RetrieveError::PersistCorrupt`] when the entry cannot be decoded,
    /// and [`RetrieveError::ModelMismatch`] when it was built under a
    /// different embedding model than `current_model`; a persisted index
    /// from another embedding space must never be silently served.
    pub async fn load(&self, key: &str, current_model: &str) -> Result<(VectorIndex, StoreMetadata)> {
        let entry = self.entry_path(key);
        if !self.exists(key).await {
            return Err(RetrieveError::PersistMissing {
                key: key.to_string(),
            });
        }

        let metadata = self.read_metadata_file(key, &entry).await?;
        if metadata.format_version != STORE_FORMAT_VERSION {
            return Err(RetrieveError::corrupt(
                key,
                format!(
                    "unsupported format version {} (expected {STORE_FORMAT_VERSION})",
                    metadata.format_version
                ),
            ));
        }
        if metadata.embedding_model != current_model {
            return Err(RetrieveError::ModelMismatch {
                key: key.to_string(),
                stored: metadata.embedding_model,
                current: current_model.to_string(),
            });
        }

        let chunks_raw = tokio::fs::read(entry.join(CHUNKS_FILE))
            .await
            .map_err(|e| RetrieveError::corrupt(key, format!("reading {CHUNKS_FILE}: {e}")))?;
        let chunks: Vec<IndexedChunk> = serde_json::from_slice(&chunks_raw)
            .map_err(|e| RetrieveError::corrupt(key, format!("decoding {CHUNKS_FILE}: {e}")))?;
        if chunks.len() != metadata.chunk_count {
            return Err(RetrieveError::corrupt(
                key,
                format!(
                    "entry has {} chunks, metadata says {}",
                    chunks.len(),
                    metadata.chunk_count
                ),
            ));
        }

        let embedding_bytes = tokio::fs::read(entry.join(EMBEDDINGS_FILE))
            .await
            .map_err(|e| RetrieveError::corrupt(key, format!("reading {EMBEDDINGS_FILE}: {e}")))?;
        let index = VectorIndex::from_stored(chunks, &embedding_bytes, metadata.dimension)
            .map_err(|e| RetrieveError::corrupt(key, e))?;

        debug!("loaded persisted index for {key:?} ({} chunks)", index.len());
        Ok((index, metadata))
    }

    /// Read only the metadata record of a persisted entry.
    pub async fn read_metadata(&self, key: &str) -> Result<StoreMetadata> {
        let entry = self.entry_path(key);
        if !self.exists(key).await {
            return Err(RetrieveError::PersistMissing {
                key: key.to_string(),
            });
        }
        self.read_metadata_file(key, &entry).await
    }

    async fn read_metadata_file(&self, key: &str, entry: &Path) -> Result<StoreMetadata> {
        let raw = tokio::fs::read(entry.join(METADATA_FILE))
            .await
            .map_err(|e| RetrieveError::corrupt(key, format!("reading {METADATA_FILE}: {e}")))?;
        serde_json::from_slice(&raw)
            .map_err(|e| RetrieveError::corrupt(key, format!("decoding {METADATA_FILE}: {e}")))
    }

    /// Enumerate persisted entries without loading their indices. Entries
    /// with unreadable metadata (and swap residue) are skipped with a
    /// warning.
    pub async fn list(&self) -> Result<Vec<PersistedEntry>> {
        let io = |e: &dyn std::fmt::Display| RetrieveError::store_io(self.root.display().to_string(), e);

        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&self.root).await.map_err(|e| io(&e))?;
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| io(&e))? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let raw = match tokio::fs::read(path.join(METADATA_FILE)).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("skipping store entry {name:?} without metadata: {e}");
                    continue;
                }
            };
            match serde_json::from_slice::<StoreMetadata>(&raw) {
                Ok(metadata) => entries.push(PersistedEntry {
                    name,
                    path,
                    metadata,
                }),
                Err(e) => warn!("skipping store entry {name:?} with bad metadata: {e}"),
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Delete the persisted entry for a key. Returns whether one existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let entry = self.entry_path(key);
        match tokio::fs::remove_dir_all(&entry).await {
            Ok(()) => {
                info!("deleted persisted index for {key:?}");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(RetrieveError::store_io(key, e)),
        }
    }
}
