//! Chunked file upload reassembly.
//!
//! Mobiles push files as a `file-upload-start` announcement followed by
//! `total_chunks` chunks in arbitrary order. Chunks are kept in an
//! index-keyed map; concatenation walks the indices in order once the last
//! chunk lands. Records that go quiet are reclaimed by a periodic sweep.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One in-flight chunked upload.
#[derive(Debug)]
struct ChunkedUpload {
    file_name: String,
    total_chunks: usize,
    total_size: u64,
    chunks: HashMap<usize, Vec<u8>>,
    last_activity: Instant,
}

/// What happened after accepting a chunk.
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Chunk stored; acknowledge its index.
    Ack { index: usize },
    /// All chunks present; the reassembled file is ready to write.
    Complete { file_name: String, data: Vec<u8> },
    /// All chunk slots were filled but an index was absent.
    MissingChunk { index: usize },
    /// No upload with that id is in flight.
    UnknownUpload,
}

/// Thread-safe store of in-flight uploads.
#[derive(Debug, Default)]
pub struct UploadStore {
    inner: Mutex<HashMap<String, ChunkedUpload>>,
}

impl UploadStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new upload, replacing any stale record with the same id.
    pub fn start(&self, upload_id: &str, file_name: &str, total_chunks: usize, total_size: u64) {
        let mut uploads = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        uploads.insert(
            upload_id.to_string(),
            ChunkedUpload {
                file_name: file_name.to_string(),
                total_chunks,
                total_size,
                chunks: HashMap::new(),
                last_activity: Instant::now(),
            },
        );
    }

    /// Store one chunk. When the chunk count reaches `total_chunks` the
    /// record is consumed and the concatenated bytes are returned.
    pub fn add_chunk(&self, upload_id: &str, index: usize, data: Vec<u8>) -> ChunkOutcome {
        let mut uploads = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(upload) = uploads.get_mut(upload_id) else {
            return ChunkOutcome::UnknownUpload;
        };

        upload.chunks.insert(index, data);
        upload.last_activity = Instant::now();

        if upload.chunks.len() < upload.total_chunks {
            return ChunkOutcome::Ack { index };
        }

        // Complete or corrupt either way — the record is done.
        let mut upload = uploads.remove(upload_id).expect("record present");
        let mut data = Vec::with_capacity(upload.total_size as usize);
        for i in 0..upload.total_chunks {
            match upload.chunks.remove(&i) {
                Some(chunk) => data.extend_from_slice(&chunk),
                None => return ChunkOutcome::MissingChunk { index: i },
            }
        }
        ChunkOutcome::Complete {
            file_name: upload.file_name,
            data,
        }
    }

    /// Drop an upload by id. Returns whether a record existed.
    pub fn cancel(&self, upload_id: &str) -> bool {
        let mut uploads = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        uploads.remove(upload_id).is_some()
    }

    /// Remove the record for a failed upload without reassembly.
    pub fn discard(&self, upload_id: &str) {
        self.cancel(upload_id);
    }

    /// Reclaim records idle longer than `max_idle`. Returns how many were
    /// removed.
    pub fn remove_idle(&self, max_idle: Duration) -> usize {
        let mut uploads = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = uploads.len();
        uploads.retain(|_, upload| upload.last_activity.elapsed() <= max_idle);
        before - uploads.len()
    }

    /// Number of in-flight uploads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write reassembled upload bytes to a uniquely named file in the OS temp
/// directory. Returns the absolute path.
///
/// The client-supplied name is reduced to its basename so uploads cannot
/// escape the temp directory.
///
/// # Errors
///
/// Returns an error for empty/dot-only names or when the write fails.
pub fn save_uploaded_file(file_name: &str, data: &[u8]) -> Result<PathBuf> {
    let base = Path::new(file_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if base.is_empty() || base == "." || base == ".." {
        anyhow::bail!("invalid filename");
    }

    let timestamp = chrono::Utc::now().timestamp_millis();
    let path = std::env::temp_dir().join(format!("aipilot_{timestamp}_{base}"));
    fs::write(&path, data)
        .with_context(|| format!("failed to write {}", path.display()))?;
    // Uploads land in the shared temp dir; keep them owner-only.
    #[cfg(unix)]
    fs::set_permissions(&path, fs::Permissions::from_mode(crate::constants::FILE_MODE))
        .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    Ok(path)
}
