use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{ContentHashes, SegmentRequest, StoreRequest, StoreResponse, TransferResult};

/// Location within the storage directory for staged, in-flight files.
const DEFAULT_WORKING_SUBDIR: &str = ".workdir";

/// Base file name for a transfer's staging file inside its working directory.
const WORKING_BASE_FILE_NAME: &str = "file";

/// Server-side faults while reassembling and storing file segments.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unexpected segment index, expected {expected}, received {received}")]
    OutOfOrderSegment { expected: u64, received: u64 },

    #[error("segment count changed mid-transfer, expected {expected}, received {received}")]
    SegmentCountMismatch { expected: u64, received: u64 },

    #[error("stored size {actual} does not match declared size {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("destination not allowed: {0}")]
    InvalidDestination(String),

    #[error("unknown transfer id: {0}")]
    UnknownTransfer(String),

    #[error("failed to write to storage: {0}")]
    StorageWrite(#[from] std::io::Error),
}

impl StoreError {
    /// Stable identifier for the fault, carried in error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::OutOfOrderSegment { .. } => "out_of_order_segment",
            StoreError::SegmentCountMismatch { .. } => "segment_count_mismatch",
            StoreError::SizeMismatch { .. } => "size_mismatch",
            StoreError::InvalidDestination(_) => "invalid_destination",
            StoreError::UnknownTransfer(_) => "unknown_transfer",
            StoreError::StorageWrite(_) => "storage_write_error",
        }
    }

    /// Convert the fault into the error response sent back over the fabric.
    pub fn into_response(self) -> StoreResponse {
        StoreResponse::Error {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

struct TransferEntry {
    file_id: String,
    destination: PathBuf,
    segment_count: u64,
    segments_received: u64,
    bytes_received: u64,
    hasher: Sha256,
    working_dir: PathBuf,
    staging_path: PathBuf,
}

/// Reassembles ordered file segments into durable storage.
///
/// Segments are appended to a staging file under the working directory while
/// a running SHA-256 digest is maintained; the terminal segment triggers size
/// validation and an atomic rename into the storage directory. Any fault
/// discards the staged state, so no partial file ever lands at a destination
/// path.
pub struct FileStore {
    storage_dir: PathBuf,
    working_dir: PathBuf,
    active: Mutex<HashMap<String, TransferEntry>>,
}

impl FileStore {
    /// Open a store rooted at `storage_dir`, creating directories as needed.
    ///
    /// The working directory defaults to `.workdir` under the storage
    /// directory. Staging directories left behind by transfers that never
    /// completed are purged on startup.
    pub async fn new(
        storage_dir: impl AsRef<Path>,
        working_dir: Option<PathBuf>,
    ) -> Result<Self, StoreError> {
        fs::create_dir_all(storage_dir.as_ref()).await?;
        let storage_dir = fs::canonicalize(storage_dir.as_ref()).await?;
        info!(path = %storage_dir.display(), "using storage dir");

        let working_dir = working_dir.unwrap_or_else(|| storage_dir.join(DEFAULT_WORKING_SUBDIR));
        fs::create_dir_all(&working_dir).await?;
        let working_dir = fs::canonicalize(&working_dir).await?;
        info!(path = %working_dir.display(), "using working dir");

        let store = Self {
            storage_dir,
            working_dir,
            active: Mutex::new(HashMap::new()),
        };
        store.purge_incomplete().await?;
        Ok(store)
    }

    /// Remove staging directories from storage operations that never
    /// completed.
    async fn purge_incomplete(&self) -> Result<(), StoreError> {
        let mut entries = fs::read_dir(&self.working_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            info!(path = %entry.path().display(), "purging incomplete transfer");
            fs::remove_dir_all(entry.path()).await?;
        }
        Ok(())
    }

    /// Process one store request, returning the response to send back.
    ///
    /// Faults come back as `Err`; a fabric-facing caller turns them into
    /// [`StoreResponse::Error`] via [`StoreError::into_response`].
    pub async fn handle(&self, request: StoreRequest) -> Result<StoreResponse, StoreError> {
        match request {
            StoreRequest::Segment(segment) => self.store_segment(segment).await,
            StoreRequest::Cancel { transfer_id, .. } => self.cancel(&transfer_id).await,
        }
    }

    async fn store_segment(&self, segment: SegmentRequest) -> Result<StoreResponse, StoreError> {
        let mut active = self.active.lock().await;

        if !active.contains_key(&segment.transfer_id) {
            if segment.segment_index != 0 {
                return Err(StoreError::OutOfOrderSegment {
                    expected: 0,
                    received: segment.segment_index,
                });
            }
            let entry = self.create_entry(&segment).await?;
            active.insert(segment.transfer_id.clone(), entry);
        }

        // Any fault below removes the entry again, discarding the staged
        // state for the transfer.
        let entry = active
            .get_mut(&segment.transfer_id)
            .ok_or_else(|| StoreError::UnknownTransfer(segment.transfer_id.clone()))?;

        if segment.segment_count != entry.segment_count {
            let expected = entry.segment_count;
            let staged = active.remove(&segment.transfer_id);
            self.discard(staged).await;
            return Err(StoreError::SegmentCountMismatch {
                expected,
                received: segment.segment_count,
            });
        }

        if segment.segment_index != entry.segments_received {
            let expected = entry.segments_received;
            let staged = active.remove(&segment.transfer_id);
            self.discard(staged).await;
            return Err(StoreError::OutOfOrderSegment {
                expected,
                received: segment.segment_index,
            });
        }

        if let Err(fault) = Self::append_segment(entry, &segment.payload).await {
            let staged = active.remove(&segment.transfer_id);
            self.discard(staged).await;
            return Err(fault);
        }
        let file_id = entry.file_id.clone();
        let segments_received = entry.segments_received;
        debug!(
            transfer_id = %segment.transfer_id,
            file_id = %file_id,
            index = segment.segment_index,
            "stored segment"
        );

        if segment.is_last() {
            let entry = active
                .remove(&segment.transfer_id)
                .ok_or_else(|| StoreError::UnknownTransfer(segment.transfer_id.clone()))?;
            let result = self.finalize(entry, segment.total_size).await?;
            return Ok(StoreResponse::Completed(result));
        }

        Ok(StoreResponse::SegmentAck {
            file_id,
            segments_received,
        })
    }

    async fn create_entry(&self, segment: &SegmentRequest) -> Result<TransferEntry, StoreError> {
        let destination = self.resolve_destination(&segment.file_name_on_server)?;

        let file_id = Uuid::new_v4().to_string();
        let working_dir = self.working_dir.join(&file_id);
        fs::create_dir_all(&working_dir).await?;
        let staging_path = working_dir.join(WORKING_BASE_FILE_NAME);

        info!(
            transfer_id = %segment.transfer_id,
            file_id = %file_id,
            destination = %destination.display(),
            "assigned file id"
        );

        Ok(TransferEntry {
            file_id,
            destination,
            segment_count: segment.segment_count,
            segments_received: 0,
            bytes_received: 0,
            hasher: Sha256::new(),
            working_dir,
            staging_path,
        })
    }

    /// Resolve a wire destination to a path inside the storage directory.
    ///
    /// Absolute paths, parent-directory components, and paths reaching into
    /// the working directory are rejected.
    fn resolve_destination(&self, file_name_on_server: &str) -> Result<PathBuf, StoreError> {
        if file_name_on_server.is_empty() {
            return Err(StoreError::InvalidDestination(
                "destination path is empty".to_string(),
            ));
        }

        let relative = Path::new(file_name_on_server);
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(StoreError::InvalidDestination(format!(
                        "destination must be a plain relative path: '{}'",
                        file_name_on_server
                    )));
                }
            }
        }

        let resolved = self.storage_dir.join(relative);
        if resolved.starts_with(&self.working_dir) {
            return Err(StoreError::InvalidDestination(format!(
                "destination cannot be inside the working directory: '{}'",
                file_name_on_server
            )));
        }
        Ok(resolved)
    }

    async fn append_segment(entry: &mut TransferEntry, payload: &[u8]) -> Result<(), StoreError> {
        // Opened even for an empty payload so a zero-byte staging file
        // exists before finalization.
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&entry.staging_path)
            .await?;
        file.write_all(payload).await?;
        file.flush().await?;

        entry.hasher.update(payload);
        entry.bytes_received += payload.len() as u64;
        entry.segments_received += 1;
        Ok(())
    }

    async fn finalize(
        &self,
        entry: TransferEntry,
        declared_size: u64,
    ) -> Result<TransferResult, StoreError> {
        if entry.bytes_received != declared_size {
            let fault = StoreError::SizeMismatch {
                expected: declared_size,
                actual: entry.bytes_received,
            };
            self.discard(Some(entry)).await;
            return Err(fault);
        }

        let sha256 = hex::encode(entry.hasher.finalize());

        if let Some(parent) = entry.destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&entry.staging_path, &entry.destination).await?;
        fs::remove_dir_all(&entry.working_dir).await?;

        info!(
            file_id = %entry.file_id,
            destination = %entry.destination.display(),
            size = entry.bytes_received,
            segments = entry.segments_received,
            "stored file"
        );

        Ok(TransferResult {
            file_id: entry.file_id,
            hashes: ContentHashes { sha256 },
            size: entry.bytes_received,
        })
    }

    async fn cancel(&self, transfer_id: &str) -> Result<StoreResponse, StoreError> {
        let entry = self
            .active
            .lock()
            .await
            .remove(transfer_id)
            .ok_or_else(|| StoreError::UnknownTransfer(transfer_id.to_string()))?;

        let file_id = entry.file_id.clone();
        info!(transfer_id, file_id = %file_id, "cancelled transfer");
        self.discard(Some(entry)).await;
        Ok(StoreResponse::Cancelled { file_id })
    }

    async fn discard(&self, entry: Option<TransferEntry>) {
        if let Some(entry) = entry {
            if let Err(error) = fs::remove_dir_all(&entry.working_dir).await {
                warn!(
                    file_id = %entry.file_id,
                    %error,
                    "failed to remove staging directory"
                );
            }
        }
    }
}
