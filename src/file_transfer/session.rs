use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use thiserror::Error;
use tokio::fs::File;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, TransferConfig};
use crate::file_transfer::segmenter::{Segment, SegmentError, Segmenter, segment_count_for};
use crate::protocol::{SegmentRequest, StoreRequest, StoreResponse, TransferResult};
use crate::transport::{Transport, TransportError};
use crate::utils;

/// Client-side transfer failures, surfaced synchronously from
/// [`TransferSession::send`]. No partial result is ever returned.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("invalid transfer configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),

    #[error("failed to read source file: {0}")]
    SourceRead(#[source] std::io::Error),

    #[error("transfer aborted: {0}")]
    Aborted(#[source] TransportError),

    #[error("store rejected transfer ({kind}): {message}")]
    Rejected { kind: String, message: String },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("unexpected response from store service")]
    UnexpectedResponse,

    #[error("session is {0:?}, expected Created")]
    InvalidState(SessionState),
}

impl From<SegmentError> for TransferError {
    fn from(error: SegmentError) -> Self {
        match error {
            SegmentError::InvalidConfiguration => {
                TransferError::InvalidConfiguration(ConfigError::ZeroSegmentSize)
            }
            SegmentError::SourceRead(io) => TransferError::SourceRead(io),
        }
    }
}

/// Where a session is in its lifetime. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Sending(u64),
    Completed,
    Failed,
}

/// Handle for cancelling a running session from outside.
///
/// Cancellation takes effect between segments, never mid-request; a cancelled
/// session ends in `Failed` with [`TransferError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One file's transfer from a local source to the store service.
///
/// The session owns the byte cursor into the source file and drives segments
/// through the transport strictly one at a time, waiting for each
/// acknowledgment before reading the next slice. Memory use is bounded to a
/// single segment buffer.
pub struct TransferSession {
    transfer_id: String,
    source_path: PathBuf,
    destination_path: String,
    config: TransferConfig,
    total_size: u64,
    segment_count: u64,
    bytes_sent: u64,
    started_at: SystemTime,
    state: SessionState,
    cancel: CancelHandle,
}

impl TransferSession {
    /// Validate inputs and size up the transfer without touching the network.
    ///
    /// The source is stat'ed eagerly so the segment count and total size are
    /// fixed before the first request goes out.
    pub async fn begin(
        source: impl AsRef<Path>,
        destination_path: &str,
        config: TransferConfig,
    ) -> Result<Self, TransferError> {
        config.validate()?;
        let destination_path = utils::normalize_destination(destination_path);
        if destination_path.is_empty() {
            return Err(TransferError::InvalidConfiguration(
                ConfigError::EmptyDestination,
            ));
        }

        let source_path = source.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&source_path)
            .await
            .map_err(TransferError::SourceRead)?;
        if !metadata.is_file() {
            return Err(TransferError::SourceRead(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", source_path.display()),
            )));
        }

        let total_size = metadata.len();
        let segment_count = segment_count_for(total_size, config.max_segment_size);

        Ok(Self {
            transfer_id: Uuid::new_v4().to_string(),
            source_path,
            destination_path,
            config,
            total_size,
            segment_count,
            bytes_sent: 0,
            started_at: SystemTime::now(),
            state: SessionState::Created,
            cancel: CancelHandle::new(),
        })
    }

    pub fn transfer_id(&self) -> &str {
        &self.transfer_id
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn segment_count(&self) -> u64 {
        self.segment_count
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle other tasks can use to cancel this session between segments.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Send every segment through the transport, one in flight at a time.
    ///
    /// `progress` is invoked with the integer percentage complete after each
    /// acknowledged segment, 100 immediately for a zero-byte file. On any
    /// failure the session ends in `Failed`, a best-effort cancel request is
    /// issued for segments already staged server-side, and no result is
    /// returned. The source file handle is released on every exit path.
    pub async fn send<T>(
        &mut self,
        transport: &T,
        mut progress: impl FnMut(u8) + Send,
    ) -> Result<TransferResult, TransferError>
    where
        T: Transport + ?Sized,
    {
        if self.state != SessionState::Created {
            return Err(TransferError::InvalidState(self.state));
        }

        let topic = self.config.store_topic();
        info!(
            transfer_id = %self.transfer_id,
            destination = %self.destination_path,
            size = %utils::format_size(self.total_size),
            segments = self.segment_count,
            "starting transfer"
        );

        let file = File::open(&self.source_path)
            .await
            .map_err(TransferError::SourceRead)?;
        let mut segmenter = Segmenter::new(file, self.total_size, self.config.max_segment_size)?;
        let mut acked = 0u64;

        while let Some(segment) = self.next_or_fail(&mut segmenter, transport, &topic, acked).await? {
            if self.cancel.is_cancelled() {
                self.state = SessionState::Failed;
                info!(transfer_id = %self.transfer_id, "transfer cancelled");
                if acked > 0 {
                    self.send_cancel(transport, &topic).await;
                }
                return Err(TransferError::Cancelled);
            }

            self.state = SessionState::Sending(segment.index);
            let payload_len = segment.data.len() as u64;
            let is_last = segment.is_last;
            let request = StoreRequest::Segment(SegmentRequest {
                transfer_id: self.transfer_id.clone(),
                file_name_on_server: self.destination_path.clone(),
                segment_index: segment.index,
                segment_count: self.segment_count,
                total_size: self.total_size,
                payload: segment.data,
            });

            debug!(
                transfer_id = %self.transfer_id,
                index = segment.index,
                len = payload_len,
                "sending segment"
            );
            let response = match transport.request(&topic, request).await {
                Ok(response) => response,
                Err(error) => {
                    self.state = SessionState::Failed;
                    if acked > 0 {
                        self.send_cancel(transport, &topic).await;
                    }
                    return Err(TransferError::Aborted(error));
                }
            };

            match response {
                StoreResponse::SegmentAck { .. } if !is_last => {
                    acked += 1;
                    self.bytes_sent += payload_len;
                    progress(percent_complete(self.bytes_sent, self.total_size));
                }
                StoreResponse::Completed(result) if is_last => {
                    self.bytes_sent += payload_len;
                    self.state = SessionState::Completed;
                    progress(100);
                    info!(
                        transfer_id = %self.transfer_id,
                        file_id = %result.file_id,
                        size = result.size,
                        "transfer complete"
                    );
                    return Ok(result);
                }
                StoreResponse::Error { kind, message } => {
                    self.state = SessionState::Failed;
                    return Err(TransferError::Rejected { kind, message });
                }
                _ => {
                    self.state = SessionState::Failed;
                    if acked > 0 {
                        self.send_cancel(transport, &topic).await;
                    }
                    return Err(TransferError::UnexpectedResponse);
                }
            }
        }

        // The segmenter always ends on a terminal segment, which returns
        // above with either a result or a fault.
        self.state = SessionState::Failed;
        Err(TransferError::UnexpectedResponse)
    }

    async fn next_or_fail<T>(
        &mut self,
        segmenter: &mut Segmenter<File>,
        transport: &T,
        topic: &str,
        acked: u64,
    ) -> Result<Option<Segment>, TransferError>
    where
        T: Transport + ?Sized,
    {
        match segmenter.next_segment().await {
            Ok(segment) => Ok(segment),
            Err(error) => {
                self.state = SessionState::Failed;
                if acked > 0 {
                    self.send_cancel(transport, topic).await;
                }
                Err(error.into())
            }
        }
    }

    /// Tell the store to drop staged segments for this transfer. Best effort:
    /// a failure here is logged and otherwise ignored.
    async fn send_cancel<T>(&self, transport: &T, topic: &str)
    where
        T: Transport + ?Sized,
    {
        let request = StoreRequest::Cancel {
            transfer_id: self.transfer_id.clone(),
            file_name_on_server: self.destination_path.clone(),
        };
        if let Err(error) = transport.request(topic, request).await {
            warn!(
                transfer_id = %self.transfer_id,
                %error,
                "failed to cancel transfer on store side"
            );
        }
    }
}

/// Integer percentage of the transfer that has been acknowledged.
///
/// A zero-byte file is 100% complete as soon as its single empty segment is
/// acknowledged.
fn percent_complete(bytes_sent: u64, total_size: u64) -> u8 {
    if total_size == 0 {
        100
    } else {
        (bytes_sent * 100 / total_size) as u8
    }
}
