pub mod config;
pub mod file_transfer;
pub mod protocol;
pub mod store;
pub mod transport;
pub mod utils;

pub use config::{DEFAULT_MAX_SEGMENT_SIZE, FABRIC_MESSAGE_LIMIT, ConfigError, TransferConfig};
pub use file_transfer::{
    CancelHandle, FileTransferClient, Segment, SegmentError, Segmenter, SessionState,
    TransferError, TransferSession,
};
pub use protocol::{
    ContentHashes, SegmentRequest, StoreRequest, StoreResponse, TransferResult,
};
pub use store::{FileStore, StoreError};
pub use transport::{LoopbackTransport, Transport, TransportError};
