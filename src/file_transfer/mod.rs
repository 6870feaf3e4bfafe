pub mod client;
pub mod segmenter;
pub mod session;

pub use client::FileTransferClient;
pub use segmenter::{Segment, SegmentError, Segmenter};
pub use session::{CancelHandle, SessionState, TransferError, TransferSession};
