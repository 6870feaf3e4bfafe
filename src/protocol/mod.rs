use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol version carried for future compatibility checks.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Service type prefix for all file transfer request topics.
pub const SERVICE_TYPE: &str = "/segstream/service/file-transfer";

/// Topic fragment for the "file store" request method.
pub const TOPIC_FILE_STORE: &str = "file/store";

/// Build the request topic for the file store method.
///
/// When a service registers with a unique id, the id is inserted between the
/// service type and the method fragment so requests reach that instance only.
pub fn store_topic(service_unique_id: Option<&str>) -> String {
    match service_unique_id {
        Some(id) => format!("{}/{}/{}", SERVICE_TYPE, id, TOPIC_FILE_STORE),
        None => format!("{}/{}", SERVICE_TYPE, TOPIC_FILE_STORE),
    }
}

/// One segment of a file being stored, sent as a single fabric request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRequest {
    /// Client-assigned id shared by every segment of one transfer.
    pub transfer_id: String,
    /// Destination path relative to the service's storage directory,
    /// with separators normalized to '/' by the caller.
    pub file_name_on_server: String,
    /// Position of this segment, starting at 0.
    pub segment_index: u64,
    /// Total number of segments in the transfer.
    pub segment_count: u64,
    /// Total size of the file in bytes.
    pub total_size: u64,
    /// Raw segment bytes, base64-encoded on the wire.
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl SegmentRequest {
    /// Whether this is the terminal segment of its transfer.
    pub fn is_last(&self) -> bool {
        self.segment_index + 1 == self.segment_count
    }
}

/// Requests understood by the file store service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreRequest {
    /// Store one segment of a file.
    Segment(SegmentRequest),
    /// Discard everything staged for an in-flight transfer.
    Cancel {
        transfer_id: String,
        file_name_on_server: String,
    },
}

/// Responses returned by the file store service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StoreResponse {
    /// Acknowledgment for a non-terminal segment.
    SegmentAck {
        file_id: String,
        segments_received: u64,
    },
    /// The file is durably stored; returned for the terminal segment only.
    Completed(TransferResult),
    /// The staged transfer was discarded.
    Cancelled { file_id: String },
    /// A server-side fault; no result will be produced for this transfer.
    Error { kind: String, message: String },
}

/// Content digests for a stored file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentHashes {
    pub sha256: String,
}

/// Summary of a completed transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferResult {
    /// Server-assigned id of the stored file.
    pub file_id: String,
    pub hashes: ContentHashes,
    /// Stored size in bytes.
    pub size: u64,
}

/// Errors from encoding or decoding wire messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encode a request as JSON bytes for the fabric.
pub fn encode_request(request: &StoreRequest) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(request).map_err(ProtocolError::Encode)
}

/// Decode a request from JSON bytes.
pub fn decode_request(bytes: &[u8]) -> Result<StoreRequest, ProtocolError> {
    serde_json::from_slice(bytes).map_err(ProtocolError::Decode)
}

/// Encode a response as JSON bytes for the fabric.
pub fn encode_response(response: &StoreResponse) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(response).map_err(ProtocolError::Encode)
}

/// Decode a response from JSON bytes.
pub fn decode_response(bytes: &[u8]) -> Result<StoreResponse, ProtocolError> {
    serde_json::from_slice(bytes).map_err(ProtocolError::Decode)
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
