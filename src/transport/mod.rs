use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::trace;

use crate::protocol::{self, ProtocolError, StoreRequest, StoreResponse};
use crate::store::FileStore;

/// Failure of a single request/response exchange with the fabric.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("fabric unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Codec(#[from] ProtocolError),

    #[error("request failed: {0}")]
    Request(String),
}

/// Send-and-await primitive supplied by the messaging fabric.
///
/// The core never has more than one request outstanding per session; the next
/// segment is not sent until the previous response arrives. Implementations
/// must be safe for concurrent use by independent sessions and are free to
/// enforce their own timeouts, surfaced as [`TransportError::Timeout`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        topic: &str,
        request: StoreRequest,
    ) -> Result<StoreResponse, TransportError>;
}

/// In-process transport that hands requests straight to a [`FileStore`].
///
/// Requests round-trip through the JSON codec so the exchange behaves like
/// the real wire; store faults come back as error responses, the way a
/// fabric-hosted service would report them.
pub struct LoopbackTransport {
    store: Arc<FileStore>,
}

impl LoopbackTransport {
    pub fn new(store: Arc<FileStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn request(
        &self,
        topic: &str,
        request: StoreRequest,
    ) -> Result<StoreResponse, TransportError> {
        let encoded = protocol::encode_request(&request)?;
        trace!(topic, len = encoded.len(), "loopback request");
        let decoded = protocol::decode_request(&encoded)?;

        let response = match self.store.handle(decoded).await {
            Ok(response) => response,
            Err(fault) => fault.into_response(),
        };

        let encoded = protocol::encode_response(&response)?;
        protocol::decode_response(&encoded).map_err(TransportError::from)
    }
}
