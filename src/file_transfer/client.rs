use std::path::Path;
use std::sync::Arc;

use crate::config::TransferConfig;
use crate::file_transfer::session::{TransferError, TransferSession};
use crate::protocol::TransferResult;
use crate::transport::Transport;

/// Thin client wrapper for storing files on a file transfer service.
///
/// Each store call runs its own [`TransferSession`]; the transport is shared,
/// so independent transfers can run concurrently from clones of one client.
pub struct FileTransferClient<T: Transport + ?Sized> {
    transport: Arc<T>,
    config: TransferConfig,
}

impl<T: Transport + ?Sized> Clone for FileTransferClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
        }
    }
}

impl<T: Transport + ?Sized> FileTransferClient<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self::with_config(transport, TransferConfig::default())
    }

    pub fn with_config(transport: Arc<T>, config: TransferConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Store a local file under `destination` on the service.
    pub async fn store_file(
        &self,
        source: impl AsRef<Path>,
        destination: &str,
    ) -> Result<TransferResult, TransferError> {
        self.store_file_with_progress(source, destination, |_| {})
            .await
    }

    /// Store a local file, reporting integer percentages after each
    /// acknowledged segment.
    pub async fn store_file_with_progress(
        &self,
        source: impl AsRef<Path>,
        destination: &str,
        progress: impl FnMut(u8) + Send,
    ) -> Result<TransferResult, TransferError> {
        let destination = self.resolve_destination(destination);
        let mut session =
            TransferSession::begin(source, &destination, self.config.clone()).await?;
        session.send(self.transport.as_ref(), progress).await
    }

    /// Prefix the configured storage subdirectory, if any.
    fn resolve_destination(&self, destination: &str) -> String {
        match &self.config.storage_subdir {
            Some(subdir) => format!("{}/{}", subdir, destination),
            None => destination.to_string(),
        }
    }
}
