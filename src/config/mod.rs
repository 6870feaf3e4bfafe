use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol;

/// Hard per-message size limit imposed by the fabric.
pub const FABRIC_MESSAGE_LIMIT: usize = 1024 * 1024;

/// Bytes reserved for the message envelope (topic and field names) on top of
/// the encoded payload.
pub const PROTOCOL_OVERHEAD: usize = 4 * 1024;

/// Default maximum segment size.
///
/// Payload bytes travel base64-encoded inside the message, four output bytes
/// per three of input, so the cap is three quarters of what remains under the
/// fabric limit after the envelope. A segment of exactly this size encodes to
/// a message that still fits [`FABRIC_MESSAGE_LIMIT`].
pub const DEFAULT_MAX_SEGMENT_SIZE: usize = (FABRIC_MESSAGE_LIMIT - PROTOCOL_OVERHEAD) / 4 * 3;

/// Worst-case wire size of a message carrying `payload_len` segment bytes.
fn encoded_message_size(payload_len: usize) -> usize {
    payload_len.div_ceil(3) * 4 + PROTOCOL_OVERHEAD
}

/// Client-side transfer configuration.
///
/// Passed explicitly into sessions and the segmenter; nothing here is read
/// from ambient process state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Upper bound on the payload size of a single segment.
    pub max_segment_size: usize,
    /// Unique id of the target service instance, if requests should be
    /// routed to one instance rather than the service type as a whole.
    pub service_unique_id: Option<String>,
    /// Subdirectory under the service's storage directory that destination
    /// paths are placed in.
    pub storage_subdir: Option<String>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            service_unique_id: None,
            storage_subdir: None,
        }
    }
}

impl TransferConfig {
    /// Create a configuration with a specific segment size cap.
    pub fn with_max_segment_size(max_segment_size: usize) -> Self {
        Self {
            max_segment_size,
            ..Self::default()
        }
    }

    /// Validate the configuration before any network activity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_segment_size == 0 {
            return Err(ConfigError::ZeroSegmentSize);
        }
        if encoded_message_size(self.max_segment_size) > FABRIC_MESSAGE_LIMIT {
            return Err(ConfigError::SegmentSizeOverLimit {
                requested: self.max_segment_size,
                limit: DEFAULT_MAX_SEGMENT_SIZE,
            });
        }
        Ok(())
    }

    /// Request topic for the file store method of the configured service.
    pub fn store_topic(&self) -> String {
        protocol::store_topic(self.service_unique_id.as_deref())
    }
}

/// Configuration validation errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max segment size must be greater than zero")]
    ZeroSegmentSize,

    #[error("max segment size {requested} encodes past the fabric message limit (max {limit} bytes)")]
    SegmentSizeOverLimit { requested: usize, limit: usize },

    #[error("destination path must not be empty")]
    EmptyDestination,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TransferConfig::default();
        config.validate().expect("default config should be valid");
        assert!(config.max_segment_size < FABRIC_MESSAGE_LIMIT);
    }

    #[test]
    fn test_zero_segment_size_rejected() {
        let config = TransferConfig::with_max_segment_size(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroSegmentSize));
    }

    #[test]
    fn test_over_limit_segment_size_rejected() {
        let config = TransferConfig::with_max_segment_size(FABRIC_MESSAGE_LIMIT);
        assert_eq!(
            config.validate(),
            Err(ConfigError::SegmentSizeOverLimit {
                requested: FABRIC_MESSAGE_LIMIT,
                limit: DEFAULT_MAX_SEGMENT_SIZE,
            })
        );
    }

    #[test]
    fn test_default_size_is_the_largest_accepted() {
        let config = TransferConfig::with_max_segment_size(DEFAULT_MAX_SEGMENT_SIZE);
        assert_eq!(config.validate(), Ok(()));

        let config = TransferConfig::with_max_segment_size(DEFAULT_MAX_SEGMENT_SIZE + 1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SegmentSizeOverLimit { .. })
        ));
    }

    #[test]
    fn test_accepted_sizes_fit_the_fabric_limit_after_encoding() {
        for size in [1, 3, 1000, DEFAULT_MAX_SEGMENT_SIZE] {
            let config = TransferConfig::with_max_segment_size(size);
            config.validate().expect("size should be accepted");
            assert!(
                encoded_message_size(size) <= FABRIC_MESSAGE_LIMIT,
                "accepted size {} encodes past the fabric limit",
                size
            );
        }
    }

    #[test]
    fn test_store_topic_uses_service_unique_id() {
        let mut config = TransferConfig::default();
        assert_eq!(
            config.store_topic(),
            "/segstream/service/file-transfer/file/store"
        );

        config.service_unique_id = Some("instance-1".to_string());
        assert_eq!(
            config.store_topic(),
            "/segstream/service/file-transfer/instance-1/file/store"
        );
    }

    #[test]
    fn test_config_serialization() {
        let config = TransferConfig::default();
        let json = serde_json::to_string(&config).expect("should serialize");
        let _deserialized: TransferConfig =
            serde_json::from_str(&json).expect("should deserialize");
    }
}
