use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// One bounded-size slice of a file, tagged with its position in the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub index: u64,
    pub data: Vec<u8>,
    pub is_last: bool,
}

/// Errors produced while cutting a byte source into segments.
#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("max segment size must be greater than zero")]
    InvalidConfiguration,

    #[error("failed to read source: {0}")]
    SourceRead(#[from] std::io::Error),
}

/// Number of segments a file of `total_size` bytes splits into.
///
/// An empty file still produces one zero-length segment so the receiver can
/// create an empty stored file.
pub fn segment_count_for(total_size: u64, max_segment_size: usize) -> u64 {
    if total_size == 0 {
        1
    } else {
        total_size.div_ceil(max_segment_size as u64)
    }
}

/// Cuts a byte source into an ordered sequence of size-bounded segments.
///
/// The sequence is lazy and non-restartable: each call to [`next_segment`]
/// reads the next slice from the source, and only one segment's bytes are
/// buffered at a time. Every segment is exactly `max_segment_size` bytes
/// except possibly the last.
///
/// [`next_segment`]: Segmenter::next_segment
pub struct Segmenter<R> {
    source: R,
    max_segment_size: usize,
    total_size: u64,
    segment_count: u64,
    next_index: u64,
    bytes_read: u64,
    finished: bool,
}

impl<R: AsyncRead + Unpin + Send> Segmenter<R> {
    /// Wrap a byte source whose total size is known up front.
    pub fn new(source: R, total_size: u64, max_segment_size: usize) -> Result<Self, SegmentError> {
        if max_segment_size == 0 {
            return Err(SegmentError::InvalidConfiguration);
        }
        Ok(Self {
            source,
            max_segment_size,
            total_size,
            segment_count: segment_count_for(total_size, max_segment_size),
            next_index: 0,
            bytes_read: 0,
            finished: false,
        })
    }

    pub fn segment_count(&self) -> u64 {
        self.segment_count
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Produce the next segment, or `None` once the source is exhausted.
    ///
    /// A source shorter than the declared total size surfaces as a
    /// `SourceRead` error on the segment that hits early end-of-file.
    pub async fn next_segment(&mut self) -> Result<Option<Segment>, SegmentError> {
        if self.finished {
            return Ok(None);
        }

        let remaining = self.total_size - self.bytes_read;
        let take = remaining.min(self.max_segment_size as u64) as usize;

        let mut data = vec![0u8; take];
        if take > 0 {
            self.source.read_exact(&mut data).await?;
        }

        let index = self.next_index;
        self.next_index += 1;
        self.bytes_read += take as u64;

        let is_last = self.next_index == self.segment_count;
        if is_last {
            self.finished = true;
        }

        trace!(index, len = take, is_last, "produced segment");
        Ok(Some(Segment { index, data, is_last }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect_segments(data: &[u8], max_segment_size: usize) -> Vec<Segment> {
        let mut segmenter = Segmenter::new(data, data.len() as u64, max_segment_size).unwrap();
        let mut segments = Vec::new();
        while let Some(segment) = segmenter.next_segment().await.unwrap() {
            segments.push(segment);
        }
        segments
    }

    #[test]
    fn test_segment_count_for() {
        assert_eq!(segment_count_for(0, 1000), 1);
        assert_eq!(segment_count_for(1, 1000), 1);
        assert_eq!(segment_count_for(1000, 1000), 1);
        assert_eq!(segment_count_for(1001, 1000), 2);
        assert_eq!(segment_count_for(2_500_000, 1_000_000), 3);
    }

    #[test]
    fn test_zero_segment_size_rejected() {
        let result = Segmenter::new(&b"abc"[..], 3, 0);
        assert!(matches!(result, Err(SegmentError::InvalidConfiguration)));
    }

    #[tokio::test]
    async fn test_segments_cover_source_exactly() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let segments = collect_segments(&data, 1024).await;

        assert_eq!(segments.len(), 10);
        for (i, segment) in segments.iter().enumerate() {
            assert_eq!(segment.index, i as u64);
            assert!(segment.data.len() <= 1024);
            assert_eq!(segment.is_last, i == segments.len() - 1);
        }

        let rejoined: Vec<u8> = segments.into_iter().flat_map(|s| s.data).collect();
        assert_eq!(rejoined, data);
    }

    #[tokio::test]
    async fn test_three_segment_split() {
        let data = vec![7u8; 2_500_000];
        let segments = collect_segments(&data, 1_000_000).await;

        let sizes: Vec<usize> = segments.iter().map(|s| s.data.len()).collect();
        assert_eq!(sizes, vec![1_000_000, 1_000_000, 500_000]);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_full_final_segment() {
        let data = vec![1u8; 2048];
        let segments = collect_segments(&data, 1024).await;

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].data.len(), 1024);
        assert!(segments[1].is_last);
    }

    #[tokio::test]
    async fn test_empty_source_yields_single_empty_segment() {
        let segments = collect_segments(&[], 1024).await;

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].index, 0);
        assert!(segments[0].data.is_empty());
        assert!(segments[0].is_last);
    }

    #[tokio::test]
    async fn test_sequence_is_deterministic() {
        let data: Vec<u8> = (0..5_000u32).map(|i| (i % 13) as u8).collect();
        let first = collect_segments(&data, 700).await;
        let second = collect_segments(&data, 700).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_truncated_source_fails() {
        // Declared size is larger than what the source can deliver.
        let data = vec![0u8; 100];
        let mut segmenter = Segmenter::new(&data[..], 200, 64).unwrap();

        assert!(segmenter.next_segment().await.is_ok());
        let result = segmenter.next_segment().await;
        assert!(matches!(result, Err(SegmentError::SourceRead(_))));
    }

    #[tokio::test]
    async fn test_exhausted_segmenter_returns_none() {
        let data = vec![0u8; 10];
        let mut segmenter = Segmenter::new(&data[..], 10, 64).unwrap();
        segmenter.next_segment().await.unwrap();
        assert!(segmenter.next_segment().await.unwrap().is_none());
        assert!(segmenter.next_segment().await.unwrap().is_none());
    }
}
