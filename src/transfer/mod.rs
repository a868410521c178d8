//! File transfer sub-protocol.
//!
//! Chunked-copy helpers: a fixed-size buffer, offset bookkeeping, and an
//! atomic create-append-complete write sequence, generalized to the
//! peer-facing push-file / push-file-
//! chunk exchange and its RTT-estimation feedback loop.

use crate::descriptor::DescriptorId;
use crate::error::{ConvoError, ConvoResult};
use dashmap::DashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Chunk size.
pub const CHUNK_SIZE: u64 = 256 * 1024;

/// `LONG_MAX` sentinel telling the sender to abort immediately.
pub const ABORT_CHUNK_START: i64 = i64::MAX;

/// Sender-side state for one in-progress push.
pub struct OutgoingTransfer {
    pub descriptor_id: DescriptorId,
    pub file: PathBuf,
    pub length: u64,
    pub chunk_start: u64,
    last_send_at: Option<Instant>,
}

impl OutgoingTransfer {
    pub fn new(descriptor_id: DescriptorId, file: PathBuf, length: u64) -> Self {
        Self {
            descriptor_id,
            file,
            length,
            chunk_start: 0,
            last_send_at: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.chunk_start >= self.length
    }

    /// Reads the next chunk (or the final partial chunk) from disk.
    pub async fn next_chunk(&mut self) -> ConvoResult<Vec<u8>> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};
        let mut file = tokio::fs::File::open(&self.file)
            .await
            .map_err(|e| ConvoError::Internal(e.to_string()))?;
        file.seek(std::io::SeekFrom::Start(self.chunk_start))
            .await
            .map_err(|e| ConvoError::Internal(e.to_string()))?;
        let remaining = self.length - self.chunk_start;
        let want = remaining.min(CHUNK_SIZE) as usize;
        let mut buf = vec![0u8; want];
        file.read_exact(&mut buf)
            .await
            .map_err(|e| ConvoError::Internal(e.to_string()))?;
        self.last_send_at = Some(Instant::now());
        Ok(buf)
    }

    /// Advances past an accepted chunk and returns an RTT sample computed
    /// from the reply's `senderTimestamp` echo.
    pub fn acknowledge(&mut self, next_chunk_start: i64) -> Option<Duration> {
        if next_chunk_start == ABORT_CHUNK_START {
            warn!(descriptor = ?self.descriptor_id, "peer aborted transfer");
            self.chunk_start = self.length;
            return None;
        }
        self.chunk_start = next_chunk_start.max(0) as u64;
        self.last_send_at.take().map(|sent| sent.elapsed())
    }
}

/// Receiver-side chunked writer.
pub struct IncomingTransfer {
    pub descriptor_id: DescriptorId,
    pub dest: PathBuf,
    pub expected_length: u64,
    pub next_chunk_start: u64,
    file: Option<tokio::fs::File>,
}

impl IncomingTransfer {
    pub fn new(descriptor_id: DescriptorId, dest: PathBuf, expected_length: u64) -> Self {
        Self {
            descriptor_id,
            dest,
            expected_length,
            next_chunk_start: 0,
            file: None,
        }
    }

    async fn ensure_open(&mut self) -> ConvoResult<&mut tokio::fs::File> {
        if self.file.is_none() {
            if let Some(parent) = self.dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ConvoError::Internal(e.to_string()))?;
            }
            let file = tokio::fs::File::create(&self.dest)
                .await
                .map_err(|e| ConvoError::Internal(e.to_string()))?;
            self.file = Some(file);
        }
        Ok(self.file.as_mut().unwrap())
    }

    /// Appends a chunk at `chunk_start`. Out-of-order chunks (a redelivered
    /// earlier chunk after a reconnect) are accepted idempotently by
    /// truncation-free re-seek rather than rejected, since only the
    /// *final* file needs to be byte-identical.
    pub async fn append(&mut self, chunk_start: u64, bytes: &[u8]) -> ConvoResult<i64> {
        if chunk_start > self.next_chunk_start {
            return Err(ConvoError::ChunkOutOfOrder {
                expected: self.next_chunk_start,
                got: chunk_start,
            });
        }
        let file = self.ensure_open().await?;
        use tokio::io::AsyncSeekExt;
        file.seek(std::io::SeekFrom::Start(chunk_start))
            .await
            .map_err(|e| ConvoError::Internal(e.to_string()))?;
        file.write_all(bytes)
            .await
            .map_err(|e| ConvoError::Internal(e.to_string()))?;
        self.next_chunk_start = chunk_start + bytes.len() as u64;
        debug!(descriptor = ?self.descriptor_id, next = self.next_chunk_start, "chunk appended");
        if self.next_chunk_start >= self.expected_length {
            Ok(self.expected_length as i64)
        } else {
            Ok(self.next_chunk_start as i64)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.next_chunk_start >= self.expected_length
    }

    /// Receive-side failure (no space, descriptor missing): delete the
    /// partial file before descriptor removal.
    pub async fn abort_and_cleanup(mut self) {
        self.file.take();
        let _ = tokio::fs::remove_file(&self.dest).await;
    }
}

/// Thumbnail sidecar path: `<sequence>-thumbnail.jpg` under the
/// peer-outbound-id directory.
pub fn thumbnail_path(conversation_dir: &std::path::Path, sequence_id: u64) -> PathBuf {
    conversation_dir.join(format!("{sequence_id}-thumbnail.jpg"))
}

/// One in-flight outgoing transfer per descriptor, so a chunk-ack handler
/// can find the right cursor without the caller threading it through by
/// hand.
#[derive(Default)]
pub struct TransferRegistry {
    outgoing: DashMap<DescriptorId, Mutex<OutgoingTransfer>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_outgoing(&self, transfer: OutgoingTransfer) {
        self.outgoing.insert(transfer.descriptor_id, Mutex::new(transfer));
    }

    /// Applies an `OnPushFileChunk` ack: advances the transfer's cursor and
    /// returns the RTT sample so the caller can feed it into the
    /// connection's estimator. Returns `None` for an unknown descriptor or
    /// one whose transfer carries no timed chunk to measure.
    pub async fn acknowledge_outgoing(
        &self,
        descriptor_id: DescriptorId,
        next_chunk_start: i64,
    ) -> Option<Duration> {
        let entry = self.outgoing.get(&descriptor_id)?;
        let sample = entry.lock().await.acknowledge(next_chunk_start);
        if entry.lock().await.is_complete() {
            drop(entry);
            self.outgoing.remove(&descriptor_id);
        }
        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::TwincodeId;

    fn descriptor_id() -> DescriptorId {
        DescriptorId {
            database_id: 1,
            sender: TwincodeId::new_random(),
            sequence_id: 1,
        }
    }

    #[tokio::test]
    async fn incoming_transfer_writes_exact_bytes_and_reports_completion() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        let mut transfer = IncomingTransfer::new(descriptor_id(), dest.clone(), 10);
        let next = transfer.append(0, &[1u8; 10]).await.unwrap();
        assert_eq!(next, 10);
        assert!(transfer.is_complete());
        let contents = tokio::fs::read(&dest).await.unwrap();
        assert_eq!(contents, vec![1u8; 10]);
    }

    #[tokio::test]
    async fn out_of_order_chunk_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        let mut transfer = IncomingTransfer::new(descriptor_id(), dest, 20);
        let result = transfer.append(10, &[0u8; 5]).await;
        assert!(matches!(result, Err(ConvoError::ChunkOutOfOrder { .. })));
    }

    #[tokio::test]
    async fn abort_sentinel_marks_outgoing_transfer_done() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("src.bin");
        tokio::fs::write(&file, vec![0u8; 10]).await.unwrap();
        let mut transfer = OutgoingTransfer::new(descriptor_id(), file, 10);
        transfer.acknowledge(ABORT_CHUNK_START);
        assert!(transfer.is_complete());
    }

    #[tokio::test]
    async fn registry_reports_an_rtt_sample_on_ack_after_a_read_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("src.bin");
        tokio::fs::write(&file, vec![0u8; 20]).await.unwrap();
        let id = descriptor_id();
        let mut transfer = OutgoingTransfer::new(id, file, 20);
        transfer.next_chunk().await.unwrap();

        let registry = TransferRegistry::new();
        registry.start_outgoing(transfer);
        let sample = registry.acknowledge_outgoing(id, 10).await;
        assert!(sample.is_some());
    }

    #[tokio::test]
    async fn registry_reports_no_sample_for_an_unknown_descriptor() {
        let registry = TransferRegistry::new();
        let sample = registry.acknowledge_outgoing(descriptor_id(), 10).await;
        assert!(sample.is_none());
    }
}
