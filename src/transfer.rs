//! AXDP reassembly and file-transfer engine (spec §3 "Transfer", §4.4, §5).

use crate::ax25::crc32;
use crate::axdp::{Compression, FileMeta, Message, SackBitmap, TransferMetrics};
use crate::clock::Clock;
use crate::compression::{self, PER_FILE_MAX_DECOMPRESSED, PER_MESSAGE_MAX_DECOMPRESSED};
use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::SystemTime;

/// Inbound state for one file transfer keyed by `(session_id, message_id)`
/// of its `FileMeta` (spec §3 "Inbound transfer state").
pub struct InboundTransfer {
    pub meta: FileMeta,
    pub total_chunks: u32,
    pub compression: Compression,
    chunks: HashMap<u32, Vec<u8>>,
    pub started_at: SystemTime,
}

impl InboundTransfer {
    pub fn new(meta: FileMeta, total_chunks: u32, compression: Compression, now: SystemTime) -> Self {
        Self {
            meta,
            total_chunks,
            compression,
            chunks: HashMap::new(),
            started_at: now,
        }
    }

    /// Accept one file chunk after verifying its CRC32 (spec invariant 6).
    /// Returns `Err(Integrity)` on a CRC mismatch; the chunk is discarded
    /// either way on mismatch, never stored.
    pub fn accept_chunk(
        &mut self,
        chunk_index: u32,
        payload: Vec<u8>,
        payload_crc32: u32,
    ) -> Result<()> {
        if chunk_index >= self.total_chunks {
            return Err(Error::Transfer(format!(
                "chunk index {chunk_index} out of range for {} total chunks",
                self.total_chunks
            )));
        }
        if crc32(&payload) != payload_crc32 {
            log::warn!("chunk {chunk_index} failed CRC32 check, discarding");
            return Err(Error::Integrity(format!(
                "chunk {chunk_index} failed CRC32 check"
            )));
        }
        self.chunks.insert(chunk_index, payload);
        Ok(())
    }

    pub fn received_count(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.chunks.len() as u32 == self.total_chunks
    }

    pub fn sack(&self, base_chunk: u32, window_size: u32) -> SackBitmap {
        let mut sack = SackBitmap::new(base_chunk, window_size);
        for i in 0..window_size {
            let chunk = base_chunk + i;
            if self.chunks.contains_key(&chunk) {
                sack.mark_received(chunk);
            }
        }
        sack
    }

    /// Concatenate all chunks in order, decompress, and verify the whole-file
    /// SHA-256 (spec §4.4). Fails closed: any missing chunk, decompression
    /// bound violation, or digest mismatch is an error, never a partial file.
    pub fn finish(&self) -> Result<Vec<u8>> {
        if !self.is_complete() {
            return Err(Error::Transfer(format!(
                "transfer incomplete: {}/{} chunks",
                self.received_count(),
                self.total_chunks
            )));
        }
        let mut joined = Vec::with_capacity(self.meta.file_size as usize);
        for i in 0..self.total_chunks {
            let chunk = self
                .chunks
                .get(&i)
                .ok_or_else(|| Error::Transfer(format!("missing chunk {i}")))?;
            joined.extend_from_slice(chunk);
        }

        let data = match self.compression {
            Compression::None => joined,
            alg => compression::decompress(
                &joined,
                alg,
                self.meta.file_size as usize,
                PER_FILE_MAX_DECOMPRESSED,
            )
            .ok_or_else(|| {
                Error::ResourceBound("whole-file decompression exceeded bound".into())
            })?,
        };

        if data.len() as u64 != self.meta.file_size {
            return Err(Error::Integrity(format!(
                "decompressed size {} does not match announced {}",
                data.len(),
                self.meta.file_size
            )));
        }
        let digest: [u8; 32] = Sha256::digest(&data).into();
        if digest != self.meta.sha256 {
            return Err(Error::Integrity("sha256 mismatch on completed file".into()));
        }
        Ok(data)
    }
}

/// Outbound transfer lifecycle (spec §5 pause/resume/cancel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundState {
    AwaitingAcceptance,
    Sending,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

/// Outbound file-send state for one transfer (spec §3 "Outbound transfer
/// state", §4.4).
pub struct OutboundTransfer {
    pub state: OutboundState,
    pub meta: FileMeta,
    pub compression: Compression,
    chunks: Vec<Vec<u8>>,
    acked: Vec<bool>,
    started_at: SystemTime,
    bytes_sent_uncompressed: u64,
}

impl OutboundTransfer {
    /// Split `data` (already the original, uncompressed file content) into
    /// fixed-size chunks after optionally compressing the whole file, per
    /// the compression contract in spec §4.4.
    pub fn prepare(
        filename: String,
        data: &[u8],
        chunk_size: u16,
        preferred: Compression,
        now: SystemTime,
    ) -> Self {
        let digest: [u8; 32] = Sha256::digest(data).into();
        let (wire_bytes, compression) = match preferred {
            Compression::None => (data.to_vec(), Compression::None),
            alg => match compression::compress(data, alg) {
                Some(c) => (c, alg),
                None => (data.to_vec(), Compression::None),
            },
        };
        let chunks: Vec<Vec<u8>> = wire_bytes
            .chunks(chunk_size.max(1) as usize)
            .map(|c| c.to_vec())
            .collect();
        let n = chunks.len();
        Self {
            state: OutboundState::AwaitingAcceptance,
            meta: FileMeta {
                filename,
                file_size: data.len() as u64,
                sha256: digest,
                chunk_size,
                description: None,
            },
            compression,
            chunks,
            acked: vec![false; n],
            started_at: now,
            bytes_sent_uncompressed: 0,
        }
    }

    pub fn total_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn chunk(&self, index: u32) -> Option<(&[u8], u32)> {
        self.chunks
            .get(index as usize)
            .map(|c| (c.as_slice(), crc32(c)))
    }

    pub fn accept(&mut self) {
        if self.state == OutboundState::AwaitingAcceptance {
            self.state = OutboundState::Sending;
        }
    }

    pub fn pause(&mut self) {
        if self.state == OutboundState::Sending {
            self.state = OutboundState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state == OutboundState::Paused {
            self.state = OutboundState::Sending;
        }
    }

    pub fn cancel(&mut self) {
        self.state = OutboundState::Cancelled;
    }

    /// Apply a received SACK bitmap, marking acked chunks, and report
    /// whether every chunk is now acknowledged.
    pub fn apply_sack(&mut self, sack: &SackBitmap) -> bool {
        for i in 0..self.chunks.len() as u32 {
            if sack.is_received(i) {
                if !self.acked[i as usize] {
                    self.bytes_sent_uncompressed += self.chunks[i as usize].len() as u64;
                }
                self.acked[i as usize] = true;
            }
        }
        let done = self.acked.iter().all(|&a| a);
        if done {
            self.state = OutboundState::Completed;
        }
        done
    }

    pub fn unacked_chunks(&self) -> Vec<u32> {
        self.acked
            .iter()
            .enumerate()
            .filter(|(_, &acked)| !acked)
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Metrics for a completed or in-progress transfer (spec §4.4 "Transfer
    /// metrics").
    pub fn metrics(&self, clock: &dyn Clock) -> TransferMetrics {
        let duration = clock
            .now()
            .duration_since(self.started_at)
            .unwrap_or_default();
        let compressed_size = self.chunks.iter().map(|c| c.len() as u64).sum::<u64>();
        TransferMetrics {
            total_bytes: self.meta.file_size,
            duration_seconds: duration.as_secs_f64(),
            original_size: Some(self.meta.file_size),
            compressed_size: if self.compression == Compression::None {
                None
            } else {
                Some(compressed_size)
            },
            algorithm: Some(self.compression),
        }
    }
}

/// Build the outbound `Message` sequence for a prepared transfer's
/// `FileMeta` announcement (spec §4.4).
pub fn file_meta_message(session_id: u32, message_id: u32, t: &OutboundTransfer) -> Message {
    Message::FileMeta {
        session_id,
        message_id,
        meta: t.meta.clone(),
        total_chunks: t.total_chunks(),
        compression: t.compression,
    }
}

/// Build one outbound `FileChunk` message for chunk `index` of `t`.
pub fn file_chunk_message(
    session_id: u32,
    message_id: u32,
    index: u32,
    t: &OutboundTransfer,
) -> Option<Message> {
    let (payload, crc) = t.chunk(index)?;
    Some(Message::FileChunk {
        session_id,
        message_id,
        chunk_index: index,
        total_chunks: t.total_chunks(),
        payload: payload.to_vec(),
        payload_crc32: crc,
        compression: t.compression,
    })
}

/// Bound on a single in-flight reassembly's decompression, as distinct from
/// the whole-file bound (spec §4.4): re-exported here for callers that
/// reassemble arbitrary (non-file) AXDP payloads.
pub const MESSAGE_DECOMPRESSION_BOUND: usize = PER_MESSAGE_MAX_DECOMPRESSED;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use std::time::{Duration, UNIX_EPOCH};

    fn sample_file() -> Vec<u8> {
        b"The quick brown fox jumps over the lazy dog. "
            .iter()
            .cycle()
            .take(24_500)
            .copied()
            .collect()
    }

    #[test]
    fn outbound_inbound_round_trip_with_lz4() {
        let data = sample_file();
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let out = OutboundTransfer::prepare("notes.txt".into(), &data, 128, Compression::Lz4, now);
        assert_eq!(out.compression, Compression::Lz4);

        let mut inbound =
            InboundTransfer::new(out.meta.clone(), out.total_chunks(), out.compression, now);
        for i in 0..out.total_chunks() {
            let (payload, crc) = out.chunk(i).unwrap();
            inbound.accept_chunk(i, payload.to_vec(), crc).unwrap();
        }
        assert!(inbound.is_complete());
        let restored = inbound.finish().unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn chunk_with_bad_crc_is_rejected() {
        let now = UNIX_EPOCH;
        let meta = FileMeta {
            filename: "f".into(),
            file_size: 3,
            sha256: [0u8; 32],
            chunk_size: 3,
            description: None,
        };
        let mut inbound = InboundTransfer::new(meta, 1, Compression::None, now);
        let err = inbound.accept_chunk(0, vec![1, 2, 3], 0xDEAD_BEEF).unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
        assert_eq!(inbound.received_count(), 0);
    }

    #[test]
    fn finish_fails_when_decompressed_size_exceeds_per_file_bound() {
        let now = UNIX_EPOCH;
        let meta = FileMeta {
            filename: "huge.bin".into(),
            file_size: (PER_FILE_MAX_DECOMPRESSED + 1) as u64,
            sha256: [0u8; 32],
            chunk_size: 128,
            description: None,
        };
        let mut inbound = InboundTransfer::new(meta, 1, Compression::Lz4, now);
        let payload = vec![0u8; 16];
        let crc = crc32(&payload);
        inbound.accept_chunk(0, payload, crc).unwrap();
        let err = inbound.finish().unwrap_err();
        assert!(matches!(err, Error::ResourceBound(_)));
    }

    #[test]
    fn sack_driven_retransmission_identifies_missing_chunks() {
        let data = vec![7u8; 1000];
        let now = UNIX_EPOCH;
        let mut out = OutboundTransfer::prepare("d.bin".into(), &data, 100, Compression::None, now);
        out.accept();
        let mut sack = SackBitmap::new(0, out.total_chunks());
        sack.mark_received(0);
        sack.mark_received(2);
        out.apply_sack(&sack);
        let missing = out.unacked_chunks();
        assert!(missing.contains(&1));
        assert!(!missing.contains(&0));
        assert_ne!(out.state, OutboundState::Completed);
    }

    #[test]
    fn pause_resume_and_cancel_transition_state() {
        let data = vec![1u8; 10];
        let now = UNIX_EPOCH;
        let mut out = OutboundTransfer::prepare("x".into(), &data, 5, Compression::None, now);
        out.accept();
        assert_eq!(out.state, OutboundState::Sending);
        out.pause();
        assert_eq!(out.state, OutboundState::Paused);
        out.resume();
        assert_eq!(out.state, OutboundState::Sending);
        out.cancel();
        assert_eq!(out.state, OutboundState::Cancelled);
    }

    #[test]
    fn metrics_report_compression_savings() {
        let data = sample_file();
        let now = UNIX_EPOCH;
        let clock = FakeClock::at(now);
        let mut out = OutboundTransfer::prepare("f".into(), &data, 128, Compression::Lz4, now);
        let sack_full = {
            let mut s = SackBitmap::new(0, out.total_chunks());
            for i in 0..out.total_chunks() {
                s.mark_received(i);
            }
            s
        };
        clock.advance(Duration::from_secs(2));
        out.apply_sack(&sack_full);
        let metrics = out.metrics(&clock);
        assert_eq!(metrics.total_bytes, data.len() as u64);
        assert!(metrics.savings_percent().unwrap() > 0.0);
    }
}
