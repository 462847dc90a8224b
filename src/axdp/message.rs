//! AXDP message decode/encode (spec §4.2, §6).

use super::tlv::{encode_tlv, parse_tlvs};
use byteorder::{BigEndian, ByteOrder};

/// The 4-byte literal every AXDP message begins with.
pub const MAGIC: &[u8; 4] = b"AXT1";

pub fn has_magic(buf: &[u8]) -> bool {
    buf.len() >= 4 && &buf[..4] == MAGIC
}

// Stable TLV type codes (spec §4.2).
mod ty {
    pub const MESSAGE_TYPE: u8 = 0x01;
    pub const SESSION_ID: u8 = 0x02;
    pub const MESSAGE_ID: u8 = 0x03;
    pub const CHUNK_INDEX: u8 = 0x04;
    pub const TOTAL_CHUNKS: u8 = 0x05;
    pub const PAYLOAD: u8 = 0x06;
    pub const PAYLOAD_CRC32: u8 = 0x07;
    pub const SACK_BITMAP: u8 = 0x08;
    pub const CAPABILITIES: u8 = 0x09;
    pub const FILE_META: u8 = 0x0A;
    pub const COMPRESSION: u8 = 0x0B;
    pub const TRANSFER_METRICS: u8 = 0x0C;
    pub const ACKED_MESSAGE_ID: u8 = 0x0D;
}

/// Compression algorithm tag carried in FILE_META / FILE_CHUNK TLVs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lz4,
    Deflate,
}

impl Compression {
    fn to_byte(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Lz4 => 1,
            Compression::Deflate => 2,
        }
    }
    fn from_byte(b: u8) -> Self {
        match b {
            1 => Compression::Lz4,
            2 => Compression::Deflate,
            _ => Compression::None,
        }
    }
}

/// File metadata record (spec §3 "File-meta record").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub filename: String,
    pub file_size: u64,
    pub sha256: [u8; 32],
    pub chunk_size: u16,
    pub description: Option<String>,
}

/// Capability record (spec §3 "Capability record").
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub max_protocol_version: u8,
    pub compression_algorithms: Vec<Compression>,
    pub max_chunk_size: u16,
}

/// Transfer metrics (spec §4.4 "Transfer metrics").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferMetrics {
    pub total_bytes: u64,
    pub duration_seconds: f64,
    pub original_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub algorithm: Option<Compression>,
}

impl TransferMetrics {
    pub fn ratio(&self) -> Option<f64> {
        match (self.original_size, self.compressed_size) {
            (Some(o), Some(c)) if o > 0 => Some(c as f64 / o as f64),
            _ => None,
        }
    }
    pub fn savings_percent(&self) -> Option<f64> {
        self.ratio().map(|r| (1.0 - r) * 100.0)
    }
    pub fn effective_bytes_per_sec(&self) -> f64 {
        if self.duration_seconds > 0.0 {
            self.total_bytes as f64 / self.duration_seconds
        } else {
            0.0
        }
    }
}

/// The AXDP sum type over all message kinds (spec §3 "AXDP message").
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Chat {
        session_id: u32,
        message_id: u32,
        payload: Vec<u8>,
    },
    FileMeta {
        session_id: u32,
        message_id: u32,
        meta: FileMeta,
        total_chunks: u32,
        compression: Compression,
    },
    FileChunk {
        session_id: u32,
        message_id: u32,
        chunk_index: u32,
        total_chunks: u32,
        payload: Vec<u8>,
        payload_crc32: u32,
        compression: Compression,
    },
    Ack {
        session_id: u32,
        message_id: u32,
        acked_message_id: u32,
        sack: Option<Vec<u8>>,
    },
    Nack {
        session_id: u32,
        message_id: u32,
        acked_message_id: u32,
        sack: Option<Vec<u8>>,
    },
    Ping {
        session_id: u32,
        message_id: u32,
        capabilities: Option<Capabilities>,
    },
    Pong {
        session_id: u32,
        message_id: u32,
        capabilities: Option<Capabilities>,
    },
    PeerAxdpEnabled {
        session_id: u32,
        message_id: u32,
        capabilities: Option<Capabilities>,
    },
}

impl Message {
    pub fn session_id(&self) -> u32 {
        match self {
            Message::Chat { session_id, .. }
            | Message::FileMeta { session_id, .. }
            | Message::FileChunk { session_id, .. }
            | Message::Ack { session_id, .. }
            | Message::Nack { session_id, .. }
            | Message::Ping { session_id, .. }
            | Message::Pong { session_id, .. }
            | Message::PeerAxdpEnabled { session_id, .. } => *session_id,
        }
    }

    pub fn message_id(&self) -> u32 {
        match self {
            Message::Chat { message_id, .. }
            | Message::FileMeta { message_id, .. }
            | Message::FileChunk { message_id, .. }
            | Message::Ack { message_id, .. }
            | Message::Nack { message_id, .. }
            | Message::Ping { message_id, .. }
            | Message::Pong { message_id, .. }
            | Message::PeerAxdpEnabled { message_id, .. } => *message_id,
        }
    }

    /// Encode this message to its on-wire AXDP form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        let mut tlvs = Vec::new();

        macro_rules! u32_tlv {
            ($t:expr, $v:expr) => {{
                let mut b = [0u8; 4];
                BigEndian::write_u32(&mut b, $v);
                encode_tlv($t, &b, &mut tlvs);
            }};
        }

        match self {
            Message::Chat {
                session_id,
                message_id,
                payload,
            } => {
                encode_tlv(ty::MESSAGE_TYPE, &[0], &mut tlvs);
                u32_tlv!(ty::SESSION_ID, *session_id);
                u32_tlv!(ty::MESSAGE_ID, *message_id);
                encode_tlv(ty::PAYLOAD, payload, &mut tlvs);
            }
            Message::FileMeta {
                session_id,
                message_id,
                meta,
                total_chunks,
                compression,
            } => {
                encode_tlv(ty::MESSAGE_TYPE, &[1], &mut tlvs);
                u32_tlv!(ty::SESSION_ID, *session_id);
                u32_tlv!(ty::MESSAGE_ID, *message_id);
                u32_tlv!(ty::TOTAL_CHUNKS, *total_chunks);
                encode_tlv(ty::COMPRESSION, &[compression.to_byte()], &mut tlvs);
                encode_tlv(ty::FILE_META, &encode_file_meta(meta), &mut tlvs);
            }
            Message::FileChunk {
                session_id,
                message_id,
                chunk_index,
                total_chunks,
                payload,
                payload_crc32,
                compression,
            } => {
                encode_tlv(ty::MESSAGE_TYPE, &[2], &mut tlvs);
                u32_tlv!(ty::SESSION_ID, *session_id);
                u32_tlv!(ty::MESSAGE_ID, *message_id);
                u32_tlv!(ty::CHUNK_INDEX, *chunk_index);
                u32_tlv!(ty::TOTAL_CHUNKS, *total_chunks);
                encode_tlv(ty::PAYLOAD, payload, &mut tlvs);
                let mut crc_buf = [0u8; 4];
                BigEndian::write_u32(&mut crc_buf, *payload_crc32);
                encode_tlv(ty::PAYLOAD_CRC32, &crc_buf, &mut tlvs);
                encode_tlv(ty::COMPRESSION, &[compression.to_byte()], &mut tlvs);
            }
            Message::Ack {
                session_id,
                message_id,
                acked_message_id,
                sack,
            } => {
                encode_tlv(ty::MESSAGE_TYPE, &[3], &mut tlvs);
                u32_tlv!(ty::SESSION_ID, *session_id);
                u32_tlv!(ty::MESSAGE_ID, *message_id);
                u32_tlv!(ty::ACKED_MESSAGE_ID, *acked_message_id);
                if let Some(bits) = sack {
                    encode_tlv(ty::SACK_BITMAP, bits, &mut tlvs);
                }
            }
            Message::Nack {
                session_id,
                message_id,
                acked_message_id,
                sack,
            } => {
                encode_tlv(ty::MESSAGE_TYPE, &[4], &mut tlvs);
                u32_tlv!(ty::SESSION_ID, *session_id);
                u32_tlv!(ty::MESSAGE_ID, *message_id);
                u32_tlv!(ty::ACKED_MESSAGE_ID, *acked_message_id);
                if let Some(bits) = sack {
                    encode_tlv(ty::SACK_BITMAP, bits, &mut tlvs);
                }
            }
            Message::Ping {
                session_id,
                message_id,
                capabilities,
            } => {
                encode_tlv(ty::MESSAGE_TYPE, &[5], &mut tlvs);
                u32_tlv!(ty::SESSION_ID, *session_id);
                u32_tlv!(ty::MESSAGE_ID, *message_id);
                if let Some(caps) = capabilities {
                    encode_tlv(ty::CAPABILITIES, &encode_capabilities(caps), &mut tlvs);
                }
            }
            Message::Pong {
                session_id,
                message_id,
                capabilities,
            } => {
                encode_tlv(ty::MESSAGE_TYPE, &[6], &mut tlvs);
                u32_tlv!(ty::SESSION_ID, *session_id);
                u32_tlv!(ty::MESSAGE_ID, *message_id);
                if let Some(caps) = capabilities {
                    encode_tlv(ty::CAPABILITIES, &encode_capabilities(caps), &mut tlvs);
                }
            }
            Message::PeerAxdpEnabled {
                session_id,
                message_id,
                capabilities,
            } => {
                encode_tlv(ty::MESSAGE_TYPE, &[7], &mut tlvs);
                u32_tlv!(ty::SESSION_ID, *session_id);
                u32_tlv!(ty::MESSAGE_ID, *message_id);
                if let Some(caps) = capabilities {
                    encode_tlv(ty::CAPABILITIES, &encode_capabilities(caps), &mut tlvs);
                }
            }
        }

        out.extend_from_slice(&tlvs);
        out
    }

    /// Decode one complete message from the front of `buf`.
    ///
    /// Returns `None` whenever the buffer does not yet hold a full message
    /// (incomplete or truncated input never yields a partial success — spec
    /// §4.2 and invariant 2). On success, also returns the number of bytes
    /// consumed so the caller can slice the reassembly buffer.
    pub fn decode(buf: &[u8]) -> Option<(Message, usize)> {
        if !has_magic(buf) {
            return None;
        }
        let (tlvs, consumed) = parse_tlvs(&buf[4..]);
        let total_consumed = 4 + consumed;

        let message_type = tlvs
            .iter()
            .find(|t| t.ty == ty::MESSAGE_TYPE)
            .and_then(|t| t.value.first().copied())?;

        let find_u32 = |code: u8| -> Option<u32> {
            tlvs.iter()
                .find(|t| t.ty == code)
                .filter(|t| t.value.len() == 4)
                .map(|t| BigEndian::read_u32(&t.value))
        };
        let find_raw = |code: u8| -> Option<&Vec<u8>> {
            tlvs.iter().find(|t| t.ty == code).map(|t| &t.value)
        };

        let session_id = find_u32(ty::SESSION_ID)?;
        let message_id = find_u32(ty::MESSAGE_ID)?;

        let message = match message_type {
            0 => Message::Chat {
                session_id,
                message_id,
                payload: find_raw(ty::PAYLOAD)?.clone(),
            },
            1 => {
                let total_chunks = find_u32(ty::TOTAL_CHUNKS)?;
                let compression = find_raw(ty::COMPRESSION)
                    .and_then(|v| v.first().copied())
                    .map(Compression::from_byte)
                    .unwrap_or(Compression::None);
                let meta = decode_file_meta(find_raw(ty::FILE_META)?)?;
                Message::FileMeta {
                    session_id,
                    message_id,
                    meta,
                    total_chunks,
                    compression,
                }
            }
            2 => {
                let chunk_index = find_u32(ty::CHUNK_INDEX)?;
                let total_chunks = find_u32(ty::TOTAL_CHUNKS)?;
                if chunk_index >= total_chunks {
                    return None;
                }
                let payload = find_raw(ty::PAYLOAD)?.clone();
                let crc_bytes = find_raw(ty::PAYLOAD_CRC32)?;
                if crc_bytes.len() != 4 {
                    return None;
                }
                let payload_crc32 = BigEndian::read_u32(crc_bytes);
                let compression = find_raw(ty::COMPRESSION)
                    .and_then(|v| v.first().copied())
                    .map(Compression::from_byte)
                    .unwrap_or(Compression::None);
                Message::FileChunk {
                    session_id,
                    message_id,
                    chunk_index,
                    total_chunks,
                    payload,
                    payload_crc32,
                    compression,
                }
            }
            3 => Message::Ack {
                session_id,
                message_id,
                acked_message_id: find_u32(ty::ACKED_MESSAGE_ID)?,
                sack: find_raw(ty::SACK_BITMAP).cloned(),
            },
            4 => Message::Nack {
                session_id,
                message_id,
                acked_message_id: find_u32(ty::ACKED_MESSAGE_ID)?,
                sack: find_raw(ty::SACK_BITMAP).cloned(),
            },
            5 => Message::Ping {
                session_id,
                message_id,
                capabilities: find_raw(ty::CAPABILITIES).and_then(|v| decode_capabilities(v)),
            },
            6 => Message::Pong {
                session_id,
                message_id,
                capabilities: find_raw(ty::CAPABILITIES).and_then(|v| decode_capabilities(v)),
            },
            7 => Message::PeerAxdpEnabled {
                session_id,
                message_id,
                capabilities: find_raw(ty::CAPABILITIES).and_then(|v| decode_capabilities(v)),
            },
            _ => return None,
        };

        Some((message, total_consumed))
    }
}

fn encode_file_meta(meta: &FileMeta) -> Vec<u8> {
    let mut out = Vec::new();
    let name_bytes = meta.filename.as_bytes();
    let mut len_buf = [0u8; 2];
    BigEndian::write_u16(&mut len_buf, name_bytes.len() as u16);
    out.extend_from_slice(&len_buf);
    out.extend_from_slice(name_bytes);
    let mut size_buf = [0u8; 8];
    BigEndian::write_u64(&mut size_buf, meta.file_size);
    out.extend_from_slice(&size_buf);
    out.extend_from_slice(&meta.sha256);
    let mut chunk_buf = [0u8; 2];
    BigEndian::write_u16(&mut chunk_buf, meta.chunk_size);
    out.extend_from_slice(&chunk_buf);
    match &meta.description {
        Some(d) => {
            out.push(1);
            let db = d.as_bytes();
            let mut dl = [0u8; 2];
            BigEndian::write_u16(&mut dl, db.len() as u16);
            out.extend_from_slice(&dl);
            out.extend_from_slice(db);
        }
        None => out.push(0),
    }
    out
}

fn decode_file_meta(buf: &[u8]) -> Option<FileMeta> {
    if buf.len() < 2 {
        return None;
    }
    let name_len = BigEndian::read_u16(&buf[0..2]) as usize;
    let mut offset = 2;
    if buf.len() < offset + name_len {
        return None;
    }
    let filename = String::from_utf8(buf[offset..offset + name_len].to_vec()).ok()?;
    offset += name_len;
    if buf.len() < offset + 8 + 32 + 2 + 1 {
        return None;
    }
    let file_size = BigEndian::read_u64(&buf[offset..offset + 8]);
    offset += 8;
    let mut sha256 = [0u8; 32];
    sha256.copy_from_slice(&buf[offset..offset + 32]);
    offset += 32;
    let chunk_size = BigEndian::read_u16(&buf[offset..offset + 2]);
    offset += 2;
    let has_desc = buf[offset];
    offset += 1;
    let description = if has_desc == 1 {
        if buf.len() < offset + 2 {
            return None;
        }
        let dl = BigEndian::read_u16(&buf[offset..offset + 2]) as usize;
        offset += 2;
        if buf.len() < offset + dl {
            return None;
        }
        Some(String::from_utf8(buf[offset..offset + dl].to_vec()).ok()?)
    } else {
        None
    };
    Some(FileMeta {
        filename,
        file_size,
        sha256,
        chunk_size,
        description,
    })
}

fn encode_capabilities(caps: &Capabilities) -> Vec<u8> {
    let mut out = vec![caps.max_protocol_version];
    out.push(caps.compression_algorithms.len() as u8);
    for alg in &caps.compression_algorithms {
        out.push(alg.to_byte());
    }
    let mut mcs = [0u8; 2];
    BigEndian::write_u16(&mut mcs, caps.max_chunk_size);
    out.extend_from_slice(&mcs);
    out
}

fn decode_capabilities(buf: &[u8]) -> Option<Capabilities> {
    if buf.is_empty() {
        return None;
    }
    let max_protocol_version = buf[0];
    let count = *buf.get(1)? as usize;
    let mut offset = 2;
    let mut compression_algorithms = Vec::with_capacity(count);
    for _ in 0..count {
        compression_algorithms.push(Compression::from_byte(*buf.get(offset)?));
        offset += 1;
    }
    if buf.len() < offset + 2 {
        return None;
    }
    let max_chunk_size = BigEndian::read_u16(&buf[offset..offset + 2]);
    Some(Capabilities {
        max_protocol_version,
        compression_algorithms,
        max_chunk_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_round_trips() {
        let msg = Message::Chat {
            session_id: 1,
            message_id: 2,
            payload: b"hello".to_vec(),
        };
        let wire = msg.encode();
        let (decoded, consumed) = Message::decode(&wire).unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn file_meta_round_trips_with_description() {
        let meta = FileMeta {
            filename: "photo.png".into(),
            file_size: 12345,
            sha256: [7u8; 32],
            chunk_size: 128,
            description: Some("a photo".into()),
        };
        let msg = Message::FileMeta {
            session_id: 9,
            message_id: 1,
            meta: meta.clone(),
            total_chunks: 10,
            compression: Compression::Lz4,
        };
        let wire = msg.encode();
        let (decoded, _) = Message::decode(&wire).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn truncated_prefix_never_decodes() {
        let msg = Message::Chat {
            session_id: 1,
            message_id: 2,
            payload: b"hello world, this is a longer payload".to_vec(),
        };
        let wire = msg.encode();
        for cut in 1..wire.len() {
            assert!(
                Message::decode(&wire[..cut]).is_none(),
                "prefix of length {cut} unexpectedly decoded"
            );
        }
    }

    #[test]
    fn short_input_has_no_magic() {
        assert!(!has_magic(b"AX"));
    }

    #[test]
    fn file_chunk_requires_index_less_than_total() {
        let msg = Message::FileChunk {
            session_id: 1,
            message_id: 1,
            chunk_index: 5,
            total_chunks: 5,
            payload: vec![1, 2, 3],
            payload_crc32: crate::ax25::crc32(&[1, 2, 3]),
            compression: Compression::None,
        };
        let wire = msg.encode();
        assert!(Message::decode(&wire).is_none());
    }
}
