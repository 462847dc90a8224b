//! Raw TLV encoding shared by the AXDP codec (spec §4.2, §6).
//!
//! `type(1) | length(2, big-endian) | value(length bytes)`. Unknown types
//! are preserved verbatim so a round-trip never drops data (forward
//! compatibility).

use byteorder::{BigEndian, ByteOrder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTlv {
    pub ty: u8,
    pub value: Vec<u8>,
}

pub fn encode_tlv(ty: u8, value: &[u8], out: &mut Vec<u8>) {
    out.push(ty);
    let mut len_buf = [0u8; 2];
    BigEndian::write_u16(&mut len_buf, value.len() as u16);
    out.extend_from_slice(&len_buf);
    out.extend_from_slice(value);
}

/// Parse every complete TLV in `buf`. Stops cleanly (without error) on
/// truncation, returning whatever was parsed before the cut — callers
/// combine this with a completeness check over total consumed length.
pub fn parse_tlvs(buf: &[u8]) -> (Vec<RawTlv>, usize) {
    let mut tlvs = Vec::new();
    let mut offset = 0;
    loop {
        if offset + 3 > buf.len() {
            break;
        }
        let ty = buf[offset];
        let len = BigEndian::read_u16(&buf[offset + 1..offset + 3]) as usize;
        if offset + 3 + len > buf.len() {
            break;
        }
        let value = buf[offset + 3..offset + 3 + len].to_vec();
        tlvs.push(RawTlv { ty, value });
        offset += 3 + len;
    }
    (tlvs, offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_parse_round_trips() {
        let mut buf = Vec::new();
        encode_tlv(1, b"abc", &mut buf);
        encode_tlv(2, b"", &mut buf);
        let (tlvs, consumed) = parse_tlvs(&buf);
        assert_eq!(consumed, buf.len());
        assert_eq!(tlvs.len(), 2);
        assert_eq!(tlvs[0], RawTlv { ty: 1, value: b"abc".to_vec() });
        assert_eq!(tlvs[1], RawTlv { ty: 2, value: vec![] });
    }

    #[test]
    fn truncated_value_stops_cleanly() {
        let mut buf = Vec::new();
        encode_tlv(1, b"hello", &mut buf);
        buf.truncate(buf.len() - 2); // cut into the value
        let (tlvs, consumed) = parse_tlvs(&buf);
        assert!(tlvs.is_empty());
        assert_eq!(consumed, 0);
    }
}
