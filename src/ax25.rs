//! AX.25 address/control framing and CRC32 (spec §4.1, §6).

use crate::address::{Address, DigiPath};
use crc::{Crc, CRC_32_ISO_HDLC};

/// IEEE 802.3 CRC32 (poly 0xEDB88320, init/final xor 0xFFFFFFFF), used only
/// to validate AXDP `FILE_CHUNK` payloads (spec §4.1).
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Supervisory subtype (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SFrameKind {
    Rr,
    Rnr,
    Rej,
    Srej,
}

/// Unnumbered subtype (spec §4.1). Unknown values decode as `Unknown`
/// rather than failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UFrameKind {
    Sabm,
    Sabme,
    Disc,
    Dm,
    Ua,
    Ui,
    Frmr,
    Unknown(u8),
}

/// A decoded AX.25 control field (modulo-8 profile, spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    I { ns: u8, nr: u8, poll: bool },
    S { kind: SFrameKind, nr: u8, poll_final: bool },
    U { kind: UFrameKind, poll_final: bool },
}

impl Control {
    /// Decode one control byte. Never fails: an unrecognized U-frame
    /// pattern becomes `UFrameKind::Unknown` (spec §4.1).
    pub fn decode(byte: u8) -> Self {
        if byte & 0x01 == 0 {
            let ns = (byte >> 1) & 0x07;
            let poll = byte & 0x10 != 0;
            let nr = (byte >> 5) & 0x07;
            return Control::I { ns, nr, poll };
        }
        if byte & 0x03 == 0x01 {
            let subtype = (byte >> 2) & 0x03;
            let kind = match subtype {
                0b00 => SFrameKind::Rr,
                0b01 => SFrameKind::Rnr,
                0b10 => SFrameKind::Rej,
                _ => SFrameKind::Srej,
            };
            let poll_final = byte & 0x10 != 0;
            let nr = (byte >> 5) & 0x07;
            return Control::S { kind, nr, poll_final };
        }
        // U-frame: bits 2-3 and 5-7 identify the subtype, bit 4 is P/F.
        let poll_final = byte & 0x10 != 0;
        let masked = byte & !0x10;
        let kind = match masked {
            0x2F => UFrameKind::Sabm,
            0x6F => UFrameKind::Sabme,
            0x43 => UFrameKind::Disc,
            0x0F => UFrameKind::Dm,
            0x63 => UFrameKind::Ua,
            0x03 => UFrameKind::Ui,
            0x87 => UFrameKind::Frmr,
            other => UFrameKind::Unknown(other),
        };
        Control::U { kind, poll_final }
    }

    pub fn encode(&self) -> u8 {
        match *self {
            Control::I { ns, nr, poll } => {
                ((nr & 0x07) << 5) | (if poll { 0x10 } else { 0 }) | ((ns & 0x07) << 1)
            }
            Control::S { kind, nr, poll_final } => {
                let subtype = match kind {
                    SFrameKind::Rr => 0b00,
                    SFrameKind::Rnr => 0b01,
                    SFrameKind::Rej => 0b10,
                    SFrameKind::Srej => 0b11,
                };
                ((nr & 0x07) << 5) | (if poll_final { 0x10 } else { 0 }) | (subtype << 2) | 0x01
            }
            Control::U { kind, poll_final } => {
                let base = match kind {
                    UFrameKind::Sabm => 0x2F,
                    UFrameKind::Sabme => 0x6F,
                    UFrameKind::Disc => 0x43,
                    UFrameKind::Dm => 0x0F,
                    UFrameKind::Ua => 0x63,
                    UFrameKind::Ui => 0x03,
                    UFrameKind::Frmr => 0x87,
                    UFrameKind::Unknown(b) => b,
                };
                base | (if poll_final { 0x10 } else { 0 })
            }
        }
    }
}

/// One class of AX.25 frame (spec §3 Frame invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    I,
    S,
    U,
    Ui,
    Unknown,
}

impl Control {
    pub fn class(&self) -> FrameClass {
        match self {
            Control::I { .. } => FrameClass::I,
            Control::S { .. } => FrameClass::S,
            Control::U {
                kind: UFrameKind::Ui,
                ..
            } => FrameClass::Ui,
            Control::U { .. } => FrameClass::U,
        }
    }
}

/// Encode a single 7-byte AX.25 address field.
///
/// Each of the 6 base-call bytes is left-shifted by one; byte 7 packs the
/// SSID (bits 1..4), sets reserved bits 5-6, carries the command/response
/// bit in bit 7, and the extension bit (bit 0) in the low bit: 0 unless this
/// is the last address in the sequence.
pub fn encode_address(addr: &Address, last: bool) -> [u8; 7] {
    let mut out = [0u8; 7];
    for (i, &b) in addr.padded_base().iter().enumerate() {
        out[i] = b << 1;
    }
    let mut ssid_byte = 0b0110_0000; // reserved bits 5-6 set
    ssid_byte |= (addr.ssid() & 0x0F) << 1;
    if last {
        ssid_byte |= 0x01;
    }
    if addr.is_command {
        ssid_byte |= 0x80;
    }
    if addr.has_been_repeated {
        // Digipeater "has-been-repeated" bit reuses bit 7 position on
        // digipeater addresses in the classic TNC convention; observers
        // read it without mutating on reception (spec §6).
        ssid_byte |= 0x80;
    }
    out[6] = ssid_byte;
    out
}

pub(crate) fn decode_address(bytes: &[u8; 7]) -> Address {
    let mut base = String::with_capacity(6);
    for &b in &bytes[..6] {
        let ch = (b >> 1) as char;
        if ch != ' ' {
            base.push(ch);
        }
    }
    let ssid_byte = bytes[6];
    let ssid = ((ssid_byte >> 1) & 0x0F) as i32;
    let mut addr = Address::new(base, ssid);
    addr.is_command = ssid_byte & 0x80 != 0;
    addr.has_been_repeated = ssid_byte & 0x80 != 0;
    addr
}

fn extension_bit(byte7: u8) -> bool {
    byte7 & 0x01 != 0
}

/// A fully decoded AX.25 frame (spec §3 Frame, §6 wire layout).
#[derive(Debug, Clone)]
pub struct Frame {
    pub timestamp: std::time::SystemTime,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub via: DigiPath,
    pub class: FrameClass,
    pub control: Option<Control>,
    pub pid: Option<u8>,
    pub info: Vec<u8>,
    pub raw: Vec<u8>,
}

/// NET/ROM PID value used to recognize NODES broadcasts (spec §4.6, §6).
pub const PID_NETROM: u8 = 0xCF;
/// PID meaning "no layer 3 protocol" (plain text / AXDP payloads).
pub const PID_NO_LAYER3: u8 = 0xF0;

/// Decode one complete AX.25 frame from `raw` (already de-KISSed).
///
/// Rejects (returns `None`) address sequences whose extension bit never
/// appears within the first 8 addresses (spec §4.1).
pub fn decode_frame(raw: &[u8], now: std::time::SystemTime) -> Option<Frame> {
    if raw.len() < 14 {
        return None;
    }
    let mut addrs = Vec::new();
    let mut offset = 0;
    loop {
        if offset + 7 > raw.len() || addrs.len() >= 8 {
            return None;
        }
        let mut chunk = [0u8; 7];
        chunk.copy_from_slice(&raw[offset..offset + 7]);
        let is_last = extension_bit(chunk[6]);
        addrs.push(decode_address(&chunk));
        offset += 7;
        if is_last {
            break;
        }
    }
    if addrs.len() < 2 || offset >= raw.len() {
        return None;
    }
    let to = addrs.remove(0);
    let from = addrs.remove(0);
    let via = DigiPath::new(addrs);

    let control_byte = raw[offset];
    offset += 1;
    let control = Control::decode(control_byte);
    let class = control.class();

    let pid = if matches!(class, FrameClass::I | FrameClass::Ui) {
        let p = *raw.get(offset)?;
        offset += 1;
        Some(p)
    } else {
        None
    };
    let info = raw[offset..].to_vec();

    Some(Frame {
        timestamp: now,
        from: Some(from),
        to: Some(to),
        via,
        class,
        control: Some(control),
        pid,
        info,
        raw: raw.to_vec(),
    })
}

/// Encode a complete AX.25 frame.
pub fn encode_frame(
    to: &Address,
    from: &Address,
    via: &DigiPath,
    control: Control,
    pid: Option<u8>,
    info: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(14 + via.len() * 7 + 2 + info.len());
    let total_addrs = 2 + via.len();
    out.extend_from_slice(&encode_address(to, total_addrs == 1));
    out.extend_from_slice(&encode_address(from, total_addrs == 2));
    for (i, addr) in via.as_slice().iter().enumerate() {
        let is_last = i == via.len() - 1;
        out.extend_from_slice(&encode_address(addr, is_last));
    }
    out.push(control.encode());
    if let Some(p) = pid {
        out.push(p);
    }
    out.extend_from_slice(info);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[test]
    fn crc32_matches_known_values_and_differs_on_one_char() {
        let a = crc32(b"Hello, World!");
        let b = crc32(b"Hello, World?");
        assert_ne!(a, b);
        assert_eq!(crc32(b"Hello, World!"), a);
    }

    #[test]
    fn control_field_round_trips_i_frame() {
        let c = Control::I { ns: 3, nr: 5, poll: true };
        let byte = c.encode();
        assert_eq!(Control::decode(byte), c);
    }

    #[test]
    fn control_field_round_trips_s_and_u() {
        let s = Control::S { kind: SFrameKind::Rej, nr: 2, poll_final: false };
        assert_eq!(Control::decode(s.encode()), s);
        let u = Control::U { kind: UFrameKind::Sabm, poll_final: true };
        assert_eq!(Control::decode(u.encode()), u);
    }

    #[test]
    fn unknown_u_subtype_decodes_without_failing() {
        let c = Control::decode(0b1111_1011);
        match c {
            Control::U { kind: UFrameKind::Unknown(_), .. } => {}
            other => panic!("expected unknown U-frame, got {other:?}"),
        }
    }

    #[test]
    fn address_and_frame_round_trip() {
        let to = Address::new("APRS", 0);
        let from = Address::new("W0TST", 7);
        let via = DigiPath::new(vec![Address::new("WIDE2", 1)]);
        let info = b"hello world";
        let wire = encode_frame(&to, &from, &via, Control::U { kind: UFrameKind::Ui, poll_final: false }, Some(PID_NO_LAYER3), info);
        let frame = decode_frame(&wire, SystemTime::now()).expect("decodes");
        assert_eq!(frame.to.unwrap(), to);
        assert_eq!(frame.from.unwrap(), from);
        assert_eq!(frame.via.len(), 1);
        assert_eq!(frame.info, info);
        assert_eq!(frame.pid, Some(PID_NO_LAYER3));
    }

    #[test]
    fn rejects_sequence_missing_extension_bit() {
        // 9 addresses, none with the extension bit set: must reject.
        let mut raw = Vec::new();
        for _ in 0..9 {
            raw.extend_from_slice(&[0u8; 7]);
        }
        assert!(decode_frame(&raw, SystemTime::now()).is_none());
    }
}
