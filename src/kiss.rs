//! KISS host-TNC framing (spec §4.1, §6).
//!
//! `FEND` (0xC0) delimits frames; `FESC` (0xDB) escapes a literal `FEND` or
//! `FESC` inside the payload as `FESC TFEND` / `FESC TFESC`. The decoder is
//! resumable: it consumes an arbitrary slice of the input stream at a time,
//! holds residual state across calls, and never panics on malformed input —
//! an unterminated frame is simply discarded at the next `FEND`.

const FEND: u8 = 0xC0;
const FESC: u8 = 0xDB;
const TFEND: u8 = 0xDC;
const TFESC: u8 = 0xDD;

/// Mobilinkd hardware subcommand used on the KISS command byte (spec §4.1).
pub const MOBILINKD_HARDWARE_CMD: u8 = 0x06;
/// Mobilinkd battery-voltage hardware subtype; payload is a big-endian `u16`
/// millivolt reading (spec §4.1). Parsing beyond this command byte is out
/// of scope (spec §1).
pub const MOBILINKD_SUBTYPE_BATTERY: u8 = 0x06;

/// A decoded KISS frame: the TNC port (high nibble of the command byte) and
/// the unescaped payload. Only "data" frames (low nibble 0) are handed to
/// higher layers; other command values are exposed for the ingress pipeline
/// to route or ignore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KissFrame {
    pub port: u8,
    pub command: u8,
    pub data: Vec<u8>,
}

impl KissFrame {
    pub fn is_data(&self) -> bool {
        self.command & 0x0F == 0
    }
}

/// Escape `data` and wrap it in `FEND cmd data FEND`, ready to write to a
/// TNC. `port` occupies the high nibble of the command byte; the low nibble
/// is fixed at 0 (data frame).
pub fn encode(port: u8, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity((data.len() + 2) * 110 / 100 + 2);
    out.push(FEND);
    out.push((port & 0x0F) << 4);
    for &b in data {
        match b {
            FEND => out.extend_from_slice(&[FESC, TFEND]),
            FESC => out.extend_from_slice(&[FESC, TFESC]),
            b => out.push(b),
        }
    }
    out.push(FEND);
    out
}

/// Frame an arbitrary hardware command (e.g. Mobilinkd battery query),
/// unescaped payload semantics identical to [`encode`].
pub fn encode_command(command_byte: u8, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity((data.len() + 2) * 110 / 100 + 2);
    out.push(FEND);
    out.push(command_byte);
    for &b in data {
        match b {
            FEND => out.extend_from_slice(&[FESC, TFEND]),
            FESC => out.extend_from_slice(&[FESC, TFESC]),
            b => out.push(b),
        }
    }
    out.push(FEND);
    out
}

#[derive(Debug)]
enum State {
    /// Not currently inside a `FEND`-delimited frame.
    BetweenFrames,
    /// Inside a frame, command byte not yet read.
    AwaitingCommand,
    /// Inside a frame, accumulating (unescaped) data bytes.
    InData { command: u8, buf: Vec<u8> },
    /// Inside a frame, just saw `FESC` and awaiting the escaped byte.
    InDataEscaped { command: u8, buf: Vec<u8> },
}

/// A resumable byte-stream-to-frames decoder. Feed it arbitrary chunks of
/// the incoming stream via [`Decoder::feed`]; it returns every complete
/// frame found in that chunk, carrying partial state forward.
pub struct Decoder {
    state: State,
}

impl Default for Decoder {
    fn default() -> Self {
        Self {
            state: State::BetweenFrames,
        }
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of bytes and return any frames it completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<KissFrame> {
        let mut out = Vec::new();
        for &b in bytes {
            self.feed_byte(b, &mut out);
        }
        out
    }

    fn feed_byte(&mut self, b: u8, out: &mut Vec<KissFrame>) {
        if b == FEND {
            match std::mem::replace(&mut self.state, State::BetweenFrames) {
                State::BetweenFrames | State::AwaitingCommand => {
                    // Empty frame or leading delimiter: start fresh.
                    self.state = State::AwaitingCommand;
                }
                State::InData { command, buf } | State::InDataEscaped { command, buf } => {
                    out.push(KissFrame {
                        port: (command >> 4) & 0x0F,
                        command: command & 0x0F,
                        data: buf,
                    });
                    self.state = State::AwaitingCommand;
                }
            }
            return;
        }

        match &mut self.state {
            State::BetweenFrames => {
                // Noise outside a frame; ignore.
            }
            State::AwaitingCommand => {
                self.state = State::InData {
                    command: b,
                    buf: Vec::new(),
                };
            }
            State::InData { command, buf } => {
                if b == FESC {
                    let command = *command;
                    let buf = std::mem::take(buf);
                    self.state = State::InDataEscaped { command, buf };
                } else {
                    buf.push(b);
                }
            }
            State::InDataEscaped { command, buf } => {
                let literal = match b {
                    TFEND => FEND,
                    TFESC => FESC,
                    other => other, // malformed escape: pass through verbatim
                };
                buf.push(literal);
                self.state = State::InData {
                    command: *command,
                    buf: std::mem::take(buf),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_payload_with_escapes() {
        let payload = [0x41, 0xC0, 0x42, 0xDB, 0x43, 0xC0, 0xDB, 0x44];
        let wire = encode(0, &payload);
        let mut dec = Decoder::new();
        let frames = dec.feed(&wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, payload);
        assert!(frames[0].is_data());
    }

    #[test]
    fn decoder_is_resumable_across_feeds() {
        let payload = b"hello kiss world";
        let wire = encode(1, payload);
        let mut dec = Decoder::new();
        let mid = wire.len() / 2;
        let mut frames = dec.feed(&wire[..mid]);
        assert!(frames.is_empty());
        frames.extend(dec.feed(&wire[mid..]));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, payload);
        assert_eq!(frames[0].port, 1);
    }

    #[test]
    fn noise_before_first_fend_never_panics_or_emits_a_frame() {
        let mut dec = Decoder::new();
        let mut stream = b"line noise before any delimiter".to_vec();
        stream.extend_from_slice(&encode(0, b"good"));
        let frames = dec.feed(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, b"good");
    }

    #[test]
    fn empty_payload_round_trips() {
        let wire = encode(0, &[]);
        let mut dec = Decoder::new();
        let frames = dec.feed(&wire);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].data.is_empty());
    }
}
