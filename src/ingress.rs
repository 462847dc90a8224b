//! Single-threaded cooperative ingress pipeline (spec §4.9, §5).
//!
//! Wires KISS framing -> AX.25 decode -> classification -> the session
//! manager, AXDP reassembler, link-quality tracker and NET/ROM routing
//! table. Nothing here spawns a thread or awaits: every entry point either
//! returns immediately or is driven by an explicit `tick(now)` call, per
//! the cooperative-scheduling model.

use crate::address::Address;
use crate::ax25::{self, Control, Frame, FrameClass, SFrameKind, UFrameKind};
use crate::axdp::{DedupWindow, Message};
use crate::axdp::message::has_magic;
use crate::clock::{Clock, Jitter};
use crate::kiss;
use crate::link_quality::{FrameSource, LinkQualityTracker};
use crate::netrom::RoutingTable;
use crate::session::{Action, Event, Session, SessionConfig, SessionKey, State};
use crate::transfer::{InboundTransfer, OutboundTransfer};
use std::collections::HashMap;
use std::time::SystemTime;

/// Diagnostics snapshot of pipeline activity (spec SPEC_FULL §4.11).
#[derive(Debug, Clone, Default)]
pub struct CoreStats {
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub crc_failures: u64,
    pub sessions_active: u64,
    pub axdp_messages_dispatched: u64,
    pub transfers_in_flight: u64,
}

/// One of the low-traffic AXDP capability-exchange messages, surfaced to
/// the host for debug/diagnostics display (spec §4.9 "capability PING/PONG
/// event").
#[derive(Debug, Clone)]
pub enum CapabilityEvent {
    Ping(Option<crate::axdp::Capabilities>),
    Pong(Option<crate::axdp::Capabilities>),
    PeerAxdpEnabled(Option<crate::axdp::Capabilities>),
}

/// Callback surface for the host application (spec §4.9).
///
/// Every method has a no-op default: implementors override only the
/// notifications they care about.
pub trait CoreObserver {
    fn on_connected(&mut self, _key: &SessionKey) {}
    fn on_disconnected(&mut self, _key: &SessionKey, _reason: &str) {}
    fn on_data_received(&mut self, _key: &SessionKey, _payload: &[u8]) {}
    fn on_chat_message(&mut self, _from: &Address, _payload: &[u8]) {}
    fn on_transfer_progress(&mut self, _from: &Address, _received: u32, _total: u32) {}
    fn on_transfer_complete(&mut self, _from: &Address, _filename: &str, _data: &[u8]) {}
    fn on_neighbor_heard(&mut self, _call: &Address) {}
    fn on_capability_event(&mut self, _from: &Address, _event: CapabilityEvent) {}
}

struct NoopObserver;
impl CoreObserver for NoopObserver {}

/// Frames addressed to us that carry an AX.25 I-frame or an AXDP payload in
/// a UI frame feed the session/transfer layers; everything else (NET/ROM
/// broadcasts, overheard third-party traffic) feeds routing intelligence.
pub struct IngressPipeline {
    local: Address,
    clock: Box<dyn Clock>,
    jitter: Box<dyn Jitter>,
    session_config: SessionConfig,
    decoder: kiss::Decoder,
    sessions: HashMap<SessionKey, Session>,
    t1_deadlines: HashMap<SessionKey, SystemTime>,
    t3_deadlines: HashMap<SessionKey, SystemTime>,
    dedup: DedupWindow,
    /// Per-session AXDP reassembly buffer: I-frame payloads accumulate here
    /// until a complete AXDP message can be decoded (spec §4.2, §4.9 — a
    /// single AXDP message may span several I-frames once it exceeds
    /// `paclen`). While bytes sit in this buffer, no "raw" payload is ever
    /// surfaced to `on_data_received` for that session (spec seed scenario
    /// S2's "raw-for-display is empty while fragments are arriving").
    axdp_buffers: HashMap<SessionKey, Vec<u8>>,
    inbound_transfers: HashMap<(u32, u32), InboundTransfer>,
    outbound_transfers: HashMap<(u32, u32), OutboundTransfer>,
    pub routing: RoutingTable,
    pub link_quality: LinkQualityTracker,
    observer: Box<dyn CoreObserver>,
    stats: CoreStats,
}

impl IngressPipeline {
    pub fn new(local: Address, clock: Box<dyn Clock>, jitter: Box<dyn Jitter>) -> Self {
        Self {
            local,
            clock,
            jitter,
            session_config: SessionConfig::default(),
            decoder: kiss::Decoder::new(),
            sessions: HashMap::new(),
            t1_deadlines: HashMap::new(),
            t3_deadlines: HashMap::new(),
            dedup: DedupWindow::new(256),
            axdp_buffers: HashMap::new(),
            inbound_transfers: HashMap::new(),
            outbound_transfers: HashMap::new(),
            routing: RoutingTable::new(),
            link_quality: LinkQualityTracker::new(),
            observer: Box::new(NoopObserver),
            stats: CoreStats::default(),
        }
    }

    pub fn set_observer(&mut self, observer: Box<dyn CoreObserver>) {
        self.observer = observer;
    }

    pub fn stats(&self) -> CoreStats {
        let mut s = self.stats.clone();
        s.sessions_active = self
            .sessions
            .values()
            .filter(|sess| sess.state == State::Connected)
            .count() as u64;
        s.transfers_in_flight =
            self.inbound_transfers.len() as u64 + self.outbound_transfers.len() as u64;
        s
    }

    /// Feed raw bytes straight off the serial/TCP link to the TNC (spec
    /// §4.9). Every complete KISS frame found is dispatched synchronously.
    pub fn feed_kiss_bytes(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let frames = self.decoder.feed(bytes);
        let mut outgoing = Vec::new();
        for frame in frames {
            if !frame.is_data() {
                continue; // hardware command frames are out of scope here
            }
            outgoing.extend(self.dispatch_kiss_frame(&frame.data));
        }
        outgoing
    }

    fn dispatch_kiss_frame(&mut self, raw: &[u8]) -> Vec<Vec<u8>> {
        let now = self.clock.now();
        let Some(frame) = ax25::decode_frame(raw, now) else {
            log::debug!("dropping malformed AX.25 frame ({} bytes)", raw.len());
            self.stats.frames_dropped += 1;
            return Vec::new();
        };
        self.stats.frames_decoded += 1;
        self.dispatch_frame(frame)
    }

    /// Peek (without consuming) whether this frame's info field carries an
    /// AXDP message already seen in the dedup window (spec §4.9 "explicit
    /// isDuplicate flag derived from source-aware ingestion dedup"). Frames
    /// that can't be checked this way (control frames, still-reassembling
    /// fragments) are assumed delivered.
    fn is_duplicate_frame(&self, frame: &Frame) -> bool {
        if frame.class != FrameClass::Ui || frame.pid == Some(ax25::PID_NETROM) {
            return false;
        }
        match Message::decode(&frame.info) {
            Some((message, _consumed)) => {
                self.dedup.contains(message.session_id(), message.message_id())
            }
            None => false,
        }
    }

    fn dispatch_frame(&mut self, frame: Frame) -> Vec<Vec<u8>> {
        let (Some(from), Some(to)) = (frame.from.clone(), frame.to.clone()) else {
            return Vec::new();
        };
        let addressed_to_us = to == self.local;

        let delivered = !self.is_duplicate_frame(&frame);
        self.link_quality
            .observe(&from, &to, delivered, frame.timestamp, FrameSource::Kiss);

        match frame.class {
            FrameClass::Ui => self.dispatch_ui_frame(&frame, &from, &to, addressed_to_us),
            _ if addressed_to_us => self.dispatch_session_frame(&frame, &from, &to),
            _ => {
                // Overheard connected-mode traffic between other stations:
                // not ours to act on beyond inferring the neighbor exists.
                self.routing.infer_from_ui_frame(from, frame.timestamp);
                Vec::new()
            }
        }
    }

    fn dispatch_ui_frame(
        &mut self,
        frame: &Frame,
        from: &Address,
        _to: &Address,
        addressed_to_us: bool,
    ) -> Vec<Vec<u8>> {
        if frame.pid == Some(ax25::PID_NETROM) {
            if let Some(entries) = crate::netrom::parse_broadcast(&frame.info) {
                self.routing.ingest_broadcast(from.clone(), entries, frame.timestamp);
                self.observer.on_neighbor_heard(from);
            }
            return Vec::new();
        }

        if !addressed_to_us {
            self.routing.infer_from_ui_frame(from.clone(), frame.timestamp);
            return Vec::new();
        }

        if let Some((message, _consumed)) = Message::decode(&frame.info) {
            self.handle_axdp_message(from, message);
        }
        Vec::new()
    }

    fn handle_axdp_message(&mut self, from: &Address, message: Message) {
        // FileChunk messages of one transfer share their FileMeta's
        // (session_id, message_id) by design (spec §4.4); the per-chunk
        // dedup window key would therefore reject every chunk after the
        // first, so chunk idempotency is instead handled by
        // `InboundTransfer::accept_chunk` re-inserting the same index.
        let dedup_checked = !matches!(message, Message::FileChunk { .. });
        if dedup_checked && self.dedup.is_duplicate(message.session_id(), message.message_id()) {
            log::trace!(
                "dropping duplicate AXDP message {}/{} from {from}",
                message.session_id(),
                message.message_id()
            );
            return;
        }
        self.stats.axdp_messages_dispatched += 1;

        match message {
            Message::Chat { payload, .. } => {
                self.observer.on_chat_message(from, &payload);
            }
            Message::FileMeta {
                session_id,
                message_id,
                meta,
                total_chunks,
                compression,
            } => {
                let transfer =
                    InboundTransfer::new(meta, total_chunks, compression, self.clock.now());
                self.inbound_transfers.insert((session_id, message_id), transfer);
            }
            Message::FileChunk {
                session_id,
                message_id,
                chunk_index,
                payload,
                payload_crc32,
                ..
            } => {
                let key = (session_id, message_id);
                if let Some(transfer) = self.inbound_transfers.get_mut(&key) {
                    if transfer.accept_chunk(chunk_index, payload, payload_crc32).is_err() {
                        self.stats.crc_failures += 1;
                    }
                    self.observer.on_transfer_progress(
                        from,
                        transfer.received_count(),
                        transfer.total_chunks,
                    );
                    if transfer.is_complete() {
                        if let Ok(data) = transfer.finish() {
                            let filename = transfer.meta.filename.clone();
                            self.observer.on_transfer_complete(from, &filename, &data);
                        }
                        self.inbound_transfers.remove(&key);
                    }
                }
            }
            Message::Ack {
                session_id,
                acked_message_id,
                sack,
                ..
            } => {
                if let Some(bits) = sack {
                    let key = (session_id, acked_message_id);
                    if let Some(transfer) = self.outbound_transfers.get_mut(&key) {
                        let total = transfer.total_chunks();
                        let sack = crate::axdp::SackBitmap::decode(0, total, &bits);
                        if transfer.apply_sack(&sack) {
                            self.outbound_transfers.remove(&key);
                        }
                    }
                }
            }
            Message::Ping { capabilities, .. } => {
                self.observer.on_capability_event(from, CapabilityEvent::Ping(capabilities));
            }
            Message::Pong { capabilities, .. } => {
                self.observer.on_capability_event(from, CapabilityEvent::Pong(capabilities));
            }
            Message::PeerAxdpEnabled { capabilities, .. } => {
                self.observer
                    .on_capability_event(from, CapabilityEvent::PeerAxdpEnabled(capabilities));
            }
            Message::Nack { .. } => {}
        }
    }

    /// Route an I-frame's information field either into AXDP reassembly
    /// (spec seed scenario S2) or, for plain non-AXDP payloads, straight to
    /// the observer as raw session data (spec seed scenario S4).
    fn ingest_session_payload(&mut self, key: &SessionKey, payload: Vec<u8>) {
        let buffering = self.axdp_buffers.contains_key(key);
        if !buffering && !has_magic(&payload) {
            self.observer.on_data_received(key, &payload);
            return;
        }

        let buf = self.axdp_buffers.entry(key.clone()).or_default();
        buf.extend_from_slice(&payload);

        let mut decoded = Vec::new();
        loop {
            let Some((message, consumed)) = Message::decode(buf) else {
                break;
            };
            buf.drain(..consumed);
            decoded.push(message);
        }
        if buf.is_empty() {
            self.axdp_buffers.remove(key);
        }

        let from = key.remote.clone();
        for message in decoded {
            self.handle_axdp_message(&from, message);
        }
    }

    fn dispatch_session_frame(&mut self, frame: &Frame, from: &Address, to: &Address) -> Vec<Vec<u8>> {
        let key = SessionKey {
            local: to.clone(),
            remote: from.clone(),
            via: frame.via.clone(),
            channel: 0,
        };
        let Some(control) = frame.control else {
            return Vec::new();
        };

        let event = match control {
            Control::U { kind: UFrameKind::Sabm, .. } => Some(Event::ReceivedSabm),
            Control::U { kind: UFrameKind::Ua, .. } => Some(Event::ReceivedUa),
            Control::U { kind: UFrameKind::Dm, .. } => Some(Event::ReceivedDm),
            Control::U { kind: UFrameKind::Disc, .. } => Some(Event::ReceivedDisc),
            Control::U { kind: UFrameKind::Frmr, .. } => Some(Event::ReceivedFrmr),
            Control::I { ns, nr, poll } => Some(Event::ReceivedI {
                ns,
                nr,
                poll,
                payload: frame.info.clone(),
            }),
            Control::S { kind: SFrameKind::Rr, nr, poll_final } => {
                Some(Event::ReceivedRr { nr, poll: poll_final })
            }
            Control::S { kind: SFrameKind::Rej, nr, poll_final } => {
                Some(Event::ReceivedRej { nr, poll: poll_final })
            }
            _ => None,
        };
        let Some(event) = event else {
            return Vec::new();
        };

        let session = self
            .sessions
            .entry(key.clone())
            .or_insert_with(|| Session::new(self.session_config, false));
        let actions = session.handle(event);
        self.apply_actions(&key, actions)
    }

    fn apply_actions(&mut self, key: &SessionKey, actions: Vec<Action>) -> Vec<Vec<u8>> {
        let now = self.clock.now();
        let mut wire_frames = Vec::new();
        for action in actions {
            match action {
                Action::SendSabm => wire_frames.push(self.encode_u(key, UFrameKind::Sabm)),
                Action::SendUa => wire_frames.push(self.encode_u(key, UFrameKind::Ua)),
                Action::SendDm => wire_frames.push(self.encode_u(key, UFrameKind::Dm)),
                Action::SendDisc => wire_frames.push(self.encode_u(key, UFrameKind::Disc)),
                Action::SendRr { nr, poll } => {
                    wire_frames.push(self.encode_s(key, SFrameKind::Rr, nr, poll))
                }
                Action::SendRej { nr } => {
                    wire_frames.push(self.encode_s(key, SFrameKind::Rej, nr, false))
                }
                Action::SendI { ns, nr, payload } => {
                    wire_frames.push(self.encode_i(key, ns, nr, &payload))
                }
                Action::NotifyConnected => {
                    log::info!("session {} -> {} connected", key.local, key.remote);
                    self.observer.on_connected(key);
                }
                Action::NotifyDisconnected { reason } => {
                    log::info!(
                        "session {} -> {} disconnected: {reason}",
                        key.local,
                        key.remote
                    );
                    self.observer.on_disconnected(key, &reason);
                    self.t1_deadlines.remove(key);
                    self.t3_deadlines.remove(key);
                }
                Action::NotifyDataReceived { payload } => {
                    self.ingest_session_payload(key, payload);
                }
                Action::ArmT1 => {
                    self.t1_deadlines.insert(key.clone(), now + self.session_config.t1);
                }
                Action::ArmT3 => {
                    self.t3_deadlines.insert(key.clone(), now + self.session_config.t3);
                }
                Action::Fail { reason } => {
                    log::warn!("session {} -> {} failed: {reason}", key.local, key.remote);
                }
            }
        }
        wire_frames
    }

    fn encode_u(&self, key: &SessionKey, kind: UFrameKind) -> Vec<u8> {
        let control = Control::U { kind, poll_final: false };
        let raw = ax25::encode_frame(&key.remote, &key.local, &key.via, control, None, &[]);
        kiss::encode(0, &raw)
    }

    fn encode_s(&self, key: &SessionKey, kind: SFrameKind, nr: u8, poll_final: bool) -> Vec<u8> {
        let control = Control::S { kind, nr, poll_final };
        let raw = ax25::encode_frame(&key.remote, &key.local, &key.via, control, None, &[]);
        kiss::encode(0, &raw)
    }

    fn encode_i(&self, key: &SessionKey, ns: u8, nr: u8, payload: &[u8]) -> Vec<u8> {
        let control = Control::I { ns, nr, poll: false };
        let raw = ax25::encode_frame(
            &key.remote,
            &key.local,
            &key.via,
            control,
            Some(ax25::PID_NO_LAYER3),
            payload,
        );
        kiss::encode(0, &raw)
    }

    /// Advance timers; fires `T1Expired`/`T3Expired` for any session whose
    /// deadline has passed (spec §4.3, §5 explicit-suspension-point model —
    /// the host application calls this on its own schedule, the core never
    /// sleeps internally).
    pub fn tick(&mut self, now: SystemTime) -> Vec<Vec<u8>> {
        let mut wire_frames = Vec::new();
        let expired_t1: Vec<SessionKey> = self
            .t1_deadlines
            .iter()
            .filter(|(_, &deadline)| now >= deadline)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired_t1 {
            self.t1_deadlines.remove(&key);
            if let Some(session) = self.sessions.get_mut(&key) {
                let actions = session.handle(Event::T1Expired);
                wire_frames.extend(self.apply_actions(&key, actions));
            }
        }
        let expired_t3: Vec<SessionKey> = self
            .t3_deadlines
            .iter()
            .filter(|(_, &deadline)| now >= deadline)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired_t3 {
            self.t3_deadlines.remove(&key);
            if let Some(session) = self.sessions.get_mut(&key) {
                let actions = session.handle(Event::T3Expired);
                wire_frames.extend(self.apply_actions(&key, actions));
            }
        }
        let _ = self.jitter.sample(); // retry jitter consulted by callers driving retransmits
        wire_frames
    }

    /// Initiate an outbound connection (spec §4.3 `connectRequest`).
    pub fn connect(&mut self, key: SessionKey) -> Vec<Vec<u8>> {
        let session = self
            .sessions
            .entry(key.clone())
            .or_insert_with(|| Session::new(self.session_config, true));
        let actions = session.handle(Event::ConnectRequest);
        self.apply_actions(&key, actions)
    }

    pub fn session_state(&self, key: &SessionKey) -> Option<State> {
        self.sessions.get(key).map(|s| s.state)
    }

    /// Register a prepared outbound file transfer so that later `Ack`
    /// messages carrying a SACK bitmap can drive its retransmission state
    /// (spec §4.4).
    pub fn begin_outbound_transfer(
        &mut self,
        session_id: u32,
        message_id: u32,
        transfer: OutboundTransfer,
    ) {
        self.outbound_transfers.insert((session_id, message_id), transfer);
    }

    pub fn outbound_transfer(&self, session_id: u32, message_id: u32) -> Option<&OutboundTransfer> {
        self.outbound_transfers.get(&(session_id, message_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::DigiPath;
    use crate::clock::{FakeClock, FixedJitter};
    use std::time::Duration;

    fn pipeline(local: &str) -> IngressPipeline {
        IngressPipeline::new(
            Address::new(local, 0),
            Box::new(FakeClock::default()),
            Box::new(FixedJitter::zero()),
        )
    }

    #[test]
    fn kiss_round_trip_through_pipeline_decodes_ui_frame() {
        let mut p = pipeline("W0DST");
        let raw = ax25::encode_frame(
            &Address::new("W0DST", 0),
            &Address::new("W0SRC", 0),
            &DigiPath::default(),
            Control::U {
                kind: UFrameKind::Ui,
                poll_final: false,
            },
            Some(ax25::PID_NO_LAYER3),
            b"hello",
        );
        let wire = kiss::encode(0, &raw);
        p.feed_kiss_bytes(&wire);
        assert_eq!(p.stats().frames_decoded, 1);
    }

    #[test]
    fn broadcast_frame_populates_routing_table() {
        let mut p = pipeline("W0DST");
        let origin = Address::new("W0RLY", 0);
        let dest = Address::new("W0FAR", 0);
        let mut payload = vec![0xFFu8];
        payload.extend_from_slice(&ax25::encode_address(&dest, false));
        payload.extend_from_slice(b"NODE1 ");
        payload.extend_from_slice(&ax25::encode_address(&origin, false));
        payload.push(200);
        let raw = ax25::encode_frame(
            &Address::new("APRS", 0),
            &origin,
            &DigiPath::default(),
            Control::U {
                kind: UFrameKind::Ui,
                poll_final: false,
            },
            Some(ax25::PID_NETROM),
            &payload,
        );
        p.feed_kiss_bytes(&kiss::encode(0, &raw));
        assert_eq!(p.routing.neighbors().count(), 1);
        assert_eq!(
            p.routing.routes(crate::netrom::RoutingView::Hybrid).len(),
            1
        );
    }

    #[test]
    fn connect_then_receive_ua_transitions_session_and_arms_t3() {
        let mut p = pipeline("W0SRC");
        let key = SessionKey {
            local: Address::new("W0SRC", 0),
            remote: Address::new("W0DST", 0),
            via: DigiPath::default(),
            channel: 0,
        };
        let frames = p.connect(key.clone());
        assert_eq!(frames.len(), 1);
        assert_eq!(p.session_state(&key), Some(State::Connecting));

        let ua_raw = ax25::encode_frame(
            &key.local,
            &key.remote,
            &key.via,
            Control::U {
                kind: UFrameKind::Ua,
                poll_final: false,
            },
            None,
            &[],
        );
        p.feed_kiss_bytes(&kiss::encode(0, &ua_raw));
        assert_eq!(p.session_state(&key), Some(State::Connected));
    }

    #[test]
    fn tick_before_deadline_does_not_fire_t1() {
        let mut p = pipeline("W0SRC");
        let key = SessionKey {
            local: Address::new("W0SRC", 0),
            remote: Address::new("W0DST", 0),
            via: DigiPath::default(),
            channel: 0,
        };
        p.connect(key.clone());
        let soon = std::time::UNIX_EPOCH + Duration::from_secs(1);
        let frames = p.tick(soon);
        assert!(frames.is_empty());
        assert_eq!(p.session_state(&key), Some(State::Connecting));
    }
}
