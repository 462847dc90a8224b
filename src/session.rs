//! AX.25 connected-mode session state machine (spec §3 "Session", §4.3).

use crate::address::{Address, DigiPath};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Session lifecycle state (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Error,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Disconnected => "disconnected",
            State::Connecting => "connecting",
            State::Connected => "connected",
            State::Disconnecting => "disconnecting",
            State::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Events the FSM reacts to (spec §4.3).
#[derive(Debug, Clone)]
pub enum Event {
    ConnectRequest,
    ReceivedSabm,
    ReceivedUa,
    ReceivedDm,
    ReceivedDisc,
    ReceivedI { ns: u8, nr: u8, poll: bool, payload: Vec<u8> },
    ReceivedRr { nr: u8, poll: bool },
    ReceivedRej { nr: u8, poll: bool },
    ReceivedFrmr,
    T1Expired,
    T3Expired,
    UserDisconnect,
}

/// Actions the FSM emits for the caller to carry out (spec §4.3).
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SendSabm,
    SendUa,
    SendDm,
    SendDisc,
    SendRr { nr: u8, poll: bool },
    SendRej { nr: u8 },
    SendI { ns: u8, nr: u8, payload: Vec<u8> },
    NotifyConnected,
    NotifyDisconnected { reason: String },
    NotifyDataReceived { payload: Vec<u8> },
    ArmT1,
    ArmT3,
    Fail { reason: String },
}

/// Session tuning parameters (spec §3 "Session" Fields, §4.3 Config).
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Max information-field bytes per I-frame, range 32..=256.
    pub paclen: u16,
    /// Modulo-8 window size, 1..=7.
    pub window_size: u8,
    /// Max retries (N2) before giving up.
    pub n2: u32,
    /// Ack timeout.
    pub t1: Duration,
    /// Idle poll interval.
    pub t3: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            paclen: 128,
            window_size: 4,
            n2: 10,
            t1: Duration::from_secs(10),
            t3: Duration::from_secs(60),
        }
    }
}

/// Identifies one session (spec §3 "Session" Keyed by).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub local: Address,
    pub remote: Address,
    pub via: DigiPath,
    pub channel: u8,
}

struct PendingI {
    ns: u8,
    payload: Vec<u8>,
}

/// One AX.25 connected-mode session (spec §3 "Session", §4.3).
pub struct Session {
    pub state: State,
    config: SessionConfig,
    pub is_initiator: bool,

    vs: u8,
    va: u8,
    vr: u8,

    /// Tracks modulo-8 wrap for the chunk-acked counter (spec §4.3
    /// "Modulo-8 progress accounting"): the raw V(A) alone under-reports
    /// progress once totalChunks exceeds 8, so progress is derived from
    /// successive deltas instead of compared against V(A) directly.
    last_known_va: u8,
    chunks_acked: u64,
    total_chunks: Option<u64>,
    total_bytes: Option<u64>,

    pending: VecDeque<PendingI>,
    unacked: VecDeque<PendingI>,
    retry_count: u32,
}

impl Session {
    pub fn new(config: SessionConfig, is_initiator: bool) -> Self {
        Self {
            state: State::Disconnected,
            config,
            is_initiator,
            vs: 0,
            va: 0,
            vr: 0,
            last_known_va: 0,
            chunks_acked: 0,
            total_chunks: None,
            total_bytes: None,
            pending: VecDeque::new(),
            unacked: VecDeque::new(),
            retry_count: 0,
        }
    }

    pub fn v_s(&self) -> u8 {
        self.vs
    }
    pub fn v_a(&self) -> u8 {
        self.va
    }
    pub fn v_r(&self) -> u8 {
        self.vr
    }

    /// Configure the total size of the transfer this session is carrying,
    /// used by the modulo-8 progress accounting below.
    pub fn set_transfer_totals(&mut self, total_chunks: u64, total_bytes: u64) {
        self.total_chunks = Some(total_chunks);
        self.total_bytes = Some(total_bytes);
        self.chunks_acked = 0;
        self.last_known_va = self.va;
    }

    pub fn chunks_acked(&self) -> u64 {
        self.chunks_acked
    }

    /// Bytes implied by `chunks_acked`, per spec §4.3: `paclen` for every
    /// non-last chunk, and the remainder for the last.
    pub fn bytes_acked(&self) -> u64 {
        let (Some(total_chunks), Some(total_bytes)) = (self.total_chunks, self.total_bytes) else {
            return 0;
        };
        if total_chunks == 0 {
            return 0;
        }
        let paclen = self.config.paclen as u64;
        let full_chunks = self.chunks_acked.min(total_chunks.saturating_sub(1));
        let mut bytes = full_chunks * paclen;
        if self.chunks_acked >= total_chunks {
            let last_chunk_bytes = total_bytes.saturating_sub((total_chunks - 1) * paclen);
            bytes = (total_chunks - 1) * paclen + last_chunk_bytes;
        }
        bytes
    }

    pub fn enqueue(&mut self, payload: Vec<u8>) {
        self.pending.push_back(PendingI { ns: 0, payload });
    }

    fn window_has_room(&self) -> bool {
        self.unacked.len() < self.config.window_size as usize
    }

    fn drain_pending(&mut self, actions: &mut Vec<Action>) {
        while self.window_has_room() {
            let Some(mut item) = self.pending.pop_front() else {
                break;
            };
            item.ns = self.vs;
            actions.push(Action::SendI {
                ns: self.vs,
                nr: self.vr,
                payload: item.payload.clone(),
            });
            self.vs = (self.vs + 1) % 8;
            self.unacked.push_back(item);
        }
    }

    /// Advance V(A) by `delta` (modulo-8), retiring that many oldest unacked
    /// I-frames, and feed the chunk-acked counter (spec §4.3).
    fn advance_va(&mut self, nr: u8) {
        let delta = (nr as i16 - self.va as i16).rem_euclid(8) as u8;
        for _ in 0..delta {
            self.unacked.pop_front();
        }
        self.va = nr;

        let progress_delta = (nr as i16 - self.last_known_va as i16).rem_euclid(8) as u64;
        self.last_known_va = nr;
        if let Some(total) = self.total_chunks {
            self.chunks_acked = (self.chunks_acked + progress_delta).min(total);
        }
    }

    /// Process one event, returning the actions to carry out.
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        let mut actions = Vec::new();
        match (self.state, event) {
            (State::Disconnected, Event::ConnectRequest) => {
                self.state = State::Connecting;
                self.retry_count = 0;
                actions.push(Action::SendSabm);
                actions.push(Action::ArmT1);
            }
            (State::Disconnected, Event::ReceivedSabm) => {
                self.vs = 0;
                self.va = 0;
                self.vr = 0;
                self.state = State::Connected;
                actions.push(Action::SendUa);
                actions.push(Action::NotifyConnected);
                actions.push(Action::ArmT3);
            }
            (State::Connecting, Event::ReceivedUa) => {
                self.state = State::Connected;
                actions.push(Action::NotifyConnected);
                self.drain_pending(&mut actions);
                actions.push(Action::ArmT3);
            }
            (State::Connecting, Event::ReceivedDm) => {
                self.state = State::Disconnected;
                actions.push(Action::NotifyDisconnected {
                    reason: "refused".into(),
                });
            }
            (State::Connecting, Event::T1Expired) => {
                self.retry_count += 1;
                if self.retry_count > self.config.n2 {
                    self.state = State::Error;
                    actions.push(Action::Fail {
                        reason: "N2 exceeded awaiting UA".into(),
                    });
                    actions.push(Action::NotifyDisconnected {
                        reason: "timeout".into(),
                    });
                } else {
                    actions.push(Action::SendSabm);
                    actions.push(Action::ArmT1);
                }
            }
            (State::Connected, Event::ReceivedI { ns, poll, payload, .. }) => {
                if ns == self.vr {
                    self.vr = (self.vr + 1) % 8;
                    actions.push(Action::NotifyDataReceived { payload });
                    actions.push(Action::SendRr {
                        nr: self.vr,
                        poll,
                    });
                } else {
                    actions.push(Action::SendRej { nr: self.vr });
                }
            }
            (State::Connected, Event::ReceivedRr { nr, poll: _ }) => {
                self.advance_va(nr);
                self.retry_count = 0;
                if self.window_has_room() {
                    self.drain_pending(&mut actions);
                }
            }
            (State::Connected, Event::ReceivedRej { nr, .. }) => {
                self.advance_va(nr);
                // Resend everything still unacked starting at V(A).
                let mut to_resend: Vec<PendingI> = self.unacked.drain(..).collect();
                for item in to_resend.drain(..) {
                    actions.push(Action::SendI {
                        ns: item.ns,
                        nr: self.vr,
                        payload: item.payload.clone(),
                    });
                    self.unacked.push_back(item);
                }
            }
            (State::Connected, Event::T1Expired) => {
                if !self.unacked.is_empty() {
                    self.retry_count += 1;
                    if self.retry_count > self.config.n2 {
                        self.state = State::Error;
                        actions.push(Action::Fail {
                            reason: "N2 exceeded awaiting ack".into(),
                        });
                        actions.push(Action::NotifyDisconnected {
                            reason: "timeout".into(),
                        });
                    } else {
                        actions.push(Action::SendRr {
                            nr: self.vr,
                            poll: true,
                        });
                        actions.push(Action::ArmT1);
                    }
                }
            }
            (State::Connected, Event::T3Expired) => {
                actions.push(Action::SendRr {
                    nr: self.vr,
                    poll: true,
                });
                actions.push(Action::ArmT3);
            }
            (State::Connected, Event::ReceivedSabm) => {
                // Peer restarted without DISC: a protocol violation, but we
                // resynchronize rather than wedge the link.
                self.vs = 0;
                self.va = 0;
                self.vr = 0;
                self.unacked.clear();
                actions.push(Action::SendUa);
                actions.push(Action::ArmT3);
            }
            (State::Connected, Event::ReceivedDisc) => {
                self.state = State::Disconnected;
                actions.push(Action::SendUa);
                actions.push(Action::NotifyDisconnected {
                    reason: "peer disconnected".into(),
                });
            }
            (State::Connected, Event::ReceivedFrmr) => {
                self.state = State::Error;
                actions.push(Action::Fail {
                    reason: "FRMR received".into(),
                });
                actions.push(Action::NotifyDisconnected {
                    reason: "frame reject".into(),
                });
            }
            (State::Connected, Event::UserDisconnect) => {
                self.state = State::Disconnecting;
                self.retry_count = 0;
                actions.push(Action::SendDisc);
                actions.push(Action::ArmT1);
            }
            (State::Disconnecting, Event::ReceivedUa) => {
                self.state = State::Disconnected;
                actions.push(Action::NotifyDisconnected {
                    reason: "user requested".into(),
                });
            }
            (State::Disconnecting, Event::T1Expired) => {
                self.retry_count += 1;
                if self.retry_count > self.config.n2 {
                    self.state = State::Disconnected;
                    actions.push(Action::NotifyDisconnected {
                        reason: "disc timeout".into(),
                    });
                } else {
                    actions.push(Action::SendDisc);
                    actions.push(Action::ArmT1);
                }
            }
            // Any event not covered by a transition for the current state
            // is a no-op: unrecognized combinations never panic.
            (_, _) => {}
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_data_and_disconnect_seed_scenario() {
        let mut s = Session::new(SessionConfig::default(), true);
        let actions = s.handle(Event::ConnectRequest);
        assert_eq!(s.state, State::Connecting);
        assert!(actions.contains(&Action::SendSabm));

        let actions = s.handle(Event::ReceivedUa);
        assert_eq!(s.state, State::Connected);
        assert!(actions.contains(&Action::NotifyConnected));

        let actions = s.handle(Event::ReceivedI {
            ns: 0,
            nr: 0,
            poll: false,
            payload: b"Hi".to_vec(),
        });
        assert!(actions.contains(&Action::NotifyDataReceived {
            payload: b"Hi".to_vec()
        }));
        assert!(actions.contains(&Action::SendRr { nr: 1, poll: false }));

        let actions = s.handle(Event::ReceivedDisc);
        assert_eq!(s.state, State::Disconnected);
        assert!(actions.contains(&Action::SendUa));
    }

    #[test]
    fn out_of_order_ns_triggers_reject() {
        let mut s = Session::new(SessionConfig::default(), false);
        s.handle(Event::ReceivedSabm);
        let actions = s.handle(Event::ReceivedI {
            ns: 3,
            nr: 0,
            poll: false,
            payload: vec![],
        });
        assert_eq!(actions, vec![Action::SendRej { nr: 0 }]);
    }

    #[test]
    fn modulo8_progress_never_under_or_over_counts_with_more_than_eight_chunks() {
        let mut s = Session::new(SessionConfig::default(), true);
        s.handle(Event::ConnectRequest);
        s.handle(Event::ReceivedUa);
        s.set_transfer_totals(20, 20 * 128);

        // Cycle nr through all 8 values twice plus a remainder, simulating
        // 20 chunks acked via modulo-8 RR wraparound.
        let nr_sequence = [1, 2, 3, 4, 5, 6, 7, 0, 1, 2, 3, 4, 5, 6, 7, 0, 1, 2, 3, 4];
        for &nr in &nr_sequence {
            s.handle(Event::ReceivedRr { nr, poll: false });
        }
        assert_eq!(s.chunks_acked(), 20);
    }

    #[test]
    fn n2_retries_exceeded_moves_to_error() {
        let mut s = Session::new(
            SessionConfig {
                n2: 2,
                ..Default::default()
            },
            true,
        );
        s.handle(Event::ConnectRequest);
        s.handle(Event::T1Expired);
        s.handle(Event::T1Expired);
        let actions = s.handle(Event::T1Expired);
        assert_eq!(s.state, State::Error);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::NotifyDisconnected { .. })));
    }
}
