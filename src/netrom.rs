//! NET/ROM broadcast parsing and routing intelligence (spec §3 "Neighbor",
//! "Route", §4.6).

use crate::address::Address;
use crate::ax25;
use crate::decay;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// One destination entry inside a NET/ROM broadcast (spec §4.6 wire format).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastEntry {
    pub destination: Address,
    /// Human-readable node alias; carried on the wire but not used by
    /// routing math.
    pub alias: String,
    pub best_neighbor: Address,
    pub quality: u8,
}

const ENTRY_LEN: usize = 7 + 6 + 7 + 1;

/// Parse a NET/ROM broadcast payload: a leading `0xFF` signature byte, then
/// fixed-width entries of `destCall(7, shifted) | alias(6, ASCII
/// space-padded) | bestNeighborCall(7, shifted) | quality(1)` until the
/// buffer is exhausted (spec §4.6). The broadcasting station itself is not
/// carried in the payload — it's the AX.25 frame's source address. Returns
/// `None` on any structural mismatch; trailing bytes that don't fill a
/// whole entry are ignored rather than treated as an error, matching noisy-
/// channel tolerance elsewhere in the core.
pub fn parse_broadcast(buf: &[u8]) -> Option<Vec<BroadcastEntry>> {
    if buf.is_empty() || buf[0] != 0xFF {
        return None;
    }
    let mut entries = Vec::new();
    let mut offset = 1;
    while offset + ENTRY_LEN <= buf.len() {
        let mut dest_bytes = [0u8; 7];
        dest_bytes.copy_from_slice(&buf[offset..offset + 7]);
        let destination = ax25::decode_address(&dest_bytes);
        offset += 7;

        let alias = std::str::from_utf8(&buf[offset..offset + 6])
            .ok()?
            .trim()
            .to_string();
        offset += 6;

        let mut neighbor_bytes = [0u8; 7];
        neighbor_bytes.copy_from_slice(&buf[offset..offset + 7]);
        let best_neighbor = ax25::decode_address(&neighbor_bytes);
        offset += 7;

        let quality = buf[offset];
        offset += 1;

        entries.push(BroadcastEntry {
            destination,
            alias,
            best_neighbor,
            quality,
        });
    }
    Some(entries)
}

/// A directly-heard neighbor (spec §3 "Neighbor").
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub call: Address,
    pub last_heard: SystemTime,
    pub via_inference: bool,
}

/// A route to a non-neighbor destination (spec §3 "Route").
#[derive(Debug, Clone)]
pub struct Route {
    pub destination: Address,
    pub next_hop: Address,
    pub hop_count: u8,
    pub quality: u8,
    pub last_updated: SystemTime,
    pub source: RouteSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    Classic,
    Inferred,
}

/// Filters the combined route table can be viewed through (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingView {
    Classic,
    Inferred,
    Hybrid,
}

/// Tracks origin broadcast interval via an exponential moving average, to
/// drive an adaptive staleness policy instead of a single fixed TTL (spec
/// §4.6).
struct OriginIntervalTracker {
    last_broadcast_at: Option<SystemTime>,
    ema_interval: Option<Duration>,
}

const INTERVAL_EMA_ALPHA: f64 = 0.3;
/// Broadcasts from the same origin closer together than this are treated as
/// duplicates of the same announcement cycle, not a new interval sample.
const GUARD_WINDOW: Duration = Duration::from_secs(5);

impl OriginIntervalTracker {
    fn new() -> Self {
        Self {
            last_broadcast_at: None,
            ema_interval: None,
        }
    }

    fn observe(&mut self, now: SystemTime) {
        if let Some(last) = self.last_broadcast_at {
            if let Ok(delta) = now.duration_since(last) {
                if delta < GUARD_WINDOW {
                    return; // duplicate within the guard window, ignore
                }
                self.ema_interval = Some(match self.ema_interval {
                    None => delta,
                    Some(prev) => {
                        let blended = INTERVAL_EMA_ALPHA * delta.as_secs_f64()
                            + (1.0 - INTERVAL_EMA_ALPHA) * prev.as_secs_f64();
                        Duration::from_secs_f64(blended)
                    }
                });
            }
        }
        self.last_broadcast_at = Some(now);
    }

    /// Adaptive staleness: 3x the learned interval, or the default TTL
    /// until enough samples exist to estimate one.
    fn adaptive_ttl(&self) -> Duration {
        match self.ema_interval {
            Some(interval) => interval.saturating_mul(3),
            None => decay::DEFAULT_TTL,
        }
    }
}

/// `hopPenalty = 1 / (1 + hops^2)`; `routeQuality = clamp(neighborQuality *
/// hopPenalty, 0..255)`, used to rank candidate routes to the same
/// destination (spec §4.6). Ties are broken in `better_route` by (higher
/// neighbor quality, then lexicographic next-hop, then earliest
/// last-updated).
pub fn route_quality(quality: u8, hop_count: u8) -> f64 {
    let hops = hop_count as f64;
    let hop_penalty = 1.0 / (1.0 + hops * hops);
    (quality as f64 * hop_penalty).clamp(0.0, 255.0)
}

fn better_route(a: &Route, b: &Route) -> bool {
    let qa = route_quality(a.quality, a.hop_count);
    let qb = route_quality(b.quality, b.hop_count);
    if (qa - qb).abs() > f64::EPSILON {
        return qa > qb;
    }
    if a.quality != b.quality {
        return a.quality > b.quality;
    }
    let next_hop_a = a.next_hop.to_string();
    let next_hop_b = b.next_hop.to_string();
    if next_hop_a != next_hop_b {
        return next_hop_a < next_hop_b;
    }
    a.last_updated < b.last_updated
}

/// Neighbor/route table built from classic NET/ROM broadcasts and inferred
/// third-party UI frame observations (spec §4.6).
pub struct RoutingTable {
    neighbors: HashMap<Address, Neighbor>,
    routes: HashMap<Address, Route>,
    origin_intervals: HashMap<Address, OriginIntervalTracker>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            neighbors: HashMap::new(),
            routes: HashMap::new(),
            origin_intervals: HashMap::new(),
        }
    }

    /// Ingest a classic NET/ROM broadcast heard directly from `origin`
    /// (spec §4.6).
    pub fn ingest_broadcast(&mut self, origin: Address, entries: Vec<BroadcastEntry>, now: SystemTime) {
        self.origin_intervals
            .entry(origin.clone())
            .or_insert_with(OriginIntervalTracker::new)
            .observe(now);

        self.neighbors.entry(origin.clone()).or_insert_with(|| Neighbor {
            call: origin.clone(),
            last_heard: now,
            via_inference: false,
        });
        if let Some(n) = self.neighbors.get_mut(&origin) {
            n.last_heard = now;
            n.via_inference = false;
        }

        for entry in entries {
            // We can only reach `entry.destination` through `origin` (the
            // broadcaster), regardless of which neighbor *it* used — but
            // when that neighbor isn't `origin` itself, the destination is
            // at least one hop further into the network than a destination
            // `origin` serves directly (spec §4.6 multi-hop semantics).
            let hop_count = if entry.best_neighbor == origin { 1 } else { 2 };
            let candidate = Route {
                destination: entry.destination.clone(),
                next_hop: origin.clone(),
                hop_count,
                quality: entry.quality,
                last_updated: now,
                source: RouteSource::Classic,
            };
            self.offer_route(candidate);
        }
    }

    /// Infer a neighbor (and, transitively, a 1-hop route) from overhearing
    /// a third-party UI frame `from -> to` that was not addressed to us
    /// (spec §4.6 "inferred routing").
    pub fn infer_from_ui_frame(&mut self, from: Address, now: SystemTime) {
        let n = self.neighbors.entry(from.clone()).or_insert_with(|| Neighbor {
            call: from.clone(),
            last_heard: now,
            via_inference: true,
        });
        n.last_heard = now;
    }

    /// Offer a route recovered from a persisted snapshot, subject to the
    /// same best-route comparison as a freshly heard broadcast (spec §4.8).
    pub fn offer_restored_route(&mut self, candidate: Route) {
        self.offer_route(candidate);
    }

    fn offer_route(&mut self, candidate: Route) {
        match self.routes.get(&candidate.destination) {
            Some(existing) if !better_route(&candidate, existing) => {}
            _ => {
                self.routes.insert(candidate.destination.clone(), candidate);
            }
        }
    }

    /// Destinations and routes visible under a given view filter (spec
    /// §4.6 classic/inferred/hybrid views).
    pub fn routes(&self, view: RoutingView) -> Vec<&Route> {
        self.routes
            .values()
            .filter(|r| match view {
                RoutingView::Classic => r.source == RouteSource::Classic,
                RoutingView::Inferred => r.source == RouteSource::Inferred,
                RoutingView::Hybrid => true,
            })
            .collect()
    }

    pub fn neighbors(&self) -> impl Iterator<Item = &Neighbor> {
        self.neighbors.values()
    }

    /// TTL to apply when judging staleness of entries heard from `origin`,
    /// adapting to that origin's observed broadcast cadence (spec §4.6).
    pub fn adaptive_ttl_for(&self, origin: &Address) -> Duration {
        self.origin_intervals
            .get(origin)
            .map(|t| t.adaptive_ttl())
            .unwrap_or(decay::DEFAULT_TTL)
    }

    /// Learned broadcast intervals, for persistence (spec §4.8).
    pub fn origin_intervals(&self) -> impl Iterator<Item = (&Address, Duration)> {
        self.origin_intervals
            .iter()
            .filter_map(|(addr, t)| t.ema_interval.map(|d| (addr, d)))
    }

    /// Seed a learned origin interval recovered from a persisted snapshot.
    pub fn restore_origin_interval(&mut self, origin: Address, interval: Duration) {
        self.origin_intervals
            .entry(origin)
            .or_insert_with(OriginIntervalTracker::new)
            .ema_interval = Some(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    /// Builds a broadcast payload per spec §4.6:
    /// `0xFF | (destCall(7 shifted) | alias(6 ASCII) | bestNeighbor(7
    /// shifted) | quality(1))*`. The broadcaster itself is never in the
    /// payload — callers pass it as `frame.from` to `ingest_broadcast`.
    fn broadcast_bytes(entries: &[(&str, &str, &str, u8)]) -> Vec<u8> {
        let mut buf = vec![0xFFu8];
        for (dest, alias, best_neighbor, quality) in entries {
            buf.extend_from_slice(&ax25::encode_address(&Address::new(*dest, 0), false));
            let mut a = [b' '; 6];
            for (i, b) in alias.bytes().take(6).enumerate() {
                a[i] = b;
            }
            buf.extend_from_slice(&a);
            buf.extend_from_slice(&ax25::encode_address(&Address::new(*best_neighbor, 0), false));
            buf.push(*quality);
        }
        buf
    }

    #[test]
    fn broadcast_creates_neighbor_and_routes_seed_scenario() {
        let origin = Address::new("W0RLY", 0);
        let bytes = broadcast_bytes(&[("W0DST", "NODE1", "W0RLY", 200)]);
        let entries = parse_broadcast(&bytes).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].alias, "NODE1");
        assert_eq!(entries[0].best_neighbor, origin);

        let mut table = RoutingTable::new();
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        table.ingest_broadcast(origin.clone(), entries, now);

        assert!(table.neighbors().any(|n| n.call == origin));
        let routes = table.routes(RoutingView::Classic);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].destination, Address::new("W0DST", 0));
        assert_eq!(routes[0].next_hop, origin);
        assert_eq!(routes[0].hop_count, 1);
    }

    #[test]
    fn entry_via_a_different_neighbor_is_two_hops() {
        let origin = Address::new("W0RLY", 0);
        let bytes = broadcast_bytes(&[("W0DST", "NODE1", "W0FAR", 200)]);
        let entries = parse_broadcast(&bytes).unwrap();
        let mut table = RoutingTable::new();
        let now = UNIX_EPOCH;
        table.ingest_broadcast(origin.clone(), entries, now);
        let routes = table.routes(RoutingView::Classic);
        assert_eq!(routes[0].next_hop, origin);
        assert_eq!(routes[0].hop_count, 2);
    }

    #[test]
    fn malformed_signature_byte_rejected() {
        assert!(parse_broadcast(&[0x00, 1, 2, 3]).is_none());
    }

    #[test]
    fn route_quality_applies_inverse_square_hop_penalty() {
        assert_eq!(route_quality(200, 1), 100.0);
        assert!((route_quality(255, 2) - 51.0).abs() < 1e-9);
    }

    #[test]
    fn better_route_prefers_higher_route_quality_then_fewer_hops() {
        let now = UNIX_EPOCH;
        let a = Route {
            destination: Address::new("DST", 0),
            next_hop: Address::new("N1", 0),
            hop_count: 1,
            quality: 200,
            last_updated: now,
            source: RouteSource::Classic,
        };
        let b = Route {
            destination: Address::new("DST", 0),
            next_hop: Address::new("N2", 0),
            hop_count: 2,
            quality: 255,
            last_updated: now,
            source: RouteSource::Classic,
        };
        // a: 200 * 1/(1+1) = 100, b: 255 * 1/(1+4) = 51 -> a wins on fewer hops
        assert!(better_route(&a, &b));
    }

    #[test]
    fn better_route_ties_fall_back_to_neighbor_quality_then_next_hop_then_age() {
        let now = UNIX_EPOCH + Duration::from_secs(1000);
        let earlier = now - Duration::from_secs(10);
        // Same route_quality (hop_count and quality both equal): next-hop
        // call breaks the tie lexicographically.
        let a = Route {
            destination: Address::new("DST", 0),
            next_hop: Address::new("AAAAA", 0),
            hop_count: 1,
            quality: 200,
            last_updated: now,
            source: RouteSource::Classic,
        };
        let b = Route {
            destination: Address::new("DST", 0),
            next_hop: Address::new("ZZZZZ", 0),
            hop_count: 1,
            quality: 200,
            last_updated: earlier,
            source: RouteSource::Classic,
        };
        assert!(better_route(&a, &b));

        // Equal quality and next-hop: earliest last_updated wins.
        let c = Route {
            next_hop: Address::new("AAAAA", 0),
            last_updated: earlier,
            ..a.clone()
        };
        assert!(better_route(&c, &a));
    }

    #[test]
    fn duplicate_broadcast_within_guard_window_does_not_skew_interval() {
        let mut tracker = OriginIntervalTracker::new();
        let t0 = UNIX_EPOCH + Duration::from_secs(1000);
        tracker.observe(t0);
        tracker.observe(t0 + Duration::from_secs(1)); // within guard window
        tracker.observe(t0 + Duration::from_secs(60));
        assert!(tracker.ema_interval.unwrap() > Duration::from_secs(50));
    }

    #[test]
    fn inferred_routing_creates_neighbor_without_a_broadcast() {
        let mut table = RoutingTable::new();
        let now = UNIX_EPOCH;
        table.infer_from_ui_frame(Address::new("W0OVH", 0), now);
        assert!(table
            .neighbors()
            .any(|n| n.call == Address::new("W0OVH", 0) && n.via_inference));
    }
}
