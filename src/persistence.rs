//! Snapshot persistence for routing/link-quality state (spec §3
//! "Persistence snapshot", §4.8).

use crate::decay;
use crate::link_quality::LinkStatRecord;
use crate::netrom::{Route, RouteSource, RoutingTable};
use crate::address::Address;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborRecord {
    pub call: String,
    pub last_heard_epoch_secs: u64,
    pub via_inference: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRecord {
    pub destination: String,
    pub next_hop: String,
    pub hop_count: u8,
    pub quality: u8,
    pub last_updated_epoch_secs: u64,
    pub classic: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginIntervalRecord {
    pub origin: String,
    pub interval_secs: u64,
}

/// The full on-disk snapshot (spec §3 "Persistence snapshot").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub config_hash: u64,
    pub saved_at_epoch_secs: u64,
    pub neighbors: Vec<NeighborRecord>,
    pub routes: Vec<RouteRecord>,
    pub link_stats: Vec<LinkStatRecord>,
    pub origin_intervals: Vec<OriginIntervalRecord>,
}

/// Reasons a snapshot may be rejected at load time (spec §4.8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadRejection {
    TooOld,
    ConfigMismatch,
}

/// Export the live routing and link-quality state into a `Snapshot` ready
/// for serialization.
pub fn export(
    table: &RoutingTable,
    link_quality: &crate::link_quality::LinkQualityTracker,
    config_hash: u64,
    now: SystemTime,
) -> Snapshot {
    let neighbors = table
        .neighbors()
        .map(|n| NeighborRecord {
            call: n.call.to_string(),
            last_heard_epoch_secs: epoch_secs(n.last_heard),
            via_inference: n.via_inference,
        })
        .collect();
    let routes = table
        .routes(crate::netrom::RoutingView::Hybrid)
        .into_iter()
        .map(|r| RouteRecord {
            destination: r.destination.to_string(),
            next_hop: r.next_hop.to_string(),
            hop_count: r.hop_count,
            quality: r.quality,
            last_updated_epoch_secs: epoch_secs(r.last_updated),
            classic: r.source == RouteSource::Classic,
        })
        .collect();
    let origin_intervals = table
        .origin_intervals()
        .map(|(origin, interval)| OriginIntervalRecord {
            origin: origin.to_string(),
            interval_secs: interval.as_secs(),
        })
        .collect();
    Snapshot {
        config_hash,
        saved_at_epoch_secs: epoch_secs(now),
        neighbors,
        routes,
        link_stats: link_quality.export(),
        origin_intervals,
    }
}

fn epoch_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Validate a loaded snapshot before applying it: reject one older than
/// `max_snapshot_age` or stamped with a different `expected_config_hash`
/// (spec §4.8 load invalidation).
pub fn validate(
    snapshot: &Snapshot,
    now: SystemTime,
    max_snapshot_age: Duration,
    expected_config_hash: u64,
) -> Result<(), LoadRejection> {
    if snapshot.config_hash != expected_config_hash {
        log::warn!("rejecting snapshot: config hash mismatch");
        return Err(LoadRejection::ConfigMismatch);
    }
    let saved_at = UNIX_EPOCH + Duration::from_secs(snapshot.saved_at_epoch_secs);
    let age = now.duration_since(saved_at).unwrap_or(Duration::ZERO);
    if age > max_snapshot_age {
        log::warn!("rejecting snapshot: age {age:?} exceeds max {max_snapshot_age:?}");
        return Err(LoadRejection::TooOld);
    }
    Ok(())
}

/// Apply a validated snapshot into a fresh `RoutingTable` and
/// `LinkQualityTracker`, sanitizing every persisted timestamp against
/// corrupt sentinel values (spec §4.8).
pub fn import(
    snapshot: &Snapshot,
    now: SystemTime,
) -> (RoutingTable, crate::link_quality::LinkQualityTracker) {
    let mut table = RoutingTable::new();
    for n in &snapshot.neighbors {
        let Some(call) = Address::parse(&n.call) else {
            continue;
        };
        let last_heard = decay::sanitize_timestamp(n.last_heard_epoch_secs, now);
        if n.via_inference {
            table.infer_from_ui_frame(call, last_heard);
        } else {
            table.ingest_broadcast(call, Vec::new(), last_heard);
        }
    }
    for r in &snapshot.routes {
        let (Some(destination), Some(next_hop)) =
            (Address::parse(&r.destination), Address::parse(&r.next_hop))
        else {
            continue;
        };
        let last_updated = decay::sanitize_timestamp(r.last_updated_epoch_secs, now);
        table.offer_restored_route(Route {
            destination,
            next_hop,
            hop_count: r.hop_count,
            quality: r.quality,
            last_updated,
            source: if r.classic {
                RouteSource::Classic
            } else {
                RouteSource::Inferred
            },
        });
    }
    for oi in &snapshot.origin_intervals {
        if let Some(origin) = Address::parse(&oi.origin) {
            table.restore_origin_interval(origin, Duration::from_secs(oi.interval_secs));
        }
    }
    let mut link_quality = crate::link_quality::LinkQualityTracker::new();
    link_quality.import(snapshot.link_stats.clone(), now);
    (table, link_quality)
}

/// Drop neighbors/routes last updated more than `retention_days` ago,
/// clamping `retention_days` into a sane `1..=365` range so a corrupted
/// config value can't wipe the table or never prune it (spec §4.8
/// `pruneOldEntries`).
pub fn prune_old_entries(
    neighbors: &mut Vec<NeighborRecord>,
    routes: &mut Vec<RouteRecord>,
    now: SystemTime,
    retention_days: i64,
) {
    let retention_days = retention_days.clamp(1, 365) as u64;
    let cutoff = epoch_secs(now).saturating_sub(retention_days * 86_400);
    neighbors.retain(|n| n.last_heard_epoch_secs >= cutoff);
    routes.retain(|r| r.last_updated_epoch_secs >= cutoff);
}
