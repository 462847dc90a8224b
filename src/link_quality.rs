//! Directed-pair link-quality estimation (spec §3 "Link stat", §4.5).

use crate::address::{is_service_destination, Address};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, SystemTime};

/// Dedup window for a duplicate-suppressed observation stream: KISS-sourced
/// frames carry no inherent delay so duplicates are suppressed with a 0s
/// window; AGWPE-sourced frames get a 250ms window (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    Kiss,
    Agwpe,
}

impl FrameSource {
    fn dedup_window(self) -> Duration {
        match self {
            FrameSource::Kiss => Duration::from_secs(0),
            FrameSource::Agwpe => Duration::from_millis(250),
        }
    }
}

const MAX_OBSERVATIONS: usize = 64;
const EWMA_ALPHA: f64 = 0.2;

struct Observation {
    at: SystemTime,
    delivered: bool,
}

/// Estimated quality for one directed `(from, to)` pair (spec §4.5).
pub struct LinkStat {
    pub from: Address,
    pub to: Address,
    observations: VecDeque<Observation>,
    last_source: Option<FrameSource>,
    last_observed_at: Option<SystemTime>,
    /// Exponentially weighted moving average of delivery ratio, in `0.0..=1.0`.
    pub ewma_quality: f64,
    pub last_updated: SystemTime,
    /// Observations suppressed by the source's dedup window, i.e. repeats of
    /// a frame already counted (spec §4.8 `duplicateCount`).
    pub duplicate_count: u64,
    /// Total observations actually recorded, after dedup suppression (spec
    /// §4.8 `observationCount`).
    pub observation_count: u64,
}

impl LinkStat {
    fn new(from: Address, to: Address, now: SystemTime) -> Self {
        Self {
            from,
            to,
            observations: VecDeque::with_capacity(MAX_OBSERVATIONS),
            last_source: None,
            last_observed_at: None,
            ewma_quality: 1.0,
            last_updated: now,
            duplicate_count: 0,
            observation_count: 0,
        }
    }

    /// Bidirectional ETX-style quality: `df * dr`, clamped into `0.0..=1.0`,
    /// where `df` is this pair's own forward delivery ratio and `dr` is the
    /// reverse pair's delivery ratio, or `1.0` if the reverse pair has never
    /// been observed (spec §4.5).
    pub fn etx_quality(&self, reverse_delivery_ratio: f64) -> f64 {
        let df = self.forward_delivery_ratio();
        let dr = reverse_delivery_ratio.clamp(0.0, 1.0);
        (df * dr).clamp(0.0, 1.0)
    }

    pub fn forward_delivery_ratio(&self) -> f64 {
        if self.observations.is_empty() {
            return 1.0;
        }
        let delivered = self.observations.iter().filter(|o| o.delivered).count();
        delivered as f64 / self.observations.len() as f64
    }

    fn record(&mut self, now: SystemTime, delivered: bool, source: FrameSource) {
        if let Some(last) = self.last_observed_at {
            if self.last_source == Some(source) {
                let window = source.dedup_window();
                if window > Duration::ZERO {
                    if let Ok(since) = now.duration_since(last) {
                        if since < window {
                            self.duplicate_count += 1;
                            return;
                        }
                    }
                }
            }
        }
        self.last_observed_at = Some(now);
        self.last_source = Some(source);

        self.observations.push_back(Observation { at: now, delivered });
        if self.observations.len() > MAX_OBSERVATIONS {
            self.observations.pop_front();
        }
        self.observation_count += 1;

        let sample = if delivered { 1.0 } else { 0.0 };
        self.ewma_quality = EWMA_ALPHA * sample + (1.0 - EWMA_ALPHA) * self.ewma_quality;
        self.last_updated = now;
    }
}

/// Tracks link stats for every directed pair observed (spec §3 "Link
/// stat" keyed by `(from, to)`, §4.5).
pub struct LinkQualityTracker {
    stats: HashMap<(Address, Address), LinkStat>,
}

impl Default for LinkQualityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkQualityTracker {
    pub fn new() -> Self {
        Self {
            stats: HashMap::new(),
        }
    }

    /// Observe one frame `from -> to`; excluded when `to` is a service
    /// destination (beacon/APRS/etc, spec §4.5 invariant).
    pub fn observe(
        &mut self,
        from: &Address,
        to: &Address,
        delivered: bool,
        now: SystemTime,
        source: FrameSource,
    ) {
        if is_service_destination(to.base()) {
            return;
        }
        let key = (from.clone(), to.clone());
        let stat = self
            .stats
            .entry(key)
            .or_insert_with(|| LinkStat::new(from.clone(), to.clone(), now));
        stat.record(now, delivered, source);
    }

    pub fn get(&self, from: &Address, to: &Address) -> Option<&LinkStat> {
        self.stats.get(&(from.clone(), to.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &LinkStat> {
        self.stats.values()
    }

    /// Bidirectional quality for `from -> to` on a `0..=255` scale: the
    /// forward pair's own delivery ratio combined with the reverse pair's,
    /// per the ETX-style formula in spec §4.5. `None` if `from -> to` has
    /// never been observed; the reverse pair defaults to a perfect ratio
    /// when it hasn't been observed either.
    pub fn quality_255(&self, from: &Address, to: &Address) -> Option<u8> {
        let forward = self.get(from, to)?;
        let dr = self
            .get(to, from)
            .map(|r| r.forward_delivery_ratio())
            .unwrap_or(1.0);
        Some((forward.etx_quality(dr) * 255.0).round() as u8)
    }

    /// Export a snapshot of all link stats for persistence (spec §4.8).
    pub fn export(&self) -> Vec<LinkStatRecord> {
        self.stats
            .values()
            .map(|s| {
                let dr_estimate = self.get(&s.to, &s.from).map(|r| r.forward_delivery_ratio());
                let df_estimate = Some(s.forward_delivery_ratio());
                let quality = (s.etx_quality(dr_estimate.unwrap_or(1.0)) * 255.0).round() as u8;
                LinkStatRecord {
                    from: s.from.to_string(),
                    to: s.to.to_string(),
                    quality,
                    ewma_quality: s.ewma_quality,
                    last_updated_epoch_secs: s
                        .last_updated
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs(),
                    df_estimate,
                    dr_estimate,
                    duplicate_count: s.duplicate_count,
                    observation_count: s.observation_count,
                }
            })
            .collect()
    }

    /// Import previously persisted link stats, clamping quality into
    /// `0.0..=1.0` against a corrupted or hand-edited snapshot (spec §4.8).
    pub fn import(&mut self, records: Vec<LinkStatRecord>, now: SystemTime) {
        for r in records {
            let (Some(from), Some(to)) = (Address::parse(&r.from), Address::parse(&r.to)) else {
                continue;
            };
            let mut stat = LinkStat::new(from.clone(), to.clone(), now);
            stat.ewma_quality = r.ewma_quality.clamp(0.0, 1.0);
            stat.last_updated = crate::decay::sanitize_timestamp(r.last_updated_epoch_secs, now);
            stat.duplicate_count = r.duplicate_count;
            stat.observation_count = r.observation_count;
            self.stats.insert((from, to), stat);
        }
    }
}

/// Serializable record for one link stat (spec §3 "Link stat", §4.8
/// persistence).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LinkStatRecord {
    pub from: String,
    pub to: String,
    /// Bidirectional ETX-style quality on a `0..=255` scale.
    pub quality: u8,
    pub ewma_quality: f64,
    pub last_updated_epoch_secs: u64,
    pub df_estimate: Option<f64>,
    pub dr_estimate: Option<f64>,
    pub duplicate_count: u64,
    pub observation_count: u64,
}
