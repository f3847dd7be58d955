//! tracking — cross-frame identity debounce for flickering detections
//!
//! Recognizer output flickers: a payload decodes one frame and comes back
//! empty the next, and boxes jitter by a few pixels. The cache gives each
//! physical object a stable identity by greedily matching every incoming
//! rectangle against the entries it already holds, coasting entries
//! through short gaps, and scoring how consistently an entry's payload has
//! decoded over its lifetime.
//!
//! Matching is a per-detection greedy best-match, not a globally optimal
//! assignment. The observed debounce behaviour depends on exactly this
//! approximation (and on first-come-first-served claim order), so it is
//! kept as-is.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::detection::RectF;

// ── Constants ────────────────────────────────────────────────────────────────

/// Consistent-run value stamped by a high-fidelity revalidation pass.
/// High enough that a validated payload dominates the stability score even
/// after a few subsequent flickers.
const VALIDATED_RUN_FLOOR: u32 = 10;

// ── Configuration ────────────────────────────────────────────────────────────

/// How incoming rectangles are associated with existing entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchAlgorithm {
    /// Match when box centres are within `distance_threshold` pixels;
    /// closer is better.
    CentroidDistance,
    /// Match when the overlap ratio reaches `overlap_threshold`; more
    /// overlap is better.
    OverlapRatio,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub enabled: bool,
    /// Eviction horizon: an entry unmatched for more than this many frames
    /// is dropped.
    pub max_frames: u32,
    pub algorithm: MatchAlgorithm,
    /// Centroid-distance acceptance bound, overlay pixels.
    pub distance_threshold: f32,
    /// Overlap-ratio acceptance bound, 0..1.
    pub overlap_threshold: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_frames: 5,
            algorithm: MatchAlgorithm::CentroidDistance,
            distance_threshold: 72.0,
            overlap_threshold: 0.3,
        }
    }
}

// ── Tracked entry ────────────────────────────────────────────────────────────

/// One tracked identity. Owned exclusively by the cache's internal arena;
/// callers only ever see [`TrackSnapshot`] copies, so eviction can never
/// leave a dangling handle.
#[derive(Debug, Clone)]
struct TrackedEntry {
    id: u32,
    rect: RectF,
    payload: String,
    /// Frames since last matched (0 = matched this frame, before the tick).
    age: u32,
    consistent_run: u32,
    change_count: u32,
    needs_validation: bool,
}

impl TrackedEntry {
    fn new(id: u32, rect: RectF, payload: &str) -> Self {
        Self {
            id,
            rect,
            payload: payload.to_string(),
            age: 0,
            consistent_run: 1,
            change_count: 0,
            needs_validation: payload.is_empty(),
        }
    }

    /// Feed one frame's payload into the stability counters.
    fn observe(&mut self, payload: &str) {
        if payload == self.payload {
            self.consistent_run += 1;
        } else {
            self.consistent_run = 1;
            self.change_count += 1;
            self.payload = payload.to_string();
        }
        if payload.is_empty() {
            self.needs_validation = true;
        }
    }

    fn stability(&self) -> f32 {
        self.consistent_run as f32 / (self.consistent_run + self.change_count) as f32
    }

    fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            id: self.id,
            rect: self.rect,
            payload: self.payload.clone(),
            age: self.age,
            stability: self.stability(),
            needs_validation: self.needs_validation,
        }
    }
}

/// Copy of a tracked entry's observable state.
#[derive(Debug, Clone, Serialize)]
pub struct TrackSnapshot {
    pub id: u32,
    pub rect: RectF,
    pub payload: String,
    pub age: u32,
    /// `consistent_run / (consistent_run + change_count)`; 1.0 means the
    /// payload has never flickered.
    pub stability: f32,
    pub needs_validation: bool,
}

// ── Cache ────────────────────────────────────────────────────────────────────

pub struct TrackingCache {
    config: TrackerConfig,
    entries: Vec<TrackedEntry>,
    next_id: u32,
}

impl TrackingCache {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Match one detection against the unclaimed entries and update the
    /// winner, or insert a new entry if nothing qualifies.
    ///
    /// `claimed` is the caller's per-frame claim bitset: one flag per
    /// entry, reset by the caller at the start of each frame. The cache
    /// grows it as entries are inserted but never clears it, so matching
    /// order across a frame stays first-come-first-served.
    pub fn match_and_upsert(
        &mut self,
        rect: RectF,
        payload: &str,
        claimed: &mut Vec<bool>,
    ) -> TrackSnapshot {
        claimed.resize(self.entries.len(), false);

        let mut best: Option<(usize, f32)> = None;
        for (idx, entry) in self.entries.iter().enumerate() {
            if claimed[idx] {
                continue;
            }
            let score = match self.config.algorithm {
                MatchAlgorithm::CentroidDistance => {
                    let distance = centroid_distance(&entry.rect, &rect);
                    if distance <= self.config.distance_threshold {
                        Some(1.0 / (1.0 + distance))
                    } else {
                        None
                    }
                }
                MatchAlgorithm::OverlapRatio => {
                    let overlap = entry.rect.overlap_ratio(&rect);
                    if overlap >= self.config.overlap_threshold {
                        Some(overlap)
                    } else {
                        None
                    }
                }
            };
            let Some(score) = score else { continue };
            // Strictly-greater comparison keeps the earliest candidate on
            // a tied score.
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((idx, score));
            }
        }

        match best {
            Some((idx, score)) => {
                claimed[idx] = true;
                let entry = &mut self.entries[idx];
                entry.rect = rect;
                entry.age = 0;
                entry.observe(payload);
                trace!(id = entry.id, score, "matched tracked entry");
                entry.snapshot()
            }
            None => {
                let entry = TrackedEntry::new(self.next_id, rect, payload);
                self.next_id += 1;
                debug!(id = entry.id, "new tracked entry");
                let snapshot = entry.snapshot();
                self.entries.push(entry);
                claimed.push(true);
                snapshot
            }
        }
    }

    /// Advance the frame clock: run once per frame after all matching is
    /// done. Every entry ages by one; entries past the horizon are dropped.
    pub fn tick_and_evict(&mut self) {
        let horizon = self.config.max_frames;
        for entry in &mut self.entries {
            entry.age += 1;
        }
        self.entries.retain(|entry| {
            if entry.age > horizon {
                debug!(id = entry.id, age = entry.age, "evicting stale entry");
                false
            } else {
                true
            }
        });
    }

    /// Stamp an entry with a payload confirmed by a high-fidelity
    /// revalidation pass. Distinct from normal matching: the consistent
    /// run is forced to a fixed floor and the change count is cleared, so
    /// the validated value immediately reads as stable.
    ///
    /// Returns false if the entry has been evicted in the meantime.
    pub fn confirm_validated(&mut self, id: u32, payload: &str) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) else {
            return false;
        };
        entry.payload = payload.to_string();
        entry.consistent_run = VALIDATED_RUN_FLOOR;
        entry.change_count = 0;
        entry.needs_validation = false;
        debug!(id, "entry stamped with validated payload");
        true
    }

    /// Copies of all live entries, for the renderer.
    pub fn snapshots(&self) -> Vec<TrackSnapshot> {
        self.entries.iter().map(TrackedEntry::snapshot).collect()
    }

    /// Drop all tracked identities (session restart / scene change).
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

fn centroid_distance(a: &RectF, b: &RectF) -> f32 {
    let (ax, ay) = a.center();
    let (bx, by) = b.center();
    ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
}
