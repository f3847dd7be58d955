//! pipeline — single-worker frame loop: map, filter, debounce, evaluate
//!
//! One frame is fully processed before the next is accepted; keep-latest
//! backpressure (dropping superseded frames) belongs to the acquisition
//! layer upstream. The tracker state is owned exclusively by this worker,
//! because match → evict is a read-then-write sequence that must not
//! interleave. Layout and rotation changes arrive from other threads
//! through [`SharedGeometry`], which publishes whole snapshots only.

use std::sync::{Arc, Mutex};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::detection::{Detection, RectF};
use crate::mapper::{OverlayMapper, Rotation, ViewGeometry};
use crate::tracking::{TrackSnapshot, TrackerConfig, TrackingCache};
use crate::trigger::ConditionSet;

/// Cadence of the periodic frame summary log.
const SUMMARY_INTERVAL: u64 = 300;

// ── Shared geometry handle ───────────────────────────────────────────────────

/// Cloneable handle for publishing geometry to the frame worker from a
/// layout/rotation callback on another thread. The whole snapshot is
/// replaced under one lock, so a reader can never combine a stale width
/// with a fresh height.
#[derive(Clone, Default)]
pub struct SharedGeometry(Arc<Mutex<ViewGeometry>>);

impl SharedGeometry {
    pub fn new(geometry: ViewGeometry) -> Self {
        Self(Arc::new(Mutex::new(geometry)))
    }

    pub fn publish(&self, geometry: ViewGeometry) {
        match self.0.lock() {
            Ok(mut guard) => *guard = geometry,
            Err(poisoned) => *poisoned.into_inner() = geometry,
        }
    }

    pub fn snapshot(&self) -> ViewGeometry {
        match self.0.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

// ── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub geometry: ViewGeometry,
    /// Display rotation recorded when the pipeline starts; per-frame
    /// mapping normalises relative to this.
    pub initial_rotation: Rotation,
    pub tracker: TrackerConfig,
    pub conditions: ConditionSet,
    /// Overlay-space region restricting which detections are eligible; a
    /// detection whose mapped centre falls outside is dropped before
    /// tracking and evaluation.
    pub capture_zone: Option<RectF>,
    /// Unanchored payload pre-filter. An invalid expression disables the
    /// filter rather than failing the pipeline.
    pub payload_filter: Option<String>,
}

// ── Frame input / output ─────────────────────────────────────────────────────

/// One frame of recognizer output plus the orientation it was captured in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionFrame {
    /// Raw-sensor-to-upright rotation declared by the recognizer.
    pub sensor_rotation_degrees: i32,
    /// Device/display rotation at capture time.
    pub display_rotation: Rotation,
    pub detections: Vec<Detection>,
}

/// Overlay-space box handed to the renderer.
#[derive(Debug, Clone, Serialize)]
pub struct OverlayBox {
    pub rect: RectF,
    pub label: String,
    /// Stable tracked identity, absent when tracking is disabled.
    pub track_id: Option<u32>,
    pub stability: f32,
}

impl OverlayBox {
    fn from_snapshot(snapshot: TrackSnapshot) -> Self {
        Self {
            rect: snapshot.rect,
            label: snapshot.payload,
            track_id: Some(snapshot.id),
            stability: snapshot.stability,
        }
    }
}

/// Everything downstream collaborators need from one processed frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameOutcome {
    /// Stable overlay geometry for the renderer; unordered.
    pub overlays: Vec<OverlayBox>,
    /// Detections that survived mapping and pre-filtering, with their
    /// original sensor-space rectangles, for the capture pipeline.
    pub accepted: Vec<Detection>,
    /// Auto-capture trigger decision for this frame.
    pub should_capture: bool,
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

pub struct FramePipeline {
    mapper: OverlayMapper,
    shared_geometry: SharedGeometry,
    tracker: TrackingCache,
    conditions: ConditionSet,
    capture_zone: Option<RectF>,
    payload_filter: Option<Regex>,
    /// Per-frame claim bitset, reused across frames to avoid reallocation.
    claimed: Vec<bool>,
    frames: u64,
    captures: u64,
}

impl FramePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let payload_filter = config.payload_filter.as_deref().and_then(|raw| {
            match Regex::new(raw) {
                Ok(re) => Some(re),
                Err(err) => {
                    debug!(%err, "invalid payload filter, filtering disabled");
                    None
                }
            }
        });

        Self {
            mapper: OverlayMapper::new(config.geometry, config.initial_rotation),
            shared_geometry: SharedGeometry::new(config.geometry),
            tracker: TrackingCache::new(config.tracker),
            conditions: config.conditions,
            capture_zone: config.capture_zone,
            payload_filter,
            claimed: Vec::new(),
            frames: 0,
            captures: 0,
        }
    }

    /// Handle for publishing layout/rotation geometry changes from another
    /// thread; the worker picks the new snapshot up at the next frame.
    pub fn geometry_handle(&self) -> SharedGeometry {
        self.shared_geometry.clone()
    }

    /// Forward a high-fidelity revalidation result onto a tracked entry.
    pub fn confirm_validated(&mut self, track_id: u32, payload: &str) -> bool {
        self.tracker.confirm_validated(track_id, payload)
    }

    /// Drop all tracked identities and counters (session restart).
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.frames = 0;
        self.captures = 0;
    }

    /// Run one frame through mapping, pre-filtering, debouncing, and
    /// condition evaluation. Synchronous and bounded; never fails — bad
    /// geometry degrades inside the mapper and bad patterns degrade inside
    /// the engine.
    pub fn process_frame(&mut self, frame: &DetectionFrame) -> FrameOutcome {
        self.mapper.apply_geometry(self.shared_geometry.snapshot());

        let mut accepted = Vec::new();
        let mut mapped = Vec::new();
        for detection in &frame.detections {
            let effective = self
                .mapper
                .transform_raw_to_effective(detection.rect, frame.sensor_rotation_degrees);
            let overlay = self.mapper.map_to_overlay(effective, frame.display_rotation);

            if let Some(zone) = self.capture_zone {
                if !zone.contains_point(overlay.center()) {
                    trace!(
                        hash = detection.source_hash,
                        "detection outside capture zone"
                    );
                    continue;
                }
            }
            if let Some(filter) = &self.payload_filter {
                if !filter.is_match(&detection.payload) {
                    trace!(
                        hash = detection.source_hash,
                        "detection rejected by payload filter"
                    );
                    continue;
                }
            }

            mapped.push(overlay);
            accepted.push(detection.clone());
        }

        let overlays = if self.tracker.config().enabled {
            self.claimed.clear();
            for (overlay, detection) in mapped.iter().zip(&accepted) {
                self.tracker
                    .match_and_upsert(*overlay, &detection.payload, &mut self.claimed);
            }
            self.tracker.tick_and_evict();
            self.tracker
                .snapshots()
                .into_iter()
                .map(OverlayBox::from_snapshot)
                .collect()
        } else {
            mapped
                .iter()
                .zip(&accepted)
                .map(|(rect, detection)| OverlayBox {
                    rect: *rect,
                    label: detection.payload.clone(),
                    track_id: None,
                    stability: 1.0,
                })
                .collect()
        };

        let should_capture = self.conditions.evaluate(&accepted);

        self.frames += 1;
        if should_capture {
            self.captures += 1;
        }
        if self.frames % SUMMARY_INTERVAL == 0 {
            info!(
                frames = self.frames,
                tracked = self.tracker.len(),
                captures = self.captures,
                "pipeline frame summary"
            );
        }

        FrameOutcome {
            overlays,
            accepted,
            should_capture,
        }
    }
}
