//! mapper — raw-sensor, effective, and overlay coordinate spaces
//!
//! Three spaces matter to the overlay:
//!
//! * **raw sensor** — the recognizer's native pixel grid, fixed by the
//!   camera mount.
//! * **effective** — raw sensor normalised upright by the per-frame
//!   rotation the recognizer declares (always one of 0/90/180/270).
//! * **overlay** — the on-screen viewport, uniformly "fill"-scaled and
//!   centred relative to the effective image (the uncovered remainder is
//!   letterboxed away off-screen).
//!
//! Every rotation branch is a closed-form integer coordinate swap. The
//! debounce matcher downstream compares geometry pixel-for-pixel across
//! frames, so the remaps must be exact; only the final viewport scaling
//! introduces fractional coordinates.

use serde::{Deserialize, Serialize};

use crate::detection::{Rect, RectF};

// ── Rotation ─────────────────────────────────────────────────────────────────

/// Display or sensor rotation, restricted to quarter turns.
///
/// Serialised as degrees (`0`, `90`, `180`, `270`) so recordings and
/// persisted configuration stay in the units the platform reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> i32 {
        self.index() * 90
    }

    /// Quarter-turn index, 0..=3.
    pub fn index(self) -> i32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 1,
            Self::Deg180 => 2,
            Self::Deg270 => 3,
        }
    }

    /// Quarter turns separating `self` from `initial`, always 0..=3.
    pub fn relative_to(self, initial: Rotation) -> i32 {
        (self.index() - initial.index()).rem_euclid(4)
    }
}

impl TryFrom<i32> for Rotation {
    type Error = String;

    fn try_from(degrees: i32) -> Result<Self, Self::Error> {
        Self::from_degrees(degrees).ok_or_else(|| format!("unsupported rotation: {degrees} degrees"))
    }
}

impl From<Rotation> for i32 {
    fn from(rotation: Rotation) -> i32 {
        rotation.degrees()
    }
}

// ── Geometry snapshot ────────────────────────────────────────────────────────

/// Complete dimensional configuration of the mapper.
///
/// Treated as one value: a layout or rotation change publishes a whole new
/// snapshot, never a field at a time, so the frame worker can never combine
/// a stale width with a fresh height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewGeometry {
    pub effective_width: i32,
    pub effective_height: i32,
    pub raw_width: i32,
    pub raw_height: i32,
    pub overlay_width: i32,
    pub overlay_height: i32,
}

impl ViewGeometry {
    fn has_overlay(&self) -> bool {
        self.overlay_width > 0 && self.overlay_height > 0
    }

    fn has_effective(&self) -> bool {
        self.effective_width > 0 && self.effective_height > 0
    }

    /// The fixed sensor mount is inferred rather than configured: when the
    /// raw dimensions are the effective dimensions swapped, the sensor is
    /// mounted a quarter turn from upright. Square sensors are ambiguous
    /// and treated as unrotated.
    fn mount_quarter_turned(&self) -> bool {
        self.raw_width == self.effective_height
            && self.raw_height == self.effective_width
            && self.raw_width != self.raw_height
    }
}

// ── Quarter-turn remap ───────────────────────────────────────────────────────

/// Rotate `rect` by `quarter` quarter turns inside a `width × height` space.
///
/// Exact integer arithmetic in all four branches. The source edge ordering
/// guarantees the result is already ordered, but `Rect::new` re-normalises
/// for safety against degenerate inputs.
fn rotate_quarter(rect: Rect, quarter: i32, width: i32, height: i32) -> Rect {
    match quarter.rem_euclid(4) {
        1 => Rect::new(
            rect.top,
            width - rect.right,
            rect.bottom,
            width - rect.left,
        ),
        2 => Rect::new(
            width - rect.right,
            height - rect.bottom,
            width - rect.left,
            height - rect.top,
        ),
        3 => Rect::new(
            height - rect.bottom,
            rect.left,
            height - rect.top,
            rect.right,
        ),
        _ => rect,
    }
}

// ── OverlayMapper ────────────────────────────────────────────────────────────

/// Pure geometric converter between the three coordinate spaces.
///
/// Holds a `ViewGeometry` snapshot plus the rotation recorded when the
/// pipeline started; all methods are pure functions of that state and
/// their arguments.
#[derive(Debug, Clone, Copy)]
pub struct OverlayMapper {
    geometry: ViewGeometry,
    initial_rotation: Rotation,
}

impl OverlayMapper {
    pub fn new(geometry: ViewGeometry, initial_rotation: Rotation) -> Self {
        Self {
            geometry,
            initial_rotation,
        }
    }

    pub fn geometry(&self) -> ViewGeometry {
        self.geometry
    }

    pub fn initial_rotation(&self) -> Rotation {
        self.initial_rotation
    }

    /// Replace the whole geometry snapshot in one call.
    pub fn apply_geometry(&mut self, geometry: ViewGeometry) {
        self.geometry = geometry;
    }

    /// Map an effective-space rectangle into overlay-space.
    ///
    /// Normalises for any display rotation accumulated since the pipeline
    /// started, then applies the uniform fill scale and centring offset.
    /// While the overlay dimensions are still unknown (zero) the input is
    /// returned unchanged; a missing layout must not distort geometry or
    /// abort the frame.
    pub fn map_to_overlay(&self, rect: Rect, current_rotation: Rotation) -> RectF {
        let g = self.geometry;
        if !g.has_overlay() {
            return rect.to_f32();
        }

        let relative = current_rotation.relative_to(self.initial_rotation);
        let upright = rotate_quarter(rect, relative, g.effective_width, g.effective_height);

        // A quarter-turned frame swaps the effective dimensions the
        // viewport must cover.
        let (eff_w, eff_h) = if relative % 2 == 1 {
            (g.effective_height, g.effective_width)
        } else {
            (g.effective_width, g.effective_height)
        };
        if eff_w <= 0 || eff_h <= 0 {
            return upright.to_f32();
        }

        let scale = f32::max(
            g.overlay_width as f32 / eff_w as f32,
            g.overlay_height as f32 / eff_h as f32,
        );
        let dx = (g.overlay_width as f32 - eff_w as f32 * scale) / 2.0;
        let dy = (g.overlay_height as f32 - eff_h as f32 * scale) / 2.0;

        RectF {
            left: upright.left as f32 * scale + dx,
            top: upright.top as f32 * scale + dy,
            right: upright.right as f32 * scale + dx,
            bottom: upright.bottom as f32 * scale + dy,
        }
    }

    /// Translate an overlay-space rectangle (typically a user-drawn region)
    /// back into raw-sensor space for optical region-of-interest cropping.
    ///
    /// Inverts the fill scale and centring offset, then reverses the fixed
    /// sensor-mount rotation inferred from the configured dimensions. The
    /// result is clamped into the sensor bounds.
    pub fn map_overlay_to_raw_sensor(&self, rect: RectF) -> Rect {
        let g = self.geometry;

        let effective = if g.has_overlay() && g.has_effective() {
            let scale = f32::max(
                g.overlay_width as f32 / g.effective_width as f32,
                g.overlay_height as f32 / g.effective_height as f32,
            );
            let dx = (g.overlay_width as f32 - g.effective_width as f32 * scale) / 2.0;
            let dy = (g.overlay_height as f32 - g.effective_height as f32 * scale) / 2.0;
            RectF {
                left: (rect.left - dx) / scale,
                top: (rect.top - dy) / scale,
                right: (rect.right - dx) / scale,
                bottom: (rect.bottom - dy) / scale,
            }
        } else {
            rect
        };

        let effective = Rect::new(
            effective.left.round() as i32,
            effective.top.round() as i32,
            effective.right.round() as i32,
            effective.bottom.round() as i32,
        );

        let raw = if g.mount_quarter_turned() {
            self.transform_effective_to_raw(effective, 90)
        } else {
            effective
        };

        raw.clamp_to(g.raw_width, g.raw_height)
    }

    /// Per-frame normalisation: raw-sensor coordinates into upright
    /// effective coordinates for the declared frame rotation.
    ///
    /// Only the four canonical values are meaningful; any other value is
    /// invalid input and passes the rectangle through unchanged.
    pub fn transform_raw_to_effective(&self, rect: Rect, rotation_degrees: i32) -> Rect {
        match Rotation::from_degrees(rotation_degrees) {
            Some(rotation) => rotate_quarter(
                rect,
                rotation.index(),
                self.geometry.raw_width,
                self.geometry.raw_height,
            ),
            None => rect,
        }
    }

    /// Inverse of [`transform_raw_to_effective`]: effective coordinates
    /// back into raw-sensor coordinates for the same declared rotation.
    ///
    /// [`transform_raw_to_effective`]: OverlayMapper::transform_raw_to_effective
    pub fn transform_effective_to_raw(&self, rect: Rect, rotation_degrees: i32) -> Rect {
        let g = self.geometry;
        match Rotation::from_degrees(rotation_degrees) {
            Some(rotation) => {
                let quarter = rotation.index();
                // The inverse runs inside the rotated space, whose
                // dimensions are the raw dimensions swapped for odd turns.
                let (width, height) = if quarter % 2 == 1 {
                    (g.raw_height, g.raw_width)
                } else {
                    (g.raw_width, g.raw_height)
                };
                rotate_quarter(rect, (4 - quarter) % 4, width, height)
            }
            None => rect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landscape_sensor() -> OverlayMapper {
        // 640×480 sensor mounted upright, overlay matching the effective
        // image exactly so the viewport scale is 1.
        OverlayMapper::new(
            ViewGeometry {
                effective_width: 640,
                effective_height: 480,
                raw_width: 640,
                raw_height: 480,
                overlay_width: 640,
                overlay_height: 480,
            },
            Rotation::Deg0,
        )
    }

    #[test]
    fn raw_to_effective_round_trips_all_canonical_rotations() {
        let mapper = landscape_sensor();
        let rect = Rect::new(120, 40, 300, 220);
        for degrees in [0, 90, 180, 270] {
            let forward = mapper.transform_raw_to_effective(rect, degrees);
            let back = mapper.transform_effective_to_raw(forward, degrees);
            assert_eq!(back, rect, "round trip failed at {degrees} degrees");
        }
    }

    #[test]
    fn non_canonical_rotation_passes_through() {
        let mapper = landscape_sensor();
        let rect = Rect::new(10, 20, 30, 40);
        assert_eq!(mapper.transform_raw_to_effective(rect, 45), rect);
        assert_eq!(mapper.transform_effective_to_raw(rect, -90), rect);
    }

    #[test]
    fn ninety_degree_remap_is_the_exact_integer_form() {
        let mapper = landscape_sensor();
        let rect = Rect::new(120, 40, 300, 220);
        // (top, W-right, bottom, W-left) with W = 640.
        assert_eq!(
            mapper.transform_raw_to_effective(rect, 90),
            Rect::new(40, 340, 220, 520)
        );
    }

    #[test]
    fn identity_rotation_applies_only_scale_and_offset() {
        let mapper = OverlayMapper::new(
            ViewGeometry {
                effective_width: 640,
                effective_height: 480,
                raw_width: 640,
                raw_height: 480,
                overlay_width: 1280,
                overlay_height: 960,
            },
            Rotation::Deg0,
        );
        let rect = Rect::new(100, 50, 200, 150);
        let mapped = mapper.map_to_overlay(rect, Rotation::Deg0);
        assert_eq!(mapped, RectF::new(200.0, 100.0, 400.0, 300.0));
        // Pure function of its inputs: repeating the call changes nothing.
        assert_eq!(mapped, mapper.map_to_overlay(rect, Rotation::Deg0));
    }

    #[test]
    fn fill_scale_centres_the_remainder() {
        // Overlay is wider than the effective aspect: the x scale wins and
        // the vertical remainder is split evenly (negative offset, cropped).
        let mapper = OverlayMapper::new(
            ViewGeometry {
                effective_width: 100,
                effective_height: 100,
                raw_width: 100,
                raw_height: 100,
                overlay_width: 200,
                overlay_height: 100,
            },
            Rotation::Deg0,
        );
        let mapped = mapper.map_to_overlay(Rect::new(0, 0, 100, 100), Rotation::Deg0);
        assert_eq!(mapped, RectF::new(0.0, -50.0, 200.0, 150.0));
    }

    #[test]
    fn quarter_turn_swaps_axes_before_scaling() {
        let mapper = OverlayMapper::new(
            ViewGeometry {
                effective_width: 640,
                effective_height: 480,
                raw_width: 640,
                raw_height: 480,
                overlay_width: 480,
                overlay_height: 640,
            },
            Rotation::Deg0,
        );
        let rect = Rect::new(100, 50, 200, 150);
        let mapped = mapper.map_to_overlay(rect, Rotation::Deg90);
        // Remap first: (50, 440, 150, 540); swapped effective dims 480×640
        // fit the overlay exactly, so scale is 1 with no offset.
        assert_eq!(mapped, RectF::new(50.0, 440.0, 150.0, 540.0));
    }

    #[test]
    fn unknown_overlay_dimensions_degrade_to_identity() {
        let mapper = OverlayMapper::new(
            ViewGeometry {
                effective_width: 640,
                effective_height: 480,
                raw_width: 640,
                raw_height: 480,
                overlay_width: 0,
                overlay_height: 0,
            },
            Rotation::Deg0,
        );
        let rect = Rect::new(5, 6, 7, 8);
        assert_eq!(mapper.map_to_overlay(rect, Rotation::Deg180), rect.to_f32());
    }

    #[test]
    fn overlay_region_round_trips_to_sensor_through_quarter_mount() {
        // Portrait effective image from a landscape sensor: the mount
        // rotation is inferred from the swapped dimensions.
        let mapper = OverlayMapper::new(
            ViewGeometry {
                effective_width: 480,
                effective_height: 640,
                raw_width: 640,
                raw_height: 480,
                overlay_width: 480,
                overlay_height: 640,
            },
            Rotation::Deg0,
        );
        let sensor = Rect::new(100, 50, 200, 150);
        let effective = mapper.transform_raw_to_effective(sensor, 90);
        let overlay = mapper.map_to_overlay(effective, Rotation::Deg0);
        assert_eq!(mapper.map_overlay_to_raw_sensor(overlay), sensor);
    }

    #[test]
    fn overlay_region_is_clamped_into_sensor_bounds() {
        let mapper = landscape_sensor();
        let region = RectF::new(-40.0, -40.0, 900.0, 700.0);
        let clamped = mapper.map_overlay_to_raw_sensor(region);
        assert_eq!(clamped, Rect::new(0, 0, 640, 480));
        assert!(clamped.left <= clamped.right && clamped.top <= clamped.bottom);
    }

    #[test]
    fn rotation_serialises_as_degrees() {
        let json = serde_json::to_string(&Rotation::Deg270).unwrap();
        assert_eq!(json, "270");
        let back: Rotation = serde_json::from_str("90").unwrap();
        assert_eq!(back, Rotation::Deg90);
        assert!(serde_json::from_str::<Rotation>("45").is_err());
    }
}
