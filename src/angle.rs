//! Angle conventions shared by the dials, the hardware units and the rig.
//!
//! Hardware and rig angles live in a bounded logical domain `[min, max]` (degrees).
//! Dials draw on a circle where `0` is at the top and angles grow clockwise, so every
//! conversion goes through an offset (where the dial shows zero) and a direction.

use serde::{Deserialize, Serialize};

const FULL_TURN_DEG: f32 = 360.0;
const HALF_TURN_DEG: f32 = 180.0;
const FALLBACK_BOUNDS: (f32, f32) = (-180.0, 180.0);
/// Recovered values are snapped to this many steps per degree, which absorbs the f32
/// rounding of a display angle near a full turn.
const VALUE_GRID_PER_DEG: f64 = 10_000.0;

/// Where a dial draws the logical value `0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroPosition {
    Top,
    Right,
    Bottom,
    Left,
}

impl ZeroPosition {
    pub const ALL: [ZeroPosition; 4] = [
        ZeroPosition::Top,
        ZeroPosition::Right,
        ZeroPosition::Bottom,
        ZeroPosition::Left,
    ];

    pub fn offset_deg(self) -> f32 {
        match self {
            ZeroPosition::Top => 0.0,
            ZeroPosition::Right => 90.0,
            ZeroPosition::Bottom => 180.0,
            ZeroPosition::Left => 270.0,
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "top" => Some(ZeroPosition::Top),
            "right" => Some(ZeroPosition::Right),
            "bottom" => Some(ZeroPosition::Bottom),
            "left" => Some(ZeroPosition::Left),
            _ => None,
        }
    }
}

/// Wrap any finite angle into `[0, 360)`.
pub fn normalize_360(deg: f32) -> f32 {
    let wrapped = deg.rem_euclid(FULL_TURN_DEG);
    // rem_euclid rounds tiny negative inputs up to exactly 360
    if wrapped >= FULL_TURN_DEG { 0.0 } else { wrapped }
}

/// Canonical representative in `(-180, 180]`; `-180` maps to `+180`.
pub fn canonical_180(deg: f32) -> f32 {
    let wrapped = normalize_360(deg);
    if wrapped > HALF_TURN_DEG {
        wrapped - FULL_TURN_DEG
    } else {
        wrapped
    }
}

fn bounds(min: f32, max: f32) -> (f32, f32) {
    if min.is_finite() && max.is_finite() {
        (min.min(max), min.max(max))
    } else {
        FALLBACK_BOUNDS
    }
}

/// Map a bounded logical value to its position on the dial, in `[0, 360)`.
///
/// The value is clamped into `[min, max]` first; a non-finite value is drawn at `min`.
pub fn to_display_angle(
    value: f32,
    min: f32,
    max: f32,
    zero: ZeroPosition,
    clockwise: bool,
) -> f32 {
    let (lo, hi) = bounds(min, max);
    let value = if value.is_finite() { value.clamp(lo, hi) } else { lo };
    let directed = if clockwise { value } else { -value };
    let full = f64::from(FULL_TURN_DEG);
    normalize_360((f64::from(directed) + f64::from(zero.offset_deg())).rem_euclid(full) as f32)
}

/// Inverse of [`to_display_angle`]: recover the logical value shown at `display_deg`.
///
/// The result is always inside `[min, max]`. When the canonical `(-180, 180]`
/// representative falls outside the range but its full-turn alias is inside, the alias
/// wins, so ranges such as `[-180, 30]` or `[0, 270]` round-trip exactly.
pub fn to_value(
    display_deg: f32,
    min: f32,
    max: f32,
    zero: ZeroPosition,
    clockwise: bool,
) -> f32 {
    let (lo, hi) = bounds(min, max);
    if !display_deg.is_finite() {
        return 0.0_f32.clamp(lo, hi);
    }

    let relative = f64::from(display_deg) - f64::from(zero.offset_deg());
    let directed = if clockwise { relative } else { -relative };
    let snapped = (directed * VALUE_GRID_PER_DEG).round() / VALUE_GRID_PER_DEG;
    let full = f64::from(FULL_TURN_DEG);
    let mut value = snapped.rem_euclid(full);
    if value > f64::from(HALF_TURN_DEG) {
        value -= full;
    }
    let (lo64, hi64) = (f64::from(lo), f64::from(hi));
    if value < lo64 && value + full <= hi64 {
        value += full;
    } else if value > hi64 && value - full >= lo64 {
        value -= full;
    }
    (value as f32).clamp(lo, hi)
}

/// Snap to the nearest multiple of `step`, halves rounding away from zero.
///
/// A step that is not strictly positive and finite is treated as `1`.
pub fn quantize(value: f32, step: f32) -> f32 {
    let step = if step.is_finite() && step > 0.0 { step } else { 1.0 };
    if !value.is_finite() {
        return value;
    }
    (value / step).round() * step
}

/// Pointer offset from the dial centre (screen space, y grows downwards) to a display
/// angle with `0` at the top, clockwise.
pub fn pointer_to_display(dx: f32, dy: f32) -> f32 {
    if !(dx.is_finite() && dy.is_finite()) || (dx == 0.0 && dy == 0.0) {
        return 0.0;
    }
    normalize_360(dy.atan2(dx).to_degrees() + 90.0)
}

/// Per-dial drawing convention.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct DialConvention {
    pub zero: ZeroPosition,
    pub clockwise: bool,
    pub step: f32,
}

impl Default for DialConvention {
    fn default() -> Self {
        Self {
            zero: ZeroPosition::Right,
            clockwise: true,
            step: 5.0,
        }
    }
}

impl DialConvention {
    pub fn display(&self, value: f32, min: f32, max: f32) -> f32 {
        to_display_angle(value, min, max, self.zero, self.clockwise)
    }

    pub fn value(&self, display_deg: f32, min: f32, max: f32) -> f32 {
        to_value(display_deg, min, max, self.zero, self.clockwise)
    }

    /// Value selected by a pointer dragged to `(dx, dy)` from the dial centre.
    pub fn value_from_pointer(&self, dx: f32, dy: f32, min: f32, max: f32) -> f32 {
        let (lo, hi) = bounds(min, max);
        let raw = self.value(pointer_to_display(dx, dy), lo, hi);
        quantize(raw, self.step).clamp(lo, hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RANGES: [(f32, f32); 7] = [
        (-180.0, 30.0),
        (-180.0, 5.0),
        (-150.0, 0.0),
        (-90.0, 90.0),
        (-30.0, 180.0),
        (0.0, 150.0),
        (0.0, 270.0),
    ];

    #[test]
    fn quantize_rounds_to_nearest_step() {
        assert_eq!(quantize(7.0, 5.0), 5.0);
        assert_eq!(quantize(8.0, 5.0), 10.0);
        assert_eq!(quantize(7.5, 5.0), 10.0);
        assert_eq!(quantize(-7.5, 5.0), -10.0);
    }

    #[test]
    fn quantize_treats_bad_step_as_one() {
        assert_eq!(quantize(7.4, 0.0), 7.0);
        assert_eq!(quantize(7.6, -3.0), 8.0);
        assert_eq!(quantize(2.5, f32::NAN), 3.0);
    }

    #[test]
    fn display_value_round_trip_for_every_convention() {
        let step = 5.0;
        for (min, max) in RANGES {
            for zero in ZeroPosition::ALL {
                for clockwise in [true, false] {
                    let mut v = min;
                    while v <= max {
                        let shown = to_display_angle(v, min, max, zero, clockwise);
                        let back = to_value(shown, min, max, zero, clockwise);
                        assert_eq!(
                            back, v,
                            "v={v} range=[{min},{max}] zero={zero:?} cw={clockwise} shown={shown}"
                        );
                        v += step;
                    }
                }
            }
        }
    }

    #[test]
    fn fractional_steps_round_trip_exactly() {
        for (min, max) in RANGES {
            for zero in ZeroPosition::ALL {
                for clockwise in [true, false] {
                    let (first, last) = ((min * 10.0) as i32, (max * 10.0) as i32);
                    for tenth in first..=last {
                        let v = tenth as f32 / 10.0;
                        let shown = to_display_angle(v, min, max, zero, clockwise);
                        let back = to_value(shown, min, max, zero, clockwise);
                        assert_eq!(
                            back, v,
                            "v={v} range=[{min},{max}] zero={zero:?} cw={clockwise} shown={shown}"
                        );
                    }
                }
            }
        }
        let dial = DialConvention {
            zero: ZeroPosition::Top,
            clockwise: true,
            step: 0.1,
        };
        assert_eq!(dial.value(dial.display(-4.9, -90.0, 90.0), -90.0, 90.0), -4.9);
    }

    #[test]
    fn display_angle_stays_on_the_circle() {
        for zero in ZeroPosition::ALL {
            for clockwise in [true, false] {
                for v in [-1000.0, -180.0, -0.0, 0.0, 179.9, 180.0, 359.0, 1e6, f32::NAN] {
                    let shown = to_display_angle(v, -180.0, 180.0, zero, clockwise);
                    assert!((0.0..360.0).contains(&shown), "shown={shown}");
                }
            }
        }
    }

    #[test]
    fn value_stays_inside_bounds() {
        for (min, max) in RANGES {
            for zero in ZeroPosition::ALL {
                let mut d = -720.0;
                while d <= 720.0 {
                    let v = to_value(d, min, max, zero, true);
                    assert!(v >= min && v <= max, "d={d} v={v}");
                    d += 7.5;
                }
                let v = to_value(f32::INFINITY, min, max, zero, false);
                assert!(v >= min && v <= max);
            }
        }
    }

    #[test]
    fn half_turn_prefers_positive_representative() {
        assert_eq!(canonical_180(-180.0), 180.0);
        assert_eq!(canonical_180(180.0), 180.0);
        assert_eq!(canonical_180(540.0), 180.0);
        assert_eq!(canonical_180(-190.0), 170.0);
        assert_eq!(to_value(180.0, -180.0, 180.0, ZeroPosition::Top, true), 180.0);
    }

    fn circular_gap(a: f32, b: f32) -> f32 {
        let d = normalize_360(a - b);
        d.min(FULL_TURN_DEG - d)
    }

    #[test]
    fn pointer_angle_starts_at_top_and_runs_clockwise() {
        assert!(circular_gap(pointer_to_display(0.0, -1.0), 0.0) < 1e-3);
        assert!(circular_gap(pointer_to_display(1.0, 0.0), 90.0) < 1e-3);
        assert!(circular_gap(pointer_to_display(0.0, 1.0), 180.0) < 1e-3);
        assert!(circular_gap(pointer_to_display(-1.0, 0.0), 270.0) < 1e-3);
        assert_eq!(pointer_to_display(0.0, 0.0), 0.0);
    }

    #[test]
    fn dial_pointer_value_is_quantized_and_clamped() {
        let dial = DialConvention::default();
        // zero drawn at the right, clockwise: pointing down reads +90
        assert_eq!(dial.value_from_pointer(0.0, 10.0, -90.0, 90.0), 90.0);
        // slightly past straight down still snaps to the 5 degree grid
        let v = dial.value_from_pointer(-0.5, 10.0, -180.0, 180.0);
        assert_eq!(v % 5.0, 0.0);
        // pointing left reads 180, clamped into the elbow range
        assert_eq!(dial.value_from_pointer(-10.0, 0.0, 0.0, 150.0), 150.0);
    }

    #[test]
    fn zero_position_parses_case_insensitively() {
        assert_eq!(ZeroPosition::parse(" Top "), Some(ZeroPosition::Top));
        assert_eq!(ZeroPosition::parse("LEFT"), Some(ZeroPosition::Left));
        assert_eq!(ZeroPosition::parse("north"), None);
    }
}
