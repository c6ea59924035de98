//! Snapshot interpolation rules shared by the codec and the render path.
//!
//! Weights use a discrete-flip convention: a raw delta of exactly ±1.0 between
//! two snapshots is treated as a boolean transition and jumps at the midpoint
//! instead of producing intermediate values. Gameplay flags encoded as 0/1
//! floats rely on this. Normalized playback times interpolate with wraparound
//! awareness so a looping clip never appears to rewind across a period
//! boundary.

/// Interpolates a weight between two snapshots.
///
/// A delta of exactly ±1.0 switches discretely at `alpha >= 0.5`; any other
/// delta interpolates linearly.
#[must_use]
pub fn interpolate_weight(from: f32, to: f32, alpha: f32) -> f32 {
    let distance = to - from;

    if distance == 1.0 || distance == -1.0 {
        return if alpha < 0.5 { from } else { to };
    }

    from + distance * alpha
}

/// Interpolates a playback time within a period of `length`.
///
/// If `to < from`, one full loop is assumed to have elapsed between the
/// snapshots: `to` is shifted by one period before the lerp and the result
/// wraps back into range.
#[must_use]
pub fn interpolate_time(from: f32, to: f32, length: f32, alpha: f32) -> f32 {
    if to >= from {
        return from + (to - from) * alpha;
    }

    let mut time = from + (to + length - from) * alpha;
    if time > length {
        time -= length;
    }

    time
}

/// Weight-gated variant of [`interpolate_time`].
///
/// A state with no resolved influence snaps to the nearest snapshot instead of
/// sweeping its playback head, so the time of a fading-out state does not pop
/// when it reactivates.
#[must_use]
pub fn interpolate_time_weighted(from: f32, to: f32, length: f32, alpha: f32, weight: f32) -> f32 {
    if weight <= 0.0 {
        return if alpha < 0.5 { from } else { to };
    }

    interpolate_time(from, to, length, alpha)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_lerps_partial_deltas() {
        assert_eq!(interpolate_weight(0.2, 0.6, 0.5), 0.4);
        assert_eq!(interpolate_weight(1.0, 0.5, 0.0), 1.0);
    }

    #[test]
    fn weight_flips_on_unit_delta() {
        assert_eq!(interpolate_weight(0.0, 1.0, 0.49), 0.0);
        assert_eq!(interpolate_weight(0.0, 1.0, 0.5), 1.0);
        assert_eq!(interpolate_weight(1.0, 0.0, 0.49), 1.0);
        assert_eq!(interpolate_weight(1.0, 0.0, 0.99), 0.0);
    }

    #[test]
    fn weight_is_unclamped_for_other_deltas() {
        // Raw lerp - out-of-range inputs pass through untouched.
        assert_eq!(interpolate_weight(0.0, 2.0, 0.75), 1.5);
    }

    #[test]
    fn time_lerps_forward() {
        assert_eq!(interpolate_time(0.2, 0.4, 1.0, 0.5), 0.3);
    }

    #[test]
    fn time_wraps_across_period() {
        // 0.9 -> 0.1 with one loop elapsed: midpoint is exactly the boundary.
        let t = interpolate_time(0.9, 0.1, 1.0, 0.5);
        assert!((t - 1.0).abs() < 1e-6);

        let t = interpolate_time(0.9, 0.1, 1.0, 0.75);
        assert!((t - 0.05).abs() < 1e-6);
    }

    #[test]
    fn zero_weight_snaps_to_nearest() {
        assert_eq!(interpolate_time_weighted(0.9, 0.1, 1.0, 0.4, 0.0), 0.9);
        assert_eq!(interpolate_time_weighted(0.9, 0.1, 1.0, 0.6, 0.0), 0.1);
        // Any influence at all restores the wraparound rule.
        let t = interpolate_time_weighted(0.9, 0.1, 1.0, 0.75, 0.2);
        assert!((t - 0.05).abs() < 1e-6);
    }
}
