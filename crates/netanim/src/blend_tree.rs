//! 2D parametric blend space solver using gradient band interpolation.
//!
//! A blend tree is constructed from one sample position per motion clip.
//! Querying a point yields one weight per sample: each weight is bounded by
//! the most restrictive constraint among all competing samples (the "gradient
//! band"), clamped at zero and normalized so the total is 1 whenever any
//! sample has influence.
//!
//! The pairwise constraint vectors are precomputed once per scale change; the
//! per-query cost is `O(n^2)` dot products plus one fast arctangent per
//! sample.

use glam::Vec2;
use std::f32::consts::PI;

/// Weight solver over a fixed set of 2D sample positions.
#[derive(Debug, Clone)]
pub struct BlendTree {
    count: usize,
    size: f32,
    scale: f32,
    weights: Vec<f32>,
    base_positions: Vec<Vec2>,
    base_magnitudes: Vec<f32>,
    scaled_positions: Vec<Vec2>,
    scaled_magnitudes: Vec<f32>,
    // Row-major [i][j]: constraint of sample j on candidate i.
    polar_distances: Vec<Vec2>,
    inverse_average_magnitudes: Vec<f32>,
}

impl BlendTree {
    /// Creates a solver from one sample position per motion clip.
    #[must_use]
    pub fn new(positions: &[Vec2]) -> Self {
        let count = positions.len();

        let base_magnitudes: Vec<f32> = positions.iter().map(|p| p.length()).collect();
        let size = base_magnitudes.iter().fold(0.0f32, |acc, &m| acc.max(m));

        let mut tree = Self {
            count,
            size,
            scale: 1.0,
            weights: vec![0.0; count],
            base_positions: positions.to_vec(),
            base_magnitudes,
            scaled_positions: vec![Vec2::ZERO; count],
            scaled_magnitudes: vec![0.0; count],
            polar_distances: vec![Vec2::ZERO; count * count],
            inverse_average_magnitudes: vec![0.0; count * count],
        };

        tree.precalculate();
        tree
    }

    /// Magnitude of the farthest sample at scale 1.
    #[must_use]
    pub fn size(&self) -> f32 {
        self.size
    }

    /// Weights produced by the last [`calculate_weights`](Self::calculate_weights) call.
    #[must_use]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Uniformly rescales all sample positions and redoes the pairwise
    /// precompute. Used to adapt the blend space to locomotion speed.
    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
        self.precalculate();
    }

    /// Resolves per-sample weights for a query point.
    ///
    /// Each weight is >= 0 and the total is 1 unless no sample retains any
    /// influence (or the solver is empty), in which case all weights are 0.
    pub fn calculate_weights(&mut self, position: Vec2) -> &[f32] {
        let count = self.count;
        let position_magnitude = position.length();
        let mut accumulated = 0.0f32;

        for i in 0..count {
            let mut weight = 1.0f32;
            let position_angle = angle_fast(self.scaled_positions[i], position);
            let position_polar_distance = position_magnitude - self.scaled_magnitudes[i];

            for j in 0..count {
                if i == j {
                    continue;
                }

                let pair = i * count + j;
                let sample_to_sample = self.polar_distances[pair];
                let sample_to_point = Vec2::new(
                    position_polar_distance * self.inverse_average_magnitudes[pair],
                    position_angle,
                );

                let desired = 1.0
                    - sample_to_sample.x * sample_to_point.x
                    - sample_to_sample.y * sample_to_point.y;
                if desired < weight {
                    weight = desired;
                }
            }

            if weight < 0.0 {
                weight = 0.0;
            }

            self.weights[i] = weight;
            accumulated += weight;
        }

        if accumulated > 0.0 {
            let inverse = 1.0 / accumulated;
            for weight in &mut self.weights {
                *weight *= inverse;
            }
        }

        &self.weights
    }

    fn precalculate(&mut self) {
        let count = self.count;

        for i in 0..count {
            self.scaled_positions[i] = self.base_positions[i] * self.scale;
            self.scaled_magnitudes[i] = self.base_magnitudes[i] * self.scale;
        }

        for i in 0..count {
            let position_a = self.scaled_positions[i];
            let magnitude_a = self.scaled_magnitudes[i];

            for j in 0..count {
                let position_b = self.scaled_positions[j];
                let magnitude_b = self.scaled_magnitudes[j];

                let average_magnitude = (magnitude_a + magnitude_b) * 0.5;
                let inverse_average_magnitude = 1.0 / average_magnitude;

                let angle = angle_exact(position_a, position_b);
                let polar_distance = magnitude_b - magnitude_a;

                let mut a_to_b = Vec2::new(polar_distance * inverse_average_magnitude, angle);
                a_to_b /= a_to_b.length_squared();

                self.polar_distances[i * count + j] = a_to_b;
                self.polar_distances[j * count + i] = -a_to_b;

                self.inverse_average_magnitudes[i * count + j] = inverse_average_magnitude;
                self.inverse_average_magnitudes[j * count + i] = inverse_average_magnitude;
            }
        }
    }
}

/// Signed angle between two vectors, exact. Zero-length input defines 0.
fn angle_exact(a: Vec2, b: Vec2) -> f32 {
    if (a.x == 0.0 && a.y == 0.0) || (b.x == 0.0 && b.y == 0.0) {
        return 0.0;
    }

    let x = a.x * b.x + a.y * b.y;
    let y = a.x * b.y - a.y * b.x;

    y.atan2(x)
}

/// Signed angle between two vectors using the polynomial approximation.
fn angle_fast(a: Vec2, b: Vec2) -> f32 {
    if (a.x == 0.0 && a.y == 0.0) || (b.x == 0.0 && b.y == 0.0) {
        return 0.0;
    }

    let x = a.x * b.x + a.y * b.y;
    let y = a.x * b.y - a.y * b.x;

    fast_atan2(y, x)
}

/// Third-order arctangent approximation, valid for |x| <= 1.
fn fast_atan(x: f32) -> f32 {
    (0.97239411 - 0.19194795 * x * x) * x
}

/// Quadrant-corrected arctangent built on [`fast_atan`].
fn fast_atan2(y: f32, x: f32) -> f32 {
    if x != 0.0 {
        let abs_x = x.abs();
        let abs_y = y.abs();

        if abs_x > abs_y {
            if x > 0.0 {
                return fast_atan(y / x);
            }
            if y >= 0.0 {
                return fast_atan(y / x) + PI;
            }

            return fast_atan(y / x) - PI;
        }

        if y > 0.0 {
            return -fast_atan(x / y) + PI * 0.5;
        }

        return -fast_atan(x / y) - PI * 0.5;
    }

    if y > 0.0 {
        return PI * 0.5;
    }
    if y < 0.0 {
        return -PI * 0.5;
    }

    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn cardinal_tree() -> BlendTree {
        BlendTree::new(&[
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, -1.0),
            Vec2::new(-1.0, 0.0),
        ])
    }

    #[test]
    fn empty_tree_yields_no_weights() {
        let mut tree = BlendTree::new(&[]);
        assert!(tree.calculate_weights(Vec2::new(0.3, 0.7)).is_empty());
    }

    #[test]
    fn single_sample_always_wins() {
        let mut tree = BlendTree::new(&[Vec2::new(0.5, 0.5)]);

        for point in [Vec2::ZERO, Vec2::new(10.0, -3.0), Vec2::new(0.5, 0.5)] {
            let weights = tree.calculate_weights(point);
            assert_eq!(weights, &[1.0]);
        }
    }

    #[test_case(0, Vec2::new(0.0, 1.0))]
    #[test_case(1, Vec2::new(1.0, 0.0))]
    #[test_case(2, Vec2::new(0.0, -1.0))]
    #[test_case(3, Vec2::new(-1.0, 0.0))]
    fn querying_at_a_sample_selects_it_exactly(expected: usize, point: Vec2) {
        let mut tree = cardinal_tree();
        let weights = tree.calculate_weights(point).to_vec();

        for (i, weight) in weights.iter().enumerate() {
            if i == expected {
                assert!((weight - 1.0).abs() < 1e-3, "weights: {weights:?}");
            } else {
                assert!(weight.abs() < 1e-3, "weights: {weights:?}");
            }
        }
    }

    #[test]
    fn weights_vary_smoothly_between_samples() {
        let mut tree = cardinal_tree();
        let weights = tree.calculate_weights(Vec2::new(0.5, 0.5).normalize()).to_vec();

        // North and east dominate equally, south and west are suppressed.
        assert!((weights[0] - weights[1]).abs() < 1e-3);
        assert!(weights[0] > 0.3);
        assert!(weights[2] < weights[0]);
        assert!(weights[3] < weights[0]);
    }

    #[test]
    fn scale_moves_the_samples() {
        let mut tree = cardinal_tree();
        tree.set_scale(2.0);

        let weights = tree.calculate_weights(Vec2::new(0.0, 2.0)).to_vec();
        assert!((weights[0] - 1.0).abs() < 1e-3);
    }

    proptest! {
        #[test]
        fn weights_sum_to_one(
            samples in prop::collection::vec((-8.0f32..8.0, -8.0f32..8.0), 1..8),
            qx in -10.0f32..10.0,
            qy in -10.0f32..10.0,
        ) {
            // Degenerate layouts (coincident or origin samples) are exercised
            // separately; here every sample must be distinct and off-origin.
            let positions: Vec<Vec2> = samples
                .iter()
                .map(|&(x, y)| Vec2::new(x, y))
                .filter(|p| p.length() > 0.05)
                .collect();
            prop_assume!(!positions.is_empty());
            for i in 0..positions.len() {
                for j in (i + 1)..positions.len() {
                    prop_assume!(positions[i].distance(positions[j]) > 0.05);
                }
            }

            let mut tree = BlendTree::new(&positions);
            let weights = tree.calculate_weights(Vec2::new(qx, qy));

            // Zero accumulated influence legally yields all-zero weights;
            // any influence at all must normalize to exactly one.
            let sum: f32 = weights.iter().sum();
            if sum > 0.0 {
                prop_assert!((sum - 1.0).abs() < 1e-3, "sum = {sum}, weights = {weights:?}");
            }
            for &w in weights {
                prop_assert!(w >= 0.0);
            }
        }
    }
}
