//! Background noise estimation for detection thresholds.
//!
//! The detector needs a single sigma describing the sky noise of an image. It is
//! derived from iteratively sigma-clipped statistics so that bright sources do not
//! inflate the estimate, then scaled by 1.5 to match the conservative threshold
//! convention used by the catalog pipeline.

use ndarray::ArrayView2;

/// Default number of clipping passes.
pub const DEFAULT_CLIP_ITERATIONS: usize = 3;

/// Rejection limit in standard deviations for each clipping pass.
const CLIP_SIGMA: f64 = 3.0;

/// Scale applied to the clipped standard deviation.
const NOISE_SCALE: f64 = 1.5;

/// Signature of a noise estimator, so callers can swap in their own statistics.
pub type NoiseEstimator = fn(ArrayView2<f64>) -> f64;

/// Mean and standard deviation of the pixels that survived clipping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClippedStats {
    pub mean: f64,
    pub stddev: f64,
    pub count: usize,
}

impl ClippedStats {
    fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        Some(Self {
            mean,
            stddev: variance.sqrt(),
            count,
        })
    }
}

/// Iteratively sigma-clipped statistics over the finite pixels of `image`.
///
/// Each pass drops values more than 3 stddev from the current mean and stops
/// early once nothing changes.
///
/// # Arguments
/// * `image` - Pixel data
/// * `clip_iterations` - Maximum number of clipping passes
///
/// # Returns
/// Mean, stddev and surviving pixel count, or `None` for images without
/// finite pixels
pub fn clipped_stats(image: ArrayView2<f64>, clip_iterations: usize) -> Option<ClippedStats> {
    let mut values: Vec<f64> = image.iter().copied().filter(|v| v.is_finite()).collect();
    let mut stats = ClippedStats::from_values(&values)?;

    for _ in 0..clip_iterations {
        let lower = stats.mean - CLIP_SIGMA * stats.stddev;
        let upper = stats.mean + CLIP_SIGMA * stats.stddev;
        let before = values.len();
        values.retain(|&v| v >= lower && v <= upper);
        if values.len() == before {
            break;
        }
        match ClippedStats::from_values(&values) {
            Some(next) => stats = next,
            None => break,
        }
    }

    Some(stats)
}

/// Estimate the detection sigma of an image: `1.5 * clipped stddev`.
///
/// # Arguments
/// * `image` - Pixel data; non-finite values are ignored
/// * `clip_iterations` - Number of 3-sigma clipping passes
///
/// # Returns
/// The detection sigma, or 0 for images without finite pixels
pub fn estimate_noise(image: ArrayView2<f64>, clip_iterations: usize) -> f64 {
    clipped_stats(image, clip_iterations)
        .map(|stats| NOISE_SCALE * stats.stddev)
        .unwrap_or(0.0)
}

/// [`estimate_noise`] with the default three clipping passes.
pub fn estimate_noise_default(image: ArrayView2<f64>) -> f64 {
    estimate_noise(image, DEFAULT_CLIP_ITERATIONS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    fn normal_image(size: (usize, usize), mean: f64, std_dev: f64, seed: u64) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let normal = Normal::new(mean, std_dev).unwrap();
        Array2::from_shape_fn(size, |_| normal.sample(&mut rng))
    }

    #[test]
    fn test_pure_noise_estimate() {
        let image = normal_image((128, 128), 100.0, 4.0, 7);
        let sigma = estimate_noise_default(image.view());
        assert_relative_eq!(sigma, 1.5 * 4.0, epsilon = 0.5);
    }

    #[test]
    fn test_bright_source_is_clipped() {
        let mut image = normal_image((64, 64), 50.0, 2.0, 11);
        for y in 30..34 {
            for x in 30..34 {
                image[[y, x]] = 5000.0;
            }
        }
        let stats = clipped_stats(image.view(), DEFAULT_CLIP_ITERATIONS).unwrap();
        assert!(stats.count < 64 * 64);
        assert_relative_eq!(stats.stddev, 2.0, epsilon = 0.3);
    }

    #[test]
    fn test_flat_image_has_zero_noise() {
        let image = Array2::from_elem((10, 10), 3.0);
        assert_eq!(estimate_noise_default(image.view()), 0.0);
    }

    #[test]
    fn test_non_finite_pixels_ignored() {
        let mut image = Array2::from_elem((4, 4), 1.0);
        image[[0, 0]] = f64::NAN;
        image[[1, 1]] = f64::INFINITY;
        let stats = clipped_stats(image.view(), 3).unwrap();
        assert_eq!(stats.count, 14);
        assert_eq!(stats.stddev, 0.0);
    }

    #[test]
    fn test_empty_image() {
        let image = Array2::<f64>::zeros((0, 0));
        assert!(clipped_stats(image.view(), 3).is_none());
        assert_eq!(estimate_noise_default(image.view()), 0.0);
    }
}
