//! In-process peak detection.
//!
//! Sources are found with the DAOPHOT-style finder from `starfield`: the image
//! is convolved with a zero-sum Gaussian kernel matched to the PSF FWHM, local
//! maxima above `hmin` become candidates and each candidate is measured on a
//! cutout around the peak (marginal centroid, summed flux). Candidates whose
//! raw peak exceeds `datamax` are rejected.
//!
//! When nothing is found with the configured sigma, the noise is re-estimated
//! from the unclipped image and detection is retried once.
//!
//! Positions are reported 1-based (FITS convention).

use std::ops::RangeInclusive;

use log::{debug, info};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use starfield::image::starfinders::{DAOStarFinder, DAOStarFinderConfig, StellarSource};

use crate::catalog::{FluxRange, PixelPositions};
use crate::error::{CatalogError, Result};
use crate::noise::{estimate_noise_default, NoiseEstimator};

/// Relative floor under the detection threshold, so a zero `hmin` on a flat
/// image does not turn rounding residue into sources.
const RESPONSE_FLOOR: f64 = 1e-12;

/// Kernel truncation radius in units of the Gaussian sigma.
const SIGMA_RADIUS: f64 = 1.5;

/// Sharpness and roundness limits, wide enough that shape never rejects a source.
const SHAPE_RANGE: RangeInclusive<f64> = -10.0..=10.0;

fn default_computesig() -> bool {
    true
}

fn default_threshold() -> f64 {
    4.0
}

fn default_fwhmpsf() -> f64 {
    2.5
}

/// Parameters of the in-process detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakOptions {
    /// Estimate sigma from the image instead of using `sigma`
    #[serde(default = "default_computesig")]
    pub computesig: bool,
    /// Background sigma, required when `computesig` is false
    #[serde(default)]
    pub sigma: Option<f64>,
    /// Detection threshold in units of sigma
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Pixels at or below this value are zeroed before detection
    #[serde(default)]
    pub datamin: Option<f64>,
    /// Sources whose peak pixel exceeds this value are rejected
    #[serde(default)]
    pub datamax: Option<f64>,
    /// PSF FWHM in pixels
    #[serde(default = "default_fwhmpsf")]
    pub fwhmpsf: f64,
    #[serde(default)]
    pub fluxmin: Option<f64>,
    #[serde(default)]
    pub fluxmax: Option<f64>,
}

impl Default for PeakOptions {
    fn default() -> Self {
        Self {
            computesig: default_computesig(),
            sigma: None,
            threshold: default_threshold(),
            datamin: None,
            datamax: None,
            fwhmpsf: default_fwhmpsf(),
            fluxmin: None,
            fluxmax: None,
        }
    }
}

impl PeakOptions {
    /// Reject option sets the detector cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.computesig && self.sigma.is_none() {
            return Err(CatalogError::config(
                "sigma must be provided when computesig is false",
            ));
        }
        if let Some(sigma) = self.sigma {
            if !sigma.is_finite() || sigma < 0.0 {
                return Err(CatalogError::config(format!("invalid sigma {sigma}")));
            }
        }
        if !(self.fwhmpsf.is_finite() && self.fwhmpsf > 0.0) {
            return Err(CatalogError::config(format!(
                "fwhmpsf must be positive, got {}",
                self.fwhmpsf
            )));
        }
        if !self.threshold.is_finite() {
            return Err(CatalogError::config("threshold must be finite"));
        }
        Ok(())
    }

    pub fn flux_range(&self) -> FluxRange {
        FluxRange::new(self.fluxmin, self.fluxmax)
    }
}

/// A detected source in 0-based pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub x: f64,
    pub y: f64,
    pub flux: f64,
}

/// Run one detection pass over `image`.
///
/// # Arguments
/// * `image` - Pixel data, already clipped at `datamin` if requested
/// * `hmin` - Absolute detection threshold on the convolved image
/// * `fwhm` - PSF FWHM in pixels
/// * `datamax` - Optional upper limit on the raw peak value of a source
///
/// # Returns
/// Candidates in 0-based pixel coordinates, in raster order of their peaks,
/// or a configuration error when the finder rejects the parameters.
pub fn find_peaks(
    image: ArrayView2<f64>,
    hmin: f64,
    fwhm: f64,
    datamax: Option<f64>,
) -> Result<Vec<Candidate>> {
    if image.is_empty() {
        return Ok(Vec::new());
    }

    let scale = image
        .iter()
        .filter(|v| v.is_finite())
        .fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let threshold = hmin.max(RESPONSE_FLOOR * (1.0 + scale));

    let config = DAOStarFinderConfig {
        threshold,
        fwhm,
        ratio: 1.0,
        theta: 0.0,
        sigma_radius: SIGMA_RADIUS,
        sharpness: SHAPE_RANGE,
        roundness: SHAPE_RANGE,
        exclude_border: true,
        brightest: None,
        peakmax: datamax,
        min_separation: 0.0,
    };
    let finder = DAOStarFinder::new(config)
        .map_err(|e| CatalogError::config(format!("peak finder setup failed: {e}")))?;

    let data: Array2<f64> = image.mapv(|v| if v.is_finite() { v } else { 0.0 });
    let candidates: Vec<Candidate> = finder
        .find_stars(&data, None)
        .into_iter()
        .map(|star| {
            let (x, y) = star.get_centroid();
            Candidate {
                x,
                y,
                flux: star.flux(),
            }
        })
        .collect();
    debug!(
        "Detection pass: threshold={threshold:.4}, {} candidates",
        candidates.len()
    );
    Ok(candidates)
}

/// Configured peak detector.
#[derive(Debug, Clone)]
pub struct PeakFinder {
    options: PeakOptions,
    id_offset: i64,
    noise: NoiseEstimator,
}

impl PeakFinder {
    pub fn new(options: PeakOptions, id_offset: i64) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            id_offset,
            noise: estimate_noise_default,
        })
    }

    /// Replace the noise estimator used for `computesig` and the retry.
    pub fn with_noise_estimator(mut self, noise: NoiseEstimator) -> Self {
        self.noise = noise;
        self
    }

    pub fn options(&self) -> &PeakOptions {
        &self.options
    }

    /// Detect sources in `image`.
    ///
    /// # Arguments
    /// * `image` - Pixel data in row-major `(y, x)` order
    ///
    /// # Returns
    /// 1-based positions with fluxes and ids `index + id_offset`, after the
    /// flux-range cut. An empty result is not an error.
    pub fn detect(&self, image: ArrayView2<f64>) -> Result<PixelPositions> {
        let opts = &self.options;

        let clipped = opts
            .datamin
            .map(|datamin| image.mapv(|v| if v <= datamin { 0.0 } else { v }));
        let source = match &clipped {
            Some(c) => c.view(),
            None => image.view(),
        };

        let sigma = match (opts.computesig, opts.sigma) {
            (false, Some(sigma)) => sigma,
            (false, None) => {
                return Err(CatalogError::config(
                    "sigma must be provided when computesig is false",
                ))
            }
            (true, _) => (self.noise)(image),
        };
        let hmin = sigma * opts.threshold;
        debug!("Peak detection: sigma={sigma:.4}, hmin={hmin:.4}");

        let mut candidates = find_peaks(source, hmin, opts.fwhmpsf, opts.datamax)?;

        if candidates.is_empty() {
            let sigma = (self.noise)(image);
            let hmin = sigma * opts.threshold;
            info!(
                "No sources found with original thresholds. Trying automatic settings (sigma={sigma:.4}, hmin={hmin:.4})"
            );
            candidates = find_peaks(source, hmin, opts.fwhmpsf, opts.datamax)?;
        }

        let range = opts.flux_range();
        candidates.retain(|c| range.contains(c.flux));

        let mut positions = PixelPositions::new();
        for (index, candidate) in candidates.iter().enumerate() {
            positions.push(
                candidate.x + 1.0,
                candidate.y + 1.0,
                candidate.flux,
                index as i64 + self.id_offset,
            );
        }
        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    /// Background plus noise with Gaussian stars at 0-based (x, y) positions.
    fn synthetic_frame(
        size: usize,
        background: f64,
        noise: f64,
        stars: &[(f64, f64, f64)],
        seed: u64,
    ) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let normal = Normal::new(0.0, noise).unwrap();
        let star_sigma = 1.5;
        Array2::from_shape_fn((size, size), |(y, x)| {
            let mut value = background + normal.sample(&mut rng);
            for &(sx, sy, amp) in stars {
                let r2 = (x as f64 - sx).powi(2) + (y as f64 - sy).powi(2);
                value += amp * (-r2 / (2.0 * star_sigma * star_sigma)).exp();
            }
            value
        })
    }

    #[test]
    fn test_single_star_position_is_one_based() {
        let frame = synthetic_frame(48, 100.0, 1.0, &[(20.3, 30.6, 300.0)], 3);
        let finder = PeakFinder::new(PeakOptions::default(), 0).unwrap();
        let found = finder.detect(frame.view()).unwrap();
        assert_eq!(found.len(), 1);
        assert_relative_eq!(found.x()[0], 21.3, epsilon = 0.3);
        assert_relative_eq!(found.y()[0], 31.6, epsilon = 0.3);
        assert_eq!(found.id(), &[0]);
    }

    #[test]
    fn test_retry_with_recomputed_sigma() {
        let frame = synthetic_frame(64, 100.0, 1.0, &[(40.0, 22.0, 200.0)], 42);
        let options = PeakOptions {
            computesig: false,
            sigma: Some(1e6),
            threshold: 4.0,
            ..Default::default()
        };
        let finder = PeakFinder::new(options, 0).unwrap();
        let found = finder.detect(frame.view()).unwrap();
        assert_eq!(found.len(), 1);
        assert!((found.x()[0] - 41.0).abs() < 0.5);
        assert!((found.y()[0] - 23.0).abs() < 0.5);
    }

    #[test]
    fn test_id_offset_and_order() {
        let frame = synthetic_frame(
            64,
            10.0,
            0.5,
            &[(15.0, 10.0, 150.0), (45.0, 50.0, 150.0)],
            5,
        );
        let finder = PeakFinder::new(PeakOptions::default(), 100).unwrap();
        let found = finder.detect(frame.view()).unwrap();
        assert_eq!(found.id(), &[100, 101]);
        assert!(found.y()[0] < found.y()[1]);
    }

    #[test]
    fn test_datamax_rejects_saturated_source() {
        let frame = synthetic_frame(
            64,
            10.0,
            0.5,
            &[(15.0, 15.0, 100.0), (45.0, 45.0, 5000.0)],
            9,
        );
        let options = PeakOptions {
            datamax: Some(1000.0),
            ..Default::default()
        };
        let found = PeakFinder::new(options, 0)
            .unwrap()
            .detect(frame.view())
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_relative_eq!(found.x()[0], 16.0, epsilon = 0.3);
    }

    #[test]
    fn test_flux_range_applied() {
        let frame = synthetic_frame(
            64,
            0.0,
            0.5,
            &[(15.0, 15.0, 50.0), (45.0, 45.0, 500.0)],
            13,
        );
        let all = PeakFinder::new(PeakOptions::default(), 0)
            .unwrap()
            .detect(frame.view())
            .unwrap();
        assert_eq!(all.len(), 2);

        let cut = (all.flux()[0] + all.flux()[1]) / 2.0;
        let options = PeakOptions {
            fluxmin: Some(cut),
            ..Default::default()
        };
        let bright = PeakFinder::new(options, 0)
            .unwrap()
            .detect(frame.view())
            .unwrap();
        assert_eq!(bright.len(), 1);
        assert!(bright.flux()[0] >= cut);
    }

    #[test]
    fn test_flat_image_yields_no_sources() {
        let frame = Array2::from_elem((32, 32), 7.0);
        let found = PeakFinder::new(PeakOptions::default(), 0)
            .unwrap()
            .detect(frame.view())
            .unwrap();
        assert!(found.is_empty());
        assert_eq!(found.x().len(), found.flux().len());
        assert_eq!(found.y().len(), found.id().len());
    }

    #[test]
    fn test_empty_image() {
        let frame = Array2::<f64>::zeros((0, 0));
        let found = PeakFinder::new(PeakOptions::default(), 0)
            .unwrap()
            .detect(frame.view())
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_missing_sigma_is_configuration_error() {
        let options = PeakOptions {
            computesig: false,
            sigma: None,
            ..Default::default()
        };
        assert!(matches!(
            PeakFinder::new(options, 0),
            Err(CatalogError::Configuration(_))
        ));
    }

    #[test]
    fn test_custom_noise_estimator() {
        fn huge(_: ArrayView2<f64>) -> f64 {
            1e9
        }
        let frame = synthetic_frame(32, 0.0, 0.1, &[(16.0, 16.0, 100.0)], 1);
        let found = PeakFinder::new(PeakOptions::default(), 0)
            .unwrap()
            .with_noise_estimator(huge)
            .detect(frame.view())
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: PeakOptions = serde_json::from_str(r#"{"threshold": 3.0}"#).unwrap();
        assert_eq!(options.threshold, 3.0);
        assert!(options.computesig);
        assert_eq!(options.fwhmpsf, 2.5);
    }

    #[test]
    fn test_find_peaks_reports_zero_based_centroid() {
        let frame = synthetic_frame(40, 0.0, 0.2, &[(18.0, 25.0, 400.0)], 21);
        let found = find_peaks(frame.view(), 5.0, 2.5, None).unwrap();
        assert_eq!(found.len(), 1);
        assert!((found[0].x - 18.0).abs() < 0.3);
        assert!((found[0].y - 25.0).abs() < 0.3);
        assert!(found[0].flux > 0.0);
    }

    /// Frame with a deeply negative masked block containing a local bump.
    fn masked_frame() -> Array2<f64> {
        let mut frame = synthetic_frame(64, 0.0, 0.5, &[(44.0, 40.0, 300.0)], 17);
        for y in 5..21 {
            for x in 5..21 {
                frame[[y, x]] = -1000.0;
            }
        }
        frame[[12, 12]] = -200.0;
        frame
    }

    #[test]
    fn test_datamin_clips_masked_region() {
        let options = PeakOptions {
            datamin: Some(-100.0),
            threshold: 8.0,
            ..Default::default()
        };
        let found = PeakFinder::new(options, 0)
            .unwrap()
            .detect(masked_frame().view())
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!((found.x()[0] - 45.0).abs() < 0.5);
        assert!((found.y()[0] - 41.0).abs() < 0.5);
        for (x, y) in found.x().iter().zip(found.y()) {
            assert!(!(5.0..=22.0).contains(x) || !(5.0..=22.0).contains(y));
        }
    }

    #[test]
    fn test_retry_sigma_uses_unclipped_image() {
        // Only the unclipped frame still holds the masked values.
        fn sees_mask(image: ArrayView2<f64>) -> f64 {
            if image.iter().any(|&v| v <= -500.0) {
                0.5
            } else {
                1e9
            }
        }
        let options = PeakOptions {
            computesig: false,
            sigma: Some(1e6),
            datamin: Some(-100.0),
            threshold: 8.0,
            ..Default::default()
        };
        let found = PeakFinder::new(options, 0)
            .unwrap()
            .with_noise_estimator(sees_mask)
            .detect(masked_frame().view())
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!((found.x()[0] - 45.0).abs() < 0.5);
    }
}
