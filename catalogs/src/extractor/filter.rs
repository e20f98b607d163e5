//! Gaussian detection filter masks.

use std::fs;
use std::path::Path;

use ndarray::Array2;

use crate::error::{CatalogError, Result};

/// Unit-sum `nx` x `nx` Gaussian with the given FWHM, centred on pixel `nx / 2`.
pub fn gauss_array(nx: usize, fwhm: f64) -> Array2<f64> {
    let sigma = fwhm / (2.0 * (2.0 * std::f64::consts::LN_2).sqrt());
    let center = (nx / 2) as f64;
    let mut mask = Array2::from_shape_fn((nx, nx), |(y, x)| {
        let dx = x as f64 - center;
        let dy = y as f64 - center;
        (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
    });
    let total = mask.sum();
    if total > 0.0 {
        mask /= total;
    }
    mask
}

/// Text of a convolution file for `mask`.
pub fn conv_file_text(mask: &Array2<f64>, fwhm: f64) -> String {
    let mut text = String::from("CONV NORM\n");
    text.push_str(&format!(
        "# convolution mask of a gaussian PSF with FWHM = {fwhm:.1} pixels.\n"
    ));
    for row in mask.rows() {
        let values: Vec<String> = row.iter().map(|v| format!("{v:.6}")).collect();
        text.push_str(&values.join(" "));
        text.push('\n');
    }
    text
}

/// Synthesise the mask and write it as a convolution file.
pub fn write_gauss_filter(path: &Path, nx: usize, fwhm: f64) -> Result<()> {
    if nx == 0 || !(fwhm.is_finite() && fwhm > 0.0) {
        return Err(CatalogError::config(format!(
            "invalid gaussian filter: gauss_nx={nx}, gauss_fwhm={fwhm}"
        )));
    }
    let mask = gauss_array(nx, fwhm);
    fs::write(path, conv_file_text(&mask, fwhm)).map_err(|e| CatalogError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gauss_array_normalised_and_peaked() {
        let mask = gauss_array(5, 2.0);
        assert_relative_eq!(mask.sum(), 1.0, epsilon = 1e-12);
        let peak = mask.iter().cloned().fold(f64::MIN, f64::max);
        assert_eq!(mask[[2, 2]], peak);
        assert_relative_eq!(mask[[0, 2]], mask[[2, 0]], epsilon = 1e-15);
    }

    #[test]
    fn test_conv_file_description() {
        let mask = gauss_array(3, 1.5);
        let text = conv_file_text(&mask, 1.5);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "CONV NORM");
        assert_eq!(
            lines[1],
            "# convolution mask of a gaussian PSF with FWHM = 1.5 pixels."
        );
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_gauss_filter(&dir.path().join("g.conv"), 0, 2.0).unwrap_err();
        assert!(matches!(err, CatalogError::Configuration(_)));
    }
}
