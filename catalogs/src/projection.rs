//! Pixel to sky projection boundary.
//!
//! Catalogs only ever talk to a projection through [`SkyProjection`]. The crate
//! ships [`TanProjection`], a plain gnomonic (tangent plane) solution driven by the
//! FITS `CRPIX`/`CRVAL`/`CD` keywords, which is enough for undistorted images and
//! for tests. Distortion-aware engines can be plugged in by implementing the trait.

use std::fmt;

use thiserror::Error;

/// Errors raised by a projection or by a catalog asking for one.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    #[error("No projection available to convert pixel positions to sky coordinates")]
    Missing,

    #[error("Invalid projection: {0}")]
    Invalid(String),

    #[error("Coordinate arrays differ in length: {x} x values, {y} y values")]
    LengthMismatch { x: usize, y: usize },
}

/// Index of the first pixel along each axis.
///
/// Catalog positions are always reported with [`Origin::One`] (FITS convention).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Zero,
    One,
}

impl Origin {
    /// Offset that converts a coordinate in this convention into FITS 1-based pixels.
    pub fn to_fits_offset(self) -> f64 {
        match self {
            Origin::Zero => 1.0,
            Origin::One => 0.0,
        }
    }
}

/// A pixel to sky transform bound to one image or extension.
pub trait SkyProjection: fmt::Debug + Send + Sync {
    /// Convert pixel columns into (RA, Dec) columns in degrees, preserving order.
    fn pixel_to_sky(
        &self,
        x: &[f64],
        y: &[f64],
        origin: Origin,
    ) -> Result<(Vec<f64>, Vec<f64>), ProjectionError>;

    /// Pixel scale in arcseconds per pixel.
    fn pixel_scale(&self) -> f64;

    /// Name of the image the projection belongs to, used in catalog headers.
    fn name(&self) -> Option<&str> {
        None
    }
}

/// Gnomonic projection defined by a reference pixel, reference sky position and CD matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct TanProjection {
    /// Reference pixel (CRPIX1, CRPIX2), 1-based
    pub crpix: (f64, f64),
    /// Reference sky position in degrees (CRVAL1 = RA, CRVAL2 = Dec)
    pub crval: (f64, f64),
    /// CD matrix in degrees per pixel, [[CD1_1, CD1_2], [CD2_1, CD2_2]]
    pub cd: [[f64; 2]; 2],
    name: Option<String>,
}

impl TanProjection {
    pub fn new(crpix: (f64, f64), crval: (f64, f64), cd: [[f64; 2]; 2]) -> Self {
        Self {
            crpix,
            crval,
            cd,
            name: None,
        }
    }

    /// Attach the image name reported by [`SkyProjection::name`].
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Build a projection from header keywords.
    ///
    /// `get_keyword` returns the numeric value of a keyword when present. The CD
    /// matrix is taken from `CDi_j` when available, otherwise from `CDELTi` with
    /// an optional `PCi_j` rotation.
    pub fn from_header<F>(mut get_keyword: F) -> Result<Self, ProjectionError>
    where
        F: FnMut(&str) -> Option<f64>,
    {
        let mut required = |key: &str| {
            get_keyword(key).ok_or_else(|| ProjectionError::Invalid(format!("missing {key}")))
        };
        let crpix = (required("CRPIX1")?, required("CRPIX2")?);
        let crval = (required("CRVAL1")?, required("CRVAL2")?);

        let cd = match get_keyword("CD1_1") {
            Some(cd11) => [
                [cd11, get_keyword("CD1_2").unwrap_or(0.0)],
                [
                    get_keyword("CD2_1").unwrap_or(0.0),
                    get_keyword("CD2_2").unwrap_or(0.0),
                ],
            ],
            None => {
                let cdelt1 = get_keyword("CDELT1")
                    .ok_or_else(|| ProjectionError::Invalid("missing CD1_1/CDELT1".into()))?;
                let cdelt2 = get_keyword("CDELT2")
                    .ok_or_else(|| ProjectionError::Invalid("missing CD2_2/CDELT2".into()))?;
                let pc11 = get_keyword("PC1_1").unwrap_or(1.0);
                let pc12 = get_keyword("PC1_2").unwrap_or(0.0);
                let pc21 = get_keyword("PC2_1").unwrap_or(0.0);
                let pc22 = get_keyword("PC2_2").unwrap_or(1.0);
                [
                    [cdelt1 * pc11, cdelt1 * pc12],
                    [cdelt2 * pc21, cdelt2 * pc22],
                ]
            }
        };

        let projection = Self::new(crpix, crval, cd);
        projection.validate()?;
        Ok(projection)
    }

    fn determinant(&self) -> f64 {
        self.cd[0][0] * self.cd[1][1] - self.cd[0][1] * self.cd[1][0]
    }

    /// Check that the solution can actually map pixels to the sky.
    pub fn validate(&self) -> Result<(), ProjectionError> {
        let values = [
            self.crpix.0,
            self.crpix.1,
            self.crval.0,
            self.crval.1,
            self.cd[0][0],
            self.cd[0][1],
            self.cd[1][0],
            self.cd[1][1],
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ProjectionError::Invalid(
                "non-finite projection parameters".into(),
            ));
        }
        if self.determinant() == 0.0 {
            return Err(ProjectionError::Invalid("singular CD matrix".into()));
        }
        Ok(())
    }

    /// Convert one 1-based pixel position to (RA, Dec) in degrees.
    fn project(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = x - self.crpix.0;
        let dy = y - self.crpix.1;

        let xi = (self.cd[0][0] * dx + self.cd[0][1] * dy).to_radians();
        let eta = (self.cd[1][0] * dx + self.cd[1][1] * dy).to_radians();

        let ra0 = self.crval.0.to_radians();
        let (sin_dec0, cos_dec0) = self.crval.1.to_radians().sin_cos();
        let denom = cos_dec0 - eta * sin_dec0;

        let ra = ra0 + xi.atan2(denom);
        let dec = (sin_dec0 + eta * cos_dec0).atan2((xi * xi + denom * denom).sqrt());

        (ra.to_degrees().rem_euclid(360.0), dec.to_degrees())
    }
}

impl SkyProjection for TanProjection {
    fn pixel_to_sky(
        &self,
        x: &[f64],
        y: &[f64],
        origin: Origin,
    ) -> Result<(Vec<f64>, Vec<f64>), ProjectionError> {
        if x.len() != y.len() {
            return Err(ProjectionError::LengthMismatch {
                x: x.len(),
                y: y.len(),
            });
        }
        self.validate()?;

        let offset = origin.to_fits_offset();
        Ok(x.iter()
            .zip(y)
            .map(|(&px, &py)| self.project(px + offset, py + offset))
            .unzip())
    }

    fn pixel_scale(&self) -> f64 {
        self.determinant().abs().sqrt() * 3600.0
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}
