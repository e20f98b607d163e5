//! Image references and FITS access.
//!
//! Images are addressed the way astronomers type them on the command line:
//! `frame.fits` for the primary HDU and `frame.fits[2]` for one extension of a
//! multi-extension container. Reading goes through `fitsio` when the `fits`
//! feature is enabled; every failure to reach the pixels is reported as
//! [`CatalogError::NoValidPixels`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ndarray::Array2;

use crate::error::{CatalogError, Result};
use crate::projection::TanProjection;

/// Header keywords copied alongside the pixels when an extension is materialized.
#[cfg(feature = "fits")]
const WCS_KEYWORDS: [&str; 12] = [
    "CRPIX1", "CRPIX2", "CRVAL1", "CRVAL2", "CD1_1", "CD1_2", "CD2_1", "CD2_2", "CDELT1",
    "CDELT2", "GAIN", "EXPTIME",
];

#[cfg(feature = "fits")]
const WCS_STRING_KEYWORDS: [&str; 2] = ["CTYPE1", "CTYPE2"];

/// A FITS file, optionally narrowed to a single extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub path: PathBuf,
    pub extension: Option<usize>,
}

impl ImageRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            extension: None,
        }
    }

    pub fn with_extension(path: impl Into<PathBuf>, extension: usize) -> Self {
        Self {
            path: path.into(),
            extension: Some(extension),
        }
    }

    /// Parse `path` or `path[ext]`.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let Some(open) = text.find('[') else {
            if text.is_empty() {
                return Err(CatalogError::config("empty image reference"));
            }
            return Ok(Self::new(text));
        };

        let close = text
            .rfind(']')
            .filter(|&close| close > open && close == text.len() - 1)
            .ok_or_else(|| CatalogError::config(format!("malformed image reference '{text}'")))?;
        let extension = text[open + 1..close].trim().parse::<usize>().map_err(|_| {
            CatalogError::config(format!("extension in '{text}' must be an integer index"))
        })?;
        if open == 0 {
            return Err(CatalogError::config(format!(
                "image reference '{text}' has no file name"
            )));
        }
        Ok(Self::with_extension(&text[..open], extension))
    }

    /// Path without its `.fits` suffix, used to derive companion file names.
    pub fn root(&self) -> PathBuf {
        strip_fits_suffix(&self.path)
    }
}

impl FromStr for ImageRef {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.extension {
            Some(ext) => write!(f, "{}[{}]", self.path.display(), ext),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

/// Drop a trailing `.fits` (any case) or, failing that, the last extension.
pub fn strip_fits_suffix(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if text.to_ascii_lowercase().ends_with(".fits") {
        PathBuf::from(&text[..text.len() - ".fits".len()])
    } else {
        path.with_extension("")
    }
}

/// Append `suffix` to the file name of `root`.
pub fn with_suffix(root: &Path, suffix: &str) -> PathBuf {
    let mut name = root.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Name of the standalone copy of an extension with the given EXTVER.
pub fn materialized_name(image: &ImageRef, extver: i64) -> PathBuf {
    with_suffix(&image.root(), &format!("_extract_sci{extver}.fits"))
}

#[cfg(feature = "fits")]
fn no_pixels(image: &ImageRef, reason: impl fmt::Display) -> CatalogError {
    CatalogError::NoValidPixels {
        path: image.path.clone(),
        reason: reason.to_string(),
    }
}

#[cfg(feature = "fits")]
fn read_hdu_pixels(
    image: &ImageRef,
    fptr: &mut fitsio::FitsFile,
    hdu: &fitsio::hdu::FitsHdu,
) -> Result<Array2<f64>> {
    use fitsio::hdu::HduInfo;

    let (height, width) = match &hdu.info {
        HduInfo::ImageInfo { shape, .. } if shape.len() == 2 => (shape[0], shape[1]),
        HduInfo::ImageInfo { shape, .. } => {
            return Err(no_pixels(
                image,
                format!("expected a 2-D image, found {} axes", shape.len()),
            ))
        }
        _ => return Err(no_pixels(image, "HDU is not an image")),
    };

    let pixels: Vec<f64> = hdu
        .read_image(fptr)
        .map_err(|e| no_pixels(image, e))?;
    Array2::from_shape_vec((height, width), pixels).map_err(|e| no_pixels(image, e))
}

/// Load the referenced HDU as a `(rows, cols)` array of pixel values.
#[cfg(feature = "fits")]
pub fn load_image(image: &ImageRef) -> Result<Array2<f64>> {
    use fitsio::FitsFile;

    let mut fptr = FitsFile::open(&image.path).map_err(|e| no_pixels(image, e))?;
    let hdu = fptr
        .hdu(image.extension.unwrap_or(0))
        .map_err(|e| no_pixels(image, e))?;
    read_hdu_pixels(image, &mut fptr, &hdu)
}

#[cfg(not(feature = "fits"))]
pub fn load_image(image: &ImageRef) -> Result<Array2<f64>> {
    Err(CatalogError::NoValidPixels {
        path: image.path.clone(),
        reason: "built without FITS support".into(),
    })
}

/// Copy one extension into a standalone single-HDU FITS file.
///
/// The copy is named `<root>_extract_sci<EXTVER>.fits`; an existing file of that
/// name is removed first. Returns the path of the copy.
#[cfg(feature = "fits")]
pub fn materialize_extension(image: &ImageRef) -> Result<PathBuf> {
    use fitsio::images::{ImageDescription, ImageType};
    use fitsio::FitsFile;

    let mut fptr = FitsFile::open(&image.path).map_err(|e| no_pixels(image, e))?;
    let hdu = fptr
        .hdu(image.extension.unwrap_or(0))
        .map_err(|e| no_pixels(image, e))?;
    let extver = hdu.read_key::<i64>(&mut fptr, "EXTVER").unwrap_or(1);
    let pixels = read_hdu_pixels(image, &mut fptr, &hdu)?;

    let numeric: Vec<(&str, f64)> = WCS_KEYWORDS
        .iter()
        .filter_map(|&key| hdu.read_key::<f64>(&mut fptr, key).ok().map(|v| (key, v)))
        .collect();
    let strings: Vec<(&str, String)> = WCS_STRING_KEYWORDS
        .iter()
        .filter_map(|&key| {
            hdu.read_key::<String>(&mut fptr, key)
                .ok()
                .map(|v| (key, v))
        })
        .collect();

    let out_path = materialized_name(image, extver);
    if out_path.exists() {
        std::fs::remove_file(&out_path).map_err(|e| CatalogError::io(&out_path, e))?;
    }

    let (height, width) = pixels.dim();
    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: &[height, width],
    };
    let write_failed = |e: fitsio::errors::Error| CatalogError::NoValidPixels {
        path: out_path.clone(),
        reason: e.to_string(),
    };

    let mut out = FitsFile::create(&out_path)
        .with_custom_primary(&description)
        .open()
        .map_err(write_failed)?;
    let primary = out.primary_hdu().map_err(write_failed)?;
    let flat: Vec<f64> = pixels.iter().copied().collect();
    primary.write_image(&mut out, &flat).map_err(write_failed)?;
    primary
        .write_key(&mut out, "EXTVER", extver)
        .map_err(write_failed)?;
    for (key, value) in numeric {
        primary.write_key(&mut out, key, value).map_err(write_failed)?;
    }
    for (key, value) in strings {
        primary.write_key(&mut out, key, value).map_err(write_failed)?;
    }

    log::debug!("Materialized {} as {}", image, out_path.display());
    Ok(out_path)
}

#[cfg(not(feature = "fits"))]
pub fn materialize_extension(image: &ImageRef) -> Result<PathBuf> {
    Err(CatalogError::NoValidPixels {
        path: image.path.clone(),
        reason: "built without FITS support".into(),
    })
}

/// Build a tangent-plane projection from the WCS keywords of the referenced HDU.
#[cfg(feature = "fits")]
pub fn read_projection(image: &ImageRef) -> Result<TanProjection> {
    use fitsio::FitsFile;

    let mut fptr = FitsFile::open(&image.path).map_err(|e| no_pixels(image, e))?;
    let hdu = fptr
        .hdu(image.extension.unwrap_or(0))
        .map_err(|e| no_pixels(image, e))?;
    let projection =
        TanProjection::from_header(|key| hdu.read_key::<f64>(&mut fptr, key).ok())?;
    Ok(projection.with_name(image.to_string()))
}

#[cfg(not(feature = "fits"))]
pub fn read_projection(image: &ImageRef) -> Result<TanProjection> {
    Err(CatalogError::NoValidPixels {
        path: image.path.clone(),
        reason: "built without FITS support".into(),
    })
}
