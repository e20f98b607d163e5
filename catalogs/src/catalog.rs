//! The unified source catalog.
//!
//! A [`SourceCatalog`] owns the positions produced by exactly one
//! [`AcquisitionStrategy`] and takes them through the rest of the pipeline:
//! flux filtering, conversion to sky coordinates and serialization. Later stages
//! only look at the catalog, never at the strategy that filled it.
//!
//! # Conventions
//!
//! Pixel positions are always 1-based (FITS convention), whatever the internal
//! convention of the strategy that produced them. Every parallel array (x, y,
//! flux, id and the optional shape and quality columns) always has the same
//! length; a catalog with zero sources is valid.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::column_reader::{ColumnCatalogReader, ReferenceCatalogReader, ReferenceSource};
use crate::error::{CatalogError, Result};
use crate::extractor::ExtractorAdapter;
use crate::image::{load_image, ImageRef};
use crate::peak_finder::PeakFinder;
use crate::projection::{Origin, ProjectionError, SkyProjection};

/// Native unit of a catalog's primary coordinate columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Pixels,
    Degrees,
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Units::Pixels => write!(f, "pixels"),
            Units::Degrees => write!(f, "degrees"),
        }
    }
}

/// Inclusive flux bounds; a missing bound leaves that side unconstrained.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FluxRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl FluxRange {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    pub fn contains(&self, flux: f64) -> bool {
        self.min.map_or(true, |min| flux >= min) && self.max.map_or(true, |max| flux <= max)
    }

    /// Keep-mask for a flux column.
    pub fn mask(&self, flux: &[f64]) -> Vec<bool> {
        flux.iter().map(|&f| self.contains(f)).collect()
    }
}

fn retain_by_mask<T>(values: &mut Vec<T>, keep: &[bool]) {
    let mut index = 0;
    values.retain(|_| {
        let kept = keep[index];
        index += 1;
        kept
    });
}

/// Co-indexed x, y, flux and id columns in 1-based pixel coordinates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PixelPositions {
    x: Vec<f64>,
    y: Vec<f64>,
    flux: Vec<f64>,
    id: Vec<i64>,
}

impl PixelPositions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from explicit columns, rejecting columns of different lengths.
    pub fn from_columns(x: Vec<f64>, y: Vec<f64>, flux: Vec<f64>, id: Vec<i64>) -> Result<Self> {
        let n = x.len();
        if y.len() != n || flux.len() != n || id.len() != n {
            return Err(CatalogError::config(format!(
                "position columns differ in length: x={}, y={}, flux={}, id={}",
                n,
                y.len(),
                flux.len(),
                id.len()
            )));
        }
        Ok(Self { x, y, flux, id })
    }

    /// Build from x/y/flux columns, numbering sources from `id_offset`.
    pub fn with_sequential_ids(
        x: Vec<f64>,
        y: Vec<f64>,
        flux: Vec<f64>,
        id_offset: i64,
    ) -> Result<Self> {
        let id = (0..x.len() as i64).map(|i| i + id_offset).collect();
        Self::from_columns(x, y, flux, id)
    }

    pub fn push(&mut self, x: f64, y: f64, flux: f64, id: i64) {
        self.x.push(x);
        self.y.push(y);
        self.flux.push(flux);
        self.id.push(id);
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn flux(&self) -> &[f64] {
        &self.flux
    }

    pub fn id(&self) -> &[i64] {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Rows as `(x, y, flux, id)` tuples.
    pub fn rows(&self) -> impl Iterator<Item = (f64, f64, f64, i64)> + '_ {
        (0..self.len()).map(move |i| (self.x[i], self.y[i], self.flux[i], self.id[i]))
    }

    pub(crate) fn retain(&mut self, keep: &[bool]) {
        retain_by_mask(&mut self.x, keep);
        retain_by_mask(&mut self.y, keep);
        retain_by_mask(&mut self.flux, keep);
        retain_by_mask(&mut self.id, keep);
    }
}

/// Sky positions in degrees, co-indexed with the pixel positions they came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkyPositions {
    pub ra: Vec<f64>,
    pub dec: Vec<f64>,
    /// Only populated for reference catalogs read with a flux column.
    pub flux: Option<Vec<f64>>,
}

impl SkyPositions {
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Self {
        let (ra, dec) = pairs.iter().copied().unzip();
        Self {
            ra,
            dec,
            flux: None,
        }
    }

    pub fn len(&self) -> usize {
        self.ra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ra.is_empty()
    }

    pub fn pairs(&self) -> Vec<(f64, f64)> {
        self.ra.iter().copied().zip(self.dec.iter().copied()).collect()
    }

    fn retain(&mut self, keep: &[bool]) {
        retain_by_mask(&mut self.ra, keep);
        retain_by_mask(&mut self.dec, keep);
        if let Some(flux) = self.flux.as_mut() {
            retain_by_mask(flux, keep);
        }
    }
}

/// Shape metrics reported by strategies that measure them.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeMetrics {
    pub sharpness: Vec<f64>,
    pub roundness: Option<Vec<f64>>,
}

impl ShapeMetrics {
    fn retain(&mut self, keep: &[bool]) {
        retain_by_mask(&mut self.sharpness, keep);
        if let Some(roundness) = self.roundness.as_mut() {
            retain_by_mask(roundness, keep);
        }
    }
}

/// Per-source quality columns from the external extraction tool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionQuality {
    pub flux_err: Vec<f64>,
    pub flags: Vec<i64>,
    pub fwhm: Vec<f64>,
}

impl ExtractionQuality {
    pub fn len(&self) -> usize {
        self.flux_err.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flux_err.is_empty()
    }

    fn retain(&mut self, keep: &[bool]) {
        retain_by_mask(&mut self.flux_err, keep);
        retain_by_mask(&mut self.flags, keep);
        retain_by_mask(&mut self.fwhm, keep);
    }
}

/// Pixels fed to the in-process detector.
#[derive(Debug, Clone)]
pub enum ImageInput {
    InMemory(Array2<f64>),
    File(ImageRef),
}

/// How a catalog obtains its sources.
#[derive(Debug)]
pub enum AcquisitionStrategy {
    /// In-process peak detection on image pixels.
    PeakDetection {
        image: ImageInput,
        finder: PeakFinder,
    },
    /// Delegation to the external source-extraction executable.
    ExternalExtraction {
        image: ImageRef,
        adapter: ExtractorAdapter,
    },
    /// A user-supplied column file in pixel (or sky) units.
    ColumnRead {
        path: PathBuf,
        reader: ColumnCatalogReader,
    },
    /// A reference list of sky positions.
    ReferenceRead {
        source: ReferenceSource,
        reader: ReferenceCatalogReader,
    },
}

/// What a strategy produced, before the catalog commits it.
#[derive(Debug, Default)]
struct Acquisition {
    positions: PixelPositions,
    shape: Option<ShapeMetrics>,
    quality: Option<ExtractionQuality>,
    sky: Option<SkyPositions>,
    flux_range: Option<FluxRange>,
}

impl AcquisitionStrategy {
    pub fn kind(&self) -> &'static str {
        match self {
            AcquisitionStrategy::PeakDetection { .. } => "peak detection",
            AcquisitionStrategy::ExternalExtraction { .. } => "external extraction",
            AcquisitionStrategy::ColumnRead { .. } => "column file",
            AcquisitionStrategy::ReferenceRead { .. } => "reference catalog",
        }
    }

    fn is_reference(&self) -> bool {
        matches!(self, AcquisitionStrategy::ReferenceRead { .. })
    }

    fn acquire(&self, id_offset: i64) -> Result<Acquisition> {
        match self {
            AcquisitionStrategy::PeakDetection { image, finder } => {
                let loaded;
                let pixels = match image {
                    ImageInput::InMemory(array) => array.view(),
                    ImageInput::File(image) => {
                        loaded = load_image(image)?;
                        loaded.view()
                    }
                };
                Ok(Acquisition {
                    positions: finder.detect(pixels)?,
                    ..Default::default()
                })
            }
            AcquisitionStrategy::ExternalExtraction { image, adapter } => {
                let extraction = adapter.extract(image)?;
                Ok(Acquisition {
                    positions: extraction.positions,
                    quality: Some(extraction.quality),
                    flux_range: Some(adapter.flux_range()),
                    ..Default::default()
                })
            }
            AcquisitionStrategy::ColumnRead { path, reader } => {
                let Some(columns) = reader.read(path)? else {
                    return Ok(Acquisition::default());
                };
                let shape = columns.sharpness.clone().map(|sharpness| ShapeMetrics {
                    sharpness,
                    roundness: columns.roundness.clone(),
                });
                Ok(Acquisition {
                    positions: columns.into_positions(id_offset)?,
                    shape,
                    flux_range: Some(reader.flux_range()),
                    ..Default::default()
                })
            }
            AcquisitionStrategy::ReferenceRead { source, reader } => Ok(Acquisition {
                sky: Some(reader.read(source)?.unwrap_or_default()),
                ..Default::default()
            }),
        }
    }
}

/// A catalog of point sources for one image or reference list.
#[derive(Debug)]
pub struct SourceCatalog {
    name: String,
    projection: Option<Arc<dyn SkyProjection>>,
    strategy: AcquisitionStrategy,
    units: Units,
    id_offset: i64,
    pixel_positions: PixelPositions,
    sky_positions: Option<SkyPositions>,
    shape_metrics: Option<ShapeMetrics>,
    quality: Option<ExtractionQuality>,
    acquired: bool,
}

impl SourceCatalog {
    /// Create an empty catalog bound to a strategy.
    pub fn new(
        name: impl Into<String>,
        projection: Option<Arc<dyn SkyProjection>>,
        strategy: AcquisitionStrategy,
        units: Units,
        id_offset: i64,
    ) -> Self {
        Self {
            name: name.into(),
            projection,
            strategy,
            units,
            id_offset,
            pixel_positions: PixelPositions::new(),
            sky_positions: None,
            shape_metrics: None,
            quality: None,
            acquired: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> &AcquisitionStrategy {
        &self.strategy
    }

    pub fn projection(&self) -> Option<&Arc<dyn SkyProjection>> {
        self.projection.as_ref()
    }

    pub fn units(&self) -> Units {
        self.units
    }

    pub fn id_offset(&self) -> i64 {
        self.id_offset
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    pub fn pixel_positions(&self) -> &PixelPositions {
        &self.pixel_positions
    }

    pub fn sky_positions(&self) -> Option<&SkyPositions> {
        self.sky_positions.as_ref()
    }

    pub fn shape_metrics(&self) -> Option<&ShapeMetrics> {
        self.shape_metrics.as_ref()
    }

    pub fn quality(&self) -> Option<&ExtractionQuality> {
        self.quality.as_ref()
    }

    /// Number of sources; zero is a valid outcome.
    pub fn source_count(&self) -> usize {
        if self.strategy.is_reference() {
            self.sky_positions.as_ref().map_or(0, SkyPositions::len)
        } else {
            self.pixel_positions.len()
        }
    }

    /// Run the bound strategy and commit its positions.
    ///
    /// A catalog is populated once; later calls leave it unchanged and return the
    /// current count.
    pub fn acquire(&mut self) -> Result<usize> {
        if self.acquired {
            debug!("Catalog for {} already acquired", self.name);
            return Ok(self.source_count());
        }

        let acquisition = self.strategy.acquire(self.id_offset)?;
        self.pixel_positions = acquisition.positions;
        self.shape_metrics = acquisition.shape;
        self.quality = acquisition.quality;
        self.sky_positions = acquisition.sky;
        self.acquired = true;

        if let Some(range) = acquisition.flux_range.filter(|r| !r.is_unbounded()) {
            self.filter_flux(&range);
        }

        let count = self.source_count();
        if count == 0 {
            info!(
                "No objects found for {} ({})",
                self.name,
                self.strategy.kind()
            );
        } else {
            info!(
                "Found {} objects for {} ({})",
                count,
                self.name,
                self.strategy.kind()
            );
        }
        Ok(count)
    }

    /// Drop every source whose flux falls outside `range`.
    ///
    /// All parallel columns are filtered together. Filtering twice with the same
    /// range changes nothing. Returns the number of sources removed.
    pub fn filter_flux(&mut self, range: &FluxRange) -> usize {
        if self.strategy.is_reference() {
            let Some(sky) = self.sky_positions.as_mut() else {
                return 0;
            };
            let Some(flux) = sky.flux.as_ref() else {
                return 0;
            };
            let keep = range.mask(flux);
            let removed = keep.iter().filter(|k| !**k).count();
            sky.retain(&keep);
            return removed;
        }

        let keep = range.mask(self.pixel_positions.flux());
        let removed = keep.iter().filter(|k| !**k).count();
        if removed == 0 {
            return 0;
        }

        self.pixel_positions.retain(&keep);
        if let Some(shape) = self.shape_metrics.as_mut() {
            shape.retain(&keep);
        }
        if let Some(quality) = self.quality.as_mut() {
            quality.retain(&keep);
        }
        if let Some(sky) = self.sky_positions.as_mut() {
            sky.retain(&keep);
        }
        debug!("Flux range removed {} sources from {}", removed, self.name);
        removed
    }

    /// Convert the pixel positions to sky coordinates.
    ///
    /// Reference catalogs already hold sky positions and are left untouched. An
    /// empty catalog is a no-op. Without a projection, catalogs in degrees are
    /// passed through verbatim while catalogs in pixels fail with
    /// [`ProjectionError::Missing`]. Pixel positions are never modified.
    pub fn to_sky(&mut self) -> Result<()> {
        if self.strategy.is_reference() {
            return Ok(());
        }

        if self.pixel_positions.is_empty() {
            info!("No objects found for this image from catalog: {}", self.name);
            self.sky_positions = None;
            return Ok(());
        }

        let Some(projection) = self.projection.as_ref() else {
            if self.units == Units::Degrees {
                self.sky_positions = Some(SkyPositions {
                    ra: self.pixel_positions.x().to_vec(),
                    dec: self.pixel_positions.y().to_vec(),
                    flux: None,
                });
                return Ok(());
            }
            return Err(ProjectionError::Missing.into());
        };

        info!("Number of objects in catalog: {}", self.pixel_positions.len());
        let (ra, dec) = projection.pixel_to_sky(
            self.pixel_positions.x(),
            self.pixel_positions.y(),
            Origin::One,
        )?;
        if ra.len() != self.pixel_positions.len() || dec.len() != ra.len() {
            return Err(ProjectionError::LengthMismatch {
                x: ra.len(),
                y: dec.len(),
            }
            .into());
        }
        self.sky_positions = Some(SkyPositions {
            ra,
            dec,
            flux: None,
        });
        Ok(())
    }

    /// Acquire the sources and convert them to sky coordinates.
    pub fn build(&mut self) -> Result<()> {
        self.acquire()?;
        self.to_sky()
    }

    /// Write the pixel positions as a commented, space separated column file.
    ///
    /// # Arguments
    /// * `path` - Output file, overwritten if present
    ///
    /// # Returns
    /// `NothingToWrite` for an empty catalog, otherwise any I/O failure
    pub fn serialize(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if self.pixel_positions.is_empty() {
            warn!("No X,Y source catalog to write to {}", path.display());
            return Err(CatalogError::NothingToWrite(format!(
                "catalog for {} has no pixel positions",
                self.name
            )));
        }

        let source_name = self
            .projection
            .as_ref()
            .and_then(|p| p.name())
            .unwrap_or(self.name.as_str());

        let file = File::create(path).map_err(|e| CatalogError::io(path, e))?;
        let mut out = BufWriter::new(file);
        let write = |out: &mut BufWriter<File>| -> std::io::Result<()> {
            writeln!(out, "# Source catalog derived for {source_name}")?;
            writeln!(out, "# Columns: ")?;
            writeln!(out, "#    X      Y         Flux       ID")?;
            writeln!(out, "#   ({})   ({})", self.units, self.units)?;
            for (x, y, flux, id) in self.pixel_positions.rows() {
                writeln!(out, "{x}  {y}  {flux}  {id}")?;
            }
            out.flush()
        };
        write(&mut out).map_err(|e| CatalogError::io(path, e))?;
        info!(
            "Wrote {} sources to {}",
            self.pixel_positions.len(),
            path.display()
        );
        Ok(())
    }
}
