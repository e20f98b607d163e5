//! Choosing and constructing the acquisition strategy for a catalog source.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use log::debug;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::catalog::{AcquisitionStrategy, ImageInput, SourceCatalog, Units};
use crate::column_reader::{
    ColumnCatalogReader, ColumnSpec, ReferenceCatalogReader, ReferenceColumns, ReferenceSource,
};
use crate::error::{CatalogError, Result};
use crate::extractor::{self, ExtractorAdapter, ExtractorOptions};
use crate::image::ImageRef;
use crate::peak_finder::{PeakFinder, PeakOptions};
use crate::projection::SkyProjection;

/// Whether sources are detected on an image or read from a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    #[default]
    Automatic,
    File,
}

impl FromStr for AcquisitionMode {
    type Err = std::convert::Infallible;

    /// Anything but `automatic` selects file mode.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(if s.eq_ignore_ascii_case("automatic") {
            AcquisitionMode::Automatic
        } else {
            AcquisitionMode::File
        })
    }
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionMode::Automatic => write!(f, "automatic"),
            AcquisitionMode::File => write!(f, "file"),
        }
    }
}

/// Detection engine requested for automatic mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindMode {
    /// The external extraction tool, when it is installed
    #[serde(rename = "sextractor")]
    Extractor,
    /// The in-process peak finder
    #[serde(rename = "daofind")]
    PeakFinder,
}

impl FromStr for FindMode {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sextractor" | "source-extractor" | "extractor" => Ok(FindMode::Extractor),
            "daofind" | "peak" | "peakfinder" => Ok(FindMode::PeakFinder),
            other => Err(CatalogError::config(format!("unknown findmode '{other}'"))),
        }
    }
}

impl fmt::Display for FindMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindMode::Extractor => write!(f, "sextractor"),
            FindMode::PeakFinder => write!(f, "daofind"),
        }
    }
}

/// Options for every strategy the factory can build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogOptions {
    pub findmode: Option<FindMode>,
    /// First id assigned to generated sources
    pub start_id: i64,
    pub peak: Option<PeakOptions>,
    pub extractor: ExtractorOptions,
    pub columns: ColumnSpec,
}

/// What a catalog is built from.
#[derive(Debug)]
pub enum CatalogSource {
    /// An already constructed catalog, passed through unchanged
    Catalog(SourceCatalog),
    /// An image file, optionally naming one extension
    Image(ImageRef),
    /// Pixels already in memory
    Pixels(Array2<f64>),
    /// A column catalog file
    File(PathBuf),
}

impl From<SourceCatalog> for CatalogSource {
    fn from(catalog: SourceCatalog) -> Self {
        CatalogSource::Catalog(catalog)
    }
}

impl From<ImageRef> for CatalogSource {
    fn from(image: ImageRef) -> Self {
        CatalogSource::Image(image)
    }
}

impl From<Array2<f64>> for CatalogSource {
    fn from(pixels: Array2<f64>) -> Self {
        CatalogSource::Pixels(pixels)
    }
}

impl From<PathBuf> for CatalogSource {
    fn from(path: PathBuf) -> Self {
        CatalogSource::File(path)
    }
}

/// Capability probe deciding whether the external tool can be used.
pub type ToolProbe = Box<dyn Fn(&ExtractorOptions) -> bool + Send + Sync>;

/// Builds [`SourceCatalog`]s.
pub struct CatalogFactory {
    probe: ToolProbe,
}

impl fmt::Debug for CatalogFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogFactory").finish_non_exhaustive()
    }
}

impl Default for CatalogFactory {
    fn default() -> Self {
        Self::with_probe(extractor::is_installed)
    }
}

impl CatalogFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `probe` instead of launching the tool to check it is installed.
    pub fn with_probe<F>(probe: F) -> Self
    where
        F: Fn(&ExtractorOptions) -> bool + Send + Sync + 'static,
    {
        Self {
            probe: Box::new(probe),
        }
    }

    /// Build a catalog for `source`.
    ///
    /// In automatic mode the external tool is only used when it was requested,
    /// the probe finds it and the source is an image file; every other case
    /// falls back to in-process peak detection. File mode reads a column file.
    ///
    /// # Arguments
    /// * `projection` - Pixel to sky mapping of the image, if known
    /// * `source` - An existing catalog (returned as-is), an image, pixels or a file
    /// * `mode` - Automatic detection or a user-supplied column file
    /// * `options` - Engine choice, start id and per-strategy options
    ///
    /// # Returns
    /// An unacquired catalog bound to one strategy, or a configuration error
    /// when the source does not fit the mode or the options are invalid
    pub fn build(
        &self,
        projection: Option<Arc<dyn SkyProjection>>,
        source: CatalogSource,
        mode: AcquisitionMode,
        options: &CatalogOptions,
    ) -> Result<SourceCatalog> {
        if let CatalogSource::Catalog(catalog) = source {
            return Ok(catalog);
        }

        match mode {
            AcquisitionMode::Automatic => self.build_automatic(projection, source, options),
            AcquisitionMode::File => {
                let path = match source {
                    CatalogSource::File(path) => path,
                    CatalogSource::Image(image) if image.extension.is_none() => image.path,
                    other => {
                        return Err(CatalogError::config(format!(
                            "file mode needs a catalog file path, got {}",
                            describe(&other)
                        )))
                    }
                };
                let reader = ColumnCatalogReader::new(options.columns.clone())?;
                Ok(SourceCatalog::new(
                    path.display().to_string(),
                    projection,
                    AcquisitionStrategy::ColumnRead { path, reader },
                    options.columns.xyunits,
                    options.start_id,
                ))
            }
        }
    }

    fn build_automatic(
        &self,
        projection: Option<Arc<dyn SkyProjection>>,
        source: CatalogSource,
        options: &CatalogOptions,
    ) -> Result<SourceCatalog> {
        let findmode = options
            .findmode
            .ok_or_else(|| CatalogError::config("automatic mode requires a findmode"))?;

        let (name, image) = match source {
            CatalogSource::Image(image) => (image.to_string(), ImageInput::File(image)),
            CatalogSource::File(path) => {
                let image = ImageRef::new(path);
                (image.to_string(), ImageInput::File(image))
            }
            CatalogSource::Pixels(pixels) => ("in-memory image".to_string(), ImageInput::InMemory(pixels)),
            CatalogSource::Catalog(catalog) => return Ok(catalog),
        };

        let use_tool = match (&image, findmode) {
            (ImageInput::File(_), FindMode::Extractor) => (self.probe)(&options.extractor),
            _ => false,
        };

        let strategy = match image {
            ImageInput::File(image) if use_tool => {
                debug!("Using the external extraction tool for {name}");
                let adapter = ExtractorAdapter::new(
                    options.extractor.clone(),
                    projection.as_deref(),
                    options.start_id,
                )?;
                AcquisitionStrategy::ExternalExtraction { image, adapter }
            }
            image => {
                if findmode == FindMode::Extractor {
                    debug!("External extraction unavailable for {name}; using peak detection");
                }
                let peak = options.peak.clone().ok_or_else(|| {
                    CatalogError::config("peak detection requires peak options")
                })?;
                let finder = PeakFinder::new(peak, options.start_id)?;
                AcquisitionStrategy::PeakDetection { image, finder }
            }
        };

        Ok(SourceCatalog::new(
            name,
            projection,
            strategy,
            Units::Pixels,
            options.start_id,
        ))
    }

    /// Build a reference catalog from a sky position file or an in-memory list.
    ///
    /// # Arguments
    /// * `source` - Path of an RA/Dec column file, or (RA, Dec) pairs in degrees
    /// * `columns` - Column numbers of RA, Dec and optional flux in the file
    ///
    /// # Returns
    /// A catalog in degrees that is never projected
    pub fn reference(
        &self,
        source: impl Into<ReferenceSource>,
        columns: &ReferenceColumns,
    ) -> Result<SourceCatalog> {
        let source = source.into();
        let name = match &source {
            ReferenceSource::File(path) => path.display().to_string(),
            ReferenceSource::Positions(_) => "reference list".to_string(),
        };
        let reader = ReferenceCatalogReader::new(columns)?;
        Ok(SourceCatalog::new(
            name,
            None,
            AcquisitionStrategy::ReferenceRead { source, reader },
            Units::Degrees,
            0,
        ))
    }
}

fn describe(source: &CatalogSource) -> String {
    match source {
        CatalogSource::Catalog(catalog) => format!("catalog {}", catalog.name()),
        CatalogSource::Image(image) => format!("image {image}"),
        CatalogSource::Pixels(pixels) => format!("{:?} pixel array", pixels.dim()),
        CatalogSource::File(path) => format!("file {}", path.display()),
    }
}

/// Build a catalog with the default, process-launching tool probe.
pub fn generate_catalog(
    projection: Option<Arc<dyn SkyProjection>>,
    source: CatalogSource,
    mode: AcquisitionMode,
    options: &CatalogOptions,
) -> Result<SourceCatalog> {
    CatalogFactory::default().build(projection, source, mode, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn peak_options() -> CatalogOptions {
        CatalogOptions {
            findmode: Some(FindMode::PeakFinder),
            peak: Some(PeakOptions::default()),
            ..Default::default()
        }
    }

    fn counting_factory(answer: bool) -> (CatalogFactory, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let factory = CatalogFactory::with_probe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            answer
        });
        (factory, calls)
    }

    #[test]
    fn test_existing_catalog_passes_through() {
        let factory = CatalogFactory::with_probe(|_| panic!("probe must not run"));
        let inner = factory
            .build(
                None,
                Array2::<f64>::zeros((4, 4)).into(),
                AcquisitionMode::Automatic,
                &peak_options(),
            )
            .unwrap();
        let again = factory
            .build(None, inner.into(), AcquisitionMode::File, &CatalogOptions::default())
            .unwrap();
        assert!(matches!(
            again.strategy(),
            AcquisitionStrategy::PeakDetection { .. }
        ));
    }

    #[test]
    fn test_extractor_chosen_when_probe_succeeds() {
        let (factory, calls) = counting_factory(true);
        let options = CatalogOptions {
            findmode: Some(FindMode::Extractor),
            ..Default::default()
        };
        let catalog = factory
            .build(
                None,
                ImageRef::with_extension("frame.fits", 1).into(),
                AcquisitionMode::Automatic,
                &options,
            )
            .unwrap();
        assert!(matches!(
            catalog.strategy(),
            AcquisitionStrategy::ExternalExtraction { .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_falls_back_when_tool_missing() {
        let (factory, calls) = counting_factory(false);
        let options = CatalogOptions {
            findmode: Some(FindMode::Extractor),
            peak: Some(PeakOptions::default()),
            ..Default::default()
        };
        let catalog = factory
            .build(
                None,
                ImageRef::new("frame.fits").into(),
                AcquisitionMode::Automatic,
                &options,
            )
            .unwrap();
        assert!(matches!(
            catalog.strategy(),
            AcquisitionStrategy::PeakDetection { .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_in_memory_pixels_never_probe() {
        let (factory, calls) = counting_factory(true);
        let options = CatalogOptions {
            findmode: Some(FindMode::Extractor),
            peak: Some(PeakOptions::default()),
            ..Default::default()
        };
        let catalog = factory
            .build(
                None,
                Array2::<f64>::zeros((8, 8)).into(),
                AcquisitionMode::Automatic,
                &options,
            )
            .unwrap();
        assert!(matches!(
            catalog.strategy(),
            AcquisitionStrategy::PeakDetection { .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_configuration_errors() {
        let factory = CatalogFactory::with_probe(|_| false);
        let pixels = || CatalogSource::Pixels(Array2::zeros((4, 4)));

        let no_findmode = CatalogOptions {
            peak: Some(PeakOptions::default()),
            ..Default::default()
        };
        assert!(matches!(
            factory.build(None, pixels(), AcquisitionMode::Automatic, &no_findmode),
            Err(CatalogError::Configuration(_))
        ));

        let no_peak = CatalogOptions {
            findmode: Some(FindMode::PeakFinder),
            ..Default::default()
        };
        assert!(matches!(
            factory.build(None, pixels(), AcquisitionMode::Automatic, &no_peak),
            Err(CatalogError::Configuration(_))
        ));

        let no_sigma = CatalogOptions {
            findmode: Some(FindMode::PeakFinder),
            peak: Some(PeakOptions {
                computesig: false,
                sigma: None,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(matches!(
            factory.build(None, pixels(), AcquisitionMode::Automatic, &no_sigma),
            Err(CatalogError::Configuration(_))
        ));

        assert!(matches!(
            factory.build(None, pixels(), AcquisitionMode::File, &CatalogOptions::default()),
            Err(CatalogError::Configuration(_))
        ));
    }

    #[test]
    fn test_file_mode_uses_column_units() {
        let factory = CatalogFactory::with_probe(|_| false);
        let options = CatalogOptions {
            columns: ColumnSpec {
                xyunits: Units::Degrees,
                ..Default::default()
            },
            ..Default::default()
        };
        let catalog = factory
            .build(
                None,
                PathBuf::from("stars.coo").into(),
                AcquisitionMode::File,
                &options,
            )
            .unwrap();
        assert_eq!(catalog.units(), Units::Degrees);
        assert!(matches!(
            catalog.strategy(),
            AcquisitionStrategy::ColumnRead { .. }
        ));
    }

    #[test]
    fn test_mode_and_findmode_parsing() {
        assert_eq!("automatic".parse::<AcquisitionMode>().unwrap(), AcquisitionMode::Automatic);
        assert_eq!("file".parse::<AcquisitionMode>().unwrap(), AcquisitionMode::File);
        assert_eq!("anything".parse::<AcquisitionMode>().unwrap(), AcquisitionMode::File);
        assert_eq!("sextractor".parse::<FindMode>().unwrap(), FindMode::Extractor);
        assert_eq!("DAOFIND".parse::<FindMode>().unwrap(), FindMode::PeakFinder);
        assert!("imfind".parse::<FindMode>().is_err());
    }
}
