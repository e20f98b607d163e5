//! Source catalog acquisition for image alignment.
//!
//! A [`SourceCatalog`] is a list of point sources (positions, fluxes, ids) found
//! in or supplied for one image, together with their sky coordinates. Sources
//! come from one of four strategies:
//!
//! - in-process peak detection on the image pixels ([`PeakFinder`])
//! - the external source-extraction executable ([`ExtractorAdapter`])
//! - a user-supplied column file ([`ColumnCatalogReader`])
//! - a reference list already in sky coordinates ([`ReferenceCatalogReader`])
//!
//! [`CatalogFactory`] picks the strategy from the configuration and the
//! capabilities of the machine; downstream code only sees the catalog.
//!
//! ```no_run
//! use catalogs::{AcquisitionMode, CatalogFactory, CatalogOptions, FindMode, ImageRef, PeakOptions};
//!
//! let options = CatalogOptions {
//!     findmode: Some(FindMode::Extractor),
//!     peak: Some(PeakOptions::default()),
//!     ..Default::default()
//! };
//! let image = ImageRef::parse("j8bt06nyq_flt.fits[1]")?;
//! let mut catalog = CatalogFactory::default().build(
//!     None,
//!     image.into(),
//!     AcquisitionMode::Automatic,
//!     &options,
//! )?;
//! catalog.acquire()?;
//! catalog.serialize("j8bt06nyq_flt_sci1_xy_catalog.coo")?;
//! # Ok::<(), catalogs::CatalogError>(())
//! ```
//!
//! Pixel positions are 1-based throughout. The in-process detector shifts its
//! 0-based results; the external tool already reports 1-based positions.

pub mod catalog;
pub mod column_reader;
pub mod config;
pub mod error;
pub mod extractor;
pub mod factory;
pub mod image;
pub mod noise;
pub mod peak_finder;
pub mod projection;

pub use catalog::{
    AcquisitionStrategy, ExtractionQuality, FluxRange, ImageInput, PixelPositions, ShapeMetrics,
    SkyPositions, SourceCatalog, Units,
};
pub use column_reader::{
    CatalogColumns, ColumnCatalogReader, ColumnSpec, ReferenceCatalogReader, ReferenceColumns,
    ReferenceSource,
};
pub use config::CatalogConfig;
pub use error::{CatalogError, Result};
pub use extractor::{is_installed, Extraction, ExtractorAdapter, ExtractorOptions, FilterType};
pub use factory::{
    generate_catalog, AcquisitionMode, CatalogFactory, CatalogOptions, CatalogSource, FindMode,
};
pub use image::{load_image, materialize_extension, read_projection, ImageRef};
pub use noise::{estimate_noise, estimate_noise_default};
pub use peak_finder::{PeakFinder, PeakOptions};
pub use projection::{Origin, ProjectionError, SkyProjection, TanProjection};
