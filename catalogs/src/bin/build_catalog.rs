//! Build the source catalog of one image (or catalog file) and write it as an
//! XY column file.
//!
//! Options come from an optional JSON configuration (see `CatalogConfig`) with
//! command-line overrides applied on top.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{info, warn};

use catalogs::image::with_suffix as output_name;
use catalogs::{
    read_projection, AcquisitionMode, CatalogConfig, CatalogFactory, CatalogSource, FindMode,
    ImageRef, PeakOptions, SkyProjection,
};

#[derive(Parser, Debug)]
#[command(
    name = "build_catalog",
    about = "Detect or read the point sources of an image and write an XY catalog",
    long_about = None
)]
struct Args {
    /// Image reference (`image.fits` or `image.fits[1]`), or a catalog file in file mode
    source: String,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Acquisition mode: `automatic` or `file`
    #[arg(long)]
    mode: Option<AcquisitionMode>,

    /// Detection engine for automatic mode: `sextractor` or `daofind`
    #[arg(long)]
    findmode: Option<FindMode>,

    /// Detection threshold in units of sigma
    #[arg(long)]
    threshold: Option<f64>,

    /// PSF FWHM in pixels
    #[arg(long)]
    fwhm: Option<f64>,

    /// First id assigned to detected sources
    #[arg(long)]
    start_id: Option<i64>,

    /// Output catalog path (defaults to `<root>_xy_catalog.coo`)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also convert the positions to sky coordinates and log the first few
    #[arg(long)]
    sky: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => CatalogConfig::load_from_file(path)?,
        None => CatalogConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(findmode) = args.findmode {
        config.options.findmode = Some(findmode);
    }
    if let Some(start_id) = args.start_id {
        config.options.start_id = start_id;
    }
    if args.threshold.is_some() || args.fwhm.is_some() {
        let peak = config.options.peak.get_or_insert_with(PeakOptions::default);
        if let Some(threshold) = args.threshold {
            peak.threshold = threshold;
        }
        if let Some(fwhm) = args.fwhm {
            peak.fwhmpsf = fwhm;
        }
    }
    if config.mode == AcquisitionMode::Automatic {
        config.options.findmode.get_or_insert(FindMode::PeakFinder);
        config.options.peak.get_or_insert_with(PeakOptions::default);
    }

    let (source, projection, root): (CatalogSource, Option<Arc<dyn SkyProjection>>, PathBuf) =
        match config.mode {
            AcquisitionMode::Automatic => {
                let image = ImageRef::parse(&args.source)?;
                let projection = match read_projection(&image) {
                    Ok(projection) => Some(Arc::new(projection) as Arc<dyn SkyProjection>),
                    Err(e) => {
                        warn!("No sky projection for {}: {}", image, e);
                        None
                    }
                };
                let root = match image.extension {
                    Some(ext) => output_name(&image.root(), &format!("_sci{ext}")),
                    None => image.root(),
                };
                (image.into(), projection, root)
            }
            AcquisitionMode::File => {
                let path = PathBuf::from(&args.source);
                let root = path.with_extension("");
                (path.into(), None, root)
            }
        };

    let mut catalog =
        CatalogFactory::default().build(projection, source, config.mode, &config.options)?;
    let count = catalog.acquire()?;
    info!("{} sources in {}", count, catalog.name());

    if args.sky {
        catalog.to_sky()?;
        if let Some(sky) = catalog.sky_positions() {
            for (ra, dec) in sky.pairs().into_iter().take(5) {
                info!("  RA {:.7}  Dec {:.7}", ra, dec);
            }
        }
    }

    if count == 0 {
        warn!("No sources found; nothing written");
        return Ok(());
    }

    let output = args
        .output
        .unwrap_or_else(|| output_name(&root, "_xy_catalog.coo"));
    catalog.serialize(&output)?;
    println!("{}: {} sources -> {}", catalog.name(), count, output.display());
    Ok(())
}
