//! Adapter for the external source-extraction executable.
//!
//! The tool is driven entirely through files:
//!
//! 1. An image reference naming one extension is copied into a standalone FITS
//!    file (`<root>_extract_sci<EXTVER>.fits`), since the tool reads primary
//!    arrays only.
//! 2. A parameter file lists the requested output columns, and either the
//!    user's own configuration file is passed with `-c` plus command-line
//!    overrides, or the user options are translated into a configuration file
//!    `<stem>_sextractor.sex`.
//! 3. The tool writes an `ASCII_HEAD` catalog `<stem>_sextractor.cat`, which is
//!    parsed back into positions and quality columns.
//!
//! Any failure of the tool itself is logged and yields an empty extraction so a
//! pipeline processing many images keeps going. Coordinates are reported as the
//! tool gives them, which is already 1-based.

mod config;
mod filter;
mod options;
mod output;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, info, warn};

pub use config::{translate_options, write_parameter_file, ConfigValue, ToolConfig, OUTPUT_PARAMETERS};
pub use filter::{conv_file_text, gauss_array, write_gauss_filter};
pub use options::{ExtractorOptions, FilterType, OptionValue};
pub use output::{parse_catalog, ExtractedObject};

use crate::catalog::{ExtractionQuality, FluxRange, PixelPositions};
use crate::error::{CatalogError, Result};
use crate::image::{materialize_extension, strip_fits_suffix, with_suffix, ImageRef};
use crate::projection::SkyProjection;

/// Executable names tried, in order, when none is configured.
pub const DEFAULT_EXECUTABLES: [&str; 2] = ["sex", "source-extractor"];

fn candidates(options: &ExtractorOptions) -> Vec<PathBuf> {
    match &options.executable {
        Some(executable) => vec![executable.clone()],
        None => DEFAULT_EXECUTABLES.iter().map(PathBuf::from).collect(),
    }
}

fn responds(executable: &Path) -> bool {
    Command::new(executable)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

/// First candidate executable that can be launched.
pub fn resolve_executable(options: &ExtractorOptions) -> Option<PathBuf> {
    candidates(options).into_iter().find(|exe| responds(exe))
}

/// Whether the extraction tool can be run with these options.
pub fn is_installed(options: &ExtractorOptions) -> bool {
    let found = resolve_executable(options);
    debug!("Source extraction executable: {:?}", found);
    found.is_some()
}

/// Result of one extraction run.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub positions: PixelPositions,
    pub quality: ExtractionQuality,
    /// Catalog written by the tool, when it was kept
    pub catalog_path: Option<PathBuf>,
}

impl Extraction {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Files generated for one run, derived from the working image name.
#[derive(Debug, Clone)]
struct RunFiles {
    image: PathBuf,
    temp_image: Option<PathBuf>,
    catalog: PathBuf,
    parameters: PathBuf,
    config: PathBuf,
    filter: PathBuf,
}

impl RunFiles {
    fn new(image: PathBuf, temp_image: Option<PathBuf>) -> Self {
        let stem = strip_fits_suffix(&image);
        Self {
            catalog: with_suffix(&stem, "_sextractor.cat"),
            parameters: with_suffix(&stem, "_sextractor.param"),
            config: with_suffix(&stem, "_sextractor.sex"),
            filter: with_suffix(&stem, "_sextractor.conv"),
            image,
            temp_image,
        }
    }
}

fn remove_quietly(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = fs::remove_file(path) {
        warn!("Could not remove {}: {}", path.display(), e);
    }
}

/// Check images the tool was asked to write, if any.
fn check_images(config: &ToolConfig) -> Vec<PathBuf> {
    let enabled = match config.get("CHECKIMAGE_TYPE") {
        Some(ConfigValue::Text(kind)) => !kind.trim().eq_ignore_ascii_case("NONE"),
        _ => false,
    };
    if !enabled {
        return Vec::new();
    }
    match config.get("CHECKIMAGE_NAME") {
        Some(ConfigValue::Text(names)) => names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(PathBuf::from)
            .collect(),
        _ => vec![PathBuf::from("check.fits")],
    }
}

/// Runs the extraction tool on one image.
#[derive(Debug, Clone)]
pub struct ExtractorAdapter {
    options: ExtractorOptions,
    translated: ToolConfig,
    pixel_scale: f64,
    id_offset: i64,
}

impl ExtractorAdapter {
    /// Validate the options up front; a malformed option is a configuration error,
    /// never a tool failure.
    pub fn new(
        options: ExtractorOptions,
        projection: Option<&dyn SkyProjection>,
        id_offset: i64,
    ) -> Result<Self> {
        let translated = translate_options(&options)?;
        if options.wants_gauss_filter()
            && (options.gauss_nx == 0 || !(options.gauss_fwhm.is_finite() && options.gauss_fwhm > 0.0))
        {
            return Err(CatalogError::config(format!(
                "invalid gaussian filter: gauss_nx={}, gauss_fwhm={}",
                options.gauss_nx, options.gauss_fwhm
            )));
        }
        let pixel_scale = options
            .pixel_scale
            .or_else(|| projection.map(|p| p.pixel_scale()))
            .unwrap_or(0.0);

        Ok(Self {
            options,
            translated,
            pixel_scale,
            id_offset,
        })
    }

    pub fn options(&self) -> &ExtractorOptions {
        &self.options
    }

    pub fn pixel_scale(&self) -> f64 {
        self.pixel_scale
    }

    pub fn flux_range(&self) -> FluxRange {
        self.options.flux_range()
    }

    fn executable(&self) -> PathBuf {
        self.options
            .executable
            .clone()
            .or_else(|| resolve_executable(&self.options))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_EXECUTABLES[0]))
    }

    /// Settings this adapter always controls, plus the generated side files.
    fn core_config(&self, files: &RunFiles) -> Result<ToolConfig> {
        write_parameter_file(&files.parameters)?;

        let mut core = ToolConfig::new();
        core.set("GAIN", self.options.gain);
        core.set("PIXEL_SCALE", self.pixel_scale);
        core.set("CATALOG_NAME", files.catalog.as_path());
        core.set("CATALOG_TYPE", "ASCII_HEAD");
        core.set("PARAMETERS_NAME", files.parameters.as_path());

        if self.options.wants_gauss_filter() {
            write_gauss_filter(&files.filter, self.options.gauss_nx, self.options.gauss_fwhm)?;
            core.set("FILTER", true);
            core.set("FILTER_NAME", files.filter.as_path());
        }
        Ok(core)
    }

    /// Extract sources from `image`.
    ///
    /// Only resource faults before the tool runs (unreadable image, unwritable
    /// side files) are errors. Tool failures give an empty extraction.
    pub fn extract(&self, image: &ImageRef) -> Result<Extraction> {
        let temp_image = match image.extension {
            Some(_) => Some(materialize_extension(image)?),
            None => None,
        };
        let work_image = temp_image.clone().unwrap_or_else(|| image.path.clone());
        let files = RunFiles::new(work_image, temp_image);
        let core = self.core_config(&files)?;

        let executable = self.executable();
        let mut command = Command::new(&executable);
        command.arg(&files.image);

        let effective = match &self.options.config_file {
            Some(user_config) => {
                command.arg("-c").arg(user_config).args(core.to_args());
                core
            }
            None => {
                let mut config = self.translated.clone();
                config.merge(&core);
                config.write(&files.config)?;
                command.arg("-c").arg(&files.config);
                config
            }
        };

        info!("Running source extraction on {}", image);
        debug!("Command: {:?}", command);

        let outcome = match command.output() {
            Err(e) => Err(format!("failed to launch {}: {}", executable.display(), e)),
            Ok(output) if !output.status.success() => Err(format!(
                "{} exited with {}: {}",
                executable.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            Ok(_) => match fs::read_to_string(&files.catalog) {
                Err(e) => Err(format!(
                    "no catalog at {}: {}",
                    files.catalog.display(),
                    e
                )),
                Ok(text) => parse_catalog(&files.catalog, &text).map_err(|e| e.to_string()),
            },
        };

        let objects = match outcome {
            Ok(objects) => objects,
            Err(reason) => {
                warn!(
                    "Problem running the source extraction executable on {}: {}",
                    image, reason
                );
                remove_quietly(&files.catalog);
                if let Some(temp) = &files.temp_image {
                    remove_quietly(temp);
                }
                return Ok(Extraction::default());
            }
        };

        for check in check_images(&effective) {
            remove_quietly(&check);
        }
        if let Some(temp) = &files.temp_image {
            remove_quietly(temp);
        }
        let catalog_path = if self.options.clean_outputs {
            for path in [&files.catalog, &files.config, &files.parameters, &files.filter] {
                remove_quietly(path);
            }
            None
        } else {
            Some(files.catalog.clone())
        };

        let mut positions = PixelPositions::new();
        let mut quality = ExtractionQuality::default();
        for (index, object) in objects.iter().enumerate() {
            positions.push(object.x, object.y, object.flux, index as i64 + self.id_offset);
            quality.flux_err.push(object.flux_err);
            quality.flags.push(object.flags);
            quality.fwhm.push(object.fwhm);
        }
        debug!("Extraction of {} returned {} objects", image, positions.len());

        Ok(Extraction {
            positions,
            quality,
            catalog_path,
        })
    }
}
