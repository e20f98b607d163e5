//! JSON configuration for catalog builds.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::column_reader::ReferenceColumns;
use crate::error::{CatalogError, Result};
use crate::factory::{AcquisitionMode, CatalogOptions};

/// Everything needed to build catalogs for a set of images.
///
/// ```json
/// {
///   "mode": "automatic",
///   "findmode": "daofind",
///   "start_id": 1,
///   "peak": { "threshold": 4.0, "fwhmpsf": 2.5 },
///   "extractor": { "gain": 2.0, "detect_thresh": 3.0 },
///   "columns": { "xcol": 1, "ycol": 2 },
///   "reference": { "refxcol": 1, "refycol": 2 }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub mode: AcquisitionMode,
    #[serde(flatten)]
    pub options: CatalogOptions,
    pub reference: ReferenceColumns,
}

impl CatalogConfig {
    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            CatalogError::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        std::fs::write(path, json).map_err(|e| CatalogError::io(path, e))
    }

    /// Load from JSON file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| CatalogError::io(path, e))?;
        serde_json::from_str(&json)
            .map_err(|e| CatalogError::config(format!("{}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Units;
    use crate::extractor::OptionValue;
    use crate::factory::FindMode;
    use crate::peak_finder::PeakOptions;

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalogs.json");

        let mut config = CatalogConfig {
            mode: AcquisitionMode::Automatic,
            ..Default::default()
        };
        config.options.findmode = Some(FindMode::Extractor);
        config.options.start_id = 1;
        config.options.peak = Some(PeakOptions {
            threshold: 5.0,
            ..Default::default()
        });
        config
            .options
            .extractor
            .parameters
            .insert("detect_thresh".into(), OptionValue::Number(3.0));
        config.options.columns.xyunits = Units::Degrees;
        config.reference.rfluxcol = Some(3);

        config.save_to_file(&path).unwrap();
        let loaded = CatalogConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_sparse_json_uses_defaults() {
        let config: CatalogConfig =
            serde_json::from_str(r#"{"mode": "file", "columns": {"xcol": 3, "ycol": 4}}"#).unwrap();
        assert_eq!(config.mode, AcquisitionMode::File);
        assert_eq!(config.options.columns.xcol, Some(3));
        assert!(config.options.findmode.is_none());
        assert_eq!(config.options.extractor.gain, 1.0);
    }

    #[test]
    fn test_malformed_json_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            CatalogConfig::load_from_file(&path),
            Err(CatalogError::Configuration(_))
        ));
    }
}
