//! User-facing options of the external extraction tool.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::catalog::FluxRange;

/// Shape of the detection filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    /// Leave the tool's own filter in place
    #[default]
    Point,
    /// Synthesise a Gaussian mask from `gauss_nx`/`gauss_fwhm`
    Gauss,
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterType::Point => write!(f, "point"),
            FilterType::Gauss => write!(f, "gauss"),
        }
    }
}

/// Free-form value of a pass-through tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Flag(value)
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        OptionValue::Number(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Text(value.to_string())
    }
}

fn default_gain() -> f64 {
    1.0
}

fn default_gauss_nx() -> usize {
    5
}

fn default_gauss_fwhm() -> f64 {
    2.0
}

/// Options of the external source-extraction tool.
///
/// Unrecognised keys are kept in `parameters` and handed to the tool as
/// upper-cased configuration keys (`detect_thresh` becomes `DETECT_THRESH`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorOptions {
    /// Executable to run; `sex` then `source-extractor` when unset
    #[serde(default)]
    pub executable: Option<PathBuf>,
    #[serde(default = "default_gain")]
    pub gain: f64,
    /// Arcsec per pixel; taken from the projection when unset
    #[serde(default)]
    pub pixel_scale: Option<f64>,
    #[serde(default)]
    pub filter: bool,
    #[serde(default)]
    pub filter_type: FilterType,
    #[serde(default = "default_gauss_nx")]
    pub gauss_nx: usize,
    #[serde(default = "default_gauss_fwhm")]
    pub gauss_fwhm: f64,
    /// Complete tool configuration file, used instead of translated options
    #[serde(default)]
    pub config_file: Option<PathBuf>,
    #[serde(default)]
    pub fluxmin: Option<f64>,
    #[serde(default)]
    pub fluxmax: Option<f64>,
    /// Also remove the catalog, configuration and parameter files after a run
    #[serde(default)]
    pub clean_outputs: bool,
    #[serde(flatten)]
    pub parameters: BTreeMap<String, OptionValue>,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            executable: None,
            gain: default_gain(),
            pixel_scale: None,
            filter: false,
            filter_type: FilterType::default(),
            gauss_nx: default_gauss_nx(),
            gauss_fwhm: default_gauss_fwhm(),
            config_file: None,
            fluxmin: None,
            fluxmax: None,
            clean_outputs: false,
            parameters: BTreeMap::new(),
        }
    }
}

impl ExtractorOptions {
    /// Set a pass-through tool parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn flux_range(&self) -> FluxRange {
        FluxRange::new(self.fluxmin, self.fluxmax)
    }

    /// Whether a Gaussian filter mask has to be synthesised.
    pub fn wants_gauss_filter(&self) -> bool {
        self.filter && self.filter_type != FilterType::Point
    }

    /// Every user option as a key/value bag, before exclusion and translation.
    pub(crate) fn user_values(&self) -> BTreeMap<String, OptionValue> {
        let mut values = self.parameters.clone();
        values.insert("filter".into(), OptionValue::Flag(self.filter));
        values.insert(
            "filter_type".into(),
            OptionValue::Text(self.filter_type.to_string()),
        );
        values.insert(
            "gauss_nx".into(),
            OptionValue::Number(self.gauss_nx as f64),
        );
        values.insert("gauss_fwhm".into(), OptionValue::Number(self.gauss_fwhm));
        if let Some(config_file) = &self.config_file {
            values.insert(
                "config_file".into(),
                OptionValue::Text(config_file.display().to_string()),
            );
        }
        if let Some(fluxmin) = self.fluxmin {
            values.insert("fluxmin".into(), OptionValue::Number(fluxmin));
        }
        if let Some(fluxmax) = self.fluxmax {
            values.insert("fluxmax".into(), OptionValue::Number(fluxmax));
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_keys_become_parameters() {
        let options: ExtractorOptions = serde_json::from_str(
            r#"{"gain": 2.0, "detect_thresh": 3.5, "phot_autoparams": "2.5,3.5", "clean": true}"#,
        )
        .unwrap();
        assert_eq!(options.gain, 2.0);
        assert_eq!(
            options.parameters.get("detect_thresh"),
            Some(&OptionValue::Number(3.5))
        );
        assert_eq!(
            options.parameters.get("phot_autoparams"),
            Some(&OptionValue::Text("2.5,3.5".into()))
        );
        assert_eq!(options.parameters.get("clean"), Some(&OptionValue::Flag(true)));
        assert_eq!(options.gauss_nx, 5);
    }

    #[test]
    fn test_gauss_filter_needs_both_switches() {
        let mut options = ExtractorOptions {
            filter_type: FilterType::Gauss,
            ..Default::default()
        };
        assert!(!options.wants_gauss_filter());
        options.filter = true;
        assert!(options.wants_gauss_filter());
        options.filter_type = FilterType::Point;
        assert!(!options.wants_gauss_filter());
    }
}
