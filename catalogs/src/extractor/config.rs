//! Tool configuration: upper-case keys, rendered either as a configuration file
//! or as command-line overrides.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use super::options::{ExtractorOptions, OptionValue};
use crate::error::{CatalogError, Result};

/// Output columns requested from the tool, in schema order.
pub const OUTPUT_PARAMETERS: [&str; 7] = [
    "X_IMAGE",
    "Y_IMAGE",
    "FLUX_BEST",
    "FLUXERR_BEST",
    "FLAGS",
    "FWHM_IMAGE",
    "NUMBER",
];

/// Option keys that configure this adapter rather than the tool.
const INTERNAL_KEYS: [&str; 8] = [
    "$nargs",
    "mode",
    "config_file",
    "fluxmin",
    "fluxmax",
    "gauss_nx",
    "gauss_fwhm",
    "filter_type",
];

/// A single configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Text(String),
    Number(f64),
    Flag(bool),
    List(Vec<f64>),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Text(text) => write!(f, "{text}"),
            ConfigValue::Number(value) => write!(f, "{value}"),
            ConfigValue::Flag(true) => write!(f, "Y"),
            ConfigValue::Flag(false) => write!(f, "N"),
            ConfigValue::List(values) => {
                let joined: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", joined.join(","))
            }
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Text(value.to_string())
    }
}

impl From<&Path> for ConfigValue {
    fn from(value: &Path) -> Self {
        ConfigValue::Text(value.display().to_string())
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        ConfigValue::Number(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Flag(value)
    }
}

/// Ordered map of upper-case configuration keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolConfig {
    entries: BTreeMap<String, ConfigValue>,
}

impl ToolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl AsRef<str>, value: impl Into<ConfigValue>) {
        self.entries
            .insert(key.as_ref().to_uppercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(&key.to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy every entry of `other` over this configuration.
    pub fn merge(&mut self, other: &ToolConfig) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    /// Configuration file text, one `KEY value` pair per line.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| format!("{key:<16} {value}\n"))
            .collect()
    }

    /// Command-line overrides, `-KEY value` for every entry.
    pub fn to_args(&self) -> Vec<String> {
        self.entries
            .iter()
            .flat_map(|(key, value)| [format!("-{key}"), value.to_string()])
            .collect()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render()).map_err(|e| CatalogError::io(path, e))
    }
}

fn parse_float_list(key: &str, text: &str) -> Result<Vec<f64>> {
    text.split(',')
        .map(|item| {
            item.trim().parse::<f64>().map_err(|_| {
                CatalogError::config(format!("{key}: '{item}' is not a number in '{text}'"))
            })
        })
        .collect()
}

/// Translate user options into tool keys, skipping adapter-only keys and empty strings.
pub fn translate_options(options: &ExtractorOptions) -> Result<ToolConfig> {
    let mut config = ToolConfig::new();
    for (key, value) in options.user_values() {
        let lower = key.to_lowercase();
        if INTERNAL_KEYS.contains(&lower.as_str()) {
            continue;
        }
        let value = match value {
            OptionValue::Text(text) if text.trim().is_empty() => continue,
            OptionValue::Text(text) if lower == "phot_autoparams" => {
                ConfigValue::List(parse_float_list(&key, &text)?)
            }
            OptionValue::Text(text) => ConfigValue::Text(text),
            OptionValue::Number(value) => ConfigValue::Number(value),
            OptionValue::Flag(flag) => ConfigValue::Flag(flag),
        };
        config.set(&key, value);
    }
    Ok(config)
}

/// Write the parameter file listing the requested output columns.
pub fn write_parameter_file(path: &Path) -> Result<()> {
    let mut text = OUTPUT_PARAMETERS.join("\n");
    text.push('\n');
    fs::write(path, text).map_err(|e| CatalogError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::options::FilterType;

    #[test]
    fn test_translation_excludes_internal_keys() {
        let options = ExtractorOptions {
            filter: true,
            filter_type: FilterType::Gauss,
            fluxmin: Some(1.0),
            config_file: None,
            ..Default::default()
        }
        .with_parameter("detect_thresh", 3.0)
        .with_parameter("mode", "auto")
        .with_parameter("$nargs", "2")
        .with_parameter("back_type", "");

        let config = translate_options(&options).unwrap();
        assert_eq!(config.get("DETECT_THRESH"), Some(&ConfigValue::Number(3.0)));
        assert_eq!(config.get("FILTER"), Some(&ConfigValue::Flag(true)));
        for key in ["MODE", "$NARGS", "FLUXMIN", "GAUSS_NX", "GAUSS_FWHM", "FILTER_TYPE", "BACK_TYPE"] {
            assert!(config.get(key).is_none(), "{key} should be excluded");
        }
    }

    #[test]
    fn test_booleans_render_as_y_n() {
        let mut config = ToolConfig::new();
        config.set("clean", true);
        config.set("filter", false);
        assert_eq!(config.to_args(), vec!["-CLEAN", "Y", "-FILTER", "N"]);
    }

    #[test]
    fn test_phot_autoparams_split() {
        let options = ExtractorOptions::default().with_parameter("phot_autoparams", "2.5, 3.5");
        let config = translate_options(&options).unwrap();
        assert_eq!(
            config.get("PHOT_AUTOPARAMS"),
            Some(&ConfigValue::List(vec![2.5, 3.5]))
        );
        assert!(config.render().contains("PHOT_AUTOPARAMS  2.5,3.5\n"));
    }

    #[test]
    fn test_bad_phot_autoparams_is_configuration_error() {
        let options = ExtractorOptions::default().with_parameter("phot_autoparams", "2.5,abc");
        assert!(matches!(
            translate_options(&options),
            Err(CatalogError::Configuration(_))
        ));
    }

    #[test]
    fn test_parameter_file_lists_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.param");
        write_parameter_file(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, OUTPUT_PARAMETERS.to_vec());
    }
}
