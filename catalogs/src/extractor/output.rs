//! Parser for the tool's `ASCII_HEAD` catalogs.
//!
//! The header is a block of lines such as
//!
//! ```text
//! #   1 X_IMAGE                Object position along x                  [pixel]
//! #   2 Y_IMAGE                Object position along y                  [pixel]
//! ```
//!
//! giving the 1-based column of each named parameter. Columns are located by
//! name; a catalog without header falls back to the requested schema order.

use std::collections::HashMap;
use std::path::Path;

use super::config::OUTPUT_PARAMETERS;
use crate::error::{CatalogError, Result};

/// One object of the tool's catalog.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractedObject {
    pub x: f64,
    pub y: f64,
    pub flux: f64,
    pub flux_err: f64,
    pub flags: i64,
    pub fwhm: f64,
}

fn header_columns(text: &str) -> HashMap<String, usize> {
    text.lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix('#'))
        .filter_map(|rest| {
            let mut tokens = rest.split_whitespace();
            let index = tokens.next()?.parse::<usize>().ok()?;
            let name = tokens.next()?;
            (index > 0).then(|| (name.to_string(), index - 1))
        })
        .collect()
}

/// Parse catalog text; `path` is only used for error context.
pub fn parse_catalog(path: &Path, text: &str) -> Result<Vec<ExtractedObject>> {
    let mut columns = header_columns(text);
    if columns.is_empty() {
        columns = OUTPUT_PARAMETERS
            .iter()
            .enumerate()
            .map(|(index, name)| (name.to_string(), index))
            .collect();
    }

    let locate = |name: &str| {
        columns.get(name).copied().ok_or_else(|| CatalogError::Parse {
            path: path.to_path_buf(),
            line: 0,
            reason: format!("catalog header has no {name} column"),
        })
    };
    let [x, y, flux, flux_err, flags, fwhm] = [
        locate("X_IMAGE")?,
        locate("Y_IMAGE")?,
        locate("FLUX_BEST")?,
        locate("FLUXERR_BEST")?,
        locate("FLAGS")?,
        locate("FWHM_IMAGE")?,
    ];

    let mut objects = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let value = |col: usize, name: &str| -> Result<f64> {
            fields
                .get(col)
                .and_then(|field| field.parse::<f64>().ok())
                .ok_or_else(|| CatalogError::Parse {
                    path: path.to_path_buf(),
                    line: index + 1,
                    reason: format!("missing or non-numeric {name}"),
                })
        };
        objects.push(ExtractedObject {
            x: value(x, "X_IMAGE")?,
            y: value(y, "Y_IMAGE")?,
            flux: value(flux, "FLUX_BEST")?,
            flux_err: value(flux_err, "FLUXERR_BEST")?,
            flags: value(flags, "FLAGS")? as i64,
            fwhm: value(fwhm, "FWHM_IMAGE")?,
        });
    }
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADED: &str = "\
#   1 NUMBER                 Running object number
#   2 X_IMAGE                Object position along x                                    [pixel]
#   3 Y_IMAGE                Object position along y                                    [pixel]
#   4 FLUX_BEST              Best of FLUX_AUTO and FLUX_ISOCOR                          [count]
#   5 FLUXERR_BEST           RMS error for BEST flux                                    [count]
#   6 FLAGS                  Extraction flags
#   7 FWHM_IMAGE             FWHM assuming a gaussian core                              [pixel]
         1     21.250     31.500   1520.3   12.1   0   2.61
         2    101.000      7.750    310.0    6.0   3   2.40
";

    #[test]
    fn test_columns_located_by_header_name() {
        let objects = parse_catalog(Path::new("a.cat"), HEADED).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].x, 21.25);
        assert_eq!(objects[0].y, 31.5);
        assert_eq!(objects[0].flux_err, 12.1);
        assert_eq!(objects[1].flags, 3);
        assert_eq!(objects[1].fwhm, 2.40);
    }

    #[test]
    fn test_headerless_uses_schema_order() {
        let text = "5.0 6.0 100.0 1.0 0 2.5 1\n";
        let objects = parse_catalog(Path::new("b.cat"), text).unwrap();
        assert_eq!(objects[0].x, 5.0);
        assert_eq!(objects[0].flux, 100.0);
        assert_eq!(objects[0].fwhm, 2.5);
    }

    #[test]
    fn test_header_only_is_empty() {
        let header: String = HEADED.lines().take(7).map(|l| format!("{l}\n")).collect();
        assert!(parse_catalog(Path::new("c.cat"), &header).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_row_is_parse_error() {
        let text = format!("{HEADED}         3     1.0\n");
        let err = parse_catalog(Path::new("d.cat"), &text).unwrap_err();
        assert!(matches!(err, CatalogError::Parse { line: 10, .. }));
    }
}
