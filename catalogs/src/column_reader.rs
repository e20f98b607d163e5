//! Readers for user-supplied column catalogs and reference lists.
//!
//! Files are plain text. Lines starting with `#` and blank lines are skipped and
//! fields are separated by whitespace and/or commas. Column numbers are 1-based.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::catalog::{FluxRange, PixelPositions, SkyPositions, Units};
use crate::error::{CatalogError, Result};

/// Which columns of a catalog file hold which quantity.
///
/// Unset position and flux columns fall back to the positional layout
/// `x y [flux]`. Shape metrics are only read from `sharpcol`/`roundcol` or when
/// `numcols` declares them: 4 adds sharpness after flux, 5 adds roundness.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnSpec {
    pub xcol: Option<usize>,
    pub ycol: Option<usize>,
    pub fluxcol: Option<usize>,
    pub idcol: Option<usize>,
    pub sharpcol: Option<usize>,
    pub roundcol: Option<usize>,
    /// Number of catalog columns in use (position, flux and shape metrics)
    pub numcols: Option<usize>,
    pub xyunits: Units,
    pub fluxmin: Option<f64>,
    pub fluxmax: Option<f64>,
}

impl ColumnSpec {
    fn validate(&self) -> Result<()> {
        let named = [
            ("xcol", self.xcol),
            ("ycol", self.ycol),
            ("fluxcol", self.fluxcol),
            ("idcol", self.idcol),
            ("sharpcol", self.sharpcol),
            ("roundcol", self.roundcol),
        ];
        if let Some((name, _)) = named.iter().find(|(_, col)| *col == Some(0)) {
            return Err(CatalogError::config(format!(
                "{name} must be a 1-based column number"
            )));
        }
        if self.x() == self.y() {
            return Err(CatalogError::config(format!(
                "x and y cannot share column {}",
                self.x()
            )));
        }
        Ok(())
    }

    fn x(&self) -> usize {
        self.xcol.unwrap_or(1)
    }

    fn y(&self) -> usize {
        self.ycol.unwrap_or(2)
    }

    /// Resolve the optional columns against the number of fields in the file.
    fn layout(&self, ncols: usize) -> Layout {
        let present = |col: usize| (col <= ncols && Some(col) != self.idcol).then_some(col);

        let flux = self
            .fluxcol
            .or_else(|| present(self.x().max(self.y()) + 1));
        let declared = self.numcols.unwrap_or(3);
        let sharp = self.sharpcol.or_else(|| {
            (declared >= 4)
                .then(|| flux.and_then(|f| present(f + 1)))
                .flatten()
        });
        let round = self.roundcol.or_else(|| {
            (declared >= 5)
                .then(|| sharp.and_then(|s| present(s + 1)))
                .flatten()
        });

        Layout {
            x: self.x(),
            y: self.y(),
            flux,
            id: self.idcol,
            sharp,
            round,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Layout {
    x: usize,
    y: usize,
    flux: Option<usize>,
    id: Option<usize>,
    sharp: Option<usize>,
    round: Option<usize>,
}

/// One data line of a column file.
#[derive(Debug)]
struct Row {
    line: usize,
    fields: Vec<String>,
}

fn read_rows(path: &Path) -> Result<Vec<Row>> {
    let text = fs::read_to_string(path).map_err(|e| CatalogError::io(path, e))?;
    Ok(text
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let fields = line
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect();
            Some(Row {
                line: index + 1,
                fields,
            })
        })
        .collect())
}

fn column(path: &Path, rows: &[Row], col: usize, name: &str) -> Result<Vec<f64>> {
    rows.iter()
        .map(|row| {
            let field = row.fields.get(col - 1).ok_or_else(|| CatalogError::Parse {
                path: path.to_path_buf(),
                line: row.line,
                reason: format!(
                    "{name} column {col} missing ({} fields)",
                    row.fields.len()
                ),
            })?;
            field.parse::<f64>().map_err(|_| CatalogError::Parse {
                path: path.to_path_buf(),
                line: row.line,
                reason: format!("{name} column {col} is not numeric: '{field}'"),
            })
        })
        .collect()
}

/// Columns read from a user catalog file.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogColumns {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub flux: Vec<f64>,
    pub id: Option<Vec<i64>>,
    pub sharpness: Option<Vec<f64>>,
    pub roundness: Option<Vec<f64>>,
}

impl CatalogColumns {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Convert to positions, numbering from `id_offset` when no id column was read.
    pub fn into_positions(self, id_offset: i64) -> Result<PixelPositions> {
        match self.id {
            Some(id) => PixelPositions::from_columns(self.x, self.y, self.flux, id),
            None => PixelPositions::with_sequential_ids(self.x, self.y, self.flux, id_offset),
        }
    }
}

/// Reader for catalogs of pixel (or sky) positions supplied by the user.
#[derive(Debug, Clone)]
pub struct ColumnCatalogReader {
    spec: ColumnSpec,
}

impl ColumnCatalogReader {
    pub fn new(spec: ColumnSpec) -> Result<Self> {
        spec.validate()?;
        Ok(Self { spec })
    }

    pub fn spec(&self) -> &ColumnSpec {
        &self.spec
    }

    pub fn flux_range(&self) -> FluxRange {
        FluxRange::new(self.spec.fluxmin, self.spec.fluxmax)
    }

    /// Read the configured columns of a catalog file.
    ///
    /// # Arguments
    /// * `path` - Text file with one source per line
    ///
    /// # Returns
    /// The columns, `Ok(None)` when the file holds no data rows, or a parse
    /// error naming the offending line
    pub fn read(&self, path: &Path) -> Result<Option<CatalogColumns>> {
        let rows = read_rows(path)?;
        let Some(first) = rows.first() else {
            debug!("No sources in {}", path.display());
            return Ok(None);
        };

        let layout = self.spec.layout(first.fields.len());
        debug!("Reading {} with columns {:?}", path.display(), layout);

        let x = column(path, &rows, layout.x, "x")?;
        let y = column(path, &rows, layout.y, "y")?;
        let flux = match layout.flux {
            Some(col) => column(path, &rows, col, "flux")?,
            None => vec![1.0; rows.len()],
        };
        let id = layout
            .id
            .map(|col| column(path, &rows, col, "id"))
            .transpose()?
            .map(|ids| ids.into_iter().map(|v| v as i64).collect());
        let sharpness = layout
            .sharp
            .map(|col| column(path, &rows, col, "sharpness"))
            .transpose()?;
        let roundness = layout
            .round
            .map(|col| column(path, &rows, col, "roundness"))
            .transpose()?;

        Ok(Some(CatalogColumns {
            x,
            y,
            flux,
            id,
            sharpness,
            roundness,
        }))
    }
}

/// Column numbers of a reference catalog file, interpreted as (RA, Dec[, flux]) in degrees.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceColumns {
    pub refxcol: Option<usize>,
    pub refycol: Option<usize>,
    pub rfluxcol: Option<usize>,
}

impl ReferenceColumns {
    fn as_spec(&self) -> ColumnSpec {
        ColumnSpec {
            xcol: self.refxcol,
            ycol: self.refycol,
            fluxcol: self.rfluxcol,
            xyunits: Units::Degrees,
            ..Default::default()
        }
    }
}

/// Where a reference catalog comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceSource {
    File(PathBuf),
    /// (RA, Dec) pairs in degrees, used as-is
    Positions(Vec<(f64, f64)>),
}

impl From<PathBuf> for ReferenceSource {
    fn from(path: PathBuf) -> Self {
        ReferenceSource::File(path)
    }
}

impl From<Vec<(f64, f64)>> for ReferenceSource {
    fn from(positions: Vec<(f64, f64)>) -> Self {
        ReferenceSource::Positions(positions)
    }
}

/// Reader for reference catalogs already in sky coordinates.
#[derive(Debug, Clone)]
pub struct ReferenceCatalogReader {
    reader: ColumnCatalogReader,
}

impl ReferenceCatalogReader {
    pub fn new(columns: &ReferenceColumns) -> Result<Self> {
        Ok(Self {
            reader: ColumnCatalogReader::new(columns.as_spec())?,
        })
    }

    /// Read sky positions; `Ok(None)` for an empty file.
    pub fn read(&self, source: &ReferenceSource) -> Result<Option<SkyPositions>> {
        match source {
            ReferenceSource::Positions(pairs) => Ok(Some(SkyPositions::from_pairs(pairs))),
            ReferenceSource::File(path) => {
                let Some(columns) = self.reader.read(path)? else {
                    return Ok(None);
                };
                let flux = self.reader.spec().fluxcol.map(|_| columns.flux.clone());
                Ok(Some(SkyPositions {
                    ra: columns.x,
                    dec: columns.y,
                    flux,
                }))
            }
        }
    }
}
