//! Selective decoding of GRIB2 files into a coordinate grid plus fields.
//!
//! Only the requested variables are unpacked. All selected fields must
//! share one grid definition; the coordinate grid is computed once from
//! the first selected message.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

use crate::error::{DecodeError, Grib2Error, Result};
use crate::grid::CoordinateGrid;
use crate::reader::Grib2Reader;
use crate::sections::{GridDefinition, ProductDefinition};
use crate::tables::{Grib2Tables, ParameterName};

/// Identifies one variable to extract from a file.
///
/// `parameter` matches a field's short name (`TMP`) or long name
/// (`Temperature`), case-insensitively. Level filters are optional.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSelector {
    /// Canonical name reported on the decoded field
    pub name: String,
    pub parameter: String,
    pub level_type: Option<u8>,
    pub level_value: Option<f64>,
}

impl VariableSelector {
    pub fn new(name: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameter: parameter.into(),
            level_type: None,
            level_value: None,
        }
    }

    /// Restrict to a level type (code table 4.5) and value.
    pub fn at_level(mut self, level_type: u8, level_value: f64) -> Self {
        self.level_type = Some(level_type);
        self.level_value = Some(level_value);
        self
    }

    /// Restrict to a level type, any value.
    pub fn on_level_type(mut self, level_type: u8) -> Self {
        self.level_type = Some(level_type);
        self
    }

    fn matches(&self, names: &ParameterName, product: &ProductDefinition) -> bool {
        let name_matches = self.parameter.eq_ignore_ascii_case(&names.short_name)
            || self.parameter.eq_ignore_ascii_case(&names.long_name);
        name_matches
            && self.level_type.map_or(true, |lt| lt == product.level_type)
            && self
                .level_value
                .map_or(true, |lv| (lv - product.level_value).abs() < 1e-6)
    }
}

/// A decoded 2-D field, row-major on the grid of its [`DecodedFile`].
///
/// Missing cells (bitmap or missing-value management) hold `NaN`.
#[derive(Debug, Clone)]
pub struct VariableField {
    pub name: String,
    pub short_name: String,
    pub level_type: u8,
    pub level_value: f64,
    pub forecast_hours: Option<f64>,
    rows: usize,
    cols: usize,
    values: Vec<f32>,
}

impl VariableField {
    pub fn new(name: impl Into<String>, rows: usize, cols: usize, values: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            short_name: String::new(),
            level_type: 0,
            level_value: 0.0,
            forecast_hours: None,
            rows,
            cols,
            values,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Value at a cell, `None` when missing or out of range.
    pub fn value_at(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        let value = self.values[row * self.cols + col];
        (!value.is_nan()).then_some(value)
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

/// Result of decoding a file.
#[derive(Debug, Clone, Default)]
pub struct DecodedFile {
    /// `None` when no requested variable was found
    pub grid: Option<CoordinateGrid>,
    /// Found fields, in request order
    pub fields: Vec<VariableField>,
    /// Canonical names of requested variables not present in the file
    pub missing: Vec<String>,
    /// Reference (run) time of the first message
    pub reference_time: Option<DateTime<Utc>>,
    pub messages: usize,
}

impl DecodedFile {
    pub fn field(&self, name: &str) -> Option<&VariableField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    /// Distinct forecast times (hours) of the decoded fields, in field order.
    pub fn forecast_hours(&self) -> Vec<f64> {
        let mut hours: Vec<f64> = Vec::new();
        for h in self.fields.iter().filter_map(|f| f.forecast_hours) {
            if !hours.contains(&h) {
                hours.push(h);
            }
        }
        hours
    }
}

/// Decodes selected variables from GRIB2 files.
#[derive(Debug, Clone)]
pub struct GridDecoder {
    tables: Grib2Tables,
}

impl Default for GridDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl GridDecoder {
    pub fn new() -> Self {
        Self::with_tables(Grib2Tables::ncep())
    }

    pub fn with_tables(tables: Grib2Tables) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &Grib2Tables {
        &self.tables
    }

    /// Decode a file from disk. Gzip-compressed files are accepted.
    #[instrument(skip(self, selectors), fields(path = %path.display(), requested = selectors.len()))]
    pub fn decode_file(
        &self,
        path: &Path,
        selectors: &[VariableSelector],
    ) -> std::result::Result<DecodedFile, DecodeError> {
        let data = std::fs::read(path).map_err(|e| DecodeError::new(path, e.into()))?;
        let data = if is_gzip(&data) {
            debug!("Decompressing gzip input");
            decompress_gzip(&data).map_err(|e| DecodeError::new(path, e))?
        } else {
            data
        };

        let decoded = self
            .decode_bytes(&data, selectors)
            .map_err(|e| DecodeError::new(path, e))?;

        info!(
            found = decoded.fields.len(),
            missing = decoded.missing.len(),
            messages = decoded.messages,
            "Decoded GRIB2 file"
        );
        Ok(decoded)
    }

    /// Decode an in-memory GRIB2 file.
    pub fn decode_bytes(&self, data: &[u8], selectors: &[VariableSelector]) -> Result<DecodedFile> {
        let mut reader = Grib2Reader::new(data);
        let mut slots: Vec<Option<VariableField>> = vec![None; selectors.len()];
        let mut grid_definition: Option<GridDefinition> = None;
        let mut grid: Option<CoordinateGrid> = None;
        let mut reference_time = None;
        let mut messages = 0;

        while let Some(message) = reader.next_message()? {
            messages += 1;
            reference_time.get_or_insert(message.identification.reference_time);

            for field in &message.fields {
                let product = match field.product_definition() {
                    Ok(p) => p,
                    Err(e) => {
                        debug!(message = message.index, error = %e, "Skipping field");
                        continue;
                    }
                };
                let names = self.tables.parameter(
                    field.discipline,
                    product.parameter_category,
                    product.parameter_number,
                );

                let pending: Vec<usize> = selectors
                    .iter()
                    .enumerate()
                    .filter(|(i, s)| slots[*i].is_none() && s.matches(&names, &product))
                    .map(|(i, _)| i)
                    .collect();
                if pending.is_empty() {
                    continue;
                }

                let definition = field.grid_definition()?;
                match &grid_definition {
                    None => {
                        grid = Some(CoordinateGrid::from_definition(&definition)?);
                        grid_definition = Some(definition.clone());
                    }
                    Some(expected) if *expected != definition => {
                        return Err(Grib2Error::GridMismatch {
                            message: message.index,
                            expected: expected.to_string(),
                            found: definition.to_string(),
                        });
                    }
                    Some(_) => {}
                }

                let (rows, cols) = (definition.nj as usize, definition.ni as usize);
                let values = field.unpack(rows * cols)?;
                debug!(
                    message = message.index,
                    parameter = %names.short_name,
                    level_type = product.level_type,
                    level_value = product.level_value,
                    "Unpacked field"
                );

                for i in pending {
                    slots[i] = Some(VariableField {
                        name: selectors[i].name.clone(),
                        short_name: names.short_name.clone(),
                        level_type: product.level_type,
                        level_value: product.level_value,
                        forecast_hours: product.forecast_hours(),
                        rows,
                        cols,
                        values: values.clone(),
                    });
                }
            }
        }

        if messages == 0 {
            return Err(Grib2Error::InvalidFormat(
                "No GRIB2 messages found".to_string(),
            ));
        }

        let missing: Vec<String> = selectors
            .iter()
            .zip(&slots)
            .filter(|(_, slot)| slot.is_none())
            .map(|(s, _)| s.name.clone())
            .collect();
        if !missing.is_empty() {
            warn!(missing = ?missing, "Requested variables not found in file");
        }

        Ok(DecodedFile {
            grid,
            fields: slots.into_iter().flatten().collect(),
            missing,
            reference_time,
            messages,
        })
    }
}

fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

/// Decompress gzip data.
fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}
