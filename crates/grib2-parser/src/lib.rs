//! GRIB2 parser implementation (WMO FM 92 GRIB Edition 2).
//!
//! Pure Rust decoding of the parts of GRIB2 used by NCEP regional model
//! output: regular lat/lon and Lambert conformal grids, product templates
//! 4.0-4.15, and simple, complex and spatially differenced packing.
//!
//! The entry point is [`GridDecoder`], which extracts a set of selected
//! variables plus the per-cell coordinates of their shared grid:
//!
//! ```ignore
//! use grib2_parser::{GridDecoder, VariableSelector};
//!
//! let decoder = GridDecoder::new();
//! let selectors = [VariableSelector::new("temperature_2m", "TMP").at_level(103, 2.0)];
//! let decoded = decoder.decode_file(path, &selectors)?;
//! ```

pub mod decoder;
pub mod error;
pub mod grid;
pub mod reader;
pub mod sections;
pub mod tables;
pub mod unpacking;

pub use decoder::{DecodedFile, GridDecoder, VariableField, VariableSelector};
pub use error::{DecodeError, Grib2Error, Result};
pub use grid::{normalize_longitude, CoordinateGrid, LambertConformal};
pub use reader::{Grib2Field, Grib2Message, Grib2Reader};
pub use tables::{Grib2Tables, LevelDescription, ParameterName};
