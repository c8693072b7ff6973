//! GRIB2 parameter and level lookup tables.
//!
//! Translates numeric (discipline, category, number) codes into the NCEP
//! short names (`TMP`, `UGRD`) and long names used to select fields, and
//! level type codes into readable descriptions.

use std::collections::HashMap;

/// Lookup key for parameter: (discipline, category, number)
pub type ParamKey = (u8, u8, u8);

/// Short and long name of a parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterName {
    pub short_name: String,
    pub long_name: String,
}

/// Level description - either static text or a template with {value} placeholder
#[derive(Debug, Clone)]
pub enum LevelDescription {
    /// Static description (e.g., "surface", "entire atmosphere")
    Static(String),
    /// Template with {value} placeholder (e.g., "{value} m above ground")
    Template(String),
}

impl LevelDescription {
    /// Format the level description, substituting `{value}` if it's a template.
    pub fn format(&self, value: f64) -> String {
        match self {
            LevelDescription::Static(s) => s.clone(),
            LevelDescription::Template(t) => t.replace("{value}", &format_level_value(value)),
        }
    }
}

fn format_level_value(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// GRIB2 parameter and level lookup tables.
#[derive(Debug, Clone, Default)]
pub struct Grib2Tables {
    parameters: HashMap<ParamKey, ParameterName>,
    levels: HashMap<u8, LevelDescription>,
}

impl Grib2Tables {
    /// Create empty tables
    pub fn new() -> Self {
        Self::default()
    }

    /// NCEP names for the parameters found in HRRR surface output.
    pub fn ncep() -> Self {
        let mut tables = Self::new();

        let parameters: &[(ParamKey, &str, &str)] = &[
            ((0, 0, 0), "TMP", "Temperature"),
            ((0, 0, 6), "DPT", "Dew point temperature"),
            ((0, 1, 0), "SPFH", "Specific humidity"),
            ((0, 1, 1), "RH", "Relative humidity"),
            ((0, 1, 8), "APCP", "Total precipitation"),
            ((0, 2, 1), "WIND", "Wind speed"),
            ((0, 2, 2), "UGRD", "U-component of wind"),
            ((0, 2, 3), "VGRD", "V-component of wind"),
            ((0, 2, 22), "GUST", "Wind speed (gust)"),
            ((0, 3, 0), "PRES", "Pressure"),
            ((0, 3, 1), "PRMSL", "Pressure reduced to MSL"),
            ((0, 3, 5), "HGT", "Geopotential height"),
            ((0, 4, 7), "DSWRF", "Downward short-wave radiation flux"),
            ((0, 4, 200), "VBDSF", "Visible beam downward solar flux"),
            ((0, 4, 201), "VDDSF", "Visible diffuse downward solar flux"),
            ((0, 5, 3), "DLWRF", "Downward long-wave radiation flux"),
            ((0, 6, 1), "TCDC", "Total cloud cover"),
            ((0, 7, 6), "CAPE", "Convective available potential energy"),
            ((0, 16, 196), "REFC", "Composite reflectivity"),
            ((0, 19, 0), "VIS", "Visibility"),
            ((2, 0, 1), "SFCR", "Surface roughness"),
        ];
        for &((d, c, n), short, long) in parameters {
            tables.add_parameter(d, c, n, short, long);
        }

        tables.add_level(1, LevelDescription::Static("surface".to_string()));
        tables.add_level(2, LevelDescription::Static("cloud base".to_string()));
        tables.add_level(3, LevelDescription::Static("cloud top".to_string()));
        tables.add_level(4, LevelDescription::Static("0C isotherm".to_string()));
        tables.add_level(10, LevelDescription::Static("entire atmosphere".to_string()));
        tables.add_level(100, LevelDescription::Template("{value} Pa".to_string()));
        tables.add_level(101, LevelDescription::Static("mean sea level".to_string()));
        tables.add_level(
            103,
            LevelDescription::Template("{value} m above ground".to_string()),
        );
        tables.add_level(200, LevelDescription::Static("entire atmosphere".to_string()));

        tables
    }

    /// Add a parameter mapping
    pub fn add_parameter(
        &mut self,
        discipline: u8,
        category: u8,
        number: u8,
        short_name: impl Into<String>,
        long_name: impl Into<String>,
    ) {
        self.parameters.insert(
            (discipline, category, number),
            ParameterName {
                short_name: short_name.into(),
                long_name: long_name.into(),
            },
        );
    }

    /// Add a level description mapping
    pub fn add_level(&mut self, level_type: u8, description: LevelDescription) {
        self.levels.insert(level_type, description);
    }

    /// Look up a parameter by GRIB2 codes.
    ///
    /// Unknown codes get "P{discipline}_{category}_{number}" for both names.
    pub fn parameter(&self, discipline: u8, category: u8, number: u8) -> ParameterName {
        self.parameters
            .get(&(discipline, category, number))
            .cloned()
            .unwrap_or_else(|| {
                let code = format!("P{}_{}_{}", discipline, category, number);
                ParameterName {
                    short_name: code.clone(),
                    long_name: code,
                }
            })
    }

    /// Look up level description by type code and value.
    pub fn level_description(&self, level_type: u8, level_value: f64) -> String {
        match self.levels.get(&level_type) {
            Some(desc) => desc.format(level_value),
            None => format!(
                "Level type {} value {}",
                level_type,
                format_level_value(level_value)
            ),
        }
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.levels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ncep_parameter_lookup() {
        let tables = Grib2Tables::ncep();

        assert_eq!(tables.parameter(0, 0, 0).short_name, "TMP");
        assert_eq!(tables.parameter(0, 2, 2).short_name, "UGRD");
        assert_eq!(tables.parameter(0, 4, 200).short_name, "VBDSF");
        assert_eq!(tables.parameter(2, 0, 1).short_name, "SFCR");
        assert_eq!(tables.parameter(0, 6, 1).long_name, "Total cloud cover");
    }

    #[test]
    fn test_parameter_not_found() {
        let tables = Grib2Tables::ncep();

        let name = tables.parameter(99, 99, 99);
        assert_eq!(name.short_name, "P99_99_99");
        assert_eq!(name.long_name, "P99_99_99");
    }

    #[test]
    fn test_level_descriptions() {
        let tables = Grib2Tables::ncep();

        assert_eq!(tables.level_description(1, 0.0), "surface");
        assert_eq!(tables.level_description(103, 2.0), "2 m above ground");
        assert_eq!(tables.level_description(103, 0.5), "0.5 m above ground");
        assert_eq!(tables.level_description(10, 0.0), "entire atmosphere");
        assert_eq!(
            tables.level_description(99, 123.0),
            "Level type 99 value 123"
        );
    }

    #[test]
    fn test_empty_tables() {
        let tables = Grib2Tables::new();

        assert!(tables.is_empty());
        assert_eq!(tables.parameter_count(), 0);
        assert_eq!(tables.parameter(0, 0, 0).short_name, "P0_0_0");
        assert_eq!(tables.level_description(1, 0.0), "Level type 1 value 0");
    }
}
