//! Static alias table from domain variable names to GRIB2 fields.
//!
//! Every variable the tool can extract is listed here with the exact
//! parameter and level it maps to. Requested names are resolved up front
//! so a typo fails the run before any file is opened.

use grib2_parser::VariableSelector;

use crate::error::{IngestionError, Result};
use level_types::{ENTIRE_ATMOSPHERE, HEIGHT_ABOVE_GROUND, SURFACE};

/// GRIB2 level type codes (code table 4.5).
pub mod level_types {
    /// Ground or water surface
    pub const SURFACE: u8 = 1;
    /// Entire atmosphere considered as a single layer
    pub const ENTIRE_ATMOSPHERE: u8 = 10;
    /// Specified height above ground (m)
    pub const HEIGHT_ABOVE_GROUND: u8 = 103;
}

/// One row of the alias table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariableAlias {
    /// Domain name used on the command line and in stored records
    pub name: &'static str,
    /// GRIB2 short name
    pub parameter: &'static str,
    /// (discipline, category, number)
    pub code: (u8, u8, u8),
    pub level_type: u8,
    pub level_value: f64,
}

impl VariableAlias {
    /// Selector matching exactly this parameter and level.
    pub fn to_selector(&self) -> VariableSelector {
        VariableSelector::new(self.name, self.parameter).at_level(self.level_type, self.level_value)
    }
}

const fn alias(
    name: &'static str,
    parameter: &'static str,
    code: (u8, u8, u8),
    level_type: u8,
    level_value: f64,
) -> VariableAlias {
    VariableAlias {
        name,
        parameter,
        code,
        level_type,
        level_value,
    }
}

/// All supported variables.
pub const VARIABLE_ALIASES: &[VariableAlias] = &[
    alias("temperature_2m", "TMP", (0, 0, 0), HEIGHT_ABOVE_GROUND, 2.0),
    alias("dewpoint_2m", "DPT", (0, 0, 6), HEIGHT_ABOVE_GROUND, 2.0),
    alias("relative_humidity_2m", "RH", (0, 1, 1), HEIGHT_ABOVE_GROUND, 2.0),
    alias("surface_pressure", "PRES", (0, 3, 0), SURFACE, 0.0),
    alias("surface_roughness", "SFCR", (2, 0, 1), SURFACE, 0.0),
    alias("visible_beam_downward_solar_flux", "VBDSF", (0, 4, 200), SURFACE, 0.0),
    alias("visible_diffuse_downward_solar_flux", "VDDSF", (0, 4, 201), SURFACE, 0.0),
    alias("downward_short_wave_radiation_flux", "DSWRF", (0, 4, 7), SURFACE, 0.0),
    alias("u_component_wind_10m", "UGRD", (0, 2, 2), HEIGHT_ABOVE_GROUND, 10.0),
    alias("v_component_wind_10m", "VGRD", (0, 2, 3), HEIGHT_ABOVE_GROUND, 10.0),
    alias("u_component_wind_80m", "UGRD", (0, 2, 2), HEIGHT_ABOVE_GROUND, 80.0),
    alias("v_component_wind_80m", "VGRD", (0, 2, 3), HEIGHT_ABOVE_GROUND, 80.0),
    alias("wind_speed_10m", "WIND", (0, 2, 1), HEIGHT_ABOVE_GROUND, 10.0),
    alias("wind_speed_80m", "WIND", (0, 2, 1), HEIGHT_ABOVE_GROUND, 80.0),
    alias("total_cloud_cover", "TCDC", (0, 6, 1), ENTIRE_ATMOSPHERE, 0.0),
];

/// Look up one domain name.
pub fn lookup(name: &str) -> Option<&'static VariableAlias> {
    VARIABLE_ALIASES.iter().find(|a| a.name == name)
}

/// Resolve a comma-separated list of domain names.
///
/// Whitespace around names is ignored and repeated names collapse to their
/// first occurrence. All unknown names are reported together.
pub fn resolve_variables(list: &str) -> Result<Vec<&'static VariableAlias>> {
    let names: Vec<&str> = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    resolve_names(&names)
}

/// Resolve already split domain names.
pub fn resolve_names<S: AsRef<str>>(names: &[S]) -> Result<Vec<&'static VariableAlias>> {
    if names.is_empty() {
        return Err(IngestionError::configuration("No variables requested"));
    }

    let mut resolved: Vec<&'static VariableAlias> = Vec::with_capacity(names.len());
    let mut unknown: Vec<&str> = Vec::new();
    for name in names.iter().map(AsRef::as_ref) {
        match lookup(name) {
            Some(a) if !resolved.iter().any(|r| r.name == a.name) => resolved.push(a),
            Some(_) => {}
            None if !unknown.contains(&name) => unknown.push(name),
            None => {}
        }
    }

    if !unknown.is_empty() {
        return Err(IngestionError::configuration(format!(
            "Unknown variables: {} (run with --list-variables to see supported names)",
            unknown.join(", ")
        )));
    }
    Ok(resolved)
}

/// Selectors for a resolved variable list, in the same order.
pub fn selectors(variables: &[&VariableAlias]) -> Vec<VariableSelector> {
    variables.iter().map(|v| v.to_selector()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_alias_names_unique() {
        let names: HashSet<_> = VARIABLE_ALIASES.iter().map(|a| a.name).collect();
        assert_eq!(names.len(), VARIABLE_ALIASES.len());
    }

    #[test]
    fn test_resolve_preserves_order_and_collapses_duplicates() {
        let vars = resolve_variables(" wind_speed_80m,temperature_2m , wind_speed_80m").unwrap();
        let names: Vec<_> = vars.iter().map(|v| v.name).collect();
        assert_eq!(names, ["wind_speed_80m", "temperature_2m"]);
    }

    #[test]
    fn test_unknown_names_listed_together() {
        let err = resolve_variables("temperature_2m,temprature_2m,wind_speed_100m").unwrap_err();
        assert!(err.is_configuration());
        let message = err.to_string();
        assert!(message.contains("temprature_2m"));
        assert!(message.contains("wind_speed_100m"));
        assert!(!message.contains("temperature_2m,"));
    }

    #[test]
    fn test_empty_list_rejected() {
        assert!(resolve_variables("").unwrap_err().is_configuration());
        assert!(resolve_variables(" , ,").unwrap_err().is_configuration());
    }

    #[test]
    fn test_wind_speed_levels_differ() {
        let s10 = lookup("wind_speed_10m").unwrap().to_selector();
        let s80 = lookup("wind_speed_80m").unwrap().to_selector();
        assert_eq!(s10.parameter, s80.parameter);
        assert_eq!(s80.level_type, Some(level_types::HEIGHT_ABOVE_GROUND));
        assert_eq!(s80.level_value, Some(80.0));
        assert_eq!(s10.level_value, Some(10.0));
    }

    #[test]
    fn test_selector_carries_domain_name() {
        let vars = resolve_variables("total_cloud_cover").unwrap();
        let sel = selectors(&vars);
        assert_eq!(sel[0].name, "total_cloud_cover");
        assert_eq!(sel[0].parameter, "TCDC");
        assert_eq!(sel[0].level_type, Some(level_types::ENTIRE_ATMOSPHERE));
    }
}
