//! GRIB2 section parsing.
//!
//! A GRIB2 message is an indicator (section 0), an identification section,
//! then one or more repetitions of sections 2-7 and the `7777` terminator.
//! Parsers here take the raw bytes of a single section (including its
//! 5-byte length/number header) and never unpack section 7 payloads.

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;

use crate::error::{Grib2Error, Result};

/// Length of section 0.
pub const INDICATOR_LEN: usize = 16;

/// Section 0: Indicator Section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indicator {
    pub discipline: u8,
    pub edition: u8,
    pub total_length: u64,
}

/// Section 1: Identification Section
#[derive(Debug, Clone)]
pub struct Identification {
    pub center: u16,
    pub sub_center: u16,
    pub significance_of_reference_time: u8,
    pub reference_time: DateTime<Utc>,
    pub production_status: u8,
    pub data_type: u8,
}

/// Section 3: Grid Definition Section
#[derive(Debug, Clone, PartialEq)]
pub struct GridDefinition {
    pub num_points: u32,
    /// Number of points along a parallel / x axis
    pub ni: u32,
    /// Number of points along a meridian / y axis
    pub nj: u32,
    pub scanning_mode: u8,
    pub earth_radius_m: f64,
    pub projection: Projection,
}

/// Projection-specific part of the grid definition, angles in degrees.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Template 3.0
    LatLon {
        la1: f64,
        lo1: f64,
        la2: f64,
        lo2: f64,
        di: f64,
        dj: f64,
    },
    /// Template 3.30
    LambertConformal {
        la1: f64,
        lo1: f64,
        lad: f64,
        lov: f64,
        dx_m: f64,
        dy_m: f64,
        latin1: f64,
        latin2: f64,
        south_pole: bool,
    },
}

impl fmt::Display for GridDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.projection {
            Projection::LatLon { la1, lo1, di, dj, .. } => write!(
                f,
                "lat/lon {}x{} from ({:.6}, {:.6}) step ({:.6}, {:.6})",
                self.ni, self.nj, la1, lo1, dj, di
            ),
            Projection::LambertConformal {
                la1, lo1, lov, dx_m, ..
            } => write!(
                f,
                "lambert {}x{} from ({:.6}, {:.6}) LoV {:.4} dx {:.1} m",
                self.ni, self.nj, la1, lo1, lov, dx_m
            ),
        }
    }
}

/// Section 4: Product Definition Section
#[derive(Debug, Clone, PartialEq)]
pub struct ProductDefinition {
    pub template: u16,
    pub parameter_category: u8,
    pub parameter_number: u8,
    /// Code table 4.4
    pub time_unit: u8,
    pub forecast_time: u32,
    pub level_type: u8,
    pub level_value: f64,
}

impl ProductDefinition {
    /// Forecast time converted to hours, when the unit is time-based.
    pub fn forecast_hours(&self) -> Option<f64> {
        let value = self.forecast_time as f64;
        match self.time_unit {
            0 => Some(value / 60.0),
            1 => Some(value),
            2 => Some(value * 24.0),
            10 => Some(value * 3.0),
            11 => Some(value * 6.0),
            12 => Some(value * 12.0),
            13 => Some(value / 3600.0),
            _ => None,
        }
    }
}

/// Section 5: Data Representation Section
#[derive(Debug, Clone, PartialEq)]
pub struct DataRepresentation {
    /// Number of packed values (bitmap-present points only)
    pub num_packed_values: u32,
    pub template: u16,
    pub packing: Packing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packing {
    /// Template 5.0
    Simple(SimplePacking),
    /// Templates 5.2 and 5.3
    Complex(ComplexPacking),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimplePacking {
    pub reference_value: f32,
    pub binary_scale_factor: i16,
    pub decimal_scale_factor: i16,
    pub bits_per_value: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComplexPacking {
    pub simple: SimplePacking,
    /// Code table 5.5: 0 none, 1 primary, 2 primary and secondary
    pub missing_value_management: u8,
    pub num_groups: u32,
    pub group_width_reference: u8,
    pub group_width_bits: u8,
    pub group_length_reference: u32,
    pub group_length_increment: u8,
    pub last_group_length: u32,
    pub group_length_bits: u8,
    pub spatial_differencing: Option<SpatialDifferencing>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpatialDifferencing {
    pub order: u8,
    pub extra_octets: u8,
}

/// Section 6 bitmap indicator, resolved against the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitmapIndicator<'a> {
    /// Indicator 0, bitmap bytes follow
    Present(&'a [u8]),
    /// Indicator 254, reuse the previously defined bitmap
    Previous,
    /// Indicator 255
    Absent,
}

/// A section split out of a message.
#[derive(Debug, Clone, Copy)]
pub struct RawSection<'a> {
    pub number: u8,
    /// Full section bytes including the 5-byte header
    pub bytes: &'a [u8],
}

// ===== Parsing Functions =====

/// Parse Section 0 (Indicator) from start of message
pub fn parse_indicator(data: &[u8]) -> Result<Indicator> {
    if data.len() < INDICATOR_LEN {
        return Err(Grib2Error::InvalidFormat(
            "Not enough data for indicator section".to_string(),
        ));
    }

    if &data[0..4] != b"GRIB" {
        return Err(Grib2Error::InvalidFormat(
            "Invalid GRIB magic bytes".to_string(),
        ));
    }

    // Octets 5-6 reserved, 7 discipline, 8 edition, 9-16 total length
    let discipline = data[6];
    let edition = data[7];

    if edition != 2 {
        return Err(Grib2Error::InvalidFormat(format!(
            "Expected GRIB edition 2, got {}",
            edition
        )));
    }

    Ok(Indicator {
        discipline,
        edition,
        total_length: read_u64(&data[8..16]),
    })
}

/// Split a complete message (section 0 through `7777`) into its sections.
pub fn split_sections(message: &[u8]) -> Result<Vec<RawSection<'_>>> {
    let mut sections = Vec::new();
    let mut offset = INDICATOR_LEN;

    loop {
        let rest = &message[offset..];
        if rest.len() >= 4 && &rest[..4] == b"7777" {
            return Ok(sections);
        }
        if rest.len() < 5 {
            return Err(Grib2Error::InvalidFormat(
                "Message ended before the 7777 terminator".to_string(),
            ));
        }

        let length = read_u32(&rest[0..4]) as usize;
        let number = rest[4];
        if length < 5 || length > rest.len() {
            return Err(Grib2Error::InvalidSection {
                section: number,
                reason: format!(
                    "Invalid section length {} with {} bytes remaining",
                    length,
                    rest.len()
                ),
            });
        }
        if !(1..=7).contains(&number) {
            return Err(Grib2Error::InvalidSection {
                section: number,
                reason: "Unknown section number".to_string(),
            });
        }

        sections.push(RawSection {
            number,
            bytes: &rest[..length],
        });
        offset += length;
    }
}

/// Parse Section 1 (Identification)
pub fn parse_identification(section: &[u8]) -> Result<Identification> {
    require_len(section, 1, 21)?;

    let center = read_u16(&section[5..7]);
    let sub_center = read_u16(&section[7..9]);
    let significance_of_reference_time = section[11];

    let year = read_u16(&section[12..14]);
    let (month, day, hour, minute, second) =
        (section[14], section[15], section[16], section[17], section[18]);

    let reference_time = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, second as u32))
        .ok_or_else(|| Grib2Error::InvalidSection {
            section: 1,
            reason: format!(
                "Invalid date: {}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            ),
        })?;

    Ok(Identification {
        center,
        sub_center,
        significance_of_reference_time,
        reference_time: DateTime::<Utc>::from_naive_utc_and_offset(reference_time, Utc),
        production_status: section[19],
        data_type: section[20],
    })
}

/// Parse Section 3 (Grid Definition)
pub fn parse_grid_definition(section: &[u8]) -> Result<GridDefinition> {
    require_len(section, 3, 14)?;

    // Bytes 6-9: number of data points, 12-13: template number
    let num_points = read_u32(&section[6..10]);
    let template = read_u16(&section[12..14]);

    // Template data starts at byte 14
    let gd = &section[14..];

    match template {
        0 => {
            // Template 3.0: regular latitude/longitude
            require_len(gd, 3, 58)?;
            let ni = read_u32(&gd[16..20]);
            let nj = read_u32(&gd[20..24]);
            let unit = angle_unit(read_u32(&gd[24..28]), read_u32(&gd[28..32]));

            let la1 = decode_signed(&gd[32..36]) as f64 * unit;
            let lo1 = decode_signed(&gd[36..40]) as f64 * unit;
            let la2 = decode_signed(&gd[41..45]) as f64 * unit;
            let lo2 = decode_signed(&gd[45..49]) as f64 * unit;

            let di = increment(read_u32(&gd[49..53]), unit, lo2 - lo1, ni);
            let dj = increment(read_u32(&gd[53..57]), unit, la2 - la1, nj);

            Ok(GridDefinition {
                num_points,
                ni,
                nj,
                scanning_mode: gd[57],
                earth_radius_m: earth_radius(gd),
                projection: Projection::LatLon {
                    la1,
                    lo1,
                    la2,
                    lo2,
                    di,
                    dj,
                },
            })
        }
        30 => {
            // Template 3.30: Lambert conformal
            require_len(gd, 3, 59)?;
            let unit = 1e-6;
            let ni = read_u32(&gd[16..20]);
            let nj = read_u32(&gd[20..24]);

            Ok(GridDefinition {
                num_points,
                ni,
                nj,
                scanning_mode: gd[50],
                earth_radius_m: earth_radius(gd),
                projection: Projection::LambertConformal {
                    la1: decode_signed(&gd[24..28]) as f64 * unit,
                    lo1: decode_signed(&gd[28..32]) as f64 * unit,
                    lad: decode_signed(&gd[33..37]) as f64 * unit,
                    lov: decode_signed(&gd[37..41]) as f64 * unit,
                    // Dx/Dy are stored in millimetres
                    dx_m: read_u32(&gd[41..45]) as f64 / 1000.0,
                    dy_m: read_u32(&gd[45..49]) as f64 / 1000.0,
                    latin1: decode_signed(&gd[51..55]) as f64 * unit,
                    latin2: decode_signed(&gd[55..59]) as f64 * unit,
                    south_pole: gd[49] & 0x80 != 0,
                },
            })
        }
        other => Err(Grib2Error::UnsupportedTemplate {
            section: 3,
            template: other,
        }),
    }
}

/// Parse Section 4 (Product Definition)
///
/// Templates 4.0 through 4.15 share the layout of the fields read here.
pub fn parse_product_definition(section: &[u8]) -> Result<ProductDefinition> {
    require_len(section, 4, 28)?;

    let template = read_u16(&section[7..9]);
    if template > 15 {
        return Err(Grib2Error::UnsupportedTemplate {
            section: 4,
            template,
        });
    }

    // Byte 17: time unit, 18-21: forecast time
    // Byte 22: type of first fixed surface, 23: scale factor, 24-27: scaled value
    let level_type = section[22];
    let scale_factor = section[23];
    let scaled_value = read_u32(&section[24..28]);

    let level_value = if scale_factor == 0xFF || scaled_value == 0xFFFF_FFFF {
        0.0
    } else {
        let scale = decode_signed(&[scale_factor]) as i32;
        decode_signed(&section[24..28]) as f64 * 10f64.powi(-scale)
    };

    Ok(ProductDefinition {
        template,
        parameter_category: section[9],
        parameter_number: section[10],
        time_unit: section[17],
        forecast_time: read_u32(&section[18..22]),
        level_type,
        level_value,
    })
}

/// Parse Section 5 (Data Representation)
pub fn parse_data_representation(section: &[u8]) -> Result<DataRepresentation> {
    require_len(section, 5, 21)?;

    let num_packed_values = read_u32(&section[5..9]);
    let template = read_u16(&section[9..11]);

    // Bytes 11-14: R (IEEE float), 15-16: E, 17-18: D, 19: bits per value
    let simple = SimplePacking {
        reference_value: f32::from_be_bytes([section[11], section[12], section[13], section[14]]),
        binary_scale_factor: decode_signed(&section[15..17]) as i16,
        decimal_scale_factor: decode_signed(&section[17..19]) as i16,
        bits_per_value: section[19],
    };

    let packing = match template {
        0 => Packing::Simple(simple),
        2 | 3 => {
            require_len(section, 5, if template == 3 { 49 } else { 47 })?;
            let spatial_differencing = if template == 3 {
                let order = section[47];
                if !(1..=2).contains(&order) {
                    return Err(Grib2Error::InvalidSection {
                        section: 5,
                        reason: format!("Unsupported spatial differencing order {}", order),
                    });
                }
                Some(SpatialDifferencing {
                    order,
                    extra_octets: section[48],
                })
            } else {
                None
            };

            Packing::Complex(ComplexPacking {
                simple,
                missing_value_management: section[22],
                num_groups: read_u32(&section[31..35]),
                group_width_reference: section[35],
                group_width_bits: section[36],
                group_length_reference: read_u32(&section[37..41]),
                group_length_increment: section[41],
                last_group_length: read_u32(&section[42..46]),
                group_length_bits: section[46],
                spatial_differencing,
            })
        }
        other => {
            return Err(Grib2Error::UnsupportedTemplate {
                section: 5,
                template: other,
            })
        }
    };

    Ok(DataRepresentation {
        num_packed_values,
        template,
        packing,
    })
}

/// Parse Section 6 (Bitmap)
pub fn parse_bitmap(section: &[u8]) -> Result<BitmapIndicator<'_>> {
    require_len(section, 6, 6)?;

    match section[5] {
        0 => Ok(BitmapIndicator::Present(&section[6..])),
        254 => Ok(BitmapIndicator::Previous),
        255 => Ok(BitmapIndicator::Absent),
        other => Err(Grib2Error::InvalidSection {
            section: 6,
            reason: format!("Predefined bitmap {} is not supported", other),
        }),
    }
}

/// Payload of Section 7 (Data)
pub fn data_payload(section: &[u8]) -> Result<&[u8]> {
    require_len(section, 7, 5)?;
    Ok(&section[5..])
}

// ===== Helper Functions =====

/// Decode a GRIB2 sign-magnitude integer of 1 to 8 bytes.
///
/// The most significant bit is the sign, the remaining bits the magnitude.
/// Returns 0 for an empty or over-long slice.
pub fn decode_signed(bytes: &[u8]) -> i64 {
    if bytes.is_empty() || bytes.len() > 8 {
        return 0;
    }
    let negative = bytes[0] & 0x80 != 0;
    let magnitude = bytes
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, &b)| {
            let b = if i == 0 { b & 0x7F } else { b };
            (acc << 8) | b as u64
        }) as i64;

    if negative {
        -magnitude
    } else {
        magnitude
    }
}

fn require_len(data: &[u8], section: u8, needed: usize) -> Result<()> {
    if data.len() < needed {
        return Err(Grib2Error::InvalidSection {
            section,
            reason: format!("Needs at least {} bytes, got {}", needed, data.len()),
        });
    }
    Ok(())
}

pub(crate) fn read_u16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

pub(crate) fn read_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn read_u64(b: &[u8]) -> u64 {
    u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

/// Unit of template 3.0 angles from the basic angle and its subdivisions.
fn angle_unit(basic_angle: u32, subdivisions: u32) -> f64 {
    if basic_angle == 0
        || basic_angle == u32::MAX
        || subdivisions == 0
        || subdivisions == u32::MAX
    {
        1e-6
    } else {
        basic_angle as f64 / subdivisions as f64
    }
}

/// Direction increment, derived from the grid extent when the field is missing.
fn increment(raw: u32, unit: f64, span: f64, count: u32) -> f64 {
    if raw != u32::MAX {
        raw as f64 * unit
    } else if count > 1 {
        span.abs() / (count - 1) as f64
    } else {
        0.0
    }
}

/// Earth radius from the shape-of-the-earth octets (code table 3.2).
fn earth_radius(gd: &[u8]) -> f64 {
    match gd[0] {
        0 => 6_367_470.0,
        1 => {
            let scale = gd[1] as i32;
            let value = read_u32(&gd[2..6]) as f64;
            if value > 0.0 && gd[1] != 0xFF {
                value * 10f64.powi(-scale)
            } else {
                6_371_229.0
            }
        }
        _ => 6_371_229.0,
    }
}
