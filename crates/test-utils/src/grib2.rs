//! Synthetic GRIB2 message builder.
//!
//! Produces small but structurally valid GRIB2 edition 2 messages with
//! either a regular lat/lon (3.0) or Lambert conformal (3.30) grid and one
//! or more fields packed with simple (5.0), complex (5.2) or complex with
//! spatial differencing (5.3) packing. `NaN` values are encoded as missing,
//! through a bitmap or missing-value management depending on the field.
//!
//! Values are packed exactly: each field is scaled by `10^D`, rounded to an
//! integer and stored with binary scale factor 0, so decoded values equal
//! the inputs rounded to `D` decimals.

use std::path::{Path, PathBuf};

use crate::fixtures::hrrr;

/// Grid template of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum GridTemplate {
    LatLon {
        la1: f64,
        lo1: f64,
        di: f64,
        dj: f64,
    },
    Lambert {
        la1: f64,
        lo1: f64,
        lov: f64,
        latin1: f64,
        latin2: f64,
        dx_m: f64,
        dy_m: f64,
    },
}

/// Data representation template of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackingMethod {
    /// Template 5.0
    Simple,
    /// Template 5.2
    Complex,
    /// Template 5.3 with the given order (1 or 2)
    SpatialDifferencing(u8),
}

/// How missing (`NaN`) values of a field are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingEncoding {
    /// Bitmap (indicator 0) when any value is missing, else indicator 255
    Bitmap,
    /// Reuse the previous field's bitmap (indicator 254)
    ReuseBitmap,
    /// Primary missing value inside complex packing, no bitmap
    MissingValueManagement,
}

/// One field (sections 4 to 7) of a message.
#[derive(Debug, Clone)]
pub struct FieldBuilder {
    category: u8,
    number: u8,
    level_type: u8,
    level_scale: u8,
    level_value: u32,
    forecast_hour: u32,
    decimal_scale: i16,
    packing: PackingMethod,
    missing: MissingEncoding,
    group_size: usize,
    values: Vec<f32>,
}

impl FieldBuilder {
    /// Field with the given parameter category/number, level and values.
    pub fn new(category: u8, number: u8, level_type: u8, level_value: u32, values: Vec<f32>) -> Self {
        Self {
            category,
            number,
            level_type,
            level_scale: 0,
            level_value,
            forecast_hour: 0,
            decimal_scale: 2,
            packing: PackingMethod::Simple,
            missing: MissingEncoding::Bitmap,
            group_size: 4,
            values,
        }
    }

    /// 2 m temperature (TMP, level 103/2).
    pub fn temperature_2m(values: Vec<f32>) -> Self {
        Self::new(0, 0, 103, 2, values)
    }

    /// Level value stored as `scaled / 10^scale`.
    pub fn with_scaled_level(mut self, scale: u8, scaled_value: u32) -> Self {
        self.level_scale = scale;
        self.level_value = scaled_value;
        self
    }

    pub fn with_forecast_hour(mut self, hour: u32) -> Self {
        self.forecast_hour = hour;
        self
    }

    pub fn with_decimal_scale(mut self, d: i16) -> Self {
        self.decimal_scale = d;
        self
    }

    pub fn with_packing(mut self, packing: PackingMethod) -> Self {
        self.packing = packing;
        self
    }

    pub fn with_missing(mut self, missing: MissingEncoding) -> Self {
        self.missing = missing;
        self
    }

    /// Group length used by complex packing.
    pub fn with_group_size(mut self, size: usize) -> Self {
        self.group_size = size.max(1);
        self
    }
}

/// Builds a single GRIB2 message.
#[derive(Debug, Clone)]
pub struct Grib2Builder {
    discipline: u8,
    center: u16,
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    ni: u32,
    nj: u32,
    scanning_mode: u8,
    grid: GridTemplate,
    fields: Vec<FieldBuilder>,
}

impl Grib2Builder {
    /// Regular lat/lon grid, scanning +i and -j from the first point.
    pub fn lat_lon(ni: u32, nj: u32, la1: f64, lo1: f64, di: f64, dj: f64) -> Self {
        Self {
            discipline: 0,
            center: 7,
            year: 2024,
            month: 1,
            day: 15,
            hour: 12,
            ni,
            nj,
            scanning_mode: 0x00,
            grid: GridTemplate::LatLon { la1, lo1, di, dj },
            fields: Vec::new(),
        }
    }

    /// The south-west corner of the HRRR CONUS Lambert grid, `ni` x `nj` cells.
    pub fn hrrr_lambert(ni: u32, nj: u32) -> Self {
        Self {
            scanning_mode: 0x40,
            grid: GridTemplate::Lambert {
                la1: hrrr::LA1,
                lo1: hrrr::LO1,
                lov: hrrr::LOV,
                latin1: hrrr::LATIN,
                latin2: hrrr::LATIN,
                dx_m: hrrr::DX_M,
                dy_m: hrrr::DX_M,
            },
            ..Self::lat_lon(ni, nj, 0.0, 0.0, 1.0, 1.0)
        }
    }

    pub fn with_discipline(mut self, discipline: u8) -> Self {
        self.discipline = discipline;
        self
    }

    pub fn with_reference_time(mut self, year: u16, month: u8, day: u8, hour: u8) -> Self {
        self.year = year;
        self.month = month;
        self.day = day;
        self.hour = hour;
        self
    }

    pub fn with_scanning_mode(mut self, mode: u8) -> Self {
        self.scanning_mode = mode;
        self
    }

    pub fn with_field(mut self, field: FieldBuilder) -> Self {
        self.fields.push(field);
        self
    }

    pub fn num_points(&self) -> usize {
        (self.ni * self.nj) as usize
    }

    /// Build the complete GRIB2 message bytes
    pub fn build(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.build_section1());
        body.extend_from_slice(&self.build_section3());
        for field in &self.fields {
            body.extend_from_slice(&build_section4(field));
            let (section5, section7) = build_sections_5_and_7(field);
            body.extend_from_slice(&section5);
            body.extend_from_slice(&build_section6(field));
            body.extend_from_slice(&section7);
        }

        let message_length = 16 + body.len() + 4;
        let mut message = Vec::with_capacity(message_length);
        message.extend_from_slice(b"GRIB");
        message.extend_from_slice(&[0, 0]);
        message.push(self.discipline);
        message.push(2);
        message.extend_from_slice(&(message_length as u64).to_be_bytes());
        message.extend_from_slice(&body);
        message.extend_from_slice(b"7777");
        message
    }

    fn build_section1(&self) -> Vec<u8> {
        let mut section = header(21, 1);
        section.extend_from_slice(&self.center.to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // Sub-center
        section.push(2); // Master table version
        section.push(1); // Local table version
        section.push(1); // Start of forecast
        section.extend_from_slice(&self.year.to_be_bytes());
        section.extend_from_slice(&[self.month, self.day, self.hour, 0, 0]);
        section.push(0); // Operational
        section.push(1); // Forecast
        section
    }

    fn build_section3(&self) -> Vec<u8> {
        let (template, gd_len) = match self.grid {
            GridTemplate::LatLon { .. } => (0u16, 58u32),
            GridTemplate::Lambert { .. } => (30u16, 67u32),
        };

        let mut section = header(14 + gd_len, 3);
        section.push(0);
        section.extend_from_slice(&(self.ni * self.nj).to_be_bytes());
        section.push(0);
        section.push(0);
        section.extend_from_slice(&template.to_be_bytes());

        // Shape of the earth: sphere of radius 6371229 m
        section.push(6);
        section.extend_from_slice(&[0; 15]);
        section.extend_from_slice(&self.ni.to_be_bytes());
        section.extend_from_slice(&self.nj.to_be_bytes());

        match self.grid {
            GridTemplate::LatLon { la1, lo1, di, dj } => {
                let la2 = la1 - (self.nj.saturating_sub(1)) as f64 * dj;
                let lo2 = lo1 + (self.ni.saturating_sub(1)) as f64 * di;
                section.extend_from_slice(&0u32.to_be_bytes()); // Basic angle
                section.extend_from_slice(&u32::MAX.to_be_bytes()); // Subdivisions
                section.extend_from_slice(&micro_degrees(la1));
                section.extend_from_slice(&micro_degrees(lo1));
                section.push(48);
                section.extend_from_slice(&micro_degrees(la2));
                section.extend_from_slice(&micro_degrees(lo2));
                section.extend_from_slice(&((di * 1e6).round() as u32).to_be_bytes());
                section.extend_from_slice(&((dj * 1e6).round() as u32).to_be_bytes());
                section.push(self.scanning_mode);
            }
            GridTemplate::Lambert {
                la1,
                lo1,
                lov,
                latin1,
                latin2,
                dx_m,
                dy_m,
            } => {
                section.extend_from_slice(&micro_degrees(la1));
                section.extend_from_slice(&micro_degrees(lo1));
                section.push(8);
                section.extend_from_slice(&micro_degrees(latin1)); // LaD
                section.extend_from_slice(&micro_degrees(lov));
                section.extend_from_slice(&((dx_m * 1000.0).round() as u32).to_be_bytes());
                section.extend_from_slice(&((dy_m * 1000.0).round() as u32).to_be_bytes());
                section.push(0); // North pole projection centre
                section.push(self.scanning_mode);
                section.extend_from_slice(&micro_degrees(latin1));
                section.extend_from_slice(&micro_degrees(latin2));
                section.extend_from_slice(&micro_degrees(-90.0));
                section.extend_from_slice(&micro_degrees(0.0));
            }
        }
        section
    }
}

/// Concatenate messages into one file image.
pub fn concat_messages(messages: &[Vec<u8>]) -> Vec<u8> {
    messages.concat()
}

/// Write messages to `dir/name` and return the path.
pub fn write_grib2_file(dir: &Path, name: &str, messages: &[Vec<u8>]) -> std::io::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, concat_messages(messages))?;
    Ok(path)
}

/// Encode a GRIB2 sign-magnitude integer in `bytes` octets.
pub fn encode_signed(value: i64, bytes: usize) -> Vec<u8> {
    let magnitude = value.unsigned_abs();
    let mut out: Vec<u8> = (0..bytes)
        .rev()
        .map(|i| ((magnitude >> (i * 8)) & 0xFF) as u8)
        .collect();
    if value < 0 {
        out[0] |= 0x80;
    }
    out
}

fn micro_degrees(deg: f64) -> Vec<u8> {
    encode_signed((deg * 1e6).round() as i64, 4)
}

fn header(length: u32, number: u8) -> Vec<u8> {
    let mut section = length.to_be_bytes().to_vec();
    section.push(number);
    section
}

fn build_section4(field: &FieldBuilder) -> Vec<u8> {
    let mut section = header(34, 4);
    section.extend_from_slice(&0u16.to_be_bytes()); // Coordinate values
    section.extend_from_slice(&0u16.to_be_bytes()); // Template 4.0
    section.push(field.category);
    section.push(field.number);
    section.push(2); // Forecast
    section.push(0);
    section.push(0);
    section.extend_from_slice(&0u16.to_be_bytes());
    section.push(0);
    section.push(1); // Hours
    section.extend_from_slice(&field.forecast_hour.to_be_bytes());
    section.push(field.level_type);
    section.push(field.level_scale);
    section.extend_from_slice(&field.level_value.to_be_bytes());
    section.push(255);
    section.push(0);
    section.extend_from_slice(&0u32.to_be_bytes());
    section
}

fn uses_bitmap(field: &FieldBuilder) -> bool {
    match field.missing {
        MissingEncoding::Bitmap => field.values.iter().any(|v| v.is_nan()),
        MissingEncoding::ReuseBitmap => true,
        MissingEncoding::MissingValueManagement => false,
    }
}

fn build_section6(field: &FieldBuilder) -> Vec<u8> {
    if field.missing == MissingEncoding::ReuseBitmap {
        let mut section = header(6, 6);
        section.push(254);
        return section;
    }
    if !uses_bitmap(field) {
        let mut section = header(6, 6);
        section.push(255);
        return section;
    }

    let mut writer = BitWriter::default();
    for v in &field.values {
        writer.write(u64::from(!v.is_nan()), 1);
    }
    let bitmap = writer.finish();

    let mut section = header(6 + bitmap.len() as u32, 6);
    section.push(0);
    section.extend_from_slice(&bitmap);
    section
}

fn build_sections_5_and_7(field: &FieldBuilder) -> (Vec<u8>, Vec<u8>) {
    let scale = 10f64.powi(field.decimal_scale as i32);
    let bitmap = uses_bitmap(field);

    // Values that take part in packing: bitmap-present points only
    let packed: Vec<Option<i64>> = field
        .values
        .iter()
        .filter(|v| !(bitmap && v.is_nan()))
        .map(|v| (!v.is_nan()).then(|| (*v as f64 * scale).round() as i64))
        .collect();
    let reference = packed.iter().flatten().copied().min().unwrap_or(0);
    let offsets: Vec<Option<i64>> = packed.iter().map(|v| v.map(|x| x - reference)).collect();

    let (template, params, payload) = match field.packing {
        PackingMethod::Simple => {
            let ints: Vec<u64> = offsets.iter().map(|v| v.unwrap_or(0) as u64).collect();
            let nbits = bits_needed(ints.iter().copied().max().unwrap_or(0));
            let mut writer = BitWriter::default();
            for v in &ints {
                writer.write(*v, nbits);
            }
            (0u16, vec![nbits as u8, 0], writer.finish())
        }
        PackingMethod::Complex => {
            let mvm = field.missing == MissingEncoding::MissingValueManagement;
            let (extra, payload) = pack_complex(&offsets, field.group_size, mvm, None);
            (2u16, extra, payload)
        }
        PackingMethod::SpatialDifferencing(order) => {
            let mvm = field.missing == MissingEncoding::MissingValueManagement;
            let (extra, payload) = pack_complex(&offsets, field.group_size, mvm, Some(order));
            (3u16, extra, payload)
        }
    };

    // Section 5
    let mut section5 = Vec::new();
    section5.extend_from_slice(&(packed.len() as u32).to_be_bytes());
    section5.extend_from_slice(&template.to_be_bytes());
    section5.extend_from_slice(&(reference as f32).to_be_bytes());
    section5.extend_from_slice(&encode_signed(0, 2)); // E
    section5.extend_from_slice(&encode_signed(field.decimal_scale as i64, 2)); // D
    section5.extend_from_slice(&params);
    let mut full5 = header(5 + section5.len() as u32, 5);
    full5.extend_from_slice(&section5);

    let mut section7 = header(5 + payload.len() as u32, 7);
    section7.extend_from_slice(&payload);

    (full5, section7)
}

/// Complex packing of non-negative integers, optionally spatially differenced.
///
/// Returns section 5 octets from "bits per value" onwards and the section 7 payload.
fn pack_complex(
    values: &[Option<i64>],
    group_size: usize,
    mvm: bool,
    order: Option<u8>,
) -> (Vec<u8>, Vec<u8>) {
    let mut ints: Vec<Option<i64>> = values.to_vec();
    let mut extras: Vec<i64> = Vec::new();

    if let Some(order) = order {
        let present: Vec<i64> = ints.iter().flatten().copied().collect();
        let order = order as usize;
        let diffs: Vec<i64> = (0..present.len())
            .map(|n| match (order, n) {
                (_, n) if n < order => 0,
                (1, n) => present[n] - present[n - 1],
                (_, n) => present[n] - 2 * present[n - 1] + present[n - 2],
            })
            .collect();
        let min = diffs.iter().skip(order).copied().min().unwrap_or(0);
        extras.extend(present.iter().take(order).copied());
        while extras.len() < order {
            extras.push(0);
        }
        extras.push(min);

        let mut stored = diffs
            .iter()
            .enumerate()
            .map(|(n, d)| if n < order { 0 } else { d - min });
        for v in ints.iter_mut().flatten() {
            *v = stored.next().unwrap_or(0);
        }
    }

    let ie = if extras.iter().all(|v| v.unsigned_abs() < (1 << 15)) { 2 } else { 4 };

    // Groups of fixed length
    let groups: Vec<&[Option<i64>]> = ints.chunks(group_size).collect();
    let mut refs = Vec::new();
    let mut widths = Vec::new();
    for group in &groups {
        let present: Vec<i64> = group.iter().flatten().copied().collect();
        let has_missing = present.len() < group.len();
        match (present.iter().min(), present.iter().max()) {
            (Some(&lo), Some(&hi)) => {
                refs.push(Some(lo as u64));
                let span = (hi - lo) as u64;
                let width = if span == 0 && !has_missing {
                    0
                } else if mvm {
                    bits_needed(span + 1)
                } else {
                    bits_needed(span)
                };
                widths.push(width);
            }
            _ => {
                refs.push(None);
                widths.push(0);
            }
        }
    }

    let max_ref = refs.iter().flatten().copied().max().unwrap_or(0);
    let mut nbits = if mvm { bits_needed(max_ref + 1) } else { bits_needed(max_ref) };
    if mvm && refs.iter().any(Option::is_none) {
        nbits = nbits.max(1);
    }
    let width_bits = bits_needed(widths.iter().copied().max().unwrap_or(0) as u64);
    let last_length = groups.last().map_or(0, |g| g.len());

    let mut writer = BitWriter::default();
    for v in &extras {
        let magnitude = v.unsigned_abs();
        let sign = if *v < 0 { 1u64 << (ie * 8 - 1) } else { 0 };
        writer.write(sign | magnitude, ie * 8);
    }
    for r in &refs {
        writer.write(r.unwrap_or(all_ones(nbits)), nbits);
    }
    writer.align();
    for w in &widths {
        writer.write(*w as u64, width_bits);
    }
    writer.align();
    // Every group has the reference length except the last, so 0 length bits
    writer.align();
    for ((group, r), &w) in groups.iter().zip(&refs).zip(&widths) {
        if w == 0 {
            continue;
        }
        let r = r.unwrap_or(0) as i64;
        for v in group.iter() {
            let raw = match v {
                Some(x) => (x - r) as u64,
                None => all_ones(w),
            };
            writer.write(raw, w);
        }
    }
    let payload = writer.finish();

    let mut params = vec![nbits as u8, 0];
    params.push(1); // Group splitting method
    params.push(if mvm { 1 } else { 0 });
    params.extend_from_slice(&f32::NAN.to_bits().to_be_bytes()); // Primary missing substitute
    params.extend_from_slice(&u32::MAX.to_be_bytes());
    params.extend_from_slice(&(groups.len() as u32).to_be_bytes());
    params.push(0); // Group width reference
    params.push(width_bits as u8);
    params.extend_from_slice(&(group_size as u32).to_be_bytes());
    params.push(1); // Length increment
    params.extend_from_slice(&(last_length as u32).to_be_bytes());
    params.push(0); // Length bits
    if let Some(order) = order {
        params.push(order);
        params.push(ie as u8);
    }
    (params, payload)
}

fn bits_needed(max: u64) -> usize {
    (64 - max.leading_zeros()) as usize
}

fn all_ones(bits: usize) -> u64 {
    if bits == 0 {
        0
    } else {
        (1u64 << bits) - 1
    }
}

#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    fn write(&mut self, value: u64, bits: usize) {
        for i in (0..bits).rev() {
            if self.bit_len % 8 == 0 {
                self.bytes.push(0);
            }
            if (value >> i) & 1 == 1 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 0x80 >> (self.bit_len % 8);
            }
            self.bit_len += 1;
        }
    }

    fn align(&mut self) {
        self.bit_len = self.bytes.len() * 8;
    }

    fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_signed() {
        assert_eq!(encode_signed(1000, 4), vec![0x00, 0x00, 0x03, 0xE8]);
        assert_eq!(encode_signed(-1000, 4), vec![0x80, 0x00, 0x03, 0xE8]);
        assert_eq!(encode_signed(-3, 1), vec![0x83]);
    }

    #[test]
    fn test_message_length_matches_header() {
        let message = Grib2Builder::lat_lon(3, 2, 40.0, -100.0, 1.0, 1.0)
            .with_field(FieldBuilder::temperature_2m(vec![280.0; 6]))
            .build();

        let declared = u64::from_be_bytes(message[8..16].try_into().unwrap());
        assert_eq!(declared as usize, message.len());
        assert_eq!(&message[..4], b"GRIB");
        assert_eq!(&message[message.len() - 4..], b"7777");
    }

    #[test]
    fn test_bit_writer() {
        let mut writer = BitWriter::default();
        writer.write(0b101, 3);
        writer.align();
        writer.write(0xFF, 8);
        assert_eq!(writer.finish(), vec![0b1010_0000, 0xFF]);
    }
}
