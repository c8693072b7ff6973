//! GRIB2 data unpacking algorithms.
//!
//! Implements the packing methods used by NCEP model output:
//! - Simple packing (template 5.0)
//! - Complex packing (template 5.2)
//! - Complex packing with spatial differencing (template 5.3, HRRR)
//!
//! Unpackers return one value per packed point, `NaN` where the packing
//! itself flags a value as missing. [`apply_bitmap`] then expands the packed
//! values onto the full grid.

use crate::error::{Grib2Error, Result};
use crate::sections::{ComplexPacking, DataRepresentation, Packing, SimplePacking};

/// Unpack a field onto the full grid of `num_grid_points` values.
pub fn unpack_field(
    representation: &DataRepresentation,
    packed_data: &[u8],
    bitmap: Option<&[u8]>,
    num_grid_points: usize,
) -> Result<Vec<f32>> {
    let num_values = representation.num_packed_values as usize;

    let values = match &representation.packing {
        Packing::Simple(params) => unpack_simple(packed_data, num_values, params)?,
        Packing::Complex(params) => unpack_complex(packed_data, num_values, params)?,
    };

    match bitmap {
        Some(bm) => apply_bitmap(values, bm, num_grid_points),
        None if values.len() == num_grid_points => Ok(values),
        None => Err(Grib2Error::UnpackingError(format!(
            "Field has {} values but the grid has {} points and no bitmap",
            values.len(),
            num_grid_points
        ))),
    }
}

/// Unpack simple packed GRIB2 data
///
/// Simple packing formula: value = (reference_value + packed_value * 2^E) * 10^(-D)
pub fn unpack_simple(
    packed_data: &[u8],
    num_values: usize,
    params: &SimplePacking,
) -> Result<Vec<f32>> {
    let scale = Scaling::new(params);

    if params.bits_per_value == 0 {
        // All values are the reference value
        return Ok(vec![scale.apply(0); num_values]);
    }

    let mut reader = BitReader::new(packed_data);
    let bits = params.bits_per_value as usize;

    (0..num_values)
        .map(|_| reader.read(bits).map(|packed| scale.apply(packed as i64)))
        .collect()
}

/// Unpack complex packed data, with optional spatial differencing.
///
/// Section 7 layout: spatial differencing extras (first values and the
/// overall minimum), group reference values, group widths, group lengths,
/// then the group-packed values. Each block starts on a byte boundary.
pub fn unpack_complex(
    packed_data: &[u8],
    num_values: usize,
    params: &ComplexPacking,
) -> Result<Vec<f32>> {
    let scale = Scaling::new(&params.simple);
    let num_groups = params.num_groups as usize;
    let mut reader = BitReader::new(packed_data);

    let mut first_values = Vec::new();
    let mut overall_min = 0i64;
    if let Some(sd) = params.spatial_differencing {
        let bits = sd.extra_octets as usize * 8;
        if bits == 0 {
            return Err(Grib2Error::UnpackingError(
                "Spatial differencing with zero extra octets".to_string(),
            ));
        }
        for _ in 0..sd.order {
            first_values.push(reader.read_signed(bits)?);
        }
        overall_min = reader.read_signed(bits)?;
    }

    let ref_bits = params.simple.bits_per_value as usize;
    let references = reader.read_many(num_groups, ref_bits)?;
    reader.align();

    let widths: Vec<usize> = reader
        .read_many(num_groups, params.group_width_bits as usize)?
        .into_iter()
        .map(|w| w as usize + params.group_width_reference as usize)
        .collect();
    reader.align();

    let mut lengths: Vec<usize> = reader
        .read_many(num_groups, params.group_length_bits as usize)?
        .into_iter()
        .map(|l| {
            params.group_length_reference as usize + l as usize * params.group_length_increment as usize
        })
        .collect();
    if let Some(last) = lengths.last_mut() {
        *last = params.last_group_length as usize;
    }
    reader.align();

    let total: usize = lengths.iter().sum();
    if total != num_values {
        return Err(Grib2Error::UnpackingError(format!(
            "Group lengths sum to {} but {} values are packed",
            total, num_values
        )));
    }

    let mvm = params.missing_value_management;
    let mut integers: Vec<Option<i64>> = Vec::with_capacity(num_values);

    for ((&reference, &width), &length) in references.iter().zip(&widths).zip(&lengths) {
        if width == 0 {
            let value = if is_missing(reference, ref_bits, mvm) {
                None
            } else {
                Some(reference as i64)
            };
            integers.extend(std::iter::repeat(value).take(length));
            continue;
        }

        for _ in 0..length {
            let raw = reader.read(width)?;
            if is_missing(raw, width, mvm) {
                integers.push(None);
            } else {
                integers.push(Some(reference as i64 + raw as i64));
            }
        }
    }

    if let Some(sd) = params.spatial_differencing {
        undo_spatial_differencing(&mut integers, sd.order, &first_values, overall_min);
    }

    Ok(integers
        .into_iter()
        .map(|v| v.map_or(f32::NAN, |x| scale.apply(x)))
        .collect())
}

/// Expand packed values onto the grid using a bitmap (1 bit per grid point,
/// most significant bit first, 1 = value present).
///
/// Only points marked present consume a packed value.
pub fn apply_bitmap(values: Vec<f32>, bitmap: &[u8], num_grid_points: usize) -> Result<Vec<f32>> {
    if bitmap.len() * 8 < num_grid_points {
        return Err(Grib2Error::UnpackingError(format!(
            "Bitmap covers {} points, grid has {}",
            bitmap.len() * 8,
            num_grid_points
        )));
    }

    let mut packed = values.into_iter();
    let mut grid = Vec::with_capacity(num_grid_points);
    for i in 0..num_grid_points {
        let present = (bitmap[i / 8] >> (7 - (i % 8))) & 1 == 1;
        if present {
            let value = packed.next().ok_or_else(|| {
                Grib2Error::UnpackingError(format!(
                    "Bitmap marks more points present than were packed (ran out at point {})",
                    i
                ))
            })?;
            grid.push(value);
        } else {
            grid.push(f32::NAN);
        }
    }

    let leftover = packed.count();
    if leftover > 0 {
        return Err(Grib2Error::UnpackingError(format!(
            "{} packed values not covered by the bitmap",
            leftover
        )));
    }

    Ok(grid)
}

/// Reconstruct values from first- or second-order differences.
///
/// Missing points are skipped; the differencing runs over present values only.
fn undo_spatial_differencing(
    integers: &mut [Option<i64>],
    order: u8,
    first_values: &[i64],
    overall_min: i64,
) {
    let mut present: Vec<&mut i64> = integers.iter_mut().filter_map(|v| v.as_mut()).collect();
    let order = order as usize;

    for (slot, &first) in present.iter_mut().zip(first_values.iter()).take(order) {
        **slot = first;
    }

    for n in order..present.len() {
        let previous = *present[n - 1];
        let value = if order == 1 {
            *present[n] + overall_min + previous
        } else {
            *present[n] + overall_min + 2 * previous - *present[n - 2]
        };
        *present[n] = value;
    }
}

fn is_missing(raw: u64, bits: usize, mvm: u8) -> bool {
    if mvm == 0 || bits == 0 {
        return false;
    }
    let all_ones = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
    raw == all_ones || (mvm == 2 && raw == all_ones - 1)
}

/// Reference value and scale factors, evaluated in f64.
struct Scaling {
    reference: f64,
    binary: f64,
    decimal: f64,
}

impl Scaling {
    fn new(params: &SimplePacking) -> Self {
        Self {
            reference: params.reference_value as f64,
            binary: 2f64.powi(params.binary_scale_factor as i32),
            decimal: 10f64.powi(-(params.decimal_scale_factor as i32)),
        }
    }

    fn apply(&self, packed: i64) -> f32 {
        ((self.reference + packed as f64 * self.binary) * self.decimal) as f32
    }
}

/// Most-significant-bit-first reader over a packed payload.
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Read `num_bits` (0..=64) as an unsigned integer.
    pub(crate) fn read(&mut self, num_bits: usize) -> Result<u64> {
        if num_bits == 0 {
            return Ok(0);
        }
        if num_bits > 64 {
            return Err(Grib2Error::UnpackingError(format!(
                "Invalid number of bits: {}",
                num_bits
            )));
        }
        if self.position + num_bits > self.data.len() * 8 {
            return Err(Grib2Error::Truncated {
                offset: self.position / 8,
                needed: (num_bits + 7) / 8,
                available: self.data.len().saturating_sub(self.position / 8),
            });
        }

        let mut value = 0u64;
        let mut remaining = num_bits;
        while remaining > 0 {
            let byte = self.data[self.position / 8];
            let available = 8 - self.position % 8;
            let take = available.min(remaining);
            let bits = (byte >> (available - take)) & ((1u16 << take) - 1) as u8;
            value = (value << take) | bits as u64;
            self.position += take;
            remaining -= take;
        }
        Ok(value)
    }

    /// Read a sign-magnitude integer.
    pub(crate) fn read_signed(&mut self, num_bits: usize) -> Result<i64> {
        let raw = self.read(num_bits)?;
        let sign_bit = 1u64 << (num_bits - 1);
        let magnitude = (raw & (sign_bit - 1)) as i64;
        Ok(if raw & sign_bit != 0 { -magnitude } else { magnitude })
    }

    fn read_many(&mut self, count: usize, num_bits: usize) -> Result<Vec<u64>> {
        (0..count).map(|_| self.read(num_bits)).collect()
    }

    /// Skip to the next byte boundary.
    pub(crate) fn align(&mut self) {
        self.position = (self.position + 7) / 8 * 8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sections::SpatialDifferencing;

    fn simple(bits: u8) -> SimplePacking {
        SimplePacking {
            reference_value: 0.0,
            binary_scale_factor: 0,
            decimal_scale_factor: 0,
            bits_per_value: bits,
        }
    }

    #[test]
    fn test_bit_reader() {
        // 0b10110100 = 180
        let mut reader = BitReader::new(&[0b1011_0100, 0xFF]);
        assert_eq!(reader.read(1).unwrap(), 1);
        assert_eq!(reader.read(2).unwrap(), 1);
        assert_eq!(reader.read(4).unwrap(), 0b1010);
        assert_eq!(reader.read(9).unwrap(), 0x0FF);
        assert!(reader.read(1).is_err());
    }

    #[test]
    fn test_bit_reader_signed_and_align() {
        let mut reader = BitReader::new(&[0b1000_0011, 0x00, 0x05]);
        assert_eq!(reader.read_signed(8).unwrap(), -3);
        reader.read(3).unwrap();
        reader.align();
        assert_eq!(reader.read(8).unwrap(), 5);
    }

    #[test]
    fn test_unpack_simple_scaling() {
        // R=100, E=1, D=1: (100 + X*2) / 10
        let params = SimplePacking {
            reference_value: 100.0,
            binary_scale_factor: 1,
            decimal_scale_factor: 1,
            bits_per_value: 8,
        };
        let values = unpack_simple(&[0, 5, 10], 3, &params).unwrap();
        assert_eq!(values, vec![10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_unpack_simple_zero_bits_is_constant() {
        let params = SimplePacking {
            reference_value: 273.15,
            ..simple(0)
        };
        let values = unpack_simple(&[], 4, &params).unwrap();
        assert_eq!(values.len(), 4);
        assert!(values.iter().all(|v| (*v - 273.15).abs() < 1e-4));
    }

    #[test]
    fn test_bitmap_only_consumes_present_points() {
        // Points 0 and 2 present, 1 and 3 missing
        let grid = apply_bitmap(vec![1.0, 2.0], &[0b1010_0000], 4).unwrap();
        assert_eq!(grid[0], 1.0);
        assert!(grid[1].is_nan());
        assert_eq!(grid[2], 2.0);
        assert!(grid[3].is_nan());
    }

    #[test]
    fn test_bitmap_count_mismatch_is_error() {
        assert!(apply_bitmap(vec![1.0], &[0b1100_0000], 2).is_err());
        assert!(apply_bitmap(vec![1.0, 2.0, 3.0], &[0b1100_0000], 2).is_err());
    }

    #[test]
    fn test_first_order_differencing() {
        // values 10, 12, 15: diffs (12-10)=2, (15-12)=3, min 2 -> stored 0, 1
        let mut ints = vec![Some(0), Some(0), Some(1)];
        undo_spatial_differencing(&mut ints, 1, &[10], 2);
        assert_eq!(ints, vec![Some(10), Some(12), Some(15)]);
    }

    #[test]
    fn test_second_order_differencing_skips_missing() {
        // values 1, 2, 4, 7: second differences 1, 1 -> min 1, stored 0, 0
        let mut ints = vec![Some(0), None, Some(0), Some(0), Some(0)];
        undo_spatial_differencing(&mut ints, 2, &[1, 2], 1);
        assert_eq!(ints, vec![Some(1), None, Some(2), Some(4), Some(7)]);
    }

    #[test]
    fn test_complex_constant_group_and_missing() {
        // Two groups, 8-bit refs [5, 255]; widths 0 (4 bits each); lengths via
        // reference 2, last length 3. mvm=1 so the 255 group is missing.
        let params = ComplexPacking {
            simple: simple(8),
            missing_value_management: 1,
            num_groups: 2,
            group_width_reference: 0,
            group_width_bits: 4,
            group_length_reference: 2,
            group_length_increment: 1,
            last_group_length: 3,
            group_length_bits: 4,
            spatial_differencing: None,
        };
        let data = [5u8, 255, 0x00, 0x00];
        let values = unpack_complex(&data, 5, &params).unwrap();
        assert_eq!(&values[..2], &[5.0, 5.0]);
        assert!(values[2..].iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_complex_group_length_mismatch() {
        let params = ComplexPacking {
            simple: simple(8),
            missing_value_management: 0,
            num_groups: 1,
            group_width_reference: 0,
            group_width_bits: 0,
            group_length_reference: 0,
            group_length_increment: 1,
            last_group_length: 2,
            group_length_bits: 0,
            spatial_differencing: Some(SpatialDifferencing {
                order: 1,
                extra_octets: 1,
            }),
        };
        // h1=1, min=0, ref=0
        let data = [1u8, 0, 0];
        assert!(unpack_complex(&data, 3, &params).is_err());
    }
}
