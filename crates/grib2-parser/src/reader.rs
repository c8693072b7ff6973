//! Message and field iteration over an in-memory GRIB2 file.

use tracing::trace;

use crate::error::{Grib2Error, Result};
use crate::sections::{
    self, BitmapIndicator, DataRepresentation, GridDefinition, Identification, ProductDefinition,
    INDICATOR_LEN,
};
use crate::unpacking;

/// One field (a section 4-7 repetition) of a GRIB2 message.
///
/// Sections are kept raw; parsing happens on demand so fields nobody
/// selected are never decoded.
#[derive(Debug, Clone)]
pub struct Grib2Field<'a> {
    /// Zero-based index of the message in the file
    pub message_index: usize,
    pub discipline: u8,
    grid_section: &'a [u8],
    product_section: &'a [u8],
    representation_section: &'a [u8],
    bitmap: Option<&'a [u8]>,
    data_section: &'a [u8],
}

impl<'a> Grib2Field<'a> {
    pub fn grid_definition(&self) -> Result<GridDefinition> {
        sections::parse_grid_definition(self.grid_section)
    }

    pub fn product_definition(&self) -> Result<ProductDefinition> {
        sections::parse_product_definition(self.product_section)
    }

    pub fn data_representation(&self) -> Result<DataRepresentation> {
        sections::parse_data_representation(self.representation_section)
    }

    pub fn has_bitmap(&self) -> bool {
        self.bitmap.is_some()
    }

    /// Unpack the field onto a grid of `num_grid_points` values, `NaN` where missing.
    pub fn unpack(&self, num_grid_points: usize) -> Result<Vec<f32>> {
        let representation = self.data_representation()?;
        let payload = sections::data_payload(self.data_section)?;
        unpacking::unpack_field(&representation, payload, self.bitmap, num_grid_points)
    }
}

/// A complete GRIB2 message.
#[derive(Debug, Clone)]
pub struct Grib2Message<'a> {
    pub index: usize,
    /// Byte offset of the message in the file
    pub offset: usize,
    pub identification: Identification,
    pub fields: Vec<Grib2Field<'a>>,
}

/// Sequential reader over the messages of a GRIB2 file.
pub struct Grib2Reader<'a> {
    data: &'a [u8],
    offset: usize,
    message_index: usize,
}

impl<'a> Grib2Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            message_index: 0,
        }
    }

    /// Read the next message, skipping any bytes between messages.
    ///
    /// Returns `Ok(None)` once no further `GRIB` marker is found.
    pub fn next_message(&mut self) -> Result<Option<Grib2Message<'a>>> {
        let remaining = &self.data[self.offset..];
        let start = match remaining.windows(4).position(|w| w == b"GRIB") {
            Some(pos) => self.offset + pos,
            None => {
                self.offset = self.data.len();
                return Ok(None);
            }
        };

        let available = self.data.len() - start;
        if available < INDICATOR_LEN {
            return Err(Grib2Error::Truncated {
                offset: start,
                needed: INDICATOR_LEN,
                available,
            });
        }

        let indicator = sections::parse_indicator(&self.data[start..])?;
        let length = usize::try_from(indicator.total_length).unwrap_or(usize::MAX);
        if length < INDICATOR_LEN + 4 || length > available {
            return Err(Grib2Error::Truncated {
                offset: start,
                needed: length,
                available,
            });
        }

        let message = &self.data[start..start + length];
        if &message[length - 4..] != b"7777" {
            return Err(Grib2Error::InvalidFormat(format!(
                "Message {} at offset {} is missing the 7777 terminator",
                self.message_index, start
            )));
        }

        let index = self.message_index;
        let parsed = parse_message(message, index, start, indicator.discipline)?;
        trace!(
            message = index,
            offset = start,
            length = length,
            fields = parsed.fields.len(),
            "Read GRIB2 message"
        );

        self.offset = start + length;
        self.message_index += 1;
        Ok(Some(parsed))
    }
}

fn parse_message(
    message: &[u8],
    index: usize,
    offset: usize,
    discipline: u8,
) -> Result<Grib2Message<'_>> {
    let raw = sections::split_sections(message)?;

    let mut identification = None;
    let mut grid = None;
    let mut product = None;
    let mut representation = None;
    let mut previous_bitmap: Option<&[u8]> = None;
    let mut bitmap: Option<Option<&[u8]>> = None;
    let mut fields = Vec::new();

    for section in raw {
        match section.number {
            1 => identification = Some(sections::parse_identification(section.bytes)?),
            2 => {}
            3 => grid = Some(section.bytes),
            4 => product = Some(section.bytes),
            5 => representation = Some(section.bytes),
            6 => {
                bitmap = Some(match sections::parse_bitmap(section.bytes)? {
                    BitmapIndicator::Present(bm) => {
                        previous_bitmap = Some(bm);
                        Some(bm)
                    }
                    BitmapIndicator::Previous => Some(previous_bitmap.ok_or_else(|| {
                        Grib2Error::InvalidSection {
                            section: 6,
                            reason: "Bitmap indicator 254 with no earlier bitmap".to_string(),
                        }
                    })?),
                    BitmapIndicator::Absent => None,
                });
            }
            7 => {
                let (Some(grid_section), Some(product_section), Some(representation_section)) =
                    (grid, product.take(), representation.take())
                else {
                    return Err(Grib2Error::InvalidSection {
                        section: 7,
                        reason: "Data section without preceding sections 3, 4 and 5".to_string(),
                    });
                };
                fields.push(Grib2Field {
                    message_index: index,
                    discipline,
                    grid_section,
                    product_section,
                    representation_section,
                    bitmap: bitmap.take().flatten(),
                    data_section: section.bytes,
                });
            }
            other => {
                return Err(Grib2Error::InvalidSection {
                    section: other,
                    reason: "Unexpected section".to_string(),
                })
            }
        }
    }

    let identification = identification.ok_or_else(|| {
        Grib2Error::InvalidFormat(format!("Message {} has no identification section", index))
    })?;

    Ok(Grib2Message {
        index,
        offset,
        identification,
        fields,
    })
}
