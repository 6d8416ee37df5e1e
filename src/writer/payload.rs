// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Item payloads of the 'grid' and 'iovl' derived images, ISO/IEC 23008-12 Section 6.6.2.

use crate::internal_utils::stream::*;
use crate::*;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageGrid {
    pub rows: u32,
    pub columns: u32,
    pub output_width: u32,
    pub output_height: u32,
}

impl ImageGrid {
    pub fn to_bytes(&self) -> HeifResult<Vec<u8>> {
        // ISO/IEC 23008-12 6.6.2.3.2
        // aligned(8) class ImageGrid {
        //     unsigned int(8) version = 0;
        //     unsigned int(8) flags;
        //     FieldLength = ((flags & 1) + 1) * 16;
        //     unsigned int(8) rows_minus_one;
        //     unsigned int(8) columns_minus_one;
        //     unsigned int(FieldLength) output_width;
        //     unsigned int(FieldLength) output_height;
        // }
        if !(1..=256).contains(&self.rows) || !(1..=256).contains(&self.columns) {
            return HeifError::precondition_violation(format!(
                "invalid grid of {}x{} tiles",
                self.columns, self.rows
            ));
        }
        let mut stream = OStream::default();
        let flags = if self.output_width > 65535 || self.output_height > 65535 { 1 } else { 0 };
        // unsigned int(8) version = 0;
        stream.write_u8(0)?;
        // unsigned int(8) flags;
        stream.write_u8(flags)?;
        // unsigned int(8) rows_minus_one;
        stream.write_u8((self.rows - 1) as u8)?;
        // unsigned int(8) columns_minus_one;
        stream.write_u8((self.columns - 1) as u8)?;
        // unsigned int(FieldLength) output_width;
        // unsigned int(FieldLength) output_height;
        if flags == 1 {
            stream.write_u32(self.output_width)?;
            stream.write_u32(self.output_height)?;
        } else {
            stream.write_u16(self.output_width as u16)?;
            stream.write_u16(self.output_height as u16)?;
        }
        Ok(stream.data)
    }

    pub fn parse(data: &[u8]) -> HeifResult<Self> {
        let mut stream = IStream::create(data);
        // unsigned int(8) version = 0;
        let version = stream.read_u8()?;
        if version != 0 {
            return HeifError::malformed_stream(format!("unsupported grid version {version}"));
        }
        // unsigned int(8) flags;
        let flags = stream.read_u8()?;
        let mut grid = ImageGrid {
            // unsigned int(8) rows_minus_one;
            rows: stream.read_u8()? as u32 + 1,
            // unsigned int(8) columns_minus_one;
            columns: stream.read_u8()? as u32 + 1,
            ..Default::default()
        };
        if (flags & 1) == 1 {
            // unsigned int(32) output_width;
            grid.output_width = stream.read_u32()?;
            // unsigned int(32) output_height;
            grid.output_height = stream.read_u32()?;
        } else {
            // unsigned int(16) output_width;
            grid.output_width = stream.read_u16()? as u32;
            // unsigned int(16) output_height;
            grid.output_height = stream.read_u16()? as u32;
        }
        Ok(grid)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageOverlay {
    pub canvas_fill_value: [u16; 4],
    pub output_width: u32,
    pub output_height: u32,
    pub offsets: Vec<(i32, i32)>,
}

impl ImageOverlay {
    fn needs_large_fields(&self) -> bool {
        let fits_i16 = |value: i32| i16::try_from(value).is_ok();
        self.output_width > 65535
            || self.output_height > 65535
            || self
                .offsets
                .iter()
                .any(|(horizontal, vertical)| !fits_i16(*horizontal) || !fits_i16(*vertical))
    }

    pub fn to_bytes(&self) -> HeifResult<Vec<u8>> {
        // ISO/IEC 23008-12 6.6.2.2.2
        // aligned(8) class ImageOverlay {
        //     unsigned int(8) version = 0;
        //     unsigned int(8) flags;
        //     for (j=0; j<4; j++) {
        //         unsigned int(16) canvas_fill_value;
        //     }
        //     FieldLength = ((flags & 1) + 1) * 16;
        //     unsigned int(FieldLength) output_width;
        //     unsigned int(FieldLength) output_height;
        //     for (i=0; i<reference_count; i++) {
        //         signed int(FieldLength) horizontal_offset;
        //         signed int(FieldLength) vertical_offset;
        //     }
        // }
        let large = self.needs_large_fields();
        let mut stream = OStream::default();
        // unsigned int(8) version = 0;
        stream.write_u8(0)?;
        // unsigned int(8) flags;
        stream.write_u8(if large { 1 } else { 0 })?;
        for value in self.canvas_fill_value {
            // unsigned int(16) canvas_fill_value;
            stream.write_u16(value)?;
        }
        if large {
            stream.write_u32(self.output_width)?;
            stream.write_u32(self.output_height)?;
            for (horizontal, vertical) in &self.offsets {
                stream.write_i32(*horizontal)?;
                stream.write_i32(*vertical)?;
            }
        } else {
            stream.write_u16(self.output_width as u16)?;
            stream.write_u16(self.output_height as u16)?;
            for (horizontal, vertical) in &self.offsets {
                stream.write_i16(*horizontal as i16)?;
                stream.write_i16(*vertical as i16)?;
            }
        }
        Ok(stream.data)
    }

    /// The number of offsets is the number of 'dimg' references of the overlay item.
    pub fn parse(data: &[u8], reference_count: usize) -> HeifResult<Self> {
        let mut stream = IStream::create(data);
        // unsigned int(8) version = 0;
        let version = stream.read_u8()?;
        if version != 0 {
            return HeifError::malformed_stream(format!("unsupported iovl version {version}"));
        }
        // unsigned int(8) flags;
        let large = (stream.read_u8()? & 1) == 1;
        let mut overlay = ImageOverlay::default();
        for value in &mut overlay.canvas_fill_value {
            // unsigned int(16) canvas_fill_value;
            *value = stream.read_u16()?;
        }
        if large {
            overlay.output_width = stream.read_u32()?;
            overlay.output_height = stream.read_u32()?;
        } else {
            overlay.output_width = stream.read_u16()? as u32;
            overlay.output_height = stream.read_u16()? as u32;
        }
        for _ in 0..reference_count {
            let offset = if large {
                (stream.read_i32()?, stream.read_i32()?)
            } else {
                (stream.read_i16()? as i32, stream.read_i16()? as i32)
            };
            overlay.offsets.push(offset);
        }
        Ok(overlay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid() {
        let grid = ImageGrid {
            rows: 2,
            columns: 3,
            output_width: 600,
            output_height: 400,
        };
        let bytes = grid.to_bytes().unwrap();
        assert_eq!(bytes, [0, 0, 1, 2, 0x02, 0x58, 0x01, 0x90]);
        assert_eq!(ImageGrid::parse(&bytes), Ok(grid));

        let large = ImageGrid {
            output_width: 70000,
            ..grid
        };
        let bytes = large.to_bytes().unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes[1], 1);
        assert_eq!(ImageGrid::parse(&bytes), Ok(large));

        assert!(ImageGrid { rows: 0, ..grid }.to_bytes().is_err());
        assert!(ImageGrid::parse(&[1, 0, 0, 0, 0, 1, 0, 1]).is_err());
        assert!(ImageGrid::parse(&[0, 0, 0, 0, 0, 1]).is_err());
    }

    #[test]
    fn overlay() {
        let overlay = ImageOverlay {
            canvas_fill_value: [0, 0, 0, 0xFFFF],
            output_width: 640,
            output_height: 480,
            offsets: vec![(0, 0), (-20, 100)],
        };
        let bytes = overlay.to_bytes().unwrap();
        assert_eq!(bytes.len(), 2 + 8 + 4 + 2 * 4);
        assert_eq!(bytes[1], 0);
        assert_eq!(ImageOverlay::parse(&bytes, 2), Ok(overlay.clone()));

        // An offset outside of the 16-bit range switches to 32-bit fields.
        let mut far = overlay;
        far.offsets[1].0 = -40000;
        let bytes = far.to_bytes().unwrap();
        assert_eq!(bytes.len(), 2 + 8 + 8 + 2 * 8);
        assert_eq!(bytes[1], 1);
        assert_eq!(ImageOverlay::parse(&bytes, 2), Ok(far));
        assert!(ImageOverlay::parse(&bytes, 3).is_err());
    }
}
