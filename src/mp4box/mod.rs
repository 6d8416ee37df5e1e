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

pub mod iinf;
pub mod iloc;
pub mod iprp;
pub mod iref;
pub mod mdat;
pub mod meta;

use crate::internal_utils::stream::*;
use crate::internal_utils::*;
use crate::*;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BoxSize {
    FixedSize(usize), // In bytes, header exclusive.
    UntilEndOfStream, // The box goes on until the end of the input stream.
}

#[derive(Debug)]
pub struct BoxHeader {
    pub size: BoxSize,
    pub box_type: String,
}

impl BoxHeader {
    pub fn is_type(&self, box_type: &str) -> bool {
        self.box_type == box_type
    }
}

pub fn parse_header(stream: &mut IStream, top_level: bool) -> HeifResult<BoxHeader> {
    // Section 4.2.2 of ISO/IEC 14496-12.
    let start_offset = stream.offset;
    // unsigned int(32) size;
    let mut size = stream.read_u32()? as u64;
    // unsigned int(32) type = boxtype;
    let box_type = stream.read_string(4)?;
    if box_type == "uuid" {
        return HeifError::malformed_stream("uuid boxes are not supported");
    }
    if size == 1 {
        // unsigned int(64) largesize;
        size = stream.read_u64()?;
    }
    let header_size = stream.offset - start_offset;
    if size == 0 {
        // Section 4.2.2 of ISO/IEC 14496-12.
        //   if size is 0, then this box shall be in a top-level box (i.e. not contained in another
        //   box), and be the last box in its 'file', and its payload extends to the end of that
        //   enclosing 'file'.
        if !top_level {
            return HeifError::malformed_stream("non-top-level box with size 0");
        }
        return Ok(BoxHeader {
            box_type,
            size: BoxSize::UntilEndOfStream,
        });
    }
    let size = checked_sub!(usize_from_u64(size)?, header_size)?;
    if size > stream.bytes_left()? {
        return HeifError::malformed_stream(format!(
            "'{box_type}' box of {size} bytes exceeds the {} bytes left",
            stream.bytes_left()?
        ));
    }
    Ok(BoxHeader {
        box_type,
        size: BoxSize::FixedSize(size),
    })
}

/// Reads a box header and checks that it is of the expected type. Returns a stream over the box
/// payload.
pub(crate) fn expect_box<'a>(
    stream: &'a mut IStream,
    box_type: &str,
) -> HeifResult<IStream<'a>> {
    let header = parse_header(stream, false)?;
    if !header.is_type(box_type) {
        return HeifError::malformed_stream(format!(
            "expected '{box_type}' box, found '{}'",
            header.box_type
        ));
    }
    stream.sub_stream(&header.size)
}
