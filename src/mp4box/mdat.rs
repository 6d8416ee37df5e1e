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

use crate::internal_utils::stream::*;
use crate::internal_utils::*;
use crate::*;

/// Payload of the media data box ('mdat'). Bytes are only ever appended; offsets handed out by
/// [`MediaDataBox::append`] are relative to the start of the payload and stay valid.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MediaDataBox {
    data: Vec<u8>,
}

impl MediaDataBox {
    pub fn create(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Appends `bytes` and returns the offset at which they start.
    pub fn append(&mut self, bytes: &[u8]) -> HeifResult<u64> {
        let offset = u64_from_usize(self.data.len())?;
        self.data
            .try_reserve(bytes.len())
            .or(Err(HeifError::OutOfMemory))?;
        self.data.extend_from_slice(bytes);
        Ok(offset)
    }

    /// Size of the box header that [`MediaDataBox::write`] emits.
    pub fn header_size(&self) -> usize {
        if self.data.len() + 8 > u32::MAX as usize {
            16
        } else {
            8
        }
    }

    pub fn write(&self, stream: &mut OStream) -> HeifResult<()> {
        let box_size = checked_add!(u64_from_usize(self.data.len())?, self.header_size() as u64)?;
        if self.header_size() == 16 {
            // unsigned int(32) size = 1;
            stream.write_u32(1)?;
            // unsigned int(32) type = boxtype;
            stream.write_str("mdat")?;
            // unsigned int(64) largesize;
            stream.write_u64(box_size)?;
        } else {
            // unsigned int(32) size;
            stream.write_u32(u32_from_u64(box_size)?)?;
            // unsigned int(32) type = boxtype;
            stream.write_str("mdat")?;
        }
        stream.write_slice(&self.data)
    }
}
