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

//! Item location box ('iloc'), ISO/IEC 14496-12 Section 8.11.3.
//!
//! ```text
//! aligned(8) class ItemLocationBox extends FullBox('iloc', version, 0) {
//!     unsigned int(4) offset_size;
//!     unsigned int(4) length_size;
//!     unsigned int(4) base_offset_size;
//!     if ((version == 1) || (version == 2)) {
//!         unsigned int(4) index_size;
//!     } else {
//!         unsigned int(4) reserved;
//!     }
//!     if (version < 2) {
//!         unsigned int(16) item_count;
//!     } else if (version == 2) {
//!         unsigned int(32) item_count;
//!     }
//!     for (i=0; i<item_count; i++) {
//!         unsigned int(16) item_ID;
//!         if ((version == 1) || (version == 2)) {
//!             unsigned int(4) reserved = 0;
//!             unsigned int(12) construction_method;
//!         } else {
//!             unsigned int(16) reserved = 0;
//!         }
//!         unsigned int(16) data_reference_index;
//!         unsigned int(base_offset_size*8) base_offset;
//!         unsigned int(16) extent_count;
//!         for (j=0; j<extent_count; j++) {
//!             if (((version == 1) || (version == 2)) && (index_size > 0)) {
//!                 unsigned int(index_size*8) extent_index;
//!             }
//!             unsigned int(offset_size*8) extent_offset;
//!             unsigned int(length_size*8) extent_length;
//!         }
//!     }
//! }
//! ```
//!
//! Item ids are 16-bit for every version of the box.

use crate::internal_utils::stream::*;
use crate::internal_utils::*;
use crate::mp4box::expect_box;
use crate::*;

use std::collections::HashMap;

/// How `base_offset + extent_offset` of an [`ItemLocation`] is interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConstructionMethod {
    /// Absolute position in the file.
    #[default]
    FileOffset = 0,
    /// Position within the 'idat' box of the same meta box.
    IdatOffset = 1,
    /// Position within the data of the item selected by the extent index.
    ItemOffset = 2,
}

impl ConstructionMethod {
    fn from_code(code: u32) -> HeifResult<Self> {
        match code {
            0 => Ok(Self::FileOffset),
            1 => Ok(Self::IdatOffset),
            2 => Ok(Self::ItemOffset),
            _ => HeifError::malformed_stream(format!("unknown construction_method {code}")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ItemLocationExtent {
    /// 1-based index into the 'iloc' references of the item. Only meaningful with
    /// [`ConstructionMethod::ItemOffset`].
    pub extent_index: u64,
    pub extent_offset: u64,
    pub extent_length: u64,
}

impl ItemLocationExtent {
    pub fn new(extent_offset: u64, extent_length: u64) -> Self {
        Self {
            extent_index: 0,
            extent_offset,
            extent_length,
        }
    }
}

/// Box-level widths, in bytes, of the variable-size fields of an 'iloc' box. Each one is 0, 4 or
/// 8. A zero width means the field is absent from the stream and its value is 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FieldSizes {
    pub offset_size: u8,
    pub length_size: u8,
    pub base_offset_size: u8,
    pub index_size: u8,
}

fn check_field_size(size: u8, name: &str) -> HeifResult<()> {
    match size {
        0 | 4 | 8 => Ok(()),
        _ => HeifError::precondition_violation(format!("{name} must be 0, 4 or 8, got {size}")),
    }
}

fn check_value_fits(value: u64, size: u8, name: &str) -> HeifResult<()> {
    if !value_fits_in_size(value, size) {
        return HeifError::precondition_violation(format!(
            "{name} {value} does not fit in {size} bytes"
        ));
    }
    Ok(())
}

impl FieldSizes {
    pub fn validate(&self) -> HeifResult<()> {
        check_field_size(self.offset_size, "offset_size")?;
        check_field_size(self.length_size, "length_size")?;
        check_field_size(self.base_offset_size, "base_offset_size")?;
        check_field_size(self.index_size, "index_size")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemLocation {
    pub item_id: u16,
    pub construction_method: ConstructionMethod,
    pub data_reference_index: u16,
    pub base_offset: u64,
    extents: Vec<ItemLocationExtent>,
}

impl ItemLocation {
    pub fn new(item_id: u16, construction_method: ConstructionMethod) -> Self {
        Self {
            item_id,
            construction_method,
            ..Default::default()
        }
    }

    /// Appends an extent. Extents are concatenated in insertion order to form the item data.
    pub fn add_extent(&mut self, extent: ItemLocationExtent) {
        self.extents.push(extent);
    }

    pub fn extent_count(&self) -> usize {
        self.extents.len()
    }

    /// Returns the extent at the 0-based index `i`.
    pub fn extent(&self, i: usize) -> HeifResult<&ItemLocationExtent> {
        match self.extents.get(i) {
            Some(extent) => Ok(extent),
            None => HeifError::out_of_range(),
        }
    }

    pub fn extents(&self) -> &[ItemLocationExtent] {
        &self.extents
    }

    pub(crate) fn extents_mut(&mut self) -> &mut [ItemLocationExtent] {
        &mut self.extents
    }

    /// Whether this entry addresses no bytes at all: a zero base offset and only zero-offset,
    /// zero-length extents. Such entries describe items whose data is inherited through
    /// references.
    pub fn is_empty_equivalent(&self) -> bool {
        self.base_offset == 0
            && self
                .extents
                .iter()
                .all(|extent| extent.extent_offset == 0 && extent.extent_length == 0)
    }

    /// Sum of the extent lengths. Zero-length extents ("until the end of the source") count as 0.
    pub fn total_length(&self) -> HeifResult<u64> {
        let mut total: u64 = 0;
        for extent in &self.extents {
            checked_incr!(total, extent.extent_length);
        }
        Ok(total)
    }

    /// Checks that this entry can be written with the given box version and field widths.
    pub fn check(&self, version: u8, sizes: &FieldSizes) -> HeifResult<()> {
        if self.extents.is_empty() {
            return HeifError::precondition_violation(format!(
                "item {} has no extent",
                self.item_id
            ));
        }
        if self.extents.len() > u16::MAX as usize {
            return HeifError::precondition_violation(format!(
                "item {} has too many extents",
                self.item_id
            ));
        }
        if version == 0 && self.construction_method != ConstructionMethod::FileOffset {
            return HeifError::precondition_violation(format!(
                "construction method {:?} of item {} requires iloc version 1 or 2",
                self.construction_method, self.item_id
            ));
        }
        check_value_fits(self.base_offset, sizes.base_offset_size, "base_offset")?;
        let index_size = if version == 0 { 0 } else { sizes.index_size };
        for extent in &self.extents {
            check_value_fits(extent.extent_index, index_size, "extent_index")?;
            check_value_fits(extent.extent_offset, sizes.offset_size, "extent_offset")?;
            check_value_fits(extent.extent_length, sizes.length_size, "extent_length")?;
        }
        Ok(())
    }

    pub fn write(&self, stream: &mut OStream, version: u8, sizes: &FieldSizes) -> HeifResult<()> {
        self.check(version, sizes)?;
        // unsigned int(16) item_ID;
        stream.write_u16(self.item_id)?;
        if version >= 1 {
            // unsigned int(4) reserved = 0;
            stream.write_bits(0, 4)?;
            // unsigned int(12) construction_method;
            stream.write_bits(self.construction_method as u32, 12)?;
        } else {
            // unsigned int(16) reserved = 0;
            stream.write_u16(0)?;
        }
        // unsigned int(16) data_reference_index;
        stream.write_u16(self.data_reference_index)?;
        // unsigned int(base_offset_size*8) base_offset;
        stream.write_uxx(self.base_offset, sizes.base_offset_size)?;
        // unsigned int(16) extent_count;
        stream.write_u16(u16_from_usize(self.extents.len())?)?;
        for extent in &self.extents {
            if version >= 1 && sizes.index_size > 0 {
                // unsigned int(index_size*8) extent_index;
                stream.write_uxx(extent.extent_index, sizes.index_size)?;
            }
            // unsigned int(offset_size*8) extent_offset;
            stream.write_uxx(extent.extent_offset, sizes.offset_size)?;
            // unsigned int(length_size*8) extent_length;
            stream.write_uxx(extent.extent_length, sizes.length_size)?;
        }
        Ok(())
    }

    pub fn parse(stream: &mut IStream, version: u8, sizes: &FieldSizes) -> HeifResult<Self> {
        // unsigned int(16) item_ID;
        let item_id = stream.read_u16()?;
        let construction_method = if version >= 1 {
            let mut bits = stream.sub_bit_stream(2)?;
            // unsigned int(4) reserved = 0;
            bits.skip(4)?;
            // unsigned int(12) construction_method;
            ConstructionMethod::from_code(bits.read(12)?)?
        } else {
            // unsigned int(16) reserved = 0;
            stream.skip(2)?;
            ConstructionMethod::FileOffset
        };
        let mut location = ItemLocation {
            item_id,
            construction_method,
            // unsigned int(16) data_reference_index;
            data_reference_index: stream.read_u16()?,
            // unsigned int(base_offset_size*8) base_offset;
            base_offset: stream.read_uxx(sizes.base_offset_size)?,
            extents: Vec::new(),
        };
        // unsigned int(16) extent_count;
        let extent_count = stream.read_u16()?;
        if extent_count == 0 {
            return HeifError::malformed_stream(format!("item {item_id} has no extent"));
        }
        for _ in 0..extent_count {
            let extent_index = if version >= 1 && sizes.index_size > 0 {
                // unsigned int(index_size*8) extent_index;
                stream.read_uxx(sizes.index_size)?
            } else {
                0
            };
            location.extents.push(ItemLocationExtent {
                extent_index,
                // unsigned int(offset_size*8) extent_offset;
                extent_offset: stream.read_uxx(sizes.offset_size)?,
                // unsigned int(length_size*8) extent_length;
                extent_length: stream.read_uxx(sizes.length_size)?,
            });
        }
        Ok(location)
    }
}

/// Settings used to create an [`ItemLocationBox`] for writing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IlocSettings {
    pub version: u8,
    pub sizes: FieldSizes,
}

impl Default for IlocSettings {
    fn default() -> Self {
        Self {
            version: 1,
            sizes: FieldSizes {
                offset_size: 4,
                length_size: 4,
                base_offset_size: 4,
                index_size: 0,
            },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemLocationBox {
    version: u8,
    flags: u32,
    sizes: FieldSizes,
    // Wire order.
    locations: Vec<ItemLocation>,
    // Position in self.locations of the first entry of each item id.
    index: HashMap<u16, usize>,
}

impl ItemLocationBox {
    pub fn create(version: u8) -> HeifResult<Self> {
        if version > 2 {
            return HeifError::precondition_violation(format!("invalid iloc version {version}"));
        }
        Ok(Self {
            version,
            ..Default::default()
        })
    }

    /// Version 0 has no index size field, so `settings.sizes.index_size` is dropped for it.
    pub fn create_with_settings(settings: &IlocSettings) -> HeifResult<Self> {
        settings.sizes.validate()?;
        let mut iloc = Self::create(settings.version)?;
        iloc.sizes = settings.sizes;
        if iloc.version == 0 {
            iloc.sizes.index_size = 0;
        }
        Ok(iloc)
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn sizes(&self) -> &FieldSizes {
        &self.sizes
    }

    pub fn set_offset_size(&mut self, size: u8) -> HeifResult<()> {
        check_field_size(size, "offset_size")?;
        self.sizes.offset_size = size;
        Ok(())
    }

    pub fn set_length_size(&mut self, size: u8) -> HeifResult<()> {
        check_field_size(size, "length_size")?;
        self.sizes.length_size = size;
        Ok(())
    }

    pub fn set_base_offset_size(&mut self, size: u8) -> HeifResult<()> {
        check_field_size(size, "base_offset_size")?;
        self.sizes.base_offset_size = size;
        Ok(())
    }

    /// The index size is only written for versions 1 and 2. Version 0 only accepts 0.
    pub fn set_index_size(&mut self, size: u8) -> HeifResult<()> {
        check_field_size(size, "index_size")?;
        if self.version == 0 && size != 0 {
            return HeifError::precondition_violation(format!(
                "index_size {size} is reserved in iloc version 0"
            ));
        }
        self.sizes.index_size = size;
        Ok(())
    }

    pub fn item_count(&self) -> usize {
        self.locations.len()
    }

    pub fn locations(&self) -> &[ItemLocation] {
        &self.locations
    }

    pub(crate) fn locations_mut(&mut self) -> &mut [ItemLocation] {
        &mut self.locations
    }

    /// Checks that `location` could be added to this box and written with its current settings.
    pub fn check_location(&self, location: &ItemLocation) -> HeifResult<()> {
        if self.has_item_id_entry(location.item_id) {
            return HeifError::precondition_violation(format!(
                "item {} already has a location entry",
                location.item_id
            ));
        }
        location.check(self.version, &self.sizes)
    }

    /// Appends an entry. An entry for the same item id must not already be present.
    pub fn add_location(&mut self, location: ItemLocation) -> HeifResult<()> {
        if self.has_item_id_entry(location.item_id) {
            return HeifError::precondition_violation(format!(
                "item {} already has a location entry",
                location.item_id
            ));
        }
        self.push_location(location);
        Ok(())
    }

    fn push_location(&mut self, location: ItemLocation) {
        self.index
            .entry(location.item_id)
            .or_insert(self.locations.len());
        self.locations.push(location);
    }

    pub fn add_extent(&mut self, item_id: u16, extent: ItemLocationExtent) -> HeifResult<()> {
        self.item_location_for_id_mut(item_id)?.add_extent(extent);
        Ok(())
    }

    pub fn has_item_id_entry(&self, item_id: u16) -> bool {
        self.index.contains_key(&item_id)
    }

    /// Returns false if there is no entry for `item_id`.
    pub fn set_item_data_reference_index(&mut self, item_id: u16, value: u16) -> bool {
        match self.item_location_for_id_mut(item_id) {
            Ok(location) => {
                location.data_reference_index = value;
                true
            }
            Err(_) => false,
        }
    }

    /// Returns the first entry for `item_id`.
    pub fn item_location_for_id(&self, item_id: u16) -> HeifResult<&ItemLocation> {
        match self.index.get(&item_id) {
            Some(position) => Ok(&self.locations[*position]),
            None => HeifError::not_found(),
        }
    }

    pub(crate) fn item_location_for_id_mut(&mut self, item_id: u16) -> HeifResult<&mut ItemLocation> {
        match self.index.get(&item_id) {
            Some(position) => Ok(&mut self.locations[*position]),
            None => HeifError::not_found(),
        }
    }

    /// Checks every entry against the box version and field widths.
    pub fn validate(&self) -> HeifResult<()> {
        self.sizes.validate()?;
        if self.version > 2 {
            return HeifError::precondition_violation(format!(
                "invalid iloc version {}",
                self.version
            ));
        }
        if self.version < 2 && self.locations.len() > u16::MAX as usize {
            return HeifError::precondition_violation("too many items for iloc version 0 or 1");
        }
        for location in &self.locations {
            location.check(self.version, &self.sizes)?;
        }
        Ok(())
    }

    pub fn write(&self, stream: &mut OStream) -> HeifResult<()> {
        // Nothing is written unless every entry is representable.
        self.validate()?;
        stream.start_full_box("iloc", (self.version, self.flags))?;
        // unsigned int(4) offset_size;
        stream.write_bits(self.sizes.offset_size.into(), 4)?;
        // unsigned int(4) length_size;
        stream.write_bits(self.sizes.length_size.into(), 4)?;
        // unsigned int(4) base_offset_size;
        stream.write_bits(self.sizes.base_offset_size.into(), 4)?;
        if self.version >= 1 {
            // unsigned int(4) index_size;
            stream.write_bits(self.sizes.index_size.into(), 4)?;
        } else {
            // unsigned int(4) reserved;
            stream.write_bits(0, 4)?;
        }
        if self.version < 2 {
            // unsigned int(16) item_count;
            stream.write_u16(u16_from_usize(self.locations.len())?)?;
        } else {
            // unsigned int(32) item_count;
            stream.write_u32(u32_from_usize(self.locations.len())?)?;
        }
        for location in &self.locations {
            location.write(stream, self.version, &self.sizes)?;
        }
        stream.finish_box()
    }

    pub fn parse(stream: &mut IStream) -> HeifResult<Self> {
        let mut stream = expect_box(stream, "iloc")?;
        let (version, flags) = stream.read_version_and_flags()?;
        if version > 2 {
            return HeifError::malformed_stream(format!("invalid iloc version {version}"));
        }
        let mut iloc = ItemLocationBox {
            version,
            flags,
            ..Default::default()
        };
        let mut bits = stream.sub_bit_stream(2)?;
        // unsigned int(4) offset_size;
        iloc.sizes.offset_size = bits.read(4)? as u8;
        // unsigned int(4) length_size;
        iloc.sizes.length_size = bits.read(4)? as u8;
        // unsigned int(4) base_offset_size;
        iloc.sizes.base_offset_size = bits.read(4)? as u8;
        if version >= 1 {
            // unsigned int(4) index_size;
            iloc.sizes.index_size = bits.read(4)? as u8;
        } else {
            // unsigned int(4) reserved;
            bits.skip(4)?;
        }
        if let Err(err) = iloc.sizes.validate() {
            return HeifError::malformed_stream(format!("invalid field size in iloc: {err}"));
        }
        let item_count: u32 = if version < 2 {
            // unsigned int(16) item_count;
            stream.read_u16()? as u32
        } else {
            // unsigned int(32) item_count;
            stream.read_u32()?
        };
        for _ in 0..item_count {
            let location = ItemLocation::parse(&mut stream, version, &iloc.sizes)?;
            if iloc.has_item_id_entry(location.item_id) {
                log::warn!(
                    "duplicate iloc entry for item {}, the first one is used",
                    location.item_id
                );
            }
            iloc.push_location(location);
        }
        if stream.has_bytes_left()? {
            log::debug!("{} trailing bytes in iloc", stream.bytes_left()?);
        }
        Ok(iloc)
    }
}
