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

//! Item properties box ('iprp'): the property container ('ipco') and the item to property
//! associations ('ipma').

use crate::internal_utils::stream::*;
use crate::internal_utils::*;
use crate::mp4box::*;
use crate::utils::clap::CleanAperture;
use crate::*;

use std::collections::BTreeMap;

/// Highest property index representable in 'ipma' (15-bit form).
const MAX_PROPERTY_INDEX: usize = 0x7FFF;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ImageSpatialExtents {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RelativeLocation {
    pub horizontal_offset: u32,
    pub vertical_offset: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ItemProperty {
    ImageSpatialExtents(ImageSpatialExtents),
    /// Anti-clockwise rotation in units of 90 degrees (0..=3).
    ImageRotation(u8),
    RelativeLocation(RelativeLocation),
    CleanAperture(CleanAperture),
    /// Any other property, such as a decoder configuration ('hvcC', 'av1C'). The payload is
    /// everything after the box header.
    Unknown { box_type: String, payload: Vec<u8> },
}

impl ItemProperty {
    pub fn box_type(&self) -> &str {
        match self {
            Self::ImageSpatialExtents(_) => "ispe",
            Self::ImageRotation(_) => "irot",
            Self::RelativeLocation(_) => "rloc",
            Self::CleanAperture(_) => "clap",
            Self::Unknown { box_type, .. } => box_type,
        }
    }

    pub fn validate(&self) -> HeifResult<()> {
        match self {
            Self::ImageRotation(angle) if *angle > 3 => HeifError::precondition_violation(
                format!("invalid irot angle {angle}"),
            ),
            Self::CleanAperture(clap) => clap.is_valid(),
            Self::Unknown { box_type, .. } if box_type.len() != 4 => {
                HeifError::precondition_violation(format!("invalid property type '{box_type}'"))
            }
            _ => Ok(()),
        }
    }

    fn write(&self, stream: &mut OStream) -> HeifResult<()> {
        match self {
            Self::ImageSpatialExtents(ispe) => {
                stream.start_full_box("ispe", (0, 0))?;
                // unsigned int(32) image_width;
                stream.write_u32(ispe.width)?;
                // unsigned int(32) image_height;
                stream.write_u32(ispe.height)?;
            }
            Self::ImageRotation(angle) => {
                stream.start_box("irot")?;
                // unsigned int(6) reserved = 0;
                stream.write_bits(0, 6)?;
                // unsigned int(2) angle;
                stream.write_bits((*angle).into(), 2)?;
            }
            Self::RelativeLocation(rloc) => {
                stream.start_full_box("rloc", (0, 0))?;
                // unsigned int(32) horizontal_offset;
                stream.write_u32(rloc.horizontal_offset)?;
                // unsigned int(32) vertical_offset;
                stream.write_u32(rloc.vertical_offset)?;
            }
            Self::CleanAperture(clap) => {
                stream.start_box("clap")?;
                // unsigned int(32) cleanApertureWidthN;
                // unsigned int(32) cleanApertureWidthD;
                stream.write_ufraction(clap.width)?;
                // unsigned int(32) cleanApertureHeightN;
                // unsigned int(32) cleanApertureHeightD;
                stream.write_ufraction(clap.height)?;
                // int(32) horizOffN;
                // unsigned int(32) horizOffD;
                stream.write_fraction(clap.horiz_off)?;
                // int(32) vertOffN;
                // unsigned int(32) vertOffD;
                stream.write_fraction(clap.vert_off)?;
            }
            Self::Unknown { box_type, payload } => {
                stream.start_box(box_type)?;
                stream.write_slice(payload)?;
            }
        }
        stream.finish_box()
    }

    fn parse(stream: &mut IStream) -> HeifResult<Self> {
        let header = parse_header(stream, false)?;
        let mut stream = stream.sub_stream(&header.size)?;
        let property = match header.box_type.as_str() {
            "ispe" => {
                let (_version, _flags) = stream.read_version_and_flags()?;
                Self::ImageSpatialExtents(ImageSpatialExtents {
                    // unsigned int(32) image_width;
                    width: stream.read_u32()?,
                    // unsigned int(32) image_height;
                    height: stream.read_u32()?,
                })
            }
            "irot" => {
                let mut bits = stream.sub_bit_stream(1)?;
                // unsigned int(6) reserved = 0;
                if bits.read(6)? != 0 {
                    return HeifError::malformed_stream("invalid reserved bits in irot");
                }
                // unsigned int(2) angle;
                Self::ImageRotation(bits.read(2)? as u8)
            }
            "rloc" => {
                let (_version, _flags) = stream.read_version_and_flags()?;
                Self::RelativeLocation(RelativeLocation {
                    // unsigned int(32) horizontal_offset;
                    horizontal_offset: stream.read_u32()?,
                    // unsigned int(32) vertical_offset;
                    vertical_offset: stream.read_u32()?,
                })
            }
            "clap" => Self::CleanAperture(CleanAperture {
                // unsigned int(32) cleanApertureWidthN;
                // unsigned int(32) cleanApertureWidthD;
                width: stream.read_ufraction()?,
                // unsigned int(32) cleanApertureHeightN;
                // unsigned int(32) cleanApertureHeightD;
                height: stream.read_ufraction()?,
                // int(32) horizOffN;
                // unsigned int(32) horizOffD;
                horiz_off: stream.read_fraction()?,
                // int(32) vertOffN;
                // unsigned int(32) vertOffD;
                vert_off: stream.read_fraction()?,
            }),
            _ => {
                let size = stream.bytes_left()?;
                Self::Unknown {
                    box_type: header.box_type,
                    payload: stream.get_slice(size)?.to_vec(),
                }
            }
        };
        Ok(property)
    }
}

/// Property index and essential bit, as stored in 'ipma'. Indices are 1-based.
pub type PropertyAssociation = (u16, bool);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemPropertiesBox {
    properties: Vec<ItemProperty>,
    // Sorted by item id, as 'ipma' requires.
    associations: BTreeMap<ItemId, Vec<PropertyAssociation>>,
}

impl ItemPropertiesBox {
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.associations.is_empty()
    }

    pub fn properties(&self) -> &[ItemProperty] {
        &self.properties
    }

    /// Returns the property at the 1-based `property_index`.
    pub fn property(&self, property_index: u16) -> HeifResult<&ItemProperty> {
        match (property_index as usize)
            .checked_sub(1)
            .and_then(|i| self.properties.get(i))
        {
            Some(property) => Ok(property),
            None => HeifError::out_of_range(),
        }
    }

    /// Adds `property` to 'ipco' unless an identical property is already present. Returns its
    /// 1-based index.
    pub fn add_property(&mut self, property: ItemProperty) -> HeifResult<u16> {
        property.validate()?;
        if let Some(position) = self.properties.iter().position(|p| *p == property) {
            return u16_from_usize(position + 1);
        }
        if self.properties.len() >= MAX_PROPERTY_INDEX {
            return HeifError::precondition_violation("too many properties in ipco");
        }
        self.properties.push(property);
        u16_from_usize(self.properties.len())
    }

    pub fn associate(
        &mut self,
        item_id: ItemId,
        property_index: u16,
        essential: bool,
    ) -> HeifResult<()> {
        if item_id == 0 {
            return HeifError::precondition_violation("item id 0 is reserved");
        }
        if property_index == 0 || property_index as usize > self.properties.len() {
            return HeifError::precondition_violation(format!(
                "no property at index {property_index}"
            ));
        }
        let associations = self.associations.entry(item_id).or_default();
        if associations.iter().any(|(index, _)| *index == property_index) {
            log::debug!("property {property_index} is already associated with item {item_id}");
            return Ok(());
        }
        if associations.len() >= u8::MAX as usize {
            return HeifError::precondition_violation(format!(
                "too many properties for item {item_id}"
            ));
        }
        associations.push((property_index, essential));
        Ok(())
    }

    pub fn associations_for(&self, item_id: ItemId) -> &[PropertyAssociation] {
        match self.associations.get(&item_id) {
            Some(associations) => associations,
            None => &[],
        }
    }

    /// Properties of `item_id` in association order, with their essential bit.
    pub fn properties_for(&self, item_id: ItemId) -> HeifResult<Vec<(&ItemProperty, bool)>> {
        let mut properties = Vec::new();
        for (index, essential) in self.associations_for(item_id) {
            properties.push((self.property(*index)?, *essential));
        }
        Ok(properties)
    }

    /// Index of the first property of `box_type` associated with `item_id`.
    pub fn find_property_index(&self, item_id: ItemId, box_type: &str) -> HeifResult<u16> {
        for (index, _) in self.associations_for(item_id) {
            if self.property(*index)?.box_type() == box_type {
                return Ok(*index);
            }
        }
        HeifError::not_found()
    }

    pub fn find_ispe_index(&self, item_id: ItemId) -> HeifResult<u16> {
        self.find_property_index(item_id, "ispe")
    }

    pub fn spatial_extents(&self, item_id: ItemId) -> HeifResult<ImageSpatialExtents> {
        match self.property(self.find_ispe_index(item_id)?)? {
            ItemProperty::ImageSpatialExtents(ispe) => Ok(*ispe),
            _ => HeifError::unknown_error("ispe index points to another property"),
        }
    }

    fn write_ipma(&self, stream: &mut OStream) -> HeifResult<()> {
        let version = match self.associations.keys().last() {
            Some(item_id) if *item_id > 0xFFFF => 1,
            _ => 0,
        };
        let flags = if self.properties.len() > 0x7F { 1 } else { 0 };
        stream.start_full_box("ipma", (version, flags))?;
        // unsigned int(32) entry_count;
        stream.write_u32(u32_from_usize(self.associations.len())?)?;
        for (item_id, associations) in &self.associations {
            if version == 0 {
                // unsigned int(16) item_ID;
                stream.write_u16(u16_from_u32(*item_id)?)?;
            } else {
                // unsigned int(32) item_ID;
                stream.write_u32(*item_id)?;
            }
            // unsigned int(8) association_count;
            stream.write_u8(u8_from_usize(associations.len())?)?;
            for (property_index, essential) in associations {
                // bit(1) essential;
                stream.write_bool(*essential)?;
                if flags == 1 {
                    // unsigned int(15) property_index;
                    stream.write_bits((*property_index).into(), 15)?;
                } else {
                    // unsigned int(7) property_index;
                    stream.write_bits((*property_index).into(), 7)?;
                }
            }
        }
        stream.finish_box()
    }

    pub fn write(&self, stream: &mut OStream) -> HeifResult<()> {
        stream.start_box("iprp")?;
        stream.start_box("ipco")?;
        for property in &self.properties {
            property.write(stream)?;
        }
        stream.finish_box()?;
        self.write_ipma(stream)?;
        stream.finish_box()
    }

    fn parse_ipma(&mut self, stream: &mut IStream) -> HeifResult<()> {
        let (version, flags) = stream.read_version_and_flags()?;
        // unsigned int(32) entry_count;
        let entry_count = stream.read_u32()?;
        for _ in 0..entry_count {
            let item_id = if version < 1 {
                // unsigned int(16) item_ID;
                stream.read_u16()? as u32
            } else {
                // unsigned int(32) item_ID;
                stream.read_u32()?
            };
            if item_id == 0 {
                return HeifError::malformed_stream("invalid item id in ipma");
            }
            // ISO/IEC 23008-12, Section 9.3.1:
            //   there shall be at most one association box for each item_ID, in any
            //   ItemPropertyAssociation box.
            if self.associations.contains_key(&item_id) {
                return HeifError::malformed_stream(format!(
                    "multiple ipma entries for item {item_id}"
                ));
            }
            // unsigned int(8) association_count;
            let association_count = stream.read_u8()?;
            let mut associations = Vec::new();
            for _ in 0..association_count {
                let essential;
                let property_index;
                if (flags & 0x1) == 1 {
                    let mut bits = stream.sub_bit_stream(2)?;
                    // bit(1) essential;
                    essential = bits.read_bool()?;
                    // unsigned int(15) property_index;
                    property_index = bits.read(15)? as u16;
                } else {
                    let mut bits = stream.sub_bit_stream(1)?;
                    // bit(1) essential;
                    essential = bits.read_bool()?;
                    // unsigned int(7) property_index;
                    property_index = bits.read(7)? as u16;
                }
                // Index 0 means that the association has no property.
                if property_index as usize > self.properties.len() {
                    return HeifError::malformed_stream(format!(
                        "ipma references property {property_index} which is not in ipco"
                    ));
                }
                associations.push((property_index, essential));
            }
            self.associations.insert(item_id, associations);
        }
        Ok(())
    }

    pub fn parse(stream: &mut IStream) -> HeifResult<Self> {
        let mut stream = expect_box(stream, "iprp")?;
        let mut iprp = ItemPropertiesBox::default();
        {
            let mut ipco = expect_box(&mut stream, "ipco")?;
            while ipco.has_bytes_left()? {
                iprp.properties.push(ItemProperty::parse(&mut ipco)?);
            }
        }
        while stream.has_bytes_left()? {
            let mut ipma = expect_box(&mut stream, "ipma")?;
            iprp.parse_ipma(&mut ipma)?;
        }
        Ok(iprp)
    }
}
