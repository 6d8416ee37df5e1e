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
use crate::mp4box::iinf::*;
use crate::mp4box::iloc::*;
use crate::mp4box::iprp::*;
use crate::mp4box::iref::*;
use crate::mp4box::mdat::MediaDataBox;
use crate::mp4box::*;
use crate::*;

use std::collections::BTreeMap;
use std::collections::HashSet;

/// Context under which the items of a parsed file are registered, in 'iinf' order.
pub const ROOT_CONTEXT: UniqBsid = 0;

/// Pseudo item type selecting the images meant for display. See [`MetaBox::is_master`].
pub const MASTER_IMAGE: &str = "master";

const IMAGE_ITEM_TYPES: [&str; 7] = ["hvc1", "av01", "avc1", "jpeg", "grid", "iovl", "iden"];
const DECODER_CONFIG_TYPES: [&str; 4] = ["hvcC", "av1C", "avcC", "jpgC"];

// Bound on nested construction_method 2 (item offset) indirections.
const MAX_INDIRECTION_DEPTH: usize = 8;

// 'iden' items carry no data of their own and are located by a single {0, 0, 0} file extent.
// The same location on any other item means "the whole file".
fn is_identity_placeholder(iinf: &ItemInfoBox, location: &ItemLocation) -> bool {
    location.construction_method == ConstructionMethod::FileOffset
        && location.is_empty_equivalent()
        && iinf
            .entry(location.item_id.into())
            .is_ok_and(|entry| entry.item_type == "iden")
}

/// A coded image to store in the media data box. See [`MetaBox::add_coded_image`].
#[derive(Clone, Debug, Default)]
pub struct CodedImage<'a> {
    pub item_type: &'a str,
    pub width: u32,
    pub height: u32,
    pub decoder_config: Option<ItemProperty>,
    pub data: &'a [u8],
    pub hidden: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetaBox {
    pub handler_type: String,
    pub primary_item_id: Option<ItemId>,
    pub iinf: ItemInfoBox,
    pub iref: ItemReferenceBox,
    pub iprp: ItemPropertiesBox,
    pub iloc: ItemLocationBox,
    pub idat: Vec<u8>,
    // Item ids of each image context, in image order. Position i holds the image of 1-based
    // index i + 1.
    contexts: BTreeMap<UniqBsid, Vec<ItemId>>,
}

fn write_hdlr(stream: &mut OStream, handler_type: &str) -> HeifResult<()> {
    stream.start_full_box("hdlr", (0, 0))?;
    // unsigned int(32) pre_defined = 0;
    stream.write_u32(0)?;
    // unsigned int(32) handler_type;
    stream.write_str(handler_type)?;
    // const unsigned int(32)[3] reserved = 0;
    stream.write_u32(0)?;
    stream.write_u32(0)?;
    stream.write_u32(0)?;
    // string name;
    stream.write_str_with_nul("")?;
    stream.finish_box()
}

fn parse_hdlr(stream: &mut IStream) -> HeifResult<String> {
    let mut stream = expect_box(stream, "hdlr")?;
    let (_version, _flags) = stream.read_version_and_flags()?;
    // unsigned int(32) pre_defined = 0;
    if stream.read_u32()? != 0 {
        return HeifError::malformed_stream("invalid pre_defined value in hdlr");
    }
    // unsigned int(32) handler_type;
    let handler_type = stream.read_string(4)?;
    // const unsigned int(32)[3] reserved = 0;
    // string name;
    Ok(handler_type)
}

fn write_pitm(stream: &mut OStream, item_id: ItemId) -> HeifResult<()> {
    if item_id > 0xFFFF {
        stream.start_full_box("pitm", (1, 0))?;
        // unsigned int(32) item_ID;
        stream.write_u32(item_id)?;
    } else {
        stream.start_full_box("pitm", (0, 0))?;
        // unsigned int(16) item_ID;
        stream.write_u16(u16_from_u32(item_id)?)?;
    }
    stream.finish_box()
}

fn parse_pitm(stream: &mut IStream) -> HeifResult<ItemId> {
    let mut stream = expect_box(stream, "pitm")?;
    let (version, _flags) = stream.read_version_and_flags()?;
    let primary_item_id = if version == 0 {
        // unsigned int(16) item_ID;
        stream.read_u16()? as u32
    } else {
        // unsigned int(32) item_ID;
        stream.read_u32()?
    };
    Ok(primary_item_id)
}

impl MetaBox {
    pub fn create(settings: &IlocSettings) -> HeifResult<Self> {
        Ok(Self {
            handler_type: "pict".into(),
            primary_item_id: None,
            iinf: ItemInfoBox::default(),
            iref: ItemReferenceBox::default(),
            iprp: ItemPropertiesBox::default(),
            iloc: ItemLocationBox::create_with_settings(settings)?,
            idat: Vec::new(),
            contexts: BTreeMap::new(),
        })
    }

    pub fn contexts(&self) -> &BTreeMap<UniqBsid, Vec<ItemId>> {
        &self.contexts
    }

    pub fn has_context(&self, context: UniqBsid) -> bool {
        self.contexts.contains_key(&context)
    }

    /// Item ids of the images of `context`, in 1-based index order.
    pub fn context_item_ids(&self, context: UniqBsid) -> HeifResult<&[ItemId]> {
        match self.contexts.get(&context) {
            Some(item_ids) => Ok(item_ids),
            None => HeifError::not_found(),
        }
    }

    /// Appends `item_id` to the images of `context`. The item must have an 'infe' entry.
    pub fn register_item(&mut self, context: UniqBsid, item_id: ItemId) -> HeifResult<()> {
        if !self.iinf.has_entry(item_id) {
            return HeifError::precondition_violation(format!(
                "item {item_id} has no infe entry"
            ));
        }
        let item_ids = self.contexts.entry(context).or_default();
        if item_ids.contains(&item_id) {
            return HeifError::precondition_violation(format!(
                "item {item_id} is already registered in context {context}"
            ));
        }
        item_ids.push(item_id);
        Ok(())
    }

    /// Returns an item id that is not used by any entry of this box.
    pub fn next_item_id(&self) -> HeifResult<ItemId> {
        let max_item_id = self
            .iinf
            .item_ids()
            .into_iter()
            .chain(self.iloc.locations().iter().map(|l| l.item_id as ItemId))
            .chain(self.contexts.values().flatten().copied())
            .chain(self.primary_item_id)
            .max()
            .unwrap_or(0);
        checked_add!(max_item_id, 1)
    }

    pub fn set_primary_item(&mut self, item_id: ItemId) -> HeifResult<()> {
        if !self.iinf.has_entry(item_id) {
            return HeifError::not_found();
        }
        self.primary_item_id = Some(item_id);
        Ok(())
    }

    /// Stores `image` as a new item of `context`: its bytes are appended to `mdat` and the item
    /// gets 'infe', 'iloc' and 'ispe' entries (plus the decoder configuration, if any). Nothing is
    /// modified on failure.
    pub fn add_coded_image(
        &mut self,
        context: UniqBsid,
        image: &CodedImage,
        mdat: &mut MediaDataBox,
    ) -> HeifResult<ItemId> {
        if image.data.is_empty() {
            return HeifError::precondition_violation("coded image without data");
        }
        let item_id = self.next_item_id()?;
        let mut staged = self.clone();
        let mut info = ItemInfoEntry::create(item_id, image.item_type);
        info.hidden = image.hidden;
        staged.iinf.add_item_info(info)?;

        let ispe = staged
            .iprp
            .add_property(ItemProperty::ImageSpatialExtents(ImageSpatialExtents {
                width: image.width,
                height: image.height,
            }))?;
        staged.iprp.associate(item_id, ispe, false)?;
        if let Some(decoder_config) = &image.decoder_config {
            let index = staged.iprp.add_property(decoder_config.clone())?;
            staged.iprp.associate(item_id, index, true)?;
        }

        let mut location = ItemLocation::new(u16_from_u32(item_id)?, ConstructionMethod::FileOffset);
        location.add_extent(ItemLocationExtent::new(
            u64_from_usize(mdat.len())?,
            u64_from_usize(image.data.len())?,
        ));
        staged.iloc.check_location(&location)?;
        staged.iloc.add_location(location)?;
        staged.register_item(context, item_id)?;

        mdat.append(image.data)?;
        *self = staged;
        log::debug!("added {} item {item_id} to context {context}", image.item_type);
        Ok(item_id)
    }

    /// Whether `item_id` is an image meant for display: a coded or derived image that is not
    /// hidden and that is neither a thumbnail nor an auxiliary image.
    pub fn is_master(&self, item_id: ItemId) -> bool {
        let Ok(entry) = self.iinf.entry(item_id) else {
            return false;
        };
        !entry.hidden
            && IMAGE_ITEM_TYPES.contains(&entry.item_type.as_str())
            && !self.iref.has_references_from(item_id, "thmb")
            && !self.iref.has_references_from(item_id, "auxl")
    }

    /// Item ids of `context` whose type is `item_type`, or the master images of `context` when
    /// `item_type` is [`MASTER_IMAGE`].
    pub fn item_ids_by_type(&self, context: UniqBsid, item_type: &str) -> HeifResult<Vec<ItemId>> {
        let mut item_ids = Vec::new();
        for item_id in self.context_item_ids(context)? {
            let matches = if item_type == MASTER_IMAGE {
                self.is_master(*item_id)
            } else {
                self.iinf.entry(*item_id)?.item_type == item_type
            };
            if matches {
                item_ids.push(*item_id);
            }
        }
        Ok(item_ids)
    }

    /// Items with a `reference_type` reference to `item_id`, such as the thumbnails ("thmb") of
    /// a master image.
    pub fn referencing_items(&self, item_id: ItemId, reference_type: &str) -> Vec<ItemId> {
        self.iref.referencing_items(item_id, reference_type)
    }

    /// Concatenates the extents of `item_id`. `file_data` is the source of
    /// [`ConstructionMethod::FileOffset`] extents.
    pub fn item_data(&self, file_data: &[u8], item_id: ItemId) -> HeifResult<Vec<u8>> {
        self.item_data_impl(file_data, item_id, 0)
    }

    fn item_data_impl(&self, file_data: &[u8], item_id: ItemId, depth: usize) -> HeifResult<Vec<u8>> {
        if depth > MAX_INDIRECTION_DEPTH {
            return HeifError::malformed_stream(format!(
                "too many item offset indirections for item {item_id}"
            ));
        }
        let location = self.iloc.item_location_for_id(u16_from_u32(item_id)?)?;
        if is_identity_placeholder(&self.iinf, location) {
            return Ok(Vec::new());
        }
        let mut data: Vec<u8> = Vec::new();
        for extent in location.extents() {
            let referenced_data;
            let source: &[u8] = match location.construction_method {
                ConstructionMethod::FileOffset => file_data,
                ConstructionMethod::IdatOffset => &self.idat,
                ConstructionMethod::ItemOffset => {
                    let referenced_item_ids = self.iref.references_from(item_id, "iloc");
                    // An absent extent_index means the first reference.
                    let index = usize_from_u64(extent.extent_index.max(1))? - 1;
                    let Some(referenced_item_id) = referenced_item_ids.get(index) else {
                        return HeifError::malformed_stream(format!(
                            "item {item_id} has no iloc reference {}",
                            index + 1
                        ));
                    };
                    referenced_data = self.item_data_impl(file_data, *referenced_item_id, depth + 1)?;
                    &referenced_data
                }
            };
            let start = usize_from_u64(checked_add!(location.base_offset, extent.extent_offset)?)?;
            let end = if extent.extent_length == 0 {
                // A zero length means "until the end of the source".
                source.len()
            } else {
                checked_add!(start, usize_from_u64(extent.extent_length)?)?
            };
            if start > end || end > source.len() {
                return HeifError::malformed_stream(format!(
                    "extent {start}..{end} of item {item_id} exceeds its {} source bytes",
                    source.len()
                ));
            }
            data.try_reserve(end - start)
                .or(Err(HeifError::OutOfMemory))?;
            data.extend_from_slice(&source[start..end]);
        }
        Ok(data)
    }

    /// The decoder configuration payload of `item_id` ('hvcC', 'av1C', 'avcC' or 'jpgC')
    /// followed by the item data. Items without a decoder configuration yield their data only.
    pub fn item_data_with_decoder_config(
        &self,
        file_data: &[u8],
        item_id: ItemId,
    ) -> HeifResult<Vec<u8>> {
        let mut data = Vec::new();
        for (property, _essential) in self.iprp.properties_for(item_id)? {
            if let ItemProperty::Unknown { box_type, payload } = property {
                if DECODER_CONFIG_TYPES.contains(&box_type.as_str()) {
                    data.extend_from_slice(payload);
                    break;
                }
            }
        }
        data.extend(self.item_data(file_data, item_id)?);
        Ok(data)
    }

    /// Adds `delta` to every file offset location that addresses bytes. The base offset is used
    /// when it has room on the wire, the extent offsets otherwise.
    pub(crate) fn add_to_file_offsets(&mut self, delta: u64) -> HeifResult<()> {
        let use_base_offset = self.iloc.sizes().base_offset_size > 0;
        for location in self.iloc.locations_mut() {
            if location.construction_method != ConstructionMethod::FileOffset
                || is_identity_placeholder(&self.iinf, location)
            {
                continue;
            }
            if use_base_offset {
                checked_incr!(location.base_offset, delta);
            } else {
                for extent in location.extents_mut() {
                    checked_incr!(extent.extent_offset, delta);
                }
            }
        }
        self.iloc.validate()
    }

    /// Inverse of [`MetaBox::add_to_file_offsets`]. Fails if a location addresses bytes before
    /// `delta`.
    pub(crate) fn subtract_from_file_offsets(&mut self, delta: u64) -> HeifResult<()> {
        for location in self.iloc.locations_mut() {
            if location.construction_method != ConstructionMethod::FileOffset
                || is_identity_placeholder(&self.iinf, location)
            {
                continue;
            }
            if location.base_offset >= delta {
                location.base_offset -= delta;
                continue;
            }
            let remaining = delta - location.base_offset;
            location.base_offset = 0;
            for extent in location.extents_mut() {
                if extent.extent_offset < remaining {
                    return HeifError::malformed_stream(format!(
                        "item {} is not located in mdat",
                        location.item_id
                    ));
                }
                extent.extent_offset -= remaining;
            }
        }
        Ok(())
    }

    pub fn write(&self, stream: &mut OStream) -> HeifResult<()> {
        self.iloc.validate()?;
        stream.start_full_box("meta", (0, 0))?;
        write_hdlr(stream, &self.handler_type)?;
        if let Some(primary_item_id) = self.primary_item_id {
            write_pitm(stream, primary_item_id)?;
        }
        self.iloc.write(stream)?;
        self.iinf.write(stream)?;
        if !self.iref.is_empty() {
            self.iref.write(stream)?;
        }
        if !self.iprp.is_empty() {
            self.iprp.write(stream)?;
        }
        if !self.idat.is_empty() {
            stream.start_box("idat")?;
            stream.write_slice(&self.idat)?;
            stream.finish_box()?;
        }
        stream.finish_box()
    }

    pub fn parse(stream: &mut IStream) -> HeifResult<Self> {
        let mut stream = expect_box(stream, "meta")?;
        let (_version, _flags) = stream.read_version_and_flags()?;
        let mut meta = MetaBox {
            handler_type: parse_hdlr(&mut stream)?,
            primary_item_id: None,
            iinf: ItemInfoBox::default(),
            iref: ItemReferenceBox::default(),
            iprp: ItemPropertiesBox::default(),
            iloc: ItemLocationBox::default(),
            idat: Vec::new(),
            contexts: BTreeMap::new(),
        };
        let mut boxes_seen = HashSet::from([String::from("hdlr")]);
        while stream.has_bytes_left()? {
            let start_offset = stream.offset;
            let header = parse_header(&mut stream, false)?;
            if boxes_seen.contains(&header.box_type) {
                return HeifError::malformed_stream(format!(
                    "duplicate '{}' box in meta",
                    header.box_type
                ));
            }
            boxes_seen.insert(header.box_type.clone());
            let header_size = stream.offset - start_offset;
            match header.box_type.as_str() {
                "iloc" | "iinf" | "iref" | "iprp" | "pitm" => {
                    stream.rewind(header_size)?;
                    match header.box_type.as_str() {
                        "iloc" => meta.iloc = ItemLocationBox::parse(&mut stream)?,
                        "iinf" => meta.iinf = ItemInfoBox::parse(&mut stream)?,
                        "iref" => meta.iref = ItemReferenceBox::parse(&mut stream)?,
                        "iprp" => meta.iprp = ItemPropertiesBox::parse(&mut stream)?,
                        _ => meta.primary_item_id = Some(parse_pitm(&mut stream)?),
                    }
                }
                "idat" => {
                    let mut sub_stream = stream.sub_stream(&header.size)?;
                    let size = sub_stream.bytes_left()?;
                    meta.idat = sub_stream.get_slice(size)?.to_vec();
                }
                _ => {
                    log::debug!("skipping '{}' box in meta", header.box_type);
                    stream.sub_stream(&header.size)?;
                }
            }
        }
        for item_id in meta.iinf.item_ids() {
            meta.contexts.entry(ROOT_CONTEXT).or_default().push(item_id);
        }
        Ok(meta)
    }
}
