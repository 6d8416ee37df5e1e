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
use crate::mp4box::*;
use crate::*;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemInfoEntry {
    pub item_id: ItemId,
    pub item_protection_index: u16,
    pub item_type: String,
    pub item_name: String,
    // Only used when item_type is "mime".
    pub content_type: String,
    // (flags & 1) of the infe box. Hidden items are not intended to be displayed.
    pub hidden: bool,
}

impl ItemInfoEntry {
    pub fn create(item_id: ItemId, item_type: &str) -> Self {
        Self {
            item_id,
            item_type: item_type.into(),
            ..Default::default()
        }
    }

    fn write(&self, stream: &mut OStream) -> HeifResult<()> {
        let version = if self.item_id > 0xFFFF { 3 } else { 2 };
        let flags = if self.hidden { 1 } else { 0 };
        stream.start_full_box("infe", (version, flags))?;
        if version == 2 {
            // unsigned int(16) item_ID;
            stream.write_u16(u16_from_u32(self.item_id)?)?;
        } else {
            // unsigned int(32) item_ID;
            stream.write_u32(self.item_id)?;
        }
        // unsigned int(16) item_protection_index;
        stream.write_u16(self.item_protection_index)?;
        // unsigned int(32) item_type;
        stream.write_str(&self.item_type)?;
        // utf8string item_name;
        stream.write_str_with_nul(&self.item_name)?;
        if self.item_type == "mime" {
            // utf8string content_type;
            stream.write_str_with_nul(&self.content_type)?;
        }
        stream.finish_box()
    }

    fn parse(stream: &mut IStream) -> HeifResult<Self> {
        let (version, flags) = stream.read_version_and_flags()?;
        if version != 2 && version != 3 {
            return HeifError::malformed_stream(format!(
                "infe version {version} is not supported"
            ));
        }
        let mut entry = ItemInfoEntry {
            hidden: (flags & 1) == 1,
            ..Default::default()
        };
        entry.item_id = if version == 2 {
            // unsigned int(16) item_ID;
            stream.read_u16()? as u32
        } else {
            // unsigned int(32) item_ID;
            stream.read_u32()?
        };
        if entry.item_id == 0 {
            return HeifError::malformed_stream("invalid item id in infe");
        }
        // unsigned int(16) item_protection_index;
        entry.item_protection_index = stream.read_u16()?;
        // unsigned int(32) item_type;
        entry.item_type = stream.read_string(4)?;
        // Some writers omit the name altogether.
        if stream.has_bytes_left()? {
            // utf8string item_name;
            entry.item_name = stream.read_c_string()?;
        }
        if entry.item_type == "mime" && stream.has_bytes_left()? {
            // utf8string content_type;
            entry.content_type = stream.read_c_string()?;
        }
        Ok(entry)
    }
}

/// Item information box ('iinf'), one 'infe' entry per item, in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemInfoBox {
    entries: Vec<ItemInfoEntry>,
}

impl ItemInfoBox {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ItemInfoEntry] {
        &self.entries
    }

    pub fn item_ids(&self) -> Vec<ItemId> {
        self.entries.iter().map(|entry| entry.item_id).collect()
    }

    pub fn has_entry(&self, item_id: ItemId) -> bool {
        self.entries.iter().any(|entry| entry.item_id == item_id)
    }

    pub fn entry(&self, item_id: ItemId) -> HeifResult<&ItemInfoEntry> {
        match self.entries.iter().find(|entry| entry.item_id == item_id) {
            Some(entry) => Ok(entry),
            None => HeifError::not_found(),
        }
    }

    pub fn add_entry(&mut self, item_id: ItemId, item_type: &str) -> HeifResult<()> {
        self.add_item_info(ItemInfoEntry::create(item_id, item_type))
    }

    pub fn add_entry_with_name(
        &mut self,
        item_id: ItemId,
        item_type: &str,
        item_name: &str,
    ) -> HeifResult<()> {
        let mut entry = ItemInfoEntry::create(item_id, item_type);
        entry.item_name = item_name.into();
        self.add_item_info(entry)
    }

    pub fn add_item_info(&mut self, entry: ItemInfoEntry) -> HeifResult<()> {
        if entry.item_id == 0 {
            return HeifError::precondition_violation("item id 0 is reserved");
        }
        if entry.item_type.len() != 4 {
            return HeifError::precondition_violation(format!(
                "invalid item type '{}'",
                entry.item_type
            ));
        }
        if self.has_entry(entry.item_id) {
            return HeifError::precondition_violation(format!(
                "item {} already has an infe entry",
                entry.item_id
            ));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn set_hidden(&mut self, item_id: ItemId, hidden: bool) -> HeifResult<()> {
        match self.entries.iter_mut().find(|entry| entry.item_id == item_id) {
            Some(entry) => {
                entry.hidden = hidden;
                Ok(())
            }
            None => HeifError::not_found(),
        }
    }

    pub fn write(&self, stream: &mut OStream) -> HeifResult<()> {
        let version = if self.entries.len() > 0xFFFF { 1 } else { 0 };
        stream.start_full_box("iinf", (version, 0))?;
        if version == 0 {
            // unsigned int(16) entry_count;
            stream.write_u16(u16_from_usize(self.entries.len())?)?;
        } else {
            // unsigned int(32) entry_count;
            stream.write_u32(u32_from_usize(self.entries.len())?)?;
        }
        for entry in &self.entries {
            entry.write(stream)?;
        }
        stream.finish_box()
    }

    pub fn parse(stream: &mut IStream) -> HeifResult<Self> {
        let mut stream = expect_box(stream, "iinf")?;
        let (version, _flags) = stream.read_version_and_flags()?;
        let entry_count: u32 = if version == 0 {
            // unsigned int(16) entry_count;
            stream.read_u16()? as u32
        } else {
            // unsigned int(32) entry_count;
            stream.read_u32()?
        };
        let mut iinf = ItemInfoBox::default();
        for _ in 0..entry_count {
            let mut sub_stream = expect_box(&mut stream, "infe")?;
            let entry = ItemInfoEntry::parse(&mut sub_stream)?;
            if iinf.has_entry(entry.item_id) {
                return HeifError::malformed_stream(format!(
                    "duplicate infe entry for item {}",
                    entry.item_id
                ));
            }
            iinf.entries.push(entry);
        }
        if stream.has_bytes_left()? {
            log::debug!("{} trailing bytes in iinf", stream.bytes_left()?);
        }
        Ok(iinf)
    }
}
