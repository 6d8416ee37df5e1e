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

/// One SingleItemTypeReferenceBox: typed edges from one item to an ordered list of items.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemReference {
    pub reference_type: String,
    pub from_item_id: ItemId,
    pub to_item_ids: Vec<ItemId>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemReferenceBox {
    references: Vec<ItemReference>,
}

impl ItemReferenceBox {
    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn references(&self) -> &[ItemReference] {
        &self.references
    }

    /// Adds edges `from_item_id -> to_item_ids` of `reference_type`. The target order is kept.
    /// Edges of an already known (from, type) pair are appended to the existing list.
    pub fn add_references_of_type(
        &mut self,
        from_item_id: ItemId,
        reference_type: &str,
        to_item_ids: &[ItemId],
    ) -> HeifResult<()> {
        if reference_type.len() != 4 {
            return HeifError::precondition_violation(format!(
                "invalid reference type '{reference_type}'"
            ));
        }
        if to_item_ids.is_empty() {
            return HeifError::precondition_violation(format!(
                "no '{reference_type}' target for item {from_item_id}"
            ));
        }
        if from_item_id == 0 || to_item_ids.contains(&0) {
            return HeifError::precondition_violation("item id 0 is reserved");
        }
        match self
            .references
            .iter_mut()
            .find(|r| r.from_item_id == from_item_id && r.reference_type == reference_type)
        {
            Some(reference) => {
                if reference.to_item_ids.len() + to_item_ids.len() > 0xFFFF {
                    return HeifError::precondition_violation("too many references");
                }
                reference.to_item_ids.extend_from_slice(to_item_ids);
            }
            None => {
                if to_item_ids.len() > 0xFFFF {
                    return HeifError::precondition_violation("too many references");
                }
                self.references.push(ItemReference {
                    reference_type: reference_type.into(),
                    from_item_id,
                    to_item_ids: to_item_ids.to_vec(),
                });
            }
        }
        Ok(())
    }

    /// Targets of the `reference_type` edges leaving `from_item_id`, in order. Empty if none.
    pub fn references_from(&self, from_item_id: ItemId, reference_type: &str) -> Vec<ItemId> {
        self.references
            .iter()
            .filter(|r| r.from_item_id == from_item_id && r.reference_type == reference_type)
            .flat_map(|r| r.to_item_ids.iter().copied())
            .collect()
    }

    /// Items that have a `reference_type` edge to `to_item_id`.
    pub fn referencing_items(&self, to_item_id: ItemId, reference_type: &str) -> Vec<ItemId> {
        let mut item_ids: Vec<ItemId> = Vec::new();
        for reference in &self.references {
            if reference.reference_type == reference_type
                && reference.to_item_ids.contains(&to_item_id)
                && !item_ids.contains(&reference.from_item_id)
            {
                item_ids.push(reference.from_item_id);
            }
        }
        item_ids
    }

    pub fn has_references_from(&self, from_item_id: ItemId, reference_type: &str) -> bool {
        self.references
            .iter()
            .any(|r| r.from_item_id == from_item_id && r.reference_type == reference_type)
    }

    fn version(&self) -> u8 {
        let large_id = self.references.iter().any(|r| {
            r.from_item_id > 0xFFFF || r.to_item_ids.iter().any(|id| *id > 0xFFFF)
        });
        if large_id {
            1
        } else {
            0
        }
    }

    pub fn write(&self, stream: &mut OStream) -> HeifResult<()> {
        let version = self.version();
        stream.start_full_box("iref", (version, 0))?;
        for reference in &self.references {
            stream.start_box(&reference.reference_type)?;
            if version == 0 {
                // unsigned int(16) from_item_ID;
                stream.write_u16(u16_from_u32(reference.from_item_id)?)?;
            } else {
                // unsigned int(32) from_item_ID;
                stream.write_u32(reference.from_item_id)?;
            }
            // unsigned int(16) reference_count;
            stream.write_u16(u16_from_usize(reference.to_item_ids.len())?)?;
            for to_item_id in &reference.to_item_ids {
                if version == 0 {
                    // unsigned int(16) to_item_ID;
                    stream.write_u16(u16_from_u32(*to_item_id)?)?;
                } else {
                    // unsigned int(32) to_item_ID;
                    stream.write_u32(*to_item_id)?;
                }
            }
            stream.finish_box()?;
        }
        stream.finish_box()
    }

    pub fn parse(stream: &mut IStream) -> HeifResult<Self> {
        let mut stream = expect_box(stream, "iref")?;
        let (version, _flags) = stream.read_version_and_flags()?;
        let mut iref = ItemReferenceBox::default();
        if version > 1 {
            log::warn!("ignoring iref box of unsupported version {version}");
            return Ok(iref);
        }
        while stream.has_bytes_left()? {
            let header = parse_header(&mut stream, false)?;
            let mut sub_stream = stream.sub_stream(&header.size)?;
            let from_item_id: u32 = if version == 0 {
                // unsigned int(16) from_item_ID;
                sub_stream.read_u16()? as u32
            } else {
                // unsigned int(32) from_item_ID;
                sub_stream.read_u32()?
            };
            if from_item_id == 0 {
                return HeifError::malformed_stream("invalid from_item_ID in iref");
            }
            // unsigned int(16) reference_count;
            let reference_count = sub_stream.read_u16()?;
            let mut to_item_ids = Vec::new();
            for _ in 0..reference_count {
                let to_item_id: u32 = if version == 0 {
                    // unsigned int(16) to_item_ID;
                    sub_stream.read_u16()? as u32
                } else {
                    // unsigned int(32) to_item_ID;
                    sub_stream.read_u32()?
                };
                if to_item_id == 0 {
                    return HeifError::malformed_stream("invalid to_item_ID in iref");
                }
                to_item_ids.push(to_item_id);
            }
            iref.references.push(ItemReference {
                reference_type: header.box_type,
                from_item_id,
                to_item_ids,
            });
        }
        Ok(iref)
    }
}
