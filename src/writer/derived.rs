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

//! Writer of derived images: 'grid' (ImageGrid), 'iovl' (ImageOverlay) and 'iden' (identity
//! transformation) items, and 'base' references of pre-derived images.
//!
//! A call to [`DerivedImageWriter::write`] resolves every (context, index) reference of the
//! configuration to an item id, synthesizes the grid and overlay payloads, allocates item ids and
//! emits the matching 'iinf', 'iref', 'iprp' and 'iloc' entries. All of it is prepared on a
//! staged copy of the meta box and committed at the very end, so a failed call leaves the meta
//! box and the media data untouched.

use crate::internal_utils::*;
use crate::mp4box::iloc::*;
use crate::mp4box::iprp::*;
use crate::mp4box::mdat::MediaDataBox;
use crate::mp4box::meta::MetaBox;
use crate::writer::config::*;
use crate::writer::payload::*;
use crate::*;

use std::collections::BTreeMap;

/// For each context, the item ids of its images. Position i holds the image of 1-based index
/// i + 1.
pub type ReferenceToItemIdMap = BTreeMap<UniqBsid, Vec<ItemId>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DerivationType {
    Grid,
    Overlay,
    Identity,
}

impl DerivationType {
    pub fn item_type(&self) -> &'static str {
        match self {
            Self::Grid => "grid",
            Self::Overlay => "iovl",
            Self::Identity => "iden",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivationInfo {
    pub uniq_bsid: UniqBsid,
    pub refs_list: Vec<UniqBsid>,
    pub index_list: Vec<u32>,
    /// Ids of the items created for this derivation. One for 'grid' and 'iovl', one per
    /// reference for 'iden'.
    pub item_ids: Vec<ItemId>,
    /// Resolved `refs_list` / `index_list` pairs, in the same order.
    pub reference_item_ids: Vec<ItemId>,
    pub derivation_type: DerivationType,
}

pub type DerivationMap = BTreeMap<UniqBsid, DerivationInfo>;

// Where the payload of a new item landed in the media data.
#[derive(Clone, Copy, Debug)]
struct SynthesizedLocation {
    offset: u64,
    length: u64,
    item_id: ItemId,
}

#[derive(Clone, Copy, Debug)]
enum DerivationSource<'a> {
    Identity(&'a IdentityConfig),
    Grid(&'a GridConfig),
    Overlay(&'a OverlayConfig),
}

/// New entries not yet visible to the caller.
struct StagedDerivations {
    meta: MetaBox,
    media: Vec<u8>,
    // Length of the media data when staging started.
    media_start: u64,
}

impl StagedDerivations {
    fn append_media(&mut self, bytes: &[u8]) -> HeifResult<SynthesizedLocation> {
        let offset = checked_add!(self.media_start, u64_from_usize(self.media.len())?)?;
        self.media
            .try_reserve(bytes.len())
            .or(Err(HeifError::OutOfMemory))?;
        self.media.extend_from_slice(bytes);
        Ok(SynthesizedLocation {
            offset,
            length: u64_from_usize(bytes.len())?,
            item_id: 0,
        })
    }
}

fn create_reference_to_item_id_map(meta: &MetaBox) -> ReferenceToItemIdMap {
    meta.contexts().clone()
}

fn resolve_reference(
    map: &ReferenceToItemIdMap,
    uniq_bsid: UniqBsid,
    index: u32,
) -> HeifResult<ItemId> {
    let item_id = map
        .get(&uniq_bsid)
        .and_then(|item_ids| (index as usize).checked_sub(1).and_then(|i| item_ids.get(i)));
    match item_id {
        Some(item_id) => Ok(*item_id),
        None => HeifError::reference_not_found(format!(
            "no image of index {index} in context {uniq_bsid}"
        )),
    }
}

fn resolve_references(
    map: &ReferenceToItemIdMap,
    refs_list: &[UniqBsid],
    index_list: &[u32],
) -> HeifResult<Vec<ItemId>> {
    if refs_list.len() != index_list.len() {
        return HeifError::precondition_violation(format!(
            "{} context references but {} indices",
            refs_list.len(),
            index_list.len()
        ));
    }
    refs_list
        .iter()
        .zip(index_list)
        .map(|(uniq_bsid, index)| resolve_reference(map, *uniq_bsid, *index))
        .collect()
}

/// Associates the 'ispe' property of `from_item_ids[i]` with `to_item_ids[i]`.
fn link_ispe_properties(
    iprp: &mut ItemPropertiesBox,
    from_item_ids: &[ItemId],
    to_item_ids: &[ItemId],
) -> HeifResult<()> {
    if from_item_ids.len() != to_item_ids.len() {
        return HeifError::precondition_violation(format!(
            "cannot link the ispe of {} items to {} items",
            from_item_ids.len(),
            to_item_ids.len()
        ));
    }
    for (from_item_id, to_item_id) in from_item_ids.iter().zip(to_item_ids) {
        let index = match iprp.find_ispe_index(*from_item_id) {
            Ok(index) => index,
            Err(HeifError::NotFound) => {
                return HeifError::precondition_violation(format!(
                    "item {from_item_id} has no ispe property"
                ))
            }
            Err(err) => return Err(err),
        };
        iprp.associate(*to_item_id, index, false)?;
    }
    Ok(())
}

pub struct DerivedImageWriter<'a> {
    config: &'a DerivedConfig,
}

impl<'a> DerivedImageWriter<'a> {
    pub fn create(config: &'a DerivedConfig) -> Self {
        Self { config }
    }

    fn sources(&self) -> BTreeMap<UniqBsid, DerivationSource<'a>> {
        let mut sources = BTreeMap::new();
        for identity in &self.config.identities {
            sources.insert(identity.uniq_bsid, DerivationSource::Identity(identity));
        }
        for grid in &self.config.grids {
            sources.insert(grid.uniq_bsid, DerivationSource::Grid(grid));
        }
        for overlay in &self.config.overlays {
            sources.insert(overlay.uniq_bsid, DerivationSource::Overlay(overlay));
        }
        sources
    }

    fn process_derivations(
        sources: &BTreeMap<UniqBsid, DerivationSource<'a>>,
    ) -> DerivationMap {
        let mut derivations = DerivationMap::new();
        for (uniq_bsid, source) in sources {
            let (refs_list, index_list, derivation_type) = match source {
                DerivationSource::Identity(c) => (&c.refs_list, &c.index_list, DerivationType::Identity),
                DerivationSource::Grid(c) => (&c.refs_list, &c.index_list, DerivationType::Grid),
                DerivationSource::Overlay(c) => (&c.refs_list, &c.index_list, DerivationType::Overlay),
            };
            derivations.insert(
                *uniq_bsid,
                DerivationInfo {
                    uniq_bsid: *uniq_bsid,
                    refs_list: refs_list.clone(),
                    index_list: index_list.clone(),
                    item_ids: Vec::new(),
                    reference_item_ids: Vec::new(),
                    derivation_type,
                },
            );
        }
        derivations
    }

    fn add_item_id_references(
        derivations: &mut DerivationMap,
        map: &ReferenceToItemIdMap,
    ) -> HeifResult<()> {
        for derivation in derivations.values_mut() {
            derivation.reference_item_ids =
                resolve_references(map, &derivation.refs_list, &derivation.index_list)?;
        }
        Ok(())
    }

    fn allocate_item_ids(derivations: &mut DerivationMap, first_item_id: ItemId) -> HeifResult<()> {
        let mut next_item_id = first_item_id;
        for derivation in derivations.values_mut() {
            let count = match derivation.derivation_type {
                DerivationType::Identity => derivation.reference_item_ids.len(),
                DerivationType::Grid | DerivationType::Overlay => 1,
            };
            for _ in 0..count {
                derivation.item_ids.push(next_item_id);
                checked_incr!(next_item_id, 1);
            }
        }
        Ok(())
    }

    fn synthesize(
        staged: &mut StagedDerivations,
        derivation: &DerivationInfo,
        source: &DerivationSource,
    ) -> HeifResult<Option<SynthesizedLocation>> {
        let payload = match source {
            DerivationSource::Identity(_) => return Ok(None),
            DerivationSource::Grid(grid) => ImageGrid {
                rows: grid.rows,
                columns: grid.columns,
                output_width: grid.output_width,
                output_height: grid.output_height,
            }
            .to_bytes()?,
            DerivationSource::Overlay(overlay) => ImageOverlay {
                canvas_fill_value: overlay.canvas_fill_value,
                output_width: overlay.output_width,
                output_height: overlay.output_height,
                offsets: overlay.offsets.clone(),
            }
            .to_bytes()?,
        };
        let mut location = staged.append_media(&payload)?;
        location.item_id = derivation.item_ids[0];
        Ok(Some(location))
    }

    fn iprp_write(
        meta: &mut MetaBox,
        derivation: &DerivationInfo,
        source: &DerivationSource,
    ) -> HeifResult<()> {
        match source {
            DerivationSource::Identity(identity) => {
                // Each 'iden' item has the size of the image it passes through.
                link_ispe_properties(
                    &mut meta.iprp,
                    &derivation.reference_item_ids,
                    &derivation.item_ids,
                )?;
                for transform in &identity.transforms {
                    let index = meta.iprp.add_property(transform.item_property()?)?;
                    for item_id in &derivation.item_ids {
                        meta.iprp.associate(*item_id, index, transform.essential)?;
                    }
                }
            }
            DerivationSource::Grid(GridConfig {
                output_width,
                output_height,
                ..
            })
            | DerivationSource::Overlay(OverlayConfig {
                output_width,
                output_height,
                ..
            }) => {
                let index = meta
                    .iprp
                    .add_property(ItemProperty::ImageSpatialExtents(ImageSpatialExtents {
                        width: *output_width,
                        height: *output_height,
                    }))?;
                meta.iprp.associate(derivation.item_ids[0], index, false)?;
            }
        }
        Ok(())
    }

    fn iref_write(meta: &mut MetaBox, derivation: &DerivationInfo) -> HeifResult<()> {
        match derivation.derivation_type {
            DerivationType::Identity => {
                for (item_id, reference_item_id) in derivation
                    .item_ids
                    .iter()
                    .zip(&derivation.reference_item_ids)
                {
                    meta.iref
                        .add_references_of_type(*item_id, "dimg", &[*reference_item_id])?;
                }
            }
            DerivationType::Grid | DerivationType::Overlay => {
                meta.iref.add_references_of_type(
                    derivation.item_ids[0],
                    "dimg",
                    &derivation.reference_item_ids,
                )?;
            }
        }
        Ok(())
    }

    fn iloc_write(
        meta: &mut MetaBox,
        derivation: &DerivationInfo,
        synthesized: Option<SynthesizedLocation>,
    ) -> HeifResult<()> {
        let mut locations = Vec::new();
        match synthesized {
            Some(synthesized) => {
                let mut location = ItemLocation::new(
                    u16_from_u32(synthesized.item_id)?,
                    ConstructionMethod::FileOffset,
                );
                location.add_extent(ItemLocationExtent::new(
                    synthesized.offset,
                    synthesized.length,
                ));
                locations.push(location);
            }
            None => {
                // The data of 'iden' items is inherited through their 'dimg' reference.
                for item_id in &derivation.item_ids {
                    let mut location =
                        ItemLocation::new(u16_from_u32(*item_id)?, ConstructionMethod::FileOffset);
                    location.add_extent(ItemLocationExtent::default());
                    locations.push(location);
                }
            }
        }
        for location in locations {
            meta.iloc.check_location(&location)?;
            meta.iloc.add_location(location)?;
        }
        Ok(())
    }

    fn insert_base_references(
        meta: &mut MetaBox,
        pre_derived: &PreDerivedConfig,
    ) -> HeifResult<()> {
        let map = create_reference_to_item_id_map(meta);
        let pre_item_ids =
            resolve_references(&map, &pre_derived.pre_refs_list, &pre_derived.pre_index_list)?;
        let base_item_ids =
            resolve_references(&map, &pre_derived.base_refs_list, &pre_derived.base_index_list)?;
        if base_item_ids.is_empty() {
            return Ok(());
        }
        for pre_item_id in pre_item_ids {
            meta.iref
                .add_references_of_type(pre_item_id, "base", &base_item_ids)?;
        }
        Ok(())
    }

    /// Adds the configured derived images to `meta`, appending grid and overlay payloads to
    /// `mdat`. Returns the derivations with their allocated and referenced item ids.
    ///
    /// On failure neither `meta` nor `mdat` is modified.
    pub fn write(&self, meta: &mut MetaBox, mdat: &mut MediaDataBox) -> HeifResult<DerivationMap> {
        self.config.validate()?;
        let sources = self.sources();
        for uniq_bsid in sources.keys() {
            if meta.has_context(*uniq_bsid) {
                return HeifError::precondition_violation(format!(
                    "context {uniq_bsid} already exists"
                ));
            }
        }

        let reference_map = create_reference_to_item_id_map(meta);
        let mut derivations = Self::process_derivations(&sources);
        Self::add_item_id_references(&mut derivations, &reference_map)?;
        Self::allocate_item_ids(&mut derivations, meta.next_item_id()?)?;

        let mut staged = StagedDerivations {
            meta: meta.clone(),
            media: Vec::new(),
            media_start: u64_from_usize(mdat.len())?,
        };
        for (uniq_bsid, derivation) in &derivations {
            let source = &sources[uniq_bsid];
            let synthesized = Self::synthesize(&mut staged, derivation, source)?;
            let item_type = derivation.derivation_type.item_type();
            for item_id in &derivation.item_ids {
                staged.meta.iinf.add_entry(*item_id, item_type)?;
            }
            Self::iref_write(&mut staged.meta, derivation)?;
            Self::iprp_write(&mut staged.meta, derivation, source)?;
            Self::iloc_write(&mut staged.meta, derivation, synthesized)?;
            for item_id in &derivation.item_ids {
                staged.meta.register_item(*uniq_bsid, *item_id)?;
            }
            log::debug!(
                "staged {} derivation {uniq_bsid}: items {:?} from {:?}",
                item_type,
                derivation.item_ids,
                derivation.reference_item_ids
            );
        }
        // Pre-derived images may be derived images created above.
        for pre_derived in &self.config.pre_derived {
            Self::insert_base_references(&mut staged.meta, pre_derived)?;
        }

        let offset = mdat.append(&staged.media)?;
        if offset != staged.media_start {
            return HeifError::unknown_error("media data changed while staging derivations");
        }
        *meta = staged.meta;
        Ok(derivations)
    }
}
