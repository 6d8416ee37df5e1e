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

//! Declarative description of the derived images to add to a file.
//!
//! Every derivation names its source images as parallel `refs_list` / `index_list` sequences:
//! position k designates the image of 1-based index `index_list[k]` within the context
//! `refs_list[k]`.

use crate::mp4box::iprp::ItemProperty;
use crate::mp4box::iprp::RelativeLocation;
use crate::utils::clap::CleanAperture;
use crate::*;

use std::collections::HashSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransformProperty {
    /// Anti-clockwise rotation in degrees. Must be a multiple of 90.
    Rotation { angle: u32 },
    RelativeLocation { horizontal: u32, vertical: u32 },
    CleanAperture(CleanAperture),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transform {
    pub property: TransformProperty,
    pub essential: bool,
}

impl Transform {
    pub(crate) fn item_property(&self) -> HeifResult<ItemProperty> {
        let property = match self.property {
            TransformProperty::Rotation { angle } => {
                if angle % 90 != 0 {
                    return HeifError::precondition_violation(format!(
                        "rotation of {angle} degrees is not a multiple of 90"
                    ));
                }
                ItemProperty::ImageRotation(((angle / 90) % 4) as u8)
            }
            TransformProperty::RelativeLocation {
                horizontal,
                vertical,
            } => ItemProperty::RelativeLocation(RelativeLocation {
                horizontal_offset: horizontal,
                vertical_offset: vertical,
            }),
            TransformProperty::CleanAperture(clap) => ItemProperty::CleanAperture(clap),
        };
        property.validate()?;
        Ok(property)
    }
}

/// One 'iden' item per referenced image, each carrying the same transforms.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityConfig {
    pub uniq_bsid: UniqBsid,
    pub refs_list: Vec<UniqBsid>,
    pub index_list: Vec<u32>,
    pub transforms: Vec<Transform>,
}

/// One 'grid' item whose tiles are the referenced images, in row-major order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GridConfig {
    pub uniq_bsid: UniqBsid,
    pub refs_list: Vec<UniqBsid>,
    pub index_list: Vec<u32>,
    pub rows: u32,
    pub columns: u32,
    pub output_width: u32,
    pub output_height: u32,
}

/// One 'iovl' item layering the referenced images, bottom-most first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OverlayConfig {
    pub uniq_bsid: UniqBsid,
    pub refs_list: Vec<UniqBsid>,
    pub index_list: Vec<u32>,
    /// RGBA canvas color.
    pub canvas_fill_value: [u16; 4],
    pub output_width: u32,
    pub output_height: u32,
    /// (horizontal, vertical) position of each referenced image on the canvas.
    pub offsets: Vec<(i32, i32)>,
}

/// 'base' references from pre-derived images to the images they were computed from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreDerivedConfig {
    pub pre_refs_list: Vec<UniqBsid>,
    pub pre_index_list: Vec<u32>,
    pub base_refs_list: Vec<UniqBsid>,
    pub base_index_list: Vec<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DerivedConfig {
    pub identities: Vec<IdentityConfig>,
    pub grids: Vec<GridConfig>,
    pub overlays: Vec<OverlayConfig>,
    pub pre_derived: Vec<PreDerivedConfig>,
}

fn check_reference_lists(
    uniq_bsid: UniqBsid,
    refs_list: &[UniqBsid],
    index_list: &[u32],
) -> HeifResult<()> {
    if refs_list.len() != index_list.len() {
        return HeifError::precondition_violation(format!(
            "derivation {uniq_bsid} has {} context references but {} indices",
            refs_list.len(),
            index_list.len()
        ));
    }
    if refs_list.is_empty() {
        return HeifError::precondition_violation(format!(
            "derivation {uniq_bsid} references no image"
        ));
    }
    Ok(())
}

impl GridConfig {
    fn validate(&self) -> HeifResult<()> {
        check_reference_lists(self.uniq_bsid, &self.refs_list, &self.index_list)?;
        if !(1..=256).contains(&self.rows) || !(1..=256).contains(&self.columns) {
            return HeifError::precondition_violation(format!(
                "grid {} of {}x{} tiles",
                self.uniq_bsid, self.columns, self.rows
            ));
        }
        if (self.rows * self.columns) as usize != self.refs_list.len() {
            return HeifError::precondition_violation(format!(
                "grid {} has {} tiles but {} references",
                self.uniq_bsid,
                self.rows * self.columns,
                self.refs_list.len()
            ));
        }
        if self.output_width == 0 || self.output_height == 0 {
            return HeifError::precondition_violation(format!(
                "grid {} has an empty output size",
                self.uniq_bsid
            ));
        }
        Ok(())
    }
}

impl OverlayConfig {
    fn validate(&self) -> HeifResult<()> {
        check_reference_lists(self.uniq_bsid, &self.refs_list, &self.index_list)?;
        if self.offsets.len() != self.refs_list.len() {
            return HeifError::precondition_violation(format!(
                "overlay {} has {} offsets for {} references",
                self.uniq_bsid,
                self.offsets.len(),
                self.refs_list.len()
            ));
        }
        if self.output_width == 0 || self.output_height == 0 {
            return HeifError::precondition_violation(format!(
                "overlay {} has an empty output size",
                self.uniq_bsid
            ));
        }
        Ok(())
    }
}

impl IdentityConfig {
    fn validate(&self) -> HeifResult<()> {
        check_reference_lists(self.uniq_bsid, &self.refs_list, &self.index_list)?;
        for transform in &self.transforms {
            transform.item_property()?;
        }
        Ok(())
    }
}

impl PreDerivedConfig {
    fn validate(&self) -> HeifResult<()> {
        if self.pre_refs_list.len() != self.pre_index_list.len()
            || self.base_refs_list.len() != self.base_index_list.len()
        {
            return HeifError::precondition_violation(
                "pre-derived context references and indices differ in length",
            );
        }
        Ok(())
    }
}

impl DerivedConfig {
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
            && self.grids.is_empty()
            && self.overlays.is_empty()
            && self.pre_derived.is_empty()
    }

    /// Checks everything that can be checked without looking at the target file.
    pub fn validate(&self) -> HeifResult<()> {
        let mut uniq_bsids = HashSet::new();
        let all = self
            .identities
            .iter()
            .map(|c| c.uniq_bsid)
            .chain(self.grids.iter().map(|c| c.uniq_bsid))
            .chain(self.overlays.iter().map(|c| c.uniq_bsid));
        for uniq_bsid in all {
            if !uniq_bsids.insert(uniq_bsid) {
                return HeifError::precondition_violation(format!(
                    "uniq_bsid {uniq_bsid} is used by several derivations"
                ));
            }
        }
        for identity in &self.identities {
            identity.validate()?;
        }
        for grid in &self.grids {
            grid.validate()?;
        }
        for overlay in &self.overlays {
            overlay.validate()?;
        }
        for pre_derived in &self.pre_derived {
            pre_derived.validate()?;
        }
        Ok(())
    }
}
