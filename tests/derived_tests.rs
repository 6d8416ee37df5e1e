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

use heif_meta::mp4box::iloc::*;
use heif_meta::mp4box::iprp::*;
use heif_meta::writer::config::*;
use heif_meta::writer::derived::DerivationType;
use heif_meta::writer::payload::*;
use heif_meta::writer::DerivedConfig;
use heif_meta::*;

mod utils;
use utils::*;

use test_case::test_case;
use test_case::test_matrix;

fn grid_config(uniq_bsid: UniqBsid, context: UniqBsid, rows: u32, columns: u32) -> GridConfig {
    let count = rows * columns;
    GridConfig {
        uniq_bsid,
        refs_list: vec![context; count as usize],
        index_list: (1..=count).collect(),
        rows,
        columns,
        output_width: TILE_WIDTH * columns,
        output_height: TILE_HEIGHT * rows,
    }
}

fn rotation(angle: u32) -> Transform {
    Transform {
        property: TransformProperty::Rotation { angle },
        essential: true,
    }
}

#[test]
fn grid_references_in_order() {
    // Items 1 to 9 belong to context 2 and items 10 to 13 to context 1.
    let mut file = create_file(&IlocSettings::default(), &[(2, 9), (1, 4)]);
    assert_eq!(file.meta.context_item_ids(1), Ok(&[10, 11, 12, 13][..]));
    let location_count = file.meta.iloc.item_count();

    let config = DerivedConfig {
        grids: vec![grid_config(100, 1, 2, 2)],
        ..Default::default()
    };
    let derivations = file.add_derived_images(&config).unwrap();

    let grid = &derivations[&100];
    assert_eq!(grid.derivation_type, DerivationType::Grid);
    assert_eq!(grid.reference_item_ids, vec![10, 11, 12, 13]);
    assert_eq!(grid.item_ids, vec![14]);
    assert_eq!(file.meta.iinf.entry(14).unwrap().item_type, "grid");
    assert_eq!(file.meta.iref.references_from(14, "dimg"), vec![10, 11, 12, 13]);
    assert_eq!(file.meta.context_item_ids(100), Ok(&[14][..]));

    // Exactly one new location, covering the grid descriptor.
    assert_eq!(file.meta.iloc.item_count(), location_count + 1);
    let location = file.meta.iloc.item_location_for_id(14).unwrap();
    assert_eq!(location.construction_method, ConstructionMethod::FileOffset);
    assert_eq!(location.extent_count(), 1);
    assert_eq!(location.total_length(), Ok(8));
    assert_eq!(
        ImageGrid::parse(&file.item_data(14).unwrap()),
        Ok(ImageGrid {
            rows: 2,
            columns: 2,
            output_width: 2 * TILE_WIDTH,
            output_height: 2 * TILE_HEIGHT,
        })
    );
    assert_eq!(
        file.meta.iprp.spatial_extents(14),
        Ok(ImageSpatialExtents {
            width: 2 * TILE_WIDTH,
            height: 2 * TILE_HEIGHT,
        })
    );
    // The tiles are untouched.
    assert_eq!(file.item_data(10), Ok(image_payload(1, 1)));
    assert!(file.meta.is_master(14));
}

#[test]
fn grid_tiles_from_several_contexts() {
    let mut file = create_file(&IlocSettings::default(), &[(1, 2), (2, 2)]);
    let config = DerivedConfig {
        grids: vec![GridConfig {
            uniq_bsid: 7,
            refs_list: vec![2, 1, 2, 1],
            index_list: vec![2, 2, 1, 1],
            rows: 2,
            columns: 2,
            output_width: 100,
            output_height: 100,
        }],
        ..Default::default()
    };
    let derivations = file.add_derived_images(&config).unwrap();
    assert_eq!(derivations[&7].reference_item_ids, vec![4, 2, 3, 1]);
    assert_eq!(file.meta.iref.references_from(5, "dimg"), vec![4, 2, 3, 1]);
}

#[test]
fn identity_links_spatial_extents() {
    let mut file = create_file(&IlocSettings::default(), &[(1, 3)]);
    let references = file.meta.iref.references().len();
    let config = DerivedConfig {
        identities: vec![IdentityConfig {
            uniq_bsid: 5,
            refs_list: vec![1],
            index_list: vec![2],
            transforms: vec![rotation(90)],
        }],
        ..Default::default()
    };
    let derivations = file.add_derived_images(&config).unwrap();
    assert_eq!(derivations[&5].item_ids, vec![4]);

    // The size property is shared with the source item.
    assert_eq!(
        file.meta.iprp.find_ispe_index(4),
        file.meta.iprp.find_ispe_index(2)
    );
    assert_eq!(
        file.meta.iprp.spatial_extents(4),
        Ok(ImageSpatialExtents {
            width: TILE_WIDTH,
            height: TILE_HEIGHT,
        })
    );
    // Exactly one 'dimg' edge of length 1.
    assert_eq!(file.meta.iref.references().len(), references + 1);
    assert_eq!(file.meta.iref.references_from(4, "dimg"), vec![2]);

    let properties = file.meta.iprp.properties_for(4).unwrap();
    assert!(properties.contains(&(&ItemProperty::ImageRotation(1), true)));

    let location = file.meta.iloc.item_location_for_id(4).unwrap();
    assert!(location.is_empty_equivalent());
    assert_eq!(file.item_data(4), Ok(Vec::new()));
    assert_eq!(file.meta.iinf.entry(4).unwrap().item_type, "iden");
}

#[test]
fn identity_per_reference() {
    let mut file = create_file(&IlocSettings::default(), &[(1, 2), (2, 1)]);
    let config = DerivedConfig {
        identities: vec![IdentityConfig {
            uniq_bsid: 3,
            refs_list: vec![1, 2, 1],
            index_list: vec![1, 1, 2],
            transforms: vec![
                rotation(180),
                Transform {
                    property: TransformProperty::RelativeLocation {
                        horizontal: 4,
                        vertical: 8,
                    },
                    essential: false,
                },
            ],
        }],
        ..Default::default()
    };
    let derivations = file.add_derived_images(&config).unwrap();
    assert_eq!(derivations[&3].item_ids, vec![4, 5, 6]);
    assert_eq!(derivations[&3].reference_item_ids, vec![1, 3, 2]);
    for (item_id, reference_item_id) in [(4, 1), (5, 3), (6, 2)] {
        assert_eq!(
            file.meta.iref.references_from(item_id, "dimg"),
            vec![reference_item_id]
        );
        assert_eq!(
            file.meta.iprp.find_ispe_index(item_id),
            file.meta.iprp.find_ispe_index(reference_item_id)
        );
        assert_eq!(
            file.meta.iprp.find_property_index(item_id, "irot"),
            file.meta.iprp.find_property_index(4, "irot")
        );
        assert!(file.meta.iprp.find_property_index(item_id, "rloc").is_ok());
    }
    // The transforms are stored once and shared by the three items.
    let irot_count = file
        .meta
        .iprp
        .properties()
        .iter()
        .filter(|property| property.box_type() == "irot")
        .count();
    assert_eq!(irot_count, 1);
}

#[test]
fn overlay() {
    let mut file = create_file(&IlocSettings::default(), &[(1, 2)]);
    let config = DerivedConfig {
        overlays: vec![OverlayConfig {
            uniq_bsid: 2,
            refs_list: vec![1, 1],
            index_list: vec![1, 2],
            canvas_fill_value: [0, 0, 0, 0xFFFF],
            output_width: 200,
            output_height: 120,
            offsets: vec![(0, 0), (-10, 20)],
        }],
        ..Default::default()
    };
    let derivations = file.add_derived_images(&config).unwrap();
    assert_eq!(derivations[&2].derivation_type, DerivationType::Overlay);
    assert_eq!(file.meta.iinf.entry(3).unwrap().item_type, "iovl");
    assert_eq!(file.meta.iref.references_from(3, "dimg"), vec![1, 2]);
    assert_eq!(
        ImageOverlay::parse(&file.item_data(3).unwrap(), 2),
        Ok(ImageOverlay {
            canvas_fill_value: [0, 0, 0, 0xFFFF],
            output_width: 200,
            output_height: 120,
            offsets: vec![(0, 0), (-10, 20)],
        })
    );
    assert_eq!(
        file.meta.iprp.spatial_extents(3),
        Ok(ImageSpatialExtents {
            width: 200,
            height: 120,
        })
    );
}

#[test]
fn pre_derived_base_references() {
    let mut file = create_file(&IlocSettings::default(), &[(1, 2)]);
    let config = DerivedConfig {
        grids: vec![GridConfig {
            uniq_bsid: 3,
            refs_list: vec![1, 1],
            index_list: vec![1, 2],
            rows: 1,
            columns: 2,
            output_width: 2 * TILE_WIDTH,
            output_height: TILE_HEIGHT,
        }],
        pre_derived: vec![PreDerivedConfig {
            pre_refs_list: vec![3],
            pre_index_list: vec![1],
            base_refs_list: vec![1, 1],
            base_index_list: vec![1, 2],
        }],
        ..Default::default()
    };
    file.add_derived_images(&config).unwrap();
    assert_eq!(file.meta.iref.references_from(3, "base"), vec![1, 2]);
    assert_eq!(file.meta.iref.references_from(3, "dimg"), vec![1, 2]);
    assert_eq!(file.meta.referencing_items(1, "base"), vec![3]);
    assert_eq!(file.meta.referencing_items(2, "dimg"), vec![3]);
}

#[test]
fn item_ids_follow_uniq_bsid_order() {
    let mut file = create_file(&IlocSettings::default(), &[(1, 4)]);
    let config = DerivedConfig {
        identities: vec![IdentityConfig {
            uniq_bsid: 9,
            refs_list: vec![1, 1],
            index_list: vec![3, 4],
            transforms: vec![rotation(270)],
        }],
        grids: vec![grid_config(4, 1, 2, 2)],
        ..Default::default()
    };
    let derivations = file.add_derived_images(&config).unwrap();
    assert_eq!(derivations[&4].item_ids, vec![5]);
    assert_eq!(derivations[&9].item_ids, vec![6, 7]);
    assert_eq!(file.meta.iinf.item_ids(), vec![1, 2, 3, 4, 5, 6, 7]);
}

#[test]
fn derived_images_of_derived_images() {
    let mut file = create_file(&IlocSettings::default(), &[(1, 4)]);
    let grid = DerivedConfig {
        grids: vec![grid_config(2, 1, 2, 2)],
        ..Default::default()
    };
    file.add_derived_images(&grid).unwrap();
    let rotated = DerivedConfig {
        identities: vec![IdentityConfig {
            uniq_bsid: 3,
            refs_list: vec![2],
            index_list: vec![1],
            transforms: vec![rotation(90)],
        }],
        ..Default::default()
    };
    let derivations = file.add_derived_images(&rotated).unwrap();
    assert_eq!(derivations[&3].reference_item_ids, vec![5]);
    assert_eq!(file.meta.iref.references_from(6, "dimg"), vec![5]);
    assert_eq!(
        file.meta.iprp.spatial_extents(6),
        file.meta.iprp.spatial_extents(5)
    );
}

#[test_case(vec![1, 1, 1], vec![1, 2]; "fewer_indices")]
#[test_case(vec![1], vec![1, 2]; "fewer_contexts")]
#[test_case(vec![], vec![]; "no_references")]
fn mismatched_lists_leave_file_unchanged(refs_list: Vec<UniqBsid>, index_list: Vec<u32>) {
    let mut file = create_file(&IlocSettings::default(), &[(1, 3)]);
    let before = file.clone();
    let sizes = collection_sizes(&file);
    let configs = [
        DerivedConfig {
            identities: vec![IdentityConfig {
                uniq_bsid: 2,
                refs_list: refs_list.clone(),
                index_list: index_list.clone(),
                transforms: vec![],
            }],
            ..Default::default()
        },
        DerivedConfig {
            overlays: vec![OverlayConfig {
                uniq_bsid: 2,
                refs_list: refs_list.clone(),
                index_list: index_list.clone(),
                output_width: 10,
                output_height: 10,
                offsets: vec![(0, 0); refs_list.len()],
                ..Default::default()
            }],
            ..Default::default()
        },
        DerivedConfig {
            pre_derived: vec![PreDerivedConfig {
                pre_refs_list: refs_list.clone(),
                pre_index_list: index_list.clone(),
                base_refs_list: vec![1],
                base_index_list: vec![1],
            }],
            ..Default::default()
        },
    ];
    for (i, config) in configs.iter().enumerate() {
        let result = file.add_derived_images(config);
        // An empty pre-derived list has nothing to link and is not an error.
        if i == 2 && refs_list.is_empty() {
            assert!(result.is_ok());
            continue;
        }
        assert!(
            matches!(result, Err(HeifError::PreconditionViolation(_))),
            "{result:?}"
        );
        assert_eq!(collection_sizes(&file), sizes);
        assert_eq!(file, before);
    }
}

#[test_matrix([0, 4], [1, 2])]
fn unresolved_reference_leaves_file_unchanged(index: u32, context: UniqBsid) {
    // Context 1 holds images 1 to 3. Context 2 does not exist.
    let mut file = create_file(&IlocSettings::default(), &[(1, 3)]);
    let before = file.clone();
    let config = DerivedConfig {
        grids: vec![grid_config(10, 1, 1, 3)],
        identities: vec![IdentityConfig {
            uniq_bsid: 20,
            refs_list: vec![1, context],
            index_list: vec![1, index],
            transforms: vec![rotation(90)],
        }],
        ..Default::default()
    };
    assert!(matches!(
        file.add_derived_images(&config),
        Err(HeifError::ReferenceNotFound(_))
    ));
    assert_eq!(file, before);
}

#[test]
fn late_failure_leaves_file_unchanged() {
    let mut file = create_file(&IlocSettings::default(), &[(1, 2)]);
    // An image item without any property.
    file.meta.iinf.add_entry(50, "hvc1").unwrap();
    file.meta.register_item(7, 50).unwrap();
    let before = file.clone();
    let config = DerivedConfig {
        grids: vec![grid_config(8, 1, 1, 2)],
        identities: vec![IdentityConfig {
            uniq_bsid: 9,
            refs_list: vec![7],
            index_list: vec![1],
            transforms: vec![],
        }],
        ..Default::default()
    };
    // The grid is staged before the identity fails to find a size property.
    assert!(matches!(
        file.add_derived_images(&config),
        Err(HeifError::PreconditionViolation(_))
    ));
    assert_eq!(file, before);
}

#[test]
fn existing_context_is_rejected() {
    let mut file = create_file(&IlocSettings::default(), &[(1, 2)]);
    let before = file.clone();
    let config = DerivedConfig {
        grids: vec![grid_config(1, 1, 1, 2)],
        ..Default::default()
    };
    assert!(matches!(
        file.add_derived_images(&config),
        Err(HeifError::PreconditionViolation(_))
    ));
    assert_eq!(file, before);
}

#[test]
fn empty_config() {
    let mut file = create_file(&IlocSettings::default(), &[(1, 1)]);
    let before = file.clone();
    let config = DerivedConfig::default();
    assert!(config.is_empty());
    assert!(file.add_derived_images(&config).unwrap().is_empty());
    assert_eq!(file, before);
}

#[test]
fn version_0_locations() {
    // No base offset: the descriptor position is stored in the extent offset.
    let settings = IlocSettings {
        version: 0,
        sizes: FieldSizes {
            offset_size: 4,
            length_size: 4,
            base_offset_size: 0,
            index_size: 0,
        },
    };
    let mut file = create_file(&settings, &[(1, 1)]);
    let location = file.meta.iloc.item_location_for_id(1).unwrap();
    assert_eq!(location.extent(0).unwrap().extent_offset, 0);
    assert!(location.extent(1).is_err());
    let config = DerivedConfig {
        grids: vec![grid_config(2, 1, 1, 1)],
        ..Default::default()
    };
    file.add_derived_images(&config).unwrap();
    let location = file.meta.iloc.item_location_for_id(2).unwrap();
    assert_eq!(location.extent(0).unwrap().extent_offset, 4);
}
