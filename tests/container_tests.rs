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

use heif_meta::container::*;
use heif_meta::mp4box::iloc::*;
use heif_meta::mp4box::meta::*;
use heif_meta::writer::config::*;
use heif_meta::writer::payload::ImageGrid;
use heif_meta::writer::DerivedConfig;
use heif_meta::*;

mod utils;
use utils::*;

use test_case::test_case;
use test_case::test_matrix;

fn settings(version: u8, offset_size: u8, base_offset_size: u8) -> IlocSettings {
    IlocSettings {
        version,
        sizes: FieldSizes {
            offset_size,
            length_size: 4,
            base_offset_size,
            index_size: 0,
        },
    }
}

fn derived_file(settings: &IlocSettings) -> HeifFile {
    let mut file = create_file(settings, &[(1, 4)]);
    let grid = DerivedConfig {
        grids: vec![GridConfig {
            uniq_bsid: 2,
            refs_list: vec![1; 4],
            index_list: vec![1, 2, 3, 4],
            rows: 2,
            columns: 2,
            output_width: 2 * TILE_WIDTH,
            output_height: 2 * TILE_HEIGHT,
        }],
        ..Default::default()
    };
    file.add_derived_images(&grid).unwrap();
    // Contexts are resolved before any item is added, so the grid has to exist first.
    let rotated = DerivedConfig {
        identities: vec![IdentityConfig {
            uniq_bsid: 3,
            refs_list: vec![2],
            index_list: vec![1],
            transforms: vec![Transform {
                property: TransformProperty::Rotation { angle: 90 },
                essential: true,
            }],
        }],
        ..Default::default()
    };
    file.add_derived_images(&rotated).unwrap();
    // Hide the tiles behind the rotated grid.
    for item_id in 1..=4 {
        file.meta.iinf.set_hidden(item_id, true).unwrap();
    }
    file.meta.set_primary_item(6).unwrap();
    file
}

#[test_matrix([0, 1, 2], [4, 8], [0, 4, 8])]
fn round_trip(version: u8, offset_size: u8, base_offset_size: u8) {
    let file = derived_file(&settings(version, offset_size, base_offset_size));
    let bytes = file.write().unwrap();
    let parsed = HeifFile::parse(&bytes).unwrap();

    assert_eq!(parsed.ftyp, file.ftyp);
    assert_eq!(parsed.mdat, file.mdat);
    assert_eq!(parsed.meta.primary_item_id, Some(6));
    assert_eq!(parsed.meta.iinf, file.meta.iinf);
    assert_eq!(parsed.meta.iref, file.meta.iref);
    assert_eq!(parsed.meta.iprp, file.meta.iprp);
    assert_eq!(parsed.meta.iloc, file.meta.iloc);
    for item_id in 1..=6 {
        assert_eq!(parsed.item_data(item_id), file.item_data(item_id));
    }
    // Writing again gives the same bytes.
    assert_eq!(parsed.write(), Ok(bytes));
}

#[test]
fn read_side() {
    let bytes = derived_file(&IlocSettings::default()).write().unwrap();
    let file = HeifFile::parse(&bytes).unwrap();
    assert!(file.ftyp.has_brand("heic"));
    assert_eq!(file.meta.handler_type, "pict");

    // Every item of a parsed file belongs to the root context.
    assert_eq!(
        file.meta.item_ids_by_type(ROOT_CONTEXT, "hvc1"),
        Ok(vec![1, 2, 3, 4])
    );
    assert_eq!(file.meta.item_ids_by_type(ROOT_CONTEXT, "grid"), Ok(vec![5]));
    assert_eq!(
        file.meta.item_ids_by_type(ROOT_CONTEXT, MASTER_IMAGE),
        Ok(vec![5, 6])
    );
    assert_eq!(file.meta.referencing_items(3, "dimg"), vec![5]);
    assert_eq!(file.meta.referencing_items(5, "dimg"), vec![6]);
    assert!(file.meta.item_ids_by_type(9, "hvc1").is_err());

    let mut expected = vec![1, 2, 3, 4];
    expected.extend(image_payload(1, 2));
    assert_eq!(file.item_data_with_decoder_config(2), Ok(expected));
    // No decoder configuration on derived images.
    let grid = file.item_data_with_decoder_config(5).unwrap();
    assert_eq!(ImageGrid::parse(&grid).unwrap().rows, 2);
    assert_eq!(file.item_data_with_decoder_config(6), Ok(Vec::new()));
    assert_eq!(file.item_data(7), Err(HeifError::NotFound));
}

#[test]
fn unknown_top_level_boxes_are_skipped() {
    let mut bytes = derived_file(&IlocSettings::default()).write().unwrap();
    let expected = HeifFile::parse(&bytes).unwrap();
    // Boxes after mdat do not move the media data.
    bytes.extend_from_slice(&[0, 0, 0, 12, b'f', b'r', b'e', b'e', 0, 0, 0, 0]);
    bytes.extend_from_slice(&[0, 0, 0, 9, b's', b'k', b'i', b'p', 7]);
    assert_eq!(HeifFile::parse(&bytes), Ok(expected));
}

#[test_case(&[0, 0, 0, 8, b'f', b't', b'y', b'p']; "truncated_ftyp")]
#[test_case(&[0, 0, 0, 16, b'm', b'e', b't', b'a', 0, 0, 0, 0]; "truncated_box")]
#[test_case(&[0, 0, 0, 4]; "box_smaller_than_header")]
fn malformed(bytes: &[u8]) {
    assert!(HeifFile::parse(bytes).is_err());
}

#[test]
fn duplicate_mdat() {
    let mut bytes = derived_file(&IlocSettings::default()).write().unwrap();
    bytes.extend_from_slice(&[0, 0, 0, 8, b'm', b'd', b'a', b't']);
    assert!(matches!(
        HeifFile::parse(&bytes),
        Err(HeifError::MalformedStream(_))
    ));
}

#[test]
fn file_offset_before_mdat() {
    let bytes = derived_file(&IlocSettings::default()).write().unwrap();
    let ftyp_size = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
    // A box between ftyp and meta moves mdat but not the absolute offsets, so the first tile
    // now starts before the mdat payload.
    let mut moved = bytes[..ftyp_size].to_vec();
    moved.extend_from_slice(&[0, 0, 0, 12, b'f', b'r', b'e', b'e', 0, 0, 0, 0]);
    moved.extend_from_slice(&bytes[ftyp_size..]);
    assert!(matches!(
        HeifFile::parse(&moved),
        Err(HeifError::MalformedStream(_))
    ));
}

#[test]
fn version_0_drops_index_size() {
    let mut iloc_settings = settings(0, 4, 0);
    iloc_settings.sizes.index_size = 4;
    let file = derived_file(&iloc_settings);
    assert_eq!(file.meta.iloc.sizes().index_size, 0);
    let parsed = HeifFile::parse(&file.write().unwrap()).unwrap();
    assert_eq!(parsed.meta.iloc, file.meta.iloc);
}

#[test]
fn idat_and_item_offset_locations() {
    let mut file = create_file(&IlocSettings::default(), &[(1, 1)]);
    file.meta.idat = vec![9, 8, 7, 6, 5];
    file.meta.iinf.add_entry(2, "Exif").unwrap();
    let mut location = ItemLocation::new(2, ConstructionMethod::IdatOffset);
    location.add_extent(ItemLocationExtent::new(1, 3));
    file.meta.iloc.add_location(location).unwrap();

    file.meta.iinf.add_entry(3, "Exif").unwrap();
    file.meta.iref.add_references_of_type(3, "iloc", &[1]).unwrap();
    let mut location = ItemLocation::new(3, ConstructionMethod::ItemOffset);
    location.add_extent(ItemLocationExtent::new(2, 0));
    file.meta.iloc.add_location(location).unwrap();

    let bytes = file.write().unwrap();
    let parsed = HeifFile::parse(&bytes).unwrap();
    assert_eq!(parsed.meta.idat, vec![9, 8, 7, 6, 5]);
    assert_eq!(parsed.item_data(2), Ok(vec![8, 7, 6]));
    // Item 3 is the tail of item 1.
    assert_eq!(parsed.item_data(3), Ok(image_payload(1, 1)[2..].to_vec()));
}
