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

// Not all functions are used from all test targets. So allow dead code in this module.
#![allow(dead_code)]

use heif_meta::container::HeifFile;
use heif_meta::mp4box::iloc::IlocSettings;
use heif_meta::mp4box::iprp::ItemProperty;
use heif_meta::mp4box::meta::CodedImage;
use heif_meta::*;

pub const TILE_WIDTH: u32 = 64;
pub const TILE_HEIGHT: u32 = 48;

pub fn hvcc() -> ItemProperty {
    ItemProperty::Unknown {
        box_type: "hvcC".into(),
        payload: vec![1, 2, 3, 4],
    }
}

// Payload of the image of 1-based `index` in `context`. Distinct for every image.
pub fn image_payload(context: UniqBsid, index: u32) -> Vec<u8> {
    vec![context as u8, index as u8, 0xC0, 0xDE]
}

/// Adds `count` coded images to `context` and returns their item ids.
pub fn add_images(file: &mut HeifFile, context: UniqBsid, count: u32) -> Vec<ItemId> {
    (1..=count)
        .map(|index| {
            let data = image_payload(context, index);
            let image = CodedImage {
                item_type: "hvc1",
                width: TILE_WIDTH,
                height: TILE_HEIGHT,
                decoder_config: Some(hvcc()),
                data: &data,
                hidden: false,
            };
            file.meta
                .add_coded_image(context, &image, &mut file.mdat)
                .expect("failed to add coded image")
        })
        .collect()
}

/// A file with the given contexts, each holding the given number of images, in order.
pub fn create_file(settings: &IlocSettings, contexts: &[(UniqBsid, u32)]) -> HeifFile {
    let mut file = HeifFile::create(settings).expect("failed to create file");
    for (context, count) in contexts {
        add_images(&mut file, *context, *count);
    }
    file
}

/// Sizes of the collections touched by a derivation write.
pub fn collection_sizes(file: &HeifFile) -> (usize, usize, usize, usize, usize) {
    (
        file.meta.iinf.len(),
        file.meta.iref.references().len(),
        file.meta.iprp.properties().len(),
        file.meta.iloc.item_count(),
        file.mdat.len(),
    )
}
