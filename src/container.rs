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

//! In-memory HEIF file made of 'ftyp', 'meta' and 'mdat' boxes.
//!
//! File offset locations of a [`HeifFile`] are relative to the start of the 'mdat' payload while
//! the file is in memory. They are turned into absolute file offsets by [`HeifFile::write`] and
//! back by [`HeifFile::parse`].

use crate::internal_utils::stream::*;
use crate::internal_utils::*;
use crate::mp4box::iloc::IlocSettings;
use crate::mp4box::mdat::MediaDataBox;
use crate::mp4box::meta::MetaBox;
use crate::mp4box::*;
use crate::writer::derived::DerivationMap;
use crate::writer::*;
use crate::*;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileTypeBox {
    pub major_brand: String,
    pub minor_version: u32,
    pub compatible_brands: Vec<String>,
}

impl Default for FileTypeBox {
    fn default() -> Self {
        Self {
            major_brand: "heic".into(),
            minor_version: 0,
            compatible_brands: vec!["mif1".into(), "heic".into()],
        }
    }
}

impl FileTypeBox {
    pub fn has_brand(&self, brand: &str) -> bool {
        self.major_brand == brand || self.compatible_brands.iter().any(|x| x == brand)
    }

    pub fn write(&self, stream: &mut OStream) -> HeifResult<()> {
        for brand in std::iter::once(&self.major_brand).chain(&self.compatible_brands) {
            if brand.len() != 4 {
                return HeifError::precondition_violation(format!("invalid brand '{brand}'"));
            }
        }
        stream.start_box("ftyp")?;
        // unsigned int(32) major_brand;
        stream.write_str(&self.major_brand)?;
        // unsigned int(32) minor_version;
        stream.write_u32(self.minor_version)?;
        // unsigned int(32) compatible_brands[];
        for compatible_brand in &self.compatible_brands {
            stream.write_str(compatible_brand)?;
        }
        stream.finish_box()
    }

    fn parse(stream: &mut IStream) -> HeifResult<Self> {
        let major_brand = stream.read_string(4)?;
        let minor_version = stream.read_u32()?;
        let mut compatible_brands: Vec<String> = Vec::new();
        while stream.has_bytes_left()? {
            compatible_brands.push(stream.read_string(4)?);
        }
        Ok(FileTypeBox {
            major_brand,
            minor_version,
            compatible_brands,
        })
    }
}

/// A HEIF file holding a single 'mdat' box.
///
/// [`HeifFile::parse`] only reads files laid out that way: a file with more than one 'mdat' box,
/// or with a file offset item that starts before the 'mdat' payload, is reported as
/// [`HeifError::MalformedStream`] even though ISOBMFF allows both. A file offset item that ends
/// past the 'mdat' payload parses but fails in [`HeifFile::item_data`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeifFile {
    pub ftyp: FileTypeBox,
    pub meta: MetaBox,
    pub mdat: MediaDataBox,
}

impl HeifFile {
    pub fn create(settings: &IlocSettings) -> HeifResult<Self> {
        Ok(Self {
            ftyp: FileTypeBox::default(),
            meta: MetaBox::create(settings)?,
            mdat: MediaDataBox::default(),
        })
    }

    /// Adds the derived images described by `config`. See [`DerivedImageWriter::write`].
    pub fn add_derived_images(&mut self, config: &DerivedConfig) -> HeifResult<DerivationMap> {
        DerivedImageWriter::create(config).write(&mut self.meta, &mut self.mdat)
    }

    pub fn item_data(&self, item_id: ItemId) -> HeifResult<Vec<u8>> {
        self.meta.item_data(self.mdat.data(), item_id)
    }

    pub fn item_data_with_decoder_config(&self, item_id: ItemId) -> HeifResult<Vec<u8>> {
        self.meta
            .item_data_with_decoder_config(self.mdat.data(), item_id)
    }

    pub fn write(&self) -> HeifResult<Vec<u8>> {
        let mut stream = OStream::default();
        self.ftyp.write(&mut stream)?;
        // The size of the meta box does not depend on the offset values, only on their widths.
        let mut meta_stream = OStream::default();
        self.meta.write(&mut meta_stream)?;
        let payload_offset = stream.offset() + meta_stream.offset() + self.mdat.header_size();

        let mut meta = self.meta.clone();
        meta.add_to_file_offsets(u64_from_usize(payload_offset)?)?;
        meta.write(&mut stream)?;
        if stream.offset() + self.mdat.header_size() != payload_offset {
            return HeifError::unknown_error("meta box size changed while rebasing offsets");
        }
        self.mdat.write(&mut stream)?;
        log::debug!(
            "wrote {} bytes, mdat payload at offset {payload_offset}",
            stream.offset()
        );
        Ok(stream.data)
    }

    pub fn parse(data: &[u8]) -> HeifResult<Self> {
        let mut stream = IStream::create(data);
        let mut ftyp: Option<FileTypeBox> = None;
        let mut meta: Option<MetaBox> = None;
        let mut mdat: Option<(usize, MediaDataBox)> = None;
        while stream.has_bytes_left()? {
            let start_offset = stream.offset;
            let header = parse_header(&mut stream, true)?;
            match header.box_type.as_str() {
                "ftyp" => {
                    if ftyp.is_some() {
                        return HeifError::malformed_stream("multiple ftyp boxes");
                    }
                    let mut sub_stream = stream.sub_stream(&header.size)?;
                    ftyp = Some(FileTypeBox::parse(&mut sub_stream)?);
                }
                "meta" => {
                    if meta.is_some() {
                        return HeifError::malformed_stream("multiple meta boxes");
                    }
                    stream.rewind(stream.offset - start_offset)?;
                    meta = Some(MetaBox::parse(&mut stream)?);
                }
                "mdat" => {
                    if mdat.is_some() {
                        return HeifError::malformed_stream("multiple mdat boxes");
                    }
                    let payload_offset = stream.offset;
                    let sub_stream = stream.sub_stream(&header.size)?;
                    mdat = Some((payload_offset, MediaDataBox::create(sub_stream.data.to_vec())));
                }
                _ => {
                    log::debug!("skipping top-level '{}' box", header.box_type);
                    stream.sub_stream(&header.size)?;
                }
            }
        }
        let Some(ftyp) = ftyp else {
            return HeifError::malformed_stream("missing ftyp box");
        };
        let Some(mut meta) = meta else {
            return HeifError::malformed_stream("missing meta box");
        };
        let mdat = match mdat {
            Some((payload_offset, mdat)) => {
                meta.subtract_from_file_offsets(u64_from_usize(payload_offset)?)?;
                mdat
            }
            None => MediaDataBox::default(),
        };
        Ok(HeifFile { ftyp, meta, mdat })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4box::meta::CodedImage;

    #[test]
    fn ftyp() {
        let ftyp = FileTypeBox::default();
        assert!(ftyp.has_brand("mif1"));
        assert!(!ftyp.has_brand("avif"));
        let mut stream = OStream::default();
        ftyp.write(&mut stream).unwrap();
        assert_eq!(stream.data.len(), 8 + 4 + 4 + 8);
        let bad = FileTypeBox {
            major_brand: "hei".into(),
            ..Default::default()
        };
        assert!(bad.write(&mut OStream::default()).is_err());
    }

    #[test]
    fn absolute_offsets() {
        let mut file = HeifFile::create(&IlocSettings::default()).unwrap();
        let image = CodedImage {
            item_type: "hvc1",
            width: 8,
            height: 8,
            data: &[5, 6, 7],
            ..Default::default()
        };
        let item_id = file.meta.add_coded_image(1, &image, &mut file.mdat).unwrap();
        let bytes = file.write().unwrap();
        let location = {
            let mut stream = IStream::create(&bytes);
            stream.skip(24).unwrap();
            MetaBox::parse(&mut stream).unwrap().iloc
        };
        let entry = location.item_location_for_id(item_id as u16).unwrap();
        let start = entry.base_offset as usize;
        assert_eq!(&bytes[start..start + 3], &[5, 6, 7]);
        assert_eq!(&bytes[start - 4..start], b"mdat");

        let parsed = HeifFile::parse(&bytes).unwrap();
        assert_eq!(parsed.item_data(item_id), Ok(vec![5, 6, 7]));
        assert_eq!(parsed.meta.iloc, file.meta.iloc);
    }

    #[test]
    fn missing_boxes() {
        let mut stream = OStream::default();
        FileTypeBox::default().write(&mut stream).unwrap();
        assert!(matches!(
            HeifFile::parse(&stream.data),
            Err(HeifError::MalformedStream(_))
        ));
        assert!(HeifFile::parse(&[]).is_err());
    }
}
