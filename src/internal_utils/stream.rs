// Copyright 2024 Google LLC
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

//! Big-endian byte and bit streams over in-memory buffers.

use crate::internal_utils::*;
use crate::mp4box::BoxSize;

#[derive(Debug)]
pub struct IBitStream<'a> {
    pub data: &'a [u8],
    pub bit_offset: usize,
}

impl IBitStream<'_> {
    fn read_bit(&mut self) -> HeifResult<u8> {
        let byte_offset = self.bit_offset / 8;
        if byte_offset >= self.data.len() {
            return HeifError::malformed_stream("not enough bits");
        }
        let byte = self.data[byte_offset];
        let shift = 7 - (self.bit_offset % 8);
        self.bit_offset += 1;
        Ok((byte >> shift) & 0x01)
    }

    pub fn read(&mut self, n: usize) -> HeifResult<u32> {
        if n > 32 {
            return HeifError::precondition_violation("cannot read more than 32 bits at once");
        }
        let mut value: u32 = 0;
        for _i in 0..n {
            value <<= 1;
            value |= self.read_bit()? as u32;
        }
        Ok(value)
    }

    pub fn read_bool(&mut self) -> HeifResult<bool> {
        let bit = self.read_bit()?;
        Ok(bit == 1)
    }

    pub fn skip(&mut self, n: usize) -> HeifResult<()> {
        if checked_add!(self.bit_offset, n)? > checked_mul!(self.data.len(), 8)? {
            return HeifError::malformed_stream("not enough bytes");
        }
        self.bit_offset += n;
        Ok(())
    }

    pub fn remaining_bits(&self) -> HeifResult<usize> {
        checked_sub!(checked_mul!(self.data.len(), 8)?, self.bit_offset)
    }
}

#[derive(Debug)]
pub struct IStream<'a> {
    // The bytes to parse.
    pub data: &'a [u8],
    // The number of bytes read so far within self.data.
    pub offset: usize,
}

impl IStream<'_> {
    pub fn create(data: &[u8]) -> IStream<'_> {
        IStream { data, offset: 0 }
    }

    fn check(&self, size: usize) -> HeifResult<()> {
        if self.bytes_left()? < size {
            return HeifError::malformed_stream(format!(
                "needed {size} bytes at offset {} but only {} are left",
                self.offset,
                self.bytes_left()?
            ));
        }
        Ok(())
    }

    pub fn sub_stream<'a>(&'a mut self, size: &BoxSize) -> HeifResult<IStream<'a>> {
        let offset = self.offset;
        checked_incr!(
            self.offset,
            match size {
                BoxSize::FixedSize(size) => {
                    self.check(*size)?;
                    *size
                }
                BoxSize::UntilEndOfStream => self.bytes_left()?,
            }
        );
        Ok(IStream {
            data: &self.data[offset..self.offset],
            offset: 0,
        })
    }

    pub fn sub_bit_stream(&mut self, num_bytes: usize) -> HeifResult<IBitStream<'_>> {
        self.check(num_bytes)?;
        let offset = self.offset;
        checked_incr!(self.offset, num_bytes);
        Ok(IBitStream {
            data: &self.data[offset..self.offset],
            bit_offset: 0,
        })
    }

    pub fn bytes_left(&self) -> HeifResult<usize> {
        if self.data.len() < self.offset {
            return HeifError::unknown_error("stream offset is past the end of the data");
        }
        Ok(self.data.len() - self.offset)
    }

    pub fn has_bytes_left(&self) -> HeifResult<bool> {
        Ok(self.bytes_left()? > 0)
    }

    pub fn get_slice(&mut self, size: usize) -> HeifResult<&[u8]> {
        self.check(size)?;
        let offset_start = self.offset;
        checked_incr!(self.offset, size);
        Ok(&self.data[offset_start..offset_start + size])
    }

    fn get_vec(&mut self, size: usize) -> HeifResult<Vec<u8>> {
        Ok(self.get_slice(size)?.to_vec())
    }

    fn get_array<const N: usize>(&mut self) -> HeifResult<[u8; N]> {
        let mut out = [0; N];
        out.copy_from_slice(self.get_slice(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> HeifResult<u8> {
        self.check(1)?;
        let value = self.data[self.offset];
        checked_incr!(self.offset, 1);
        Ok(value)
    }

    pub fn read_u16(&mut self) -> HeifResult<u16> {
        Ok(u16::from_be_bytes(self.get_array()?))
    }

    pub fn read_u24(&mut self) -> HeifResult<u32> {
        Ok(self.read_uxx(3)? as u32)
    }

    pub fn read_u32(&mut self) -> HeifResult<u32> {
        Ok(u32::from_be_bytes(self.get_array()?))
    }

    pub fn read_u64(&mut self) -> HeifResult<u64> {
        Ok(u64::from_be_bytes(self.get_array()?))
    }

    pub fn read_i16(&mut self) -> HeifResult<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_i32(&mut self) -> HeifResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_fraction(&mut self) -> HeifResult<Fraction> {
        Ok(Fraction(self.read_i32()?, self.read_u32()?))
    }

    pub fn read_ufraction(&mut self) -> HeifResult<UFraction> {
        Ok(UFraction(self.read_u32()?, self.read_u32()?))
    }

    // Reads size characters of a non-null-terminated string.
    pub fn read_string(&mut self, size: usize) -> HeifResult<String> {
        Ok(String::from_utf8(self.get_vec(size)?).unwrap_or_default())
    }

    // Reads an xx-byte unsigned integer.
    pub fn read_uxx(&mut self, xx: u8) -> HeifResult<u64> {
        let n: usize = xx.into();
        if n == 0 {
            return Ok(0);
        }
        if n > 8 {
            return HeifError::precondition_violation(format!("cannot read a {n}-byte integer"));
        }
        let mut out = [0; 8];
        let start = out.len() - n;
        out[start..].copy_from_slice(self.get_slice(n)?);
        Ok(u64::from_be_bytes(out))
    }

    // Reads a null-terminated string.
    pub fn read_c_string(&mut self) -> HeifResult<String> {
        self.check(1)?;
        let null_position = self.data[self.offset..]
            .iter()
            .position(|&x| x == b'\0')
            .ok_or(HeifError::MalformedStream("unterminated string".into()))?;
        let range = self.offset..self.offset + null_position;
        self.offset += null_position + 1;
        Ok(String::from_utf8(self.data[range].to_vec()).unwrap_or_default())
    }

    pub fn read_version_and_flags(&mut self) -> HeifResult<(u8, u32)> {
        let version = self.read_u8()?;
        let flags = self.read_u24()?;
        Ok((version, flags))
    }

    pub fn skip(&mut self, size: usize) -> HeifResult<()> {
        self.check(size)?;
        checked_incr!(self.offset, size);
        Ok(())
    }

    pub fn rewind(&mut self, size: usize) -> HeifResult<()> {
        checked_decr!(self.offset, size);
        Ok(())
    }
}

#[derive(Default)]
pub struct OStream {
    // The bytes written so far.
    pub data: Vec<u8>,
    // If not zero, number of most significant bits already written in the last
    // byte of self.data.
    num_bits: u8,
    // The positions in self.data where are written the 4-byte sizes of the
    // boxes that were started but not yet finished.
    box_marker_offsets: Vec<usize>,
}

impl OStream {
    pub fn offset(&self) -> usize {
        self.data.len()
    }

    fn check_aligned(&self) -> HeifResult<()> {
        if self.num_bits != 0 {
            return HeifError::unknown_error("byte write on an unaligned stream");
        }
        Ok(())
    }

    pub fn try_reserve(&mut self, size: usize) -> HeifResult<()> {
        self.data.try_reserve(size).or(Err(HeifError::OutOfMemory))
    }

    pub fn write_bits(&mut self, value: u32, num_bits: u8) -> HeifResult<()> {
        if num_bits == 0 || num_bits > 31 {
            return HeifError::precondition_violation(format!("cannot write {num_bits} bits"));
        }
        if value >= (1 << num_bits) {
            return HeifError::precondition_violation(format!(
                "{value} does not fit in {num_bits} bits"
            ));
        }
        let mut num_remaining_bits = num_bits;
        while num_remaining_bits != 0 {
            if self.num_bits == 0 {
                self.try_reserve(1)?;
                self.data.push(0);
            }
            let last = self.data.len() - 1;
            // Number of bits among num_bits that can be written in the last byte of self.data.
            let num_written_bits = std::cmp::min(8 - self.num_bits, num_remaining_bits);
            // Write the most significant bits first (somewhat big endian).
            let written_bits = (value >> (num_remaining_bits - num_written_bits))
                & ((1u32 << num_written_bits) - 1);
            self.data[last] |= (written_bits as u8) << (8 - self.num_bits - num_written_bits);
            num_remaining_bits -= num_written_bits;
            self.num_bits = (self.num_bits + num_written_bits) % 8;
        }
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> HeifResult<()> {
        self.write_bits(if value { 1 } else { 0 }, 1)
    }

    pub fn write_u8(&mut self, value: u8) -> HeifResult<()> {
        self.check_aligned()?;
        self.try_reserve(1)?;
        self.data.push(value);
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> HeifResult<()> {
        self.write_slice(&value.to_be_bytes())
    }

    pub fn write_u24(&mut self, value: u32) -> HeifResult<()> {
        if value > 0xFFFFFF {
            return HeifError::precondition_violation(format!("{value} does not fit in 24 bits"));
        }
        self.write_slice(&value.to_be_bytes()[1..])
    }

    pub fn write_u32(&mut self, value: u32) -> HeifResult<()> {
        self.write_slice(&value.to_be_bytes())
    }

    pub fn write_u32_at_offset(&mut self, value: u32, offset: usize) -> HeifResult<()> {
        self.check_aligned()?;
        let range = offset..offset + 4;
        check_slice_range(self.data.len(), &range)?;
        self.data[range].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> HeifResult<()> {
        self.write_slice(&value.to_be_bytes())
    }

    pub fn write_i16(&mut self, value: i16) -> HeifResult<()> {
        self.write_u16(value as u16)
    }

    pub fn write_i32(&mut self, value: i32) -> HeifResult<()> {
        self.write_u32(value as u32)
    }

    // Writes value as an xx-byte unsigned integer. Nothing is written when xx is 0, in which case
    // value must be 0.
    pub fn write_uxx(&mut self, value: u64, xx: u8) -> HeifResult<()> {
        let n: usize = xx.into();
        if n > 8 {
            return HeifError::precondition_violation(format!("cannot write a {n}-byte integer"));
        }
        if n < 8 && value >> (n * 8) != 0 {
            return HeifError::precondition_violation(format!(
                "{value} does not fit in {n} bytes"
            ));
        }
        self.write_slice(&value.to_be_bytes()[8 - n..])
    }

    pub fn write_str(&mut self, value: &str) -> HeifResult<()> {
        self.write_slice(value.as_bytes())
    }

    pub fn write_str_with_nul(&mut self, value: &str) -> HeifResult<()> {
        self.write_str(value)?;
        self.write_u8(0)
    }

    pub fn write_slice(&mut self, data: &[u8]) -> HeifResult<()> {
        self.check_aligned()?;
        self.try_reserve(data.len())?;
        self.data.extend_from_slice(data);
        Ok(())
    }

    pub fn write_ufraction(&mut self, value: UFraction) -> HeifResult<()> {
        self.write_u32(value.0)?;
        self.write_u32(value.1)
    }

    pub fn write_fraction(&mut self, value: Fraction) -> HeifResult<()> {
        self.write_i32(value.0)?;
        self.write_u32(value.1)
    }

    fn start_box_impl(
        &mut self,
        box_type: &str,
        version_and_flags: Option<(u8, u32)>,
    ) -> HeifResult<()> {
        if box_type.len() != 4 {
            return HeifError::precondition_violation(format!("invalid box type '{box_type}'"));
        }
        self.check_aligned()?;
        self.box_marker_offsets.push(self.offset());
        // 4 bytes for size to be filled out later.
        self.write_u32(0)?;
        self.write_str(box_type)?;
        if let Some((version, flags)) = version_and_flags {
            self.write_u8(version)?;
            self.write_u24(flags)?;
        }
        Ok(())
    }

    pub fn start_box(&mut self, box_type: &str) -> HeifResult<()> {
        self.start_box_impl(box_type, None)
    }

    pub fn start_full_box(
        &mut self,
        box_type: &str,
        version_and_flags: (u8, u32),
    ) -> HeifResult<()> {
        self.start_box_impl(box_type, Some(version_and_flags))
    }

    pub fn finish_box(&mut self) -> HeifResult<()> {
        self.check_aligned()?;
        let offset = self
            .box_marker_offsets
            .pop()
            .ok_or(HeifError::UnknownError("no box to finish".into()))?;
        let box_size = u32_from_usize(checked_sub!(self.offset(), offset)?)?;
        self.write_u32_at_offset(box_size, offset)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_uxx() {
        let mut stream = IStream::create(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(stream.read_uxx(0), Ok(0));
        assert_eq!(stream.offset, 0);
        assert_eq!(stream.read_uxx(1), Ok(1));
        assert_eq!(stream.offset, 1);
        stream.offset = 0;
        assert_eq!(stream.read_uxx(2), Ok(258));
        stream.offset = 0;
        assert_eq!(stream.read_u16(), Ok(258));
        stream.offset = 0;
        assert_eq!(stream.read_uxx(3), Ok(66051));
        stream.offset = 0;
        assert_eq!(stream.read_u24(), Ok(66051));
        stream.offset = 0;
        assert_eq!(stream.read_uxx(4), Ok(16909060));
        stream.offset = 0;
        assert_eq!(stream.read_u32(), Ok(16909060));
        stream.offset = 0;
        assert_eq!(stream.read_uxx(8), Ok(72623859790382856));
        stream.offset = 0;
        assert_eq!(stream.read_u64(), Ok(72623859790382856));
        stream.offset = 0;
        assert!(matches!(
            stream.read_uxx(9),
            Err(HeifError::PreconditionViolation(_))
        ));
        stream.offset = 6;
        assert!(matches!(
            stream.read_u32(),
            Err(HeifError::MalformedStream(_))
        ));
    }

    #[test]
    fn read_string() {
        let bytes = "abcd\0e".as_bytes();
        assert_eq!(IStream::create(bytes).read_string(4), Ok("abcd".into()));
        assert!(matches!(
            IStream::create(bytes).read_string(8),
            Err(HeifError::MalformedStream(_))
        ));
        assert_eq!(IStream::create(bytes).read_c_string(), Ok("abcd".into()));
        assert!(IStream::create("abc".as_bytes()).read_c_string().is_err());
    }

    #[test]
    fn read_bits() {
        let bytes = [0x44, 0x40];
        let mut stream = IStream::create(&bytes);
        let mut bits = stream.sub_bit_stream(2).unwrap();
        assert_eq!(bits.read(4), Ok(4));
        assert_eq!(bits.read(4), Ok(4));
        assert_eq!(bits.read(4), Ok(4));
        assert_eq!(bits.remaining_bits(), Ok(4));
        assert_eq!(bits.read(4), Ok(0));
        assert!(bits.read(1).is_err());
        assert_eq!(stream.offset, 2);
    }

    #[test]
    fn write_bits() {
        let mut stream = OStream::default();
        assert_eq!(stream.write_bits(1, 1), Ok(()));
        assert_eq!(stream.write_bits(2, 3), Ok(()));
        assert_eq!(stream.write_bits(1, 4), Ok(()));
        assert_eq!(stream.write_bits(1, 4), Ok(()));
        assert_eq!(stream.write_bits(4, 4), Ok(()));
        assert_eq!(stream.write_u8(0xCC), Ok(()));
        assert_eq!(stream.data, vec![0xA1, 0x14, 0xCC]);

        assert!(stream.write_bits(0, 0).is_err());
        assert!(stream.write_bits(2, 1).is_err());
        assert_eq!(stream.write_bits(5, 5), Ok(()));
        // Byte writes are refused until the pending bits complete a byte.
        assert!(stream.write_u8(0).is_err());
    }

    #[test]
    fn write_uxx() {
        let mut stream = OStream::default();
        assert_eq!(stream.write_uxx(0, 0), Ok(()));
        assert!(stream.data.is_empty());
        assert!(matches!(
            stream.write_uxx(1, 0),
            Err(HeifError::PreconditionViolation(_))
        ));
        assert_eq!(stream.write_uxx(0x01020304, 4), Ok(()));
        assert!(stream.write_uxx(0x1_0000_0000, 4).is_err());
        assert_eq!(stream.write_uxx(0x1_0000_0000, 8), Ok(()));
        assert_eq!(
            stream.data,
            vec![1, 2, 3, 4, 0, 0, 0, 1, 0, 0, 0, 0]
        );
    }

    #[test]
    fn write_box() {
        let mut stream = OStream::default();
        assert!(stream.start_box("meta").is_ok());
        assert!(stream.write_u8(20).is_ok());
        assert!(stream.start_full_box("iloc", (1, 0)).is_ok());
        assert!(stream.write_u32(25).is_ok());
        assert!(stream.finish_box().is_ok());
        assert!(stream.finish_box().is_ok());
        assert!(stream.finish_box().is_err());
        assert_eq!(&stream.data[0..4], &25u32.to_be_bytes());
        assert_eq!(&stream.data[9..13], &16u32.to_be_bytes());
        assert!(stream.start_box("toolong").is_err());
    }
}
