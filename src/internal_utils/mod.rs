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

use crate::utils::*;
use crate::*;

macro_rules! checked_add {
    ($a:expr, $b:expr) => {
        $a.checked_add($b)
            .ok_or($crate::HeifError::MalformedStream("addition overflow".into()))
    };
}

macro_rules! checked_sub {
    ($a:expr, $b:expr) => {
        $a.checked_sub($b)
            .ok_or($crate::HeifError::MalformedStream("subtraction underflow".into()))
    };
}

macro_rules! checked_mul {
    ($a:expr, $b:expr) => {
        $a.checked_mul($b)
            .ok_or($crate::HeifError::MalformedStream("multiplication overflow".into()))
    };
}

macro_rules! checked_incr {
    ($a:expr, $b:expr) => {
        $a = checked_add!($a, $b)?
    };
}

macro_rules! checked_decr {
    ($a:expr, $b:expr) => {
        $a = checked_sub!($a, $b)?
    };
}

pub mod stream;

macro_rules! conversion_function {
    ($func:ident, $to:ident, $from:ty) => {
        pub(crate) fn $func(value: $from) -> HeifResult<$to> {
            $to::try_from(value).or(Err(HeifError::PreconditionViolation(format!(
                "{value} does not fit in {}",
                stringify!($to)
            ))))
        }
    };
}

conversion_function!(usize_from_u64, usize, u64);
conversion_function!(u64_from_usize, u64, usize);
conversion_function!(u32_from_usize, u32, usize);
conversion_function!(u32_from_u64, u32, u64);
conversion_function!(u16_from_usize, u16, usize);
conversion_function!(u16_from_u32, u16, u32);
conversion_function!(u8_from_usize, u8, usize);

/// Whether `value` can be stored in an unsigned field of `size` bytes (0, 4 or 8).
/// A zero-sized field is absent from the stream and implies a value of 0.
pub(crate) fn value_fits_in_size(value: u64, size: u8) -> bool {
    match size {
        0 => value == 0,
        4 => value <= u32::MAX as u64,
        8 => true,
        _ => false,
    }
}

pub(crate) fn check_slice_range(len: usize, range: &std::ops::Range<usize>) -> HeifResult<()> {
    if range.start >= len || range.end > len {
        return HeifError::precondition_violation("slice range out of bounds");
    }
    Ok(())
}
