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

use crate::*;

pub mod clap;
pub(crate) mod error;

// Some HEIF fractional fields can be negative, hence Fraction and UFraction.
// The denominator is always unsigned.

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Fraction(pub i32, pub u32);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct UFraction(pub u32, pub u32);

impl Fraction {
    pub fn is_valid(&self) -> HeifResult<()> {
        match self.1 {
            0 => HeifError::precondition_violation("fraction with a zero denominator"),
            _ => Ok(()),
        }
    }
}

impl UFraction {
    pub fn is_valid(&self) -> HeifResult<()> {
        match self.1 {
            0 => HeifError::precondition_violation("fraction with a zero denominator"),
            _ => Ok(()),
        }
    }
}

/// Renders a four-character code for display, replacing unprintable bytes.
pub fn fourcc_to_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect()
}
