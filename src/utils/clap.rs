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

/// Clean aperture ('clap') crop window, ISO/IEC 14496-12 Section 12.1.4.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CleanAperture {
    pub width: UFraction,
    pub height: UFraction,
    pub horiz_off: Fraction,
    pub vert_off: Fraction,
}

impl CleanAperture {
    pub fn is_valid(&self) -> HeifResult<()> {
        self.width.is_valid()?;
        self.height.is_valid()?;
        self.horiz_off.is_valid()?;
        self.vert_off.is_valid()
    }
}
