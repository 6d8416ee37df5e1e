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

//! Reader and writer for the item-level boxes of HEIF still-image files.
//!
//! The two central pieces are the item location box codec ([`mp4box::iloc`])
//! and the derived image writer ([`writer::derived`]), which turns a
//! declarative description of `grid`, `iovl` and `iden` derived images into
//! consistent `iinf`, `iref`, `iprp` and `iloc` entries.

#[macro_use]
mod internal_utils;

pub mod container;
pub mod mp4box;
pub mod utils;
pub mod writer;

pub use internal_utils::stream;

/// Identifier of an item within a meta box.
pub type ItemId = u32;

/// Identifier of an image context (a sequence of images from one source).
pub type UniqBsid = u32;

#[derive(Clone, Debug, PartialEq)]
pub enum HeifError {
    /// No entry exists for the requested item id.
    NotFound,
    /// An index was past the end of a sequence.
    OutOfRange,
    /// A (context, 1-based index) pair did not resolve to an item id.
    ReferenceNotFound(String),
    /// The bytes being parsed are truncated or structurally invalid.
    MalformedStream(String),
    /// The caller asked for something the format cannot represent.
    PreconditionViolation(String),
    OutOfMemory,
    UnknownError(String),
}

pub type HeifResult<T> = Result<T, HeifError>;
