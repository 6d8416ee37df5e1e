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

use crate::*;

use std::fmt;

// To be used instead of direct HeifError enum variants in order to trace
// unexpected Err propagations as early as possible in the call stack.
impl HeifError {
    fn on_error(error: HeifError) -> HeifError {
        log::debug!("returning error: {error}");
        error
    }

    pub(crate) fn not_found<T>() -> Result<T, HeifError> {
        Err(HeifError::on_error(HeifError::NotFound))
    }
    pub(crate) fn out_of_range<T>() -> Result<T, HeifError> {
        Err(HeifError::on_error(HeifError::OutOfRange))
    }

    pub(crate) fn reference_not_found<T, O>(object: O) -> Result<T, HeifError>
    where
        O: fmt::Display,
    {
        Err(HeifError::on_error(HeifError::ReferenceNotFound(
            object.to_string(),
        )))
    }
    pub(crate) fn malformed_stream<T, O>(object: O) -> Result<T, HeifError>
    where
        O: fmt::Display,
    {
        Err(HeifError::on_error(HeifError::MalformedStream(
            object.to_string(),
        )))
    }
    pub(crate) fn precondition_violation<T, O>(object: O) -> Result<T, HeifError>
    where
        O: fmt::Display,
    {
        Err(HeifError::on_error(HeifError::PreconditionViolation(
            object.to_string(),
        )))
    }
    pub(crate) fn unknown_error<T, O>(object: O) -> Result<T, HeifError>
    where
        O: fmt::Display,
    {
        Err(HeifError::on_error(HeifError::UnknownError(
            object.to_string(),
        )))
    }
}

impl fmt::Display for HeifError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeifError::NotFound => write!(f, "item not found"),
            HeifError::OutOfRange => write!(f, "index out of range"),
            HeifError::ReferenceNotFound(s) => write!(f, "reference not found: {s}"),
            HeifError::MalformedStream(s) => write!(f, "malformed stream: {s}"),
            HeifError::PreconditionViolation(s) => write!(f, "precondition violation: {s}"),
            HeifError::OutOfMemory => write!(f, "out of memory"),
            HeifError::UnknownError(s) => write!(f, "unknown error: {s}"),
        }
    }
}

impl std::error::Error for HeifError {}
