// Copyright 2021 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
////////////////////////////////////////////////////////////////////////////////

//! Common types.

use crate::cbor::value::Value;
use std::convert::TryInto;

#[cfg(test)]
mod tests;

/// Marker structure indicating that the EOF was encountered when reading CBOR data.
#[derive(Debug)]
pub struct EndOfFile;

/// Error type for failures in encoding or decoding vouchers and voucher requests.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// CBOR decoding failure.
    #[error("decode CBOR failure: {0}")]
    DecodeFailed(ciborium::de::Error<EndOfFile>),
    /// Duplicate map key detected.
    #[error("duplicate map key")]
    DuplicateMapKey,
    /// CBOR encoding failure.
    #[error("encode CBOR failure")]
    EncodeFailed,
    /// CBOR input had extra data.
    #[error("extraneous data in CBOR input")]
    ExtraneousData,
    /// The outer map did not contain any entry.
    #[error("missing voucher wrapper")]
    MissingWrapper,
    /// The outer map key names neither a voucher nor a voucher request.
    #[error("unknown voucher wrapper key {0}")]
    UnknownWrapper(String),
    /// Integer value on the wire is outside the range of integers representable in this crate.
    #[error("out of range integer value")]
    OutOfRangeIntegerValue,
    /// Unexpected CBOR item encountered (got, want).
    #[error("got {0}, expected {1}")]
    UnexpectedItem(&'static str, &'static str),
    /// Unrecognized assertion value.
    #[error("unknown assertion {0}")]
    UnknownAssertion(String),
    /// Date field that is not valid RFC 3339.
    #[error("invalid date {0:?}")]
    InvalidDate(String),
    /// JSON encoding or decoding failure.
    #[error("JSON failure: {0}")]
    Json(#[from] serde_json::Error),
}

/// Crate-specific Result type
pub type Result<T, E = CodecError> = core::result::Result<T, E>;

impl<T> From<ciborium::de::Error<T>> for CodecError {
    fn from(e: ciborium::de::Error<T>) -> Self {
        // Make sure we use our [`EndOfFile`] marker.
        use ciborium::de::Error::{Io, RecursionLimitExceeded, Semantic, Syntax};
        let e = match e {
            Io(_) => Io(EndOfFile),
            Syntax(x) => Syntax(x),
            Semantic(a, b) => Semantic(a, b),
            RecursionLimitExceeded => RecursionLimitExceeded,
        };
        CodecError::DecodeFailed(e)
    }
}

impl<T> From<ciborium::ser::Error<T>> for CodecError {
    fn from(_e: ciborium::ser::Error<T>) -> Self {
        CodecError::EncodeFailed
    }
}

impl From<core::num::TryFromIntError> for CodecError {
    fn from(_: core::num::TryFromIntError) -> Self {
        CodecError::OutOfRangeIntegerValue
    }
}

/// Read a CBOR [`Value`] from a byte slice, failing if any extra data remains after the `Value` has
/// been read.
pub(crate) fn read_to_value(mut slice: &[u8]) -> Result<Value> {
    let value = ciborium::de::from_reader(&mut slice)?;
    if slice.is_empty() {
        Ok(value)
    } else {
        Err(CodecError::ExtraneousData)
    }
}

/// Serialize a CBOR [`Value`] into a fresh vector.
pub(crate) fn write_value(value: &Value) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    ciborium::ser::into_writer(value, &mut data)?;
    Ok(data)
}

/// Trait for types that can be converted to/from a [`Value`].
pub trait AsCborValue: Sized {
    /// Convert a [`Value`] into an instance of the type.
    fn from_cbor_value(value: Value) -> Result<Self>;
    /// Convert the object into a [`Value`], consuming it along the way.
    fn to_cbor_value(self) -> Result<Value>;
}

/// Extension trait that adds serialization/deserialization methods.
pub trait CborSerializable: AsCborValue {
    /// Create an object instance from serialized CBOR data in a slice.  This method will fail (with
    /// `CodecError::ExtraneousData`) if there is additional CBOR data after the object.
    fn from_slice(slice: &[u8]) -> Result<Self> {
        Self::from_cbor_value(read_to_value(slice)?)
    }

    /// Serialize this object to a vector, consuming it along the way.
    fn to_vec(self) -> Result<Vec<u8>> {
        write_value(&self.to_cbor_value()?)
    }
}

/// Trivial implementation of [`AsCborValue`] for [`Value`].
impl AsCborValue for Value {
    fn from_cbor_value(value: Value) -> Result<Self> {
        Ok(value)
    }
    fn to_cbor_value(self) -> Result<Value> {
        Ok(self)
    }
}

impl CborSerializable for Value {}

/// Convert a CBOR integer into an `i64`, failing on values outside that range.
pub(crate) fn int_to_i64(i: ciborium::value::Integer) -> Result<i64> {
    Ok(i.try_into()?)
}
