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

//! Common internal utilities.

use crate::{cbor::value::Value, common::int_to_i64, CodecError, Result};

#[cfg(test)]
mod tests;

/// Return an error indicating that an unexpected CBOR type was encountered.
pub(crate) fn cbor_type_error<T>(value: &Value, want: &'static str) -> Result<T> {
    let got = match value {
        Value::Integer(_) => "int",
        Value::Bytes(_) => "bstr",
        Value::Float(_) => "float",
        Value::Text(_) => "tstr",
        Value::Bool(_) => "bool",
        Value::Null => "nul",
        Value::Tag(_, _) => "tag",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        _ => "other",
    };
    Err(CodecError::UnexpectedItem(got, want))
}

/// Trait which augments the [`Value`] type with methods for convenient conversions to contained
/// types which throw a [`CodecError`] if the Value is not of the expected type.
pub(crate) trait ValueTryAs
where
    Self: Sized,
{
    /// Extractor for [`Value::Integer`], narrowed to `i64`.
    fn try_as_i64(self) -> Result<i64>;

    /// Extractor for [`Value::Bytes`]
    fn try_as_bytes(self) -> Result<Vec<u8>>;

    /// Extractor for [`Value::Text`]
    fn try_as_string(self) -> Result<String>;

    /// Extractor for [`Value::Bool`]
    fn try_as_bool(self) -> Result<bool>;

    /// Extractor for [`Value::Map`]
    fn try_as_map(self) -> Result<Vec<(Value, Value)>>;
}

impl ValueTryAs for Value {
    fn try_as_i64(self) -> Result<i64> {
        if let Value::Integer(i) = self {
            int_to_i64(i)
        } else {
            cbor_type_error(&self, "int")
        }
    }

    fn try_as_bytes(self) -> Result<Vec<u8>> {
        if let Value::Bytes(b) = self {
            Ok(b)
        } else {
            cbor_type_error(&self, "bstr")
        }
    }

    fn try_as_string(self) -> Result<String> {
        if let Value::Text(s) = self {
            Ok(s)
        } else {
            cbor_type_error(&self, "tstr")
        }
    }

    fn try_as_bool(self) -> Result<bool> {
        if let Value::Bool(b) = self {
            Ok(b)
        } else {
            cbor_type_error(&self, "bool")
        }
    }

    fn try_as_map(self) -> Result<Vec<(Value, Value)>> {
        if let Value::Map(m) = self {
            Ok(m)
        } else {
            cbor_type_error(&self, "map")
        }
    }
}

/// Check for an expected error.
#[cfg(test)]
pub fn expect_err<T, E>(result: Result<T, E>, err_msg: &str)
where
    T: core::fmt::Debug,
    E: core::fmt::Debug + core::fmt::Display,
{
    match result {
        Ok(v) => panic!("expected error containing '{}', got success {:?}", err_msg, v),
        Err(err) => {
            assert!(
                format!("{:?}", err).contains(err_msg) || err.to_string().contains(err_msg),
                "unexpected error {:?}, doesn't contain '{}'",
                err,
                err_msg
            );
        }
    }
}

// Macros to reduce boilerplate when creating `SomethingBuilder` structures.

/// Add `new()` and `build()` methods to the builder.
macro_rules! builder {
    ( $otype: ty ) => {
        /// Constructor for builder.
        pub fn new() -> Self {
            Self(<$otype>::default())
        }
        /// Build the completed object.
        pub fn build(self) -> $otype {
            self.0
        }
    };
}

/// Add a setter function for a field to the builder.
macro_rules! builder_set {
    ( $name:ident: $ftype:ty ) => {
        /// Set the associated field.
        #[must_use]
        pub fn $name(mut self, $name: $ftype) -> Self {
            self.0.$name = $name;
            self
        }
    };
}

/// Add a setter function for an optional field to the builder.
macro_rules! builder_set_optional {
    ( $name:ident: $ftype:ty ) => {
        /// Set the associated field.
        #[must_use]
        pub fn $name(mut self, $name: $ftype) -> Self {
            self.0.$name = Some($name);
            self
        }
    };
}

/// Deserialize a [`Duration`](std::time::Duration) expressed in whole seconds.
pub(crate) fn duration_secs<'de, D>(deserializer: D) -> Result<std::time::Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = <u64 as serde::Deserialize>::deserialize(deserializer)?;
    Ok(std::time::Duration::from_secs(secs))
}
