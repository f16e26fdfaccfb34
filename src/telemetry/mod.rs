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

//! Voucher and enrollment status telemetry.
//!
//! ```cddl
//!  status-telemetry = {
//!      "version" => uint,     ; 1
//!      "status" => bool,
//!      ? "reason" => tstr,
//!  }
//! ```

use crate::{
    cbor::value::Value,
    common::{AsCborValue, CborSerializable},
    util::{cbor_type_error, ValueTryAs},
    CodecError, Result,
};


/// Telemetry format version.
pub const TELEMETRY_VERSION: i64 = 1;

const KEY_VERSION: &str = "version";
const KEY_STATUS: &str = "status";
const KEY_REASON: &str = "reason";

/// Success or failure report sent by the pledge after processing a voucher or an enrollment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusTelemetry {
    pub version: i64,
    pub status: bool,
    pub reason: Option<String>,
}

impl StatusTelemetry {
    pub fn success() -> Self {
        Self {
            version: TELEMETRY_VERSION,
            status: true,
            reason: None,
        }
    }

    pub fn failure<S: Into<String>>(reason: S) -> Self {
        Self {
            version: TELEMETRY_VERSION,
            status: false,
            reason: Some(reason.into()),
        }
    }
}

impl CborSerializable for StatusTelemetry {}

impl AsCborValue for StatusTelemetry {
    fn from_cbor_value(value: Value) -> Result<Self> {
        let mut version = None;
        let mut status = None;
        let mut reason = None;
        for (k, v) in value.try_as_map()? {
            let key = match k {
                Value::Text(t) => t,
                k => return cbor_type_error(&k, "tstr"),
            };
            let slot_taken = match key.as_str() {
                KEY_VERSION => version.replace(v.try_as_i64()?).is_some(),
                KEY_STATUS => status.replace(v.try_as_bool()?).is_some(),
                KEY_REASON => reason.replace(v.try_as_string()?).is_some(),
                // Unknown keys are ignored.
                _ => false,
            };
            if slot_taken {
                return Err(CodecError::DuplicateMapKey);
            }
        }
        Ok(Self {
            version: version.unwrap_or(TELEMETRY_VERSION),
            status: status.ok_or(CodecError::UnexpectedItem("map", "status"))?,
            reason,
        })
    }

    fn to_cbor_value(self) -> Result<Value> {
        let mut map = vec![
            (Value::Text(KEY_VERSION.to_owned()), Value::from(self.version)),
            (Value::Text(KEY_STATUS.to_owned()), Value::Bool(self.status)),
        ];
        if let Some(reason) = self.reason {
            map.push((Value::Text(KEY_REASON.to_owned()), Value::Text(reason)));
        }
        Ok(Value::Map(map))
    }
}
