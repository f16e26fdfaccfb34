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

//! Voucher encodings.
//!
//! Three wire forms are supported:
//! - compact CBOR, where the container is keyed by its SID and every leaf by its SID, either as
//!   a delta against the container SID or as an absolute SID under tag 47;
//! - unconstrained CBOR, keyed by the full YANG names;
//! - JSON, keyed by the full YANG names with binary leaves in Base64.
//!
//! ```cddl
//!   voucher-cbor = {
//!       (2451 / "ietf-voucher:voucher") => leaves   ; voucher
//!     // (2501 / "ietf-voucher-request:voucher") => leaves   ; voucher request
//!   }
//!   leaves = { * (delta-sid / #6.47(sid) / tstr) => any }
//! ```

use crate::{
    cbor::value::Value,
    common::{int_to_i64, AsCborValue, CborSerializable},
    iana::{CborTag, ContentFormat, EnumI64},
    util::{cbor_type_error, ValueTryAs},
    voucher::{Assertion, Field, Voucher, VoucherKind},
    CodecError, Result,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};


/// How SID keys are written in the compact CBOR form.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SidForm {
    /// Key each leaf by its offset from the container SID.
    #[default]
    Delta,
    /// Key each leaf by its absolute SID, wrapped in tag 47.
    Absolute,
}

/// Serialization used for a voucher or voucher request payload.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoucherFormat {
    #[default]
    Cbor,
    Json,
}

impl VoucherFormat {
    /// Content format of a COSE-signed payload in this serialization.
    pub fn signed_content_format(self) -> ContentFormat {
        match self {
            VoucherFormat::Cbor => ContentFormat::VoucherCoseCbor,
            VoucherFormat::Json => ContentFormat::VoucherCoseJson,
        }
    }

    /// Serialization carried by a COSE-signed content format.
    pub fn from_signed_content_format(cf: ContentFormat) -> Option<Self> {
        match cf {
            ContentFormat::VoucherCoseCbor => Some(VoucherFormat::Cbor),
            ContentFormat::VoucherCoseJson => Some(VoucherFormat::Json),
            _ => None,
        }
    }

    /// Content format of the bare (unsigned) payload.
    pub fn payload_content_format(self) -> ContentFormat {
        match self {
            VoucherFormat::Cbor => ContentFormat::Cbor,
            VoucherFormat::Json => ContentFormat::Json,
        }
    }
}

fn sid_absolute_tag() -> u64 {
    CborTag::SidAbsolute.to_i64() as u64
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_date(text: String) -> Result<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(&text) {
        Ok(d) => Ok(d.with_timezone(&Utc)),
        Err(_) => Err(CodecError::InvalidDate(text)),
    }
}

fn date_slot(voucher: &mut Voucher, field: Field) -> Option<&mut Option<DateTime<Utc>>> {
    match field {
        Field::CreatedOn => Some(&mut voucher.created_on),
        Field::ExpiresOn => Some(&mut voucher.expires_on),
        Field::LastRenewalDate => Some(&mut voucher.last_renewal_date),
        _ => None,
    }
}

fn bytes_slot(voucher: &mut Voucher, field: Field) -> Option<&mut Option<Vec<u8>>> {
    match field {
        Field::IdevidIssuer => Some(&mut voucher.idevid_issuer),
        Field::Nonce => Some(&mut voucher.nonce),
        Field::PinnedDomainCert => Some(&mut voucher.pinned_domain_cert),
        Field::PinnedDomainSpki => Some(&mut voucher.pinned_domain_spki),
        Field::PinnedSha256DomainSpki => Some(&mut voucher.pinned_sha256_domain_spki),
        Field::PriorSignedVoucherRequest => Some(&mut voucher.prior_signed_voucher_request),
        Field::ProximityRegistrarCert => Some(&mut voucher.proximity_registrar_cert),
        Field::ProximityRegistrarSha256Spki => Some(&mut voucher.proximity_registrar_sha256_spki),
        Field::ProximityRegistrarSpki => Some(&mut voucher.proximity_registrar_spki),
        _ => None,
    }
}

/// Field values independent of wire form.
enum Leaf {
    Assertion(Assertion),
    Date(DateTime<Utc>),
    Bytes(Vec<u8>),
    Text(String),
    Bool(bool),
}

/// Move the populated fields out of a voucher, in YANG leaf order.
fn into_leaves(mut voucher: Voucher) -> Vec<(Field, Leaf)> {
    let mut leaves = Vec::new();
    for field in Field::ALL {
        let leaf = match field {
            Field::Assertion => voucher.assertion.map(Leaf::Assertion),
            Field::SerialNumber => voucher.serial_number.take().map(Leaf::Text),
            Field::DomainCertRevocationChecks => voucher
                .domain_cert_revocation_checks
                .then_some(Leaf::Bool(true)),
            f => match date_slot(&mut voucher, f) {
                Some(slot) => slot.take().map(Leaf::Date),
                None => bytes_slot(&mut voucher, f).and_then(|s| s.take()).map(Leaf::Bytes),
            },
        };
        if let Some(leaf) = leaf {
            leaves.push((field, leaf));
        }
    }
    leaves
}

// CBOR form.

/// Map key for `field` in the requested form.  Leaves without a SID in this kind fall back to the
/// full name, giving a mixed-key map.
fn cbor_key(kind: VoucherKind, constrained: bool, form: SidForm, field: Field) -> Value {
    if constrained {
        if let Some(sid) = kind.sid(field) {
            return if form == SidForm::Delta && kind.in_delta_range(sid) {
                Value::Integer((sid - kind.base_sid()).into())
            } else {
                Value::Tag(sid_absolute_tag(), Box::new(Value::Integer(sid.into())))
            };
        }
    }
    Value::Text(field.name().to_owned())
}

fn leaf_to_cbor(leaf: Leaf, constrained: bool) -> Value {
    match leaf {
        Leaf::Assertion(a) if constrained => Value::Integer(a.to_i64().into()),
        Leaf::Assertion(a) => Value::Text(a.as_str().to_owned()),
        Leaf::Date(d) => Value::Text(format_date(&d)),
        Leaf::Bytes(b) => Value::Bytes(b),
        Leaf::Text(t) => Value::Text(t),
        Leaf::Bool(b) => Value::Bool(b),
    }
}

/// Find the value stored for `field` among the leaves of a container.
///
/// The lookup tries, in order:
/// 1. the absolute SID wrapped in tag 47,
/// 2. the SID as a delta against the container SID (untagged),
/// 3. the full YANG name.
///
/// A field matched by none of these is absent, which is not an error.
fn lookup_leaf(entries: &[(Value, Value)], kind: VoucherKind, field: Field) -> Option<&Value> {
    let find = |key: &Value| entries.iter().find(|(k, _)| k == key).map(|(_, v)| v);

    if let Some(sid) = kind.sid(field) {
        let absolute = Value::Tag(sid_absolute_tag(), Box::new(Value::Integer(sid.into())));
        if let Some(v) = find(&absolute) {
            return Some(v);
        }
        if kind.in_delta_range(sid) {
            let delta = Value::Integer((sid - kind.base_sid()).into());
            if let Some(v) = find(&delta) {
                return Some(v);
            }
        }
    }
    find(&Value::Text(field.name().to_owned()))
}

fn set_from_cbor(voucher: &mut Voucher, field: Field, value: Value) -> Result<()> {
    match field {
        Field::Assertion => {
            let assertion = match value {
                Value::Integer(i) => {
                    let i = int_to_i64(i)?;
                    Assertion::from_i64(i).ok_or(CodecError::UnknownAssertion(i.to_string()))?
                }
                Value::Text(t) => {
                    Assertion::from_name(&t).ok_or(CodecError::UnknownAssertion(t))?
                }
                v => return cbor_type_error(&v, "int/tstr"),
            };
            voucher.assertion = Some(assertion);
        }
        Field::SerialNumber => voucher.serial_number = Some(value.try_as_string()?),
        Field::DomainCertRevocationChecks => {
            voucher.domain_cert_revocation_checks = value.try_as_bool()?
        }
        f => {
            if let Some(slot) = date_slot(voucher, f) {
                *slot = Some(parse_date(value.try_as_string()?)?);
            } else if let Some(slot) = bytes_slot(voucher, f) {
                *slot = Some(value.try_as_bytes()?);
            }
        }
    }
    Ok(())
}

fn check_duplicate_keys(entries: &[(Value, Value)]) -> Result<()> {
    for (i, (key, _)) in entries.iter().enumerate() {
        // The `ciborium` CBOR library does not police duplicate map keys, so do it here.
        if entries[i + 1..].iter().any(|(k, _)| k == key) {
            return Err(CodecError::DuplicateMapKey);
        }
    }
    Ok(())
}

impl Voucher {
    /// Convert into a CBOR [`Value`], choosing how compact keys are written.
    pub fn to_cbor_value_with(self, form: SidForm) -> Result<Value> {
        let kind = self.kind;
        let constrained = self.constrained;
        let leaves = into_leaves(self)
            .into_iter()
            .map(|(field, leaf)| {
                (
                    cbor_key(kind, constrained, form, field),
                    leaf_to_cbor(leaf, constrained),
                )
            })
            .collect();
        let wrapper = if constrained {
            Value::Integer(kind.base_sid().into())
        } else {
            Value::Text(kind.wrapper_name().to_owned())
        };
        Ok(Value::Map(vec![(wrapper, Value::Map(leaves))]))
    }

    /// Serialize to CBOR, choosing how compact keys are written.
    pub fn to_vec_with(self, form: SidForm) -> Result<Vec<u8>> {
        crate::common::write_value(&self.to_cbor_value_with(form)?)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let kind = self.kind;
        let mut leaves = serde_json::Map::new();
        for (field, leaf) in into_leaves(self.clone()) {
            let value = match leaf {
                Leaf::Assertion(a) => serde_json::Value::String(a.as_str().to_owned()),
                Leaf::Date(d) => serde_json::Value::String(format_date(&d)),
                Leaf::Bytes(b) => serde_json::Value::String(BASE64.encode(b)),
                Leaf::Text(t) => serde_json::Value::String(t),
                Leaf::Bool(b) => serde_json::Value::Bool(b),
            };
            leaves.insert(field.name().to_owned(), value);
        }
        let mut outer = serde_json::Map::new();
        outer.insert(
            kind.wrapper_name().to_owned(),
            serde_json::Value::Object(leaves),
        );
        Ok(serde_json::to_vec(&serde_json::Value::Object(outer))?)
    }

    /// Parse a JSON voucher or voucher request.  The result is never `constrained`, as JSON has
    /// no compact form.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let outer = match serde_json::from_slice::<serde_json::Value>(data)? {
            serde_json::Value::Object(m) => m,
            v => return json_type_error(&v, "object"),
        };
        // Exactly one voucher (request) per message: only the first entry is considered.
        let (name, inner) = outer.into_iter().next().ok_or(CodecError::MissingWrapper)?;
        let kind = VoucherKind::from_wrapper_name(&name)
            .ok_or_else(|| CodecError::UnknownWrapper(format!("{name:?}")))?;
        let mut leaves = match inner {
            serde_json::Value::Object(m) => m,
            v => return json_type_error(&v, "object"),
        };

        let mut voucher = Voucher::new(kind);
        for field in Field::ALL {
            let Some(value) = leaves.remove(field.name()) else {
                continue;
            };
            match field {
                Field::Assertion => {
                    let name = json_string(value)?;
                    voucher.assertion = Some(
                        Assertion::from_name(&name).ok_or(CodecError::UnknownAssertion(name))?,
                    );
                }
                Field::SerialNumber => voucher.serial_number = Some(json_string(value)?),
                Field::DomainCertRevocationChecks => match value {
                    serde_json::Value::Bool(b) => voucher.domain_cert_revocation_checks = b,
                    v => return json_type_error(&v, "bool"),
                },
                f => {
                    let text = json_string(value)?;
                    if let Some(slot) = date_slot(&mut voucher, f) {
                        *slot = Some(parse_date(text)?);
                    } else if let Some(slot) = bytes_slot(&mut voucher, f) {
                        let bytes = BASE64
                            .decode(text.as_bytes())
                            .map_err(|_| CodecError::UnexpectedItem("tstr", "base64"))?;
                        *slot = Some(bytes);
                    }
                }
            }
        }
        Ok(voucher)
    }

    /// Serialize in the given format; CBOR output honours the `constrained` flag.
    pub fn encode(&self, format: VoucherFormat) -> Result<Vec<u8>> {
        match format {
            VoucherFormat::Cbor => self.clone().to_vec(),
            VoucherFormat::Json => self.to_json(),
        }
    }

    /// Parse in the given format.
    pub fn decode(format: VoucherFormat, data: &[u8]) -> Result<Self> {
        match format {
            VoucherFormat::Cbor => Self::from_slice(data),
            VoucherFormat::Json => Self::from_json(data),
        }
    }
}

fn json_type_error<T>(value: &serde_json::Value, want: &'static str) -> Result<T> {
    let got = match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    };
    Err(CodecError::UnexpectedItem(got, want))
}

fn json_string(value: serde_json::Value) -> Result<String> {
    match value {
        serde_json::Value::String(s) => Ok(s),
        v => json_type_error(&v, "string"),
    }
}

impl CborSerializable for Voucher {}

impl AsCborValue for Voucher {
    fn from_cbor_value(value: Value) -> Result<Self> {
        let outer = value.try_as_map()?;
        // Exactly one voucher (request) per message: only the first entry is considered.
        let (key, inner) = outer.into_iter().next().ok_or(CodecError::MissingWrapper)?;
        let (kind, constrained) = match key {
            Value::Integer(i) => {
                let sid = int_to_i64(i)?;
                let kind = VoucherKind::from_base_sid(sid)
                    .ok_or_else(|| CodecError::UnknownWrapper(sid.to_string()))?;
                (kind, true)
            }
            Value::Text(t) => {
                let kind = VoucherKind::from_wrapper_name(&t)
                    .ok_or_else(|| CodecError::UnknownWrapper(format!("{t:?}")))?;
                (kind, false)
            }
            v => return cbor_type_error(&v, "int/tstr"),
        };

        let entries = inner.try_as_map()?;
        check_duplicate_keys(&entries)?;

        let mut voucher = Voucher::new(kind);
        voucher.constrained = constrained;
        for field in Field::ALL {
            if let Some(value) = lookup_leaf(&entries, kind, field) {
                set_from_cbor(&mut voucher, field, value.clone())?;
            }
        }
        Ok(voucher)
    }

    fn to_cbor_value(self) -> Result<Value> {
        self.to_cbor_value_with(SidForm::Delta)
    }
}
