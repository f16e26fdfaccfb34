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

//! Voucher and voucher request data model.
//!
//! A single [`Voucher`] structure carries both messages of the bootstrapping exchange: the `kind`
//! field says whether it is a MASA-issued voucher or a voucher request, and the `constrained` flag
//! selects the compact (SID-keyed) CBOR encoding.

use crate::iana::{self, EnumI64};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};


/// Assertion made by the voucher issuer about how ownership of the pledge was established.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Assertion {
    Verified = 0,
    Logged = 1,
    Proximity = 2,
}

impl Assertion {
    /// Integer wire form.
    pub fn to_i64(self) -> i64 {
        self as i64
    }

    /// Parse the integer wire form.
    pub fn from_i64(i: i64) -> Option<Self> {
        match i {
            0 => Some(Assertion::Verified),
            1 => Some(Assertion::Logged),
            2 => Some(Assertion::Proximity),
            _ => None,
        }
    }

    /// Lowercase string wire form.
    pub fn as_str(self) -> &'static str {
        match self {
            Assertion::Verified => "verified",
            Assertion::Logged => "logged",
            Assertion::Proximity => "proximity",
        }
    }

    /// Parse the lowercase string wire form.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "verified" => Some(Assertion::Verified),
            "logged" => Some(Assertion::Logged),
            "proximity" => Some(Assertion::Proximity),
            _ => None,
        }
    }
}

/// Fields that may appear in a voucher or voucher request.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Field {
    Assertion,
    CreatedOn,
    DomainCertRevocationChecks,
    ExpiresOn,
    IdevidIssuer,
    LastRenewalDate,
    Nonce,
    PinnedDomainCert,
    PinnedDomainSpki,
    PinnedSha256DomainSpki,
    PriorSignedVoucherRequest,
    ProximityRegistrarCert,
    ProximityRegistrarSha256Spki,
    ProximityRegistrarSpki,
    SerialNumber,
}

impl Field {
    /// Every field, in YANG leaf order.
    pub const ALL: [Field; 15] = [
        Field::Assertion,
        Field::CreatedOn,
        Field::DomainCertRevocationChecks,
        Field::ExpiresOn,
        Field::IdevidIssuer,
        Field::LastRenewalDate,
        Field::Nonce,
        Field::PinnedDomainCert,
        Field::PinnedDomainSpki,
        Field::PinnedSha256DomainSpki,
        Field::PriorSignedVoucherRequest,
        Field::ProximityRegistrarCert,
        Field::ProximityRegistrarSha256Spki,
        Field::ProximityRegistrarSpki,
        Field::SerialNumber,
    ];

    /// Full YANG leaf name, used as the map key in the JSON and unconstrained CBOR forms.
    pub fn name(self) -> &'static str {
        match self {
            Field::Assertion => "assertion",
            Field::CreatedOn => "created-on",
            Field::DomainCertRevocationChecks => "domain-cert-revocation-checks",
            Field::ExpiresOn => "expires-on",
            Field::IdevidIssuer => "idevid-issuer",
            Field::LastRenewalDate => "last-renewal-date",
            Field::Nonce => "nonce",
            Field::PinnedDomainCert => "pinned-domain-cert",
            Field::PinnedDomainSpki => "pinned-domain-subject-public-key-info",
            Field::PinnedSha256DomainSpki => "pinned-domain-pubk-sha256",
            Field::PriorSignedVoucherRequest => "prior-signed-voucher-request",
            Field::ProximityRegistrarCert => "proximity-registrar-cert",
            Field::ProximityRegistrarSha256Spki => "proximity-registrar-pubk-sha256",
            Field::ProximityRegistrarSpki => "proximity-registrar-subject-public-key-info",
            Field::SerialNumber => "serial-number",
        }
    }
}

const fn voucher_offset(sid: iana::VoucherSid) -> i64 {
    sid as i64 - iana::VoucherSid::Voucher as i64
}

const fn request_offset(sid: iana::VoucherRequestSid) -> i64 {
    sid as i64 - iana::VoucherRequestSid::VoucherRequest as i64
}

/// (field, offset above the container SID) for vouchers.
const VOUCHER_SIDS: &[(Field, i64)] = &[
    (Field::Assertion, voucher_offset(iana::VoucherSid::Assertion)),
    (Field::CreatedOn, voucher_offset(iana::VoucherSid::CreatedOn)),
    (
        Field::DomainCertRevocationChecks,
        voucher_offset(iana::VoucherSid::DomainCertRevocationChecks),
    ),
    (Field::ExpiresOn, voucher_offset(iana::VoucherSid::ExpiresOn)),
    (Field::IdevidIssuer, voucher_offset(iana::VoucherSid::IdevidIssuer)),
    (
        Field::LastRenewalDate,
        voucher_offset(iana::VoucherSid::LastRenewalDate),
    ),
    (Field::Nonce, voucher_offset(iana::VoucherSid::Nonce)),
    (
        Field::PinnedDomainCert,
        voucher_offset(iana::VoucherSid::PinnedDomainCert),
    ),
    (
        Field::PinnedDomainSpki,
        voucher_offset(iana::VoucherSid::PinnedDomainSpki),
    ),
    (
        Field::PinnedSha256DomainSpki,
        voucher_offset(iana::VoucherSid::PinnedSha256DomainSpki),
    ),
    (Field::SerialNumber, voucher_offset(iana::VoucherSid::SerialNumber)),
];

/// (field, offset above the container SID) for voucher requests.
const VOUCHER_REQUEST_SIDS: &[(Field, i64)] = &[
    (Field::Assertion, request_offset(iana::VoucherRequestSid::Assertion)),
    (Field::CreatedOn, request_offset(iana::VoucherRequestSid::CreatedOn)),
    (
        Field::DomainCertRevocationChecks,
        request_offset(iana::VoucherRequestSid::DomainCertRevocationChecks),
    ),
    (Field::ExpiresOn, request_offset(iana::VoucherRequestSid::ExpiresOn)),
    (
        Field::IdevidIssuer,
        request_offset(iana::VoucherRequestSid::IdevidIssuer),
    ),
    (
        Field::LastRenewalDate,
        request_offset(iana::VoucherRequestSid::LastRenewalDate),
    ),
    (Field::Nonce, request_offset(iana::VoucherRequestSid::Nonce)),
    (
        Field::PinnedDomainCert,
        request_offset(iana::VoucherRequestSid::PinnedDomainCert),
    ),
    (
        Field::PriorSignedVoucherRequest,
        request_offset(iana::VoucherRequestSid::PriorSignedVoucherRequest),
    ),
    (
        Field::ProximityRegistrarCert,
        request_offset(iana::VoucherRequestSid::ProximityRegistrarCert),
    ),
    (
        Field::ProximityRegistrarSha256Spki,
        request_offset(iana::VoucherRequestSid::ProximityRegistrarSha256Spki),
    ),
    (
        Field::ProximityRegistrarSpki,
        request_offset(iana::VoucherRequestSid::ProximityRegistrarSpki),
    ),
    (
        Field::SerialNumber,
        request_offset(iana::VoucherRequestSid::SerialNumber),
    ),
];

/// Which of the two bootstrapping messages a [`Voucher`] represents.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum VoucherKind {
    /// Voucher issued by the MASA.
    #[default]
    Voucher,
    /// Voucher request built by a pledge or registrar.
    VoucherRequest,
}

impl VoucherKind {
    /// SID of the enclosing container; leaf SIDs are allocated above it.
    pub fn base_sid(self) -> i64 {
        match self {
            VoucherKind::Voucher => iana::VoucherSid::Voucher.to_i64(),
            VoucherKind::VoucherRequest => iana::VoucherRequestSid::VoucherRequest.to_i64(),
        }
    }

    /// Name of the enclosing container in the unconstrained encodings.
    pub fn wrapper_name(self) -> &'static str {
        match self {
            VoucherKind::Voucher => "ietf-voucher:voucher",
            VoucherKind::VoucherRequest => "ietf-voucher-request:voucher",
        }
    }

    /// Identify a kind from its container SID.
    pub fn from_base_sid(sid: i64) -> Option<Self> {
        [VoucherKind::Voucher, VoucherKind::VoucherRequest]
            .into_iter()
            .find(|k| k.base_sid() == sid)
    }

    /// Identify a kind from its container name.
    pub fn from_wrapper_name(name: &str) -> Option<Self> {
        [VoucherKind::Voucher, VoucherKind::VoucherRequest]
            .into_iter()
            .find(|k| k.wrapper_name() == name)
    }

    /// The (field, offset) table for this kind.
    pub fn sid_table(self) -> &'static [(Field, i64)] {
        match self {
            VoucherKind::Voucher => VOUCHER_SIDS,
            VoucherKind::VoucherRequest => VOUCHER_REQUEST_SIDS,
        }
    }

    /// Offset of `field` above the container SID, if the field has a SID in this kind.
    pub fn sid_offset(self, field: Field) -> Option<i64> {
        self.sid_table()
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, offset)| *offset)
    }

    /// Absolute SID of `field`, if the field has a SID in this kind.
    pub fn sid(self, field: Field) -> Option<i64> {
        self.sid_offset(field).map(|offset| self.base_sid() + offset)
    }

    /// Whether an absolute SID lies in the range that may be delta-encoded against this container.
    pub fn in_delta_range(self, sid: i64) -> bool {
        let max = self
            .sid_table()
            .iter()
            .map(|(_, offset)| *offset)
            .max()
            .unwrap_or(0);
        sid > self.base_sid() && sid <= self.base_sid() + max
    }
}

/// Reason a voucher or voucher request is not semantically valid.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ValidationFailure {
    #[error("missing assertion")]
    MissingAssertion,
    #[error("missing created-on")]
    MissingCreatedOn,
    #[error("missing serial-number")]
    MissingSerialNumber,
    #[error("missing pinned-domain-cert or pinned-domain-subject-public-key-info")]
    MissingPinnedDomain,
    #[error("expires-on and nonce are mutually exclusive")]
    NonceWithExpiry,
    #[error("last-renewal-date requires expires-on")]
    RenewalWithoutExpiry,
    #[error("proximity-registrar fields are not allowed in a voucher")]
    ProximityFieldsInVoucher,
    #[error("proximity assertion requires the proximity registrar key or certificate")]
    MissingProximityRegistrar,
}

/// Voucher or voucher request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Voucher {
    /// Voucher or voucher request.
    pub kind: VoucherKind,
    /// Use the compact SID-keyed encoding.
    pub constrained: bool,
    pub assertion: Option<Assertion>,
    pub created_on: Option<DateTime<Utc>>,
    pub expires_on: Option<DateTime<Utc>>,
    pub last_renewal_date: Option<DateTime<Utc>>,
    pub nonce: Option<Vec<u8>>,
    pub serial_number: Option<String>,
    /// Authority key identifier of the pledge's IDevID issuer.
    pub idevid_issuer: Option<Vec<u8>>,
    /// DER certificate of the domain, pinned as trust anchor.
    pub pinned_domain_cert: Option<Vec<u8>>,
    /// DER SubjectPublicKeyInfo of the domain, pinned as trust anchor.
    pub pinned_domain_spki: Option<Vec<u8>>,
    pub pinned_sha256_domain_spki: Option<Vec<u8>>,
    /// Signed voucher request this request was built from.
    pub prior_signed_voucher_request: Option<Vec<u8>>,
    pub proximity_registrar_cert: Option<Vec<u8>>,
    pub proximity_registrar_spki: Option<Vec<u8>>,
    pub proximity_registrar_sha256_spki: Option<Vec<u8>>,
    pub domain_cert_revocation_checks: bool,
}

impl Voucher {
    /// Create an empty message of the given kind.
    pub fn new(kind: VoucherKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    /// Indicate whether this is a voucher request.
    pub fn is_request(&self) -> bool {
        self.kind == VoucherKind::VoucherRequest
    }

    fn has_proximity_fields(&self) -> bool {
        self.proximity_registrar_cert.is_some()
            || self.proximity_registrar_spki.is_some()
            || self.proximity_registrar_sha256_spki.is_some()
    }

    /// Check the semantic invariants, returning the first one violated.
    pub fn check(&self) -> Result<(), ValidationFailure> {
        if self.serial_number.is_none() {
            return Err(ValidationFailure::MissingSerialNumber);
        }
        if self.expires_on.is_some() && self.nonce.is_some() {
            return Err(ValidationFailure::NonceWithExpiry);
        }
        if self.last_renewal_date.is_some() && self.expires_on.is_none() {
            return Err(ValidationFailure::RenewalWithoutExpiry);
        }
        match self.kind {
            VoucherKind::Voucher => {
                if self.assertion.is_none() {
                    return Err(ValidationFailure::MissingAssertion);
                }
                if self.created_on.is_none() {
                    return Err(ValidationFailure::MissingCreatedOn);
                }
                if self.pinned_domain_cert.is_none() && self.pinned_domain_spki.is_none() {
                    return Err(ValidationFailure::MissingPinnedDomain);
                }
                if self.has_proximity_fields() {
                    return Err(ValidationFailure::ProximityFieldsInVoucher);
                }
            }
            VoucherKind::VoucherRequest => {
                if self.assertion == Some(Assertion::Proximity)
                    && self.proximity_registrar_spki.is_none()
                    && self.proximity_registrar_cert.is_none()
                {
                    return Err(ValidationFailure::MissingProximityRegistrar);
                }
            }
        }
        Ok(())
    }

    /// Indicate whether the semantic invariants hold.
    pub fn validate(&self) -> bool {
        self.check().is_ok()
    }
}

/// Builder for [`Voucher`] objects.
#[derive(Debug, Default)]
pub struct VoucherBuilder(Voucher);

impl VoucherBuilder {
    builder! {Voucher}
    builder_set! {kind: VoucherKind}
    builder_set! {constrained: bool}
    builder_set_optional! {assertion: Assertion}
    builder_set_optional! {created_on: DateTime<Utc>}
    builder_set_optional! {expires_on: DateTime<Utc>}
    builder_set_optional! {last_renewal_date: DateTime<Utc>}
    builder_set_optional! {nonce: Vec<u8>}
    builder_set_optional! {idevid_issuer: Vec<u8>}
    builder_set_optional! {pinned_domain_cert: Vec<u8>}
    builder_set_optional! {pinned_domain_spki: Vec<u8>}
    builder_set_optional! {pinned_sha256_domain_spki: Vec<u8>}
    builder_set_optional! {prior_signed_voucher_request: Vec<u8>}
    builder_set_optional! {proximity_registrar_cert: Vec<u8>}
    builder_set_optional! {proximity_registrar_spki: Vec<u8>}
    builder_set_optional! {proximity_registrar_sha256_spki: Vec<u8>}
    builder_set! {domain_cert_revocation_checks: bool}

    /// Set the serial number.
    #[must_use]
    pub fn serial_number<S: Into<String>>(mut self, serial_number: S) -> Self {
        self.0.serial_number = Some(serial_number.into());
        self
    }

    /// Start building a voucher request.
    pub fn request() -> Self {
        Self::new().kind(VoucherKind::VoucherRequest)
    }
}
