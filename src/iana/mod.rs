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

//! Enumerations for registered values.
//!
//! Sources:
//! - YANG SID files for `ietf-voucher` and `ietf-voucher-request` (constrained voucher drafts)
//! - <https://www.iana.org/assignments/cbor-tags/cbor-tags.xhtml>
//! - <https://www.iana.org/assignments/core-parameters/core-parameters.xhtml#content-formats>

#[cfg(test)]
mod tests;

/// Trait indicating an enum that can be constructed from `i64` values.
pub trait EnumI64: Sized + Eq {
    fn from_i64(i: i64) -> Option<Self>;
    fn to_i64(&self) -> i64;
}

/// Generate an enum with associated values, plus a `from_i64` method.
macro_rules! iana_registry {
    ( $(#[$attr:meta])* $enum_name:ident {$($(#[$fattr:meta])* $name:ident: $val:expr,)* } ) => {
        #[allow(non_camel_case_types)]
        $(#[$attr])*
        #[non_exhaustive]
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub enum $enum_name {
            $($(#[$fattr])* $name = $val,)*
        }
        impl EnumI64 for $enum_name {
            fn from_i64(i: i64) -> Option<Self> {
                match i {
                    $(x if x == Self::$name as i64 => Some(Self::$name),)*
                    _ => None,
                }
            }
            #[inline]
            fn to_i64(&self) -> i64 {
                *self as i64
            }
        }
    }
}

iana_registry! {
    /// SIDs allocated to the `ietf-voucher` YANG module.
    ///
    /// The container SID is the base identifier; every leaf is allocated at a fixed offset above it.
    VoucherSid {
        /// Container `ietf-voucher:voucher`
        Voucher: 2451,
        /// Leaf `assertion`
        Assertion: 2452,
        /// Leaf `created-on`
        CreatedOn: 2453,
        /// Leaf `domain-cert-revocation-checks`
        DomainCertRevocationChecks: 2454,
        /// Leaf `expires-on`
        ExpiresOn: 2455,
        /// Leaf `idevid-issuer`
        IdevidIssuer: 2456,
        /// Leaf `last-renewal-date`
        LastRenewalDate: 2457,
        /// Leaf `nonce`
        Nonce: 2458,
        /// Leaf `pinned-domain-cert`
        PinnedDomainCert: 2459,
        /// Leaf `pinned-domain-subject-public-key-info`
        PinnedDomainSpki: 2460,
        /// Leaf `pinned-domain-pubk-sha256`
        PinnedSha256DomainSpki: 2461,
        /// Leaf `serial-number`
        SerialNumber: 2462,
    }
}

iana_registry! {
    /// SIDs allocated to the `ietf-voucher-request` YANG module.
    VoucherRequestSid {
        /// Container `ietf-voucher-request:voucher`
        VoucherRequest: 2501,
        /// Leaf `assertion`
        Assertion: 2502,
        /// Leaf `created-on`
        CreatedOn: 2503,
        /// Leaf `domain-cert-revocation-checks`
        DomainCertRevocationChecks: 2504,
        /// Leaf `expires-on`
        ExpiresOn: 2505,
        /// Leaf `idevid-issuer`
        IdevidIssuer: 2506,
        /// Leaf `last-renewal-date`
        LastRenewalDate: 2507,
        /// Leaf `nonce`
        Nonce: 2508,
        /// Leaf `pinned-domain-cert`
        PinnedDomainCert: 2509,
        /// Leaf `prior-signed-voucher-request`
        PriorSignedVoucherRequest: 2510,
        /// Leaf `proximity-registrar-cert`
        ProximityRegistrarCert: 2511,
        /// Leaf `proximity-registrar-pubk-sha256`
        ProximityRegistrarSha256Spki: 2512,
        /// Leaf `proximity-registrar-subject-public-key-info`
        ProximityRegistrarSpki: 2513,
        /// Leaf `serial-number`
        SerialNumber: 2514,
    }
}

iana_registry! {
    /// CBOR tag values used by the voucher encodings.
    ///
    /// From IANA registry <https://www.iana.org/assignments/cbor-tags/cbor-tags.xhtml>
    CborTag {
        /// COSE Single Signer Data Object
        CoseSign1: 18,
        /// YANG SID item carried as an absolute value rather than a delta
        SidAbsolute: 47,
    }
}

iana_registry! {
    /// CoAP Content Formats used by the bootstrapping resources.
    ///
    /// From IANA registry <https://www.iana.org/assignments/core-parameters/core-parameters.xhtml#content-formats>,
    /// plus one value from the experimental range.
    ContentFormat {
        /// text/plain; charset=utf-8
        TextPlainUtf8: 0,
        /// application/cose; cose-type="cose-sign1"
        CoseSign1: 18,
        /// application/link-format
        LinkFormat: 40,
        /// application/json
        Json: 50,
        /// application/cbor
        Cbor: 60,
        /// application/pkcs7-mime; smime-type=certs-only
        Pkcs7MimeCertsOnly: 281,
        /// application/csrattrs
        Csrattrs: 285,
        /// application/pkcs10
        Pkcs10: 286,
        /// application/pkix-cert
        PkixCert: 287,
        /// application/voucher-cose+cbor
        VoucherCoseCbor: 836,
        /// application/voucher-cose+json (experimental range)
        VoucherCoseJson: 65503,
    }
}

impl ContentFormat {
    /// Media type string for this content format.
    pub fn media_type(&self) -> &'static str {
        match self {
            ContentFormat::TextPlainUtf8 => "text/plain; charset=utf-8",
            ContentFormat::CoseSign1 => "application/cose; cose-type=\"cose-sign1\"",
            ContentFormat::LinkFormat => "application/link-format",
            ContentFormat::Json => "application/json",
            ContentFormat::Cbor => "application/cbor",
            ContentFormat::Pkcs7MimeCertsOnly => "application/pkcs7-mime; smime-type=certs-only",
            ContentFormat::Csrattrs => "application/csrattrs",
            ContentFormat::Pkcs10 => "application/pkcs10",
            ContentFormat::PkixCert => "application/pkix-cert",
            ContentFormat::VoucherCoseCbor => "application/voucher-cose+cbor",
            ContentFormat::VoucherCoseJson => "application/voucher-cose+json",
        }
    }
}
