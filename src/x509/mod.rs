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

//! X.509 certificate utilities and credential storage.
//!
//! # Security
//!
//! - Certificate input is limited to 16KB
//! - The `x509_parser` library handles ASN.1 parsing safely

use p256::{
    ecdsa::{
        signature::{Signer, Verifier},
        Signature, SigningKey, VerifyingKey,
    },
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey},
};
use rcgen::{DistinguishedName, DnType};
use std::collections::HashMap;
use thiserror::Error;
use x509_parser::{
    certification_request::X509CertificationRequest,
    der_parser::{
        asn1_rs::{Ia5String, ToDer},
        der::parse_der_ia5string,
    },
    prelude::*,
};


/// Maximum certificate size (16KB is generous for a single cert)
pub const MAX_CERT_SIZE: usize = 16 * 1024;

/// `id-kp-cmcRA`: the holder is a registration authority.
pub const OID_KP_CMC_RA: &str = "1.3.6.1.5.5.7.3.28";
/// Arcs of [`OID_KP_CMC_RA`].
pub const CMC_RA_ARCS: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 3, 28];
/// `id-pe-masa-url`: URI of the manufacturer's MASA, carried in IDevID certificates.
pub const OID_PE_MASA_URL: &str = "1.3.6.1.5.5.7.1.32";
/// Arcs of [`OID_PE_MASA_URL`].
pub const MASA_URL_ARCS: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 1, 32];
/// `id-at-serialNumber` subject attribute.
pub const OID_AT_SERIAL_NUMBER: &str = "2.5.4.5";

/// Errors that can occur during certificate and key operations.
#[derive(Debug, Error)]
pub enum CertError {
    #[error("certificate too large: {0} bytes (max {MAX_CERT_SIZE})")]
    TooLarge(usize),

    #[error("failed to parse X.509 structure: {0}")]
    ParseError(String),

    #[error("signature verification failed: {0}")]
    BadSignature(String),

    #[error("certificate outside its validity period")]
    Expired,

    #[error("invalid key: {0}")]
    Key(String),

    #[error("failed to generate certificate: {0}")]
    Generation(String),

    #[error("empty certificate chain")]
    EmptyChain,
}

/// Parse a DER certificate.
pub fn parse_certificate(cert_der: &[u8]) -> Result<X509Certificate<'_>, CertError> {
    // Input size validation (DoS protection)
    if cert_der.len() > MAX_CERT_SIZE {
        return Err(CertError::TooLarge(cert_der.len()));
    }
    let (_, cert) =
        X509Certificate::from_der(cert_der).map_err(|e| CertError::ParseError(e.to_string()))?;
    Ok(cert)
}

/// Extract the DER SubjectPublicKeyInfo from a DER certificate.
pub fn subject_public_key_info(cert_der: &[u8]) -> Result<Vec<u8>, CertError> {
    Ok(parse_certificate(cert_der)?.public_key().raw.to_vec())
}

/// Value of the subject `serialNumber` attribute, if any.
pub fn subject_serial_number(cert_der: &[u8]) -> Result<Option<String>, CertError> {
    let cert = parse_certificate(cert_der)?;
    for attr in cert.subject().iter_attributes() {
        if attr.attr_type().to_id_string() == OID_AT_SERIAL_NUMBER {
            let value = attr
                .as_str()
                .map_err(|e| CertError::ParseError(e.to_string()))?;
            return Ok(Some(value.to_owned()));
        }
    }
    Ok(None)
}

/// Key identifier from the authority key identifier extension, if any.
pub fn authority_key_identifier(cert_der: &[u8]) -> Result<Option<Vec<u8>>, CertError> {
    let cert = parse_certificate(cert_der)?;
    for ext in cert.extensions() {
        if let ParsedExtension::AuthorityKeyIdentifier(aki) = ext.parsed_extension() {
            return Ok(aki.key_identifier.as_ref().map(|k| k.0.to_vec()));
        }
    }
    Ok(None)
}

/// MASA URI from the `id-pe-masa-url` extension, if any.
pub fn masa_uri(cert_der: &[u8]) -> Result<Option<String>, CertError> {
    let cert = parse_certificate(cert_der)?;
    for ext in cert.extensions() {
        if ext.oid.to_id_string() == OID_PE_MASA_URL {
            return parse_ia5_string(ext.value)
                .map(Some)
                .ok_or_else(|| CertError::ParseError("malformed MASA URL extension".to_owned()));
        }
    }
    Ok(None)
}

/// Extended key usage purposes relevant to bootstrapping.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct KeyPurposes {
    pub server_auth: bool,
    pub client_auth: bool,
    pub cmc_ra: bool,
}

/// Purposes from the extended key usage extension, or `None` if the extension is absent.
pub fn key_purposes(cert: &X509Certificate<'_>) -> Result<Option<KeyPurposes>, CertError> {
    let eku = cert
        .extended_key_usage()
        .map_err(|e| CertError::ParseError(e.to_string()))?;
    Ok(eku.map(|eku| KeyPurposes {
        server_auth: eku.value.server_auth,
        client_auth: eku.value.client_auth,
        cmc_ra: eku
            .value
            .other
            .iter()
            .any(|oid| oid.to_id_string() == OID_KP_CMC_RA),
    }))
}

/// Check that `cert_der` carries a signature made by the key in `issuer_spki_der`.
pub fn verify_signed_by(cert_der: &[u8], issuer_spki_der: &[u8]) -> Result<(), CertError> {
    let cert = parse_certificate(cert_der)?;
    let (_, spki) = SubjectPublicKeyInfo::from_der(issuer_spki_der)
        .map_err(|e| CertError::ParseError(e.to_string()))?;
    cert.verify_signature(Some(&spki))
        .map_err(|e| CertError::BadSignature(e.to_string()))
}

/// Verify proof-of-possession on a PKCS#10 request, returning its DER SubjectPublicKeyInfo.
pub fn verify_csr(csr_der: &[u8]) -> Result<Vec<u8>, CertError> {
    if csr_der.len() > MAX_CERT_SIZE {
        return Err(CertError::TooLarge(csr_der.len()));
    }
    let (_, csr) = X509CertificationRequest::from_der(csr_der)
        .map_err(|e| CertError::ParseError(e.to_string()))?;
    csr.verify_signature()
        .map_err(|e| CertError::BadSignature(e.to_string()))?;
    Ok(csr.certification_request_info.subject_pki.raw.to_vec())
}

/// Verify an ES256 signature (raw `r || s`) made by the key in `spki_der`.
pub fn verify_es256(spki_der: &[u8], data: &[u8], signature: &[u8]) -> Result<(), CertError> {
    let key =
        VerifyingKey::from_public_key_der(spki_der).map_err(|e| CertError::Key(e.to_string()))?;
    let signature =
        Signature::from_slice(signature).map_err(|e| CertError::BadSignature(e.to_string()))?;
    key.verify(data, &signature)
        .map_err(|e| CertError::BadSignature(e.to_string()))
}

/// Rebuild the subject name of a DER certificate for use in a new request.
pub fn subject_distinguished_name(cert_der: &[u8]) -> Result<DistinguishedName, CertError> {
    let cert = parse_certificate(cert_der)?;
    let mut dn = DistinguishedName::new();
    for attr in cert.subject().iter_attributes() {
        let value = attr
            .as_str()
            .map_err(|e| CertError::ParseError(e.to_string()))?;
        let ty = match attr.attr_type().to_id_string().as_str() {
            "2.5.4.3" => DnType::CommonName,
            "2.5.4.6" => DnType::CountryName,
            "2.5.4.7" => DnType::LocalityName,
            "2.5.4.8" => DnType::StateOrProvinceName,
            "2.5.4.10" => DnType::OrganizationName,
            "2.5.4.11" => DnType::OrganizationalUnitName,
            _ => {
                let arcs = attr
                    .attr_type()
                    .iter()
                    .ok_or_else(|| CertError::ParseError("oversized OID arc".to_owned()))?
                    .collect();
                DnType::CustomDnType(arcs)
            }
        };
        dn.push(ty, value);
    }
    Ok(dn)
}

/// DER encoding of an IA5String.
pub fn ia5_string_der(s: &str) -> Result<Vec<u8>, CertError> {
    if !s.is_ascii() {
        return Err(CertError::ParseError("IA5String must be ASCII".to_owned()));
    }
    Ia5String::new(s)
        .to_der_vec()
        .map_err(|e| CertError::ParseError(e.to_string()))
}

fn parse_ia5_string(der: &[u8]) -> Option<String> {
    let (rest, obj) = parse_der_ia5string(der).ok()?;
    if !rest.is_empty() {
        return None;
    }
    let s = obj.as_str().ok()?;
    s.is_ascii().then(|| s.to_owned())
}

/// Private key plus certificate chain (leaf first) for one identity.
#[derive(Clone)]
pub struct Credential {
    key_der: Vec<u8>,
    signing_key: SigningKey,
    chain: Vec<Vec<u8>>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("chain_len", &self.chain.len())
            .finish()
    }
}

impl Credential {
    /// Build a credential from a PKCS#8 P-256 private key and its certificate chain.
    pub fn from_pkcs8(key_der: Vec<u8>, chain: Vec<Vec<u8>>) -> Result<Self, CertError> {
        if chain.is_empty() {
            return Err(CertError::EmptyChain);
        }
        let signing_key =
            SigningKey::from_pkcs8_der(&key_der).map_err(|e| CertError::Key(e.to_string()))?;
        Ok(Self {
            key_der,
            signing_key,
            chain,
        })
    }

    /// Generate a fresh P-256 private key, in PKCS#8 DER form.
    pub fn generate_key() -> Result<Vec<u8>, CertError> {
        let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| CertError::Key(e.to_string()))?;
        Ok(key_pair.serialize_der())
    }

    /// Leaf certificate.
    pub fn certificate(&self) -> &[u8] {
        &self.chain[0]
    }

    /// Certificate chain, leaf first.
    pub fn chain(&self) -> &[Vec<u8>] {
        &self.chain
    }

    /// PKCS#8 DER private key.
    pub fn key_der(&self) -> &[u8] {
        &self.key_der
    }

    /// DER SubjectPublicKeyInfo of the private key.
    pub fn public_key_der(&self) -> Result<Vec<u8>, CertError> {
        let doc = self
            .signing_key
            .verifying_key()
            .to_public_key_der()
            .map_err(|e| CertError::Key(e.to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// ES256 signature (raw `r || s`) over `data`.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing_key.sign(data);
        signature.to_bytes().to_vec()
    }

    /// The private key in the form used for certificate generation.
    pub fn key_pair(&self) -> Result<rcgen::KeyPair, CertError> {
        rcgen::KeyPair::try_from(self.key_der.as_slice()).map_err(|e| CertError::Key(e.to_string()))
    }
}

/// Alias of the pledge's manufacturer-installed identity.
pub const ALIAS_PLEDGE: &str = "pledge";
/// Alias of the registrar's identity.
pub const ALIAS_REGISTRAR: &str = "registrar";
/// Alias of the domain CA identity.
pub const ALIAS_DOMAIN_CA: &str = "domain-ca";
/// Alias of the MASA signing identity.
pub const ALIAS_MASA: &str = "masa";

/// Alias-addressable collection of credentials.
///
/// Loaded once at process start and read-only afterwards; `insert` exists for bootstrap tooling.
#[derive(Clone, Debug, Default)]
pub struct CredentialSet {
    entries: HashMap<String, Credential>,
}

impl CredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the credential stored under `alias`.
    pub fn insert<S: Into<String>>(&mut self, alias: S, credential: Credential) {
        self.entries.insert(alias.into(), credential);
    }

    /// Credential stored under `alias`.
    pub fn get(&self, alias: &str) -> Option<&Credential> {
        self.entries.get(alias)
    }

    /// Leaf certificate stored under `alias`.
    pub fn certificate(&self, alias: &str) -> Option<&[u8]> {
        self.get(alias).map(Credential::certificate)
    }

    /// All aliases, sorted.
    pub fn aliases(&self) -> Vec<&str> {
        let mut aliases: Vec<_> = self.entries.keys().map(String::as_str).collect();
        aliases.sort_unstable();
        aliases
    }
}
