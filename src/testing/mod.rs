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

//! Test PKI: a manufacturer with its MASA and one pledge, and a domain with its CA and registrar.

use crate::x509::{self, Credential, CMC_RA_ARCS, MASA_URL_ARCS};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CustomExtension, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, PKCS_ECDSA_P256_SHA256,
};
use std::sync::OnceLock;

pub const PLEDGE_SERIAL: &str = "JADA123456789";
pub const MASA_URI: &str = "https://masa.example.com";

pub struct TestPki {
    /// Self-signed manufacturer CA.
    pub manufacturer: Credential,
    /// MASA signing identity, issued by the manufacturer CA.
    pub masa: Credential,
    /// Pledge IDevID, issued by the manufacturer CA.
    pub pledge: Credential,
    /// Self-signed domain CA.
    pub domain_ca: Credential,
    /// Registrar identity, issued by the domain CA.
    pub registrar: Credential,
}

/// Shared test PKI, generated once per test binary.
pub fn pki() -> &'static TestPki {
    static PKI: OnceLock<TestPki> = OnceLock::new();
    PKI.get_or_init(generate)
}

fn key() -> KeyPair {
    KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).expect("key generation should succeed")
}

fn credential(key: &KeyPair, chain: Vec<Vec<u8>>) -> Credential {
    Credential::from_pkcs8(key.serialize_der(), chain).expect("credential should load")
}

fn ca(common_name: &str) -> (Certificate, KeyPair) {
    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let key = key();
    let cert = params.self_signed(&key).expect("self-signing should succeed");
    (cert, key)
}

/// Registrar-style leaf parameters: TLS server and client, optionally registration authority.
pub fn registrar_params(common_name: &str, ra: bool) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    if ra {
        params
            .extended_key_usages
            .push(ExtendedKeyUsagePurpose::Other(CMC_RA_ARCS.to_vec()));
    }
    params.use_authority_key_identifier_extension = true;
    params
}

/// Pledge IDevID parameters with the given subject serial number and MASA URI.
pub fn idevid_params(serial: &str, masa_uri: Option<&str>) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, "Pledge");
    params
        .distinguished_name
        .push(DnType::CustomDnType(vec![2, 5, 4, 5]), serial);
    params.use_authority_key_identifier_extension = true;
    if let Some(uri) = masa_uri {
        params.custom_extensions.push(CustomExtension::from_oid_content(
            MASA_URL_ARCS,
            x509::ia5_string_der(uri).expect("MASA URI should be ASCII"),
        ));
    }
    params
}

/// Leaf credential issued by `issuer`, with chain `[leaf, issuer]`.
pub fn issue(params: CertificateParams, issuer: &Credential) -> Credential {
    let issuer_key = issuer.key_pair().expect("issuer key should load");
    let issuer_params = CertificateParams::from_ca_cert_der(&issuer.certificate().to_vec().into())
        .expect("issuer certificate should parse");
    let issuer_cert = issuer_params
        .self_signed(&issuer_key)
        .expect("issuer re-signing should succeed");
    let key = key();
    let cert = params
        .signed_by(&key, &issuer_cert, &issuer_key)
        .expect("leaf signing should succeed");
    credential(&key, vec![cert.der().to_vec(), issuer.certificate().to_vec()])
}

/// Self-signed registrar-style credential trusted by nobody.
pub fn self_signed_registrar(ra: bool) -> Credential {
    let key = key();
    let cert = registrar_params("Rogue Registrar", ra)
        .self_signed(&key)
        .expect("self-signing should succeed");
    credential(&key, vec![cert.der().to_vec()])
}

/// Self-signed CA credential.
pub fn ca_credential(common_name: &str) -> Credential {
    let (cert, key) = ca(common_name);
    credential(&key, vec![cert.der().to_vec()])
}

fn generate() -> TestPki {
    let manufacturer = ca_credential("Manufacturer CA");
    let mut masa_params = CertificateParams::default();
    masa_params
        .distinguished_name
        .push(DnType::CommonName, "MASA");
    masa_params.use_authority_key_identifier_extension = true;
    let masa = issue(masa_params, &manufacturer);
    let pledge = issue(idevid_params(PLEDGE_SERIAL, Some(MASA_URI)), &manufacturer);

    let domain_ca = ca_credential("Domain CA");
    let registrar = issue(registrar_params("Registrar", true), &domain_ca);
    TestPki {
        manufacturer,
        masa,
        pledge,
        domain_ca,
        registrar,
    }
}
