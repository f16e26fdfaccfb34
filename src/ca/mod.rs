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

//! Domain certificate authority issuing operational certificates to enrolled pledges.

use crate::{
    error::{ProtocolError, ProtocolResult},
    x509::{self, CertError, Credential},
};
use rcgen::{
    CertificateParams, CertificateSigningRequestParams, CustomExtension, ExtendedKeyUsagePurpose,
    IsCa, KeyPair, KeyUsagePurpose, OtherNameValue, SanType, SerialNumber,
};
use rustls_pki_types::CertificateSigningRequestDer;
use serde::Deserialize;
use std::sync::Mutex;
use tracing::{error, info};


/// Other-name type carrying the bootstrapping domain name in issued certificates.
pub const DOMAIN_NAME_OTHER_NAME_ARCS: &[u64] = &[1, 3, 6, 1, 4, 1, 46930, 2];

const BASIC_CONSTRAINTS_ARCS: &[u64] = &[2, 5, 29, 19];

/// `BasicConstraints ::= SEQUENCE {}`, i.e. cA defaulting to false.
const BASIC_CONSTRAINTS_END_ENTITY: &[u8] = &[0x30, 0x00];

/// Critical basic-constraints extension marking an end-entity certificate.
///
/// `IsCa::ExplicitNoCa` would also emit a subject-key-identifier, which operational certificates
/// must not carry, so the extension is written by hand and `is_ca` left at `IsCa::NoCa`.
fn end_entity_constraints() -> CustomExtension {
    let mut ext = CustomExtension::from_oid_content(
        BASIC_CONSTRAINTS_ARCS,
        BASIC_CONSTRAINTS_END_ENTITY.to_vec(),
    );
    ext.set_criticality(true);
    ext
}

/// Domain CA settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DomainCaConfig {
    /// Name of the bootstrapping domain.
    pub domain_name: String,
    /// Lifetime of issued certificates.
    pub validity_years: u32,
}

impl Default for DomainCaConfig {
    fn default() -> Self {
        Self {
            domain_name: "example.com".to_owned(),
            validity_years: 5,
        }
    }
}

/// Issuer of operational certificates for the domain.
pub struct DomainCa {
    config: DomainCaConfig,
    credential: Credential,
    issuer: rcgen::Certificate,
    issuer_key: KeyPair,
    issuer_spki: Vec<u8>,
    next_serial: Mutex<u64>,
}

impl DomainCa {
    /// Create a CA signing with `credential`, whose leaf must be a CA certificate.
    pub fn new(credential: Credential, config: DomainCaConfig) -> Result<Self, CertError> {
        let issuer_key = credential.key_pair()?;
        let issuer_params = CertificateParams::from_ca_cert_der(&credential.certificate().to_vec().into())
            .map_err(|e| CertError::ParseError(e.to_string()))?;
        let issuer = issuer_params
            .self_signed(&issuer_key)
            .map_err(|e| CertError::Generation(e.to_string()))?;
        let issuer_spki = x509::subject_public_key_info(credential.certificate())?;
        Ok(Self {
            config,
            credential,
            issuer,
            issuer_key,
            issuer_spki,
            next_serial: Mutex::new(1),
        })
    }

    /// CA certificate.
    pub fn certificate(&self) -> &[u8] {
        self.credential.certificate()
    }

    pub fn config(&self) -> &DomainCaConfig {
        &self.config
    }

    fn allocate_serial(&self) -> ProtocolResult<u64> {
        let mut next = self
            .next_serial
            .lock()
            .map_err(|_| ProtocolError::internal("serial allocator poisoned"))?;
        let serial = *next;
        *next += 1;
        Ok(serial)
    }

    /// Issue a certificate for the PKCS#10 request `csr_der`, returning its DER encoding.
    pub fn issue(&self, csr_der: &[u8]) -> ProtocolResult<Vec<u8>> {
        x509::verify_csr(csr_der)?;
        let mut csr =
            CertificateSigningRequestParams::from_der(&CertificateSigningRequestDer::from(csr_der))
                .map_err(|e| ProtocolError::structural(format!("unusable CSR: {}", e)))?;

        let serial = self.allocate_serial()?;
        let now = time::OffsetDateTime::now_utc();
        let params = &mut csr.params;
        params.serial_number = Some(SerialNumber::from(serial));
        params.not_before = now;
        params.not_after = now + time::Duration::days(365 * i64::from(self.config.validity_years));
        params.is_ca = IsCa::NoCa;
        // Extensions requested in the CSR are not carried over.
        params.custom_extensions = vec![end_entity_constraints()];
        params.use_authority_key_identifier_extension = true;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];
        params.subject_alt_names = vec![SanType::OtherName((
            DOMAIN_NAME_OTHER_NAME_ARCS.to_vec(),
            OtherNameValue::Utf8String(self.config.domain_name.clone()),
        ))];

        let cert = csr
            .signed_by(&self.issuer, &self.issuer_key)
            .map_err(|e| {
                error!(serial, "certificate generation failed: {}", e);
                ProtocolError::internal(format!("certificate generation failed: {}", e))
            })?;
        let cert_der = cert.der().to_vec();
        if let Err(e) = self.self_check(&cert_der) {
            error!(serial, "issued certificate failed self-check: {}", e);
            return Err(ProtocolError::internal(format!("self-check failed: {}", e)));
        }
        info!(serial, "certificate issued");
        Ok(cert_der)
    }

    fn self_check(&self, cert_der: &[u8]) -> Result<(), CertError> {
        x509::verify_signed_by(cert_der, &self.issuer_spki)?;
        let cert = x509::parse_certificate(cert_der)?;
        let ca = x509::parse_certificate(self.certificate())?;
        if cert.issuer().as_raw() != ca.subject().as_raw() {
            return Err(CertError::BadSignature("issuer name mismatch".to_owned()));
        }
        if !cert.validity().is_valid() {
            return Err(CertError::Expired);
        }
        Ok(())
    }
}
