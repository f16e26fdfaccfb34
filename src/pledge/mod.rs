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

//! Pledge agent: the device side of bootstrapping.
//!
//! ```text
//!   NoContact --connect--> ProvisionallyAccepted --request_voucher--> Accepted
//!       ^                                                                |
//!       +------------------------------reset-----------------------------+
//! ```
//!
//! An agent drives one bootstrap attempt at a time; failures leave the state unchanged and the
//! caller decides whether to retry.

use crate::{
    error::{ProtocolError, ProtocolResult},
    iana::ContentFormat,
    message::{
        Request, Response, PATH_ENROLL_STATUS, PATH_REQUEST_VOUCHER, PATH_SIMPLE_ENROLL,
        PATH_SIMPLE_REENROLL, PATH_VOUCHER_STATUS,
    },
    signed::{self, SignedVoucher},
    telemetry::StatusTelemetry,
    transport::Transport,
    trust::{TrustAnchor, TrustVerifier},
    x509::{self, Credential},
    Assertion, CborSerializable, Voucher, VoucherFormat, VoucherKind,
};
use chrono::{SubsecRound, Utc};
use rand::RngCore;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};


/// Pledge settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PledgeConfig {
    /// Bound on the secure-session handshake, in seconds when serialized.
    #[serde(deserialize_with = "crate::util::duration_secs")]
    pub handshake_timeout: Duration,
    /// Only accept registrars whose certificate carries the registration authority purpose.
    pub require_registrar_ra_eku: bool,
    /// Serialization of voucher requests.
    pub voucher_format: VoucherFormat,
    /// Length of generated nonces, in bytes.
    pub nonce_length: usize,
}

impl Default for PledgeConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            require_registrar_ra_eku: true,
            voucher_format: VoucherFormat::Cbor,
            nonce_length: 8,
        }
    }
}

/// Trust state of the pledge towards the registrar.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CertState {
    #[default]
    NoContact,
    ProvisionallyAccepted,
    Accepted,
}

/// Device-side bootstrapping agent.
pub struct Pledge<T: Transport> {
    config: PledgeConfig,
    idevid: Credential,
    masa_anchor: Vec<u8>,
    transport: T,
    verifier: TrustVerifier,
    state: CertState,
    voucher: Option<Voucher>,
    domain_key: Option<Vec<u8>>,
    operational: Option<Credential>,
}

impl<T: Transport> Pledge<T> {
    /// Create an agent with its manufacturer-installed identity and the certificate of the MASA
    /// (or of its issuer) that vouchers must be signed by.
    pub fn new(idevid: Credential, masa_anchor: Vec<u8>, transport: T, config: PledgeConfig) -> Self {
        let verifier = TrustVerifier::new(config.require_registrar_ra_eku);
        Self {
            config,
            idevid,
            masa_anchor,
            transport,
            verifier,
            state: CertState::NoContact,
            voucher: None,
            domain_key: None,
            operational: None,
        }
    }

    pub fn state(&self) -> CertState {
        self.state
    }

    pub fn verifier(&self) -> &TrustVerifier {
        &self.verifier
    }

    /// Voucher accepted from the registrar.
    pub fn voucher(&self) -> Option<&Voucher> {
        self.voucher.as_ref()
    }

    /// Pinned domain public key (DER SubjectPublicKeyInfo).
    pub fn domain_public_key(&self) -> Option<&[u8]> {
        self.domain_key.as_deref()
    }

    /// Operational identity obtained by enrollment.
    pub fn operational(&self) -> Option<&Credential> {
        self.operational.as_ref()
    }

    fn identity(&self) -> &Credential {
        self.operational.as_ref().unwrap_or(&self.idevid)
    }

    /// Establish the secure session with the registrar.
    ///
    /// Before a voucher is accepted the registrar is trusted provisionally; afterwards its chain
    /// must validate against the pinned domain key.
    pub fn connect(&mut self) -> ProtocolResult<()> {
        let identity = self.identity().clone();
        if let Err(e) = self.transport.connect(
            &identity,
            &mut self.verifier,
            self.config.handshake_timeout,
        ) {
            warn!("connect failed: {}", e);
            return Err(e);
        }
        if self.state == CertState::NoContact {
            self.state = CertState::ProvisionallyAccepted;
        }
        info!(state = ?self.state, "connected to registrar");
        Ok(())
    }

    /// Voucher request for the connected registrar, with a fresh nonce.
    pub fn build_voucher_request(&self) -> ProtocolResult<Voucher> {
        let registrar = self
            .verifier
            .peer_chain()
            .and_then(|c| c.first())
            .ok_or_else(|| ProtocolError::structural("not connected"))?;
        let serial_number = x509::subject_serial_number(self.idevid.certificate())?
            .ok_or_else(|| ProtocolError::internal("identity certificate has no serial number"))?;
        let mut nonce = vec![0u8; self.config.nonce_length];
        rand::thread_rng().fill_bytes(&mut nonce);
        Ok(Voucher {
            kind: VoucherKind::VoucherRequest,
            constrained: self.config.voucher_format == VoucherFormat::Cbor,
            assertion: Some(Assertion::Proximity),
            created_on: Some(Utc::now().trunc_subsecs(0)),
            nonce: Some(nonce),
            serial_number: Some(serial_number),
            proximity_registrar_spki: Some(x509::subject_public_key_info(registrar)?),
            ..Default::default()
        })
    }

    fn post(
        &mut self,
        path: &str,
        content_format: ContentFormat,
        accept: Option<ContentFormat>,
        payload: Vec<u8>,
    ) -> ProtocolResult<Response> {
        let mut request = Request::post(path, content_format, payload);
        request.accept = accept;
        let response = self.transport.send(request)?;
        if !response.code.is_success() {
            let err = ProtocolError::from_response(&response);
            warn!(path, "request failed: {}", err);
            return Err(err);
        }
        Ok(response)
    }

    /// Obtain a voucher for `request` and pin the domain trust anchor it names.
    pub fn request_voucher(&mut self, request: &Voucher) -> ProtocolResult<Voucher> {
        if self.state != CertState::ProvisionallyAccepted {
            return Err(ProtocolError::structural(format!(
                "cannot request voucher in state {:?}",
                self.state
            )));
        }
        request.check()?;
        let format = self.config.voucher_format;
        let data = signed::sign(request, format, &self.idevid)
            .map_err(|e| ProtocolError::internal(e.to_string()))?;
        let cf = format.signed_content_format();
        let response = self.post(PATH_REQUEST_VOUCHER, cf, Some(cf), data)?;

        let result = self.accept_voucher(request, &response);
        match &result {
            Ok(_) => info!("voucher accepted; registrar trusted"),
            Err(e) => warn!("voucher rejected: {}", e),
        }
        result
    }

    fn accept_voucher(&mut self, request: &Voucher, response: &Response) -> ProtocolResult<Voucher> {
        if response
            .content_format
            .and_then(VoucherFormat::from_signed_content_format)
            .is_none()
        {
            return Err(ProtocolError::structural("response is not a signed voucher"));
        }
        let signed = SignedVoucher::open(&response.payload)?;
        self.verify_masa_signature(&signed)?;
        let voucher = signed.voucher;
        if voucher.kind != VoucherKind::Voucher {
            return Err(ProtocolError::structural("response is not a voucher"));
        }
        voucher.check()?;

        if voucher.serial_number != request.serial_number {
            return Err(ProtocolError::trust("voucher is for another serial number"));
        }
        if let Some(issuer) = &voucher.idevid_issuer {
            let own = x509::authority_key_identifier(self.idevid.certificate())?;
            if own.as_ref() != Some(issuer) {
                return Err(ProtocolError::trust("voucher is for another identity issuer"));
            }
        }
        if request.nonce.is_some() && voucher.nonce != request.nonce {
            return Err(ProtocolError::trust("voucher nonce mismatch"));
        }
        if let Some(expires_on) = voucher.expires_on {
            if expires_on < Utc::now() {
                return Err(ProtocolError::trust("voucher expired"));
            }
        }

        let domain_key = match (&voucher.pinned_domain_spki, &voucher.pinned_domain_cert) {
            (Some(spki), _) => spki.clone(),
            (None, Some(cert)) => x509::subject_public_key_info(cert)?,
            (None, None) => return Err(ProtocolError::structural("voucher pins no domain key")),
        };
        let chain = self
            .verifier
            .peer_chain()
            .ok_or_else(|| ProtocolError::internal("no registrar chain retained"))?
            .to_vec();
        let leaf = x509::parse_certificate(&chain[0])?;
        let anchor = TrustAnchor {
            issuer_name: leaf.issuer().as_raw().to_vec(),
            public_key: domain_key.clone(),
        };
        self.verifier.verify_chain_with(&chain, &anchor)?;

        self.verifier.add_trust_anchor(anchor);
        self.verifier.set_authoritative(true);
        self.domain_key = Some(domain_key);
        self.voucher = Some(voucher.clone());
        self.state = CertState::Accepted;
        Ok(voucher)
    }

    /// Check the voucher signature against the MASA trust anchor.
    fn verify_masa_signature(&self, signed: &SignedVoucher) -> ProtocolResult<()> {
        match signed.signer() {
            Some(signer) if signer != self.masa_anchor.as_slice() => {
                let anchor_spki = x509::subject_public_key_info(&self.masa_anchor)?;
                x509::verify_signed_by(signer, &anchor_spki)?;
                signed.verify(signer)?;
            }
            _ => signed.verify(&self.masa_anchor)?,
        }
        debug!("voucher signature verified");
        Ok(())
    }

    /// Enroll an operational certificate.
    pub fn enroll(&mut self) -> ProtocolResult<Vec<u8>> {
        self.enroll_at(PATH_SIMPLE_ENROLL)
    }

    /// Re-establish the session and enroll a fresh operational certificate.
    pub fn reenroll(&mut self) -> ProtocolResult<Vec<u8>> {
        if self.state != CertState::Accepted {
            return Err(ProtocolError::structural(format!(
                "cannot re-enroll in state {:?}",
                self.state
            )));
        }
        self.transport.close();
        self.connect()?;
        self.enroll_at(PATH_SIMPLE_REENROLL)
    }

    fn enroll_at(&mut self, path: &str) -> ProtocolResult<Vec<u8>> {
        if self.state != CertState::Accepted {
            return Err(ProtocolError::structural(format!(
                "cannot enroll in state {:?}",
                self.state
            )));
        }
        let domain_key = self
            .domain_key
            .clone()
            .ok_or_else(|| ProtocolError::internal("no pinned domain key"))?;

        let key_der = Credential::generate_key()?;
        let key_pair = rcgen::KeyPair::try_from(key_der.as_slice())
            .map_err(|e| ProtocolError::internal(e.to_string()))?;
        let mut params = rcgen::CertificateParams::default();
        params.distinguished_name = x509::subject_distinguished_name(self.idevid.certificate())?;
        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| ProtocolError::internal(e.to_string()))?;

        let response = self.post(
            path,
            ContentFormat::Pkcs10,
            Some(ContentFormat::PkixCert),
            csr.der().to_vec(),
        )?;
        if response.content_format != Some(ContentFormat::PkixCert) {
            return Err(ProtocolError::structural("response is not a certificate"));
        }
        let cert = response.payload;
        x509::verify_signed_by(&cert, &domain_key)?;
        if x509::subject_public_key_info(&cert)? != key_pair.public_key_der() {
            return Err(ProtocolError::trust("certificate is for another key"));
        }

        let mut chain = vec![cert.clone()];
        if let Some(ca) = self.voucher.as_ref().and_then(|v| v.pinned_domain_cert.clone()) {
            chain.push(ca);
        }
        self.operational = Some(Credential::from_pkcs8(key_der, chain)?);
        info!(path, "operational certificate enrolled");
        Ok(cert)
    }

    fn send_status(&mut self, path: &str, status: &StatusTelemetry) -> ProtocolResult<()> {
        if self.state == CertState::NoContact {
            return Err(ProtocolError::structural("not connected"));
        }
        let payload = status.clone().to_vec()?;
        self.post(path, ContentFormat::Cbor, None, payload)?;
        Ok(())
    }

    /// Report the outcome of voucher processing to the registrar.
    pub fn send_voucher_status(&mut self, status: &StatusTelemetry) -> ProtocolResult<()> {
        self.send_status(PATH_VOUCHER_STATUS, status)
    }

    /// Report the outcome of enrollment to the registrar.
    pub fn send_enroll_status(&mut self, status: &StatusTelemetry) -> ProtocolResult<()> {
        self.send_status(PATH_ENROLL_STATUS, status)
    }

    /// Tear down the session and return to the initial state, keeping only the identity.
    pub fn reset(&mut self) {
        self.transport.close();
        self.verifier = TrustVerifier::new(self.config.require_registrar_ra_eku);
        self.state = CertState::NoContact;
        self.voucher = None;
        self.domain_key = None;
        self.operational = None;
        debug!("reset");
    }
}
