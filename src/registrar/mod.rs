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

//! Domain registrar: mediates voucher requests between pledges and their MASA and fronts the
//! domain CA for enrollment.

use crate::{
    ca::DomainCa,
    error::{ProtocolError, ProtocolResult},
    iana::{ContentFormat, EnumI64},
    message::{
        Method, PeerId, PeerSession, Request, Response, ResponseCode, Service, PATH_CA_CERTS,
        PATH_CORE, PATH_CSR_ATTRS, PATH_ENROLL_STATUS, PATH_MASA_REQUEST_VOUCHER,
        PATH_REQUEST_VOUCHER, PATH_SIMPLE_ENROLL, PATH_SIMPLE_REENROLL, PATH_VOUCHER_STATUS,
    },
    signed::{self, SignedVoucher},
    telemetry::StatusTelemetry,
    transport::MasaClient,
    x509::{self, Credential},
    Assertion, CborSerializable, Voucher, VoucherFormat, VoucherKind,
};
use chrono::{DateTime, SubsecRound, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, error, info, warn};


/// Empty CSR attributes: `SEQUENCE {}`.
const EMPTY_CSR_ATTRS: [u8; 2] = [0x30, 0x00];

/// Registrar settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistrarConfig {
    /// Format of voucher requests sent to the MASA; the pledge's format when unset.
    pub voucher_format: Option<VoucherFormat>,
    /// MASA to use instead of the one named in the pledge's certificate.
    pub masa_uri_override: Option<String>,
    /// Refuse to start with a certificate lacking the registration authority purpose.
    pub require_ra_eku_on_self: bool,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            voucher_format: None,
            masa_uri_override: None,
            require_ra_eku_on_self: true,
        }
    }
}

/// Voucher relayed to a pledge.
#[derive(Clone, Debug, PartialEq)]
pub struct VoucherLogEntry {
    pub serial_number: Option<String>,
    pub format: VoucherFormat,
    /// Signed voucher as returned by the MASA.
    pub voucher: Vec<u8>,
    pub logged_at: DateTime<Utc>,
}

type Log<T> = DashMap<PeerId, Vec<T>>;

fn append<T>(log: &Log<T>, peer: &PeerId, entry: T) {
    log.entry(peer.clone()).or_default().push(entry);
}

fn history<T: Clone>(log: &Log<T>, peer: &PeerId) -> Vec<T> {
    log.get(peer).map(|e| e.value().clone()).unwrap_or_default()
}

/// Registrar for one domain.
pub struct Registrar {
    credential: Credential,
    spki: Vec<u8>,
    ca: DomainCa,
    masa: Arc<dyn MasaClient>,
    config: RegistrarConfig,
    voucher_log: Log<VoucherLogEntry>,
    voucher_status_log: Log<StatusTelemetry>,
    enroll_status_log: Log<StatusTelemetry>,
}

impl Registrar {
    pub fn new(
        credential: Credential,
        ca: DomainCa,
        masa: Arc<dyn MasaClient>,
        config: RegistrarConfig,
    ) -> ProtocolResult<Self> {
        let cert = x509::parse_certificate(credential.certificate())?;
        let purposes = x509::key_purposes(&cert)?.unwrap_or_default();
        if config.require_ra_eku_on_self && !purposes.cmc_ra {
            return Err(ProtocolError::trust(
                "registrar certificate lacks the registration authority purpose",
            ));
        }
        let spki = cert.public_key().raw.to_vec();
        Ok(Self {
            credential,
            spki,
            ca,
            masa,
            config,
            voucher_log: DashMap::new(),
            voucher_status_log: DashMap::new(),
            enroll_status_log: DashMap::new(),
        })
    }

    /// Certificate chain presented to pledges, leaf first.
    pub fn chain(&self) -> &[Vec<u8>] {
        self.credential.chain()
    }

    /// Vouchers relayed to `peer`, oldest first.
    pub fn vouchers(&self, peer: &PeerId) -> Vec<VoucherLogEntry> {
        history(&self.voucher_log, peer)
    }

    /// Voucher status reports from `peer`, oldest first.
    pub fn voucher_status(&self, peer: &PeerId) -> Vec<StatusTelemetry> {
        history(&self.voucher_status_log, peer)
    }

    /// Enrollment status reports from `peer`, oldest first.
    pub fn enroll_status(&self, peer: &PeerId) -> Vec<StatusTelemetry> {
        history(&self.enroll_status_log, peer)
    }

    /// Mediate a pledge's signed voucher request to its MASA.
    ///
    /// A MASA error response is mirrored to the pledge as-is.
    pub fn request_voucher(
        &self,
        peer: &PeerSession,
        format: VoucherFormat,
        payload: &[u8],
    ) -> ProtocolResult<Response> {
        let pledge_cert = peer
            .certificate()
            .ok_or_else(|| ProtocolError::trust("no client certificate"))?;
        let peer_id = PeerId::from_certificate(pledge_cert);

        let signed = SignedVoucher::open(payload)?;
        if signed.format != format {
            return Err(ProtocolError::structural("payload does not match content format"));
        }
        let request = &signed.voucher;
        if request.kind != VoucherKind::VoucherRequest {
            return Err(ProtocolError::structural("not a voucher request"));
        }
        request.check()?;
        signed.verify(pledge_cert)?;

        let serial_number = x509::subject_serial_number(pledge_cert)?;
        if serial_number.is_none() || serial_number != request.serial_number {
            warn!(peer = %peer_id, "serial number does not match client certificate");
            return Err(ProtocolError::trust(
                "serial number does not match client certificate",
            ));
        }

        let forward = self.registrar_request(request, pledge_cert, payload)?;
        let out_format = self.config.voucher_format.unwrap_or(format);
        let data = signed::sign(&forward, out_format, &self.credential)
            .map_err(|e| ProtocolError::internal(e.to_string()))?;

        let masa_uri = match &self.config.masa_uri_override {
            Some(uri) => uri.clone(),
            None => x509::masa_uri(pledge_cert)?
                .ok_or_else(|| ProtocolError::upstream("no MASA URI for pledge"))?,
        };
        debug!(peer = %peer_id, masa = %masa_uri, "forwarding voucher request");
        let masa_request = Request::post(
            PATH_MASA_REQUEST_VOUCHER,
            out_format.signed_content_format(),
            data,
        )
        .accept(out_format.signed_content_format());
        let response = self.masa.send(&masa_uri, masa_request)?;

        if !response.code.is_success() {
            let diagnostic = ProtocolError::from_response(&response)
                .peer
                .map(|p| p.message)
                .unwrap_or_default();
            warn!(peer = %peer_id, code = %response.code, "MASA refused voucher: {}", diagnostic);
            return Ok(Response::error(response.code, diagnostic));
        }
        let voucher_format = response
            .content_format
            .and_then(VoucherFormat::from_signed_content_format)
            .ok_or_else(|| {
                warn!(peer = %peer_id, "MASA answered with unsupported content format");
                ProtocolError::upstream("MASA answered with unsupported content format")
            })?;
        let voucher = SignedVoucher::open(&response.payload).map_err(|e| {
            warn!(peer = %peer_id, "MASA answered with malformed voucher: {}", e);
            ProtocolError::upstream("MASA answered with malformed voucher")
        })?;

        append(
            &self.voucher_log,
            &peer_id,
            VoucherLogEntry {
                serial_number: voucher.voucher.serial_number.clone(),
                format: voucher_format,
                voucher: response.payload.clone(),
                logged_at: Utc::now(),
            },
        );
        info!(peer = %peer_id, "voucher relayed");
        Ok(Response::content(
            ResponseCode::Changed,
            voucher_format.signed_content_format(),
            response.payload,
        ))
    }

    /// Build the registrar voucher request for a pledge request.
    fn registrar_request(
        &self,
        request: &Voucher,
        pledge_cert: &[u8],
        prior_signed: &[u8],
    ) -> ProtocolResult<Voucher> {
        let own_cert = self.credential.certificate();
        let own_sha256 = Sha256::digest(&self.spki).to_vec();
        let mut forward = Voucher {
            kind: VoucherKind::VoucherRequest,
            constrained: request.constrained,
            assertion: request.assertion,
            created_on: Some(Utc::now().trunc_subsecs(0)),
            nonce: request.nonce.clone(),
            serial_number: request.serial_number.clone(),
            idevid_issuer: x509::authority_key_identifier(pledge_cert)?,
            prior_signed_voucher_request: Some(prior_signed.to_vec()),
            proximity_registrar_spki: request
                .proximity_registrar_spki
                .clone()
                .filter(|spki| *spki == self.spki),
            proximity_registrar_cert: request
                .proximity_registrar_cert
                .clone()
                .filter(|cert| cert.as_slice() == own_cert),
            proximity_registrar_sha256_spki: request
                .proximity_registrar_sha256_spki
                .clone()
                .filter(|hash| *hash == own_sha256),
            ..Default::default()
        };
        if forward.assertion == Some(Assertion::Proximity)
            && forward.proximity_registrar_spki.is_none()
            && forward.proximity_registrar_cert.is_none()
        {
            debug!("proximity registrar not this registrar; dropping proximity assertion");
            forward.assertion = None;
        }
        forward.check().map_err(|e| {
            ProtocolError::internal(format!("constructed invalid voucher request: {}", e))
        })?;
        Ok(forward)
    }

    /// Issue an operational certificate for an authenticated client.
    pub fn enroll(&self, peer: &PeerSession, csr: &[u8]) -> ProtocolResult<Vec<u8>> {
        let peer_id = peer
            .peer_id()
            .ok_or_else(|| ProtocolError::trust("no client certificate"))?;
        let cert = self.ca.issue(csr)?;
        info!(peer = %peer_id, "enrolled");
        Ok(cert)
    }

    fn record_status(
        &self,
        log: &Log<StatusTelemetry>,
        what: &'static str,
        peer: &PeerSession,
        payload: &[u8],
    ) -> ProtocolResult<()> {
        let peer_id = peer
            .peer_id()
            .ok_or_else(|| ProtocolError::trust("no client certificate"))?;
        let status = StatusTelemetry::from_slice(payload)?;
        if status.status {
            info!(peer = %peer_id, "{} status: success", what);
        } else {
            warn!(
                peer = %peer_id,
                reason = status.reason.as_deref().unwrap_or_default(),
                "{} status: failure",
                what
            );
        }
        append(log, &peer_id, status);
        Ok(())
    }

    fn link_format() -> String {
        let cbor = ContentFormat::Cbor.to_i64();
        let cert = ContentFormat::PkixCert.to_i64();
        let certs = ContentFormat::Pkcs7MimeCertsOnly.to_i64();
        [
            format!(
                "<{}>;rt=brski.rv;ct=\"{} {}\"",
                PATH_REQUEST_VOUCHER,
                ContentFormat::VoucherCoseCbor.to_i64(),
                ContentFormat::VoucherCoseJson.to_i64()
            ),
            format!("<{}>;rt=brski.vs;ct={}", PATH_VOUCHER_STATUS, cbor),
            format!("<{}>;rt=brski.es;ct={}", PATH_ENROLL_STATUS, cbor),
            format!("<{}>;rt=ace.est.sen;ct=\"{} {}\"", PATH_SIMPLE_ENROLL, certs, cert),
            format!("<{}>;rt=ace.est.sren;ct=\"{} {}\"", PATH_SIMPLE_REENROLL, certs, cert),
            format!("<{}>;rt=ace.est.crts;ct=\"{} {}\"", PATH_CA_CERTS, certs, cert),
            format!(
                "<{}>;rt=ace.est.att;ct={}",
                PATH_CSR_ATTRS,
                ContentFormat::Csrattrs.to_i64()
            ),
        ]
        .join(",")
    }

    fn dispatch(&self, request: &Request) -> ProtocolResult<Response> {
        let expect = |method: Method, format: Option<ContentFormat>| -> Option<Response> {
            if request.method != method {
                return Some(Response::error(ResponseCode::MethodNotAllowed, "method not allowed"));
            }
            match format {
                Some(f) if request.content_format != Some(f) => Some(Response::error(
                    ResponseCode::UnsupportedContentFormat,
                    "unsupported content format",
                )),
                _ => None,
            }
        };
        let peer = || {
            request
                .peer
                .as_ref()
                .ok_or_else(|| ProtocolError::trust("no authenticated session"))
        };

        match request.path.as_str() {
            PATH_REQUEST_VOUCHER => {
                if let Some(resp) = expect(Method::Post, None) {
                    return Ok(resp);
                }
                match request
                    .content_format
                    .and_then(VoucherFormat::from_signed_content_format)
                {
                    Some(format) => self.request_voucher(peer()?, format, &request.payload),
                    None => Ok(Response::error(
                        ResponseCode::UnsupportedContentFormat,
                        "expected a signed voucher request",
                    )),
                }
            }
            PATH_SIMPLE_ENROLL | PATH_SIMPLE_REENROLL => {
                if let Some(resp) = expect(Method::Post, Some(ContentFormat::Pkcs10)) {
                    return Ok(resp);
                }
                let cert = self.enroll(peer()?, &request.payload)?;
                Ok(Response::content(
                    ResponseCode::Changed,
                    ContentFormat::PkixCert,
                    cert,
                ))
            }
            PATH_VOUCHER_STATUS | PATH_ENROLL_STATUS => {
                if let Some(resp) = expect(Method::Post, Some(ContentFormat::Cbor)) {
                    return Ok(resp);
                }
                let (log, what) = if request.path == PATH_VOUCHER_STATUS {
                    (&self.voucher_status_log, "voucher")
                } else {
                    (&self.enroll_status_log, "enroll")
                };
                self.record_status(log, what, peer()?, &request.payload)?;
                Ok(Response::empty(ResponseCode::Changed))
            }
            PATH_CA_CERTS => Ok(expect(Method::Get, None).unwrap_or_else(|| {
                Response::content(
                    ResponseCode::Content,
                    ContentFormat::PkixCert,
                    self.ca.certificate().to_vec(),
                )
            })),
            PATH_CSR_ATTRS => Ok(expect(Method::Get, None).unwrap_or_else(|| {
                Response::content(
                    ResponseCode::Content,
                    ContentFormat::Csrattrs,
                    EMPTY_CSR_ATTRS.to_vec(),
                )
            })),
            PATH_CORE => Ok(expect(Method::Get, None).unwrap_or_else(|| {
                Response::content(
                    ResponseCode::Content,
                    ContentFormat::LinkFormat,
                    Self::link_format().into_bytes(),
                )
            })),
            _ => Ok(Response::error(ResponseCode::NotFound, "no such resource")),
        }
    }
}

impl Service for Registrar {
    fn handle(&self, request: &Request) -> Response {
        match self.dispatch(request) {
            Ok(response) => response,
            Err(e) => {
                match e.kind {
                    crate::ErrorKind::Internal => error!(path = %request.path, "{}", e),
                    _ => warn!(path = %request.path, "request rejected: {}", e),
                }
                e.to_response()
            }
        }
    }
}
