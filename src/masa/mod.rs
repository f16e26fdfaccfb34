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

//! Manufacturer Authorized Signing Authority: issues vouchers to registrars on behalf of pledges.

use crate::{
    error::{ProtocolError, ProtocolResult},
    message::{Method, Request, Response, ResponseCode, Service, PATH_MASA_REQUEST_VOUCHER},
    signed::{self, SignedVoucher},
    x509::{self, Credential},
    Assertion, Voucher, VoucherFormat, VoucherKind,
};
use chrono::{SubsecRound, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(test)]
mod tests;

/// MASA settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MasaConfig {
    /// Lifetime of vouchers issued without a nonce, in seconds when serialized.
    #[serde(deserialize_with = "crate::util::duration_secs")]
    pub voucher_lifetime: Duration,
}

impl Default for MasaConfig {
    fn default() -> Self {
        Self {
            voucher_lifetime: Duration::from_secs(10 * 60),
        }
    }
}

/// Voucher issuer for one manufacturer.
pub struct Masa {
    credential: Credential,
    config: MasaConfig,
    /// Issuer of the pledge identities this MASA vouches for; unchecked when absent.
    idevid_ca: Option<Vec<u8>>,
}

impl Masa {
    pub fn new(credential: Credential, config: MasaConfig) -> Self {
        Self {
            credential,
            config,
            idevid_ca: None,
        }
    }

    /// Only vouch for pledges whose identity was issued by `ca_cert_der`.
    #[must_use]
    pub fn idevid_ca(mut self, ca_cert_der: Vec<u8>) -> Self {
        self.idevid_ca = Some(ca_cert_der);
        self
    }

    /// Signing certificate.
    pub fn certificate(&self) -> &[u8] {
        self.credential.certificate()
    }

    /// Produce a signed voucher for a registrar-signed voucher request.
    ///
    /// The voucher is serialized in the same format as the request.
    pub fn issue_voucher(&self, signed_request: &[u8]) -> ProtocolResult<(Vec<u8>, VoucherFormat)> {
        let signed = SignedVoucher::open(signed_request)?;
        let request = &signed.voucher;
        if request.kind != VoucherKind::VoucherRequest {
            return Err(ProtocolError::structural("not a voucher request"));
        }
        request.check()?;
        let registrar = signed
            .signer()
            .ok_or_else(|| ProtocolError::structural("voucher request without signer chain"))?;
        signed.verify(registrar)?;

        let registrar_cert = x509::parse_certificate(registrar)?;
        let purposes = x509::key_purposes(&registrar_cert)?.unwrap_or_default();
        if !purposes.cmc_ra {
            warn!("voucher request signer is not a registration authority");
            return Err(ProtocolError::trust(
                "voucher request signer is not a registration authority",
            ));
        }

        let prior = request
            .prior_signed_voucher_request
            .as_deref()
            .ok_or_else(|| ProtocolError::structural("missing prior-signed voucher request"))?;
        self.check_prior_request(prior, request)?;

        let now = Utc::now().trunc_subsecs(0);
        let expires_on = match request.nonce {
            Some(_) => None,
            None => Some(
                now + chrono::Duration::from_std(self.config.voucher_lifetime)
                    .map_err(|e| ProtocolError::internal(e.to_string()))?,
            ),
        };
        let voucher = Voucher {
            kind: VoucherKind::Voucher,
            constrained: request.constrained,
            assertion: Some(Assertion::Proximity),
            created_on: Some(now),
            expires_on,
            nonce: request.nonce.clone(),
            serial_number: request.serial_number.clone(),
            idevid_issuer: request.idevid_issuer.clone(),
            pinned_domain_cert: signed.chain.last().cloned(),
            ..Default::default()
        };
        voucher
            .check()
            .map_err(|e| ProtocolError::internal(format!("constructed invalid voucher: {}", e)))?;
        let data = signed::sign(&voucher, signed.format, &self.credential)
            .map_err(|e| ProtocolError::internal(e.to_string()))?;
        info!(
            serial_number = voucher.serial_number.as_deref().unwrap_or_default(),
            nonce = voucher.nonce.is_some(),
            "voucher issued"
        );
        Ok((data, signed.format))
    }

    /// Check the pledge-signed request embedded by the registrar.
    fn check_prior_request(&self, prior: &[u8], request: &Voucher) -> ProtocolResult<()> {
        let prior = SignedVoucher::open(prior)?;
        let pledge_cert = prior
            .signer()
            .ok_or_else(|| ProtocolError::structural("prior request without signer"))?;
        prior.verify(pledge_cert)?;
        if let Some(ca) = &self.idevid_ca {
            let ca_spki = x509::subject_public_key_info(ca)?;
            x509::verify_signed_by(pledge_cert, &ca_spki)?;
        }
        let cert_serial = x509::subject_serial_number(pledge_cert)?;
        if prior.voucher.serial_number != request.serial_number
            || cert_serial != request.serial_number
        {
            return Err(ProtocolError::trust(
                "serial number does not match the pledge identity",
            ));
        }
        debug!("prior-signed voucher request verified");
        Ok(())
    }
}

impl Service for Masa {
    fn handle(&self, request: &Request) -> Response {
        if request.path != PATH_MASA_REQUEST_VOUCHER {
            return Response::error(ResponseCode::NotFound, "no such resource");
        }
        if request.method != Method::Post {
            return Response::error(ResponseCode::MethodNotAllowed, "POST only");
        }
        if request
            .content_format
            .and_then(VoucherFormat::from_signed_content_format)
            .is_none()
        {
            return Response::error(
                ResponseCode::UnsupportedContentFormat,
                "expected a signed voucher request",
            );
        }
        match self.issue_voucher(&request.payload) {
            Ok((data, format)) => {
                Response::content(ResponseCode::Changed, format.signed_content_format(), data)
            }
            Err(e) => {
                warn!("voucher request rejected: {}", e);
                e.to_response()
            }
        }
    }
}

