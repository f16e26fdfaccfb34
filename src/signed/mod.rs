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

//! COSE_Sign1 envelopes for vouchers and voucher requests.
//!
//! The protected header carries the algorithm (ES256) and the media type of the payload; the
//! unprotected header carries the signer's certificate chain under `x5chain`, as a single `bstr`
//! for one certificate or an array of `bstr` otherwise.
//!
//! ```cddl
//!  COSE_Sign1 = [
//!      protected : bstr .cbor { 1 => -7, 3 => tstr },
//!      unprotected : { ? 33 => bstr / [+ bstr] },
//!      payload : bstr,
//!      signature : bstr
//!  ]
//! ```

use crate::{
    cbor::value::Value,
    error::ProtocolError,
    x509::{self, CertError, Credential},
    CodecError, Voucher, VoucherFormat,
};
use coset::{
    iana, CborSerializable as _, ContentType, CoseSign1, CoseSign1Builder, HeaderBuilder, Label,
    RegisteredLabelWithPrivate, TaggedCborSerializable as _,
};
use thiserror::Error;


/// Header label for an ordered chain of X.509 certificates.
pub const HEADER_X5CHAIN: i64 = 33;

/// Errors in building, opening or verifying a signed voucher.
#[derive(Debug, Error)]
pub enum SignError {
    #[error("malformed COSE_Sign1: {0}")]
    Envelope(String),
    #[error("unsupported signature algorithm")]
    UnsupportedAlgorithm,
    #[error("unknown payload content type {0:?}")]
    UnknownContentType(String),
    #[error("missing payload")]
    MissingPayload,
    #[error("malformed x5chain header")]
    MalformedChain,
    #[error("no signer certificate")]
    MissingSigner,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Cert(#[from] CertError),
}

impl From<SignError> for ProtocolError {
    fn from(e: SignError) -> Self {
        match e {
            SignError::Cert(e) => e.into(),
            SignError::MissingSigner => ProtocolError::trust(e.to_string()),
            _ => ProtocolError::structural(e.to_string()),
        }
    }
}

/// Sign `voucher` in the given format with `credential`, returning the tagged COSE_Sign1 bytes.
pub fn sign(
    voucher: &Voucher,
    format: VoucherFormat,
    credential: &Credential,
) -> Result<Vec<u8>, SignError> {
    let payload = voucher.encode(format)?;
    let media_type = format.payload_content_format().media_type().to_owned();
    let protected = HeaderBuilder::new()
        .algorithm(iana::Algorithm::ES256)
        .content_type(media_type)
        .build();
    let chain = credential.chain();
    let x5chain = if chain.len() == 1 {
        Value::Bytes(chain[0].clone())
    } else {
        Value::Array(chain.iter().cloned().map(Value::Bytes).collect())
    };
    let unprotected = HeaderBuilder::new().value(HEADER_X5CHAIN, x5chain).build();
    let sign1 = CoseSign1Builder::new()
        .protected(protected)
        .unprotected(unprotected)
        .payload(payload)
        .create_signature(&[], |data| credential.sign(data))
        .build();
    sign1
        .to_tagged_vec()
        .map_err(|e| SignError::Envelope(format!("{:?}", e)))
}

/// A signed voucher (request) opened from its COSE_Sign1 envelope.
#[derive(Clone, Debug)]
pub struct SignedVoucher {
    /// Decoded payload.
    pub voucher: Voucher,
    /// Serialization of the payload.
    pub format: VoucherFormat,
    /// Signer certificate chain from the `x5chain` header, leaf first.
    pub chain: Vec<Vec<u8>>,
    envelope: CoseSign1,
}

impl SignedVoucher {
    /// Parse a tagged or untagged COSE_Sign1 envelope and decode its payload.
    ///
    /// The signature is not checked; use [`SignedVoucher::verify`].
    pub fn open(data: &[u8]) -> Result<Self, SignError> {
        let envelope = CoseSign1::from_tagged_slice(data)
            .or_else(|_| CoseSign1::from_slice(data))
            .map_err(|e| SignError::Envelope(format!("{:?}", e)))?;

        let header = &envelope.protected.header;
        if header.alg != Some(RegisteredLabelWithPrivate::Assigned(iana::Algorithm::ES256)) {
            return Err(SignError::UnsupportedAlgorithm);
        }
        let format = match &header.content_type {
            None => VoucherFormat::Cbor,
            Some(ContentType::Text(t)) if t == "application/cbor" => VoucherFormat::Cbor,
            Some(ContentType::Text(t)) if t == "application/json" => VoucherFormat::Json,
            Some(ContentType::Assigned(iana::CoapContentFormat::Cbor)) => VoucherFormat::Cbor,
            Some(ContentType::Assigned(iana::CoapContentFormat::Json)) => VoucherFormat::Json,
            Some(other) => return Err(SignError::UnknownContentType(format!("{:?}", other))),
        };

        let mut chain = Vec::new();
        for (label, value) in &envelope.unprotected.rest {
            if *label == Label::Int(HEADER_X5CHAIN) {
                chain = match value {
                    Value::Bytes(cert) => vec![cert.clone()],
                    Value::Array(certs) => certs
                        .iter()
                        .map(|c| match c {
                            Value::Bytes(cert) => Ok(cert.clone()),
                            _ => Err(SignError::MalformedChain),
                        })
                        .collect::<Result<_, _>>()?,
                    _ => return Err(SignError::MalformedChain),
                };
            }
        }

        let payload = envelope
            .payload
            .as_deref()
            .ok_or(SignError::MissingPayload)?;
        let voucher = Voucher::decode(format, payload)?;
        Ok(Self {
            voucher,
            format,
            chain,
            envelope,
        })
    }

    /// Signer (leaf) certificate from the `x5chain` header.
    pub fn signer(&self) -> Option<&[u8]> {
        self.chain.first().map(Vec::as_slice)
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &[u8] {
        self.envelope.payload.as_deref().unwrap_or_default()
    }

    /// Verify the signature against the public key of `cert_der`.
    pub fn verify(&self, cert_der: &[u8]) -> Result<(), SignError> {
        let spki = x509::subject_public_key_info(cert_der)?;
        self.verify_spki(&spki)
    }

    /// Verify the signature against a DER SubjectPublicKeyInfo.
    pub fn verify_spki(&self, spki_der: &[u8]) -> Result<(), SignError> {
        self.envelope
            .verify_signature(&[], |sig, data| x509::verify_es256(spki_der, data, sig))?;
        Ok(())
    }

    /// Verify the signature against the signer certificate carried in the envelope.
    pub fn verify_with_signer(&self) -> Result<(), SignError> {
        let signer = self.signer().ok_or(SignError::MissingSigner)?;
        self.verify(signer)
    }
}
