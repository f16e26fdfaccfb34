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

//! Server certificate verification for the pledge's secure session.
//!
//! On first contact the pledge has no domain trust anchor, so it accepts the registrar
//! *provisionally*: any chain whose leaf is currently valid and authorized as a TLS server (and,
//! when required, as a registration authority) passes. The chain is kept so that, once a voucher
//! pins the domain key, it can be re-validated *authoritatively* against that key.

use crate::x509::{self, CertError};
use thiserror::Error;
use tracing::{debug, warn};


/// Reasons for aborting a handshake.
#[derive(Debug, Error)]
pub enum TrustError {
    #[error("peer presented no certificate")]
    MissingChain,
    #[error("malformed peer certificate: {0}")]
    Malformed(#[from] CertError),
    #[error("certificate {0} of peer chain outside its validity period")]
    NotValid(usize),
    #[error("peer certificate not authorized for TLS server use")]
    MissingServerAuth,
    #[error("peer certificate not authorized as registration authority")]
    MissingRaPurpose,
    #[error("no trust anchor for peer chain")]
    NoTrustAnchor,
    #[error("certificate {0} of peer chain failed path validation: {1}")]
    PathInvalid(usize, String),
}

impl From<TrustError> for crate::error::ProtocolError {
    fn from(e: TrustError) -> Self {
        crate::error::ProtocolError::trust(e.to_string())
    }
}

/// Trust anchor synthesized from a pinned domain key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrustAnchor {
    /// DER-encoded name of the issuer the anchor stands for.
    pub issuer_name: Vec<u8>,
    /// DER SubjectPublicKeyInfo.
    pub public_key: Vec<u8>,
}

/// Verifier of registrar certificate chains, in provisional or authoritative mode.
#[derive(Clone, Debug)]
pub struct TrustVerifier {
    authoritative: bool,
    require_ra_purpose: bool,
    anchors: Vec<TrustAnchor>,
    peer_chain: Option<Vec<Vec<u8>>>,
}

impl TrustVerifier {
    /// Create a verifier in provisional mode.
    pub fn new(require_ra_purpose: bool) -> Self {
        Self {
            authoritative: false,
            require_ra_purpose,
            anchors: Vec::new(),
            peer_chain: None,
        }
    }

    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    pub fn set_authoritative(&mut self, authoritative: bool) {
        self.authoritative = authoritative;
    }

    /// Chain accepted at the last successful handshake.
    pub fn peer_chain(&self) -> Option<&[Vec<u8>]> {
        self.peer_chain.as_deref()
    }

    /// Issuer names currently accepted.
    pub fn accepted_issuers(&self) -> Vec<Vec<u8>> {
        self.anchors.iter().map(|a| a.issuer_name.clone()).collect()
    }

    pub fn trust_anchors(&self) -> &[TrustAnchor] {
        &self.anchors
    }

    pub fn add_trust_anchor(&mut self, anchor: TrustAnchor) {
        debug!("adding trust anchor");
        self.anchors.push(anchor);
    }

    /// Handshake check of a server chain (leaf first) in the current mode.
    ///
    /// On success the chain is retained for later re-validation.
    pub fn verify_server(&mut self, chain: &[Vec<u8>]) -> Result<(), TrustError> {
        let result = self.check_leaf(chain).and_then(|()| {
            if self.authoritative {
                validate_path(chain, &self.anchors)
            } else {
                Ok(())
            }
        });
        match &result {
            Ok(()) => {
                debug!(authoritative = self.authoritative, "server chain accepted");
                self.peer_chain = Some(chain.to_vec());
            }
            Err(e) => warn!(authoritative = self.authoritative, "server chain rejected: {}", e),
        }
        result
    }

    /// Authoritative validation of `chain` against the current trust anchors.
    pub fn verify_chain(&self, chain: &[Vec<u8>]) -> Result<(), TrustError> {
        self.check_leaf(chain)?;
        validate_path(chain, &self.anchors)
    }

    /// Authoritative validation of `chain` against the current trust anchors plus `candidate`.
    pub fn verify_chain_with(
        &self,
        chain: &[Vec<u8>],
        candidate: &TrustAnchor,
    ) -> Result<(), TrustError> {
        self.check_leaf(chain)?;
        let mut anchors = self.anchors.clone();
        anchors.push(candidate.clone());
        validate_path(chain, &anchors)
    }

    fn check_leaf(&self, chain: &[Vec<u8>]) -> Result<(), TrustError> {
        let leaf_der = chain.first().ok_or(TrustError::MissingChain)?;
        let leaf = x509::parse_certificate(leaf_der)?;
        if !leaf.validity().is_valid() {
            return Err(TrustError::NotValid(0));
        }
        let purposes = x509::key_purposes(&leaf)?.unwrap_or_default();
        if !purposes.server_auth {
            return Err(TrustError::MissingServerAuth);
        }
        if self.require_ra_purpose && !purposes.cmc_ra {
            return Err(TrustError::MissingRaPurpose);
        }
        Ok(())
    }
}

/// Walk `chain` from the leaf until a certificate issued by an anchor is found.
///
/// Revocation is not checked.
fn validate_path(chain: &[Vec<u8>], anchors: &[TrustAnchor]) -> Result<(), TrustError> {
    for (i, der) in chain.iter().enumerate() {
        let cert = x509::parse_certificate(der)?;
        if !cert.validity().is_valid() {
            return Err(TrustError::NotValid(i));
        }
        let issuer = cert.issuer().as_raw();
        if let Some(anchor) = anchors.iter().find(|a| a.issuer_name == issuer) {
            return x509::verify_signed_by(der, &anchor.public_key)
                .map_err(|e| TrustError::PathInvalid(i, e.to_string()));
        }
        let next_der = chain.get(i + 1).ok_or(TrustError::NoTrustAnchor)?;
        let next = x509::parse_certificate(next_der)?;
        if next.subject().as_raw() != issuer {
            return Err(TrustError::PathInvalid(i, "issuer name mismatch".to_owned()));
        }
        x509::verify_signed_by(der, next.public_key().raw)
            .map_err(|e| TrustError::PathInvalid(i, e.to_string()))?;
    }
    Err(TrustError::NoTrustAnchor)
}
