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

//! Request/response messages exchanged between the bootstrapping roles.
//!
//! The messages model the CoAP exchanges of constrained BRSKI: a method, a resource path, content
//! format negotiation and a response code in the `class.detail` taxonomy. The authenticated peer
//! of the secure session travels with each request.

use crate::iana::ContentFormat;
use sha2::{Digest, Sha256};
use std::fmt;


/// EST simple enrollment.
pub const PATH_SIMPLE_ENROLL: &str = "/.well-known/est/sen";
/// EST simple re-enrollment.
pub const PATH_SIMPLE_REENROLL: &str = "/.well-known/est/sren";
/// EST CA certificates.
pub const PATH_CA_CERTS: &str = "/.well-known/est/crts";
/// EST CSR attributes.
pub const PATH_CSR_ATTRS: &str = "/.well-known/est/att";
/// BRSKI request voucher.
pub const PATH_REQUEST_VOUCHER: &str = "/.well-known/brski/rv";
/// BRSKI voucher status telemetry.
pub const PATH_VOUCHER_STATUS: &str = "/.well-known/brski/vs";
/// BRSKI enrollment status telemetry.
pub const PATH_ENROLL_STATUS: &str = "/.well-known/brski/es";
/// Resource discovery.
pub const PATH_CORE: &str = "/.well-known/core";
/// MASA voucher request resource.
pub const PATH_MASA_REQUEST_VOUCHER: &str = "/.well-known/brski/requestvoucher";

/// Request method.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    /// Method code, `0.detail`.
    pub fn code(self) -> u8 {
        match self {
            Method::Get => 1,
            Method::Post => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Method::Get),
            2 => Some(Method::Post),
            _ => None,
        }
    }
}

/// Response code, `class.detail`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ResponseCode {
    Changed,
    Content,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    UnsupportedContentFormat,
    InternalServerError,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
}

impl ResponseCode {
    /// Class and detail.
    pub fn parts(self) -> (u8, u8) {
        match self {
            ResponseCode::Changed => (2, 4),
            ResponseCode::Content => (2, 5),
            ResponseCode::BadRequest => (4, 0),
            ResponseCode::Unauthorized => (4, 1),
            ResponseCode::Forbidden => (4, 3),
            ResponseCode::NotFound => (4, 4),
            ResponseCode::MethodNotAllowed => (4, 5),
            ResponseCode::NotAcceptable => (4, 6),
            ResponseCode::UnsupportedContentFormat => (4, 15),
            ResponseCode::InternalServerError => (5, 0),
            ResponseCode::BadGateway => (5, 2),
            ResponseCode::ServiceUnavailable => (5, 3),
            ResponseCode::GatewayTimeout => (5, 4),
        }
    }

    pub fn is_success(self) -> bool {
        self.parts().0 == 2
    }

    /// Code with the given class and detail, if it is one this crate knows.
    pub fn from_parts(class: u8, detail: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.parts() == (class, detail))
    }

    const ALL: [ResponseCode; 13] = [
        ResponseCode::Changed,
        ResponseCode::Content,
        ResponseCode::BadRequest,
        ResponseCode::Unauthorized,
        ResponseCode::Forbidden,
        ResponseCode::NotFound,
        ResponseCode::MethodNotAllowed,
        ResponseCode::NotAcceptable,
        ResponseCode::UnsupportedContentFormat,
        ResponseCode::InternalServerError,
        ResponseCode::BadGateway,
        ResponseCode::ServiceUnavailable,
        ResponseCode::GatewayTimeout,
    ];
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (class, detail) = self.parts();
        write!(f, "{}.{:02}", class, detail)
    }
}

/// Opaque identity of an authenticated peer: lowercase hex SHA-256 of its leaf certificate.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PeerId(String);

impl PeerId {
    pub fn from_certificate(cert_der: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(cert_der)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticated secure session with a client.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PeerSession {
    /// Client certificate chain, leaf first.
    pub chain: Vec<Vec<u8>>,
}

impl PeerSession {
    pub fn new(chain: Vec<Vec<u8>>) -> Self {
        Self { chain }
    }

    /// Client leaf certificate.
    pub fn certificate(&self) -> Option<&[u8]> {
        self.chain.first().map(Vec::as_slice)
    }

    /// Identity handle of the client, if it presented a certificate.
    pub fn peer_id(&self) -> Option<PeerId> {
        self.certificate().map(PeerId::from_certificate)
    }
}

/// Inbound request.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub content_format: Option<ContentFormat>,
    pub accept: Option<ContentFormat>,
    pub payload: Vec<u8>,
    pub peer: Option<PeerSession>,
}

impl Request {
    pub fn get<S: Into<String>>(path: S) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            content_format: None,
            accept: None,
            payload: Vec::new(),
            peer: None,
        }
    }

    pub fn post<S: Into<String>>(path: S, content_format: ContentFormat, payload: Vec<u8>) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            content_format: Some(content_format),
            accept: None,
            payload,
            peer: None,
        }
    }

    #[must_use]
    pub fn accept(mut self, accept: ContentFormat) -> Self {
        self.accept = Some(accept);
        self
    }

    #[must_use]
    pub fn peer(mut self, peer: PeerSession) -> Self {
        self.peer = Some(peer);
        self
    }
}

/// Outbound response.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub code: ResponseCode,
    pub content_format: Option<ContentFormat>,
    pub payload: Vec<u8>,
    /// Human-readable diagnostic accompanying an error code.
    pub diagnostic: Option<String>,
}

impl Response {
    /// Success response carrying a payload.
    pub fn content(code: ResponseCode, content_format: ContentFormat, payload: Vec<u8>) -> Self {
        Self {
            code,
            content_format: Some(content_format),
            payload,
            diagnostic: None,
        }
    }

    /// Success response without payload.
    pub fn empty(code: ResponseCode) -> Self {
        Self {
            code,
            content_format: None,
            payload: Vec::new(),
            diagnostic: None,
        }
    }

    /// Error response carrying a diagnostic message as `text/plain` payload.
    pub fn error<S: Into<String>>(code: ResponseCode, diagnostic: S) -> Self {
        let diagnostic = diagnostic.into();
        Self {
            code,
            content_format: Some(ContentFormat::TextPlainUtf8),
            payload: diagnostic.as_bytes().to_vec(),
            diagnostic: Some(diagnostic),
        }
    }
}

/// A role that serves requests: registrar, MASA.
pub trait Service: Send + Sync {
    fn handle(&self, request: &Request) -> Response;
}
