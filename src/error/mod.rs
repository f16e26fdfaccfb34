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

//! Protocol-level errors.

use crate::{
    message::{Response, ResponseCode},
    x509::CertError,
    CodecError, ValidationFailure,
};
use std::fmt;

#[cfg(test)]
mod tests;

/// Category of a protocol failure.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// Malformed wire bytes, missing mandatory fields, invariant violations.
    Structural,
    /// Missing purpose, invalid path, signature mismatch.
    Trust,
    /// An upstream dependency was unreachable or answered unusably.
    Upstream,
    /// Local failure whose detail must not reach the peer.
    Internal,
}

impl ErrorKind {
    /// Kind implied by an error response code received from a peer.
    pub fn from_code(code: ResponseCode) -> Self {
        match code {
            ResponseCode::BadRequest
            | ResponseCode::NotFound
            | ResponseCode::MethodNotAllowed
            | ResponseCode::NotAcceptable
            | ResponseCode::UnsupportedContentFormat => ErrorKind::Structural,
            ResponseCode::Unauthorized | ResponseCode::Forbidden => ErrorKind::Trust,
            ResponseCode::BadGateway
            | ResponseCode::ServiceUnavailable
            | ResponseCode::GatewayTimeout => ErrorKind::Upstream,
            _ => ErrorKind::Internal,
        }
    }

    /// Response code used when reporting an error of this kind to a peer.
    pub fn response_code(self) -> ResponseCode {
        match self {
            ErrorKind::Structural => ResponseCode::BadRequest,
            ErrorKind::Trust => ResponseCode::Forbidden,
            ErrorKind::Upstream => ResponseCode::ServiceUnavailable,
            ErrorKind::Internal => ResponseCode::InternalServerError,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Structural => "structural",
            ErrorKind::Trust => "trust",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Response code and diagnostic text returned by a peer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerDiagnostic {
    pub code: ResponseCode,
    pub message: String,
}

impl fmt::Display for PeerDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

/// Failure of a protocol step.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{kind} error: {message}{}", peer_suffix(.peer))]
pub struct ProtocolError {
    pub kind: ErrorKind,
    pub message: String,
    /// Diagnostic returned by the peer, when the failure was reported by one.
    pub peer: Option<PeerDiagnostic>,
}

fn peer_suffix(peer: &Option<PeerDiagnostic>) -> String {
    peer.as_ref()
        .map(|p| format!(" (peer: {})", p))
        .unwrap_or_default()
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = core::result::Result<T, ProtocolError>;

impl ProtocolError {
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
            peer: None,
        }
    }

    pub fn structural<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Structural, message)
    }

    pub fn trust<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Trust, message)
    }

    pub fn upstream<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Build an error from a peer's error response.
    pub fn from_response(response: &Response) -> Self {
        let message = response
            .diagnostic
            .clone()
            .unwrap_or_else(|| String::from_utf8_lossy(&response.payload).into_owned());
        Self {
            kind: ErrorKind::from_code(response.code),
            message: format!("peer returned {}", response.code),
            peer: Some(PeerDiagnostic {
                code: response.code,
                message,
            }),
        }
    }

    /// Error response to send to a peer.
    ///
    /// Internal details are replaced by a generic diagnostic.
    pub fn to_response(&self) -> Response {
        match self.kind {
            ErrorKind::Internal => Response::error(self.kind.response_code(), "internal error"),
            kind => Response::error(kind.response_code(), self.message.clone()),
        }
    }
}

impl From<CodecError> for ProtocolError {
    fn from(e: CodecError) -> Self {
        ProtocolError::structural(e.to_string())
    }
}

impl From<ValidationFailure> for ProtocolError {
    fn from(e: ValidationFailure) -> Self {
        ProtocolError::structural(format!("invalid voucher: {}", e))
    }
}

impl From<CertError> for ProtocolError {
    fn from(e: CertError) -> Self {
        match e {
            CertError::Key(_) | CertError::Generation(_) => ProtocolError::internal(e.to_string()),
            CertError::TooLarge(_) | CertError::ParseError(_) | CertError::EmptyChain => {
                ProtocolError::structural(e.to_string())
            }
            CertError::BadSignature(_) | CertError::Expired => ProtocolError::trust(e.to_string()),
        }
    }
}
