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

use super::*;

#[test]
fn test_kind_from_code() {
    let tests = vec![
        (ResponseCode::BadRequest, ErrorKind::Structural),
        (ResponseCode::NotFound, ErrorKind::Structural),
        (ResponseCode::MethodNotAllowed, ErrorKind::Structural),
        (ResponseCode::NotAcceptable, ErrorKind::Structural),
        (ResponseCode::UnsupportedContentFormat, ErrorKind::Structural),
        (ResponseCode::Unauthorized, ErrorKind::Trust),
        (ResponseCode::Forbidden, ErrorKind::Trust),
        (ResponseCode::BadGateway, ErrorKind::Upstream),
        (ResponseCode::ServiceUnavailable, ErrorKind::Upstream),
        (ResponseCode::GatewayTimeout, ErrorKind::Upstream),
        (ResponseCode::InternalServerError, ErrorKind::Internal),
    ];
    for (code, want) in tests {
        assert_eq!(ErrorKind::from_code(code), want, "for {}", code);
    }
}

#[test]
fn test_from_response() {
    let resp = Response::error(ResponseCode::Forbidden, "serial mismatch");
    let err = ProtocolError::from_response(&resp);
    assert_eq!(err.kind, ErrorKind::Trust);
    assert_eq!(
        err.peer,
        Some(PeerDiagnostic {
            code: ResponseCode::Forbidden,
            message: "serial mismatch".to_owned(),
        })
    );
    assert_eq!(
        err.to_string(),
        "trust error: peer returned 4.03 (peer: 4.03 serial mismatch)"
    );

    // Diagnostic taken from the payload when not set separately.
    let mut resp = Response::error(ResponseCode::ServiceUnavailable, "masa down");
    resp.diagnostic = None;
    let err = ProtocolError::from_response(&resp);
    assert_eq!(err.kind, ErrorKind::Upstream);
    assert_eq!(err.peer.unwrap().message, "masa down");
}

#[test]
fn test_to_response() {
    let resp = ProtocolError::structural("bad voucher").to_response();
    assert_eq!(resp.code, ResponseCode::BadRequest);
    assert_eq!(resp.diagnostic.as_deref(), Some("bad voucher"));

    let resp = ProtocolError::trust("no RA purpose").to_response();
    assert_eq!(resp.code, ResponseCode::Forbidden);

    let resp = ProtocolError::upstream("masa unreachable").to_response();
    assert_eq!(resp.code, ResponseCode::ServiceUnavailable);

    let resp = ProtocolError::internal("self-check failed for serial 7").to_response();
    assert_eq!(resp.code, ResponseCode::InternalServerError);
    assert_eq!(resp.diagnostic.as_deref(), Some("internal error"));
}

#[test]
fn test_conversions() {
    let err: ProtocolError = CodecError::MissingWrapper.into();
    assert_eq!(err.kind, ErrorKind::Structural);
    let err: ProtocolError = ValidationFailure::MissingSerialNumber.into();
    assert_eq!(err.kind, ErrorKind::Structural);
    let err: ProtocolError = CertError::BadSignature("x".to_owned()).into();
    assert_eq!(err.kind, ErrorKind::Trust);
    let err: ProtocolError = CertError::Key("x".to_owned()).into();
    assert_eq!(err.kind, ErrorKind::Internal);
    assert!(err.peer.is_none());
}
