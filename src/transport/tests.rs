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
use crate::{
    common::CborSerializable,
    iana::ContentFormat,
    message::{Method, ResponseCode, PATH_CA_CERTS, PATH_REQUEST_VOUCHER},
    testing,
    trust::TrustAnchor,
    util::expect_err,
    x509, ErrorKind,
};
use rcgen::SanType;
use std::{
    net::{SocketAddr, TcpListener},
    thread,
    time::Instant,
};

/// Answers with the identity of the authenticated client.
struct WhoAmI;

impl Service for WhoAmI {
    fn handle(&self, request: &Request) -> Response {
        match request.peer.as_ref().and_then(PeerSession::peer_id) {
            Some(id) => Response::content(
                ResponseCode::Content,
                ContentFormat::TextPlainUtf8,
                id.as_str().as_bytes().to_vec(),
            ),
            None => Response::error(ResponseCode::Unauthorized, "anonymous"),
        }
    }
}

fn whoami(chain: &[Vec<u8>]) -> Vec<u8> {
    crate::PeerId::from_certificate(&chain[0])
        .as_str()
        .as_bytes()
        .to_vec()
}

#[test]
fn test_loopback_transport() {
    let pki = testing::pki();
    let mut transport = LoopbackTransport::new(Arc::new(WhoAmI), pki.registrar.chain().to_vec());
    let mut verifier = TrustVerifier::new(true);
    assert!(!transport.is_connected());
    let err = transport.send(Request::get(PATH_CA_CERTS)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Internal);

    transport
        .connect(&pki.pledge, &mut verifier, Duration::from_secs(1))
        .unwrap();
    assert!(transport.is_connected());
    assert_eq!(verifier.peer_chain(), Some(pki.registrar.chain()));
    let resp = transport.send(Request::get(PATH_CA_CERTS)).unwrap();
    assert_eq!(resp.code, ResponseCode::Content);
    assert_eq!(resp.payload, whoami(pki.pledge.chain()));

    transport.close();
    assert!(!transport.is_connected());
}

#[test]
fn test_loopback_handshake_failures() {
    let pki = testing::pki();
    let mut verifier = TrustVerifier::new(true);

    // Server without the registration authority purpose.
    let rogue = testing::self_signed_registrar(false);
    let mut transport = LoopbackTransport::new(Arc::new(WhoAmI), rogue.chain().to_vec());
    let err = transport
        .connect(&pki.pledge, &mut verifier, Duration::from_secs(1))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Trust);
    assert!(!transport.is_connected());

    // Handshake exceeding the timeout.
    let mut transport = LoopbackTransport::new(Arc::new(WhoAmI), pki.registrar.chain().to_vec())
        .handshake_latency(Duration::from_secs(5));
    let err = transport
        .connect(&pki.pledge, &mut verifier, Duration::from_secs(1))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Upstream);
    assert!(verifier.peer_chain().is_none());
}

#[test]
fn test_loopback_masa() {
    let pki = testing::pki();
    let client = LoopbackMasa::new(pki.registrar.chain().to_vec())
        .route(testing::MASA_URI, Arc::new(WhoAmI));
    let resp = client
        .send(testing::MASA_URI, Request::get("/"))
        .unwrap();
    assert_eq!(resp.payload, whoami(pki.registrar.chain()));

    let err = client
        .send("https://elsewhere.example.com", Request::get("/"))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Upstream);
}

/// Serve one TLS connection presenting `identity` on an ephemeral local port.
fn spawn_server(identity: &Credential) -> (SocketAddr, thread::JoinHandle<ProtocolResult<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = TlsServer::new(identity, Arc::new(WhoAmI))
        .unwrap()
        .handshake_timeout(Duration::from_secs(5));
    let handle = thread::spawn(move || {
        let (sock, _) = listener.accept().unwrap();
        server.serve_connection(sock)
    });
    (addr, handle)
}

#[test]
fn test_tls_transport() {
    let pki = testing::pki();
    let (addr, server) = spawn_server(&pki.registrar);
    let mut transport = TlsTransport::new(addr.to_string()).unwrap();
    let mut verifier = TrustVerifier::new(true);
    assert!(!transport.is_connected());

    transport
        .connect(&pki.pledge, &mut verifier, Duration::from_secs(5))
        .unwrap();
    assert!(transport.is_connected());
    assert_eq!(verifier.peer_chain(), Some(pki.registrar.chain()));

    for _ in 0..2 {
        let resp = transport.send(Request::get(PATH_CA_CERTS)).unwrap();
        assert_eq!(resp.code, ResponseCode::Content);
        assert_eq!(resp.content_format, Some(ContentFormat::TextPlainUtf8));
        assert_eq!(resp.payload, whoami(pki.pledge.chain()));
    }

    transport.close();
    assert!(!transport.is_connected());
    server.join().unwrap().unwrap();
}

#[test]
fn test_tls_registrar_rejected() {
    let pki = testing::pki();

    // Registrar lacking the registration authority purpose.
    let rogue = testing::self_signed_registrar(false);
    let (addr, server) = spawn_server(&rogue);
    let mut transport = TlsTransport::new(addr.to_string()).unwrap();
    let mut verifier = TrustVerifier::new(true);
    let err = transport
        .connect(&pki.pledge, &mut verifier, Duration::from_secs(5))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Trust);
    assert!(err.message.contains("registration authority"), "{}", err);
    assert!(!transport.is_connected());
    assert!(verifier.peer_chain().is_none());
    // The server sees the handshake aborted.
    assert!(server.join().unwrap().is_err());

    // Authoritative mode with an anchor the registrar does not chain to.
    let (addr, server) = spawn_server(&pki.registrar);
    let mut transport = TlsTransport::new(addr.to_string()).unwrap();
    let mut verifier = TrustVerifier::new(true);
    verifier.add_trust_anchor(TrustAnchor {
        issuer_name: x509::parse_certificate(pki.domain_ca.certificate())
            .unwrap()
            .subject()
            .as_raw()
            .to_vec(),
        public_key: x509::subject_public_key_info(pki.manufacturer.certificate()).unwrap(),
    });
    verifier.set_authoritative(true);
    let err = transport
        .connect(&pki.pledge, &mut verifier, Duration::from_secs(5))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Trust);
    assert!(server.join().unwrap().is_err());
}

#[test]
fn test_tls_authoritative() {
    let pki = testing::pki();
    let (addr, server) = spawn_server(&pki.registrar);
    let mut transport = TlsTransport::new(addr.to_string()).unwrap();
    let mut verifier = TrustVerifier::new(true);
    verifier.add_trust_anchor(TrustAnchor {
        issuer_name: x509::parse_certificate(pki.domain_ca.certificate())
            .unwrap()
            .subject()
            .as_raw()
            .to_vec(),
        public_key: x509::subject_public_key_info(pki.domain_ca.certificate()).unwrap(),
    });
    verifier.set_authoritative(true);
    transport
        .connect(&pki.pledge, &mut verifier, Duration::from_secs(5))
        .unwrap();
    assert!(verifier.is_authoritative());
    assert_eq!(verifier.peer_chain(), Some(pki.registrar.chain()));
    transport.close();
    server.join().unwrap().unwrap();
}

#[test]
fn test_tls_handshake_timeout() {
    let pki = testing::pki();
    // Connections complete at TCP level but no TLS server ever answers.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let mut transport = TlsTransport::new(addr.to_string()).unwrap();
    let mut verifier = TrustVerifier::new(true);

    let start = Instant::now();
    let err = transport
        .connect(&pki.pledge, &mut verifier, Duration::from_millis(300))
        .unwrap_err();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(err.kind, ErrorKind::Upstream);
    assert!(err.message.contains("timed out"), "{}", err);
    assert!(!transport.is_connected());
    assert!(verifier.peer_chain().is_none());
    drop(listener);
}

#[test]
fn test_tls_connect_refused() {
    let pki = testing::pki();
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let mut transport = TlsTransport::new(addr.to_string()).unwrap();
    let err = transport
        .connect(&pki.pledge, &mut TrustVerifier::new(true), Duration::from_secs(1))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Upstream);

    let err = transport.send(Request::get(PATH_CA_CERTS)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Internal);
}

#[test]
fn test_tls_masa_client() {
    let pki = testing::pki();
    let mut params = testing::registrar_params("MASA", false);
    params.subject_alt_names = vec![SanType::DnsName("localhost".try_into().unwrap())];
    let masa_tls = testing::issue(params, &pki.manufacturer);

    let (addr, server) = spawn_server(&masa_tls);
    let client = TlsMasaClient::new(&pki.registrar, &[pki.manufacturer.certificate().to_vec()])
        .unwrap()
        .timeout(Duration::from_secs(5));
    let uri = format!("https://localhost:{}/.well-known/brski", addr.port());
    let resp = client.send(&uri, Request::get("/")).unwrap();
    assert_eq!(resp.payload, whoami(pki.registrar.chain()));
    server.join().unwrap().unwrap();

    // A MASA certificate outside the configured roots.
    let (addr, server) = spawn_server(&masa_tls);
    let client = TlsMasaClient::new(&pki.registrar, &[pki.domain_ca.certificate().to_vec()])
        .unwrap()
        .timeout(Duration::from_secs(5));
    let uri = format!("https://localhost:{}", addr.port());
    let err = client.send(&uri, Request::get("/")).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Upstream);
    assert!(server.join().unwrap().is_err());
}

#[test]
fn test_authority() {
    let tests = vec![
        ("https://masa.example.com", "masa.example.com", "masa.example.com:443"),
        ("https://masa.example.com/brski", "masa.example.com", "masa.example.com:443"),
        ("https://127.0.0.1:8443/x", "127.0.0.1", "127.0.0.1:8443"),
        ("masa:99", "masa", "masa:99"),
    ];
    for (uri, host, address) in tests {
        let (got_host, got_address) = authority(uri).unwrap();
        assert_eq!(got_host, host, "for {}", uri);
        assert_eq!(got_address, address, "for {}", uri);
    }
    for uri in ["https://", "https://host:port", "https://:443/"] {
        assert_eq!(authority(uri).unwrap_err().kind, ErrorKind::Upstream, "for {}", uri);
    }
}

#[test]
fn test_wire_encoding() {
    let request = Request::post(PATH_REQUEST_VOUCHER, ContentFormat::VoucherCoseCbor, vec![1, 2])
        .accept(ContentFormat::VoucherCoseCbor);
    assert_eq!(
        hex::encode(request.clone().to_vec().unwrap()),
        concat!(
            "85",   // 5-arr
            "02",   // POST
            "75",   // tstr(21)
            "2f2e77656c6c2d6b6e6f776e2f6272736b692f7276", // "/.well-known/brski/rv"
            "190344", // 836
            "190344", // 836
            "420102", // h'0102'
        )
    );
    let got = Request::from_slice(&request.clone().to_vec().unwrap()).unwrap();
    assert_eq!(got, request);

    let request = Request::get(PATH_CA_CERTS);
    let got = Request::from_slice(&request.clone().to_vec().unwrap()).unwrap();
    assert_eq!(got.method, Method::Get);
    assert_eq!(got, request);

    let response = Response::error(ResponseCode::Forbidden, "no");
    let data = response.clone().to_vec().unwrap();
    assert_eq!(
        hex::encode(&data),
        concat!(
            "84",     // 4-arr
            "1883",   // 4.03
            "00",     // text/plain
            "426e6f", // h'6e6f'
            "626e6f", // "no"
        )
    );
    assert_eq!(Response::from_slice(&data).unwrap(), response);
    let response = Response::empty(ResponseCode::Changed);
    assert_eq!(
        Response::from_slice(&response.clone().to_vec().unwrap()).unwrap(),
        response
    );
}

#[test]
fn test_wire_decode_fail() {
    let tests = vec![
        ("a0", "expected array"),
        ("83010203", "expected frame fields"),
        ("8503612ff6f640", "expected method"),
        ("8501612f1903e7f640", "expected content format"),
        ("8501612ff6f661", "DecodeFailed"),
    ];
    for (data, err_msg) in tests {
        expect_err(Request::from_slice(&hex::decode(data).unwrap()), err_msg);
    }
    let tests = vec![
        ("84182af640f6", "expected response code"),
        ("841845f64001", "expected tstr"),
    ];
    for (data, err_msg) in tests {
        expect_err(Response::from_slice(&hex::decode(data).unwrap()), err_msg);
    }
}

#[test]
fn test_frames() {
    let mut buf = Vec::new();
    wire::write_frame(&mut buf, b"abc").unwrap();
    wire::write_frame(&mut buf, b"").unwrap();
    assert_eq!(hex::encode(&buf), "0000000361626300000000");

    let mut r = &buf[..];
    assert_eq!(wire::read_frame(&mut r).unwrap(), Some(b"abc".to_vec()));
    assert_eq!(wire::read_frame(&mut r).unwrap(), Some(vec![]));
    assert_eq!(wire::read_frame(&mut r).unwrap(), None);

    // Oversized in either direction.
    let big = vec![0u8; wire::MAX_FRAME_SIZE + 1];
    assert!(wire::write_frame(&mut Vec::new(), &big).is_err());
    let mut r = &[0x00, 0x01, 0x00, 0x01][..];
    let err = wire::read_frame(&mut r).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

    // Truncated body.
    let mut r = &[0x00, 0x00, 0x00, 0x05, 0x61][..];
    assert!(wire::read_frame(&mut r).is_err());
}
