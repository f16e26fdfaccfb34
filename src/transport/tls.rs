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

//! TLS sessions between the roles, using `rustls` over blocking TCP streams.
//!
//! The registrar's chain is checked by a [`TrustVerifier`] inside the handshake, so a rejected
//! chain aborts the handshake with a fatal alert.

use super::{wire, MasaClient, Transport};
use crate::{
    common::CborSerializable,
    error::{ProtocolError, ProtocolResult},
    message::{PeerSession, Request, Response, ResponseCode, Service},
    trust::{TrustError, TrustVerifier},
    x509::{self, Credential},
};
use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{self, CryptoProvider},
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime},
    server::danger::{ClientCertVerified, ClientCertVerifier},
    CertificateError, ClientConfig, ClientConnection, DigitallySignedStruct, DistinguishedName,
    RootCertStore, ServerConfig, ServerConnection, SignatureScheme, StreamOwned,
};
use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{Arc, Mutex, PoisonError},
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default bound on a server-side handshake.
pub const SERVER_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
/// Default bound on one request/response exchange.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);
/// Idle time after which a server closes a session.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
enum HandshakeFailure {
    #[error("handshake timed out")]
    TimedOut,
    #[error("handshake failed: {0}")]
    Io(io::Error),
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Run `step` with the time left until `deadline` until it reports the handshake complete.
fn handshake_until(
    deadline: Instant,
    mut step: impl FnMut(Duration) -> io::Result<bool>,
) -> Result<(), HandshakeFailure> {
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
            .ok_or(HandshakeFailure::TimedOut)?;
        match step(remaining) {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) if is_timeout(&e) => return Err(HandshakeFailure::TimedOut),
            Err(e) => return Err(HandshakeFailure::Io(e)),
        }
    }
}

/// Drive the handshake of a `StreamOwned` over a `TcpStream` until it completes or `deadline`
/// passes.
macro_rules! complete_handshake {
    ($stream:ident, $deadline:expr) => {
        handshake_until($deadline, |remaining| {
            set_timeouts(&$stream.sock, remaining)?;
            if $stream.conn.is_handshaking() {
                $stream.conn.complete_io(&mut $stream.sock)?;
            }
            Ok(!$stream.conn.is_handshaking())
        })
    };
}

fn set_timeouts(sock: &TcpStream, timeout: Duration) -> io::Result<()> {
    sock.set_read_timeout(Some(timeout))?;
    sock.set_write_timeout(Some(timeout))
}

fn connect_tcp(address: &str, timeout: Duration) -> ProtocolResult<TcpStream> {
    let addrs: Vec<SocketAddr> = address
        .to_socket_addrs()
        .map_err(|e| ProtocolError::upstream(format!("cannot resolve {}: {}", address, e)))?
        .collect();
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(sock) => return Ok(sock),
            Err(e) => {
                debug!(%addr, "connect failed: {}", e);
                last_err = Some(e);
            }
        }
    }
    Err(ProtocolError::upstream(match last_err {
        Some(e) => format!("cannot connect to {}: {}", address, e),
        None => format!("no address for {}", address),
    }))
}

fn default_provider() -> Arc<CryptoProvider> {
    Arc::new(crypto::ring::default_provider())
}

fn certificate_chain(identity: &Credential) -> Vec<CertificateDer<'static>> {
    identity
        .chain()
        .iter()
        .map(|c| CertificateDer::from(c.clone()))
        .collect()
}

fn private_key(identity: &Credential) -> PrivateKeyDer<'static> {
    PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(identity.key_der().to_vec()))
}

fn config_error(e: rustls::Error) -> ProtocolError {
    ProtocolError::internal(format!("TLS configuration failed: {}", e))
}

fn session_error(e: io::Error) -> ProtocolError {
    ProtocolError::upstream(format!("session failure: {}", e))
}

/// Send `request` as one frame and read the response frame.
fn exchange<S: Read + Write>(stream: &mut S, request: Request) -> ProtocolResult<Response> {
    let body = request
        .to_vec()
        .map_err(|e| ProtocolError::internal(format!("cannot encode request: {}", e)))?;
    wire::write_frame(stream, &body).map_err(session_error)?;
    let frame = wire::read_frame(stream)
        .map_err(session_error)?
        .ok_or_else(|| ProtocolError::upstream("session closed by peer"))?;
    Response::from_slice(&frame)
        .map_err(|e| ProtocolError::upstream(format!("malformed response: {}", e)))
}

/// Split `uri` (`scheme://host[:port][/path]`) into the TLS server name and a `host:port` address,
/// the port defaulting to 443.
pub fn authority(uri: &str) -> ProtocolResult<(&str, String)> {
    let rest = uri.split_once("://").map_or(uri, |(_, rest)| rest);
    let authority = rest.split('/').next().unwrap_or_default();
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok((host, authority.to_owned()))
        }
        Some(_) => Err(ProtocolError::upstream(format!("bad authority in {:?}", uri))),
        None if authority.is_empty() => {
            Err(ProtocolError::upstream(format!("no host in {:?}", uri)))
        }
        None => Ok((authority, format!("{}:443", authority))),
    }
}

fn certificate_error(e: &TrustError) -> CertificateError {
    match e {
        TrustError::MissingChain | TrustError::Malformed(_) => CertificateError::BadEncoding,
        TrustError::NotValid(_) => CertificateError::Expired,
        TrustError::MissingServerAuth | TrustError::MissingRaPurpose => {
            CertificateError::InvalidPurpose
        }
        TrustError::NoTrustAnchor => CertificateError::UnknownIssuer,
        TrustError::PathInvalid(..) => CertificateError::BadSignature,
    }
}

/// Handshake-time check of a registrar's chain by a [`TrustVerifier`].
///
/// Rejections become `InvalidCertificate` errors, which `rustls` reports to the server as a
/// fatal alert.
#[derive(Debug)]
pub struct RegistrarCertVerifier {
    trust: Mutex<TrustVerifier>,
    rejection: Mutex<Option<String>>,
    provider: Arc<CryptoProvider>,
}

impl RegistrarCertVerifier {
    pub fn new(trust: TrustVerifier, provider: Arc<CryptoProvider>) -> Self {
        Self {
            trust: Mutex::new(trust),
            rejection: Mutex::new(None),
            provider,
        }
    }

    /// Current verifier state, including the chain accepted at handshake.
    pub fn trust(&self) -> TrustVerifier {
        self.trust
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reason the last chain was rejected, if it was.
    pub fn rejection(&self) -> Option<String> {
        self.rejection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ServerCertVerifier for RegistrarCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let chain: Vec<Vec<u8>> = std::iter::once(end_entity)
            .chain(intermediates)
            .map(|c| c.as_ref().to_vec())
            .collect();
        let result = self
            .trust
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .verify_server(&chain);
        match result {
            Ok(()) => Ok(ServerCertVerified::assertion()),
            Err(e) => {
                let err = rustls::Error::InvalidCertificate(certificate_error(&e));
                *self.rejection.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(e.to_string());
                Err(err)
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Requires a client certificate that is currently valid. Authorization of the peer is left to
/// the served role, which sees the chain in the request's [`PeerSession`].
#[derive(Debug)]
struct SessionClientVerifier {
    provider: Arc<CryptoProvider>,
}

impl ClientCertVerifier for SessionClientVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        let cert = x509::parse_certificate(end_entity.as_ref())
            .map_err(|_| rustls::Error::InvalidCertificate(CertificateError::BadEncoding))?;
        if !cert.validity().is_valid() {
            return Err(rustls::Error::InvalidCertificate(CertificateError::Expired));
        }
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Pledge [`Transport`] to a registrar over TLS.
pub struct TlsTransport {
    address: String,
    server_name: ServerName<'static>,
    provider: Arc<CryptoProvider>,
    exchange_timeout: Duration,
    stream: Option<StreamOwned<ClientConnection, TcpStream>>,
}

impl TlsTransport {
    /// Create a transport to the registrar at `address` (`host:port`).
    pub fn new<S: Into<String>>(address: S) -> ProtocolResult<Self> {
        let address = address.into();
        let host = address
            .rsplit_once(':')
            .map_or(address.as_str(), |(host, _)| host);
        let server_name = ServerName::try_from(host.to_owned()).map_err(|e| {
            ProtocolError::structural(format!("invalid server name {:?}: {}", host, e))
        })?;
        Ok(Self {
            address,
            server_name,
            provider: default_provider(),
            exchange_timeout: EXCHANGE_TIMEOUT,
            stream: None,
        })
    }

    /// Bound on each request/response exchange.
    #[must_use]
    pub fn exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }
}

impl Transport for TlsTransport {
    fn connect(
        &mut self,
        identity: &Credential,
        verifier: &mut TrustVerifier,
        timeout: Duration,
    ) -> ProtocolResult<()> {
        self.close();
        let deadline = Instant::now() + timeout;
        let sock = connect_tcp(&self.address, timeout)?;

        let cert_verifier = Arc::new(RegistrarCertVerifier::new(
            verifier.clone(),
            self.provider.clone(),
        ));
        let config = ClientConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(config_error)?
            .dangerous()
            .with_custom_certificate_verifier(cert_verifier.clone())
            .with_client_auth_cert(certificate_chain(identity), private_key(identity))
            .map_err(config_error)?;
        let conn =
            ClientConnection::new(Arc::new(config), self.server_name.clone()).map_err(config_error)?;
        let mut stream = StreamOwned::new(conn, sock);

        let result = complete_handshake!(stream, deadline);
        match result {
            Ok(()) => {}
            Err(HandshakeFailure::TimedOut) => {
                warn!(address = %self.address, ?timeout, "handshake timed out");
                return Err(ProtocolError::upstream("handshake timed out"));
            }
            Err(e) => {
                if let Some(reason) = cert_verifier.rejection() {
                    warn!(address = %self.address, "registrar rejected: {}", reason);
                    return Err(ProtocolError::trust(reason));
                }
                warn!(address = %self.address, "{}", e);
                return Err(ProtocolError::upstream(e.to_string()));
            }
        }

        *verifier = cert_verifier.trust();
        self.stream = Some(stream);
        debug!(address = %self.address, "session established");
        Ok(())
    }

    fn send(&mut self, request: Request) -> ProtocolResult<Response> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ProtocolError::internal("no secure session"))?;
        set_timeouts(&stream.sock, self.exchange_timeout).map_err(session_error)?;
        let result = exchange(stream, request);
        if result.is_err() {
            self.stream = None;
        }
        result
    }

    fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.conn.send_close_notify();
            if let Err(e) = stream.flush() {
                debug!("close_notify not delivered: {}", e);
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Serves a [`Service`] over TLS, one thread per connection.
///
/// Clients must present a currently valid certificate chain, which reaches the service as the
/// request's [`PeerSession`].
pub struct TlsServer {
    config: Arc<ServerConfig>,
    service: Arc<dyn Service>,
    handshake_timeout: Duration,
}

impl TlsServer {
    /// Create a server presenting `identity` and dispatching to `service`.
    pub fn new(identity: &Credential, service: Arc<dyn Service>) -> ProtocolResult<Self> {
        let provider = default_provider();
        let config = ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(config_error)?
            .with_client_cert_verifier(Arc::new(SessionClientVerifier { provider }))
            .with_single_cert(certificate_chain(identity), private_key(identity))
            .map_err(config_error)?;
        Ok(Self {
            config: Arc::new(config),
            service,
            handshake_timeout: SERVER_HANDSHAKE_TIMEOUT,
        })
    }

    /// Bound on each client handshake.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Accept connections on `listener` until accepting fails.
    pub fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        info!(address = ?listener.local_addr().ok(), "serving");
        for sock in listener.incoming() {
            let sock = sock?;
            let server = self.clone();
            thread::spawn(move || {
                if let Err(e) = server.serve_connection(sock) {
                    debug!("connection ended: {}", e);
                }
            });
        }
        Ok(())
    }

    /// Serve one connection until the client closes it or stays idle too long.
    pub fn serve_connection(&self, sock: TcpStream) -> ProtocolResult<()> {
        let peer_addr = sock.peer_addr().ok();
        let conn = ServerConnection::new(self.config.clone()).map_err(config_error)?;
        let mut stream = StreamOwned::new(conn, sock);
        let deadline = Instant::now() + self.handshake_timeout;
        complete_handshake!(stream, deadline)
        .map_err(|e| {
            warn!(?peer_addr, "{}", e);
            ProtocolError::upstream(e.to_string())
        })?;

        let chain: Vec<Vec<u8>> = stream
            .conn
            .peer_certificates()
            .map(|certs| certs.iter().map(|c| c.as_ref().to_vec()).collect())
            .unwrap_or_default();
        let session = PeerSession::new(chain);
        info!(?peer_addr, peer = ?session.peer_id(), "session established");
        set_timeouts(&stream.sock, SESSION_IDLE_TIMEOUT).map_err(session_error)?;

        loop {
            let Some(frame) = wire::read_frame(&mut stream).map_err(session_error)? else {
                debug!(?peer_addr, "session closed");
                stream.conn.send_close_notify();
                if let Err(e) = stream.flush() {
                    debug!(?peer_addr, "close_notify not delivered: {}", e);
                }
                return Ok(());
            };
            let response = match Request::from_slice(&frame) {
                Ok(request) => {
                    debug!(?peer_addr, path = %request.path, "request");
                    self.service.handle(&request.peer(session.clone()))
                }
                Err(e) => Response::error(
                    ResponseCode::BadRequest,
                    format!("malformed request: {}", e),
                ),
            };
            let body = response
                .to_vec()
                .map_err(|e| ProtocolError::internal(format!("cannot encode response: {}", e)))?;
            wire::write_frame(&mut stream, &body).map_err(session_error)?;
        }
    }
}

/// Registrar [`MasaClient`] opening one TLS session per request.
///
/// The MASA's server certificate must chain to one of the configured roots and name the URI's
/// host.
pub struct TlsMasaClient {
    config: Arc<ClientConfig>,
    timeout: Duration,
}

impl TlsMasaClient {
    /// Create a client authenticating as `identity` and trusting MASAs under `roots`.
    pub fn new(identity: &Credential, roots: &[Vec<u8>]) -> ProtocolResult<Self> {
        let mut store = RootCertStore::empty();
        for root in roots {
            store
                .add(CertificateDer::from(root.clone()))
                .map_err(config_error)?;
        }
        let config = ClientConfig::builder_with_provider(default_provider())
            .with_safe_default_protocol_versions()
            .map_err(config_error)?
            .with_root_certificates(store)
            .with_client_auth_cert(certificate_chain(identity), private_key(identity))
            .map_err(config_error)?;
        Ok(Self {
            config: Arc::new(config),
            timeout: EXCHANGE_TIMEOUT,
        })
    }

    /// Bound on connecting and on each exchange.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl MasaClient for TlsMasaClient {
    fn send(&self, uri: &str, request: Request) -> ProtocolResult<Response> {
        let (host, address) = authority(uri)?;
        let server_name = ServerName::try_from(host.to_owned())
            .map_err(|e| ProtocolError::upstream(format!("invalid MASA host {:?}: {}", host, e)))?;
        let deadline = Instant::now() + self.timeout;
        let sock = connect_tcp(&address, self.timeout)?;
        let conn = ClientConnection::new(self.config.clone(), server_name).map_err(config_error)?;
        let mut stream = StreamOwned::new(conn, sock);
        complete_handshake!(stream, deadline)
        .map_err(|e| {
            info!(uri, "MASA unreachable: {}", e);
            ProtocolError::upstream(format!("MASA {} unreachable: {}", uri, e))
        })?;

        set_timeouts(&stream.sock, self.timeout).map_err(session_error)?;
        let result = exchange(&mut stream, request);
        stream.conn.send_close_notify();
        if let Err(e) = stream.flush() {
            debug!(uri, "close_notify not delivered: {}", e);
        }
        result
    }
}
