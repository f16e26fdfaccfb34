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

//! Secure-session transports between the roles.
//!
//! [`Transport`] is the pledge's session with a registrar, [`MasaClient`] the registrar's
//! channel to a MASA. The TLS implementations run over TCP; the loopback implementations
//! dispatch to an in-process [`Service`].

use crate::{
    error::{ProtocolError, ProtocolResult},
    message::{PeerSession, Request, Response, Service},
    trust::TrustVerifier,
    x509::Credential,
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

mod tls;
pub use tls::{authority, RegistrarCertVerifier, TlsMasaClient, TlsServer, TlsTransport};
pub mod wire;

#[cfg(test)]
mod tests;

/// A pledge-side secure session with a registrar.
pub trait Transport: Send {
    /// Establish the session, authenticating as `identity` and checking the server's chain with
    /// `verifier`; a handshake not completed within `timeout` fails.
    fn connect(
        &mut self,
        identity: &Credential,
        verifier: &mut TrustVerifier,
        timeout: Duration,
    ) -> ProtocolResult<()>;

    /// Send a request over the established session.
    fn send(&mut self, request: Request) -> ProtocolResult<Response>;

    /// Tear down the session.
    fn close(&mut self);

    fn is_connected(&self) -> bool;
}

/// A registrar-side client for MASA services.
pub trait MasaClient: Send + Sync {
    /// Send `request` to the MASA at `uri`; failing to reach it is an upstream error.
    fn send(&self, uri: &str, request: Request) -> ProtocolResult<Response>;
}

/// In-process [`Transport`] to a registrar service.
pub struct LoopbackTransport {
    service: Arc<dyn Service>,
    server_chain: Vec<Vec<u8>>,
    handshake_latency: Duration,
    session: Option<PeerSession>,
}

impl LoopbackTransport {
    /// Create a transport to `service`, which presents `server_chain` at handshake.
    pub fn new(service: Arc<dyn Service>, server_chain: Vec<Vec<u8>>) -> Self {
        Self {
            service,
            server_chain,
            handshake_latency: Duration::ZERO,
            session: None,
        }
    }

    /// Simulated time the handshake takes.
    #[must_use]
    pub fn handshake_latency(mut self, latency: Duration) -> Self {
        self.handshake_latency = latency;
        self
    }
}

impl Transport for LoopbackTransport {
    fn connect(
        &mut self,
        identity: &Credential,
        verifier: &mut TrustVerifier,
        timeout: Duration,
    ) -> ProtocolResult<()> {
        self.session = None;
        if self.handshake_latency > timeout {
            warn!(?timeout, "handshake timed out");
            return Err(ProtocolError::upstream("handshake timed out"));
        }
        verifier.verify_server(&self.server_chain)?;
        self.session = Some(PeerSession::new(identity.chain().to_vec()));
        debug!("session established");
        Ok(())
    }

    fn send(&mut self, request: Request) -> ProtocolResult<Response> {
        let session = self
            .session
            .clone()
            .ok_or_else(|| ProtocolError::internal("no secure session"))?;
        Ok(self.service.handle(&request.peer(session)))
    }

    fn close(&mut self) {
        self.session = None;
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }
}

/// In-process [`MasaClient`] routing by URI to MASA services.
#[derive(Default)]
pub struct LoopbackMasa {
    routes: HashMap<String, Arc<dyn Service>>,
    client_chain: Vec<Vec<u8>>,
}

impl LoopbackMasa {
    /// Create a client that authenticates with `client_chain`.
    pub fn new(client_chain: Vec<Vec<u8>>) -> Self {
        Self {
            routes: HashMap::new(),
            client_chain,
        }
    }

    /// Serve requests for `uri` with `service`.
    #[must_use]
    pub fn route<S: Into<String>>(mut self, uri: S, service: Arc<dyn Service>) -> Self {
        self.routes.insert(uri.into(), service);
        self
    }
}

impl MasaClient for LoopbackMasa {
    fn send(&self, uri: &str, request: Request) -> ProtocolResult<Response> {
        let service = self.routes.get(uri).ok_or_else(|| {
            info!(uri, "no route to MASA");
            ProtocolError::upstream(format!("MASA {} unreachable", uri))
        })?;
        let session = PeerSession::new(self.client_chain.clone());
        Ok(service.handle(&request.peer(session)))
    }
}
