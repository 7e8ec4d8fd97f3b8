// Rebalanced: distributed channel rebalancing daemon for a trusted mesh of
// Lightning Network nodes.
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! The mesh transport contract: publish/discover a rendezvous topic and
//! hand back stream-oriented, bidirectional sockets with stable per-peer
//! public keys. Per spec §1/§6, the rendezvous transport itself is out of
//! scope for this crate - it is a collaborator contract. This module
//! defines that contract as [`MeshTransport`] plus an in-memory fake used
//! by tests; a real implementation (e.g. backed by TCP and a rendezvous
//! discovery client) is injected by whatever binary wires this crate up,
//! the same way [`crate::ln::LnClient`] is.

use async_trait::async_trait;
use secp256k1::PublicKey;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransportError;

/// A duplex byte stream, abstracting over TCP (production) and in-memory
/// duplex pipes (tests).
pub trait Duplex: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Duplex for T {}

/// An accepted or dialed mesh connection, carrying the remote peer's stable
/// mesh public key alongside the byte stream.
pub struct Connection {
    pub remote_public_key: PublicKey,
    pub stream: Box<dyn Duplex>,
}

/// The mesh transport contract: join a rendezvous topic, accept inbound
/// connections discovered on it, dial a known peer, and leave on shutdown.
#[async_trait]
pub trait MeshTransport: Send + Sync {
    /// Joins the rendezvous topic `SHA-256(secret)`.
    async fn join(&self, topic: [u8; 32]) -> Result<(), TransportError>;

    /// Blocks until the next inbound connection is discovered on the joined
    /// topic.
    async fn accept(&self) -> Result<Connection, TransportError>;

    /// Dials a peer directly, e.g. for an outbound session the operator
    /// configured explicitly rather than discovered.
    async fn connect(&self, peer: PublicKey) -> Result<Connection, TransportError>;

    /// Leaves the rendezvous topic as part of shutdown.
    async fn leave(&self);
}

/// Applies the socket-level timing settings spec §5 requires of a real
/// TCP-backed transport: 5s keepalive. Callers additionally wrap reads
/// with the 7s [`READ_TIMEOUT`] (Tokio has no per-stream read-timeout
/// setter, so that half is enforced by the caller with
/// `tokio::time::timeout`, as [`crate::mesh::session::run_session`] does).
/// Exposed here for whatever concrete [`MeshTransport`] a deployer injects
/// to reuse, since this crate ships no such concrete transport itself.
pub fn apply_socket_settings(stream: &tokio::net::TcpStream) -> std::io::Result<()> {
    let sock_ref = socket2::SockRef::from(stream);
    sock_ref.set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(KEEPALIVE))
}

pub const KEEPALIVE: std::time::Duration = std::time::Duration::from_secs(5);
pub const READ_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(7);

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// An in-memory transport for tests: `connect(peer)` delivers a duplex
    /// pipe to whichever fake node registered `peer` as its identity, and
    /// `accept()` yields the other end.
    pub struct FakeMeshTransport {
        inbound: Mutex<mpsc::UnboundedReceiver<Connection>>,
        registry: std::sync::Arc<Mutex<HashMap<PublicKey, mpsc::UnboundedSender<Connection>>>>,
        public_key: PublicKey,
    }

    impl FakeMeshTransport {
        pub fn register(
            registry: &std::sync::Arc<Mutex<HashMap<PublicKey, mpsc::UnboundedSender<Connection>>>>,
            public_key: PublicKey,
        ) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            registry.lock().unwrap().insert(public_key, tx);
            FakeMeshTransport {
                inbound: Mutex::new(rx),
                registry: registry.clone(),
                public_key,
            }
        }
    }

    #[async_trait]
    impl MeshTransport for FakeMeshTransport {
        async fn join(&self, _topic: [u8; 32]) -> Result<(), TransportError> {
            Ok(())
        }

        async fn accept(&self) -> Result<Connection, TransportError> {
            self.inbound
                .lock()
                .unwrap()
                .recv()
                .await
                .ok_or_else(|| TransportError::closed("<fake>", "registry closed"))
        }

        async fn connect(&self, peer: PublicKey) -> Result<Connection, TransportError> {
            let (a, b) = tokio::io::duplex(64 * 1024);
            let sender = self
                .registry
                .lock()
                .unwrap()
                .get(&peer)
                .cloned()
                .ok_or_else(|| TransportError::closed(peer.to_string(), "peer not registered"))?;
            sender
                .send(Connection { remote_public_key: self.public_key, stream: Box::new(b) })
                .map_err(|_| TransportError::closed(peer.to_string(), "peer gone"))?;
            Ok(Connection { remote_public_key: peer, stream: Box::new(a) })
        }

        async fn leave(&self) {}
    }
}
