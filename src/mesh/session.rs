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

//! Per-connection lifecycle: handshake, inbound dispatch, outbound write,
//! teardown. Each session runs as its own Tokio task, reading signed
//! envelopes off its socket and forwarding verified messages to the single
//! [`crate::core::Core`] actor over an `mpsc` channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use secp256k1::PublicKey;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::core::CoreCommand;
use crate::identity::MeshIdentity;
use crate::mesh::transport::{Connection, READ_TIMEOUT};
use crate::protocol::{Envelope, Message};

/// A session reaches `Greeted` only after it has sent and received a valid
/// `hello`; nothing else changes its lifecycle state in this crate.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SessionState {
    Connected,
    Greeted,
}

/// What [`crate::core::Core`] keeps per active session: enough to address
/// outbound sends and to know the peer is alive.
pub struct SessionHandle {
    pub remote_public_key: PublicKey,
    pub outbound: mpsc::UnboundedSender<Message>,
    pub last_received_ms: Arc<AtomicU64>,
    pub state: SessionState,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis()
        as u64
}

/// Runs one peer session to completion: sends `hello`, then loops reading
/// signed envelopes and forwarding outbound messages, until the socket
/// closes, a read times out, or the core closes the outbound channel.
///
/// Signature/freshness verification happens here, against `secret` and the
/// session's own `remote_public_key` (never a public key carried in the
/// message itself). Rejections are logged and the message dropped; the
/// session is not torn down for a bad message.
pub async fn run_session(
    conn: Connection,
    secret: Arc<Vec<u8>>,
    local_identity: MeshIdentity,
    local_ln_public_key: String,
    local_alias: String,
    core_tx: mpsc::UnboundedSender<CoreCommand>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    last_received: Arc<AtomicU64>,
) {
    let remote = conn.remote_public_key;
    let (reader, mut writer) = tokio::io::split(conn.stream);
    let mut reader = BufReader::new(reader);

    let hello = Message::Hello { public_key: local_ln_public_key, alias: local_alias };
    if write_message(&mut writer, &secret, &local_identity, hello).await.is_err() {
        let _ = core_tx.send(CoreCommand::PeerDisconnected { peer: remote });
        return;
    }

    loop {
        let mut line = String::new();
        tokio::select! {
            read_result = tokio::time::timeout(READ_TIMEOUT, reader.read_line(&mut line)) => {
                match read_result {
                    Err(_elapsed) => {
                        log::warn!("peer {} read timed out", remote);
                        break;
                    }
                    Ok(Ok(0)) => {
                        log::info!("peer {} closed the connection", remote);
                        break;
                    }
                    Ok(Ok(_)) => {
                        last_received.store(now_ms(), Ordering::Relaxed);
                        match serde_json::from_str::<Envelope>(line.trim_end()) {
                            Ok(envelope) => {
                                if let Err(err) = envelope.verify(&secret, &remote, now_ms()) {
                                    log::warn!("dropping message from {}: {}", remote, err);
                                    continue;
                                }
                                let _ = core_tx.send(CoreCommand::Inbound {
                                    peer: remote,
                                    message: envelope.message,
                                });
                            }
                            Err(err) => {
                                log::warn!("malformed envelope from {}: {}", remote, err);
                            }
                        }
                    }
                    Ok(Err(err)) => {
                        log::warn!("peer {} socket error: {}", remote, err);
                        break;
                    }
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(message) => {
                        if write_message(&mut writer, &secret, &local_identity, message).await.is_err() {
                            log::warn!("peer {} write failed", remote);
                            break;
                        }
                    }
                    None => {
                        // Core dropped our sender: shutting down this session.
                        break;
                    }
                }
            }
        }
    }

    let _ = core_tx.send(CoreCommand::PeerDisconnected { peer: remote });
}

async fn write_message<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    secret: &[u8],
    local_identity: &MeshIdentity,
    message: Message,
) -> std::io::Result<()> {
    let envelope = Envelope::seal(secret, &local_identity.public_key(), now_ms(), message);
    let mut line = serde_json::to_vec(&envelope)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}
