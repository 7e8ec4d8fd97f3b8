// Rebalanced: distributed channel rebalancing daemon for a trusted mesh of
// Lightning Network nodes.
// Written in 2024
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

use std::io;

/// Top-level error kinds produced by the core, mirroring the error taxonomy
/// of the rebalancing protocol: transport failures close a session, protocol
/// violations drop a single message, policy rejections turn into a wire
/// reply, collaborator failures are contained per call site, and config
/// errors are fatal at startup.
#[derive(Clone, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum Error {
    /// transport error: {0}
    #[from]
    Transport(TransportError),

    /// protocol error: {0}
    #[from]
    Protocol(ProtocolError),

    /// collaborator error: {0}
    #[from]
    Collaborator(CollaboratorError),

    /// configuration error: {0}
    #[from]
    Config(ConfigError),
}

/// The peer socket died, or a write/read failed at the transport layer.
/// Closes the owning session; does not otherwise propagate.
#[derive(Clone, Debug, Display, Error)]
#[display(doc_comments)]
pub enum TransportError {
    /// socket for peer {0} is no longer usable: {1}
    Closed(String, String),

    /// no active session for peer {0}; message dropped
    NoSession(String),
}

impl TransportError {
    pub fn closed(peer: impl Into<String>, reason: impl ToString) -> Self {
        TransportError::Closed(peer.into(), reason.to_string())
    }
}

/// A received message failed signature verification, failed the freshness
/// check, or carried an unrecognized message type. Always contained to the
/// single message: logged and dropped, the session survives.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ProtocolError {
    /// signature did not verify against the sender's public key
    BadSignature,

    /// message timestamp is {0} ms away from local clock, exceeding the 5s
    /// freshness window
    Stale(i64),

    /// unknown message type
    UnknownType,

    /// message envelope could not be parsed
    Malformed,
}

/// The invoice acceptance policy declined a `payInvoice` request.
#[derive(Clone, Debug, Display, Error)]
#[display(doc_comments)]
pub enum PolicyRejection {
    /// invalid request
    InvalidRequest,

    /// {0}
    RateLimited(String),

    /// payment failed
    PaymentFailed,
}

/// The LN node collaborator (wallet, invoice decode/create, pay) failed.
/// Logged and contained: invoice handling replies with a generic failure,
/// monitor ticks abort early and retry on the next tick.
#[derive(Clone, Debug, Display, Error)]
#[display(doc_comments)]
pub enum CollaboratorError {
    /// LN collaborator call failed: {0}
    Call(String),
}

/// Fatal misconfiguration detected at startup (e.g. missing cluster secret).
#[derive(Clone, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ConfigError {
    /// cluster secret is missing or empty
    MissingSecret,

    /// failed to load configuration: {0}
    Load(String),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::Closed(String::from("<unknown>"), err.to_string())
    }
}
