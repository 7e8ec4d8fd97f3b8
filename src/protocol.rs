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

//! The wire message protocol: three application messages, each carried
//! inside a signed [`Envelope`].

use serde::{Deserialize, Serialize};

use crate::registry::ChannelId;

/// Application payload of a signed message. Tagged by `type` on the wire so
/// unknown variants can still be detected and dropped rather than failing
/// to parse silently as a different, wrong variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    /// Advertises the sender's LN identity. Sent immediately on connect.
    Hello { public_key: String, alias: String },

    /// Requests that the recipient pay a BOLT-11 invoice across a shared
    /// channel, moving `tokens` from the recipient's side back to ours.
    PayInvoice {
        invoice: String,
        tokens: u64,
        channel_id: ChannelId,
        paid_to: String,
        paid_by: String,
    },

    /// The outcome of a pay attempt, echoing the original request fields.
    PaymentResult {
        invoice: String,
        tokens: u64,
        channel_id: ChannelId,
        paid_to: String,
        paid_by: String,
        confirmed: bool,
        payment_id: Option<String>,
        confirmed_at: Option<u64>,
        reason: Option<String>,
        retry_at: Option<u64>,
    },
}

impl Message {
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "hello",
            Message::PayInvoice { .. } => "payInvoice",
            Message::PaymentResult { .. } => "paymentResult",
        }
    }
}

/// The stable wire envelope: `{ message, timestamp, signature }`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub message: Message,
    pub timestamp: u64,
    pub signature: String,
}

impl Envelope {
    /// Signs `message` with the current time and the cluster secret,
    /// producing a ready-to-send envelope.
    pub fn seal(
        secret: &[u8],
        sender: &secp256k1::PublicKey,
        timestamp: u64,
        message: Message,
    ) -> Self {
        let signature = crate::crypto::sign(secret, timestamp, sender, &message);
        Envelope { message, timestamp, signature }
    }

    /// Verifies the envelope's signature and freshness against `sender`'s
    /// mesh public key, as tracked by the owning [`crate::mesh::session::PeerSession`].
    pub fn verify(
        &self,
        secret: &[u8],
        sender: &secp256k1::PublicKey,
        now_ms: u64,
    ) -> Result<(), crate::error::ProtocolError> {
        crate::crypto::verify(
            secret,
            self.timestamp,
            sender,
            &self.message,
            &self.signature,
            now_ms,
        )
    }
}
