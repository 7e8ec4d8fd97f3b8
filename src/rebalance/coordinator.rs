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

//! The rebalance coordinator: ties the monitor's decision, the rate
//! limiter, the LN collaborator, and the audit log together into the
//! requester-side request/result flow.

use secp256k1::PublicKey;

use crate::audit::{AuditLog, AuditTransaction, TransactionState};
use crate::error::CollaboratorError;
use crate::ln::{InvoiceRequest, LnClient};
use crate::protocol::Message;
use crate::registry::ChannelId;

use super::limiter::CooldownTable;

/// Invoice expiry offset from the moment it is created.
pub const INVOICE_EXPIRY_MS: u64 = 30_000;

/// Dispatches a rebalance for an out-of-balance channel: checks the
/// per-channel cooldown, creates an invoice, records a `pending` audit
/// entry, and inserts the cooldown block *before* returning the message to
/// send, so the block exists before the outbound write completes and a
/// concurrent tick can't double-dispatch. Returns `None` if the channel is
/// currently blocked or the collaborator call fails.
pub async fn dispatch_rebalance(
    ln: &dyn LnClient,
    audit: &mut dyn AuditLog,
    cooldowns: &mut CooldownTable,
    channel_id: ChannelId,
    amount: u64,
    local_ln_pub_key: &str,
    remote_ln_pub_key: &str,
    min_time_between_payments_ms: u64,
    now_ms: u64,
) -> Option<Message> {
    if cooldowns.is_blocked(&channel_id, now_ms) {
        return None;
    }

    let invoice = match ln
        .create_invoice(InvoiceRequest {
            description: format!("rebalance {}", channel_id),
            expires_at: now_ms + INVOICE_EXPIRY_MS,
            tokens: amount,
        })
        .await
    {
        Ok(invoice) => invoice,
        Err(err) => {
            log_collaborator_error(&err);
            return None;
        }
    };

    // Inserted before the audit entry and the caller's outbound write, so a
    // concurrent tick can't double-dispatch for this channel.
    cooldowns.block_until(channel_id.clone(), now_ms + min_time_between_payments_ms);

    audit.add(AuditTransaction {
        paid_by: remote_ln_pub_key.to_owned(),
        paid_to: local_ln_pub_key.to_owned(),
        channel_id: channel_id.clone(),
        amount,
        invoice: invoice.request.clone(),
        state: TransactionState::Pending,
        created_at: now_ms,
    });

    Some(Message::PayInvoice {
        invoice: invoice.request,
        tokens: amount,
        channel_id,
        paid_to: local_ln_pub_key.to_owned(),
        paid_by: remote_ln_pub_key.to_owned(),
    })
}

fn log_collaborator_error(err: &CollaboratorError) {
    log::warn!("invoice creation failed, skipping this tick's rebalance: {}", err);
}

/// Handles an inbound `paymentResult` on the requester side: records the
/// outcome, then clears or extends the cooldown block. If the
/// channel has no live block (e.g. the owning peer churned meanwhile, or
/// shutdown already discarded it) the result is still recorded.
///
/// `paid_by` is echoed from the original `payInvoice` (the peer we asked to
/// pay), not the local identity - the local node is the `paidTo` side of
/// this transaction, not the payer.
pub fn handle_payment_result(
    audit: &mut dyn AuditLog,
    cooldowns: &mut CooldownTable,
    channel_id: ChannelId,
    invoice: String,
    amount: u64,
    paid_to: String,
    paid_by: String,
    confirmed: bool,
    retry_at: Option<u64>,
    now_ms: u64,
) {
    audit.add(AuditTransaction {
        paid_by,
        paid_to,
        channel_id: channel_id.clone(),
        amount,
        invoice,
        state: if confirmed { TransactionState::Complete } else { TransactionState::Failed },
        created_at: now_ms,
    });

    if confirmed {
        cooldowns.clear(&channel_id);
    } else if let Some(retry_at) = retry_at {
        cooldowns.extend_until(channel_id, retry_at);
    }
    // confirmed=false without retry_at: the original cooldown stands.
}

/// Looks up the mesh peer a channel is currently bound to, for sending the
/// dispatched `payInvoice`. Kept here (rather than inlined at call sites)
/// because both the monitor tick and tests need the same resolution rule.
pub fn resolve_recipient(
    ownership: &crate::ownership::OwnershipTable,
    channel_id: &ChannelId,
) -> Option<PublicKey> {
    ownership.owner_of(channel_id).map(|rec| rec.remote_peer)
}
