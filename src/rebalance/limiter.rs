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

//! The rate limiter: a per-channel cooldown gate applied by the requester,
//! and a per-node rolling/fixed window gate applied by the payer.

use std::collections::HashMap;

use crate::audit::{AuditFilter, AuditLog};
use crate::registry::ChannelId;

/// Per-channel cooldown table. A channel with a non-expired block may not
/// have another `payInvoice` dispatched for it.
#[derive(Default)]
pub struct CooldownTable {
    blocks: HashMap<ChannelId, u64>,
}

impl CooldownTable {
    pub fn new() -> Self {
        CooldownTable { blocks: HashMap::new() }
    }

    /// True while a block with `until > now_ms` exists for `channel_id`.
    pub fn is_blocked(&self, channel_id: &ChannelId, now_ms: u64) -> bool {
        self.blocks.get(channel_id).map_or(false, |until| *until > now_ms)
    }

    /// Inserts a block *before* the outbound `payInvoice` write completes,
    /// so two back-to-back ticks can't both fire.
    pub fn block_until(&mut self, channel_id: ChannelId, until_ms: u64) {
        self.blocks.insert(channel_id, until_ms);
    }

    /// Clears the block on `confirmed = true`.
    pub fn clear(&mut self, channel_id: &ChannelId) {
        self.blocks.remove(channel_id);
    }

    /// Sets the block to `retry_at` on `confirmed = false` with a `retryAt`.
    /// On `confirmed = false` without one, the caller simply does not call
    /// this - the original cooldown stands.
    pub fn extend_until(&mut self, channel_id: ChannelId, retry_at_ms: u64) {
        self.blocks.insert(channel_id, retry_at_ms);
    }
}

/// Per-(alias, channel) and per-alias tunables needed by the rolling-limit
/// gate.
#[derive(Clone, Copy, Debug)]
pub struct RollingLimitConfig {
    pub period_ms: u64,
    pub use_rolling: bool,
    pub max_transactions_per_period: usize,
    pub max_amount_per_period: u64,
}

/// Outcome of a rolling-limit check that denied the candidate transaction:
/// the text to put in `paymentResult.reason`, and when the requester may
/// retry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LimitExceeded {
    pub reason: String,
    pub retry_at: u64,
}

/// Computes the window start (`since`) for the rolling or fixed-window
/// policy.
pub fn window_since(config: &RollingLimitConfig, now_ms: u64) -> u64 {
    if config.use_rolling {
        now_ms.saturating_sub(config.period_ms)
    } else if config.period_ms == 0 {
        now_ms
    } else {
        (now_ms / config.period_ms) * config.period_ms
    }
}

/// Applies the per-node rolling/fixed limits. Called by the *payer* before
/// attempting a payment.
pub fn check_rolling_limits(
    audit: &dyn AuditLog,
    config: &RollingLimitConfig,
    paid_by: &str,
    candidate_amount: u64,
    now_ms: u64,
) -> Result<(), LimitExceeded> {
    let since = window_since(config, now_ms);
    let filter = AuditFilter { paid_by, since };
    let matching = audit.filter(filter);
    let count = matching.len();
    let sum: u64 = matching.iter().map(|e| e.amount).sum();

    let retry_at = since + config.period_ms + 1;

    if count >= config.max_transactions_per_period {
        return Err(LimitExceeded {
            reason: format!(
                "rolling transaction limit exceeded. Limit is {}",
                config.max_transactions_per_period
            ),
            retry_at,
        });
    }
    if sum + candidate_amount > config.max_amount_per_period {
        return Err(LimitExceeded {
            reason: format!(
                "rolling amount limit exceeded. Limit is {}",
                config.max_amount_per_period
            ),
            retry_at,
        });
    }
    Ok(())
}
