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

//! The Rebalance Monitor's decision logic. The periodic tick itself -
//! refresh the registry, walk the watch list, dispatch `payInvoice` - is
//! driven by [`crate::core::Core`]; this module holds the pure arithmetic
//! so it can be tested without a clock, a mesh, or an LN collaborator.
//!
//! Balance ratios are represented in basis points (parts per 10,000)
//! rather than `f64`, and the out-of-balance comparison is done by integer
//! cross-multiplication rather than floating-point division: the computed
//! token amount must never be derived from a float, and even the threshold
//! comparison should avoid collapsing to one where an exact rational
//! comparison is just as cheap.

pub const BPS_SCALE: u64 = 10_000;

/// Per-(alias, channel) tunables for the out-of-balance decision.
#[derive(Clone, Copy, Debug)]
pub struct BalanceSettings {
    /// Target fraction of capacity that should sit on the local side,
    /// in basis points (5000 == 0.5).
    pub balance_point_bps: u64,
    /// Tolerance band below `balance_point_bps` before a rebalance fires.
    pub deadzone_bps: u64,
    /// Hard cap on a single rebalance invoice amount.
    pub max_transaction_size: u64,
}

/// `rebalanceThreshold = clamp(balancePoint - deadzone, 0, 1)`, in basis
/// points.
pub fn rebalance_threshold_bps(settings: &BalanceSettings) -> u64 {
    settings.balance_point_bps.saturating_sub(settings.deadzone_bps).min(BPS_SCALE)
}

/// `localFraction < rebalanceThreshold`, computed as
/// `local_balance * BPS_SCALE < threshold_bps * capacity` to avoid ever
/// forming the fraction as a float.
pub fn is_out_of_balance(local_balance: u64, capacity: u64, settings: &BalanceSettings) -> bool {
    if capacity == 0 {
        return false;
    }
    let threshold_bps = rebalance_threshold_bps(settings);
    let lhs = (local_balance as u128) * (BPS_SCALE as u128);
    let rhs = (threshold_bps as u128) * (capacity as u128);
    lhs < rhs
}

/// The invoice amount to request for an out-of-balance channel: the gap to
/// the balance point, capped at `max_transaction_size` and floored to an
/// integer token count. `None` if the result would not be strictly
/// positive.
pub fn desired_amount(
    local_balance: u64,
    remote_balance: u64,
    settings: &BalanceSettings,
) -> Option<u64> {
    let total = local_balance as u128 + remote_balance as u128;
    let target = total * settings.balance_point_bps as u128 / BPS_SCALE as u128;
    let target = target.min(u64::MAX as u128) as u64;
    if target <= local_balance {
        return None;
    }
    let gap = target - local_balance;
    let amount = gap.min(settings.max_transaction_size);
    if amount == 0 {
        None
    } else {
        Some(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(balance_point: f64, deadzone: f64, max_tx: u64) -> BalanceSettings {
        BalanceSettings {
            balance_point_bps: (balance_point * BPS_SCALE as f64).round() as u64,
            deadzone_bps: (deadzone * BPS_SCALE as f64).round() as u64,
            max_transaction_size: max_tx,
        }
    }

    #[test]
    fn s1_happy_rebalance_amount() {
        // capacity=1_000_000, local=100_000, remote=900_000, point=0.5, dz=0.05
        let s = settings(0.5, 0.05, 500_000);
        assert!(is_out_of_balance(100_000, 1_000_000, &s));
        let amount = desired_amount(100_000, 900_000, &s).unwrap();
        assert_eq!(amount, 400_000);
    }

    #[test]
    fn threshold_is_clamped_to_zero() {
        let s = settings(0.1, 0.5, 1_000);
        assert_eq!(rebalance_threshold_bps(&s), 0);
        assert!(!is_out_of_balance(0, 1_000_000, &s));
    }

    #[test]
    fn in_balance_channel_is_not_flagged() {
        let s = settings(0.5, 0.05, 500_000);
        assert!(!is_out_of_balance(500_000, 1_000_000, &s));
    }

    #[test]
    fn amount_is_capped_at_max_transaction_size() {
        let s = settings(0.5, 0.05, 100_000);
        let amount = desired_amount(100_000, 900_000, &s).unwrap();
        assert_eq!(amount, 100_000);
    }

    #[test]
    fn non_positive_amount_yields_none() {
        let s = settings(0.5, 0.05, 500_000);
        assert_eq!(desired_amount(500_000, 500_000, &s), None);
    }

    #[test]
    fn zero_capacity_is_never_out_of_balance() {
        let s = settings(0.5, 0.0, 1_000);
        assert!(!is_out_of_balance(0, 0, &s));
    }
}
