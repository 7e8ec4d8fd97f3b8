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

//! The configuration surface: a cluster secret plus per-alias and
//! per-(alias, channel) tunables, loaded from a YAML file with
//! environment-variable overrides via the `config` crate - the same
//! loading idiom the sibling `lnp_node` daemons use.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::rebalance::limiter::RollingLimitConfig;
use crate::rebalance::monitor::BalanceSettings;

/// Per-(alias, channel) tunables: the balance target and tolerance band.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct ChannelTuning {
    pub balance_point: f64,
    pub deadzone: f64,
}

impl ChannelTuning {
    pub fn to_balance_settings(self, max_transaction_size: u64) -> BalanceSettings {
        BalanceSettings {
            balance_point_bps: to_bps(self.balance_point),
            deadzone_bps: to_bps(self.deadzone),
            max_transaction_size,
        }
    }
}

fn to_bps(fraction: f64) -> u64 {
    (fraction.clamp(0.0, 1.0) * crate::rebalance::monitor::BPS_SCALE as f64).round() as u64
}

/// Per-alias tunables: the monitor cadence, per-node limits, and the
/// per-channel overrides keyed by channel id, plus a `default` entry used
/// for channels without an explicit override.
///
/// `min_time_between_payments` and `limits_period` are the spec's
/// `minTimeBetweenPayments`/`limitsPeriod` duration-string tunables
/// (e.g. `"1h"`, `"30m"`), parsed via `humantime_serde` - unlike
/// `refresh_rate_secs`, which the spec documents as a plain integer
/// seconds count.
#[derive(Clone, Debug, Deserialize)]
pub struct AliasConfig {
    pub refresh_rate_secs: u64,
    pub max_transaction_size: u64,
    #[serde(with = "humantime_serde")]
    pub min_time_between_payments: std::time::Duration,
    #[serde(with = "humantime_serde")]
    pub limits_period: std::time::Duration,
    pub use_rolling_limits_period: bool,
    pub max_transactions_per_period: usize,
    pub max_amount_per_period: u64,
    #[serde(default)]
    pub channels: HashMap<String, ChannelTuning>,
    pub default_channel: ChannelTuning,
}

impl AliasConfig {
    pub fn rolling_limits(&self) -> RollingLimitConfig {
        RollingLimitConfig {
            period_ms: self.limits_period.as_millis() as u64,
            use_rolling: self.use_rolling_limits_period,
            max_transactions_per_period: self.max_transactions_per_period,
            max_amount_per_period: self.max_amount_per_period,
        }
    }

    pub fn balance_settings_for(&self, channel_id: &str) -> BalanceSettings {
        let tuning = self.channels.get(channel_id).copied().unwrap_or(self.default_channel);
        tuning.to_balance_settings(self.max_transaction_size)
    }

    pub fn min_time_between_payments_ms(&self) -> u64 {
        self.min_time_between_payments.as_millis() as u64
    }
}

#[derive(Clone, Debug, Deserialize)]
struct RawConfig {
    secret: String,
    #[serde(default)]
    aliases: HashMap<String, AliasConfig>,
}

/// The loaded, validated configuration.
#[derive(Clone, Debug)]
pub struct Config {
    secret: Vec<u8>,
    aliases: HashMap<String, AliasConfig>,
}

impl Config {
    /// Loads configuration from `path` (YAML), layered with
    /// `REBALANCED_*` environment variable overrides. A missing or empty
    /// cluster secret is a fatal [`ConfigError`].
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let mut builder = settings::Config::default();
        builder
            .merge(settings::File::with_name(path))
            .map_err(|err| ConfigError::Load(err.to_string()))?;
        builder
            .merge(settings::Environment::with_prefix("REBALANCED").separator("__"))
            .map_err(|err| ConfigError::Load(err.to_string()))?;
        let raw: RawConfig =
            builder.try_into().map_err(|err| ConfigError::Load(err.to_string()))?;
        Config::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        if raw.secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        Ok(Config { secret: raw.secret.into_bytes(), aliases: raw.aliases })
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    pub fn alias(&self, alias: &str) -> Option<&AliasConfig> {
        self.aliases.get(alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_secret() {
        let raw = RawConfig { secret: String::new(), aliases: HashMap::new() };
        assert!(matches!(Config::from_raw(raw), Err(ConfigError::MissingSecret)));
    }

    #[test]
    fn balance_settings_fall_back_to_default_channel() {
        let alias = AliasConfig {
            refresh_rate_secs: 60,
            max_transaction_size: 500_000,
            min_time_between_payments: std::time::Duration::from_secs(3_600),
            limits_period: std::time::Duration::from_secs(86_400),
            use_rolling_limits_period: true,
            max_transactions_per_period: 5,
            max_amount_per_period: 5_000_000,
            channels: HashMap::new(),
            default_channel: ChannelTuning { balance_point: 0.5, deadzone: 0.05 },
        };
        let settings = alias.balance_settings_for("unlisted-channel");
        assert_eq!(settings.balance_point_bps, 5_000);
        assert_eq!(settings.deadzone_bps, 500);
    }

    #[test]
    fn duration_tunables_parse_from_human_readable_strings() {
        let json = r#"{
            "refresh_rate_secs": 60,
            "max_transaction_size": 500000,
            "min_time_between_payments": "1h",
            "limits_period": "24h",
            "use_rolling_limits_period": true,
            "max_transactions_per_period": 10,
            "max_amount_per_period": 5000000,
            "default_channel": { "balance_point": 0.5, "deadzone": 0.05 }
        }"#;
        let alias: AliasConfig = serde_json::from_str(json).unwrap();
        assert_eq!(alias.min_time_between_payments_ms(), 3_600_000);
        assert_eq!(alias.rolling_limits().period_ms, 86_400_000);
    }
}
