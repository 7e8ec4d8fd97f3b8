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

//! The Invoice Acceptance Policy, run by the responder when a `payInvoice`
//! arrives. Validates the decoded invoice against the message, the local
//! channel view, and the rolling limits, then attempts payment.

use crate::audit::{AuditLog, AuditTransaction, TransactionState};
use crate::ln::{LnClient, PayRequest};
use crate::protocol::Message;
use crate::registry::{ChannelId, ChannelRegistry};

use super::limiter::{check_rolling_limits, RollingLimitConfig};

/// Everything the policy needs beyond the inbound message itself.
pub struct PolicyContext<'a> {
    pub ln: &'a dyn LnClient,
    pub registry: &'a mut ChannelRegistry,
    pub audit: &'a mut dyn AuditLog,
    pub local_pub_key: &'a str,
    pub local_ln_pub_key: &'a str,
    pub rolling: &'a RollingLimitConfig,
    pub now_ms: u64,
}

/// Runs the full acceptance policy for an inbound `payInvoice`, returning
/// the `paymentResult` to send back. Never returns an error: every failure
/// mode is folded into `confirmed: false` with a `reason`.
pub async fn accept_pay_invoice(
    ctx: &mut PolicyContext<'_>,
    invoice: String,
    tokens: u64,
    channel_id: ChannelId,
    paid_to: String,
    paid_by: String,
) -> Message {
    let reject = |reason: &str, retry_at: Option<u64>| Message::PaymentResult {
        invoice: invoice.clone(),
        tokens,
        channel_id: channel_id.clone(),
        paid_to: paid_to.clone(),
        paid_by: paid_by.clone(),
        confirmed: false,
        payment_id: None,
        confirmed_at: None,
        reason: Some(reason.to_owned()),
        retry_at,
    };

    let decoded = match ctx.ln.decode_payment_request(&invoice).await {
        Ok(decoded) => decoded,
        Err(err) => {
            log::warn!("invoice decode failed: {}", err);
            return reject("payment failed", None);
        }
    };

    if decoded.tokens != tokens {
        log::warn!("payInvoice token mismatch: decoded {} vs claimed {}", decoded.tokens, tokens);
        return reject("invalid request", None);
    }
    if decoded.destination != paid_to {
        log::warn!(
            "payInvoice destination mismatch: decoded {} vs claimed {}",
            decoded.destination,
            paid_to
        );
        return reject("invalid request", None);
    }

    if let Err(err) = ctx.ln.get_channels().await.map(|channels| {
        ctx.registry.replace(ctx.local_pub_key, channels);
    }) {
        log::warn!("channel refresh failed while vetting payInvoice: {}", err);
        return reject("payment failed", None);
    }

    let channel = match ctx.registry.get(&channel_id) {
        Some(channel) => channel,
        None => {
            log::warn!("payInvoice for unknown channel {}", channel_id);
            return reject("invalid request", None);
        }
    };
    if channel.remote_pub_key != paid_to {
        log::warn!(
            "payInvoice direction mismatch: channel remote is {} but paidTo is {}",
            channel.remote_pub_key,
            paid_to
        );
        return reject("invalid request", None);
    }

    if let Err(exceeded) =
        check_rolling_limits(ctx.audit, ctx.rolling, ctx.local_ln_pub_key, tokens, ctx.now_ms)
    {
        return reject(&exceeded.reason, Some(exceeded.retry_at));
    }

    let pay_result = ctx
        .ln
        .pay(PayRequest { request: invoice.clone(), outgoing_channel: channel_id.clone() })
        .await;

    let pay_result = match pay_result {
        Ok(result) => result,
        Err(err) => {
            log::warn!("pay attempt failed: {}", err);
            ctx.audit.add(AuditTransaction {
                paid_by: ctx.local_ln_pub_key.to_owned(),
                paid_to: paid_to.clone(),
                channel_id: channel_id.clone(),
                amount: tokens,
                invoice: invoice.clone(),
                state: TransactionState::Failed,
                created_at: ctx.now_ms,
            });
            return reject("payment failed", None);
        }
    };

    ctx.audit.add(AuditTransaction {
        paid_by: ctx.local_ln_pub_key.to_owned(),
        paid_to: paid_to.clone(),
        channel_id: channel_id.clone(),
        amount: tokens,
        invoice: invoice.clone(),
        state: if pay_result.is_confirmed {
            TransactionState::Complete
        } else {
            TransactionState::Failed
        },
        created_at: ctx.now_ms,
    });

    Message::PaymentResult {
        invoice,
        tokens,
        channel_id,
        paid_to,
        paid_by,
        confirmed: pay_result.is_confirmed,
        payment_id: Some(pay_result.id),
        confirmed_at: Some(pay_result.confirmed_at),
        reason: None,
        retry_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLog;
    use crate::ln::{ChannelInfo, CreatedInvoice, DecodedInvoice, PayResult, WalletInfo};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeLn {
        decoded: Mutex<Option<DecodedInvoice>>,
        channels: Mutex<Vec<ChannelInfo>>,
        pay_result: Mutex<Option<PayResult>>,
        pay_should_fail: Mutex<bool>,
    }

    #[async_trait]
    impl LnClient for FakeLn {
        async fn get_wallet_info(&self) -> Result<WalletInfo, crate::error::CollaboratorError> {
            Ok(WalletInfo { public_key: s!("local-ln"), alias: s!("node"), version: s!("1") })
        }

        async fn get_channels(&self) -> Result<Vec<ChannelInfo>, crate::error::CollaboratorError> {
            Ok(self.channels.lock().unwrap().clone())
        }

        async fn create_invoice(
            &self,
            _req: crate::ln::InvoiceRequest,
        ) -> Result<CreatedInvoice, crate::error::CollaboratorError> {
            Ok(CreatedInvoice { request: s!("lnbc1") })
        }

        async fn decode_payment_request(
            &self,
            _request: &str,
        ) -> Result<DecodedInvoice, crate::error::CollaboratorError> {
            self.decoded
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| crate::error::CollaboratorError::Call(s!("no fake set")))
        }

        async fn pay(
            &self,
            _req: crate::ln::PayRequest,
        ) -> Result<PayResult, crate::error::CollaboratorError> {
            if *self.pay_should_fail.lock().unwrap() {
                return Err(crate::error::CollaboratorError::Call(s!("pay failed")));
            }
            Ok(self.pay_result.lock().unwrap().clone().unwrap())
        }
    }

    fn setup(channel_remote: &str) -> (FakeLn, ChannelRegistry, InMemoryAuditLog) {
        let ln = FakeLn::default();
        *ln.decoded.lock().unwrap() =
            Some(DecodedInvoice { tokens: 400_000, destination: s!("02bb") });
        *ln.channels.lock().unwrap() = vec![ChannelInfo {
            id: ChannelId::from("c1"),
            partner_public_key: channel_remote.to_owned(),
            local_balance: 100_000,
            remote_balance: 900_000,
            capacity: 1_000_000,
            is_active: true,
            is_opening: false,
            is_closing: false,
            is_private: false,
        }];
        *ln.pay_result.lock().unwrap() =
            Some(PayResult { id: s!("pay1"), is_confirmed: true, confirmed_at: 1_000 });
        (ln, ChannelRegistry::new(), InMemoryAuditLog::new())
    }

    fn rolling() -> RollingLimitConfig {
        RollingLimitConfig {
            period_ms: 60_000,
            use_rolling: true,
            max_transactions_per_period: 100,
            max_amount_per_period: 10_000_000,
        }
    }

    #[tokio::test]
    async fn s1_happy_path_confirms_and_audits() {
        let (ln, mut registry, mut audit) = setup("02bb");
        let rolling = rolling();
        let mut ctx = PolicyContext {
            ln: &ln,
            registry: &mut registry,
            audit: &mut audit,
            local_pub_key: "local-mesh",
            local_ln_pub_key: "local-ln",
            rolling: &rolling,
            now_ms: 1_000,
        };
        let result = accept_pay_invoice(
            &mut ctx,
            s!("lnbc1"),
            400_000,
            ChannelId::from("c1"),
            s!("02bb"),
            s!("02aa"),
        )
        .await;
        match result {
            Message::PaymentResult { confirmed, .. } => assert!(confirmed),
            _ => panic!("expected paymentResult"),
        }
        assert_eq!(audit.count(crate::audit::AuditFilter { paid_by: "local-ln", since: 0 }), 1);
    }

    #[tokio::test]
    async fn s6_destination_mismatch_is_rejected_before_paying() {
        let (ln, mut registry, mut audit) = setup("02cc"); // channel remote != paidTo
        let rolling = rolling();
        let mut ctx = PolicyContext {
            ln: &ln,
            registry: &mut registry,
            audit: &mut audit,
            local_pub_key: "local-mesh",
            local_ln_pub_key: "local-ln",
            rolling: &rolling,
            now_ms: 1_000,
        };
        let result = accept_pay_invoice(
            &mut ctx,
            s!("lnbc1"),
            400_000,
            ChannelId::from("c1"),
            s!("02bb"),
            s!("02aa"),
        )
        .await;
        match result {
            Message::PaymentResult { confirmed, reason, .. } => {
                assert!(!confirmed);
                assert_eq!(reason.as_deref(), Some("invalid request"));
            }
            _ => panic!("expected paymentResult"),
        }
        assert_eq!(audit.count(crate::audit::AuditFilter { paid_by: "local-ln", since: 0 }), 0);
    }

    #[tokio::test]
    async fn s4_rolling_limit_rejects_with_retry_at() {
        let (ln, mut registry, mut audit) = setup("02bb");
        let rolling = RollingLimitConfig {
            period_ms: 60_000,
            use_rolling: true,
            max_transactions_per_period: 0,
            max_amount_per_period: 10_000_000,
        };
        let mut ctx = PolicyContext {
            ln: &ln,
            registry: &mut registry,
            audit: &mut audit,
            local_pub_key: "local-mesh",
            local_ln_pub_key: "local-ln",
            rolling: &rolling,
            now_ms: 1_000,
        };
        let result = accept_pay_invoice(
            &mut ctx,
            s!("lnbc1"),
            400_000,
            ChannelId::from("c1"),
            s!("02bb"),
            s!("02aa"),
        )
        .await;
        match result {
            Message::PaymentResult { confirmed, retry_at, .. } => {
                assert!(!confirmed);
                assert!(retry_at.is_some());
            }
            _ => panic!("expected paymentResult"),
        }
    }
}
