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

//! The single event-driven core: one actor owns every piece of shared
//! state (Channel Registry, Watch List, Channel Ownership, Rebalance
//! Blocks, Audit Log, active sessions) and is driven exclusively by
//! [`CoreCommand`]s arriving over an `mpsc` channel. Peer session tasks,
//! the monitor timer, and the mesh accept loop are all producers into that
//! one channel; none of them mutate Core state directly. This mailbox-actor
//! form is chosen over a coarse-grained mutex because Tokio's task model
//! makes a single-owner actor the more idiomatic fit.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use secp256k1::PublicKey;
use tokio::sync::mpsc;

use crate::audit::AuditLog;
use crate::config::AliasConfig;
use crate::identity::{LnIdentity, MeshIdentity};
use crate::ln::LnClient;
use crate::mesh::session::{SessionHandle, SessionState};
use crate::ownership::OwnershipTable;
use crate::protocol::Message;
use crate::rebalance::{coordinator, monitor, policy};
use crate::registry::{ChannelId, ChannelRegistry};

/// Everything that can mutate [`Core`] state. Every variant is produced by
/// some task outside the core and consumed one at a time by [`Core::run`].
pub enum CoreCommand {
    /// A peer session registered (or re-registered) after connecting.
    NewSession {
        peer: PublicKey,
        outbound: mpsc::UnboundedSender<Message>,
        last_received_ms: Arc<AtomicU64>,
    },
    /// A verified, fresh message arrived from `peer`.
    Inbound { peer: PublicKey, message: Message },
    /// A session's socket closed, errored, or timed out.
    PeerDisconnected { peer: PublicKey },
    /// The periodic rebalance-monitor tick.
    Tick,
    /// Shutdown was requested; finish the current command then exit the
    /// run loop.
    Shutdown,
}

pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis()
        as u64
}

/// The core actor. Constructed once per process and driven by
/// [`Core::run`] until a [`CoreCommand::Shutdown`] is processed.
pub struct Core {
    secret: Arc<Vec<u8>>,
    local_identity: MeshIdentity,
    local_ln: LnIdentity,
    alias_config: AliasConfig,
    ln: Arc<dyn LnClient>,
    audit: Box<dyn AuditLog>,
    registry: ChannelRegistry,
    ownership: OwnershipTable,
    cooldowns: crate::rebalance::limiter::CooldownTable,
    sessions: HashMap<PublicKey, SessionHandle>,
}

impl Core {
    pub fn new(
        secret: Vec<u8>,
        local_identity: MeshIdentity,
        local_ln: LnIdentity,
        alias_config: AliasConfig,
        ln: Arc<dyn LnClient>,
        audit: Box<dyn AuditLog>,
    ) -> Self {
        Core {
            secret: Arc::new(secret),
            local_identity,
            local_ln,
            alias_config,
            ln,
            audit,
            registry: ChannelRegistry::new(),
            ownership: OwnershipTable::new(),
            cooldowns: crate::rebalance::limiter::CooldownTable::new(),
            sessions: HashMap::new(),
        }
    }

    pub fn secret(&self) -> Arc<Vec<u8>> {
        self.secret.clone()
    }

    pub fn local_identity(&self) -> MeshIdentity {
        self.local_identity.clone()
    }

    /// Drains `rx` until [`CoreCommand::Shutdown`], handling one command at
    /// a time. Never runs two commands concurrently - that is what makes
    /// the unlocked shared state in this struct safe.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<CoreCommand>) {
        while let Some(cmd) = rx.recv().await {
            if matches!(cmd, CoreCommand::Shutdown) {
                self.shutdown().await;
                break;
            }
            self.handle(cmd).await;
        }
    }

    async fn handle(&mut self, cmd: CoreCommand) {
        match cmd {
            CoreCommand::NewSession { peer, outbound, last_received_ms } => {
                self.register_session(peer, outbound, last_received_ms);
            }
            CoreCommand::Inbound { peer, message } => {
                self.handle_inbound(peer, message).await;
            }
            CoreCommand::PeerDisconnected { peer } => {
                self.handle_disconnect(peer);
            }
            CoreCommand::Tick => {
                self.handle_tick().await;
            }
            CoreCommand::Shutdown => unreachable!("handled in run()"),
        }
    }

    /// Registers a session, replacing any existing one for the same peer
    /// (last-writer-wins). Dropping the old sender causes that session's
    /// task to see its outbound channel closed and exit.
    fn register_session(
        &mut self,
        peer: PublicKey,
        outbound: mpsc::UnboundedSender<Message>,
        last_received_ms: Arc<AtomicU64>,
    ) {
        if self.sessions.remove(&peer).is_some() {
            log::info!("replacing existing session for {}", peer);
        }
        self.sessions.insert(
            peer,
            SessionHandle { remote_public_key: peer, outbound, last_received_ms, state: SessionState::Connected },
        );
    }

    fn handle_disconnect(&mut self, peer: PublicKey) {
        log::info!("peer {} disconnected", peer);
        self.sessions.remove(&peer);
        self.ownership.remove_peer(&peer);
    }

    async fn handle_inbound(&mut self, peer: PublicKey, message: Message) {
        match message {
            Message::Hello { public_key, alias } => {
                self.handle_hello(peer, public_key, alias).await;
            }
            Message::PayInvoice { invoice, tokens, channel_id, paid_to, paid_by } => {
                self.handle_pay_invoice(peer, invoice, tokens, channel_id, paid_to, paid_by).await;
            }
            Message::PaymentResult {
                invoice,
                tokens,
                channel_id,
                paid_to,
                paid_by,
                confirmed,
                retry_at,
                ..
            } => {
                self.handle_payment_result(
                    channel_id, invoice, tokens, paid_to, paid_by, confirmed, retry_at,
                );
            }
        }
    }

    async fn handle_hello(&mut self, peer: PublicKey, ln_public_key: String, alias: String) {
        log::info!("peer {} greeted as {} ({})", peer, alias, ln_public_key);
        if let Some(session) = self.sessions.get_mut(&peer) {
            session.state = SessionState::Greeted;
        }

        if let Err(err) = self.refresh_registry().await {
            log::warn!("channel refresh on hello failed: {}", err);
            return;
        }

        let owned: Vec<ChannelId> =
            self.registry.owned_by_remote(&ln_public_key).map(|c| c.id.clone()).collect();
        for channel_id in owned {
            log::info!("binding channel {} to peer {}", channel_id, peer);
            self.ownership.bind(channel_id, peer, ln_public_key.clone());
        }
    }

    async fn handle_pay_invoice(
        &mut self,
        peer: PublicKey,
        invoice: String,
        tokens: u64,
        channel_id: ChannelId,
        paid_to: String,
        paid_by: String,
    ) {
        let rolling = self.alias_config.rolling_limits();
        let mut ctx = policy::PolicyContext {
            ln: self.ln.as_ref(),
            registry: &mut self.registry,
            audit: self.audit.as_mut(),
            local_pub_key: &self.local_ln.public_key,
            local_ln_pub_key: &self.local_ln.public_key,
            rolling: &rolling,
            now_ms: now_ms(),
        };
        let result =
            policy::accept_pay_invoice(&mut ctx, invoice, tokens, channel_id, paid_to, paid_by)
                .await;
        self.send_to(peer, result);
    }

    fn handle_payment_result(
        &mut self,
        channel_id: ChannelId,
        invoice: String,
        tokens: u64,
        paid_to: String,
        paid_by: String,
        confirmed: bool,
        retry_at: Option<u64>,
    ) {
        coordinator::handle_payment_result(
            self.audit.as_mut(),
            &mut self.cooldowns,
            channel_id,
            invoice,
            tokens,
            paid_to,
            paid_by,
            confirmed,
            retry_at,
            now_ms(),
        );
    }

    async fn handle_tick(&mut self) {
        if let Err(err) = self.refresh_registry().await {
            log::warn!("monitor tick aborted: channel refresh failed: {}", err);
            return;
        }

        let watched: Vec<ChannelId> = self.ownership.watched_channels().cloned().collect();
        for channel_id in watched {
            self.evaluate_channel(channel_id).await;
        }
    }

    async fn evaluate_channel(&mut self, channel_id: ChannelId) {
        let view = match self.registry.get(&channel_id) {
            Some(view) => view.clone(),
            None => {
                log::info!("Watched channel missing: {}", channel_id);
                self.ownership.unwatch(&channel_id);
                return;
            }
        };
        if !view.is_active {
            return;
        }

        let settings = self.alias_config.balance_settings_for(channel_id.as_ref());
        if !monitor::is_out_of_balance(view.local_balance, view.capacity, &settings) {
            return;
        }
        let amount = match monitor::desired_amount(view.local_balance, view.remote_balance, &settings) {
            Some(amount) => amount,
            None => return,
        };

        let owner = match self.ownership.owner_of(&channel_id) {
            Some(owner) => owner.clone(),
            None => return,
        };

        let message = coordinator::dispatch_rebalance(
            self.ln.as_ref(),
            self.audit.as_mut(),
            &mut self.cooldowns,
            channel_id,
            amount,
            &self.local_ln.public_key,
            &owner.remote_ln_pub_key,
            self.alias_config.min_time_between_payments_ms(),
            now_ms(),
        )
        .await;

        if let Some(message) = message {
            self.send_to(owner.remote_peer, message);
        }
    }

    async fn refresh_registry(&mut self) -> Result<(), crate::error::CollaboratorError> {
        let channels = self.ln.get_channels().await?;
        self.registry.replace(&self.local_ln.public_key, channels);
        Ok(())
    }

    /// Looks up the session by mesh pubkey and sends; if absent, logs and
    /// drops - no queuing.
    fn send_to(&self, peer: PublicKey, message: Message) {
        match self.sessions.get(&peer) {
            Some(session) => {
                if session.outbound.send(message).is_err() {
                    log::warn!("outbound channel to {} is closed, dropping message", peer);
                }
            }
            None => {
                log::warn!("no active session for {}, dropping message", peer);
            }
        }
    }

    async fn shutdown(&mut self) {
        log::info!("shutting down core");
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLog;
    use crate::config::ChannelTuning;
    use crate::ln::{ChannelInfo, CreatedInvoice, DecodedInvoice, InvoiceRequest, PayRequest, PayResult, WalletInfo};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeLn {
        channels: Mutex<Vec<ChannelInfo>>,
        decoded: Mutex<Option<DecodedInvoice>>,
        pay_result: Mutex<Option<PayResult>>,
    }

    #[async_trait]
    impl LnClient for FakeLn {
        async fn get_wallet_info(&self) -> Result<WalletInfo, crate::error::CollaboratorError> {
            Ok(WalletInfo { public_key: s!("local-ln"), alias: s!("local-alias"), version: s!("1") })
        }

        async fn get_channels(&self) -> Result<Vec<ChannelInfo>, crate::error::CollaboratorError> {
            Ok(self.channels.lock().unwrap().clone())
        }

        async fn create_invoice(
            &self,
            req: InvoiceRequest,
        ) -> Result<CreatedInvoice, crate::error::CollaboratorError> {
            Ok(CreatedInvoice { request: format!("lnbc-{}", req.tokens) })
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

        async fn pay(&self, _req: PayRequest) -> Result<PayResult, crate::error::CollaboratorError> {
            Ok(self.pay_result.lock().unwrap().clone().unwrap())
        }
    }

    fn alias_config() -> AliasConfig {
        AliasConfig {
            refresh_rate_secs: 60,
            max_transaction_size: 500_000,
            min_time_between_payments: std::time::Duration::from_secs(3_600),
            limits_period: std::time::Duration::from_secs(86_400),
            use_rolling_limits_period: true,
            max_transactions_per_period: 100,
            max_amount_per_period: 10_000_000,
            channels: HashMap::new(),
            default_channel: ChannelTuning { balance_point: 0.5, deadzone: 0.05 },
        }
    }

    fn peer_key(byte: u8) -> PublicKey {
        let secp = secp256k1::Secp256k1::new();
        let sk = secp256k1::SecretKey::from_slice(&[byte; 32]).unwrap();
        PublicKey::from_secret_key(&secp, &sk)
    }

    fn new_core(ln: FakeLn) -> Core {
        Core::new(
            b"cluster-secret".to_vec(),
            MeshIdentity::generate(),
            LnIdentity { public_key: s!("local-ln"), alias: s!("local-alias"), version: s!("1") },
            alias_config(),
            Arc::new(ln),
            Box::new(InMemoryAuditLog::new()),
        )
    }

    fn register(core: &mut Core, peer: PublicKey) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        core.register_session(peer, tx, Arc::new(AtomicU64::new(0)));
        rx
    }

    #[tokio::test]
    async fn s1_hello_binds_channel_and_tick_dispatches_payinvoice() {
        let ln = FakeLn::default();
        *ln.channels.lock().unwrap() = vec![ChannelInfo {
            id: ChannelId::from("c1"),
            partner_public_key: s!("remote-ln"),
            local_balance: 100_000,
            remote_balance: 900_000,
            capacity: 1_000_000,
            is_active: true,
            is_opening: false,
            is_closing: false,
            is_private: false,
        }];
        let mut core = new_core(ln);
        let peer = peer_key(1);
        let mut outbound = register(&mut core, peer);

        core.handle(CoreCommand::Inbound {
            peer,
            message: Message::Hello { public_key: s!("remote-ln"), alias: s!("bob") },
        })
        .await;
        assert!(core.ownership.is_watched(&ChannelId::from("c1")));

        core.handle(CoreCommand::Tick).await;
        let sent = outbound.try_recv().expect("tick should dispatch payInvoice");
        match sent {
            Message::PayInvoice { channel_id, tokens, paid_to, paid_by, .. } => {
                assert_eq!(channel_id, ChannelId::from("c1"));
                assert_eq!(tokens, 400_000);
                assert_eq!(paid_to, "local-ln");
                assert_eq!(paid_by, "remote-ln");
            }
            other => panic!("expected payInvoice, got {:?}", other),
        }
        assert!(core.cooldowns.is_blocked(&ChannelId::from("c1"), now_ms()));
    }

    #[tokio::test]
    async fn s5_peer_disconnect_unwatches_channel_and_drops_late_result() {
        let ln = FakeLn::default();
        *ln.channels.lock().unwrap() = vec![ChannelInfo {
            id: ChannelId::from("c1"),
            partner_public_key: s!("remote-ln"),
            local_balance: 100_000,
            remote_balance: 900_000,
            capacity: 1_000_000,
            is_active: true,
            is_opening: false,
            is_closing: false,
            is_private: false,
        }];
        let mut core = new_core(ln);
        let peer = peer_key(2);
        let _outbound = register(&mut core, peer);

        core.handle(CoreCommand::Inbound {
            peer,
            message: Message::Hello { public_key: s!("remote-ln"), alias: s!("bob") },
        })
        .await;
        assert!(core.ownership.is_watched(&ChannelId::from("c1")));

        core.handle(CoreCommand::PeerDisconnected { peer }).await;
        assert!(!core.ownership.is_watched(&ChannelId::from("c1")));
        assert!(core.ownership.owner_of(&ChannelId::from("c1")).is_none());
    }

    #[tokio::test]
    async fn payment_result_clears_cooldown_through_the_core() {
        let mut core = new_core(FakeLn::default());
        let channel_id = ChannelId::from("c1");
        core.cooldowns.block_until(channel_id.clone(), now_ms() + 3_600_000);

        core.handle(CoreCommand::Inbound {
            peer: peer_key(3),
            message: Message::PaymentResult {
                invoice: s!("lnbc1"),
                tokens: 400_000,
                channel_id: channel_id.clone(),
                paid_to: s!("local-ln"),
                paid_by: s!("remote-ln"),
                confirmed: true,
                payment_id: Some(s!("pay1")),
                confirmed_at: Some(now_ms()),
                reason: None,
                retry_at: None,
            },
        })
        .await;

        assert!(!core.cooldowns.is_blocked(&channel_id, now_ms()));
    }
}
