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

//! Process entry point: parses CLI flags, loads configuration, wires the
//! mesh transport, the LN collaborator, and the [`Core`] actor onto one
//! multi-threaded Tokio runtime, and drives the shutdown sequence of spec
//! §5 on `SIGINT`/`SIGTERM`.

use std::process;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use clap::{App, Arg};
use rebalanced::config::Config;
use rebalanced::core::{Core, CoreCommand};
use rebalanced::error::{CollaboratorError, TransportError};
use rebalanced::identity::{LnIdentity, MeshIdentity};
use rebalanced::ln::{ChannelInfo, CreatedInvoice, DecodedInvoice, LnClient, PayRequest, PayResult, WalletInfo};
use rebalanced::mesh::transport::{Connection, MeshTransport};
use rebalanced::protocol::Message;
use secp256k1::PublicKey;
use tokio::sync::mpsc;

/// Placeholder [`LnClient`] for operators who have not yet wired in their
/// node's RPC client. Every call fails with a descriptive
/// [`CollaboratorError`] so misconfiguration is loud rather than silently
/// inert. A real deployment replaces this with an LND/CLN RPC client
/// implementing the same trait - that integration is intentionally out of
/// scope for this crate.
struct UnconfiguredLnClient;

#[async_trait::async_trait]
impl LnClient for UnconfiguredLnClient {
    async fn get_wallet_info(&self) -> Result<WalletInfo, CollaboratorError> {
        Err(unconfigured())
    }

    async fn get_channels(&self) -> Result<Vec<ChannelInfo>, CollaboratorError> {
        Err(unconfigured())
    }

    async fn create_invoice(
        &self,
        _req: rebalanced::ln::InvoiceRequest,
    ) -> Result<CreatedInvoice, CollaboratorError> {
        Err(unconfigured())
    }

    async fn decode_payment_request(
        &self,
        _request: &str,
    ) -> Result<DecodedInvoice, CollaboratorError> {
        Err(unconfigured())
    }

    async fn pay(&self, _req: PayRequest) -> Result<PayResult, CollaboratorError> {
        Err(unconfigured())
    }
}

fn unconfigured() -> CollaboratorError {
    CollaboratorError::Call(String::from(
        "no LnClient configured - wire a real LND/CLN RPC client into main() before running \
         against a live node",
    ))
}

/// Placeholder [`MeshTransport`] for deployments that have not yet wired in
/// a real rendezvous transport. Every call fails immediately with a
/// descriptive [`TransportError`], so the `transport.join(...)` call in
/// `main()` aborts the process at startup rather than letting the daemon
/// "run" forever with a mesh layer that can never establish a session. Per
/// spec §1/§6 the rendezvous transport is a collaborator contract this
/// crate does not implement - a real deployment replaces this with a
/// concrete [`MeshTransport`] backed by TCP and a rendezvous discovery
/// client.
struct UnconfiguredMeshTransport;

#[async_trait::async_trait]
impl MeshTransport for UnconfiguredMeshTransport {
    async fn join(&self, _topic: [u8; 32]) -> Result<(), TransportError> {
        Err(unconfigured_mesh_transport())
    }

    async fn accept(&self) -> Result<Connection, TransportError> {
        Err(unconfigured_mesh_transport())
    }

    async fn connect(&self, _peer: PublicKey) -> Result<Connection, TransportError> {
        Err(unconfigured_mesh_transport())
    }

    async fn leave(&self) {}
}

fn unconfigured_mesh_transport() -> TransportError {
    TransportError::closed(
        "<unconfigured>",
        "no MeshTransport configured - wire a real rendezvous transport into main() before \
         running against a live mesh",
    )
}

fn cli() -> App<'static> {
    App::new("rebalanced")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Distributed channel rebalancing daemon for a trusted mesh of LN nodes")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .takes_value(true)
                .default_value("rebalanced.yaml")
                .help("Path to the YAML configuration file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .multiple_occurrences(true)
                .help("Increase log verbosity (-v, -vv, -vvv)"),
        )
}

fn init_logging(verbosity: u64) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    init_logging(matches.occurrences_of("verbose"));

    let config_path = matches.value_of("config").expect("has a default");
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            log::error!("fatal: {}", err);
            process::exit(1);
        }
    };

    let ln: Arc<dyn LnClient> = Arc::new(UnconfiguredLnClient);
    let wallet = match ln.get_wallet_info().await {
        Ok(wallet) => wallet,
        Err(err) => {
            log::error!("fatal: could not reach LN collaborator: {}", err);
            process::exit(1);
        }
    };
    let local_ln = LnIdentity {
        public_key: wallet.public_key,
        alias: wallet.alias.clone(),
        version: wallet.version,
    };
    let alias_config = match config.alias(&wallet.alias) {
        Some(cfg) => cfg.clone(),
        None => {
            log::error!("fatal: no configuration section for alias '{}'", wallet.alias);
            process::exit(1);
        }
    };

    let local_identity = MeshIdentity::generate();
    let topic = rebalanced::crypto::rendezvous_topic(config.secret());
    log::info!(
        "starting rebalanced: local_alias={} mesh_pubkey={} topic={}",
        wallet.alias,
        local_identity.public_key(),
        hex_topic(&topic)
    );

    let transport: Arc<dyn MeshTransport> = Arc::new(UnconfiguredMeshTransport);
    if let Err(err) = transport.join(topic).await {
        log::error!("fatal: could not join rendezvous topic: {}", err);
        process::exit(1);
    }

    let (core_tx, core_rx) = mpsc::unbounded_channel::<CoreCommand>();
    let core = Core::new(
        config.secret().to_vec(),
        local_identity.clone(),
        local_ln.clone(),
        alias_config.clone(),
        ln.clone(),
        Box::new(rebalanced::audit::InMemoryAuditLog::new()),
    );
    let core_task = tokio::spawn(core.run(core_rx));

    let accept_task = tokio::spawn(accept_loop(
        transport.clone(),
        Arc::new(config.secret().to_vec()),
        local_identity.clone(),
        local_ln.clone(),
        core_tx.clone(),
    ));

    let refresh_rate = std::time::Duration::from_secs(alias_config.refresh_rate_secs.max(1));
    let monitor_task = tokio::spawn(monitor_loop(refresh_rate, core_tx.clone()));

    shutdown_signal().await;
    log::info!("shutdown requested, leaving rendezvous topic and closing sessions");
    monitor_task.abort();
    accept_task.abort();
    transport.leave().await;
    let _ = core_tx.send(CoreCommand::Shutdown);
    let _ = core_task.await;
}

fn hex_topic(topic: &[u8; 32]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(64);
    for b in topic {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Accepts inbound mesh connections for the lifetime of the process,
/// spawning a [`rebalanced::mesh::session::run_session`] task per
/// connection. Each session forwards verified messages to the core actor
/// over `core_tx`; it never mutates core state directly.
async fn accept_loop(
    transport: Arc<dyn MeshTransport>,
    secret: Arc<Vec<u8>>,
    local_identity: MeshIdentity,
    local_ln: LnIdentity,
    core_tx: mpsc::UnboundedSender<CoreCommand>,
) {
    loop {
        match transport.accept().await {
            Ok(conn) => spawn_session(conn, &secret, &local_identity, &local_ln, &core_tx),
            Err(err) => {
                log::warn!("mesh accept failed: {}", err);
            }
        }
    }
}

fn spawn_session(
    conn: rebalanced::mesh::transport::Connection,
    secret: &Arc<Vec<u8>>,
    local_identity: &MeshIdentity,
    local_ln: &LnIdentity,
    core_tx: &mpsc::UnboundedSender<CoreCommand>,
) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Message>();
    let last_received = Arc::new(AtomicU64::new(0));
    let _ = core_tx.send(CoreCommand::NewSession {
        peer: conn.remote_public_key,
        outbound: outbound_tx,
        last_received_ms: last_received.clone(),
    });
    tokio::spawn(rebalanced::mesh::session::run_session(
        conn,
        secret.clone(),
        local_identity.clone(),
        local_ln.public_key.clone(),
        local_ln.alias.clone(),
        core_tx.clone(),
        outbound_rx,
        last_received,
    ));
}

/// Drives the periodic balance check: every `refresh_rate`, sends
/// [`CoreCommand::Tick`] into the core actor.
async fn monitor_loop(refresh_rate: std::time::Duration, core_tx: mpsc::UnboundedSender<CoreCommand>) {
    let mut interval = tokio::time::interval(refresh_rate);
    loop {
        interval.tick().await;
        if core_tx.send(CoreCommand::Tick).is_err() {
            break;
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
