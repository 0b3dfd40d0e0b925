//! The hub: aggregates pushed updates and republishes them to subscribers.
//!
//! Three workers run on top of the hub's own data node:
//! - the datagram receive loop queues every push in arrival order,
//! - the ingest worker decodes queued pushes and merges them into [`Tables`],
//! - the publish worker sends each live subscriber a full snapshot on first contact
//!   and the delta buffers afterwards, every `publish_interval`.
//!
//! Each shared structure has its own lock, held only for map reads and writes and
//! never across a send.

pub mod config;
pub mod registry;
pub mod tables;

use crate::comms::address::Address;
use crate::comms::codec;
use crate::comms::datagram::DatagramSender;
use crate::comms::rpc::methods::{MethodTable, RpcArgs};
use crate::comms::transport::Datagram;
use crate::error::{NodeError, RpcError};
use crate::node::data_node::DataNode;
use crate::node::lifecycle::{Lifecycle, ShutdownSignal};
use crate::node::Node;
use async_trait::async_trait;
use fxnode::{utc_now, Account, AccountTable, MarketUpdate, Price, PriceTable, Value, ValueMap};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub use config::{HubConfig, RuntimeConfig};
pub use registry::{expiry, Nodes, PeerNode, Subscriber, Subscribers};
pub use tables::Tables;

/// Upper bound for one publish wait, so a huge interval cannot overflow `Instant`.
const MAX_PUBLISH_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// State shared by the hub's workers and its RPC methods.
pub struct HubState {
    name: String,
    tables: Mutex<Tables>,
    subscribers: Mutex<Subscribers>,
    nodes: Mutex<Nodes>,
    config: Mutex<RuntimeConfig>,
}

impl HubState {
    pub fn new(name: impl Into<String>, config: HubConfig) -> Self {
        Self {
            name: name.into(),
            tables: Mutex::new(Tables::new()),
            subscribers: Mutex::new(Subscribers::default()),
            nodes: Mutex::new(Nodes::default()),
            config: Mutex::new(RuntimeConfig::new(config)),
        }
    }

    pub fn config(&self) -> RuntimeConfig {
        self.config.lock().clone()
    }

    /// Validates and merges `changes`, returning the merged configuration.
    pub fn update_config(&self, changes: &ValueMap) -> Result<Value, RpcError> {
        let mut config = self.config.lock();
        config.update(changes).map_err(RpcError::InvalidArguments)?;
        info!("{}: config updated with {:?}", self.name, changes.keys().collect::<Vec<_>>());
        Ok(config.to_value())
    }

    /// Registers or renews a subscriber for `subscription_ttl`.
    pub fn subscribe(&self, name: &str, address: Address) {
        let ttl = self.config.lock().options.subscription_ttl();
        let expired_at = expiry(utc_now(), ttl);
        let added = self
            .subscribers
            .lock()
            .subscribe(name, address.clone(), expired_at);
        if added {
            info!("{}: add subscriber {} {} expired_at={}", self.name, name, address, expired_at);
        }
    }

    pub fn subscribers(&self) -> BTreeMap<String, Subscriber> {
        self.subscribers.lock().snapshot()
    }

    /// Registers or renews a peer node for `node_ttl`.
    pub fn notify_node(&self, name: &str, address: Address) {
        let ttl = self.config.lock().options.node_ttl();
        let expired_at = expiry(utc_now(), ttl);
        debug!("{}: notify_node {} {}", self.name, name, address);
        if self.nodes.lock().notify(name, address.clone(), expired_at) {
            info!("{}: new node {} {}", self.name, name, address);
        }
    }

    /// Prunes expired peers, then lists the rest.
    pub fn nodes(&self) -> BTreeMap<String, Address> {
        let mut nodes = self.nodes.lock();
        for (name, node) in nodes.prune(utc_now()) {
            warn!("{}: remove node {} {}", self.name, name, node.address);
        }
        nodes.addresses()
    }

    /// Merges one decoded push into the tables.
    pub fn ingest(&self, update: MarketUpdate) {
        self.tables.lock().apply(update);
    }

    pub fn accounts(&self) -> AccountTable {
        self.tables.lock().accounts().clone()
    }

    pub fn prices(&self) -> PriceTable {
        self.tables.lock().prices().clone()
    }

    pub fn account(&self, name: &str) -> Option<Account> {
        self.tables.lock().account(name).cloned()
    }

    pub fn price(&self, name: &str, instrument: &str) -> Option<Price> {
        self.tables.lock().price(name, instrument).cloned()
    }

    /// Runs one publish cycle.
    ///
    /// Expired subscribers are dropped. New subscribers get the full tables, the
    /// others get the delta if there is one. The delta buffers are cleared once per
    /// cycle whatever the outcome of the sends.
    pub async fn publish(&self, sender: &DatagramSender) {
        let targets = self.subscribers.lock().plan_publish(utc_now());
        for (name, sub) in &targets.expired {
            warn!(
                "{}: remove subscriber {} {} expired_at={}",
                self.name, name, sub.address, sub.expired_at
            );
        }

        let (full, delta) = {
            let mut tables = self.tables.lock();
            let full = (!targets.full.is_empty()).then(|| tables.snapshot());
            (full, tables.take_delta())
        };

        if let Some(full) = full {
            match codec::pack(&full.to_value()) {
                Ok(payload) => {
                    for (name, address) in &targets.full {
                        match sender.send_to(&payload, address).await {
                            Ok(()) => {
                                self.subscribers.lock().mark_initialised(name, address);
                            }
                            Err(e) => warn!(
                                "{}: snapshot to subscriber {} {} failed: {}",
                                self.name, name, address, e
                            ),
                        }
                    }
                }
                Err(e) => error!("{}: cannot encode snapshot: {}", self.name, e),
            }
        }

        if delta.is_empty() || targets.delta.is_empty() {
            return;
        }
        match codec::pack(&delta.to_value()) {
            Ok(payload) => {
                for (name, address) in &targets.delta {
                    if let Err(e) = sender.send_to(&payload, address).await {
                        warn!("{}: delta to subscriber {} {} failed: {}", self.name, name, address, e);
                    }
                }
            }
            Err(e) => error!("{}: cannot encode delta: {}", self.name, e),
        }
    }

    /// The hub's RPC surface.
    pub fn methods(self: &Arc<Self>) -> MethodTable {
        let mut table = MethodTable::new();

        let state = self.clone();
        table.register("subscribe", move |args: RpcArgs| {
            state.subscribe(&args.string(0, "name")?, args.address(1, "address")?);
            Ok(Value::Nil)
        });

        let state = self.clone();
        table.register("get_subscribers", move |_| {
            Ok(state.subscribers.lock().to_value())
        });

        let state = self.clone();
        table.register("notify_node", move |args: RpcArgs| {
            state.notify_node(&args.string(0, "name")?, args.address(1, "address")?);
            Ok(Value::Nil)
        });

        let state = self.clone();
        table.register("get_nodes", move |_| {
            Ok(Value::Map(
                state
                    .nodes()
                    .into_iter()
                    .map(|(name, address)| (name, address.to_value()))
                    .collect(),
            ))
        });

        let state = self.clone();
        table.register("get_config", move |_| Ok(state.config.lock().to_value()));

        let state = self.clone();
        table.register("update_config", move |args: RpcArgs| {
            let mut changes = match args.args.as_slice() {
                [] => ValueMap::new(),
                [Value::Map(map)] => map.clone(),
                _ => {
                    return Err(RpcError::invalid_arguments(
                        "update_config takes keyword options or a single map",
                    ))
                }
            };
            changes.extend(args.kwargs);
            state.update_config(&changes)
        });

        table
    }
}

/// Decodes a push datagram. All or nothing.
fn decode_update(payload: &[u8]) -> anyhow::Result<MarketUpdate> {
    let value = codec::unpack(payload)?;
    Ok(MarketUpdate::from_value(&value)?)
}

pub struct HubNodeBuilder {
    name: String,
    address: Address,
    config: HubConfig,
    hub_addresses: Vec<Address>,
    announce_interval: Option<Duration>,
}

impl HubNodeBuilder {
    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    /// Upstream hubs this hub announces itself to, like any data node.
    pub fn hub_address(mut self, address: Address) -> Self {
        self.hub_addresses.push(address);
        self
    }

    pub fn announce_interval(mut self, interval: Duration) -> Self {
        self.announce_interval = Some(interval);
        self
    }

    pub async fn bind(self) -> Result<HubNode, NodeError> {
        self.config.validate().map_err(NodeError::InvalidConfig)?;
        let state = Arc::new(HubState::new(self.name.clone(), self.config));
        let (tx, rx) = mpsc::unbounded_channel();
        let mut builder = DataNode::builder(self.name.clone(), self.address)
            .hub_addresses(self.hub_addresses)
            .methods(state.methods())
            .queue(tx);
        if let Some(interval) = self.announce_interval {
            builder = builder.announce_interval(interval);
        }
        let node = builder.bind().await?;
        Ok(HubNode {
            lifecycle: Lifecycle::new(self.name),
            state,
            node,
            queue: Arc::new(tokio::sync::Mutex::new(rx)),
        })
    }
}

pub struct HubNode {
    state: Arc<HubState>,
    node: DataNode,
    // Kept across restarts; the ingest worker holds the lock while it runs.
    queue: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>>,
    lifecycle: Lifecycle,
}

impl HubNode {
    pub fn builder(name: impl Into<String>, address: Address) -> HubNodeBuilder {
        HubNodeBuilder {
            name: name.into(),
            address,
            config: HubConfig::default(),
            hub_addresses: Vec::new(),
            announce_interval: None,
        }
    }

    /// Binds a hub with the given options and no upstream hubs.
    pub async fn bind(
        name: impl Into<String>,
        address: Address,
        config: HubConfig,
    ) -> Result<Self, NodeError> {
        Self::builder(name, address).config(config).bind().await
    }

    pub fn name(&self) -> &str {
        self.node.name()
    }

    pub fn state(&self) -> &Arc<HubState> {
        &self.state
    }

    pub fn data_node(&self) -> &DataNode {
        &self.node
    }

    pub fn rpc_address(&self) -> Address {
        self.node.rpc_address()
    }

    pub fn config(&self) -> RuntimeConfig {
        self.state.config()
    }

    pub fn accounts(&self) -> AccountTable {
        self.state.accounts()
    }

    pub fn prices(&self) -> PriceTable {
        self.state.prices()
    }

    pub fn account(&self, name: &str) -> Option<Account> {
        self.state.account(name)
    }

    pub fn price(&self, name: &str, instrument: &str) -> Option<Price> {
        self.state.price(name, instrument)
    }
}

#[async_trait]
impl Node for HubNode {
    fn server_address(&self) -> Address {
        self.node.server_address()
    }

    async fn start(&self) -> Result<(), NodeError> {
        let Some(shutdown) = self.lifecycle.begin_start() else {
            return Ok(());
        };
        if let Err(e) = self.node.start().await {
            self.lifecycle.abort_start();
            return Err(e);
        }
        self.lifecycle.spawn(ingest_loop(
            self.state.clone(),
            self.queue.clone(),
            shutdown.clone(),
        ));
        self.lifecycle.spawn(publish_loop(
            self.state.clone(),
            self.node.sender(),
            shutdown,
        ));
        self.lifecycle.mark_running();
        info!("{}: hub running on {}", self.name(), self.rpc_address());
        Ok(())
    }

    async fn stop(&self, timeout: Option<Duration>) {
        if !self.lifecycle.begin_stop() {
            return;
        }
        tokio::join!(self.lifecycle.stop_workers(timeout), self.node.stop(timeout));
        self.lifecycle.finish_stop();
    }

    async fn join(&self, timeout: Option<Duration>) -> bool {
        self.lifecycle.join(timeout).await
    }

    fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}

async fn ingest_loop(
    state: Arc<HubState>,
    queue: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>>,
    mut shutdown: ShutdownSignal,
) {
    let mut queue = queue.lock().await;
    loop {
        let (payload, source) = tokio::select! {
            _ = shutdown.wait() => break,
            next = queue.recv() => match next {
                Some(datagram) => datagram,
                None => break,
            },
        };
        match decode_update(&payload) {
            Ok(update) => state.ingest(update),
            Err(e) => warn!("{}: dropping push from {}: {:#}", state.name, source, e),
        }
    }
    debug!("{}: ingest worker exited", state.name);
}

/// Publishes every `publish_interval`, re-read each cycle. A cycle that overruns
/// the interval is followed by the next one at once.
async fn publish_loop(state: Arc<HubState>, sender: DatagramSender, mut shutdown: ShutdownSignal) {
    let mut published_at = Instant::now();
    loop {
        let interval = state
            .config
            .lock()
            .options
            .publish_interval()
            .min(MAX_PUBLISH_WAIT);
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = tokio::time::sleep_until(published_at + interval) => {}
        }
        published_at = Instant::now();
        state.publish(&sender).await;
    }
    debug!("{}: publish worker exited", state.name);
}
