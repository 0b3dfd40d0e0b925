//! Data nodes: push updates to hubs, answer RPC, announce themselves.
//!
//! A data node owns an RPC server and a datagram socket bound to the same port. While
//! running it notifies every configured hub with `notify_node(name, address)` at a
//! fixed interval so hubs can list it in `get_nodes`.

use crate::comms::address::Address;
use crate::comms::codec;
use crate::comms::datagram::{DatagramSender, DatagramServer};
use crate::comms::rpc::methods::{base_methods, MethodTable, RpcArgs};
use crate::comms::rpc::pool::{PooledConnection, RpcPool};
use crate::comms::rpc::server::RpcServer;
use crate::comms::transport::{Datagram, DatagramHandler, DatagramSink, IgnoreDatagrams};
use crate::error::{NodeError, RpcError};
use crate::node::lifecycle::{Lifecycle, ShutdownSignal};
use crate::node::Node;
use async_trait::async_trait;
use fxnode::{MarketUpdate, Value};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How often a node re-announces itself to each hub.
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(3);

pub struct DataNodeBuilder {
    name: String,
    address: Address,
    hub_addresses: Vec<Address>,
    announce_interval: Duration,
    methods: MethodTable,
    sink: DatagramSink,
}

impl DataNodeBuilder {
    pub fn hub_address(mut self, address: Address) -> Self {
        self.hub_addresses.push(address);
        self
    }

    pub fn hub_addresses(mut self, addresses: impl IntoIterator<Item = Address>) -> Self {
        self.hub_addresses.extend(addresses);
        self
    }

    pub fn announce_interval(mut self, interval: Duration) -> Self {
        self.announce_interval = interval;
        self
    }

    /// Adds an RPC method on top of the built-in `echo`.
    pub fn method<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(RpcArgs) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        self.methods.register(name, handler);
        self
    }

    pub fn methods(mut self, methods: MethodTable) -> Self {
        self.methods.extend(methods);
        self
    }

    /// Sets the handler for datagrams received on the node's port.
    pub fn handler(mut self, handler: Arc<dyn DatagramHandler>) -> Self {
        self.sink = DatagramSink::Handler(handler);
        self
    }

    /// Queues datagrams received on the node's port, in arrival order.
    pub fn queue(mut self, queue: mpsc::UnboundedSender<Datagram>) -> Self {
        self.sink = DatagramSink::Queue(queue);
        self
    }

    /// Binds the RPC listener, then the datagram socket on the port it got.
    pub async fn bind(self) -> Result<DataNode, NodeError> {
        let rpc = RpcServer::bind(self.name.clone(), &self.address, self.methods).await?;
        let address = rpc.server_address();
        let datagram = DatagramServer::bind(self.name.clone(), &address, self.sink).await?;
        Ok(DataNode {
            lifecycle: Lifecycle::new(self.name.clone()),
            name: self.name,
            rpc,
            datagram,
            hub_addresses: self.hub_addresses,
            announce_interval: self.announce_interval,
            pool: RpcPool::new(),
        })
    }
}

pub struct DataNode {
    name: String,
    rpc: RpcServer,
    datagram: DatagramServer,
    hub_addresses: Vec<Address>,
    announce_interval: Duration,
    pool: RpcPool,
    lifecycle: Lifecycle,
}

impl DataNode {
    /// Starts configuring a node.
    ///
    /// # Arguments
    ///
    /// * `name` - The node's name, announced to hubs and used in log lines.
    /// * `address` - Local bind address for both RPC and datagrams.
    pub fn builder(name: impl Into<String>, address: Address) -> DataNodeBuilder {
        DataNodeBuilder {
            name: name.into(),
            address,
            hub_addresses: Vec::new(),
            announce_interval: DEFAULT_ANNOUNCE_INTERVAL,
            methods: base_methods(),
            sink: DatagramSink::Handler(Arc::new(IgnoreDatagrams)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rpc_address(&self) -> Address {
        self.rpc.server_address()
    }

    pub fn datagram_address(&self) -> Address {
        self.datagram.server_address()
    }

    pub fn hub_addresses(&self) -> &[Address] {
        &self.hub_addresses
    }

    pub fn pool(&self) -> &RpcPool {
        &self.pool
    }

    pub fn sender(&self) -> DatagramSender {
        self.datagram.sender()
    }

    /// Checks out a pooled connection to any peer.
    pub async fn rpc_connection(&self, address: &Address) -> Result<PooledConnection, RpcError> {
        self.pool.connection(address).await
    }

    /// Sends a partial update to every configured hub.
    pub async fn push_data(&self, update: &MarketUpdate) -> Result<(), NodeError> {
        self.push_value(&update.to_value()).await
    }

    /// Sends an arbitrary encoded value to every configured hub.
    ///
    /// # Returns
    ///
    /// * `Err(NodeError::NoHubAddress)` when the node has no hub, before anything is sent.
    /// * The first send error otherwise; the remaining hubs are still tried.
    pub async fn push_value(&self, value: &Value) -> Result<(), NodeError> {
        if self.hub_addresses.is_empty() {
            return Err(NodeError::NoHubAddress(self.name.clone()));
        }
        let payload = codec::pack(value)?;
        let sender = self.datagram.sender();
        let mut first_error = None;
        for hub in &self.hub_addresses {
            if let Err(e) = sender.send_to(&payload, hub).await {
                warn!("{}: push to hub {} failed: {}", self.name, hub, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl Node for DataNode {
    fn server_address(&self) -> Address {
        self.rpc.server_address()
    }

    async fn start(&self) -> Result<(), NodeError> {
        let Some(shutdown) = self.lifecycle.begin_start() else {
            return Ok(());
        };
        if let Err(e) = self.rpc.start().await {
            self.lifecycle.abort_start();
            return Err(e);
        }
        if let Err(e) = self.datagram.start().await {
            self.rpc.stop(None).await;
            self.lifecycle.abort_start();
            return Err(e);
        }
        for hub in &self.hub_addresses {
            self.lifecycle.spawn(announce_loop(
                self.name.clone(),
                hub.clone(),
                self.rpc_address(),
                self.pool.clone(),
                self.announce_interval,
                shutdown.clone(),
            ));
        }
        self.lifecycle.mark_running();
        info!(
            "{}: data node running on {} with {} hub(s)",
            self.name,
            self.rpc_address(),
            self.hub_addresses.len()
        );
        Ok(())
    }

    async fn stop(&self, timeout: Option<Duration>) {
        if !self.lifecycle.begin_stop() {
            return;
        }
        tokio::join!(
            self.lifecycle.stop_workers(timeout),
            self.rpc.stop(timeout),
            self.datagram.stop(timeout),
        );
        self.pool.clear();
        self.lifecycle.finish_stop();
        info!("{}: data node stopped", self.name);
    }

    async fn join(&self, timeout: Option<Duration>) -> bool {
        self.lifecycle.join(timeout).await
    }

    fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}

/// Notifies `hub` of this node every `interval`, forever. Failures are logged and
/// retried on the next tick.
async fn announce_loop(
    name: String,
    hub: Address,
    rpc_address: Address,
    pool: RpcPool,
    interval: Duration,
    mut shutdown: ShutdownSignal,
) {
    loop {
        let args = RpcArgs::new().arg(name.as_str()).arg(rpc_address.clone());
        tokio::select! {
            _ = shutdown.wait() => break,
            sent = pool.notify(&hub, "notify_node", args) => match sent {
                Ok(()) => debug!("{}: announced to hub {}", name, hub),
                Err(e) => warn!("{}: cannot announce to hub {}: {}", name, hub, e),
            },
        }
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
