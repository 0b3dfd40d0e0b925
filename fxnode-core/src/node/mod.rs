//! Node abstraction: a set of background workers behind one logical address.

pub mod data_node;
pub mod lifecycle;

use crate::comms::address::Address;
use crate::error::NodeError;
use async_trait::async_trait;
use std::time::Duration;

pub use data_node::{DataNode, DataNodeBuilder};
pub use lifecycle::{Lifecycle, NodeState, ShutdownSignal};

/// Common lifecycle of servers, data nodes and hubs.
#[async_trait]
pub trait Node: Send + Sync {
    /// The bound address. Port `0` at construction is replaced by the assigned port.
    fn server_address(&self) -> Address;

    /// Starts the background workers. Starting a node that is not stopped is a
    /// logged no-op.
    async fn start(&self) -> Result<(), NodeError>;

    /// Signals the workers and waits up to `timeout` for them to exit. Safe to call
    /// repeatedly and before `start`.
    async fn stop(&self, timeout: Option<Duration>);

    /// Waits until the node is stopped. Returns `false` if `timeout` elapsed first.
    async fn join(&self, timeout: Option<Duration>) -> bool;

    fn is_running(&self) -> bool;
}
