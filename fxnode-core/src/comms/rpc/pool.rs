//! Per-address pool of idle RPC connections.

use crate::comms::address::Address;
use crate::comms::rpc::client::RpcClient;
use crate::comms::rpc::methods::RpcArgs;
use crate::error::RpcError;
use fxnode::Value;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Hands out exclusive connections and takes healthy ones back.
///
/// Cloning is cheap; clones share the same idle connections.
#[derive(Clone, Default)]
pub struct RpcPool {
    idle: Arc<Mutex<HashMap<Address, Vec<RpcClient>>>>,
}

impl RpcPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks out an idle connection to `address`, or opens a new one.
    pub async fn connection(&self, address: &Address) -> Result<PooledConnection, RpcError> {
        let reused = self.idle.lock().get_mut(address).and_then(Vec::pop);
        let client = match reused {
            Some(client) => client,
            None => {
                debug!("opening rpc connection to {}", address);
                RpcClient::connect(address).await?
            }
        };
        Ok(PooledConnection {
            client: Some(client),
            pool: self.clone(),
        })
    }

    /// One-shot request on a pooled connection.
    pub async fn request(
        &self,
        address: &Address,
        method: &str,
        args: RpcArgs,
    ) -> Result<Value, RpcError> {
        self.connection(address).await?.request(method, args).await
    }

    /// One-shot notification on a pooled connection.
    pub async fn notify(&self, address: &Address, method: &str, args: RpcArgs) -> Result<(), RpcError> {
        self.connection(address).await?.notify(method, args).await
    }

    pub fn idle_count(&self, address: &Address) -> usize {
        self.idle.lock().get(address).map_or(0, Vec::len)
    }

    /// Drops every idle connection.
    pub fn clear(&self) {
        self.idle.lock().clear();
    }

    fn give_back(&self, client: RpcClient) {
        self.idle
            .lock()
            .entry(client.address().clone())
            .or_default()
            .push(client);
    }
}

/// A checked-out connection. Returned to the pool on drop if it is still usable,
/// closed otherwise.
pub struct PooledConnection {
    // Only `None` while dropping.
    client: Option<RpcClient>,
    pool: RpcPool,
}

impl Deref for PooledConnection {
    type Target = RpcClient;

    fn deref(&self) -> &RpcClient {
        self.client.as_ref().expect("pooled connection used after drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut RpcClient {
        self.client.as_mut().expect("pooled connection used after drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if client.is_usable() {
                self.pool.give_back(client);
            } else {
                debug!("discarding rpc connection to {}", client.address());
            }
        }
    }
}
