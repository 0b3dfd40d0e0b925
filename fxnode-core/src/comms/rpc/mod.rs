//! Request/response and fire-and-forget calls over TCP.

pub mod client;
pub mod messages;
pub mod methods;
pub mod pool;
pub mod server;

pub use client::RpcClient;
pub use messages::{MessageType, Reply, Request};
pub use methods::{base_methods, MethodHandler, MethodTable, RpcArgs};
pub use pool::{PooledConnection, RpcPool};
pub use server::RpcServer;
