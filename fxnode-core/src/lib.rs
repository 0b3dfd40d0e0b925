//! # fxnode core
//!
//! Runtime for the fxnode hub and spoke network.
//!
//! ## Modules
//! - `comms`: Wire codec, addresses, the datagram transport and RPC over TCP.
//! - `node`: Start/stop bookkeeping and the `DataNode` that pushes to hubs.
//! - `hub`: The aggregating hub, its registries and runtime configuration.
//! - `args`: Command-line arguments shared by the binaries.
//! - `error`: Error types for codecs, RPC and nodes.

pub mod args;
pub mod comms;
pub mod error;
pub mod hub;
pub mod node;

pub use comms::address::Address;
pub use comms::rpc::{MethodTable, RpcArgs, RpcClient, RpcPool};
pub use error::{CodecError, NodeError, RpcError};
pub use hub::{HubConfig, HubNode};
pub use node::{DataNode, Node};
