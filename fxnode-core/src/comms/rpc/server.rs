//! Stream RPC server.
//!
//! One task per accepted connection. Requests on a connection are answered in the
//! order they arrive; connections do not wait on each other.

use crate::comms::address::Address;
use crate::comms::codec::{self, Unpacker};
use crate::comms::rpc::messages::{MessageType, Reply, Request};
use crate::comms::rpc::methods::MethodTable;
use crate::error::{CodecError, NodeError};
use crate::node::lifecycle::{Lifecycle, ShutdownSignal};
use crate::node::Node;
use async_trait::async_trait;
use fxnode::Value;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

const READ_BUFFER_SIZE: usize = 64 * 1024;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct RpcServer {
    listener: Arc<TcpListener>,
    address: Address,
    methods: Arc<MethodTable>,
    lifecycle: Lifecycle,
}

impl RpcServer {
    /// Binds the listener. Connections are accepted once the server is started.
    ///
    /// # Arguments
    ///
    /// * `name` - Owner name used in log lines.
    /// * `address` - Local address; port `0` picks an ephemeral port.
    /// * `methods` - The callable methods. Fixed for the server's lifetime.
    pub async fn bind(
        name: impl Into<String>,
        address: &Address,
        methods: MethodTable,
    ) -> Result<Self, NodeError> {
        let listener = TcpListener::bind((address.host(), address.port())).await?;
        let local = listener.local_addr()?;
        Ok(Self {
            listener: Arc::new(listener),
            address: Address::new(address.host(), local.port()),
            methods: Arc::new(methods),
            lifecycle: Lifecycle::new(name),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NodeError> {
        Ok(self.listener.local_addr()?)
    }
}

#[async_trait]
impl Node for RpcServer {
    fn server_address(&self) -> Address {
        self.address.clone()
    }

    async fn start(&self) -> Result<(), NodeError> {
        let Some(shutdown) = self.lifecycle.begin_start() else {
            return Ok(());
        };
        self.lifecycle.spawn(accept_loop(
            self.lifecycle.name().to_string(),
            self.listener.clone(),
            self.methods.clone(),
            shutdown,
        ));
        self.lifecycle.mark_running();
        info!("{}: rpc server listening on {}", self.lifecycle.name(), self.address);
        Ok(())
    }

    async fn stop(&self, timeout: Option<Duration>) {
        self.lifecycle.stop(timeout).await;
    }

    async fn join(&self, timeout: Option<Duration>) -> bool {
        self.lifecycle.join(timeout).await
    }

    fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}

async fn accept_loop(
    name: String,
    listener: Arc<TcpListener>,
    methods: Arc<MethodTable>,
    mut shutdown: ShutdownSignal,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("{}: connection from {}", name, peer);
                    connections.spawn(serve_connection(
                        name.clone(),
                        stream,
                        peer,
                        methods.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    warn!("{}: accept failed: {}", name, e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(done) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = done {
                    error!("{}: connection task panicked: {}", name, e);
                }
            }
        }
    }
    connections.shutdown().await;
    debug!("{}: rpc server exited", name);
}

async fn serve_connection(
    name: String,
    mut stream: TcpStream,
    peer: SocketAddr,
    methods: Arc<MethodTable>,
    mut shutdown: ShutdownSignal,
) {
    let mut unpacker = Unpacker::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = tokio::select! {
            _ = shutdown.wait() => return,
            read = stream.read(&mut buf) => read,
        };
        match read {
            Ok(0) => break,
            Ok(n) => unpacker.feed(&buf[..n]),
            Err(e) => {
                debug!("{}: read from {} failed: {}", name, peer, e);
                break;
            }
        }
        loop {
            let message = match unpacker.next_value() {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    warn!("{}: corrupt stream from {}, closing: {}", name, peer, e);
                    return;
                }
            };
            let Some(reply) = dispatch(&name, &methods, message) else {
                continue;
            };
            let bytes = match encode_reply(&reply) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("{}: cannot encode reply {}: {}", name, reply.id(), e);
                    return;
                }
            };
            if let Err(e) = stream.write_all(&bytes).await {
                debug!("{}: write to {} failed: {}", name, peer, e);
                return;
            }
        }
    }
    debug!("{}: connection from {} closed", name, peer);
}

/// Encodes a reply. A response too large for the codec becomes an error reply so
/// the caller is not left waiting.
fn encode_reply(reply: &Reply) -> Result<Vec<u8>, CodecError> {
    codec::pack(&reply.to_value()).or_else(|e| {
        let fallback = Reply::Error {
            id: reply.id(),
            message: format!("cannot encode reply: {}", e),
        };
        codec::pack(&fallback.to_value())
    })
}

/// Runs one decoded message. Returns the reply to send, if any.
fn dispatch(name: &str, methods: &MethodTable, message: Value) -> Option<Reply> {
    let request = match Request::from_value(message) {
        Ok(request) => request,
        Err(e) => {
            warn!("{}: dropping malformed message: {}", name, e);
            return None;
        }
    };
    let result = methods.call(&request.method, request.args);
    match request.kind {
        MessageType::Request => {
            if let Err(e) = &result {
                debug!("{}: {} failed: {}", name, request.method, e);
            }
            Some(Reply::from_result(request.id, result))
        }
        MessageType::Notify => {
            if let Err(e) = result {
                warn!("{}: notification {} failed: {}", name, request.method, e);
            }
            None
        }
    }
}
