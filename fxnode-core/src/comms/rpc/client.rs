//! Stream RPC client: one connection, one outstanding call at a time.

use crate::comms::address::Address;
use crate::comms::codec::{self, Unpacker};
use crate::comms::rpc::messages::{MessageType, Reply, Request};
use crate::comms::rpc::methods::RpcArgs;
use crate::error::RpcError;
use fxnode::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const READ_BUFFER_SIZE: usize = 64 * 1024;

pub struct RpcClient {
    address: Address,
    stream: TcpStream,
    unpacker: Unpacker,
    next_id: i64,
    in_flight: bool,
    broken: bool,
}

impl RpcClient {
    /// Opens a connection to `address`, trying every resolved socket address.
    pub async fn connect(address: &Address) -> Result<Self, RpcError> {
        let stream = TcpStream::connect((address.host(), address.port())).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            address: address.clone(),
            stream,
            unpacker: Unpacker::new(),
            next_id: 0,
            in_flight: false,
            broken: false,
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// `false` once the connection failed, or when a call was abandoned before its
    /// reply arrived. Such a client must be dropped.
    pub fn is_usable(&self) -> bool {
        !self.broken && !self.in_flight
    }

    /// Calls `method` and waits for its reply.
    ///
    /// # Returns
    ///
    /// * `Ok(Value)` with the method's return value.
    /// * `Err(RpcError::Remote)` carrying the server-side message when the method failed.
    ///   The connection stays usable.
    /// * Any other error leaves the connection unusable.
    pub async fn request(&mut self, method: &str, args: RpcArgs) -> Result<Value, RpcError> {
        self.ensure_usable()?;
        let id = self.allocate_id();
        let bytes = codec::pack(&Request::new(id, MessageType::Request, method, args).to_value())?;

        self.in_flight = true;
        let outcome = self.round_trip(id, &bytes).await;
        self.in_flight = false;
        match outcome {
            Ok(reply) => reply.into_result(),
            Err(e) => {
                self.broken = true;
                Err(e)
            }
        }
    }

    /// Sends a notification. Returns once the message is written; the server's
    /// outcome is never reported back.
    pub async fn notify(&mut self, method: &str, args: RpcArgs) -> Result<(), RpcError> {
        self.ensure_usable()?;
        let id = self.allocate_id();
        let bytes = codec::pack(&Request::new(id, MessageType::Notify, method, args).to_value())?;

        self.in_flight = true;
        let written = self.stream.write_all(&bytes).await;
        self.in_flight = false;
        written.map_err(|e| {
            self.broken = true;
            RpcError::Io(e)
        })
    }

    fn ensure_usable(&self) -> Result<(), RpcError> {
        if self.is_usable() {
            Ok(())
        } else {
            Err(RpcError::Unusable)
        }
    }

    fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id = (self.next_id + 1) & 0x7fff_ffff;
        id
    }

    async fn round_trip(&mut self, id: i64, bytes: &[u8]) -> Result<Reply, RpcError> {
        self.stream.write_all(bytes).await?;
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            if let Some(value) = self.unpacker.next_value()? {
                let reply = Reply::from_value(value)?;
                if reply.id() != id {
                    return Err(RpcError::Protocol(format!(
                        "reply id {} does not match request id {}",
                        reply.id(),
                        id
                    )));
                }
                return Ok(reply);
            }
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(RpcError::ConnectionClosed);
            }
            self.unpacker.feed(&buf[..n]);
        }
    }
}
