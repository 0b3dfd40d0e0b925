//! Best-effort datagram transport over UDP.

use crate::comms::address::Address;
use crate::comms::codec;
use crate::comms::transport::DatagramSink;
use crate::error::NodeError;
use crate::node::lifecycle::{Lifecycle, ShutdownSignal};
use crate::node::Node;
use async_trait::async_trait;
use fxnode::Value;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;

/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Cloneable send half of a bound UDP socket.
#[derive(Clone)]
pub struct DatagramSender {
    socket: Arc<UdpSocket>,
}

impl DatagramSender {
    /// Sends raw bytes to `address`, resolving the host name first.
    pub async fn send_to(&self, payload: &[u8], address: &Address) -> Result<(), NodeError> {
        let ipv6 = self.socket.local_addr()?.is_ipv6();
        let target = address.resolve(ipv6).await?;
        self.socket.send_to(payload, target).await?;
        Ok(())
    }

    /// Encodes `value` and sends it as one datagram.
    pub async fn send_value(&self, value: &Value, address: &Address) -> Result<(), NodeError> {
        let payload = codec::pack(value)?;
        self.send_to(&payload, address).await
    }
}

/// UDP listener delivering every datagram to a [`DatagramSink`].
pub struct DatagramServer {
    socket: Arc<UdpSocket>,
    address: Address,
    sink: DatagramSink,
    lifecycle: Lifecycle,
}

impl DatagramServer {
    /// Binds the socket. Nothing is received until [`Node::start`].
    ///
    /// # Arguments
    ///
    /// * `name` - Owner name used in log lines.
    /// * `address` - Local address; port `0` picks an ephemeral port.
    /// * `sink` - A handler called once per datagram, or a queue.
    pub async fn bind(
        name: impl Into<String>,
        address: &Address,
        sink: impl Into<DatagramSink>,
    ) -> Result<Self, NodeError> {
        let socket = UdpSocket::bind((address.host(), address.port())).await?;
        let local = socket.local_addr()?;
        Ok(Self {
            socket: Arc::new(socket),
            address: Address::new(address.host(), local.port()),
            sink: sink.into(),
            lifecycle: Lifecycle::new(name),
        })
    }

    pub fn sender(&self) -> DatagramSender {
        DatagramSender {
            socket: self.socket.clone(),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NodeError> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn send_to(&self, payload: &[u8], address: &Address) -> Result<(), NodeError> {
        self.sender().send_to(payload, address).await
    }
}

#[async_trait]
impl Node for DatagramServer {
    fn server_address(&self) -> Address {
        self.address.clone()
    }

    async fn start(&self) -> Result<(), NodeError> {
        let Some(shutdown) = self.lifecycle.begin_start() else {
            return Ok(());
        };
        self.lifecycle.spawn(serve(
            self.lifecycle.name().to_string(),
            self.socket.clone(),
            self.sink.clone(),
            shutdown,
        ));
        self.lifecycle.mark_running();
        info!(
            "{}: datagram server listening on {}",
            self.lifecycle.name(),
            self.address
        );
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

async fn serve(
    name: String,
    socket: Arc<UdpSocket>,
    sink: DatagramSink,
    mut shutdown: ShutdownSignal,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut in_flight = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, source)) => {
                    let payload = buf[..len].to_vec();
                    match &sink {
                        DatagramSink::Handler(handler) => {
                            let handler = handler.clone();
                            in_flight.spawn(async move {
                                (source, handler.handle_datagram(payload, source).await)
                            });
                        }
                        DatagramSink::Queue(queue) => {
                            if queue.send((payload, source)).is_err() {
                                warn!("{}: datagram queue closed, dropping datagram from {}", name, source);
                            }
                        }
                    }
                }
                // ICMP port-unreachable from an earlier send surfaces here on some
                // platforms; the socket itself is still fine.
                Err(e) => warn!("{}: datagram receive failed: {}", name, e),
            },
            Some(done) = in_flight.join_next(), if !in_flight.is_empty() => match done {
                Ok((_, Ok(()))) => {}
                Ok((source, Err(e))) => {
                    error!("{}: datagram from {} failed: {:#}", name, source, e)
                }
                Err(e) => error!("{}: datagram handler panicked: {}", name, e),
            },
        }
    }
    in_flight.shutdown().await;
    debug!("{}: datagram server exited", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::transport::{Datagram, DatagramHandler};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct Forward(mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>);

    #[async_trait]
    impl DatagramHandler for Forward {
        async fn handle_datagram(&self, payload: Vec<u8>, source: SocketAddr) -> anyhow::Result<()> {
            if payload == b"fail" {
                anyhow::bail!("rejected");
            }
            self.0.send((payload, source))?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_handler_errors_do_not_stop_the_loop() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler: Arc<dyn DatagramHandler> = Arc::new(Forward(tx));
        let server = DatagramServer::bind("test", &Address::localhost(), handler)
            .await
            .unwrap();
        assert_ne!(server.server_address().port(), 0);
        server.start().await.unwrap();
        assert!(server.is_running());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = server.local_addr().unwrap();
        client.send_to(b"fail", target).await.unwrap();
        client.send_to(b"hello", target).await.unwrap();

        let (payload, source) = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, b"hello");
        assert_eq!(source, client.local_addr().unwrap());

        server.stop(Some(Duration::from_secs(1))).await;
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_queue_keeps_arrival_order() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Datagram>();
        let server = DatagramServer::bind("test", &Address::localhost(), tx)
            .await
            .unwrap();
        server.start().await.unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = server.local_addr().unwrap();
        for i in 0..20u8 {
            client.send_to(&[i], target).await.unwrap();
        }
        for i in 0..20u8 {
            let (payload, _) = timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(payload, vec![i]);
        }
        server.stop(Some(Duration::from_secs(1))).await;
    }
}
