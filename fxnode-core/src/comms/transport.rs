use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One received datagram and its sender.
pub type Datagram = (Vec<u8>, SocketAddr);

/// Receives inbound datagrams from a [`DatagramServer`](crate::comms::datagram::DatagramServer).
#[async_trait]
pub trait DatagramHandler: Send + Sync {
    /// Handles one datagram.
    ///
    /// # Arguments
    ///
    /// * `payload` - The raw datagram bytes.
    /// * `source` - The sender's socket address.
    async fn handle_datagram(&self, payload: Vec<u8>, source: SocketAddr) -> anyhow::Result<()>;
}

/// Discards everything. Used by nodes that only send datagrams.
pub struct IgnoreDatagrams;

#[async_trait]
impl DatagramHandler for IgnoreDatagrams {
    async fn handle_datagram(&self, _payload: Vec<u8>, _source: SocketAddr) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Where a datagram server delivers what it receives.
#[derive(Clone)]
pub enum DatagramSink {
    /// Each datagram is handled in its own task, so a slow call does not hold up
    /// the receive loop. Errors are logged and never stop the server.
    Handler(Arc<dyn DatagramHandler>),
    /// Datagrams are queued in arrival order for a single consumer.
    Queue(mpsc::UnboundedSender<Datagram>),
}

impl From<Arc<dyn DatagramHandler>> for DatagramSink {
    fn from(handler: Arc<dyn DatagramHandler>) -> Self {
        DatagramSink::Handler(handler)
    }
}

impl From<mpsc::UnboundedSender<Datagram>> for DatagramSink {
    fn from(queue: mpsc::UnboundedSender<Datagram>) -> Self {
        DatagramSink::Queue(queue)
    }
}
