pub mod address;
pub mod codec;
pub mod datagram;
pub mod rpc;
pub mod transport;

pub use address::Address;
pub use codec::{pack, unpack, Unpacker};
pub use datagram::{DatagramSender, DatagramServer};
pub use transport::DatagramHandler;
