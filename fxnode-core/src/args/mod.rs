//! Command-line arguments shared by the fxnode binaries.
//!
//! Every process is a named node bound to one `host:port` and, unless it is a
//! standalone hub, knows one or more hubs to push to and announce itself to.

use crate::comms::address::Address;
use clap::Args;
use env_logger::Env;

/// Standard node parameters, flattened into each binary's own `clap` parser.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Name of the node (announced to hubs and used in log lines)
    #[arg(short, long, default_value = "node")]
    name: String,

    /// Local address for the RPC listener and the datagram socket
    #[arg(short, long, default_value = "127.0.0.1:0")]
    bind: Address,

    /// Hub to push data to and announce to (repeatable)
    #[arg(long = "hub")]
    hubs: Vec<Address>,
}

impl CommonArgs {
    pub fn new(name: impl Into<String>, bind: Address, hubs: Vec<Address>) -> Self {
        Self {
            name: name.into(),
            bind,
            hubs,
        }
    }

    /// Returns the name of the node.
    pub fn get_name(&self) -> String {
        self.name.clone()
    }

    /// Returns the local bind address. Port `0` picks an ephemeral port.
    pub fn get_bind(&self) -> Address {
        self.bind.clone()
    }

    /// Returns the configured hub addresses, possibly none.
    pub fn get_hubs(&self) -> Vec<Address> {
        self.hubs.clone()
    }
}

/// Initializes `env_logger`, defaulting to `info` when `RUST_LOG` is unset.
pub fn init_logging() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        common: CommonArgs,
    }

    #[test]
    fn test_defaults() {
        let cli = TestCli::parse_from(["test"]);
        assert_eq!(cli.common.get_name(), "node");
        assert_eq!(cli.common.get_bind(), Address::localhost());
        assert!(cli.common.get_hubs().is_empty());
    }

    #[test]
    fn test_repeated_hubs() {
        let cli = TestCli::parse_from([
            "test",
            "--name",
            "feed-a",
            "--bind",
            "0.0.0.0:7000",
            "--hub",
            "127.0.0.1:5000",
            "--hub",
            "hub.local:5001",
        ]);
        assert_eq!(cli.common.get_name(), "feed-a");
        assert_eq!(cli.common.get_bind(), Address::new("0.0.0.0", 7000));
        assert_eq!(
            cli.common.get_hubs(),
            vec![Address::new("127.0.0.1", 5000), Address::new("hub.local", 5001)]
        );
    }

    #[test]
    fn test_bad_address_is_rejected() {
        assert!(TestCli::try_parse_from(["test", "--hub", "nowhere"]).is_err());
    }
}
