//! The hub daemon.
//!
//! Collects the prices and accounts data nodes push, keeps the latest value per
//! key and republishes them to every subscriber until interrupted.

mod settings;

use anyhow::Result;
use clap::Parser;
use fxnode_core::args::{init_logging, CommonArgs};
use fxnode_core::{HubNode, Node};
use log::info;
use std::path::PathBuf;
use std::time::Duration;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "hub")]
#[command(about = "Aggregates pushed market data and republishes it to subscribers")]
#[command(mut_arg("name", |arg| arg.default_value("hub")))]
#[command(mut_arg("bind", |arg| arg.default_value("0.0.0.0:10000")))]
struct Cli {
    /// Name, bind address and upstream hubs to announce to
    #[command(flatten)]
    common: CommonArgs,

    /// Optional configuration file with the hub options
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let name = cli.common.get_name();
    let options = settings::load(cli.config.as_deref())?;
    info!(
        "{}: subscription_ttl={}s publish_interval={}s node_ttl={}s",
        name, options.subscription_ttl, options.publish_interval, options.node_ttl
    );

    let mut builder = HubNode::builder(name.clone(), cli.common.get_bind()).config(options);
    for upstream in cli.common.get_hubs() {
        builder = builder.hub_address(upstream);
    }
    let hub = builder.bind().await?;
    hub.start().await?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("{}: interrupted, shutting down", name);
        }
        _ = hub.join(None) => {}
    }
    hub.stop(Some(STOP_TIMEOUT)).await;
    info!("{}: bye", name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxnode_core::Address;

    #[test]
    fn test_hub_defaults() {
        let cli = Cli::parse_from(["hub"]);
        assert_eq!(cli.common.get_name(), "hub");
        assert_eq!(cli.common.get_bind(), Address::new("0.0.0.0", 10000));
        assert!(cli.common.get_hubs().is_empty());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_shared_flags_and_config() {
        let cli = Cli::parse_from([
            "hub",
            "--name",
            "edge",
            "--bind",
            "127.0.0.1:11000",
            "--hub",
            "127.0.0.1:10000",
            "--config",
            "hub.toml",
        ]);
        assert_eq!(cli.common.get_name(), "edge");
        assert_eq!(cli.common.get_bind(), Address::new("127.0.0.1", 11000));
        assert_eq!(cli.common.get_hubs(), vec![Address::new("127.0.0.1", 10000)]);
        assert_eq!(cli.config, Some(PathBuf::from("hub.toml")));
    }
}
