use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fxnode::{MarketUpdate, Value, ValueMap};
use fxnode_core::args::init_logging;
use fxnode_core::comms::codec;
use fxnode_core::comms::transport::Datagram;
use fxnode_core::comms::DatagramServer;
use fxnode_core::{Address, Node, RpcArgs, RpcPool};
use log::warn;
use std::time::Duration;
use tokio::sync::mpsc;

const RENEW_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "controller")]
#[command(about = "CLI Controller for fxnode hubs")]
struct Cli {
    /// Hub to talk to
    #[arg(long, default_value = "127.0.0.1:10000")]
    hub: Address,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the nodes announced to the hub
    Nodes,
    /// List the hub's subscribers
    Subscribers,
    /// Show the hub's runtime options
    Config,
    /// Change hub options, e.g. `set publish_interval=0.5`
    Set {
        #[arg(required = true, value_name = "KEY=VALUE")]
        changes: Vec<String>,
    },
    /// Round-trip a value through the hub
    Echo { text: String },
    /// Subscribe and print every update the hub publishes
    Watch {
        /// Subscriber name
        #[arg(short, long, default_value = "controller")]
        name: String,
        /// Local address to receive datagrams on; the hub must be able to reach it
        #[arg(short, long, default_value = "127.0.0.1:0")]
        bind: Address,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let pool = RpcPool::new();

    let response = match cli.command {
        Commands::Nodes => pool.request(&cli.hub, "get_nodes", RpcArgs::new()).await?,
        Commands::Subscribers => {
            pool.request(&cli.hub, "get_subscribers", RpcArgs::new())
                .await?
        }
        Commands::Config => pool.request(&cli.hub, "get_config", RpcArgs::new()).await?,
        Commands::Set { changes } => {
            let mut args = RpcArgs::new();
            for change in &changes {
                let (key, value) = parse_change(change)?;
                args = args.kwarg(key, value);
            }
            pool.request(&cli.hub, "update_config", args).await?
        }
        Commands::Echo { text } => {
            pool.request(&cli.hub, "echo", RpcArgs::new().arg(text))
                .await?
        }
        Commands::Watch { name, bind } => return watch(&pool, &cli.hub, &name, &bind).await,
    };
    print_value(&response)
}

/// Splits `key=value`. Values that read as numbers are sent as numbers.
fn parse_change(change: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = change.split_once('=') else {
        bail!("expected KEY=VALUE, got '{}'", change);
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("missing key in '{}'", change);
    }
    let raw = raw.trim();
    let value = if let Ok(int) = raw.parse::<i64>() {
        Value::from(int)
    } else if let Ok(float) = raw.parse::<f64>() {
        Value::from(float)
    } else {
        Value::from(raw)
    };
    Ok((key.to_string(), value))
}

fn print_value(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value.to_json())?);
    Ok(())
}

async fn watch(pool: &RpcPool, hub: &Address, name: &str, bind: &Address) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Datagram>();
    let server = DatagramServer::bind(name, bind, tx).await?;
    let own = server.server_address();
    server.start().await?;

    let mut renew = tokio::time::interval(RENEW_INTERVAL);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            _ = renew.tick() => {
                let args = RpcArgs::new().arg(name).arg(own.clone());
                if let Err(e) = pool.request(hub, "subscribe", args).await {
                    warn!("cannot subscribe to {}: {}", hub, e);
                }
            }
            received = rx.recv() => {
                let Some((payload, source)) = received else { break };
                match decode(&payload) {
                    Ok(update) => print_value(&update_value(&update))?,
                    Err(e) => warn!("undecodable datagram from {}: {:#}", source, e),
                }
            }
        }
    }
    server.stop(Some(Duration::from_secs(1))).await;
    Ok(())
}

fn decode(payload: &[u8]) -> Result<MarketUpdate> {
    let value = codec::unpack(payload).context("bad encoding")?;
    Ok(MarketUpdate::from_value(&value)?)
}

/// Re-encodes with the records' named fields, easier to read than wire tuples.
fn update_value(update: &MarketUpdate) -> Value {
    let mut map = ValueMap::new();
    if let Some(accounts) = &update.accounts {
        let accounts = accounts
            .iter()
            .map(|(name, account)| (name.clone(), Value::Map(account.to_dict())))
            .collect();
        map.insert("accounts".into(), Value::Map(accounts));
    }
    if let Some(prices) = &update.prices {
        let prices = prices
            .iter()
            .map(|(name, instruments)| {
                let instruments = instruments
                    .iter()
                    .map(|(instrument, price)| (instrument.clone(), Value::Map(price.to_dict())))
                    .collect();
                (name.clone(), Value::Map(instruments))
            })
            .collect();
        map.insert("prices".into(), Value::Map(prices));
    }
    Value::Map(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxnode::Price;

    #[test]
    fn test_parse_change_types() {
        assert_eq!(parse_change("node_ttl=5").unwrap(), ("node_ttl".into(), Value::from(5i64)));
        assert_eq!(
            parse_change("publish_interval = 0.5").unwrap(),
            ("publish_interval".into(), Value::from(0.5))
        );
        assert_eq!(parse_change("label=main").unwrap(), ("label".into(), Value::from("main")));
        assert!(parse_change("novalue").is_err());
        assert!(parse_change("=1").is_err());
    }

    #[test]
    fn test_update_value_uses_named_fields() {
        let update = MarketUpdate::new().with_price(Price::new("a", "USD/JPY", 1.0, 2.0));
        let value = update_value(&update);
        let price = value
            .get("prices")
            .and_then(|p| p.get("a"))
            .and_then(|p| p.get("USD/JPY"))
            .unwrap();
        assert_eq!(price.get("bid"), Some(&Value::from(1.0)));
        assert!(value.get("accounts").is_none());
    }
}
