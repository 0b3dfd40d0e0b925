//! A dummy implementation of a `DataFeed` data node.
//!
//! This service generates synthetic market data for testing hubs and consoles.
//! Every broker quotes every instrument with its own random walk and reports an
//! account whose equity drifts with the prices.

use anyhow::{bail, Result};
use clap::Parser;
use fxnode::{Account, DataFeed, MarketUpdate, Price};
use fxnode_core::args::{init_logging, CommonArgs};
use fxnode_core::{Address, DataNode, Node};
use log::{info, warn};
use rand::Rng;
use std::time::Duration;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "dummy-feed")]
#[command(about = "Pushes random-walk prices and accounts to one or more hubs")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Milliseconds between two pushes
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Instruments to quote
    #[arg(long, value_delimiter = ',', default_value = "USD/JPY,EUR/USD")]
    instruments: Vec<String>,

    /// Producer names to quote under
    #[arg(long, value_delimiter = ',', default_value = "a,b")]
    brokers: Vec<String>,
}

/// Starting mid price for a few well-known pairs.
fn start_price(instrument: &str) -> f64 {
    match instrument {
        "USD/JPY" => 110.0,
        "EUR/JPY" => 130.0,
        "GBP/JPY" => 150.0,
        "EUR/USD" => 1.1,
        "GBP/USD" => 1.3,
        _ => 1.0,
    }
}

struct Quote {
    instrument: String,
    mid: f64,
}

struct Broker {
    name: String,
    quotes: Vec<Quote>,
    equity: f64,
    position: i64,
}

/// A simple random walk data generator.
struct RandomFeed {
    brokers: Vec<Broker>,
}

impl RandomFeed {
    fn new(brokers: &[String], instruments: &[String]) -> Self {
        let brokers = brokers
            .iter()
            .map(|name| Broker {
                name: name.clone(),
                quotes: instruments
                    .iter()
                    .map(|instrument| Quote {
                        instrument: instrument.clone(),
                        mid: start_price(instrument),
                    })
                    .collect(),
                equity: 1_000_000.0,
                position: 0,
            })
            .collect();
        Self { brokers }
    }
}

impl DataFeed for RandomFeed {
    fn next_update(&mut self) -> Option<MarketUpdate> {
        let mut rng = rand::thread_rng();
        let mut update = MarketUpdate::new();

        for broker in &mut self.brokers {
            let mut pnl = 0.0;
            for quote in &mut broker.quotes {
                // Random walk: +/- 0.05%
                let change = quote.mid * rng.gen_range(-0.0005..0.0005);
                quote.mid = (quote.mid + change).max(0.0001);
                pnl += change * broker.position as f64;

                let half_spread = quote.mid * rng.gen_range(0.00002..0.0001);
                update = update.with_price(Price::new(
                    broker.name.as_str(),
                    quote.instrument.as_str(),
                    quote.mid - half_spread,
                    quote.mid + half_spread,
                ));
            }

            // Occasionally trade a lot in either direction.
            if rng.gen_bool(0.1) {
                broker.position += if rng.gen_bool(0.5) { 1000 } else { -1000 };
            }
            broker.equity += pnl;

            let mut account = Account::builder(broker.name.as_str())
                .equity(broker.equity)
                .profit_loss(pnl)
                .used_margin(broker.position.unsigned_abs() as f64 * 40.0);
            if let Some(quote) = broker.quotes.first() {
                account = account.position(quote.instrument.as_str(), broker.position);
            }
            update = update.with_account(account.build());
        }

        Some(update)
    }
}

/// A feed with nowhere to push is a configuration error, not a runtime one.
fn require_hubs(common: &CommonArgs) -> Result<Vec<Address>> {
    let hubs = common.get_hubs();
    if hubs.is_empty() {
        bail!("{}: no hub address given, pass at least one --hub", common.get_name());
    }
    Ok(hubs)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let name = cli.common.get_name();
    let hubs = require_hubs(&cli.common)?;

    let node = DataNode::builder(name.clone(), cli.common.get_bind())
        .hub_addresses(hubs)
        .bind()
        .await?;
    node.start().await?;

    let mut feed = RandomFeed::new(&cli.brokers, &cli.instruments);
    let mut ticker = tokio::time::interval(Duration::from_millis(cli.interval_ms.max(1)));
    info!(
        "{}: quoting {:?} for {:?} every {}ms",
        name, cli.instruments, cli.brokers, cli.interval_ms
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            _ = ticker.tick() => {
                let Some(update) = feed.next_update() else { continue };
                if let Err(e) = node.push_data(&update).await {
                    warn!("{}: push failed: {}", name, e);
                }
            }
        }
    }

    info!("{}: shutting down", name);
    node.stop(Some(STOP_TIMEOUT)).await;
    Ok(())
}
