//! Defines the `DataFeed` trait for producers.
//!
//! A data node drives a feed on its own schedule and pushes every update it yields
//! to its hubs. The feed itself does no I/O towards the hub.

use crate::model::market_update::MarketUpdate;

/// A trait for components that produce market updates.
///
/// # Examples
///
/// ```
/// use fxnode::traits::data_feed::DataFeed;
/// use fxnode::model::{MarketUpdate, Price};
///
/// struct Constant;
///
/// impl DataFeed for Constant {
///     fn next_update(&mut self) -> Option<MarketUpdate> {
///         Some(MarketUpdate::new().with_price(Price::new("me", "USD/JPY", 100.0, 100.01)))
///     }
/// }
/// ```
pub trait DataFeed {
    /// Returns the next partial update, or `None` when nothing is ready or the feed
    /// has ended.
    fn next_update(&mut self) -> Option<MarketUpdate>;
}
