//! # fxnode
//!
//! Domain types shared by every fxnode process.
//!
//! ## Modules
//! - `model`: Price/Account/Spread records, the dynamic `Value` tree and timestamp helpers.
//! - `traits`: The `DataFeed` producer contract.
//! - `error`: `RecordError`, raised by record decoding.

pub mod error;
pub mod model;
pub mod traits;

pub use error::RecordError;
pub use model::market_update::{AccountTable, MarketUpdate, PriceTable};
pub use model::time::{datetime_str, parse_datetime, utc_now, IntoUtc};
pub use model::{Account, Price, Spread, Value, ValueMap};
pub use traits::data_feed::DataFeed;

pub mod prelude {
    pub use crate::model::account::Account;
    pub use crate::model::market_update::MarketUpdate;
    pub use crate::model::price::Price;
    pub use crate::model::spread::Spread;
    pub use crate::model::value::{Value, ValueMap};
    pub use crate::traits::data_feed::DataFeed;
}
