pub mod account;
pub(crate) mod fields;
pub mod market_update;
pub mod price;
pub mod spread;
pub mod time;
pub mod value;

pub use account::{Account, AccountBuilder, Positions};
pub use market_update::{AccountTable, MarketUpdate, PriceTable};
pub use price::{Price, PriceBuilder};
pub use spread::{Spread, SpreadBuilder};
pub use value::{Value, ValueMap};
