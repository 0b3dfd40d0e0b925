//! Partial market updates, the payload of push datagrams and hub publications.
//!
//! On the wire an update is a map with the optional keys `accounts` and `prices`:
//!
//! ```text
//! {
//!     "accounts": { name: [name, equity, profit_loss, used_margin, positions, time] },
//!     "prices":   { name: { instrument: [name, instrument, bid, ask, time] } },
//! }
//! ```

use crate::error::{RecordError, Result};
use crate::model::account::Account;
use crate::model::price::Price;
use crate::model::value::{Value, ValueMap};
use std::collections::BTreeMap;

/// Latest account per producer name.
pub type AccountTable = BTreeMap<String, Account>;

/// Latest price per producer name and instrument.
pub type PriceTable = BTreeMap<String, BTreeMap<String, Price>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketUpdate {
    pub accounts: Option<AccountTable>,
    pub prices: Option<PriceTable>,
}

impl MarketUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(mut self, accounts: AccountTable) -> Self {
        self.accounts = Some(accounts);
        self
    }

    pub fn with_prices(mut self, prices: PriceTable) -> Self {
        self.prices = Some(prices);
        self
    }

    /// Adds one account, keyed by its name.
    pub fn with_account(mut self, account: Account) -> Self {
        self.accounts
            .get_or_insert_with(AccountTable::new)
            .insert(account.name().to_string(), account);
        self
    }

    /// Adds one price, keyed by its name and instrument.
    pub fn with_price(mut self, price: Price) -> Self {
        self.prices
            .get_or_insert_with(PriceTable::new)
            .entry(price.name().to_string())
            .or_default()
            .insert(price.instrument().to_string(), price);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.as_ref().is_none_or(BTreeMap::is_empty)
            && self.prices.as_ref().is_none_or(BTreeMap::is_empty)
    }

    pub fn to_value(&self) -> Value {
        let mut map = ValueMap::new();
        if let Some(accounts) = &self.accounts {
            map.insert("accounts".to_string(), accounts_to_value(accounts));
        }
        if let Some(prices) = &self.prices {
            map.insert("prices".to_string(), prices_to_value(prices));
        }
        Value::Map(map)
    }

    /// Decodes a push datagram. Any malformed entry fails the whole update; unknown
    /// top-level keys are ignored.
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_map()
            .ok_or_else(|| RecordError::malformed("update", format!("expected map, got {}", value)))?;
        let mut update = Self::new();
        if let Some(accounts) = map.get("accounts").filter(|v| !v.is_nil()) {
            update.accounts = Some(accounts_from_value(accounts)?);
        }
        if let Some(prices) = map.get("prices").filter(|v| !v.is_nil()) {
            update.prices = Some(prices_from_value(prices)?);
        }
        Ok(update)
    }
}

pub fn accounts_to_value(accounts: &AccountTable) -> Value {
    Value::Map(
        accounts
            .iter()
            .map(|(name, account)| (name.clone(), account.to_wire()))
            .collect(),
    )
}

pub fn prices_to_value(prices: &PriceTable) -> Value {
    Value::Map(
        prices
            .iter()
            .map(|(name, instruments)| {
                let inner = instruments
                    .iter()
                    .map(|(instrument, price)| (instrument.clone(), price.to_wire()))
                    .collect();
                (name.clone(), Value::Map(inner))
            })
            .collect(),
    )
}

fn table<'a>(value: &'a Value, record: &'static str) -> Result<&'a ValueMap> {
    value
        .as_map()
        .ok_or_else(|| RecordError::malformed(record, format!("expected map, got {}", value)))
}

fn accounts_from_value(value: &Value) -> Result<AccountTable> {
    table(value, "accounts")?
        .iter()
        .map(|(name, tuple)| Ok((name.clone(), Account::from_wire(tuple)?)))
        .collect()
}

fn prices_from_value(value: &Value) -> Result<PriceTable> {
    table(value, "prices")?
        .iter()
        .map(|(name, instruments)| {
            let inner = table(instruments, "prices")?
                .iter()
                .map(|(instrument, tuple)| Ok((instrument.clone(), Price::from_wire(tuple)?)))
                .collect::<Result<BTreeMap<_, _>>>()?;
            Ok((name.clone(), inner))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_layout_is_positional() {
        let price = Price::new("A", "USD/JPY", 100.0, 101.0);
        let update = MarketUpdate::new().with_price(price.clone());
        let value = update.to_value();
        let tuple = value
            .get("prices")
            .and_then(|p| p.get("A"))
            .and_then(|p| p.get("USD/JPY"))
            .and_then(Value::as_list)
            .unwrap();
        assert_eq!(tuple[0], Value::from("A"));
        assert_eq!(tuple[1], Value::from("USD/JPY"));
        assert_eq!(tuple[2], Value::from(100.0));
        assert_eq!(tuple[3], Value::from(101.0));
        assert_eq!(tuple[4], Value::from(price.time()));
        assert!(value.get("accounts").is_none());
    }

    #[test]
    fn test_from_value_round_trip() {
        let update = MarketUpdate::new()
            .with_account(Account::builder("A").equity(10.0).build())
            .with_price(Price::new("A", "EUR/USD", 1.1, 1.2));
        assert_eq!(MarketUpdate::from_value(&update.to_value()).unwrap(), update);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let mut map = ValueMap::new();
        map.insert("spreads".into(), Value::from(1));
        let update = MarketUpdate::from_value(&Value::Map(map)).unwrap();
        assert!(update.is_empty());
        assert!(update.accounts.is_none());
    }

    #[test]
    fn test_one_bad_entry_fails_the_update() {
        let good = Price::new("A", "EUR/USD", 1.1, 1.2).to_wire();
        let mut instruments = ValueMap::new();
        instruments.insert("EUR/USD".into(), good);
        instruments.insert("USD/JPY".into(), Value::List(vec![Value::from("A")]));
        let mut prices = ValueMap::new();
        prices.insert("A".into(), Value::Map(instruments));
        let mut map = ValueMap::new();
        map.insert("prices".into(), Value::Map(prices));
        assert!(MarketUpdate::from_value(&Value::Map(map)).is_err());
    }
}
