//! The hub's aggregate tables and their delta buffers.

use fxnode::{Account, AccountTable, MarketUpdate, Price, PriceTable};

/// Latest account and price per key, plus what changed since the last publish.
///
/// Updates overwrite by arrival order; embedded timestamps are not compared.
#[derive(Debug, Default)]
pub struct Tables {
    accounts: AccountTable,
    prices: PriceTable,
    new_accounts: AccountTable,
    new_prices: PriceTable,
}

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one decoded push datagram.
    pub fn apply(&mut self, update: MarketUpdate) {
        for (name, account) in update.accounts.unwrap_or_default() {
            self.new_accounts.insert(name.clone(), account.clone());
            self.accounts.insert(name, account);
        }
        for (name, instruments) in update.prices.unwrap_or_default() {
            for (instrument, price) in instruments {
                self.new_prices
                    .entry(name.clone())
                    .or_default()
                    .insert(instrument.clone(), price.clone());
                self.prices
                    .entry(name.clone())
                    .or_default()
                    .insert(instrument, price);
            }
        }
    }

    /// The full tables, with both keys present even when empty.
    pub fn snapshot(&self) -> MarketUpdate {
        MarketUpdate::new()
            .with_accounts(self.accounts.clone())
            .with_prices(self.prices.clone())
    }

    /// Hands out the delta buffers and clears them.
    pub fn take_delta(&mut self) -> MarketUpdate {
        MarketUpdate::new()
            .with_accounts(std::mem::take(&mut self.new_accounts))
            .with_prices(std::mem::take(&mut self.new_prices))
    }

    pub fn has_delta(&self) -> bool {
        !self.new_accounts.is_empty() || !self.new_prices.is_empty()
    }

    pub fn accounts(&self) -> &AccountTable {
        &self.accounts
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    pub fn account(&self, name: &str) -> Option<&Account> {
        self.accounts.get(name)
    }

    pub fn price(&self, name: &str, instrument: &str) -> Option<&Price> {
        self.prices.get(name).and_then(|p| p.get(instrument))
    }
}
