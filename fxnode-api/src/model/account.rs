//! Account snapshots reported by producers.

use crate::error::Result;
use crate::model::fields;
use crate::model::time::{serde_utc, utc_now, IntoUtc};
use crate::model::value::{Value, ValueMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Signed position quantity per instrument.
pub type Positions = BTreeMap<String, i64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "AccountFields")]
pub struct Account {
    name: String,
    equity: f64,
    profit_loss: f64,
    used_margin: f64,
    positions: Positions,
    #[serde(with = "serde_utc")]
    time: DateTime<Utc>,
}

impl Account {
    /// Creates an empty account snapshot: zero equity, no positions, taken now.
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder(name).build()
    }

    pub fn builder(name: impl Into<String>) -> AccountBuilder {
        AccountBuilder {
            name: name.into(),
            equity: 0.0,
            profit_loss: 0.0,
            used_margin: 0.0,
            positions: Positions::new(),
            time: None,
        }
    }

    /// Returns a builder pre-filled with this record's fields.
    pub fn replace(&self) -> AccountBuilder {
        AccountBuilder {
            name: self.name.clone(),
            equity: self.equity,
            profit_loss: self.profit_loss,
            used_margin: self.used_margin,
            positions: self.positions.clone(),
            time: Some(self.time),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn profit_loss(&self) -> f64 {
        self.profit_loss
    }

    pub fn used_margin(&self) -> f64 {
        self.used_margin
    }

    pub fn positions(&self) -> &Positions {
        &self.positions
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// Cash balance, `equity - profit_loss`.
    pub fn balance(&self) -> f64 {
        self.equity - self.profit_loss
    }

    /// Margin still free, `equity - used_margin`.
    pub fn available_margin(&self) -> f64 {
        self.equity - self.used_margin
    }

    pub fn to_dict(&self) -> ValueMap {
        ValueMap::from([
            ("name".to_string(), Value::from(self.name.as_str())),
            ("equity".to_string(), Value::from(self.equity)),
            ("profit_loss".to_string(), Value::from(self.profit_loss)),
            ("used_margin".to_string(), Value::from(self.used_margin)),
            ("positions".to_string(), positions_to_value(&self.positions)),
            ("time".to_string(), Value::from(self.time)),
        ])
    }

    pub fn from_dict(map: &ValueMap) -> Result<Self> {
        let mut builder =
            Self::builder(fields::string(fields::required(map, "name")?, "name")?);
        if let Some(v) = fields::optional(map, "equity") {
            builder = builder.equity(fields::float(v, "equity")?);
        }
        if let Some(v) = fields::optional(map, "profit_loss") {
            builder = builder.profit_loss(fields::float(v, "profit_loss")?);
        }
        if let Some(v) = fields::optional(map, "used_margin") {
            builder = builder.used_margin(fields::float(v, "used_margin")?);
        }
        if let Some(v) = fields::optional(map, "positions") {
            builder = builder.positions(positions_from_value(v)?);
        }
        if let Some(v) = fields::optional(map, "time") {
            builder = builder.time(fields::time(v, "time")?);
        }
        Ok(builder.build())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Positional wire tuple: `[name, equity, profit_loss, used_margin, positions, time]`.
    pub fn to_wire(&self) -> Value {
        Value::List(vec![
            Value::from(self.name.as_str()),
            Value::from(self.equity),
            Value::from(self.profit_loss),
            Value::from(self.used_margin),
            positions_to_value(&self.positions),
            Value::from(self.time),
        ])
    }

    /// Decodes the positional wire tuple. Trailing items may be omitted and take
    /// their defaults.
    pub fn from_wire(value: &Value) -> Result<Self> {
        let items = fields::tuple(value, "account", 1, 6)?;
        let mut builder = Self::builder(fields::string(&items[0], "name")?);
        if let Some(v) = fields::nth(items, 1) {
            builder = builder.equity(fields::float(v, "equity")?);
        }
        if let Some(v) = fields::nth(items, 2) {
            builder = builder.profit_loss(fields::float(v, "profit_loss")?);
        }
        if let Some(v) = fields::nth(items, 3) {
            builder = builder.used_margin(fields::float(v, "used_margin")?);
        }
        if let Some(v) = fields::nth(items, 4) {
            builder = builder.positions(positions_from_value(v)?);
        }
        if let Some(v) = fields::nth(items, 5) {
            builder = builder.time(fields::time(v, "time")?);
        }
        Ok(builder.build())
    }
}

fn positions_to_value(positions: &Positions) -> Value {
    Value::Map(
        positions
            .iter()
            .map(|(instrument, qty)| (instrument.clone(), Value::Int(*qty)))
            .collect(),
    )
}

fn positions_from_value(value: &Value) -> Result<Positions> {
    let map = value.as_map().ok_or_else(|| {
        crate::error::RecordError::invalid("positions", format!("expected map, got {}", value))
    })?;
    map.iter()
        .map(|(instrument, qty)| Ok((instrument.clone(), fields::integer(qty, "positions")?)))
        .collect()
}

#[derive(Debug, Clone)]
pub struct AccountBuilder {
    name: String,
    equity: f64,
    profit_loss: f64,
    used_margin: f64,
    positions: Positions,
    time: Option<DateTime<Utc>>,
}

impl AccountBuilder {
    pub fn equity(mut self, equity: f64) -> Self {
        self.equity = equity;
        self
    }

    pub fn profit_loss(mut self, profit_loss: f64) -> Self {
        self.profit_loss = profit_loss;
        self
    }

    pub fn used_margin(mut self, used_margin: f64) -> Self {
        self.used_margin = used_margin;
        self
    }

    pub fn positions(mut self, positions: Positions) -> Self {
        self.positions = positions;
        self
    }

    /// Sets a single position, keeping the others.
    pub fn position(mut self, instrument: impl Into<String>, quantity: i64) -> Self {
        self.positions.insert(instrument.into(), quantity);
        self
    }

    pub fn time(mut self, time: impl IntoUtc) -> Self {
        self.time = Some(time.into_utc());
        self
    }

    pub fn build(self) -> Account {
        Account {
            name: self.name,
            equity: self.equity,
            profit_loss: self.profit_loss,
            used_margin: self.used_margin,
            positions: self.positions,
            time: self.time.unwrap_or_else(utc_now),
        }
    }
}

#[derive(Deserialize)]
struct AccountFields {
    name: String,
    #[serde(default)]
    equity: f64,
    #[serde(default)]
    profit_loss: f64,
    #[serde(default)]
    used_margin: f64,
    #[serde(default)]
    positions: Positions,
    #[serde(default, deserialize_with = "serde_utc::option::deserialize")]
    time: Option<DateTime<Utc>>,
}

impl From<AccountFields> for Account {
    fn from(fields: AccountFields) -> Self {
        let builder = Account::builder(fields.name)
            .equity(fields.equity)
            .profit_loss(fields.profit_loss)
            .used_margin(fields.used_margin)
            .positions(fields.positions);
        match fields.time {
            Some(time) => builder.time(time).build(),
            None => builder.build(),
        }
    }
}
