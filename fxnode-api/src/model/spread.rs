//! Cross-producer spreads.
//!
//! A `Spread` is computed by consumers from the hub's price table; it is not part of
//! the push datagram format but shares the record conventions.

use crate::error::Result;
use crate::model::fields;
use crate::model::time::{serde_utc, utc_now, IntoUtc};
use crate::model::value::{Value, ValueMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SpreadFields")]
pub struct Spread {
    pair: (String, String),
    instrument: String,
    bid: f64,
    ask: f64,
    sp: f64,
    #[serde(with = "serde_utc")]
    time: DateTime<Utc>,
}

impl Spread {
    pub fn new(
        pair: (impl Into<String>, impl Into<String>),
        instrument: impl Into<String>,
        bid: f64,
        ask: f64,
    ) -> Self {
        Self::builder(pair, instrument, bid, ask).build()
    }

    /// Starts a builder; `sp` defaults to `ask - bid` and `time` to now.
    pub fn builder(
        pair: (impl Into<String>, impl Into<String>),
        instrument: impl Into<String>,
        bid: f64,
        ask: f64,
    ) -> SpreadBuilder {
        SpreadBuilder {
            pair: (pair.0.into(), pair.1.into()),
            instrument: instrument.into(),
            bid,
            ask,
            sp: None,
            time: None,
        }
    }

    /// Returns a builder pre-filled with this record's fields, `sp` included.
    pub fn replace(&self) -> SpreadBuilder {
        SpreadBuilder {
            pair: self.pair.clone(),
            instrument: self.instrument.clone(),
            bid: self.bid,
            ask: self.ask,
            sp: Some(self.sp),
            time: Some(self.time),
        }
    }

    pub fn pair(&self) -> (&str, &str) {
        (&self.pair.0, &self.pair.1)
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn bid(&self) -> f64 {
        self.bid
    }

    pub fn ask(&self) -> f64 {
        self.ask
    }

    pub fn sp(&self) -> f64 {
        self.sp
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    fn pair_value(&self) -> Value {
        Value::List(vec![
            Value::from(self.pair.0.as_str()),
            Value::from(self.pair.1.as_str()),
        ])
    }

    pub fn to_dict(&self) -> ValueMap {
        ValueMap::from([
            ("pair".to_string(), self.pair_value()),
            ("instrument".to_string(), Value::from(self.instrument.as_str())),
            ("bid".to_string(), Value::from(self.bid)),
            ("ask".to_string(), Value::from(self.ask)),
            ("sp".to_string(), Value::from(self.sp)),
            ("time".to_string(), Value::from(self.time)),
        ])
    }

    pub fn from_dict(map: &ValueMap) -> Result<Self> {
        let mut builder = Self::builder(
            pair_from_value(fields::required(map, "pair")?)?,
            fields::string(fields::required(map, "instrument")?, "instrument")?,
            fields::float(fields::required(map, "bid")?, "bid")?,
            fields::float(fields::required(map, "ask")?, "ask")?,
        );
        if let Some(v) = fields::optional(map, "sp") {
            builder = builder.sp(fields::float(v, "sp")?);
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

    /// Positional tuple: `[[name_a, name_b], instrument, bid, ask, sp, time]`.
    pub fn to_wire(&self) -> Value {
        Value::List(vec![
            self.pair_value(),
            Value::from(self.instrument.as_str()),
            Value::from(self.bid),
            Value::from(self.ask),
            Value::from(self.sp),
            Value::from(self.time),
        ])
    }

    pub fn from_wire(value: &Value) -> Result<Self> {
        let items = fields::tuple(value, "spread", 4, 6)?;
        let mut builder = Self::builder(
            pair_from_value(&items[0])?,
            fields::string(&items[1], "instrument")?,
            fields::float(&items[2], "bid")?,
            fields::float(&items[3], "ask")?,
        );
        if let Some(v) = fields::nth(items, 4) {
            builder = builder.sp(fields::float(v, "sp")?);
        }
        if let Some(v) = fields::nth(items, 5) {
            builder = builder.time(fields::time(v, "time")?);
        }
        Ok(builder.build())
    }
}

fn pair_from_value(value: &Value) -> Result<(String, String)> {
    match value.as_list() {
        Some([a, b]) => Ok((fields::string(a, "pair")?, fields::string(b, "pair")?)),
        _ => Err(crate::error::RecordError::invalid(
            "pair",
            format!("expected two names, got {}", value),
        )),
    }
}

#[derive(Debug, Clone)]
pub struct SpreadBuilder {
    pair: (String, String),
    instrument: String,
    bid: f64,
    ask: f64,
    sp: Option<f64>,
    time: Option<DateTime<Utc>>,
}

impl SpreadBuilder {
    pub fn bid(mut self, bid: f64) -> Self {
        self.bid = bid;
        self
    }

    pub fn ask(mut self, ask: f64) -> Self {
        self.ask = ask;
        self
    }

    pub fn sp(mut self, sp: f64) -> Self {
        self.sp = Some(sp);
        self
    }

    pub fn time(mut self, time: impl IntoUtc) -> Self {
        self.time = Some(time.into_utc());
        self
    }

    pub fn build(self) -> Spread {
        Spread {
            sp: self.sp.unwrap_or(self.ask - self.bid),
            pair: self.pair,
            instrument: self.instrument,
            bid: self.bid,
            ask: self.ask,
            time: self.time.unwrap_or_else(utc_now),
        }
    }
}

#[derive(Deserialize)]
struct SpreadFields {
    pair: (String, String),
    instrument: String,
    bid: f64,
    ask: f64,
    #[serde(default)]
    sp: Option<f64>,
    #[serde(default, deserialize_with = "serde_utc::option::deserialize")]
    time: Option<DateTime<Utc>>,
}

impl From<SpreadFields> for Spread {
    fn from(fields: SpreadFields) -> Self {
        let mut builder = Spread::builder(fields.pair, fields.instrument, fields.bid, fields.ask);
        if let Some(sp) = fields.sp {
            builder = builder.sp(sp);
        }
        if let Some(time) = fields.time {
            builder = builder.time(time);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sp_defaults_to_width() {
        let spread = Spread::new(("A", "B"), "USD/JPY", 10.0, 20.0);
        assert_eq!(spread.pair(), ("A", "B"));
        assert_eq!(spread.instrument(), "USD/JPY");
        assert_eq!(spread.sp(), 10.0);
    }

    #[test]
    fn test_explicit_sp_wins() {
        let spread = Spread::builder(("A", "B"), "USD/JPY", 10.0, 20.0)
            .sp(0.5)
            .build();
        assert_eq!(spread.sp(), 0.5);
    }

    #[test]
    fn test_replace_keeps_sp() {
        let spread = Spread::new(("A", "B"), "USD/JPY", 10.0, 20.0);
        let replaced = spread.replace().ask(30.0).build();
        assert_eq!(replaced.bid(), 10.0);
        assert_eq!(replaced.ask(), 30.0);
        assert_eq!(replaced.sp(), 10.0);
    }

    #[test]
    fn test_round_trips() {
        let spread = Spread::new(("A", "B"), "EUR/USD", 1.1001, 1.1003);
        assert_eq!(Spread::from_json(&spread.to_json().unwrap()).unwrap(), spread);
        assert_eq!(Spread::from_dict(&spread.to_dict()).unwrap(), spread);
        assert_eq!(Spread::from_wire(&spread.to_wire()).unwrap(), spread);
    }

    #[test]
    fn test_json_without_sp_computes_it() {
        let spread =
            Spread::from_json(r#"{"pair":["A","B"],"instrument":"X","bid":1.0,"ask":4.0}"#)
                .unwrap();
        assert_eq!(spread.sp(), 3.0);
    }
}
