//! Price records.
//!
//! A `Price` is one bid/ask observation of an instrument made by a named producer.
//! Records are immutable; a newer observation supersedes the old one.

use crate::error::Result;
use crate::model::fields;
use crate::model::time::{serde_utc, utc_now, IntoUtc};
use crate::model::value::{Value, ValueMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PriceFields")]
pub struct Price {
    name: String,
    instrument: String,
    bid: f64,
    ask: f64,
    #[serde(with = "serde_utc")]
    time: DateTime<Utc>,
}

impl Price {
    /// Creates a price observed now.
    pub fn new(name: impl Into<String>, instrument: impl Into<String>, bid: f64, ask: f64) -> Self {
        Self::builder(name, instrument, bid, ask).build()
    }

    /// Starts a builder for the required fields; `time` defaults to now.
    pub fn builder(
        name: impl Into<String>,
        instrument: impl Into<String>,
        bid: f64,
        ask: f64,
    ) -> PriceBuilder {
        PriceBuilder {
            name: name.into(),
            instrument: instrument.into(),
            bid,
            ask,
            time: None,
        }
    }

    /// Returns a builder pre-filled with this record's fields.
    pub fn replace(&self) -> PriceBuilder {
        PriceBuilder {
            name: self.name.clone(),
            instrument: self.instrument.clone(),
            bid: self.bid,
            ask: self.ask,
            time: Some(self.time),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
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

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn to_dict(&self) -> ValueMap {
        ValueMap::from([
            ("name".to_string(), Value::from(self.name.as_str())),
            ("instrument".to_string(), Value::from(self.instrument.as_str())),
            ("bid".to_string(), Value::from(self.bid)),
            ("ask".to_string(), Value::from(self.ask)),
            ("time".to_string(), Value::from(self.time)),
        ])
    }

    pub fn from_dict(map: &ValueMap) -> Result<Self> {
        let mut builder = Self::builder(
            fields::string(fields::required(map, "name")?, "name")?,
            fields::string(fields::required(map, "instrument")?, "instrument")?,
            fields::float(fields::required(map, "bid")?, "bid")?,
            fields::float(fields::required(map, "ask")?, "ask")?,
        );
        if let Some(time) = fields::optional(map, "time") {
            builder = builder.time(fields::time(time, "time")?);
        }
        Ok(builder.build())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Positional wire tuple: `[name, instrument, bid, ask, time]`.
    pub fn to_wire(&self) -> Value {
        Value::List(vec![
            Value::from(self.name.as_str()),
            Value::from(self.instrument.as_str()),
            Value::from(self.bid),
            Value::from(self.ask),
            Value::from(self.time),
        ])
    }

    /// Decodes the positional wire tuple. A missing trailing `time` defaults to now.
    pub fn from_wire(value: &Value) -> Result<Self> {
        let items = fields::tuple(value, "price", 4, 5)?;
        let mut builder = Self::builder(
            fields::string(&items[0], "name")?,
            fields::string(&items[1], "instrument")?,
            fields::float(&items[2], "bid")?,
            fields::float(&items[3], "ask")?,
        );
        if let Some(time) = fields::nth(items, 4) {
            builder = builder.time(fields::time(time, "time")?);
        }
        Ok(builder.build())
    }
}

/// Fills defaults and normalises the timestamp for [`Price`].
#[derive(Debug, Clone)]
pub struct PriceBuilder {
    name: String,
    instrument: String,
    bid: f64,
    ask: f64,
    time: Option<DateTime<Utc>>,
}

impl PriceBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn instrument(mut self, instrument: impl Into<String>) -> Self {
        self.instrument = instrument.into();
        self
    }

    pub fn bid(mut self, bid: f64) -> Self {
        self.bid = bid;
        self
    }

    pub fn ask(mut self, ask: f64) -> Self {
        self.ask = ask;
        self
    }

    pub fn time(mut self, time: impl IntoUtc) -> Self {
        self.time = Some(time.into_utc());
        self
    }

    pub fn build(self) -> Price {
        Price {
            name: self.name,
            instrument: self.instrument,
            bid: self.bid,
            ask: self.ask,
            time: self.time.unwrap_or_else(utc_now),
        }
    }
}

#[derive(Deserialize)]
struct PriceFields {
    name: String,
    instrument: String,
    bid: f64,
    ask: f64,
    #[serde(default, deserialize_with = "serde_utc::option::deserialize")]
    time: Option<DateTime<Utc>>,
}

impl From<PriceFields> for Price {
    fn from(fields: PriceFields) -> Self {
        let builder = Price::builder(fields.name, fields.instrument, fields.bid, fields.ask);
        match fields.time {
            Some(time) => builder.time(time).build(),
            None => builder.build(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::time::parse_datetime;
    use chrono::NaiveDate;

    #[test]
    fn test_defaults_fill_time() {
        let price = Price::new("acc", "USD/JPY", 10.0, 20.0);
        assert_eq!(price.name(), "acc");
        assert_eq!(price.instrument(), "USD/JPY");
        assert_eq!(price.bid(), 10.0);
        assert_eq!(price.ask(), 20.0);
        let age = utc_now() - price.time();
        assert!(age.num_seconds().abs() < 5);
        assert_eq!(price.mid(), 15.0);
    }

    #[test]
    fn test_replace_keeps_other_fields() {
        let price = Price::new("acc", "USD/JPY", 10.0, 20.0);
        let replaced = price.replace().ask(30.0).build();
        assert_eq!(replaced.bid(), 10.0);
        assert_eq!(replaced.ask(), 30.0);
        assert_eq!(replaced.time(), price.time());
    }

    #[test]
    fn test_naive_time_is_utc() {
        let naive = NaiveDate::from_ymd_opt(2018, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let price = Price::builder("a", "EUR/USD", 1.0, 1.1).time(naive).build();
        assert_eq!(price.time(), parse_datetime("2018-01-02T03:04:05Z").unwrap());
    }

    #[test]
    fn test_dict_and_json_round_trip() {
        let price = Price::new("acc", "USD/JPY", 100.25, 100.5);
        assert_eq!(Price::from_dict(&price.to_dict()).unwrap(), price);
        assert_eq!(Price::from_json(&price.to_json().unwrap()).unwrap(), price);
    }

    #[test]
    fn test_from_wire_coerces_numbers() {
        let wire = Value::List(vec![
            Value::from("A"),
            Value::from("USD/JPY"),
            Value::from(100),
            Value::from("101.5"),
            Value::from("2018-01-02T03:04:05.000001Z"),
        ]);
        let price = Price::from_wire(&wire).unwrap();
        assert_eq!(price.bid(), 100.0);
        assert_eq!(price.ask(), 101.5);
        assert_eq!(Price::from_wire(&price.to_wire()).unwrap(), price);
    }

    #[test]
    fn test_from_wire_rejects_short_tuple() {
        let wire = Value::List(vec![Value::from("A"), Value::from("USD/JPY")]);
        assert!(Price::from_wire(&wire).is_err());
    }

    #[test]
    fn test_from_json_without_time_defaults_to_now() {
        let price = Price::from_json(r#"{"name":"a","instrument":"X","bid":1.0,"ask":2.0}"#).unwrap();
        assert!((utc_now() - price.time()).num_seconds().abs() < 5);
    }
}
