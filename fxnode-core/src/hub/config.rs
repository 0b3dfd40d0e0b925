//! Hub runtime options.

use fxnode::{Value, ValueMap};
use log::warn;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The options a hub acts on, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Time before an unrenewed subscriber is dropped.
    pub subscription_ttl: f64,
    /// Time between publish cycles.
    pub publish_interval: f64,
    /// Time before an unrenewed peer node is dropped.
    pub node_ttl: f64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscription_ttl: 10.0,
            publish_interval: 0.3,
            node_ttl: 10.0,
        }
    }
}

impl HubConfig {
    pub fn subscription_ttl(&self) -> Duration {
        seconds(self.subscription_ttl)
    }

    pub fn publish_interval(&self) -> Duration {
        seconds(self.publish_interval)
    }

    pub fn node_ttl(&self) -> Duration {
        seconds(self.node_ttl)
    }

    /// Checks the ranges `update_config` enforces.
    pub fn validate(&self) -> Result<(), String> {
        for (key, value) in [
            ("subscription_ttl", self.subscription_ttl),
            ("publish_interval", self.publish_interval),
            ("node_ttl", self.node_ttl),
        ] {
            if !value.is_finite() {
                return Err(format!("{} must be a finite number of seconds", key));
            }
            if value < 0.0 {
                return Err(format!("{} must not be negative", key));
            }
        }
        if self.publish_interval <= 0.0 {
            return Err("publish_interval must be positive".to_string());
        }
        Ok(())
    }
}

/// Saturates instead of panicking on out-of-range values.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(if value > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

/// [`HubConfig`] plus the unrecognised options callers stored through
/// `update_config`. Those are kept and reported back but have no effect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeConfig {
    pub options: HubConfig,
    pub extra: ValueMap,
}

impl RuntimeConfig {
    pub fn new(options: HubConfig) -> Self {
        Self {
            options,
            extra: ValueMap::new(),
        }
    }

    /// Applies `changes` all at once or not at all.
    pub fn update(&mut self, changes: &ValueMap) -> Result<(), String> {
        let mut options = self.options.clone();
        let mut extra = self.extra.clone();
        for (key, value) in changes {
            let slot = match key.as_str() {
                "subscription_ttl" => &mut options.subscription_ttl,
                "publish_interval" => &mut options.publish_interval,
                "node_ttl" => &mut options.node_ttl,
                _ => {
                    warn!("storing unrecognised hub option '{}'", key);
                    extra.insert(key.clone(), value.clone());
                    continue;
                }
            };
            *slot = match value {
                Value::Int(_) | Value::Float(_) => value.as_f64().unwrap_or(f64::NAN),
                other => return Err(format!("{} must be a number, got {}", key, other)),
            };
        }
        options.validate()?;
        self.options = options;
        self.extra = extra;
        Ok(())
    }

    pub fn to_value(&self) -> Value {
        let mut map = self.extra.clone();
        map.insert("subscription_ttl".into(), Value::from(self.options.subscription_ttl));
        map.insert("publish_interval".into(), Value::from(self.options.publish_interval));
        map.insert("node_ttl".into(), Value::from(self.options.node_ttl));
        Value::Map(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changes(entries: &[(&str, Value)]) -> ValueMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.subscription_ttl, 10.0);
        assert_eq!(config.publish_interval, 0.3);
        assert_eq!(config.node_ttl, 10.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_update_merges_known_and_unknown_keys() {
        let mut config = RuntimeConfig::default();
        config
            .update(&changes(&[
                ("subscription_ttl", Value::from(0.5)),
                ("node_ttl", Value::from(2)),
                ("colour", Value::from("blue")),
            ]))
            .unwrap();
        assert_eq!(config.options.subscription_ttl, 0.5);
        assert_eq!(config.options.node_ttl, 2.0);
        let value = config.to_value();
        assert_eq!(value.get("colour"), Some(&Value::from("blue")));
        assert_eq!(value.get("publish_interval"), Some(&Value::from(0.3)));
    }

    #[test]
    fn test_invalid_update_changes_nothing() {
        let mut config = RuntimeConfig::default();
        let before = config.clone();
        let err = config
            .update(&changes(&[
                ("node_ttl", Value::from(1.0)),
                ("publish_interval", Value::from(0.0)),
                ("other", Value::from(1)),
            ]))
            .unwrap_err();
        assert!(err.contains("publish_interval"));
        assert_eq!(config, before);

        assert!(config.update(&changes(&[("node_ttl", Value::from("soon"))])).is_err());
        assert!(config.update(&changes(&[("node_ttl", Value::from(-1.0))])).is_err());
        assert!(config.update(&changes(&[("node_ttl", Value::from(f64::INFINITY))])).is_err());
        assert_eq!(config, before);
    }
}
