//! TTL-based registrations: subscribers receiving publications, and peer nodes
//! listed for discovery.
//!
//! Entries are renewed by their owner re-registering. Nothing is removed on a timer;
//! expired entries are pruned by whoever reads the registry next (the publish cycle
//! for subscribers, `get_nodes` for peers).

use crate::comms::address::Address;
use chrono::{DateTime, Utc};
use fxnode::{Value, ValueMap};
use std::collections::BTreeMap;
use std::time::Duration;

/// `now + ttl`, saturating far in the future.
pub fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subscriber {
    pub address: Address,
    pub expired_at: DateTime<Utc>,
    /// Set until the subscriber's first full snapshot has been sent.
    pub init: bool,
}

impl Subscriber {
    pub fn to_value(&self) -> Value {
        let mut map = ValueMap::new();
        map.insert("address".into(), self.address.to_value());
        map.insert("expired_at".into(), Value::from(self.expired_at));
        map.insert("init".into(), Value::from(self.init));
        Value::Map(map)
    }
}

/// Where one publish cycle sends what.
#[derive(Debug, Default)]
pub struct PublishTargets {
    /// Subscribers owed a full snapshot, by name.
    pub full: Vec<(String, Address)>,
    /// Subscribers that only get the delta.
    pub delta: Vec<(String, Address)>,
    /// Subscribers dropped because their TTL passed.
    pub expired: Vec<(String, Subscriber)>,
}

#[derive(Debug, Default)]
pub struct Subscribers {
    entries: BTreeMap<String, Subscriber>,
}

impl Subscribers {
    /// Registers or renews `name`. Returns `true` for a new registration.
    ///
    /// Renewal moves the expiry and the address but keeps the `init` flag, so a
    /// subscriber still owed its snapshot keeps being owed it.
    pub fn subscribe(&mut self, name: &str, address: Address, expired_at: DateTime<Utc>) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.address = address;
                entry.expired_at = expired_at;
                false
            }
            None => {
                self.entries.insert(
                    name.to_string(),
                    Subscriber {
                        address,
                        expired_at,
                        init: true,
                    },
                );
                true
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Subscriber> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of every registration.
    pub fn snapshot(&self) -> BTreeMap<String, Subscriber> {
        self.entries.clone()
    }

    pub fn to_value(&self) -> Value {
        Value::Map(
            self.entries
                .iter()
                .map(|(name, sub)| (name.clone(), sub.to_value()))
                .collect(),
        )
    }

    /// Drops expired subscribers and sorts the rest by what they are owed.
    pub fn plan_publish(&mut self, now: DateTime<Utc>) -> PublishTargets {
        let mut targets = PublishTargets::default();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, sub)| sub.expired_at < now)
            .map(|(name, _)| name.clone())
            .collect();
        for name in expired {
            if let Some(sub) = self.entries.remove(&name) {
                targets.expired.push((name, sub));
            }
        }
        for (name, sub) in &self.entries {
            let target = (name.clone(), sub.address.clone());
            if sub.init {
                targets.full.push(target);
            } else {
                targets.delta.push(target);
            }
        }
        targets
    }

    /// Records that `name` got its full snapshot at `address`.
    ///
    /// Ignored if the subscriber vanished or moved to another address meanwhile.
    pub fn mark_initialised(&mut self, name: &str, address: &Address) {
        if let Some(sub) = self.entries.get_mut(name) {
            if &sub.address == address {
                sub.init = false;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeerNode {
    pub address: Address,
    pub expired_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct Nodes {
    entries: BTreeMap<String, PeerNode>,
}

impl Nodes {
    /// Registers or renews a peer. Returns `true` for a new registration.
    pub fn notify(&mut self, name: &str, address: Address, expired_at: DateTime<Utc>) -> bool {
        self.entries
            .insert(name.to_string(), PeerNode { address, expired_at })
            .is_none()
    }

    /// Removes expired peers and returns them.
    pub fn prune(&mut self, now: DateTime<Utc>) -> Vec<(String, PeerNode)> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, node)| node.expired_at < now)
            .map(|(name, _)| name.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|name| self.entries.remove(&name).map(|node| (name, node)))
            .collect()
    }

    pub fn addresses(&self) -> BTreeMap<String, Address> {
        self.entries
            .iter()
            .map(|(name, node)| (name.clone(), node.address.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxnode::utc_now;

    #[test]
    fn test_renewal_keeps_init_and_moves_expiry() {
        let now = utc_now();
        let mut subs = Subscribers::default();
        assert!(subs.subscribe("gui", Address::new("h", 1), expiry(now, Duration::from_secs(1))));
        assert!(!subs.subscribe("gui", Address::new("h", 2), expiry(now, Duration::from_secs(5))));
        let sub = subs.get("gui").unwrap();
        assert!(sub.init);
        assert_eq!(sub.address.port(), 2);
        assert_eq!(sub.expired_at, expiry(now, Duration::from_secs(5)));
    }

    #[test]
    fn test_plan_publish_splits_and_expires() {
        let now = utc_now();
        let mut subs = Subscribers::default();
        subs.subscribe("old", Address::new("h", 1), now - chrono::Duration::seconds(1));
        subs.subscribe("new", Address::new("h", 2), expiry(now, Duration::from_secs(10)));
        subs.subscribe("seen", Address::new("h", 3), expiry(now, Duration::from_secs(10)));
        subs.mark_initialised("seen", &Address::new("h", 3));

        let targets = subs.plan_publish(now);
        assert_eq!(targets.expired.len(), 1);
        assert_eq!(targets.expired[0].0, "old");
        assert_eq!(targets.full, vec![("new".to_string(), Address::new("h", 2))]);
        assert_eq!(targets.delta, vec![("seen".to_string(), Address::new("h", 3))]);
        assert!(subs.get("old").is_none());
    }

    #[test]
    fn test_mark_initialised_ignores_moved_subscriber() {
        let now = utc_now();
        let mut subs = Subscribers::default();
        subs.subscribe("gui", Address::new("h", 1), expiry(now, Duration::from_secs(10)));
        subs.subscribe("gui", Address::new("h", 2), expiry(now, Duration::from_secs(10)));
        subs.mark_initialised("gui", &Address::new("h", 1));
        assert!(subs.get("gui").unwrap().init);
    }

    #[test]
    fn test_nodes_prune() {
        let now = utc_now();
        let mut nodes = Nodes::default();
        assert!(nodes.notify("a", Address::new("h", 1), now - chrono::Duration::seconds(1)));
        assert!(nodes.notify("b", Address::new("h", 2), expiry(now, Duration::from_secs(10))));
        assert!(!nodes.notify("b", Address::new("h", 2), expiry(now, Duration::from_secs(10))));
        let pruned = nodes.prune(now);
        assert_eq!(pruned.len(), 1);
        assert_eq!(nodes.addresses().keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_expiry_saturates() {
        let now = utc_now();
        assert_eq!(expiry(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
