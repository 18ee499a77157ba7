//! Vector clocks
//!
//! A clock maps peer identities to counters. Only the owning peer ever
//! increments its own entry; every other entry is copied in through
//! [`VectorClock::merge`]. A key that is absent counts as zero.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Causal relationship of one clock to another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    /// Same counter on every key
    Equal,
    /// `self` dominates `other`
    After,
    /// `other` dominates `self`
    Before,
    /// Each side leads on at least one key
    Concurrent,
}

/// Per-peer counter map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct VectorClock(BTreeMap<String, u64>);

impl VectorClock {
    /// Create an empty clock
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Counter for `peer`, zero when absent
    #[must_use]
    pub fn get(&self, peer: &str) -> u64 {
        self.0.get(peer).copied().unwrap_or(0)
    }

    /// Increment `peer`'s counter and return the new value.
    ///
    /// Callers must only pass their own identity.
    pub fn increment(&mut self, peer: &str) -> u64 {
        let counter = self.0.entry(peer.to_string()).or_insert(0);
        *counter = counter.saturating_add(1);
        *counter
    }

    /// Element-wise maximum of both clocks
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        merged.merge_from(other);
        merged
    }

    /// In-place element-wise maximum
    pub fn merge_from(&mut self, other: &Self) {
        for (peer, &count) in &other.0 {
            let entry = self.0.entry(peer.clone()).or_insert(0);
            if count > *entry {
                *entry = count;
            }
        }
    }

    /// Compare over the union of keys of both clocks
    #[must_use]
    pub fn compare(&self, other: &Self) -> ClockOrdering {
        let mut self_leads = false;
        let mut other_leads = false;

        for peer in self.0.keys().chain(other.0.keys()) {
            let mine = self.get(peer);
            let theirs = other.get(peer);
            if mine > theirs {
                self_leads = true;
            } else if theirs > mine {
                other_leads = true;
            }
            if self_leads && other_leads {
                return ClockOrdering::Concurrent;
            }
        }

        match (self_leads, other_leads) {
            (true, false) => ClockOrdering::After,
            (false, true) => ClockOrdering::Before,
            (false, false) => ClockOrdering::Equal,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// True when no peer has a non-zero counter
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.values().all(|&count| count == 0)
    }

    /// Iterate `(peer, counter)` pairs in peer order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(peer, &count)| (peer.as_str(), count))
    }

    /// Decode a clock from an arbitrary JSON value.
    ///
    /// Anything that is not an object of non-negative integers decodes as
    /// the empty clock.
    #[must_use]
    pub fn from_value_lossy(value: &Value) -> Self {
        match value {
            Value::Null => Self::new(),
            Value::Object(entries) => {
                let mut clock = BTreeMap::new();
                for (peer, count) in entries {
                    let Some(count) = counter_from_value(count) else {
                        tracing::warn!("Malformed vector clock entry for {peer}: {count}");
                        return Self::new();
                    };
                    clock.insert(peer.clone(), count);
                }
                Self(clock)
            }
            other => {
                tracing::warn!("Malformed vector clock: {other}");
                Self::new()
            }
        }
    }

    /// Decode a clock stored as JSON text
    #[must_use]
    pub fn from_json_lossy(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::new();
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::from_value_lossy(&value),
            Err(error) => {
                tracing::warn!("Unparseable vector clock: {error}");
                Self::new()
            }
        }
    }

    /// Encode as JSON text
    #[must_use]
    pub fn to_json(&self) -> String {
        // A map of strings to integers always serializes.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn counter_from_value(value: &Value) -> Option<u64> {
    if let Some(count) = value.as_u64() {
        return Some(count);
    }
    let float = value.as_f64()?;
    if float >= 0.0 && float.fract() == 0.0 && float <= u64::MAX as f64 {
        Some(float as u64)
    } else {
        None
    }
}

impl<'de> Deserialize<'de> for VectorClock {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value_lossy(&value))
    }
}

impl<P: Into<String>> FromIterator<(P, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (P, u64)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(peer, count)| (peer.into(), count))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn clock(entries: &[(&str, u64)]) -> VectorClock {
        entries.iter().map(|&(peer, count)| (peer, count)).collect()
    }

    #[test]
    fn increment_only_touches_own_entry() {
        let mut local = clock(&[("bob", 4)]);
        assert_eq!(local.increment("alice"), 1);
        assert_eq!(local.increment("alice"), 2);
        assert_eq!(local.get("bob"), 4);
    }

    #[test]
    fn merge_takes_elementwise_max() {
        let a = clock(&[("alice", 3), ("bob", 1)]);
        let b = clock(&[("bob", 5), ("carol", 2)]);
        assert_eq!(
            a.merge(&b),
            clock(&[("alice", 3), ("bob", 5), ("carol", 2)])
        );
        assert_eq!(a.merge(&b), b.merge(&a));
    }

    #[test]
    fn merged_clock_dominates_both_inputs() {
        let a = clock(&[("alice", 3), ("bob", 1)]);
        let b = clock(&[("alice", 2), ("bob", 2)]);
        let merged = a.merge(&b);
        assert!(matches!(
            merged.compare(&a),
            ClockOrdering::After | ClockOrdering::Equal
        ));
        assert!(matches!(
            merged.compare(&b),
            ClockOrdering::After | ClockOrdering::Equal
        ));
    }

    #[test]
    fn compare_treats_missing_keys_as_zero() {
        let a = clock(&[("alice", 1), ("bob", 0)]);
        let b = clock(&[("alice", 1)]);
        assert_eq!(a.compare(&b), ClockOrdering::Equal);
        assert_eq!(VectorClock::new().compare(&b), ClockOrdering::Before);
    }

    #[test]
    fn compare_detects_concurrency() {
        let a = clock(&[("alice", 3), ("bob", 1)]);
        let b = clock(&[("alice", 2), ("bob", 2)]);
        assert_eq!(a.compare(&b), ClockOrdering::Concurrent);
        assert_eq!(b.compare(&a), ClockOrdering::Concurrent);
    }

    #[test]
    fn malformed_clock_decodes_as_empty() {
        assert!(VectorClock::from_json_lossy("not json").is_empty());
        assert!(VectorClock::from_json_lossy("[1,2]").is_empty());
        assert!(VectorClock::from_value_lossy(&json!({"alice": -1})).is_empty());
        assert!(VectorClock::from_value_lossy(&json!({"alice": "3"})).is_empty());
        assert!(VectorClock::from_json_lossy("").is_empty());
    }

    #[test]
    fn deserialize_is_lenient() {
        let decoded: VectorClock = serde_json::from_value(json!({"alice": 2, "bob": 1.0})).unwrap();
        assert_eq!(decoded, clock(&[("alice", 2), ("bob", 1)]));

        let decoded: VectorClock = serde_json::from_value(json!("garbage")).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn json_text_roundtrip_keeps_counters() {
        let original = clock(&[("alice", 7), ("bob", 2)]);
        assert_eq!(VectorClock::from_json_lossy(&original.to_json()), original);
    }
}
