//! Conflict detection between a local and a remote vector clock

use serde::{Deserialize, Serialize};

use crate::clock::{ClockOrdering, VectorClock};

/// Which side of a comparison carries the causally newer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Remote,
}

impl Side {
    /// Stable lowercase name used in storage
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }

    /// Parse a name produced by [`Side::as_str`]
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "local" => Some(Self::Local),
            "remote" => Some(Self::Remote),
            _ => None,
        }
    }
}

/// Result of [`detect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub is_conflict: bool,
    /// `None` when the clocks are equal or concurrent
    pub winner: Option<Side>,
}

impl Detection {
    /// True when both clocks describe the same history
    #[must_use]
    pub const fn is_synced(&self) -> bool {
        !self.is_conflict && self.winner.is_none()
    }
}

/// Classify the relationship between two clocks.
///
/// A missing clock should be passed as [`VectorClock::new`]; it then loses to
/// any clock with a non-zero entry, and never silently wins.
#[must_use]
pub fn detect(local: &VectorClock, remote: &VectorClock) -> Detection {
    match local.compare(remote) {
        ClockOrdering::After => Detection {
            is_conflict: false,
            winner: Some(Side::Local),
        },
        ClockOrdering::Before => Detection {
            is_conflict: false,
            winner: Some(Side::Remote),
        },
        ClockOrdering::Equal => Detection {
            is_conflict: false,
            winner: None,
        },
        ClockOrdering::Concurrent => Detection {
            is_conflict: true,
            winner: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn clock(entries: &[(&str, u64)]) -> VectorClock {
        entries.iter().map(|&(peer, count)| (peer, count)).collect()
    }

    #[test]
    fn local_ahead() {
        let result = detect(
            &clock(&[("alice", 3), ("bob", 1)]),
            &clock(&[("alice", 2), ("bob", 1)]),
        );
        assert_eq!(
            result,
            Detection {
                is_conflict: false,
                winner: Some(Side::Local)
            }
        );
    }

    #[test]
    fn remote_ahead() {
        let result = detect(
            &clock(&[("alice", 2), ("bob", 1)]),
            &clock(&[("alice", 3), ("bob", 1)]),
        );
        assert_eq!(
            result,
            Detection {
                is_conflict: false,
                winner: Some(Side::Remote)
            }
        );
    }

    #[test]
    fn concurrent_edits_conflict() {
        let result = detect(
            &clock(&[("alice", 3), ("bob", 1)]),
            &clock(&[("alice", 2), ("bob", 2)]),
        );
        assert_eq!(
            result,
            Detection {
                is_conflict: true,
                winner: None
            }
        );
    }

    #[test]
    fn identical_clocks_are_synced() {
        let result = detect(
            &clock(&[("alice", 2), ("bob", 1)]),
            &clock(&[("alice", 2), ("bob", 1)]),
        );
        assert!(result.is_synced());
    }

    #[test]
    fn disjoint_peers_conflict() {
        let result = detect(&clock(&[("alice", 3)]), &clock(&[("bob", 2)]));
        assert!(result.is_conflict);
        assert_eq!(result.winner, None);
    }

    #[test]
    fn missing_local_clock_defers_to_remote() {
        let result = detect(&VectorClock::new(), &clock(&[("bob", 1)]));
        assert_eq!(result.winner, Some(Side::Remote));
        assert!(detect(&VectorClock::new(), &VectorClock::new()).is_synced());
    }

    #[test]
    fn detection_is_antisymmetric() {
        let samples = [
            clock(&[]),
            clock(&[("alice", 1)]),
            clock(&[("bob", 1)]),
            clock(&[("alice", 2), ("bob", 1)]),
            clock(&[("alice", 1), ("bob", 2)]),
            clock(&[("alice", 2), ("bob", 2), ("carol", 1)]),
        ];

        for a in &samples {
            for b in &samples {
                let forward = detect(a, b);
                let backward = detect(b, a);
                assert_eq!(forward.is_conflict, backward.is_conflict);
                match forward.winner {
                    Some(Side::Local) => assert_eq!(backward.winner, Some(Side::Remote)),
                    Some(Side::Remote) => assert_eq!(backward.winner, Some(Side::Local)),
                    None => assert_eq!(backward.winner, None),
                }
            }
        }
    }
}
