//! Logical timestamps for ordering operations and identifying elements.
//!
//! A `TimeTicket` is a totally ordered logical timestamp combining a
//! Lamport value, the issuing actor, and a per-change delimiter. Tickets
//! double as identities: every element is addressed by the ticket of the
//! operation that created it.

use crate::actor::ActorId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A totally ordered logical timestamp.
///
/// Ordering compares the Lamport value first, then the actor (by its
/// 128-bit value), then the delimiter. This gives every operation across
/// all replicas a unique, deterministic position in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeTicket {
    /// Lamport timestamp of the issuing change
    pub lamport: i64,
    /// Per-change counter distinguishing tickets within one change
    pub delimiter: u32,
    /// The replica that issued this ticket
    pub actor: ActorId,
}

impl TimeTicket {
    /// Create a ticket with explicit values.
    pub fn new(lamport: i64, delimiter: u32, actor: ActorId) -> Self {
        Self {
            lamport,
            delimiter,
            actor,
        }
    }

    /// The initial ticket: identifies pre-existing structure shared by
    /// all replicas (the root object, sequence heads).
    pub fn initial() -> Self {
        Self {
            lamport: 0,
            delimiter: 0,
            actor: ActorId::initial(),
        }
    }

    /// The maximum ticket. Sorts after every ticket a replica can issue;
    /// used as the "no gate" bound for local deletions.
    pub fn max() -> Self {
        Self {
            lamport: i64::MAX,
            delimiter: u32::MAX,
            actor: ActorId::max(),
        }
    }

    /// Check whether this ticket is strictly after another.
    pub fn after(&self, other: &TimeTicket) -> bool {
        self > other
    }

    /// Canonical string form, used for debugging and as a map key.
    pub fn to_key_string(&self) -> String {
        format!("{}:{}:{}", self.lamport, self.actor, self.delimiter)
    }

    /// Return a copy of this ticket stamped with a different actor.
    ///
    /// Used when a snapshot assigns the local actor to tickets issued
    /// before activation.
    pub fn with_actor(&self, actor: ActorId) -> Self {
        Self {
            lamport: self.lamport,
            delimiter: self.delimiter,
            actor,
        }
    }
}

impl fmt::Display for TimeTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_key_string())
    }
}

impl PartialOrd for TimeTicket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeTicket {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.lamport.cmp(&other.lamport) {
            Ordering::Equal => match self.actor.cmp(&other.actor) {
                Ordering::Equal => self.delimiter.cmp(&other.delimiter),
                ord => ord,
            },
            ord => ord,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn actor(n: u128) -> ActorId {
        ActorId::from(Uuid::from_u128(n))
    }

    #[test]
    fn test_lamport_takes_priority() {
        let t1 = TimeTicket::new(1, 9, actor(9));
        let t2 = TimeTicket::new(2, 0, actor(1));
        assert!(t1 < t2);
    }

    #[test]
    fn test_actor_breaks_lamport_tie() {
        let t1 = TimeTicket::new(1, 0, actor(1));
        let t2 = TimeTicket::new(1, 0, actor(2));
        assert!(t1 < t2);
        assert!(t2.after(&t1));
    }

    #[test]
    fn test_delimiter_breaks_actor_tie() {
        let a = actor(7);
        let t1 = TimeTicket::new(1, 1, a);
        let t2 = TimeTicket::new(1, 2, a);
        assert!(t1 < t2);
    }

    #[test]
    fn test_initial_and_max_bounds() {
        let t = TimeTicket::new(42, 3, ActorId::random());
        assert!(TimeTicket::initial() < t);
        assert!(t < TimeTicket::max());
    }

    #[test]
    fn test_key_string() {
        let t = TimeTicket::new(5, 2, ActorId::initial());
        assert_eq!(t.to_key_string(), "5:nil:2");
    }

    #[test]
    fn test_serialization_roundtrip() {
        let t = TimeTicket::new(7, 1, ActorId::random());
        let json = serde_json::to_string(&t).unwrap();
        let back: TimeTicket = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    proptest! {
        #[test]
        fn prop_total_order_antisymmetric(
            l1 in 0i64..1000, d1 in 0u32..16, a1 in 0u128..8,
            l2 in 0i64..1000, d2 in 0u32..16, a2 in 0u128..8,
        ) {
            let t1 = TimeTicket::new(l1, d1, actor(a1));
            let t2 = TimeTicket::new(l2, d2, actor(a2));
            let forward = t1.cmp(&t2);
            let backward = t2.cmp(&t1);
            prop_assert_eq!(forward, backward.reverse());
            prop_assert_eq!(forward == Ordering::Equal, t1 == t2);
        }

        #[test]
        fn prop_total_order_transitive(
            seeds in proptest::collection::vec((0i64..100, 0u32..8, 0u128..4), 3)
        ) {
            let mut tickets: Vec<TimeTicket> = seeds
                .iter()
                .map(|&(l, d, a)| TimeTicket::new(l, d, actor(a)))
                .collect();
            tickets.sort();
            prop_assert!(tickets[0] <= tickets[1] && tickets[1] <= tickets[2]);
            prop_assert!(tickets[0] <= tickets[2]);
        }
    }
}
