//! Lease model: who holds which item, and until when.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ItemId, RunId};

/// Composite owner tag of a lease: run + worker loop + per-loop attempt sequence.
///
/// The attempt sequence makes the owner unique per attempt, so a loop that
/// re-leases an item after releasing it never matches its own stale lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseOwner {
    pub run_id: RunId,
    pub worker_id: usize,
    pub attempt: u64,
}

impl LeaseOwner {
    pub fn new(run_id: RunId, worker_id: usize, attempt: u64) -> Self {
        Self {
            run_id,
            worker_id,
            attempt,
        }
    }
}

impl fmt::Display for LeaseOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/w{}/a{}", self.run_id, self.worker_id, self.attempt)
    }
}

impl Serialize for LeaseOwner {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A time-bounded claim on an item. Expiry is `acquired_at + ttl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub item_id: ItemId,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    #[serde(with = "ttl_secs")]
    pub ttl: Duration,
}

impl Lease {
    pub fn new(item_id: ItemId, owner: &LeaseOwner, acquired_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            item_id,
            owner: owner.to_string(),
            acquired_at,
            ttl,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        // TTLs beyond chrono's range are treated as "never expires".
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.acquired_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// A lease is expired once `acquired_at + ttl < now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() < now
    }

    pub fn is_held_by(&self, owner: &str) -> bool {
        self.owner == owner
    }
}

mod ttl_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(ttl.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
