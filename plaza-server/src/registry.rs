//! Identity registry: who is in the chat, under which name.
//!
//! The registry is a bijection between live connections and user records.
//! It keeps a forward map (connection → record) and a reverse name index
//! (name → connection). Both sit behind one lock and are only ever changed
//! together, so every reader sees `by_conn.len() == by_name.len()` and a
//! name is indexed iff some record carries it.
//!
//! Mutations return the snapshot taken inside the same critical section.
//! Presence broadcasts are built from that snapshot, never from a later
//! read, so a broadcast always reflects exactly the mutation that caused it.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::clock::Clock;
use crate::error::AdmitError;

/// Opaque handle for one live transport connection.
///
/// Allocated from a process-wide counter by the transport, so an id is
/// never handed out twice. Rendered on the wire as `c<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid connection id '{0}'")]
pub struct ParseConnIdError(String);

impl FromStr for ConnId {
    type Err = ParseConnIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('c')
            .and_then(|n| n.parse::<u64>().ok())
            .map(ConnId)
            .ok_or_else(|| ParseConnIdError(s.to_string()))
    }
}

impl Serialize for ConnId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConnId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A joined user. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: ConnId,
    #[serde(rename = "username")]
    pub name: String,
    pub join_time: DateTime<Utc>,
}

/// Result of a successful admit.
#[derive(Debug, Clone)]
pub struct Admission {
    pub record: UserRecord,
    /// Everyone in the chat right after the insert, the new user included.
    pub snapshot: Vec<UserRecord>,
}

/// Result of retiring a known connection.
#[derive(Debug, Clone)]
pub struct Retirement {
    pub record: UserRecord,
    /// Everyone still in the chat right after the removal.
    pub snapshot: Vec<UserRecord>,
}

#[derive(Debug, Default)]
struct Inner {
    by_conn: HashMap<ConnId, UserRecord>,
    by_name: HashMap<String, ConnId>,
}

impl Inner {
    fn snapshot(&self) -> Vec<UserRecord> {
        let mut users: Vec<UserRecord> = self.by_conn.values().cloned().collect();
        users.sort_by(|a, b| a.join_time.cmp(&b.join_time).then(a.id.cmp(&b.id)));
        users
    }

    fn debug_check(&self) {
        debug_assert_eq!(self.by_conn.len(), self.by_name.len());
    }
}

pub struct Registry {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
}

impl Registry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
        }
    }

    /// Claim `name` for `conn`.
    ///
    /// The name check and the insert happen under one write lock, so two
    /// concurrent admits for the same name can never both succeed.
    pub fn admit(&self, conn: ConnId, name: &str) -> Result<Admission, AdmitError> {
        let mut inner = self.inner.write();
        if inner.by_conn.contains_key(&conn) {
            return Err(AdmitError::AlreadyAdmitted(conn));
        }
        if inner.by_name.contains_key(name) {
            return Err(AdmitError::NameTaken(name.to_string()));
        }

        let record = UserRecord {
            id: conn,
            name: name.to_string(),
            join_time: self.clock.now(),
        };
        inner.by_name.insert(record.name.clone(), conn);
        inner.by_conn.insert(conn, record.clone());
        inner.debug_check();

        let snapshot = inner.snapshot();
        Ok(Admission { record, snapshot })
    }

    /// Remove `conn`'s record and free its name. `None` if `conn` was not
    /// registered, so repeated calls are harmless.
    pub fn retire(&self, conn: ConnId) -> Option<Retirement> {
        let mut inner = self.inner.write();
        let record = inner.by_conn.remove(&conn)?;
        inner.by_name.remove(&record.name);
        inner.debug_check();

        let snapshot = inner.snapshot();
        Some(Retirement { record, snapshot })
    }

    pub fn lookup(&self, conn: ConnId) -> Option<UserRecord> {
        self.inner.read().by_conn.get(&conn).cloned()
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<UserRecord> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(name)
            .and_then(|conn| inner.by_conn.get(conn))
            .cloned()
    }

    /// Point-in-time copy of every joined user, oldest join first.
    pub fn snapshot(&self) -> Vec<UserRecord> {
        self.inner.read().snapshot()
    }

    /// Connections of every joined user.
    pub fn connection_ids(&self) -> Vec<ConnId> {
        self.inner.read().by_conn.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_conn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
