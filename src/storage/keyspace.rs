//! Keyspace Engine
//!
//! Three independently guarded stores share one key namespace:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Keyspace                            │
//! │  ┌──────────────┐   ┌──────────────────┐   ┌──────────────┐  │
//! │  │   strings    │   │      hashes      │   │ expirations  │  │
//! │  │ key -> value │   │ key -> {f -> v}  │   │ key -> unix s│  │
//! │  │    RwLock    │   │      RwLock      │   │    RwLock    │  │
//! │  └──────────────┘   └──────────────────┘   └──────────────┘  │
//! │        (1)                  (2)                   (3)        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lock order
//!
//! Locks are only ever held together in the order strings (1), hashes (2),
//! expirations (3). Operations that need a single store take only that lock,
//! so a GET never waits on an HSET.
//!
//! ## Expiry
//!
//! A key is expired once the current unix second is strictly greater than its
//! deadline. GET checks this lazily; the sweeper in [`super::expiry`] calls
//! [`Keyspace::purge_expired`]. Both remove the key from all three stores
//! through [`Keyspace::remove_if_expired`], which re-checks the deadline under
//! all three write locks.
//!
//! Hash reads (HGET, HGETALL, HLEN) do not perform the lazy check; an expired
//! hash stays readable until the next sweep.
//!
//! A key may live in both the string and hash store at once. Nothing prevents
//! it, and DEL clears both.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

type HashValue = HashMap<Bytes, Bytes>;

/// Failures of INCR / DECR.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum KeyspaceError {
    #[error("value is not an integer")]
    NotAnInteger,

    #[error("increment or decrement would overflow")]
    Overflow,
}

/// Aggregate counts reported by INFO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyspaceStats {
    /// Entries in the string store
    pub keys: usize,
    /// Entries in the hash store
    pub hashes: usize,
    /// Fields across all hashes
    pub fields: usize,
    /// Keys with a deadline
    pub expires: usize,
    /// Keys removed by lazy or active expiry since startup
    pub expired: u64,
}

/// Current wall-clock time in whole seconds since the epoch.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs() as i64
}

#[inline]
fn is_past(deadline: i64, now: i64) -> bool {
    now > deadline
}

// A panic while a guard is held cannot leave any of these maps half-updated,
// so poisoned locks are simply reused.
#[inline]
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

#[inline]
fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// The process-wide store, shared behind an `Arc` by the dispatcher, the
/// sweeper, and (through the dispatcher) every connection.
#[derive(Debug, Default)]
pub struct Keyspace {
    strings: RwLock<HashMap<Bytes, Bytes>>,
    hashes: RwLock<HashMap<Bytes, HashValue>>,
    expirations: RwLock<HashMap<Bytes, i64>>,
    expired_count: AtomicU64,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Strings
    // ------------------------------------------------------------------

    /// Upserts a string. A TTL (seconds) sets a deadline, no TTL clears any
    /// existing one.
    pub fn set(&self, key: Bytes, value: Bytes, ttl_secs: Option<i64>) {
        let deadline = ttl_secs.map(|secs| unix_now().saturating_add(secs));
        self.set_until(key, value, deadline);
    }

    /// [`set`](Self::set) with an absolute deadline. A deadline that has
    /// already passed leaves the key expired, i.e. gone from every store.
    pub fn set_until(&self, key: Bytes, value: Bytes, deadline: Option<i64>) {
        if deadline.is_some_and(|deadline| is_past(deadline, unix_now())) {
            self.delete(&key);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut strings = write(&self.strings);
        let mut expirations = write(&self.expirations);

        match deadline {
            Some(deadline) => {
                expirations.insert(key.clone(), deadline);
            }
            None => {
                expirations.remove(&key);
            }
        }
        strings.insert(key, value);
    }

    /// Reads a string, removing it first if its deadline has passed.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let deadline = read(&self.expirations).get(key).copied();
        if let Some(deadline) = deadline {
            let now = unix_now();
            if is_past(deadline, now) && self.remove_if_expired(key, now) {
                return None;
            }
        }

        read(&self.strings).get(key).cloned()
    }

    /// INCR: absent keys start at 1.
    pub fn incr(&self, key: &[u8]) -> Result<i64, KeyspaceError> {
        self.step(key, 1, 1)
    }

    /// DECR: absent keys start at 0.
    pub fn decr(&self, key: &[u8]) -> Result<i64, KeyspaceError> {
        self.step(key, -1, 0)
    }

    fn step(&self, key: &[u8], delta: i64, seed: i64) -> Result<i64, KeyspaceError> {
        let mut strings = write(&self.strings);

        let next = match strings.get(key) {
            None => seed,
            Some(current) => std::str::from_utf8(current)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or(KeyspaceError::NotAnInteger)?
                .checked_add(delta)
                .ok_or(KeyspaceError::Overflow)?,
        };

        strings.insert(Bytes::copy_from_slice(key), Bytes::from(next.to_string()));
        Ok(next)
    }

    // ------------------------------------------------------------------
    // Hashes
    // ------------------------------------------------------------------

    /// Upserts a hash field, creating the hash if needed.
    pub fn hset(&self, key: Bytes, field: Bytes, value: Bytes) {
        write(&self.hashes)
            .entry(key)
            .or_default()
            .insert(field, value);
    }

    pub fn hget(&self, key: &[u8], field: &[u8]) -> Option<Bytes> {
        read(&self.hashes)
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned()
    }

    /// All field/value pairs, or `None` if the hash does not exist.
    pub fn hgetall(&self, key: &[u8]) -> Option<Vec<(Bytes, Bytes)>> {
        read(&self.hashes).get(key).map(|hash| {
            hash.iter()
                .map(|(f, v)| (f.clone(), v.clone()))
                .collect()
        })
    }

    /// Removes one field. The hash itself is dropped with its last field.
    ///
    /// Returns `true` if the field existed.
    pub fn hdel(&self, key: &[u8], field: &[u8]) -> bool {
        let (removed, dropped) = {
            let mut hashes = write(&self.hashes);
            match hashes.get_mut(key) {
                Some(hash) => {
                    let removed = hash.remove(field).is_some();
                    let dropped = hash.is_empty();
                    if dropped {
                        hashes.remove(key);
                    }
                    (removed, dropped)
                }
                None => (false, false),
            }
        };

        if dropped {
            self.clear_orphan_deadline(key);
        }
        removed
    }

    pub fn hlen(&self, key: &[u8]) -> usize {
        read(&self.hashes).get(key).map_or(0, HashMap::len)
    }

    // ------------------------------------------------------------------
    // Keys
    // ------------------------------------------------------------------

    /// Removes a key from both data stores and drops its deadline.
    ///
    /// Returns `true` if the key existed in either store.
    pub fn delete(&self, key: &[u8]) -> bool {
        let mut strings = write(&self.strings);
        let mut hashes = write(&self.hashes);
        let mut expirations = write(&self.expirations);

        let in_strings = strings.remove(key).is_some();
        let in_hashes = hashes.remove(key).is_some();
        expirations.remove(key);
        in_strings || in_hashes
    }

    /// Clears all three stores.
    pub fn flush(&self) {
        let mut strings = write(&self.strings);
        let mut hashes = write(&self.hashes);
        let mut expirations = write(&self.expirations);

        strings.clear();
        hashes.clear();
        expirations.clear();
    }

    /// Whether the key lives in either data store. No expiry check.
    pub fn exists(&self, key: &[u8]) -> bool {
        read(&self.strings).contains_key(key) || read(&self.hashes).contains_key(key)
    }

    /// Sets a deadline `secs` from now. Returns `false` if the key is absent.
    pub fn expire(&self, key: &[u8], secs: i64) -> bool {
        self.expire_at(key, unix_now().saturating_add(secs))
    }

    /// Sets an absolute deadline. A deadline that has already passed removes
    /// the key immediately.
    ///
    /// Returns `false` if the key is absent.
    pub fn expire_at(&self, key: &[u8], deadline: i64) -> bool {
        let mut strings = write(&self.strings);
        let mut hashes = write(&self.hashes);
        let mut expirations = write(&self.expirations);

        if !strings.contains_key(key) && !hashes.contains_key(key) {
            return false;
        }

        if is_past(deadline, unix_now()) {
            strings.remove(key);
            hashes.remove(key);
            expirations.remove(key);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
        } else {
            expirations.insert(Bytes::copy_from_slice(key), deadline);
        }
        true
    }

    /// Remaining seconds: `-2` if the key is absent or past its deadline,
    /// `-1` if it has no deadline.
    pub fn ttl(&self, key: &[u8]) -> i64 {
        let deadline = read(&self.expirations).get(key).copied();

        if !self.exists(key) {
            return -2;
        }

        match deadline {
            None => -1,
            Some(deadline) => {
                let remaining = deadline - unix_now();
                if remaining < 0 {
                    -2
                } else {
                    remaining
                }
            }
        }
    }

    /// Drops a deadline. Returns `false` if the key is absent or had none.
    pub fn persist(&self, key: &[u8]) -> bool {
        let strings = read(&self.strings);
        let hashes = read(&self.hashes);
        let mut expirations = write(&self.expirations);

        if !strings.contains_key(key) && !hashes.contains_key(key) {
            return false;
        }
        expirations.remove(key).is_some()
    }

    // ------------------------------------------------------------------
    // Expiry
    // ------------------------------------------------------------------

    /// Removes `key` from all three stores if its deadline is still past
    /// `now` once every lock is held.
    pub fn remove_if_expired(&self, key: &[u8], now: i64) -> bool {
        let mut strings = write(&self.strings);
        let mut hashes = write(&self.hashes);
        let mut expirations = write(&self.expirations);

        self.evict_locked(key, now, &mut strings, &mut hashes, &mut expirations)
    }

    /// Removes every key whose deadline is past `now`. Returns the count.
    pub fn purge_expired(&self, now: i64) -> usize {
        let candidates: Vec<Bytes> = read(&self.expirations)
            .iter()
            .filter(|(_, deadline)| is_past(**deadline, now))
            .map(|(key, _)| key.clone())
            .collect();

        if candidates.is_empty() {
            return 0;
        }

        let mut strings = write(&self.strings);
        let mut hashes = write(&self.hashes);
        let mut expirations = write(&self.expirations);

        candidates
            .iter()
            .filter(|key| {
                self.evict_locked(key, now, &mut strings, &mut hashes, &mut expirations)
            })
            .count()
    }

    fn evict_locked(
        &self,
        key: &[u8],
        now: i64,
        strings: &mut HashMap<Bytes, Bytes>,
        hashes: &mut HashMap<Bytes, HashValue>,
        expirations: &mut HashMap<Bytes, i64>,
    ) -> bool {
        match expirations.get(key) {
            Some(&deadline) if is_past(deadline, now) => {
                strings.remove(key);
                hashes.remove(key);
                expirations.remove(key);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// Drops a deadline left behind by a key that no longer lives anywhere.
    fn clear_orphan_deadline(&self, key: &[u8]) {
        let strings = read(&self.strings);
        let hashes = read(&self.hashes);
        let mut expirations = write(&self.expirations);

        if !strings.contains_key(key) && !hashes.contains_key(key) {
            expirations.remove(key);
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn stats(&self) -> KeyspaceStats {
        let keys = read(&self.strings).len();
        let (hashes, fields) = {
            let hashes = read(&self.hashes);
            (hashes.len(), hashes.values().map(HashMap::len).sum())
        };
        let expires = read(&self.expirations).len();

        KeyspaceStats {
            keys,
            hashes,
            fields,
            expires,
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }

    /// Moves an existing deadline into the past so expiry paths can be
    /// exercised without sleeping.
    #[cfg(test)]
    pub(crate) fn backdate(&self, key: &[u8], secs_ago: i64) {
        write(&self.expirations).insert(Bytes::copy_from_slice(key), unix_now() - secs_ago);
    }

    #[cfg(test)]
    pub(crate) fn deadline(&self, key: &[u8]) -> Option<i64> {
        read(&self.expirations).get(key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[test]
    fn test_set_get() {
        let ks = Keyspace::new();
        assert_eq!(ks.get(b"name"), None);

        ks.set(b("name"), b("Ada"), None);
        assert_eq!(ks.get(b"name"), Some(b("Ada")));

        ks.set(b("name"), b("Grace"), None);
        assert_eq!(ks.get(b"name"), Some(b("Grace")));
    }

    #[test]
    fn test_set_without_ttl_clears_deadline() {
        let ks = Keyspace::new();
        ks.set(b("k"), b("v"), Some(100));
        assert!((99..=100).contains(&ks.ttl(b"k")));

        ks.set(b("k"), b("v2"), None);
        assert_eq!(ks.ttl(b"k"), -1);
    }

    #[test]
    fn test_set_until_uses_the_given_deadline() {
        let ks = Keyspace::new();
        let deadline = unix_now() + 50;
        ks.set_until(b("k"), b("v"), Some(deadline));
        assert_eq!(ks.deadline(b"k"), Some(deadline));
        assert_eq!(ks.get(b"k"), Some(b("v")));

        ks.hset(b("k"), b("f"), b("v"));
        ks.set_until(b("k"), b("v2"), Some(unix_now() - 1));
        assert!(!ks.exists(b"k"));
        assert_eq!(ks.ttl(b"k"), -2);
        assert_eq!(ks.stats().expired, 1);
    }

    #[test]
    fn test_lazy_expiry_on_get_clears_every_store() {
        let ks = Keyspace::new();
        ks.set(b("k"), b("v"), Some(10));
        ks.hset(b("k"), b("f"), b("v"));
        ks.backdate(b"k", 5);

        assert_eq!(ks.get(b"k"), None);
        assert_eq!(ks.hlen(b"k"), 0);
        assert_eq!(ks.ttl(b"k"), -2);
        assert_eq!(ks.stats().expires, 0);
        assert_eq!(ks.stats().expired, 1);
    }

    #[test]
    fn test_deadline_equal_to_now_is_still_live() {
        let ks = Keyspace::new();
        ks.set(b("k"), b("v"), None);
        ks.backdate(b"k", 0);
        // The deadline is only past once the clock moves beyond it.
        assert!(!ks.remove_if_expired(b"k", unix_now() - 1));
        assert!(ks.exists(b"k"));
    }

    #[test]
    fn test_hash_reads_skip_lazy_expiry() {
        let ks = Keyspace::new();
        ks.hset(b("h"), b("f"), b("v"));
        assert!(ks.expire(b"h", 10));
        ks.backdate(b"h", 5);

        assert_eq!(ks.hget(b"h", b"f"), Some(b("v")));
        assert_eq!(ks.purge_expired(unix_now()), 1);
        assert_eq!(ks.hget(b"h", b"f"), None);
        assert_eq!(ks.hgetall(b"h"), None);
    }

    #[test]
    fn test_hash_lifecycle() {
        let ks = Keyspace::new();
        ks.hset(b("h"), b("a"), b("1"));
        ks.hset(b("h"), b("b"), b("2"));
        ks.hset(b("h"), b("a"), b("3"));
        assert_eq!(ks.hlen(b"h"), 2);
        assert_eq!(ks.hget(b"h", b"a"), Some(b("3")));

        let mut pairs = ks.hgetall(b"h").unwrap();
        pairs.sort();
        assert_eq!(pairs, vec![(b("a"), b("3")), (b("b"), b("2"))]);

        assert!(ks.hdel(b"h", b"a"));
        assert!(!ks.hdel(b"h", b"missing"));
        assert!(ks.hdel(b"h", b"b"));
        assert_eq!(ks.hlen(b"h"), 0);
        assert_eq!(ks.hgetall(b"h"), None);
        assert!(!ks.exists(b"h"));
    }

    #[test]
    fn test_dropping_last_field_drops_deadline() {
        let ks = Keyspace::new();
        ks.hset(b("h"), b("f"), b("v"));
        assert!(ks.expire(b"h", 100));
        ks.hdel(b"h", b"f");

        ks.hset(b("h"), b("f"), b("v"));
        assert_eq!(ks.ttl(b"h"), -1);
    }

    #[test]
    fn test_incr_decr_seeds() {
        let ks = Keyspace::new();
        assert_eq!(ks.incr(b"up"), Ok(1));
        assert_eq!(ks.incr(b"up"), Ok(2));
        assert_eq!(ks.decr(b"down"), Ok(0));
        assert_eq!(ks.decr(b"down"), Ok(-1));
        assert_eq!(ks.get(b"down"), Some(b("-1")));
    }

    #[test]
    fn test_incr_non_numeric_leaves_value() {
        let ks = Keyspace::new();
        ks.set(b("k"), b("abc"), None);
        assert_eq!(ks.incr(b"k"), Err(KeyspaceError::NotAnInteger));
        assert_eq!(ks.get(b"k"), Some(b("abc")));

        ks.set(b("max"), Bytes::from(i64::MAX.to_string()), None);
        assert_eq!(ks.incr(b"max"), Err(KeyspaceError::Overflow));
    }

    #[test]
    fn test_delete_clears_both_stores_and_ttl() {
        let ks = Keyspace::new();
        ks.set(b("k"), b("v"), Some(100));
        ks.hset(b("k"), b("f"), b("v"));

        assert!(ks.delete(b"k"));
        assert!(!ks.delete(b"k"));
        assert_eq!(ks.get(b"k"), None);
        assert_eq!(ks.hlen(b"k"), 0);
        assert_eq!(ks.stats().expires, 0);
    }

    #[test]
    fn test_expire_ttl_persist() {
        let ks = Keyspace::new();
        assert!(!ks.expire(b"missing", 10));
        assert_eq!(ks.ttl(b"missing"), -2);
        assert!(!ks.persist(b"missing"));

        ks.set(b("k"), b("v"), None);
        assert_eq!(ks.ttl(b"k"), -1);
        assert!(!ks.persist(b"k"));

        assert!(ks.expire(b"k", 50));
        let ttl = ks.ttl(b"k");
        assert!((49..=50).contains(&ttl), "ttl was {}", ttl);

        assert!(ks.persist(b"k"));
        assert_eq!(ks.ttl(b"k"), -1);
    }

    #[test]
    fn test_expire_at_in_the_past_removes_key() {
        let ks = Keyspace::new();
        ks.set(b("k"), b("v"), None);
        assert!(ks.expire_at(b"k", unix_now() - 10));
        assert!(!ks.exists(b"k"));

        assert!(!ks.expire_at(b"k", unix_now() + 10));
    }

    #[test]
    fn test_purge_skips_keys_reset_after_selection() {
        let ks = Keyspace::new();
        ks.set(b("gone"), b("v"), Some(10));
        ks.set(b("kept"), b("v"), Some(10));
        ks.backdate(b"gone", 3);
        ks.backdate(b"kept", 3);
        ks.set(b("kept"), b("fresh"), None);

        assert_eq!(ks.purge_expired(unix_now()), 1);
        assert_eq!(ks.get(b"kept"), Some(b("fresh")));
        assert!(!ks.exists(b"gone"));
    }

    #[test]
    fn test_flush() {
        let ks = Keyspace::new();
        ks.set(b("a"), b("1"), Some(10));
        ks.hset(b("h"), b("f"), b("v"));
        ks.flush();
        assert_eq!(
            ks.stats(),
            KeyspaceStats {
                expired: 0,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_stats() {
        let ks = Keyspace::new();
        ks.set(b("a"), b("1"), None);
        ks.set(b("b"), b("2"), Some(60));
        ks.hset(b("h1"), b("f1"), b("v"));
        ks.hset(b("h1"), b("f2"), b("v"));
        ks.hset(b("h2"), b("f1"), b("v"));

        let stats = ks.stats();
        assert_eq!(stats.keys, 2);
        assert_eq!(stats.hashes, 2);
        assert_eq!(stats.fields, 3);
        assert_eq!(stats.expires, 1);
    }

    #[test]
    fn test_concurrent_incr_has_no_lost_updates() {
        let ks = Arc::new(Keyspace::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ks = Arc::clone(&ks);
                thread::spawn(move || {
                    for _ in 0..500 {
                        ks.incr(b"counter").unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(ks.get(b"counter"), Some(b("4000")));
    }

    #[test]
    fn test_concurrent_mixed_writers_and_sweeps() {
        let ks = Arc::new(Keyspace::new());
        let mut handles = Vec::new();

        for i in 0..4 {
            let ks = Arc::clone(&ks);
            handles.push(thread::spawn(move || {
                for j in 0..200 {
                    let key = Bytes::from(format!("k-{}-{}", i, j));
                    ks.set(key.clone(), b("v"), Some(60));
                    ks.hset(key.clone(), b("f"), b("v"));
                    ks.get(&key);
                    ks.ttl(&key);
                }
            }));
        }
        {
            let ks = Arc::clone(&ks);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    ks.purge_expired(unix_now());
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        let stats = ks.stats();
        assert_eq!(stats.keys, 800);
        assert_eq!(stats.hashes, 800);
    }
}
