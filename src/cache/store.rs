//! Backing store abstraction.
//!
//! `CacheStore` is the key-value contract the response cache runs on: plain and
//! expiring writes, group membership for tags, and a per-key lock with bounded wait.
//! `MemoryStore` is the in-process implementation.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use lru::LruCache;
use metrics::counter;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::trace;
use uuid::Uuid;

use super::config::DEFAULT_ENTRY_LIMIT;
use super::error::{CacheError, Capability};
use super::lock::guard;
use super::response::METRIC_EVICT_TOTAL;

const SOURCE: &str = "cache::store";

/// Upper bound between lock retries when no release notification arrives.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Optional features a store advertises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCapabilities {
    pub tagging: bool,
    pub locking: bool,
}

impl StoreCapabilities {
    pub const ALL: Self = Self {
        tagging: true,
        locking: true,
    };

    /// First capability the response cache needs that this store lacks.
    pub fn missing(&self) -> Option<Capability> {
        if !self.tagging {
            Some(Capability::Tagging)
        } else if !self.locking {
            Some(Capability::Locking)
        } else {
            None
        }
    }
}

/// Member of a tag group, as seen by an invalidation process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub key: String,
    /// Time left before the membership lapses; `None` never lapses.
    pub expires_in: Option<Duration>,
}

/// Exclusive hold on a store key.
///
/// The lock is released when the guard is dropped, whether the critical section
/// finished, returned early, failed, or its future was cancelled.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    key: String,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl LockGuard {
    pub fn new(key: impl Into<String>, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            key: key.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

/// Key-value store backing the response cache.
///
/// Only `get`, `set` and `set_with_expiry` are mandatory. Group membership and locks
/// default to `CapabilityUnsupported`; stores providing them must also report them
/// through [`CacheStore::capabilities`].
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Identifier used in diagnostics.
    fn name(&self) -> &str;

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::default()
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Overwrite `key` with no expiry.
    async fn set(&self, key: &str, value: Bytes) -> Result<(), CacheError>;

    /// Overwrite `key`, expiring after `ttl` (at least one second).
    async fn set_with_expiry(&self, key: &str, value: Bytes, ttl: Duration)
    -> Result<(), CacheError>;

    /// Add `member` to `group`, replacing any previous expiry for it.
    async fn group_add(
        &self,
        group: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let _ = (group, member, ttl);
        Err(CacheError::capability_unsupported(
            self.name(),
            Capability::Tagging,
        ))
    }

    /// Members of `group` whose membership has not lapsed.
    async fn group_members(&self, group: &str) -> Result<Vec<GroupMember>, CacheError> {
        let _ = group;
        Err(CacheError::capability_unsupported(
            self.name(),
            Capability::Tagging,
        ))
    }

    /// Wait up to `max_wait` for exclusive ownership of `key`.
    async fn acquire_lock(&self, key: &str, max_wait: Duration) -> Result<LockGuard, CacheError> {
        let _ = (key, max_wait);
        Err(CacheError::capability_unsupported(
            self.name(),
            Capability::Locking,
        ))
    }
}

/// Clamp a requested expiry to the one-second minimum stores accept.
pub fn clamp_ttl(ttl: Duration) -> Duration {
    ttl.max(Duration::from_secs(1))
}

// ============================================================================
// Memory Store
// ============================================================================

struct StoredValue {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

struct LockSlot {
    owner: Uuid,
    /// `None` when the lease does not fit on the clock; held until released.
    expires_at: Option<Instant>,
}

impl LockSlot {
    fn is_held(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Default)]
struct LockTable {
    held: Mutex<HashMap<String, LockSlot>>,
    released: Notify,
}

impl LockTable {
    fn try_acquire(&self, key: &str, lease: Duration) -> Option<Uuid> {
        let now = Instant::now();
        let mut held = guard(&self.held, SOURCE, "try_acquire");
        if held.get(key).is_some_and(|slot| slot.is_held(now)) {
            return None;
        }

        let owner = Uuid::new_v4();
        held.insert(
            key.to_string(),
            LockSlot {
                owner,
                expires_at: now.checked_add(lease),
            },
        );
        Some(owner)
    }

    fn release(&self, key: &str, owner: Uuid) {
        let mut held = guard(&self.held, SOURCE, "release");
        if held.get(key).is_some_and(|slot| slot.owner == owner) {
            held.remove(key);
        }
        drop(held);
        self.released.notify_waiters();
    }
}

struct MemoryInner {
    entries: Mutex<LruCache<String, StoredValue>>,
    groups: DashMap<String, HashMap<String, Option<Instant>>>,
    locks: LockTable,
}

/// In-process store with lazy expiry, tag groups and lease-based locks.
///
/// Entries are bounded: once the limit is reached, the least recently used entry is
/// evicted. A lock's lease equals the wait it was requested with, so a holder that
/// never releases blocks the key for at most that long.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub const NAME: &'static str = "memory";

    pub fn new() -> Self {
        let limit = NonZeroUsize::new(DEFAULT_ENTRY_LIMIT).unwrap_or(NonZeroUsize::MIN);
        Self::with_entry_limit(limit)
    }

    /// Store holding at most `limit` entries.
    pub fn with_entry_limit(limit: NonZeroUsize) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                entries: Mutex::new(LruCache::new(limit)),
                groups: DashMap::new(),
                locks: LockTable::default(),
            }),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        guard(&self.inner.entries, SOURCE, "len")
            .iter()
            .filter(|(_, stored)| stored.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is currently locked.
    pub fn is_locked(&self, key: &str) -> bool {
        let now = Instant::now();
        guard(&self.inner.locks.held, SOURCE, "is_locked")
            .get(key)
            .is_some_and(|slot| slot.is_held(now))
    }

    fn write(&self, key: &str, value: Bytes, expires_at: Option<Instant>) {
        let evicted = guard(&self.inner.entries, SOURCE, "write")
            .push(key.to_string(), StoredValue { value, expires_at });
        if let Some((evicted, _)) = evicted.filter(|(evicted, _)| evicted != key) {
            counter!(METRIC_EVICT_TOTAL).increment(1);
            trace!(key = %evicted, "evicted least recently used entry");
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::ALL
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let now = Instant::now();
        let mut entries = guard(&self.inner.entries, SOURCE, "get");
        match entries.get(key) {
            Some(stored) if stored.is_live(now) => return Ok(Some(stored.value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }

        entries.pop(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        self.write(key, value, None);
        Ok(())
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        // An expiry past the end of the clock never lapses.
        self.write(key, value, Instant::now().checked_add(clamp_ttl(ttl)));
        Ok(())
    }

    async fn group_add(
        &self,
        group: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let now = Instant::now();
        let expires_at = ttl.and_then(|ttl| now.checked_add(ttl));
        let mut members = self.inner.groups.entry(group.to_string()).or_default();
        members.retain(|_, at| at.is_none_or(|at| at > now));
        members.insert(member.to_string(), expires_at);
        Ok(())
    }

    async fn group_members(&self, group: &str) -> Result<Vec<GroupMember>, CacheError> {
        let now = Instant::now();
        let Some(members) = self.inner.groups.get(group) else {
            return Ok(Vec::new());
        };

        let mut live: Vec<GroupMember> = members
            .iter()
            .filter(|(_, expires_at)| expires_at.is_none_or(|at| at > now))
            .map(|(key, expires_at)| GroupMember {
                key: key.clone(),
                expires_in: expires_at.map(|at| at - now),
            })
            .collect();
        live.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(live)
    }

    async fn acquire_lock(&self, key: &str, max_wait: Duration) -> Result<LockGuard, CacheError> {
        let deadline = Instant::now().checked_add(max_wait);
        let lease = clamp_ttl(max_wait);
        let locks = &self.inner.locks;

        let wait = async {
            loop {
                // Register for the release signal before checking, so a release that
                // lands between the check and the wait is not missed.
                let released = locks.released.notified();
                if let Some(owner) = locks.try_acquire(key, lease) {
                    return owner;
                }
                trace!(key, "lock held elsewhere, waiting");
                tokio::select! {
                    _ = released => {}
                    _ = sleep(LOCK_POLL_INTERVAL) => {}
                }
            }
        };
        let acquired = match deadline {
            Some(deadline) => timeout_at(deadline, wait).await,
            None => Ok(wait.await),
        };

        let owner = match acquired {
            Ok(owner) => owner,
            // The last chance: the holder may have released exactly at the deadline.
            Err(_) => locks
                .try_acquire(key, lease)
                .ok_or_else(|| CacheError::lock_timeout(key, max_wait))?,
        };

        let inner = Arc::clone(&self.inner);
        let lock_key = key.to_string();
        Ok(LockGuard::new(key, move || {
            inner.locks.release(&lock_key, owner)
        }))
    }
}
