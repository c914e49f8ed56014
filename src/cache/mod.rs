//! Response Cache
//!
//! Caches the bodies of successful GET responses keyed by a fingerprint of the request,
//! and records every cached key under symbolic tags so whole groups of entries can be
//! invalidated together.
//!
//! - **Fingerprinting** (`keys`): base path, path and raw query hashed into a `CacheKey`
//! - **Stampede protection** (`response`): fast read, per-key lock, re-read, compute once
//! - **Tag bookkeeping** (`tags`): key membership per tag group, expiring with the entry
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! prefix = "rp"
//! lock_wait_seconds = 10
//! store = "memory"
//! lock_timeout = "error"   # or "bypass"
//! entry_limit = 10000
//! ```

mod config;
mod directive;
mod error;
mod keys;
mod lock;
mod middleware;
mod registry;
mod response;
mod store;
mod tags;

pub use config::{CacheConfig, LockTimeoutPolicy};
pub use directive::{CacheDirective, RouteKey, RouteParam, RouteParams, resolve_template};
pub use error::{CacheError, Capability};
pub use keys::{CacheKey, KEY_SEPARATOR};
pub use middleware::{CacheLayerState, RouteBindings, response_cache_layer, wants_json};
pub use registry::{ResolvedStore, StoreRegistry};
pub use response::{
    CacheOutcome, METRIC_BYPASS_TOTAL, METRIC_EVICT_TOTAL, METRIC_HIT_TOTAL,
    METRIC_LOCK_TIMEOUT_TOTAL, METRIC_LOCK_WAIT_MS, METRIC_MISS_TOTAL,
    METRIC_TAG_RECORD_FAILURE_TOTAL, RequestIdentity, ResponseCache,
};
pub use store::{CacheStore, GroupMember, LockGuard, MemoryStore, StoreCapabilities, clamp_ttl};
pub use tags::{TagRecorder, tag_group_key};
