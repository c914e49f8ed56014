//! Stampede-safe response caching.
//!
//! `ResponseCache::handle` decides, for one request, whether to pass it through, serve
//! it from the store, or compute it under the per-key lock and store the result:
//!
//! 1. non-GET requests pass through untouched;
//! 2. a stored body is served without locking (fast hit);
//! 3. on a miss the key lock is taken and the store re-read (locked hit), so a
//!    concurrent holder's result is reused instead of recomputed;
//! 4. on a second miss the downstream handler runs, its body is stored and the key is
//!    recorded under the directive's tags.

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::{Body, HttpBody},
    http::{HeaderValue, Method, header},
    response::Response,
};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream};
use metrics::{counter, histogram};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::{
    CacheConfig, CacheDirective, CacheError, CacheKey, ResolvedStore, RouteParams,
    StoreRegistry, TagRecorder,
    config::LockTimeoutPolicy,
    store::clamp_ttl,
};

pub const METRIC_HIT_TOTAL: &str = "response_cache_hit_total";
pub const METRIC_MISS_TOTAL: &str = "response_cache_miss_total";
pub const METRIC_BYPASS_TOTAL: &str = "response_cache_bypass_total";
pub const METRIC_LOCK_TIMEOUT_TOTAL: &str = "response_cache_lock_timeout_total";
pub const METRIC_TAG_RECORD_FAILURE_TOTAL: &str = "response_cache_tag_record_failure_total";
pub const METRIC_LOCK_WAIT_MS: &str = "response_cache_lock_wait_ms";
pub const METRIC_EVICT_TOTAL: &str = "response_cache_evict_total";

/// How a response was produced; attached to every response as an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Not a cacheable method; handled downstream without touching the store.
    PassThrough,
    /// Served from the store before locking.
    FastHit,
    /// Served from the store after waiting for the key lock.
    LockedHit,
    /// Computed downstream while holding the key lock.
    Computed,
    /// Lock wait elapsed and the policy allowed an uncached downstream call.
    Bypassed,
}

/// Identity of a request as seen by the cache.
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    pub method: Method,
    /// Mount point of the application (empty at the root).
    pub base_path: String,
    /// Path below the mount point.
    pub path_info: String,
    /// Raw query string, without the leading `?`.
    pub query: String,
    pub wants_json: bool,
    pub params: RouteParams,
}

impl RequestIdentity {
    pub fn new(method: Method, path_info: impl Into<String>) -> Self {
        Self {
            method,
            base_path: String::new(),
            path_info: path_info.into(),
            query: String::new(),
            wants_json: false,
            params: RouteParams::new(),
        }
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn accepting_json(mut self, wants_json: bool) -> Self {
        self.wants_json = wants_json;
        self
    }

    pub fn with_params(mut self, params: RouteParams) -> Self {
        self.params = params;
        self
    }
}

struct Shared {
    config: CacheConfig,
    store: ResolvedStore,
    tags: TagRecorder,
}

/// Response cache bound to one backing store.
#[derive(Clone)]
pub struct ResponseCache {
    shared: Arc<Shared>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig, store: ResolvedStore) -> Self {
        let tags = TagRecorder::new(store.clone());
        Self {
            shared: Arc::new(Shared {
                config,
                store,
                tags,
            }),
        }
    }

    /// Build a cache on the store `config.store` names in `registry`.
    pub fn from_registry(
        config: CacheConfig,
        registry: &StoreRegistry,
    ) -> Result<Self, CacheError> {
        let store = registry.resolve(&config.store)?;
        Ok(Self::new(config, store))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    pub fn store(&self) -> &ResolvedStore {
        &self.shared.store
    }

    pub fn tags(&self) -> &TagRecorder {
        &self.shared.tags
    }

    /// Cache key of `request` under the configured prefix.
    pub fn key_for(&self, request: &RequestIdentity) -> CacheKey {
        CacheKey::fingerprint(
            &self.shared.config.prefix,
            &request.base_path,
            &request.path_info,
            &request.query,
        )
    }

    /// Serve `request` from the cache, or compute it with `next` and cache the result.
    ///
    /// `next` runs at most once. For a given key, only one concurrent caller runs it per
    /// miss; the others wait on the key lock and are served the stored body.
    #[instrument(skip_all, fields(method = %request.method, path = %request.path_info))]
    pub async fn handle<F, Fut>(
        &self,
        request: &RequestIdentity,
        directive: &CacheDirective,
        next: F,
    ) -> Result<Response, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Response>,
    {
        if request.method != Method::GET {
            return Ok(with_outcome(next().await, CacheOutcome::PassThrough));
        }

        let shared = &self.shared;
        let key = self.key_for(request);

        if let Some(body) = shared.store.get(key.as_str()).await? {
            counter!(METRIC_HIT_TOTAL, "path" => "fast").increment(1);
            debug!(
                cache = "response",
                outcome = "hit",
                path = "fast",
                key = %key,
                "serving cached response"
            );
            return Ok(cached_response(body, request.wants_json, CacheOutcome::FastHit));
        }

        let wait_started = Instant::now();
        let lock = match shared
            .store
            .acquire_lock(key.as_str(), shared.config.lock_wait())
            .await
        {
            Ok(lock) => lock,
            Err(err @ CacheError::LockTimeout { .. }) => {
                counter!(METRIC_LOCK_TIMEOUT_TOTAL).increment(1);
                return match shared.config.lock_timeout {
                    LockTimeoutPolicy::Error => Err(err),
                    LockTimeoutPolicy::Bypass => {
                        counter!(METRIC_BYPASS_TOTAL).increment(1);
                        warn!(
                            key = %key,
                            error = %err,
                            "lock wait elapsed, bypassing cache"
                        );
                        Ok(with_outcome(next().await, CacheOutcome::Bypassed))
                    }
                };
            }
            Err(err) => return Err(err),
        };
        histogram!(METRIC_LOCK_WAIT_MS).record(wait_started.elapsed().as_secs_f64() * 1000.0);

        if let Some(body) = shared.store.get(key.as_str()).await? {
            counter!(METRIC_HIT_TOTAL, "path" => "locked").increment(1);
            debug!(
                cache = "response",
                outcome = "hit",
                path = "locked",
                key = %key,
                "serving response cached while waiting"
            );
            drop(lock);
            return Ok(cached_response(body, request.wants_json, CacheOutcome::LockedHit));
        }

        counter!(METRIC_MISS_TOTAL).increment(1);
        debug!(
            cache = "response",
            outcome = "miss",
            key = %key,
            "cache miss, executing handler"
        );

        let response = next().await;
        let response = self.store_response(&key, request, directive, response).await;
        drop(lock);
        response
    }

    /// Store a freshly computed response and tag its key.
    ///
    /// Non-success responses and bodies over `max_body_bytes` are returned without being
    /// stored. Tag recording failures are logged and counted; the response is still
    /// returned.
    async fn store_response(
        &self,
        key: &CacheKey,
        request: &RequestIdentity,
        directive: &CacheDirective,
        response: Response,
    ) -> Result<Response, CacheError> {
        if !response.status().is_success() {
            debug!(
                cache = "response",
                status = response.status().as_u16(),
                "not caching unsuccessful response"
            );
            return Ok(with_outcome(response, CacheOutcome::Computed));
        }

        let shared = &self.shared;
        let (parts, body) = response.into_parts();
        let bytes = match buffer_body(body, shared.config.max_body_bytes).await? {
            BufferedBody::Complete(bytes) => bytes,
            BufferedBody::Oversized(body) => {
                debug!(
                    cache = "response",
                    key = %key,
                    limit = shared.config.max_body_bytes,
                    "not caching response larger than the body limit"
                );
                return Ok(with_outcome(
                    Response::from_parts(parts, body),
                    CacheOutcome::Computed,
                ));
            }
        };

        let ttl = directive.ttl().map(clamp_ttl);
        match ttl {
            Some(ttl) => {
                shared
                    .store
                    .set_with_expiry(key.as_str(), bytes.clone(), ttl)
                    .await?
            }
            None => shared.store.set(key.as_str(), bytes.clone()).await?,
        }

        let tags = directive.resolve_tags(&request.params);
        if let Err(err) = shared.tags.record(&tags, key, ttl).await {
            counter!(METRIC_TAG_RECORD_FAILURE_TOTAL).increment(1);
            warn!(
                key = %key,
                tags = ?tags,
                error = %err,
                "cached response without complete tag bookkeeping"
            );
        }

        debug!(
            cache = "response",
            key = %key,
            ttl_secs = ttl.map(|ttl| ttl.as_secs()),
            tags = ?tags,
            "cached response"
        );
        Ok(with_outcome(
            Response::from_parts(parts, Body::from(bytes)),
            CacheOutcome::Computed,
        ))
    }
}

enum BufferedBody {
    Complete(Bytes),
    /// Over the limit; replays what was already read ahead of the unread remainder.
    Oversized(Body),
}

async fn buffer_body(body: Body, limit: usize) -> Result<BufferedBody, CacheError> {
    if body.size_hint().lower() > limit as u64 {
        return Ok(BufferedBody::Oversized(body));
    }

    let mut chunks = body.into_data_stream();
    let mut buffered = BytesMut::new();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|err| CacheError::response_body(err.to_string()))?;
        if buffered.len() + chunk.len() > limit {
            let read = stream::iter([Ok(buffered.freeze()), Ok(chunk)]);
            return Ok(BufferedBody::Oversized(Body::from_stream(read.chain(chunks))));
        }
        buffered.extend_from_slice(&chunk);
    }
    Ok(BufferedBody::Complete(buffered.freeze()))
}

fn with_outcome(mut response: Response, outcome: CacheOutcome) -> Response {
    response.extensions_mut().insert(outcome);
    response
}

/// 200 response around a stored body.
fn cached_response(body: Bytes, wants_json: bool, outcome: CacheOutcome) -> Response {
    let mut response = Response::new(Body::from(body));
    if wants_json {
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
    }
    with_outcome(response, outcome)
}
