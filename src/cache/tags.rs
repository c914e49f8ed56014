//! Tag group bookkeeping.
//!
//! Records which cache keys belong to which tag groups so an invalidation process can
//! later find and delete every entry carrying a tag. Membership is only ever added
//! here; pruning lapsed members is the invalidator's job.

use std::time::Duration;

use tracing::warn;

use super::error::CacheError;
use super::keys::CacheKey;
use super::registry::ResolvedStore;
use super::store::GroupMember;

/// Store key of the group holding the members of `tag`.
pub fn tag_group_key(tag: &str) -> String {
    format!("tag:{tag}:entries")
}

/// Writes tag memberships into the backing store.
#[derive(Debug, Clone)]
pub struct TagRecorder {
    store: ResolvedStore,
}

impl TagRecorder {
    pub fn new(store: ResolvedStore) -> Self {
        Self { store }
    }

    /// Add `key` to the group of every tag in `tags`.
    ///
    /// Each membership expires with `ttl`, or never when `ttl` is `None`. Every tag is
    /// attempted; the first failure is returned once all writes were tried.
    pub async fn record(
        &self,
        tags: &[String],
        key: &CacheKey,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut first_error = None;

        for tag in tags {
            let group = tag_group_key(tag);
            if let Err(err) = self.store.group_add(&group, key.as_str(), ttl).await {
                warn!(
                    tag = %tag,
                    key = %key,
                    error = %err,
                    "failed to record tag membership"
                );
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Current members of `tag`, for invalidation processes.
    pub async fn members(&self, tag: &str) -> Result<Vec<GroupMember>, CacheError> {
        self.store.group_members(&tag_group_key(tag)).await
    }
}
