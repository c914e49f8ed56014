//! Cache key definitions.
//!
//! Defines `CacheKey`, the fingerprint of a request's path and query identity.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use sha2::{Digest, Sha256};

/// Separator placed between the namespace prefix and the digest.
pub const KEY_SEPARATOR: char = ':';

/// Digest bytes kept from the SHA-256 output (128 bits).
const DIGEST_LEN: usize = 16;

/// Fingerprint of a cacheable request, scoped by a namespace prefix.
///
/// Two requests with the same base path, path info and raw query string always map
/// to the same key. The query string is used verbatim, so `?a=1&b=2` and `?b=2&a=1`
/// produce different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Fingerprint a request identity under `prefix`.
    pub fn fingerprint(prefix: &str, base_url: &str, path_info: &str, query: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(base_url.as_bytes());
        hasher.update(path_info.as_bytes());
        hasher.update(query.as_bytes());
        let digest = hasher.finalize().to_vec();

        let encoded = STANDARD_NO_PAD.encode(&digest[..DIGEST_LEN]);
        Self(format!("{prefix}{KEY_SEPARATOR}{encoded}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let first = CacheKey::fingerprint("rp", "", "/posts/7", "page=2");
        let second = CacheKey::fingerprint("rp", "", "/posts/7", "page=2");
        assert_eq!(first, second);
    }

    #[test]
    fn fingerprint_carries_prefix_and_compact_digest() {
        let key = CacheKey::fingerprint("rp", "", "/posts/7", "");
        let (prefix, digest) = key.as_str().split_once(':').expect("separator present");

        assert_eq!(prefix, "rp");
        // 16 bytes of digest encode to 22 base64 characters without padding.
        assert_eq!(digest.len(), 22);
        assert!(!digest.ends_with('='));
    }

    #[test]
    fn query_order_changes_the_key() {
        let ordered = CacheKey::fingerprint("rp", "", "/search", "a=1&b=2");
        let swapped = CacheKey::fingerprint("rp", "", "/search", "b=2&a=1");
        assert_ne!(ordered, swapped);
    }

    #[test]
    fn distinct_paths_produce_distinct_keys() {
        let one = CacheKey::fingerprint("rp", "", "/posts/1", "");
        let two = CacheKey::fingerprint("rp", "", "/posts/2", "");
        assert_ne!(one, two);
    }

    #[test]
    fn base_url_is_part_of_identity() {
        let root = CacheKey::fingerprint("rp", "", "/posts/1", "");
        let mounted = CacheKey::fingerprint("rp", "/blog", "/posts/1", "");
        assert_ne!(root, mounted);
    }

    #[test]
    fn prefix_scopes_the_key() {
        let a = CacheKey::fingerprint("rp", "", "/posts/1", "");
        let b = CacheKey::fingerprint("api", "", "/posts/1", "");
        assert_ne!(a, b);
        assert!(b.as_str().starts_with("api:"));
    }
}
