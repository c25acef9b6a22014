/*
 * Copyright 2019 Joyent, Inc.
 */

use xxhash_rust::xxh3::xxh3_64;

/// Return the part of `key` used for host selection.
///
/// Follows redis cluster hashtag rules
/// (https://redis.io/topics/cluster-spec#keys-hash-tags): when enabled and the
/// key holds a `{` followed later by a `}` with at least one byte between
/// them, only the bytes between the first such pair are used. Otherwise the
/// whole key is used.
pub fn hashtag(key: &[u8], enabled: bool) -> &[u8] {
    if !enabled {
        return key;
    }

    let start = match key.iter().position(|b| *b == b'{') {
        Some(start) => start,
        None => return key,
    };

    match key[start + 1..].iter().position(|b| *b == b'}') {
        Some(0) | None => key,
        Some(len) => &key[start + 1..start + 1 + len],
    }
}

/// Load balancer context for one keyed request.
#[derive(Clone, Copy, Debug)]
pub struct LbContext<'a> {
    routing_key: &'a [u8],
}

impl<'a> LbContext<'a> {
    pub fn new(key: &'a [u8], enable_hashtagging: bool) -> Self {
        LbContext {
            routing_key: hashtag(key, enable_hashtagging),
        }
    }

    /// The key after hashtag extraction.
    pub fn routing_key(&self) -> &'a [u8] {
        self.routing_key
    }

    /// 64 bit hash of the routing key for hash based load balancers.
    pub fn compute_hash_key(&self) -> Option<u64> {
        Some(xxh3_64(self.routing_key))
    }
}
