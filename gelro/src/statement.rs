//! The query codec cache.
use lru::LruCache;
use std::{num::NonZeroUsize, sync::Arc};

use crate::{
    codecs::Codec,
    protocol::{Cardinality, OutputFormat},
};

const QUERY_CACHE_SIZE: usize = 1000;

/// Cache key: the query text plus every flag that changes compilation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct QueryKey {
    pub query: String,
    pub output_format: OutputFormat,
    pub expect_one: bool,
}

impl QueryKey {
    pub fn new(query: &str, output_format: OutputFormat, cardinality: Cardinality) -> Self {
        Self {
            query: query.to_owned(),
            output_format,
            expect_one: cardinality.expect_one(),
        }
    }
}

/// The negotiated compile result for one query.
#[derive(Clone)]
pub(crate) struct QueryEntry {
    pub cardinality: Cardinality,
    pub in_codec: Arc<dyn Codec>,
    pub out_codec: Arc<dyn Codec>,
    pub capabilities: u64,
}

/// LRU over [`QueryEntry`].
///
/// Purely an optimization: losing an entry never changes results, it only
/// costs an extra parse round trip to repopulate. Server-side schema
/// changes surface as a codec mismatch at execute time and self-heal
/// there, the client never invalidates explicitly.
pub(crate) struct QueryCache {
    inner: LruCache<QueryKey, QueryEntry>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self {
            inner: LruCache::new(NonZeroUsize::new(QUERY_CACHE_SIZE).unwrap()),
        }
    }

    pub fn get(&mut self, key: &QueryKey) -> Option<QueryEntry> {
        self.inner.get(key).cloned()
    }

    pub fn set(&mut self, key: QueryKey, entry: QueryEntry) {
        self.inner.put(key, entry);
    }

    pub fn evict(&mut self, key: &QueryKey) {
        self.inner.pop(key);
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache").field("len", &self.inner.len()).finish()
    }
}
