use aws_sdk_dynamodb::types::AttributeValue;
use lru::LruCache;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

use super::types::{BucketKey, IndexCollection, KEY_BUCKET_ID, KEY_ITEM_COUNT, shard_column};
use crate::config::BucketConfig;
use crate::error::Error;
use crate::store::{AttributePath, BucketStore, Condition, Record, UpdateRequest, number_of};

static INDEX_INIT_CACHE: OnceLock<Arc<IndexInitCache>> = OnceLock::new();

/// Index entries already known to exist, grouped per bucket record
///
/// Only ever written after the store confirmed the entries. A capacity of
/// zero disables the cache.
#[derive(Debug)]
pub struct IndexInitCache {
    buckets: Option<Mutex<LruCache<(String, BucketKey), HashSet<(String, String)>>>>,
}

impl IndexInitCache {
    /// Cache holding up to `capacity` bucket records
    pub fn new(capacity: usize) -> Self {
        Self {
            buckets: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    /// Process-wide cache; the first caller decides its capacity
    pub fn global(capacity: usize) -> Arc<Self> {
        INDEX_INIT_CACHE
            .get_or_init(|| Arc::new(Self::new(capacity)))
            .clone()
    }

    fn slot(table: &str, key: &BucketKey) -> (String, BucketKey) {
        (table.to_string(), key.clone())
    }

    /// Check if `{field}.{value}` is known to exist in the bucket
    pub fn contains(&self, table: &str, key: &BucketKey, field: &str, value: &str) -> bool {
        let Some(buckets) = &self.buckets else {
            return false;
        };
        let Ok(mut buckets) = buckets.lock() else {
            return false;
        };
        buckets
            .get(&Self::slot(table, key))
            .is_some_and(|entries| entries.contains(&(field.to_string(), value.to_string())))
    }

    /// Remember entries the store confirmed
    pub fn record<'a>(
        &self,
        table: &str,
        key: &BucketKey,
        entries: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) {
        let Some(buckets) = &self.buckets else {
            return;
        };
        let Ok(mut buckets) = buckets.lock() else {
            return;
        };
        let slot = buckets.get_or_insert_mut(Self::slot(table, key), HashSet::new);
        slot.extend(
            entries
                .into_iter()
                .map(|(field, value)| (field.to_string(), value.to_string())),
        );
    }

    /// Drop everything known about a bucket record
    pub fn forget(&self, table: &str, key: &BucketKey) {
        if let Some(Ok(mut buckets)) = self.buckets.as_ref().map(Mutex::lock) {
            let _ = buckets.pop(&Self::slot(table, key));
        }
    }
}

/// Existence, capacity, creation and index initialization of bucket records
#[derive(Debug, Clone)]
pub struct BucketLifecycle {
    store: Arc<dyn BucketStore>,
    config: Arc<BucketConfig>,
    cache: Arc<IndexInitCache>,
}

impl BucketLifecycle {
    /// Lifecycle manager sharing the process-wide index cache
    pub fn new(store: Arc<dyn BucketStore>, config: Arc<BucketConfig>) -> Self {
        let cache = IndexInitCache::global(config.index_cache_capacity);
        Self::with_cache(store, config, cache)
    }

    /// Lifecycle manager over an explicit cache
    pub fn with_cache(
        store: Arc<dyn BucketStore>,
        config: Arc<BucketConfig>,
        cache: Arc<IndexInitCache>,
    ) -> Self {
        Self {
            store,
            config,
            cache,
        }
    }

    async fn item_count(&self, key: &BucketKey) -> Result<Option<i64>, Error> {
        let projection = [AttributePath::new(KEY_ITEM_COUNT)];
        match self.store.get_item(key, &projection).await {
            Ok(Some(record)) => Ok(Some(
                record
                    .get(KEY_ITEM_COUNT)
                    .and_then(number_of)
                    .map(|count| count as i64)
                    .unwrap_or(0),
            )),
            Ok(None) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Check if the bucket record exists
    pub async fn is_bucket_exist(&self, key: &BucketKey) -> Result<bool, Error> {
        Ok(self.item_count(key).await?.is_some())
    }

    /// Check if the bucket record holds its maximum item count
    pub async fn is_bucket_full(&self, key: &BucketKey) -> Result<bool, Error> {
        let max = self.config.max_bucket_item_count as i64;
        Ok(self.item_count(key).await?.is_some_and(|count| count >= max))
    }

    /// Create an empty bucket record
    ///
    /// Returns `true` when this call created it and `false` when it already
    /// existed; both leave exactly one initialized record in place.
    pub async fn create_bucket(&self, key: &BucketKey) -> Result<bool, Error> {
        let mut attributes: Record = HashMap::with_capacity(self.config.shard_count() + 1);
        let _ = attributes.insert(KEY_ITEM_COUNT.to_string(), AttributeValue::N("0".into()));
        for shard in 0..self.config.shard_count() {
            let _ = attributes.insert(shard_column(shard), AttributeValue::M(HashMap::new()));
        }

        let condition = Condition::NotExists(AttributePath::new(KEY_BUCKET_ID));
        match self.store.put_item(key, attributes, Some(condition)).await {
            Ok(()) => {
                // A recreated record starts without index entries.
                self.cache.forget(&self.config.table_name, key);
                debug!(bucket = %key, "created bucket");
                Ok(true)
            }
            Err(e) if e.is_conditional_check_failed() => {
                debug!(bucket = %key, "bucket already exists");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Make sure `{field}` and `{field}.{value}` maps exist for every indexable pair
    ///
    /// Fails with [`Error::ConditionalCheckFailed`] when the bucket record does not exist.
    pub async fn init_index(
        &self,
        key: &BucketKey,
        index_collection: &IndexCollection,
    ) -> Result<(), Error> {
        let table = self.config.table_name.as_str();
        let pending: Vec<(&str, &str)> = index_collection
            .indexable_pairs()
            .filter(|(field, value)| !self.cache.contains(table, key, field, value))
            .collect();

        if pending.is_empty() {
            return Ok(());
        }

        let mut fields: Vec<&str> = pending.iter().map(|(field, _)| *field).collect();
        fields.dedup();

        // A field map and its children can not be set in one expression.
        let bucket_exists = Condition::Exists(AttributePath::new(KEY_BUCKET_ID));
        let mut field_maps = UpdateRequest::new(key.clone()).with_condition(bucket_exists.clone());
        for field in &fields {
            let _ = field_maps
                .set_if_not_exists(AttributePath::new(*field), AttributeValue::M(HashMap::new()));
        }
        self.store.update_item(field_maps).await?;

        let mut value_maps = UpdateRequest::new(key.clone()).with_condition(bucket_exists);
        for (field, value) in &pending {
            let _ = value_maps.set_if_not_exists(
                AttributePath::new(*field).child(*value),
                AttributeValue::M(HashMap::new()),
            );
        }
        self.store.update_item(value_maps).await?;

        debug!(bucket = %key, entries = pending.len(), "initialized index entries");
        self.cache.record(table, key, pending);
        Ok(())
    }
}
