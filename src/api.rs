use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::bucket::{
    BucketItem, BucketKey, BucketLifecycle, BucketWindow, DataQueryParam, ItemMutator,
    QueryFetcher, QueryPlanner,
};
use crate::config::BucketConfig;
use crate::error::Error;
use crate::schema::{BucketRecord, BucketSchema};
use crate::setup;
use crate::store::{BucketStore, DynamoBucketStore};

const BIZ_ID_SEPARATOR: char = '-';
const BIZ_ID_PREFIX_LEN: usize = 5;

/// External handle of a stored item: `{prefix}-{bucketId}-{window}-{createdAt}`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BizId {
    prefix: String,
    bucket_id: String,
    window: i64,
    created_at: Option<i64>,
}

impl BizId {
    /// Fresh handle for an item placed in the given window
    pub fn new(bucket_id: impl Into<String>, window: i64) -> Self {
        let ulid = rusty_ulid::generate_ulid_string();
        let prefix = ulid[ulid.len() - BIZ_ID_PREFIX_LEN..].to_ascii_lowercase();
        Self {
            prefix,
            bucket_id: bucket_id.into(),
            window,
            created_at: Some(epoch_seconds()),
        }
    }

    /// Bucket partition
    pub fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    /// Bucket window
    pub fn window(&self) -> i64 {
        self.window
    }

    /// Creation time in epoch seconds, when encoded
    pub fn created_at(&self) -> Option<i64> {
        self.created_at
    }

    /// Bucket record holding the item
    pub fn key(&self) -> BucketKey {
        BucketKey::new(self.bucket_id.clone(), BucketWindow::Number(self.window))
    }
}

impl FromStr for BizId {
    type Err = Error;

    fn from_str(biz_id: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidBizId(biz_id.to_string());
        let parts: Vec<&str> = biz_id.split(BIZ_ID_SEPARATOR).collect();
        if !(3..=4).contains(&parts.len()) || parts[1].is_empty() {
            return Err(invalid());
        }

        let window = parts[2].parse().map_err(|_| invalid())?;
        let created_at = match parts.get(3) {
            Some(created_at) => Some(created_at.parse().map_err(|_| invalid())?),
            None => None,
        };
        Ok(Self {
            prefix: parts[0].to_string(),
            bucket_id: parts[1].to_string(),
            window,
            created_at,
        })
    }
}

impl fmt::Display for BizId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.prefix, self.bucket_id, self.window)?;
        if let Some(created_at) = self.created_at {
            write!(f, "-{}", created_at)?;
        }
        Ok(())
    }
}

fn epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

/// Typed bucket table for one record type
pub struct Bucket<T> {
    config: Arc<BucketConfig>,
    schema: BucketSchema,
    lifecycle: BucketLifecycle,
    mutator: ItemMutator,
    fetcher: QueryFetcher,
    planner: QueryPlanner,
    _record: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for Bucket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("table_name", &self.config.table_name)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl<T: BucketRecord> Bucket<T> {
    /// Bucket over any store
    pub fn new(store: Arc<dyn BucketStore>, config: BucketConfig) -> Result<Self, Error> {
        let schema = BucketSchema::of::<T>()?;
        let config = Arc::new(config);
        Ok(Self {
            lifecycle: BucketLifecycle::new(store.clone(), config.clone()),
            mutator: ItemMutator::new(store.clone(), config.clone()),
            fetcher: QueryFetcher::new(store.clone(), config.clone()),
            planner: QueryPlanner::new(store, config.clone()),
            config,
            schema,
            _record: PhantomData,
        })
    }

    /// Bucket over DynamoDB through the global client, creating `bucket-{TABLE}` when missing
    pub async fn dynamodb() -> Result<Self, Error> {
        let config = BucketConfig::for_table(T::TABLE);
        let _ = setup::bucket_table_global(&config.table_name).await?;
        let store = DynamoBucketStore::from_global(config.table_name.clone()).await;
        Self::new(Arc::new(store), config)
    }

    /// Configuration in use
    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    /// Schema of the record type
    pub fn schema(&self) -> &BucketSchema {
        &self.schema
    }

    fn window_of(&self, timestamp: i64) -> i64 {
        timestamp.max(0) / self.config.window_seconds
    }

    /// Store a new record and return its biz id
    ///
    /// The record goes to the window of its timestamp, or a later one when
    /// that window is full.
    pub async fn add(&self, item: &T) -> Result<String, Error> {
        let attributes = self.schema.to_attributes(item)?;
        let hash_key = self.schema.hash_key(&attributes).ok_or(Error::MissingHashKey)?;
        let range_key = self.schema.range_key(&attributes);
        let item_id = BucketSchema::item_id(&hash_key, range_key.as_deref());

        let bucket_id = self.schema.bucket_id(&attributes).unwrap_or(hash_key);
        if bucket_id.contains(BIZ_ID_SEPARATOR) {
            return Err(Error::InvalidBucketId(bucket_id));
        }

        let timestamp = self.schema.timestamp(&attributes).unwrap_or_else(epoch_seconds);
        let index_collection = self.schema.index_collection(&attributes);
        let mut window = self.window_of(timestamp);

        loop {
            let key = BucketKey::new(bucket_id.clone(), BucketWindow::Number(window));
            if !self.lifecycle.is_bucket_exist(&key).await? {
                let _ = self.lifecycle.create_bucket(&key).await?;
            } else if self.lifecycle.is_bucket_full(&key).await? {
                debug!(bucket = %key, "bucket is full, trying the next window");
                window += 1;
                continue;
            }

            self.lifecycle.init_index(&key, &index_collection).await?;

            let biz_id = BizId::new(bucket_id.clone(), window).to_string();
            let bucket_item = BucketItem::new(key, item_id.clone(), biz_id.clone(), attributes.clone())
                .with_index_collection(index_collection.clone());

            match self.mutator.insert(&bucket_item).await {
                Ok(()) => return Ok(biz_id),
                Err(Error::BucketFull(key)) => {
                    debug!(bucket = %key, "bucket filled up concurrently, trying the next window");
                    window += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Overwrite a stored record in place, moving its index markers
    pub async fn update(&self, biz_id: &str, item: &T) -> Result<(), Error> {
        let key = biz_id.parse::<BizId>()?.key();
        let attributes = self.schema.to_attributes(item)?;
        let hash_key = self.schema.hash_key(&attributes).ok_or(Error::MissingHashKey)?;
        let range_key = self.schema.range_key(&attributes);
        let item_id = BucketSchema::item_id(&hash_key, range_key.as_deref());

        let index_collection = self.schema.index_collection(&attributes);
        match self.lifecycle.init_index(&key, &index_collection).await {
            Ok(()) => {}
            Err(e) if e.is_conditional_check_failed() => {
                return Err(Error::ItemNotFound {
                    bucket_id: key.bucket_id,
                    window: key.window.to_string(),
                    item_id,
                });
            }
            Err(e) => return Err(e),
        }

        let bucket_item = BucketItem::new(key, item_id, biz_id, attributes)
            .with_index_collection(index_collection);
        self.mutator.update(&bucket_item).await
    }

    /// Remove a stored record; `false` when it was not stored
    pub async fn delete(
        &self,
        biz_id: &str,
        hash_key: &str,
        range_key: Option<&str>,
    ) -> Result<bool, Error> {
        let key = biz_id.parse::<BizId>()?.key();
        let item_id = BucketSchema::item_id(hash_key, range_key);

        let Some(stored) = self.fetcher.fetch_one(&key, &item_id).await? else {
            debug!(bucket = %key, item_id = %item_id, "nothing to delete");
            return Ok(false);
        };
        let index_collection = self.schema.index_collection(&stored.attributes);
        self.mutator
            .delete(&stored.with_index_collection(index_collection))
            .await
    }

    /// Read one stored record
    pub async fn query_one(
        &self,
        biz_id: &str,
        hash_key: &str,
        range_key: Option<&str>,
    ) -> Result<Option<T>, Error> {
        let key = biz_id.parse::<BizId>()?.key();
        let item_id = BucketSchema::item_id(hash_key, range_key);
        self.fetcher
            .fetch_one(&key, &item_id)
            .await?
            .map(|item| self.schema.from_attributes(item.attributes))
            .transpose()
    }

    /// Records matching the query expressions, newest window first, positions `[from, to)`
    ///
    /// `latest` resumes after a previously returned record: partitions before
    /// its bucket id and windows after its timestamp are skipped.
    pub async fn query(&self, param: &DataQueryParam, latest: Option<&T>) -> Result<Vec<T>, Error> {
        if param.is_empty_page() {
            return Ok(Vec::new());
        }

        let mut bucket_ids = self.schema.query_bucket_ids(param);
        let (min_timestamp, mut max_timestamp) = self.schema.query_timestamp_range(param);

        if let Some(latest) = latest {
            let attributes = self.schema.to_attributes(latest)?;
            if let Some(latest_bucket) = self.schema.bucket_id(&attributes) {
                bucket_ids.retain(|bucket_id| bucket_id >= &latest_bucket);
            }
            if let Some(timestamp) = self.schema.timestamp(&attributes) {
                max_timestamp = max_timestamp.min(timestamp);
            }
        }

        if bucket_ids.is_empty() || max_timestamp < min_timestamp {
            return Ok(Vec::new());
        }

        let start = BucketWindow::Number(self.window_of(min_timestamp));
        let end = BucketWindow::Number(self.window_of(max_timestamp));
        let index_collection = self.schema.query_index_collection(param);
        let index = (!index_collection.is_empty()).then_some(&index_collection);

        let items = self
            .planner
            .query(&bucket_ids, &start, &end, index, param)
            .await?;
        debug!(count = items.len(), "query finished");

        items
            .into_iter()
            .map(|item| self.schema.from_attributes(item.attributes))
            .collect()
    }
}
