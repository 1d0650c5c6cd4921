use std::sync::Arc;
use tracing::debug;

use super::predicate::PredicateSet;
use super::types::{BucketItem, BucketKey, DataQueryParam, is_shard_column, item_path, shard_column};
use crate::config::BucketConfig;
use crate::error::Error;
use crate::store::{AttributePath, BucketStore, Record};

/// Reads of items out of one bucket record
#[derive(Debug, Clone)]
pub struct QueryFetcher {
    store: Arc<dyn BucketStore>,
    config: Arc<BucketConfig>,
}

impl QueryFetcher {
    /// Fetcher over a store
    pub fn new(store: Arc<dyn BucketStore>, config: Arc<BucketConfig>) -> Self {
        Self { store, config }
    }

    /// Every item of a bucket that satisfies the query expressions
    pub async fn fetch(&self, key: &BucketKey, param: &DataQueryParam) -> Result<Vec<BucketItem>, Error> {
        self.fetch_matching(key, &PredicateSet::from_param(param)).await
    }

    /// Items with the given ids that satisfy the query expressions
    pub async fn fetch_ids(
        &self,
        key: &BucketKey,
        item_ids: &[String],
        param: &DataQueryParam,
    ) -> Result<Vec<BucketItem>, Error> {
        self.fetch_ids_matching(key, item_ids, &PredicateSet::from_param(param))
            .await
    }

    /// Full read of a bucket, filtered by pre-parsed predicates
    pub async fn fetch_matching(
        &self,
        key: &BucketKey,
        predicates: &PredicateSet,
    ) -> Result<Vec<BucketItem>, Error> {
        let projection: Vec<AttributePath> = (0..self.config.shard_count())
            .map(|shard| AttributePath::new(shard_column(shard)))
            .collect();

        let record = match self.store.get_item(key, &projection).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        let Some(record) = record else {
            return Ok(Vec::new());
        };

        let mut items = parse_record(key, &record);
        items.retain(|item| predicates.matches(&item.attributes));
        items.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        debug!(bucket = %key, count = items.len(), "fetched bucket");
        Ok(items)
    }

    /// Targeted read of some item ids, in chunks, filtered by pre-parsed predicates
    pub async fn fetch_ids_matching(
        &self,
        key: &BucketKey,
        item_ids: &[String],
        predicates: &PredicateSet,
    ) -> Result<Vec<BucketItem>, Error> {
        let mut items = Vec::with_capacity(item_ids.len());

        for chunk in item_ids.chunks(self.config.fetch_chunk_size.max(1)) {
            let projection: Vec<AttributePath> = chunk
                .iter()
                .map(|item_id| item_path(item_id, self.config.shard_count()))
                .collect();

            let record = match self.store.get_item(key, &projection).await {
                Ok(record) => record,
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            };
            if let Some(record) = record {
                items.extend(
                    parse_record(key, &record)
                        .into_iter()
                        .filter(|item| predicates.matches(&item.attributes)),
                );
            }
        }

        items.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        debug!(bucket = %key, requested = item_ids.len(), count = items.len(), "fetched items");
        Ok(items)
    }

    /// One item by id, without any filtering
    pub async fn fetch_one(&self, key: &BucketKey, item_id: &str) -> Result<Option<BucketItem>, Error> {
        let projection = [item_path(item_id, self.config.shard_count())];
        let record = match self.store.get_item(key, &projection).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        Ok(record
            .map(|record| parse_record(key, &record))
            .and_then(|items| items.into_iter().find(|item| item.item_id == item_id)))
    }
}

/// Live items held by the shard columns of a record
fn parse_record(key: &BucketKey, record: &Record) -> Vec<BucketItem> {
    record
        .iter()
        .filter(|(name, _)| is_shard_column(name))
        .filter_map(|(_, shard)| shard.as_m().ok())
        .flat_map(|shard| shard.iter())
        .filter_map(|(item_id, slot)| BucketItem::from_slot(key, item_id, slot))
        .collect()
}
