use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{
    BucketItem, KEY_BIZ_ID, KEY_ITEM_COUNT, KEY_ITEM_VERSION, index_values, is_empty_index_value,
    item_path, marker_path,
};
use crate::config::BucketConfig;
use crate::error::Error;
use crate::store::{AttributePath, BucketStore, Condition, Record, UpdateRequest};

/// Writes of items into bucket records, index markers included
#[derive(Debug, Clone)]
pub struct ItemMutator {
    store: Arc<dyn BucketStore>,
    config: Arc<BucketConfig>,
}

fn marker() -> AttributeValue {
    AttributeValue::N("1".into())
}

impl ItemMutator {
    /// Mutator over a store
    pub fn new(store: Arc<dyn BucketStore>, config: Arc<BucketConfig>) -> Self {
        Self { store, config }
    }

    fn slot(&self, item: &BucketItem) -> AttributePath {
        item_path(&item.item_id, self.config.shard_count())
    }

    /// Insert a new item into a bucket that still has room
    ///
    /// Index value maps must already exist. Fails with [`Error::BucketFull`]
    /// when the bucket reached its capacity.
    pub async fn insert(&self, item: &BucketItem) -> Result<(), Error> {
        let mut stored = item.attributes.clone();
        let _ = stored.insert(KEY_BIZ_ID.to_string(), AttributeValue::S(item.biz_id.clone()));
        let _ = stored.insert(KEY_ITEM_VERSION.to_string(), AttributeValue::N("1".into()));
        let ttl = stored.get(&self.config.ttl_attribute).cloned();

        let capacity = AttributeValue::N(self.config.max_bucket_item_count.to_string());
        let mut request = UpdateRequest::new(item.key.clone())
            .with_condition(Condition::LessThan(AttributePath::new(KEY_ITEM_COUNT), capacity));
        let _ = request
            .set(self.slot(item), AttributeValue::M(stored))
            .increment(AttributePath::new(KEY_ITEM_COUNT), 1);

        if let Some(index_collection) = &item.index_collection {
            for (field, value) in index_collection.indexable_pairs() {
                let _ = request.set(marker_path(field, value, &item.item_id), marker());
            }
        }
        if let Some(ttl) = ttl {
            let _ = request.set(AttributePath::new(self.config.ttl_attribute.as_str()), ttl);
        }

        match self.store.update_item(request).await {
            Ok(()) => {
                debug!(bucket = %item.key, item_id = %item.item_id, "inserted item");
                Ok(())
            }
            Err(e) if e.is_conditional_check_failed() => Err(Error::BucketFull(item.key.clone())),
            Err(e) => Err(e),
        }
    }

    async fn read_slot(&self, item: &BucketItem) -> Result<Option<Record>, Error> {
        let slot = self.slot(item);
        let Some(record) = self.store.get_item(&item.key, std::slice::from_ref(&slot)).await? else {
            return Ok(None);
        };

        let stored = record
            .get(slot.root())
            .and_then(|shard| shard.as_m().ok())
            .and_then(|shard| shard.get(&item.item_id))
            .and_then(|value| value.as_m().ok())
            .filter(|attributes| attributes.contains_key(KEY_BIZ_ID))
            .cloned();
        Ok(stored)
    }

    fn not_found(item: &BucketItem) -> Error {
        Error::ItemNotFound {
            bucket_id: item.key.bucket_id.clone(),
            window: item.key.window.to_string(),
            item_id: item.item_id.clone(),
        }
    }

    /// Overwrite the given attributes of a stored item and move its index markers
    ///
    /// Attributes absent from `item` are left untouched. Markers are diffed
    /// against the stored values, so value maps for new values must exist.
    pub async fn update(&self, item: &BucketItem) -> Result<(), Error> {
        let Some(current) = self.read_slot(item).await? else {
            return Err(Self::not_found(item));
        };
        let version = current
            .get(KEY_ITEM_VERSION)
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse::<i64>().ok());

        let slot = self.slot(item);
        let version_path = slot.clone().child(KEY_ITEM_VERSION);
        let version_condition = match version {
            Some(version) => Condition::Equals(
                version_path.clone(),
                AttributeValue::N(version.to_string()),
            ),
            None => Condition::NotExists(version_path.clone()),
        };
        let mut request = UpdateRequest::new(item.key.clone()).with_condition(Condition::And(vec![
            Condition::Exists(slot.clone().child(KEY_BIZ_ID)),
            version_condition,
        ]));

        for (name, value) in &item.attributes {
            if name == KEY_ITEM_VERSION || name == KEY_BIZ_ID || matches!(value, AttributeValue::Null(_)) {
                continue;
            }
            let _ = request.set(slot.clone().child(name.as_str()), value.clone());
        }
        let _ = request
            .set(
                slot.clone().child(KEY_BIZ_ID),
                AttributeValue::S(item.biz_id.clone()),
            )
            .set(
                version_path,
                AttributeValue::N((version.unwrap_or(0) + 1).to_string()),
            );

        if let Some(index_collection) = &item.index_collection {
            for (field, index) in index_collection.iter() {
                let wanted: BTreeSet<&str> = index.indexable_values().collect();
                let stored_values: Vec<String> =
                    current.get(field).map(index_values).unwrap_or_default();
                let stored: BTreeSet<&str> = stored_values
                    .iter()
                    .map(String::as_str)
                    .filter(|value| !is_empty_index_value(value))
                    .collect();

                for value in stored.difference(&wanted) {
                    let _ = request.remove(marker_path(field, value, &item.item_id));
                }
                for value in wanted.difference(&stored) {
                    let _ = request.set(marker_path(field, value, &item.item_id), marker());
                }
            }
        }

        match self.store.update_item(request).await {
            Ok(()) => {
                debug!(bucket = %item.key, item_id = %item.item_id, "updated item");
                Ok(())
            }
            Err(e) if e.is_conditional_check_failed() => {
                if self.read_slot(item).await?.is_none() {
                    Err(Self::not_found(item))
                } else {
                    warn!(bucket = %item.key, item_id = %item.item_id, "item changed during update");
                    Err(Error::UpdateConflict {
                        item_id: item.item_id.clone(),
                    })
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Clear a stored item and retract its index markers
    ///
    /// Returns `false` without changing anything when the item is not stored.
    pub async fn delete(&self, item: &BucketItem) -> Result<bool, Error> {
        let slot = self.slot(item);
        let mut request = UpdateRequest::new(item.key.clone())
            .with_condition(Condition::Exists(slot.clone().child(KEY_BIZ_ID)));
        let _ = request
            .set(slot, AttributeValue::M(Record::new()))
            .increment(AttributePath::new(KEY_ITEM_COUNT), -1);

        if let Some(index_collection) = &item.index_collection {
            for (field, value) in index_collection.indexable_pairs() {
                let _ = request.remove(marker_path(field, value, &item.item_id));
            }
        }

        match self.store.update_item(request).await {
            Ok(()) => {
                debug!(bucket = %item.key, item_id = %item.item_id, "deleted item");
                Ok(true)
            }
            Err(e) if e.is_conditional_check_failed() => {
                debug!(bucket = %item.key, item_id = %item.item_id, "item already absent");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
