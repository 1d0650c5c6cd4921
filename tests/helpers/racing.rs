//! In-memory store with a competing writer that strikes before a chosen update

use async_trait::async_trait;
use dynamo_bucket::store::{AttributePath, Condition, Record, UpdateRequest};
use dynamo_bucket::{BucketKey, BucketStore, BucketWindow, Error, MemoryBucketStore};
use std::sync::{Arc, Mutex};

/// Rival update and the number of updates to let through before it
type Pending = Option<(usize, UpdateRequest)>;

/// Wraps a [`MemoryBucketStore`], applying a queued rival update first
#[derive(Clone, Debug, Default)]
pub struct RacingStore {
    inner: MemoryBucketStore,
    rival: Arc<Mutex<Pending>>,
}

impl RacingStore {
    /// Racing store over a fresh in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Underlying store, for inspecting records
    pub fn inner(&self) -> &MemoryBucketStore {
        &self.inner
    }

    /// Apply `rival` right before the update that follows `skip` others
    pub fn race_update(&self, skip: usize, rival: UpdateRequest) {
        *self.rival.lock().unwrap() = Some((skip, rival));
    }

    fn due_rival(&self) -> Option<UpdateRequest> {
        let mut pending = self.rival.lock().unwrap();
        if matches!(pending.as_ref(), Some((0, _))) {
            return pending.take().map(|(_, rival)| rival);
        }
        if let Some((skip, _)) = pending.as_mut() {
            *skip -= 1;
        }
        None
    }
}

#[async_trait]
impl BucketStore for RacingStore {
    async fn get_item(
        &self,
        key: &BucketKey,
        projection: &[AttributePath],
    ) -> Result<Option<Record>, Error> {
        self.inner.get_item(key, projection).await
    }

    async fn query(
        &self,
        bucket_id: &str,
        start: &BucketWindow,
        end: &BucketWindow,
        projection: &[AttributePath],
        descending: bool,
    ) -> Result<Vec<Record>, Error> {
        self.inner
            .query(bucket_id, start, end, projection, descending)
            .await
    }

    async fn update_item(&self, request: UpdateRequest) -> Result<(), Error> {
        if let Some(rival) = self.due_rival() {
            self.inner.update_item(rival).await?;
        }
        self.inner.update_item(request).await
    }

    async fn put_item(
        &self,
        key: &BucketKey,
        attributes: Record,
        condition: Option<Condition>,
    ) -> Result<(), Error> {
        self.inner.put_item(key, attributes, condition).await
    }
}
