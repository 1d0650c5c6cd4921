use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{AttributePath, BucketStore, Condition, Record, SetAction, UpdateRequest, number_of};
use crate::bucket::{BucketKey, BucketWindow};
use crate::error::Error;

/// In-process bucket table with the same write semantics as DynamoDB
///
/// Updates are atomic: a failed condition or an unresolvable document path
/// leaves the record untouched. Nested `SET`s require the parent map to
/// exist, just like the real service.
#[derive(Clone, Debug, Default)]
pub struct MemoryBucketStore {
    records: Arc<RwLock<BTreeMap<BucketKey, Record>>>,
}

impl MemoryBucketStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored bucket records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Check if no bucket record is stored
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Full copy of a stored record, key attributes included
    pub async fn snapshot(&self, key: &BucketKey) -> Option<Record> {
        self.records.read().await.get(key).cloned()
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn get_item(
        &self,
        key: &BucketKey,
        projection: &[AttributePath],
    ) -> Result<Option<Record>, Error> {
        let records = self.records.read().await;
        Ok(records.get(key).map(|record| project(record, projection)))
    }

    async fn query(
        &self,
        bucket_id: &str,
        start: &BucketWindow,
        end: &BucketWindow,
        projection: &[AttributePath],
        descending: bool,
    ) -> Result<Vec<Record>, Error> {
        if start > end {
            return Ok(Vec::new());
        }

        let lower = BucketKey::new(bucket_id, start.clone());
        let upper = BucketKey::new(bucket_id, end.clone());
        let records = self.records.read().await;

        let mut found: Vec<Record> = records
            .range((Bound::Included(lower), Bound::Included(upper)))
            .map(|(key, record)| {
                let mut projected = project(record, projection);
                projected.extend(key.to_key_map());
                projected
            })
            .collect();

        if descending {
            found.reverse();
        }
        Ok(found)
    }

    async fn update_item(&self, request: UpdateRequest) -> Result<(), Error> {
        let mut records = self.records.write().await;
        let mut record = records.get(&request.key).cloned().unwrap_or_default();

        if let Some(condition) = &request.condition {
            if !evaluate(&record, condition) {
                return Err(Error::ConditionalCheckFailed);
            }
        }

        for action in &request.sets {
            match action {
                SetAction::Assign(path, value) => set_path(&mut record, path, value.clone())?,
                SetAction::AssignIfNotExists(path, value) => {
                    if get_path(&record, path).is_none() {
                        set_path(&mut record, path, value.clone())?;
                    }
                }
                SetAction::Increment(path, delta) => {
                    let current = get_path(&record, path)
                        .and_then(number_of)
                        .ok_or_else(|| Error::InvalidDocumentPath(path.to_string()))?;
                    let next = current as i64 + delta;
                    set_path(&mut record, path, AttributeValue::N(next.to_string()))?;
                }
            }
        }

        for path in &request.removes {
            remove_path(&mut record, path)?;
        }

        record.extend(request.key.to_key_map());
        let _ = records.insert(request.key, record);
        Ok(())
    }

    async fn put_item(
        &self,
        key: &BucketKey,
        attributes: Record,
        condition: Option<Condition>,
    ) -> Result<(), Error> {
        let mut records = self.records.write().await;

        if let Some(condition) = &condition {
            let empty = Record::new();
            let current = records.get(key).unwrap_or(&empty);
            if !evaluate(current, condition) {
                return Err(Error::ConditionalCheckFailed);
            }
        }

        let mut record = attributes;
        record.extend(key.to_key_map());
        let _ = records.insert(key.clone(), record);
        Ok(())
    }
}

fn get_path<'a>(record: &'a Record, path: &AttributePath) -> Option<&'a AttributeValue> {
    let (first, rest) = path.segments().split_first()?;
    let mut current = record.get(first)?;
    for segment in rest {
        current = current.as_m().ok()?.get(segment)?;
    }
    Some(current)
}

fn set_path(record: &mut Record, path: &AttributePath, value: AttributeValue) -> Result<(), Error> {
    let invalid = || Error::InvalidDocumentPath(path.to_string());
    let Some((last, parents)) = path.segments().split_last() else {
        return Err(invalid());
    };

    let mut map = record;
    for segment in parents {
        map = match map.get_mut(segment) {
            Some(AttributeValue::M(child)) => child,
            _ => return Err(invalid()),
        };
    }
    let _ = map.insert(last.clone(), value);
    Ok(())
}

/// Removing an absent leaf is fine, a missing parent map is not
fn remove_path(record: &mut Record, path: &AttributePath) -> Result<(), Error> {
    let invalid = || Error::InvalidDocumentPath(path.to_string());
    let Some((last, parents)) = path.segments().split_last() else {
        return Err(invalid());
    };

    let mut map = record;
    for segment in parents {
        map = match map.get_mut(segment) {
            Some(AttributeValue::M(child)) => child,
            _ => return Err(invalid()),
        };
    }
    let _ = map.remove(last);
    Ok(())
}

/// Copy of the projected paths, nested maps rebuilt along the way
fn project(record: &Record, projection: &[AttributePath]) -> Record {
    if projection.is_empty() {
        return record.clone();
    }

    let mut projected = Record::new();
    for path in projection {
        if let Some(value) = get_path(record, path) {
            insert_at(&mut projected, path.segments(), value.clone());
        }
    }
    projected
}

fn insert_at(map: &mut Record, segments: &[String], value: AttributeValue) {
    match segments {
        [] => {}
        [last] => {
            let _ = map.insert(last.clone(), value);
        }
        [first, rest @ ..] => {
            let entry = map
                .entry(first.clone())
                .or_insert_with(|| AttributeValue::M(HashMap::new()));
            if let AttributeValue::M(child) = entry {
                insert_at(child, rest, value);
            }
        }
    }
}

fn evaluate(record: &Record, condition: &Condition) -> bool {
    match condition {
        Condition::Exists(path) => get_path(record, path).is_some(),
        Condition::NotExists(path) => get_path(record, path).is_none(),
        Condition::Equals(path, expected) => get_path(record, path)
            .is_some_and(|actual| compare(actual, expected) == Some(Ordering::Equal)),
        Condition::LessThan(path, bound) => get_path(record, path)
            .is_some_and(|actual| compare(actual, bound) == Some(Ordering::Less)),
        Condition::And(conditions) => conditions.iter().all(|c| evaluate(record, c)),
    }
}

fn compare(left: &AttributeValue, right: &AttributeValue) -> Option<Ordering> {
    match (left, right) {
        (AttributeValue::N(_), AttributeValue::N(_)) => {
            number_of(left)?.partial_cmp(&number_of(right)?)
        }
        (AttributeValue::S(a), AttributeValue::S(b)) => Some(a.cmp(b)),
        _ => (left == right).then_some(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> BucketKey {
        BucketKey::new("1", 100)
    }

    fn empty_map() -> AttributeValue {
        AttributeValue::M(HashMap::new())
    }

    #[tokio::test]
    async fn test_nested_set_requires_parent() {
        let store = MemoryBucketStore::new();
        let mut request = UpdateRequest::new(key());
        let _ = request.set(
            AttributePath::new("tags").child("PERSON"),
            AttributeValue::N("1".into()),
        );

        let err = store.update_item(request).await.unwrap_err();
        assert!(matches!(err, Error::InvalidDocumentPath(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_update_is_atomic() {
        let store = MemoryBucketStore::new();
        let mut attributes = Record::new();
        let _ = attributes.insert("item_count".into(), AttributeValue::N("0".into()));
        store.put_item(&key(), attributes, None).await.unwrap();

        let mut request = UpdateRequest::new(key());
        let _ = request
            .increment(AttributePath::new("item_count"), 1)
            .set(AttributePath::new("missing").child("x"), empty_map());
        assert!(store.update_item(request).await.is_err());

        let record = store.snapshot(&key()).await.unwrap();
        assert_eq!(record["item_count"], AttributeValue::N("0".into()));
    }

    #[tokio::test]
    async fn test_nested_remove_requires_parent() {
        let store = MemoryBucketStore::new();
        let mut attributes = Record::new();
        let _ = attributes.insert("item_count".into(), AttributeValue::N("1".into()));
        let _ = attributes.insert("tags".into(), empty_map());
        store.put_item(&key(), attributes, None).await.unwrap();

        let mut absent_leaf = UpdateRequest::new(key());
        let _ = absent_leaf
            .remove(AttributePath::new("tags").child("PERSON"))
            .remove(AttributePath::new("never_set"));
        store.update_item(absent_leaf).await.unwrap();

        let mut missing_parent = UpdateRequest::new(key());
        let _ = missing_parent
            .increment(AttributePath::new("item_count"), -1)
            .remove(AttributePath::new("tags").child("PERSON").child("a"));
        let err = store.update_item(missing_parent).await.unwrap_err();
        assert!(matches!(err, Error::InvalidDocumentPath(ref path) if path.contains("PERSON")));

        let record = store.snapshot(&key()).await.unwrap();
        assert_eq!(record["item_count"], AttributeValue::N("1".into()));
    }

    #[tokio::test]
    async fn test_conditions() {
        let store = MemoryBucketStore::new();
        let mut attributes = Record::new();
        let _ = attributes.insert("item_count".into(), AttributeValue::N("63".into()));
        store
            .put_item(
                &key(),
                attributes.clone(),
                Some(Condition::NotExists(AttributePath::new("bucket_id"))),
            )
            .await
            .unwrap();

        let err = store
            .put_item(
                &key(),
                attributes,
                Some(Condition::NotExists(AttributePath::new("bucket_id"))),
            )
            .await
            .unwrap_err();
        assert!(err.is_conditional_check_failed());

        let capacity = Condition::LessThan(
            AttributePath::new("item_count"),
            AttributeValue::N("64".into()),
        );
        let mut request = UpdateRequest::new(key()).with_condition(capacity.clone());
        let _ = request.increment(AttributePath::new("item_count"), 1);
        store.update_item(request).await.unwrap();

        let mut request = UpdateRequest::new(key()).with_condition(capacity);
        let _ = request.increment(AttributePath::new("item_count"), 1);
        assert!(matches!(
            store.update_item(request).await,
            Err(Error::ConditionalCheckFailed)
        ));
    }

    #[tokio::test]
    async fn test_projection_and_query_order() {
        let store = MemoryBucketStore::new();
        for window in [1, 2, 3] {
            let mut attributes = Record::new();
            let _ = attributes.insert(
                "tags".into(),
                AttributeValue::M(HashMap::from([
                    ("PERSON".to_string(), empty_map()),
                    ("VEHICLE".to_string(), empty_map()),
                ])),
            );
            store
                .put_item(&BucketKey::new("1", window), attributes, None)
                .await
                .unwrap();
        }

        let projection = [AttributePath::new("tags").child("PERSON")];
        let records = store
            .query(
                "1",
                &BucketWindow::Number(2),
                &BucketWindow::Number(3),
                &projection,
                true,
            )
            .await
            .unwrap();

        let windows: Vec<_> = records
            .iter()
            .filter_map(BucketKey::from_record)
            .map(|key| key.window)
            .collect();
        assert_eq!(windows, vec![BucketWindow::Number(3), BucketWindow::Number(2)]);

        let tags = records[0]["tags"].as_m().unwrap();
        assert!(tags.contains_key("PERSON"));
        assert!(!tags.contains_key("VEHICLE"));
    }
}
