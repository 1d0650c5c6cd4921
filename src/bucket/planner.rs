//! Query planning across the windows of one or more bucket partitions.
//!
//! A query walks windows newest first. Without an index every window is read
//! in full. With an index the window records are projected down to the
//! requested `{field}.{value}` maps, the item ids of all of them are
//! intersected, and only surviving ids are fetched. When the requested page
//! is smaller than a bucket, the newest window is probed eagerly since it
//! alone often satisfies the page.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use super::fetcher::QueryFetcher;
use super::predicate::PredicateSet;
use super::types::{BucketItem, BucketKey, BucketWindow, DataQueryParam, IndexCollection, KEY_ITEM_COUNT, page};
use crate::config::BucketConfig;
use crate::error::Error;
use crate::store::{AttributePath, BucketStore, Record};

/// Window-range query execution
#[derive(Debug, Clone)]
pub struct QueryPlanner {
    store: Arc<dyn BucketStore>,
    config: Arc<BucketConfig>,
    fetcher: QueryFetcher,
}

impl QueryPlanner {
    /// Planner over a store
    pub fn new(store: Arc<dyn BucketStore>, config: Arc<BucketConfig>) -> Self {
        let fetcher = QueryFetcher::new(store.clone(), config.clone());
        Self {
            store,
            config,
            fetcher,
        }
    }

    /// Items of one partition within `[start, end]`, positions `[from, to)` of newest-first order
    pub async fn query_bucket(
        &self,
        bucket_id: &str,
        start: &BucketWindow,
        end: &BucketWindow,
        index: Option<&IndexCollection>,
        param: &DataQueryParam,
    ) -> Result<Vec<BucketItem>, Error> {
        self.query(&[bucket_id.to_string()], start, end, index, param).await
    }

    /// Items of several partitions, visited in the given order
    pub async fn query(
        &self,
        bucket_ids: &[String],
        start: &BucketWindow,
        end: &BucketWindow,
        index: Option<&IndexCollection>,
        param: &DataQueryParam,
    ) -> Result<Vec<BucketItem>, Error> {
        if param.is_empty_page() {
            return Ok(Vec::new());
        }

        let predicates = PredicateSet::from_param(param);
        let mut items = Vec::new();
        for bucket_id in bucket_ids {
            if items.len() >= param.to {
                break;
            }
            let want = param.to - items.len();
            items.extend(
                self.collect(bucket_id, start, end, index, &predicates, want)
                    .await?,
            );
        }

        Ok(page(items, param.from, param.to))
    }

    async fn collect(
        &self,
        bucket_id: &str,
        start: &BucketWindow,
        end: &BucketWindow,
        index: Option<&IndexCollection>,
        predicates: &PredicateSet,
        want: usize,
    ) -> Result<Vec<BucketItem>, Error> {
        let mut items = Vec::new();
        let mut probed = None;

        if want < self.config.max_bucket_item_count {
            let key = BucketKey::new(bucket_id, end.clone());
            items = self.fetcher.fetch_matching(&key, predicates).await?;
            if items.len() >= want {
                debug!(bucket = %key, count = items.len(), "newest window satisfied the page");
                return Ok(items);
            }
            probed = Some(end.clone());
        }

        let lookups = index.map(lookup_paths).unwrap_or_default();
        if lookups.is_empty() {
            self.scan_windows(bucket_id, start, end, probed.as_ref(), predicates, want, &mut items)
                .await?;
        } else {
            self.scan_index(bucket_id, start, end, probed.as_ref(), &lookups, predicates, want, &mut items)
                .await?;
        }
        Ok(items)
    }

    #[allow(clippy::too_many_arguments)]
    async fn scan_windows(
        &self,
        bucket_id: &str,
        start: &BucketWindow,
        end: &BucketWindow,
        probed: Option<&BucketWindow>,
        predicates: &PredicateSet,
        want: usize,
        items: &mut Vec<BucketItem>,
    ) -> Result<(), Error> {
        let projection = [AttributePath::new(KEY_ITEM_COUNT)];
        let windows = self.windows(bucket_id, start, end, &projection).await?;

        for record in &windows {
            let Some(key) = BucketKey::from_record(record) else {
                continue;
            };
            if probed == Some(&key.window) {
                continue;
            }
            items.extend(self.fetcher.fetch_matching(&key, predicates).await?);
            if items.len() >= want {
                break;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn scan_index(
        &self,
        bucket_id: &str,
        start: &BucketWindow,
        end: &BucketWindow,
        probed: Option<&BucketWindow>,
        lookups: &[(String, String)],
        predicates: &PredicateSet,
        want: usize,
        items: &mut Vec<BucketItem>,
    ) -> Result<(), Error> {
        let projection: Vec<AttributePath> = lookups
            .iter()
            .map(|(field, value)| AttributePath::new(field.as_str()).child(value.as_str()))
            .collect();
        let windows = self.windows(bucket_id, start, end, &projection).await?;

        let mut candidates: Vec<(BucketKey, Vec<String>)> = Vec::new();
        let mut examined = 0;
        for record in &windows {
            let Some(key) = BucketKey::from_record(record) else {
                continue;
            };
            if probed == Some(&key.window) {
                continue;
            }
            let Some(ids) = intersect_markers(record, lookups) else {
                debug!(bucket = %key, "window lacks a requested index value, skipping");
                continue;
            };
            if ids.is_empty() {
                continue;
            }

            examined += ids.len();
            candidates.push((key, ids.into_iter().collect()));
            if examined >= self.config.scan_max_count {
                debug!(bucket_id, examined, "scan budget reached");
                break;
            }
        }

        // Markers only prove membership; size and range conjuncts on the same field still apply.
        for (key, ids) in &candidates {
            items.extend(self.fetcher.fetch_ids_matching(key, ids, predicates).await?);
            if items.len() >= want {
                break;
            }
        }
        Ok(())
    }

    async fn windows(
        &self,
        bucket_id: &str,
        start: &BucketWindow,
        end: &BucketWindow,
        projection: &[AttributePath],
    ) -> Result<Vec<Record>, Error> {
        match self.store.query(bucket_id, start, end, projection, true).await {
            Ok(records) => Ok(records),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

/// `(field, value)` pairs an index lookup can use
fn lookup_paths(index: &IndexCollection) -> Vec<(String, String)> {
    index
        .indexable_pairs()
        .map(|(field, value)| (field.to_string(), value.to_string()))
        .collect()
}

/// Item ids present under every requested `{field}.{value}` map
///
/// `None` when one of the maps is absent from the window.
fn intersect_markers(record: &Record, lookups: &[(String, String)]) -> Option<BTreeSet<String>> {
    let mut ids: Option<BTreeSet<String>> = None;
    for (field, value) in lookups {
        let markers = record.get(field)?.as_m().ok()?.get(value)?.as_m().ok()?;
        let found: BTreeSet<String> = markers.keys().cloned().collect();
        ids = Some(match ids {
            Some(ids) => ids.intersection(&found).cloned().collect(),
            None => found,
        });
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodb::types::AttributeValue;
    use std::collections::HashMap;

    fn markers(ids: &[&str]) -> AttributeValue {
        AttributeValue::M(
            ids.iter()
                .map(|id| (id.to_string(), AttributeValue::N("1".into())))
                .collect(),
        )
    }

    #[test]
    fn test_intersect_markers() {
        let record = Record::from([
            (
                "tags".to_string(),
                AttributeValue::M(HashMap::from([
                    ("PERSON".to_string(), markers(&["a", "b", "c"])),
                    ("VEHICLE".to_string(), markers(&["b", "c", "d"])),
                ])),
            ),
            (
                "serial_number".to_string(),
                AttributeValue::M(HashMap::from([("sn_01".to_string(), markers(&["c"]))])),
            ),
        ]);

        let both = vec![
            ("tags".to_string(), "PERSON".to_string()),
            ("tags".to_string(), "VEHICLE".to_string()),
        ];
        let ids = intersect_markers(&record, &both).unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["b", "c"]);

        let with_serial = vec![
            ("tags".to_string(), "PERSON".to_string()),
            ("serial_number".to_string(), "sn_01".to_string()),
        ];
        let ids = intersect_markers(&record, &with_serial).unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["c"]);

        let missing = vec![("tags".to_string(), "ANIMAL".to_string())];
        assert!(intersect_markers(&record, &missing).is_none());
    }
}
