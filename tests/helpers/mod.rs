/// Test helpers and fixtures for bucket integration tests
///
/// This module provides common test utilities, fixtures, and helper functions
/// used across all integration tests.
pub mod fixtures;
#[allow(dead_code)]
pub mod racing;

pub use aws_sdk_dynamodb::types::AttributeValue;
pub use dynamo_bucket::{
    BizId, Bucket, BucketConfig, BucketKey, BucketRecord, BucketStore, DataQueryParam, Error,
    MemoryBucketStore,
};
pub use serde::{Deserialize, Serialize};

// Re-export common fixtures
pub use fixtures::{BASE_TS, Note, VideoClip};
#[allow(unused_imports)]
pub use racing::RacingStore;

use std::sync::{Arc, Once};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::OnceCell;
use tracing_subscriber::EnvFilter;

/// Ensure DynamoDB client is initialized for tests
static TEST_INIT: OnceCell<()> = OnceCell::const_new();

static TRACING: Once = Once::new();

/// Initialize DynamoDB client for tests (idempotent)
#[allow(dead_code)]
pub async fn init_test_client() {
    TEST_INIT
        .get_or_init(|| async {
            // Trigger auto-initialization
            let _ = dynamo_bucket::dynamodb_client().await;
        })
        .await;
}

/// Route `tracing` output to the test writer, filtered by `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Generate a unique test prefix for isolation
///
/// Returns a timestamp-based prefix to avoid test data conflicts
pub fn unique_test_prefix(name: &str) -> String {
    format!(
        "{}_{}_",
        name,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis()
    )
}

/// Bucket over a fresh in-memory store
///
/// Every call gets its own table name so the process-wide index cache never
/// sees entries of another test.
#[allow(dead_code)]
pub fn memory_bucket<T: BucketRecord>(name: &str) -> (MemoryBucketStore, Bucket<T>) {
    memory_bucket_with(name, |config| config)
}

/// Bucket over a fresh in-memory store with adjusted configuration
#[allow(dead_code)]
pub fn memory_bucket_with<T: BucketRecord>(
    name: &str,
    configure: impl FnOnce(BucketConfig) -> BucketConfig,
) -> (MemoryBucketStore, Bucket<T>) {
    init_tracing();
    let store = MemoryBucketStore::new();
    let config = configure(BucketConfig::new(format!("bucket-{}", unique_test_prefix(name))));
    let shared: Arc<dyn BucketStore> = Arc::new(store.clone());
    let bucket = Bucket::new(shared, config).unwrap();
    (store, bucket)
}

/// Bucket over a [`RacingStore`] with adjusted configuration
#[allow(dead_code)]
pub fn racing_bucket<T: BucketRecord>(
    name: &str,
    configure: impl FnOnce(BucketConfig) -> BucketConfig,
) -> (RacingStore, Bucket<T>) {
    init_tracing();
    let store = RacingStore::new();
    let config = configure(BucketConfig::new(format!("bucket-{}", unique_test_prefix(name))));
    let shared: Arc<dyn BucketStore> = Arc::new(store.clone());
    let bucket = Bucket::new(shared, config).unwrap();
    (store, bucket)
}

/// Clips of one user, positions `[from, to)`
#[allow(dead_code)]
pub fn user_query(user_id: u64, from: usize, to: usize) -> DataQueryParam {
    DataQueryParam::new(from, to)
        .with_expression("user_id", "user_id = :uid")
        .with_value(":uid", AttributeValue::N(user_id.to_string()))
}

/// Clips of one user carrying a tag, positions `[from, to)`
#[allow(dead_code)]
pub fn tag_query(user_id: u64, tag: &str, from: usize, to: usize) -> DataQueryParam {
    user_query(user_id, from, to)
        .with_expression("tags", "contains(tags, :tag)")
        .with_value(":tag", AttributeValue::S(tag.to_string()))
}

/// Trace ids of query results, in result order
#[allow(dead_code)]
pub fn trace_ids(clips: &[VideoClip]) -> Vec<String> {
    clips.iter().map(|clip| clip.trace_id.clone()).collect()
}
