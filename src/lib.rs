//! # DynamoDB Buckets
//!
//! Capacity-bounded bucketing with an embedded inverted index on top of DynamoDB.
//!
//! Items of one partition are packed into bucket records keyed by
//! `(bucket_id, start_bucket_window)`. Each bucket holds at most a fixed
//! number of items spread over hashed shard columns, plus per-field index
//! maps `{field}.{value}.{itemId}`. Queries walk windows newest first,
//! intersect index maps to narrow the candidates, and fetch only the items
//! they need.
//!
//! ## Features
//!
//! - **Typed records**: any `serde` type implementing [`BucketRecord`]
//! - **Capacity-bounded buckets**: full windows roll over to the next one
//! - **Inverted index**: equality and `contains` lookups without table scans
//! - **Optimistic updates**: per-item versions guard concurrent writers
//! - **Pluggable storage**: DynamoDB or an in-memory store behind [`BucketStore`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dynamo_bucket::{Bucket, BucketRecord, DataQueryParam, Error};
//! use aws_sdk_dynamodb::types::AttributeValue;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Clip {
//!     trace_id: String,
//!     user_id: u64,
//!     timestamp: i64,
//!     tags: Vec<String>,
//! }
//!
//! impl BucketRecord for Clip {
//!     const TABLE: &'static str = "clips";
//!     const HASH_KEY: &'static str = "trace_id";
//!     const RANGE_KEY: Option<&'static str> = Some("user_id");
//!     const BUCKET_ID_FIELD: Option<&'static str> = Some("user_id");
//!     const TIMESTAMP_FIELD: Option<&'static str> = Some("timestamp");
//!     const INDEX_FIELDS: &'static [&'static str] = &["tags"];
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let clips = Bucket::<Clip>::dynamodb().await?;
//!
//!     let clip = Clip {
//!         trace_id: "t1".to_string(),
//!         user_id: 7,
//!         timestamp: 1_700_000_000,
//!         tags: vec!["PERSON".to_string()],
//!     };
//!     let biz_id = clips.add(&clip).await?;
//!
//!     let param = DataQueryParam::new(0, 20)
//!         .with_expression("user_id", "user_id = :uid")
//!         .with_expression("tags", "contains(tags, :tag)")
//!         .with_value(":uid", AttributeValue::N("7".to_string()))
//!         .with_value(":tag", AttributeValue::S("PERSON".to_string()));
//!     let found = clips.query(&param, None).await?;
//!
//!     clips.delete(&biz_id, "t1", Some("7")).await?;
//!     Ok(())
//! }
//! ```
#![deny(
    warnings,
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_results,
    deprecated,
    unknown_lints,
    unreachable_code,
    unused_mut
)]

mod error;
pub use error::Error;

/// Bucket layer configuration
pub mod config;

/// Bucket engines
pub mod bucket;

/// Storage seam and its backends
pub mod store;

/// Record type descriptors
pub mod schema;

/// Table setup utilities
pub mod setup;

mod api;

// Re-export main types for convenience
pub use api::{BizId, Bucket};
pub use bucket::{BucketItem, BucketKey, BucketWindow, DataQueryParam, IndexCollection, InvertedIndex};
pub use config::BucketConfig;
pub use schema::{BucketRecord, BucketSchema, FieldRole};
pub use store::{BucketStore, DynamoBucketStore, MemoryBucketStore};

// Re-export aws-config types for configuration
pub use aws_config::{
    BehaviorVersion, Region, SdkConfig, defaults,
    meta::region::{ProvideRegion, RegionProviderChain},
    retry::{RetryConfig, RetryMode},
    timeout::TimeoutConfig,
};

// Re-export aws-types for advanced configuration
pub use aws_types::sdk_config::Builder as SdkConfigBuilder;

use aws_sdk_dynamodb::Client as DynamoDbClient;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Process-wide DynamoDB client shared by every [`DynamoBucketStore`] built from it
static GLOBAL_CLIENT: OnceCell<DynamoDbClient> = OnceCell::const_new();

/// SDK configuration used when nothing was configured explicitly
///
/// Adaptive retries (3 attempts, 1s initial backoff), 3s connect, 20s read
/// and 60s operation timeouts. `AWS_PROFILE=localstack` points the client
/// at a local endpoint.
async fn aws_config_defaults() -> SdkConfig {
    let timeout_config = TimeoutConfig::builder()
        .connect_timeout(Duration::from_secs(3))
        .read_timeout(Duration::from_secs(20))
        .operation_timeout(Duration::from_secs(60))
        .build();

    let mut loader = defaults(BehaviorVersion::latest())
        .retry_config(
            RetryConfig::adaptive()
                .with_max_attempts(3)
                .with_initial_backoff(Duration::from_secs(1)),
        )
        .timeout_config(timeout_config);

    if std::env::var("AWS_PROFILE").unwrap_or_default() == "localstack" {
        loader = loader.endpoint_url("http://127.0.0.1:4566");
    }

    loader.load().await
}

/// Set the global client from an SDK configuration
///
/// Has no effect once the client exists.
///
/// ```rust,no_run
/// # async fn example() {
/// let config = dynamo_bucket::defaults(dynamo_bucket::BehaviorVersion::latest())
///     .region(dynamo_bucket::Region::new("eu-west-1"))
///     .load()
///     .await;
/// dynamo_bucket::init(&config).await;
/// # }
/// ```
pub async fn init(config: &SdkConfig) {
    let _ = GLOBAL_CLIENT
        .get_or_init(|| async { DynamoDbClient::new(config) })
        .await;
}

/// Set the global client to a prepared instance
///
/// Has no effect once the client exists.
pub async fn init_with_client(client: DynamoDbClient) {
    let _ = GLOBAL_CLIENT.get_or_init(|| async { client }).await;
}

/// Global DynamoDB client, created with the default SDK configuration on first use
pub async fn dynamodb_client() -> &'static DynamoDbClient {
    GLOBAL_CLIENT
        .get_or_init(|| async {
            let config = aws_config_defaults().await;
            DynamoDbClient::new(&config)
        })
        .await
}
