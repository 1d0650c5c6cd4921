/// End-to-end bucket operations against DynamoDB
///
/// These tests need a reachable endpoint, e.g. LocalStack with
/// `AWS_PROFILE=localstack`, and are ignored by default:
///
/// ```sh
/// AWS_PROFILE=localstack cargo test --test dynamodb_bucket_tests -- --ignored
/// ```
mod helpers;
use helpers::*;

use dynamo_bucket::setup;
use dynamo_bucket::{DynamoBucketStore, dynamodb_client};
use serial_test::serial;
use std::sync::Arc;

/// Bucket over DynamoDB with its own table
async fn dynamodb_bucket(name: &str) -> (DynamoBucketStore, Bucket<VideoClip>) {
    init_tracing();
    init_test_client().await;
    let table_name = format!("bucket-{}", unique_test_prefix(name).trim_end_matches('_'));
    let _ = setup::bucket_table(dynamodb_client().await, &table_name)
        .await
        .unwrap();

    let store = DynamoBucketStore::from_global(table_name.clone()).await;
    let shared: Arc<dyn BucketStore> = Arc::new(store.clone());
    let bucket = Bucket::new(shared, BucketConfig::new(table_name)).unwrap();
    (store, bucket)
}

/// Test the default table created through the global client
#[tokio::test]
#[serial]
#[ignore]
async fn test_default_bucket_table() {
    init_test_client().await;
    let clips = Bucket::<VideoClip>::dynamodb().await.unwrap();
    assert_eq!(clips.config().table_name, "bucket-tests_video_clips");

    // Creating the table twice is not an error.
    let again = Bucket::<VideoClip>::dynamodb().await;
    assert!(again.is_ok());
}

/// Test add, update, query and delete against DynamoDB
#[tokio::test]
#[serial]
#[ignore]
async fn test_item_lifecycle() {
    let (store, clips) = dynamodb_bucket("item_lifecycle").await;
    let clip = VideoClip::new("t1", 7, BASE_TS)
        .with_tags(&["PERSON"])
        .with_serial_number("sn_01");

    let biz_id = clips.add(&clip).await.unwrap();
    let key = biz_id.parse::<BizId>().unwrap().key();
    assert!(store.get_item(&key, &[]).await.unwrap().is_some());

    let stored = clips.query_one(&biz_id, "t1", Some("7")).await.unwrap();
    assert_eq!(stored, Some(clip.stored_as(&biz_id)));

    let moved = clip.clone().with_tags(&["VEHICLE"]);
    clips.update(&biz_id, &moved).await.unwrap();
    assert!(clips.query(&tag_query(7, "PERSON", 0, 10), None).await.unwrap().is_empty());
    let vehicle = clips.query(&tag_query(7, "VEHICLE", 0, 10), None).await.unwrap();
    assert_eq!(vehicle, vec![moved.stored_as(&biz_id)]);

    assert!(clips.delete(&biz_id, "t1", Some("7")).await.unwrap());
    assert!(!clips.delete(&biz_id, "t1", Some("7")).await.unwrap());
    assert!(clips.query(&user_query(7, 0, 10), None).await.unwrap().is_empty());
}

/// Test rollover and paging against DynamoDB
#[tokio::test]
#[serial]
#[ignore]
async fn test_rollover_and_pages() {
    let (_store, clips) = dynamodb_bucket("rollover_pages").await;
    let window = BASE_TS / 3600;

    let mut last_biz_id = String::new();
    for i in 0..65 {
        let clip = VideoClip::new(&format!("c{i:02}"), 7, BASE_TS).with_tags(&["PERSON"]);
        last_biz_id = clips.add(&clip).await.unwrap();
    }
    assert_eq!(last_biz_id.parse::<BizId>().unwrap().window(), window + 1);

    let whole = clips.query(&tag_query(7, "PERSON", 0, 100), None).await.unwrap();
    assert_eq!(whole.len(), 65);

    let mut paged = clips.query(&user_query(7, 0, 10), None).await.unwrap();
    paged.extend(clips.query(&user_query(7, 10, 20), None).await.unwrap());
    assert_eq!(trace_ids(&paged), trace_ids(&whole[..20]));
}
