/// Default maximum number of live items in one bucket; also the shard column count
pub const MAX_BUCKET_ITEM_COUNT: usize = 64;

/// Default number of index-matched item ids a query examines before it stops scanning windows
pub const SCAN_MAX_COUNT: usize = 10_000;

/// Default width of a bucket window in seconds
pub const BUCKET_WINDOW_SECONDS: i64 = 60 * 60;

/// Default capacity of the process-wide index initialization cache
pub const INDEX_CACHE_CAPACITY: usize = 100_000;

/// Default number of item ids projected by one targeted fetch
pub const FETCH_CHUNK_SIZE: usize = 100;

/// Default name of the item attribute copied onto the bucket as its TTL
pub const TTL_ATTRIBUTE: &str = "ttl_timestamp";

/// Runtime configuration of a bucket table
#[derive(Clone, Debug)]
pub struct BucketConfig {
    /// Name of the DynamoDB table holding bucket records
    pub table_name: String,
    /// Bucket capacity and shard column count
    pub max_bucket_item_count: usize,
    /// Scan budget for index-driven queries
    pub scan_max_count: usize,
    /// Width of a bucket window in seconds
    pub window_seconds: i64,
    /// Capacity of the index initialization cache
    pub index_cache_capacity: usize,
    /// Item ids per targeted fetch request
    pub fetch_chunk_size: usize,
    /// Item attribute copied onto the bucket record as TTL
    pub ttl_attribute: String,
}

impl BucketConfig {
    /// Configuration with defaults for the given table
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            max_bucket_item_count: MAX_BUCKET_ITEM_COUNT,
            scan_max_count: SCAN_MAX_COUNT,
            window_seconds: BUCKET_WINDOW_SECONDS,
            index_cache_capacity: INDEX_CACHE_CAPACITY,
            fetch_chunk_size: FETCH_CHUNK_SIZE,
            ttl_attribute: TTL_ATTRIBUTE.to_string(),
        }
    }

    /// Bucket table name derived from a logical table name, `bucket-{table}`
    pub fn for_table(table: &str) -> Self {
        Self::new(format!("bucket-{table}"))
    }

    /// Override the bucket capacity (clamped to at least one)
    pub fn with_max_bucket_item_count(mut self, count: usize) -> Self {
        self.max_bucket_item_count = count.max(1);
        self
    }

    /// Override the scan budget
    pub fn with_scan_max_count(mut self, count: usize) -> Self {
        self.scan_max_count = count;
        self
    }

    /// Override the bucket window width (clamped to at least one second)
    pub fn with_window_seconds(mut self, seconds: i64) -> Self {
        self.window_seconds = seconds.max(1);
        self
    }

    /// Override the index initialization cache capacity
    pub fn with_index_cache_capacity(mut self, capacity: usize) -> Self {
        self.index_cache_capacity = capacity;
        self
    }

    /// Override the number of item ids per targeted fetch
    pub fn with_fetch_chunk_size(mut self, size: usize) -> Self {
        self.fetch_chunk_size = size.max(1);
        self
    }

    /// Override the TTL attribute name
    pub fn with_ttl_attribute(mut self, name: impl Into<String>) -> Self {
        self.ttl_attribute = name.into();
        self
    }

    /// Number of shard columns per bucket
    pub fn shard_count(&self) -> usize {
        self.max_bucket_item_count
    }
}
