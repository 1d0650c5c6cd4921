//! Bucket engines: record lifecycle, item mutation, fetching and query planning.

mod fetcher;
mod lifecycle;
mod mutation;
mod planner;
pub mod predicate;
mod types;

pub use fetcher::QueryFetcher;
pub use lifecycle::{BucketLifecycle, IndexInitCache};
pub use mutation::ItemMutator;
pub use planner::QueryPlanner;
pub use predicate::{CompareOp, Predicate, PredicateSet, is_match};
pub use types::{
    BucketItem, BucketKey, BucketWindow, DataQueryParam, EMPTY_NUMBER_SENTINEL,
    EMPTY_STRING_SENTINEL, IndexCollection, InvertedIndex, KEY_BIZ_ID, KEY_BUCKET_ID,
    KEY_ITEM_COUNT, KEY_ITEM_MAP, KEY_ITEM_VERSION, KEY_START_BUCKET_WINDOW, index_values,
    is_empty_index_value, is_shard_column, item_path, marker_path, scalar_string, shard_column,
    shard_index,
};
