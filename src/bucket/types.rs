use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

use crate::store::{AttributePath, Record};

/// Partition key attribute of the bucket table
pub const KEY_BUCKET_ID: &str = "bucket_id";

/// Sort key attribute of the bucket table
pub const KEY_START_BUCKET_WINDOW: &str = "start_bucket_window";

/// Live item counter of a bucket
pub const KEY_ITEM_COUNT: &str = "item_count";

/// Prefix of the shard columns, `item_map{k}`
pub const KEY_ITEM_MAP: &str = "item_map";

/// Biz id attribute stored inside every item
pub const KEY_BIZ_ID: &str = "bizId";

/// Optimistic version attribute stored inside every item
pub const KEY_ITEM_VERSION: &str = "item_version";

/// String value that means "no value" and is never indexed
pub const EMPTY_STRING_SENTINEL: &str = "";

/// Numeric value that means "no value" and is never indexed
pub const EMPTY_NUMBER_SENTINEL: &str = "-2147483648";

/// Check if an index value is one of the "no value" sentinels
pub fn is_empty_index_value(value: &str) -> bool {
    value == EMPTY_STRING_SENTINEL || value == EMPTY_NUMBER_SENTINEL
}

/// Sort key of a bucket record: a coarse time slot
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BucketWindow {
    /// Numeric window, stored as `N`
    Number(i64),
    /// Textual window, stored as `S`
    Text(String),
}

impl BucketWindow {
    /// Attribute value used for the sort key
    pub fn to_attribute_value(&self) -> AttributeValue {
        match self {
            BucketWindow::Number(n) => AttributeValue::N(n.to_string()),
            BucketWindow::Text(s) => AttributeValue::S(s.clone()),
        }
    }

    /// Parse a sort key attribute back into a window
    pub fn from_attribute_value(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::N(n) => n.parse().ok().map(BucketWindow::Number),
            AttributeValue::S(s) => Some(BucketWindow::Text(s.clone())),
            _ => None,
        }
    }

    /// Numeric window value, if any
    pub fn as_number(&self) -> Option<i64> {
        match self {
            BucketWindow::Number(n) => Some(*n),
            BucketWindow::Text(_) => None,
        }
    }
}

impl From<i64> for BucketWindow {
    fn from(value: i64) -> Self {
        BucketWindow::Number(value)
    }
}

impl fmt::Display for BucketWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketWindow::Number(n) => write!(f, "{}", n),
            BucketWindow::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Primary key of a bucket record
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    /// Partition key
    pub bucket_id: String,
    /// Sort key
    pub window: BucketWindow,
}

impl BucketKey {
    /// Build a key from its parts
    pub fn new(bucket_id: impl Into<String>, window: impl Into<BucketWindow>) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            window: window.into(),
        }
    }

    /// Key attributes as sent to the store
    pub fn to_key_map(&self) -> Record {
        HashMap::from([
            (
                KEY_BUCKET_ID.to_string(),
                AttributeValue::S(self.bucket_id.clone()),
            ),
            (
                KEY_START_BUCKET_WINDOW.to_string(),
                self.window.to_attribute_value(),
            ),
        ])
    }

    /// Recover the key from a record returned by the store
    pub fn from_record(record: &Record) -> Option<Self> {
        let bucket_id = record.get(KEY_BUCKET_ID)?.as_s().ok()?.clone();
        let window = BucketWindow::from_attribute_value(record.get(KEY_START_BUCKET_WINDOW)?)?;
        Some(Self { bucket_id, window })
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket_id, self.window)
    }
}

/// Shard column an item id hashes into
pub fn shard_index(item_id: &str, shards: usize) -> usize {
    (xxh3_64(item_id.as_bytes()) % shards.max(1) as u64) as usize
}

/// Name of the `k`-th shard column
pub fn shard_column(shard: usize) -> String {
    format!("{KEY_ITEM_MAP}{shard}")
}

/// Check if an attribute name is a shard column
pub fn is_shard_column(name: &str) -> bool {
    name.strip_prefix(KEY_ITEM_MAP)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Path of an item's slot, `item_map{k}.{itemId}`
pub fn item_path(item_id: &str, shards: usize) -> AttributePath {
    AttributePath::new(shard_column(shard_index(item_id, shards))).child(item_id)
}

/// Path of an index marker, `{field}.{value}.{itemId}`
pub fn marker_path(field: &str, value: &str, item_id: &str) -> AttributePath {
    AttributePath::new(field).child(value).child(item_id)
}

/// Values of an attribute as they are keyed in the inverted index
///
/// Scalars contribute one value, sets and lists one value per scalar member.
pub fn index_values(value: &AttributeValue) -> Vec<String> {
    match value {
        AttributeValue::S(s) => vec![s.clone()],
        AttributeValue::N(n) => vec![n.clone()],
        AttributeValue::Bool(b) => vec![b.to_string()],
        AttributeValue::Ss(values) | AttributeValue::Ns(values) => values.clone(),
        AttributeValue::L(values) => values.iter().filter_map(scalar_string).collect(),
        _ => Vec::new(),
    }
}

/// String form of a scalar value, numeric representation first
pub fn scalar_string(value: &AttributeValue) -> Option<String> {
    match value {
        AttributeValue::N(n) => Some(n.clone()),
        AttributeValue::S(s) => Some(s.clone()),
        _ => None,
    }
}

/// Values of one indexed field
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InvertedIndex {
    values: BTreeSet<String>,
}

impl InvertedIndex {
    /// Empty index entry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value
    pub fn insert(&mut self, value: impl Into<String>) -> bool {
        self.values.insert(value.into())
    }

    /// All values, sentinels included
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }

    /// Values that may be written to or read from the index
    pub fn indexable_values(&self) -> impl Iterator<Item = &str> {
        self.values().filter(|value| !is_empty_index_value(value))
    }

    /// Check if a value is present
    pub fn contains(&self, value: &str) -> bool {
        self.values.contains(value)
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if there are no values
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for InvertedIndex {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Indexed field name to the values that must be indexed for it
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexCollection {
    fields: BTreeMap<String, InvertedIndex>,
}

impl IndexCollection {
    /// Empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one value for a field
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        let _ = self.fields.entry(field.into()).or_default().insert(value);
    }

    /// Replace the values of a field
    pub fn set_field(&mut self, field: impl Into<String>, index: InvertedIndex) {
        let _ = self.fields.insert(field.into(), index);
    }

    /// Values of a field
    pub fn get(&self, field: &str) -> Option<&InvertedIndex> {
        self.fields.get(field)
    }

    /// Iterate fields and their values
    pub fn iter(&self) -> impl Iterator<Item = (&str, &InvertedIndex)> {
        self.fields.iter().map(|(field, index)| (field.as_str(), index))
    }

    /// Field names
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Every `(field, value)` pair that may be written to the index
    pub fn indexable_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter()
            .flat_map(|(field, index)| index.indexable_values().map(move |value| (field, value)))
    }

    /// Check if the collection has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One item stored in a bucket
#[derive(Clone, Debug, PartialEq)]
pub struct BucketItem {
    /// Owning bucket
    pub key: BucketKey,
    /// Deterministic id derived from the natural key
    pub item_id: String,
    /// External handle embedding the bucket location
    pub biz_id: String,
    /// Item attributes
    pub attributes: Record,
    /// Values of the item that are kept in the inverted index
    pub index_collection: Option<IndexCollection>,
}

impl BucketItem {
    /// Item without index information
    pub fn new(
        key: BucketKey,
        item_id: impl Into<String>,
        biz_id: impl Into<String>,
        attributes: Record,
    ) -> Self {
        Self {
            key,
            item_id: item_id.into(),
            biz_id: biz_id.into(),
            attributes,
            index_collection: None,
        }
    }

    /// Attach the index collection
    pub fn with_index_collection(mut self, index_collection: IndexCollection) -> Self {
        self.index_collection = Some(index_collection);
        self
    }

    /// Build an item from a stored slot; cleared slots and slots without biz id yield `None`
    pub fn from_slot(key: &BucketKey, item_id: &str, slot: &AttributeValue) -> Option<Self> {
        let attributes = slot.as_m().ok().filter(|m| !m.is_empty())?;
        let Some(biz_id) = attributes.get(KEY_BIZ_ID).and_then(|v| v.as_s().ok()) else {
            tracing::warn!(bucket = %key, item_id, "stored item has no biz id, skipping");
            return None;
        };

        Some(Self::new(key.clone(), item_id, biz_id.clone(), attributes.clone()))
    }

    /// Stored optimistic version, if any
    pub fn version(&self) -> Option<i64> {
        self.attributes
            .get(KEY_ITEM_VERSION)
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse().ok())
    }
}

/// Query-time filter and pagination window
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataQueryParam {
    /// Field name to comparison expression
    pub expression_map: BTreeMap<String, String>,
    /// `#name` placeholder table
    pub expression_name_map: HashMap<String, String>,
    /// `:value` placeholder table
    pub expression_value_map: HashMap<String, AttributeValue>,
    /// First result position (inclusive)
    pub from: usize,
    /// Last result position (exclusive)
    pub to: usize,
}

impl DataQueryParam {
    /// Parameter selecting positions `[from, to)`
    pub fn new(from: usize, to: usize) -> Self {
        Self {
            from,
            to,
            ..Self::default()
        }
    }

    /// Add an expression for a field
    pub fn with_expression(mut self, field: impl Into<String>, expression: impl Into<String>) -> Self {
        let _ = self.expression_map.insert(field.into(), expression.into());
        self
    }

    /// Bind a `:placeholder`
    pub fn with_value(mut self, placeholder: impl Into<String>, value: AttributeValue) -> Self {
        let _ = self.expression_value_map.insert(placeholder.into(), value);
        self
    }

    /// Bind a `#placeholder`
    pub fn with_name(mut self, placeholder: impl Into<String>, name: impl Into<String>) -> Self {
        let _ = self.expression_name_map.insert(placeholder.into(), name.into());
        self
    }

    /// Same filter over another page
    pub fn with_page(mut self, from: usize, to: usize) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    /// `to <= from` selects nothing
    pub fn is_empty_page(&self) -> bool {
        self.to <= self.from
    }
}

/// Slice `[from, to)` out of accumulated results, clamped to what exists
pub(crate) fn page<T>(mut items: Vec<T>, from: usize, to: usize) -> Vec<T> {
    if from >= items.len() || to <= from {
        return Vec::new();
    }
    items.truncate(to);
    items.split_off(from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_index_is_stable_and_bounded() {
        let a = shard_index("trace-1_7", 64);
        assert_eq!(a, shard_index("trace-1_7", 64));
        assert!(a < 64);
        assert_eq!(shard_index("anything", 1), 0);
    }

    #[test]
    fn test_is_shard_column() {
        assert!(is_shard_column("item_map0"));
        assert!(is_shard_column("item_map63"));
        assert!(!is_shard_column("item_map"));
        assert!(!is_shard_column("item_count"));
        assert!(!is_shard_column("item_mapx"));
    }

    #[test]
    fn test_bucket_key_record_round_trip() {
        let key = BucketKey::new("7", 472_222);
        let record = key.to_key_map();
        assert_eq!(BucketKey::from_record(&record), Some(key.clone()));
        assert_eq!(key.to_string(), "7/472222");
    }

    #[test]
    fn test_index_values() {
        assert_eq!(index_values(&AttributeValue::S("sn_01".into())), vec!["sn_01"]);
        assert_eq!(
            index_values(&AttributeValue::Ss(vec!["PERSON".into(), "VEHICLE".into()])),
            vec!["PERSON", "VEHICLE"]
        );
        assert_eq!(
            index_values(&AttributeValue::L(vec![
                AttributeValue::N("1".into()),
                AttributeValue::Null(true),
            ])),
            vec!["1"]
        );
        assert!(index_values(&AttributeValue::M(HashMap::new())).is_empty());
    }

    #[test]
    fn test_indexable_pairs_skip_sentinels() {
        let mut collection = IndexCollection::new();
        collection.insert("tags", "PERSON");
        collection.insert("tags", EMPTY_STRING_SENTINEL);
        collection.insert("score", EMPTY_NUMBER_SENTINEL);
        let pairs: Vec<_> = collection.indexable_pairs().collect();
        assert_eq!(pairs, vec![("tags", "PERSON")]);
    }

    #[test]
    fn test_from_slot_drops_cleared_and_anonymous_slots() {
        let key = BucketKey::new("1", 10);
        assert!(BucketItem::from_slot(&key, "a", &AttributeValue::M(HashMap::new())).is_none());

        let anonymous = AttributeValue::M(HashMap::from([(
            "image_url".to_string(),
            AttributeValue::S("x".into()),
        )]));
        assert!(BucketItem::from_slot(&key, "a", &anonymous).is_none());

        let stored = AttributeValue::M(HashMap::from([
            (KEY_BIZ_ID.to_string(), AttributeValue::S("p-1-10-0".into())),
            (KEY_ITEM_VERSION.to_string(), AttributeValue::N("3".into())),
        ]));
        let item = BucketItem::from_slot(&key, "a", &stored).unwrap();
        assert_eq!(item.biz_id, "p-1-10-0");
        assert_eq!(item.version(), Some(3));
    }

    #[test]
    fn test_page() {
        let items: Vec<u32> = (0..10).collect();
        assert_eq!(page(items.clone(), 2, 5), vec![2, 3, 4]);
        assert_eq!(page(items.clone(), 8, 20), vec![8, 9]);
        assert!(page(items.clone(), 10, 20).is_empty());
        assert!(page(items, 5, 5).is_empty());
    }
}
