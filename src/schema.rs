//! Mapping between typed records and bucket items.
//!
//! A record type declares which of its attributes form the natural key,
//! which one selects the bucket partition, which one carries the timestamp
//! and which ones are kept in the inverted index.

use aws_sdk_dynamodb::types::AttributeValue;
use serde::{Serialize, de::DeserializeOwned};
use serde_dynamo::{from_item, to_item};
use std::collections::BTreeMap;

use crate::bucket::{
    DataQueryParam, IndexCollection, InvertedIndex, KEY_BIZ_ID, KEY_BUCKET_ID, KEY_ITEM_COUNT,
    KEY_ITEM_VERSION, KEY_START_BUCKET_WINDOW, Predicate, index_values, is_shard_column,
    scalar_string,
};
use crate::error::Error;
use crate::store::Record;

/// Timestamps above this are read as milliseconds
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Record type stored through a [`crate::Bucket`]
///
/// # Example
///
/// ```rust
/// use dynamo_bucket::BucketRecord;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Clip {
///     trace_id: String,
///     user_id: u64,
///     timestamp: i64,
///     tags: Vec<String>,
/// }
///
/// impl BucketRecord for Clip {
///     const TABLE: &'static str = "clips";
///     const HASH_KEY: &'static str = "trace_id";
///     const RANGE_KEY: Option<&'static str> = Some("user_id");
///     const BUCKET_ID_FIELD: Option<&'static str> = Some("user_id");
///     const TIMESTAMP_FIELD: Option<&'static str> = Some("timestamp");
///     const INDEX_FIELDS: &'static [&'static str] = &["tags"];
/// }
/// ```
pub trait BucketRecord: Serialize + DeserializeOwned + Send + Sync {
    /// Logical table name; the bucket table is `bucket-{TABLE}`
    const TABLE: &'static str;

    /// Hash key attribute of the natural key
    const HASH_KEY: &'static str;

    /// Range key attribute of the natural key
    const RANGE_KEY: Option<&'static str> = None;

    /// Attribute selecting the bucket partition; the hash key when unset
    const BUCKET_ID_FIELD: Option<&'static str> = None;

    /// Attribute holding the item timestamp, seconds or milliseconds
    const TIMESTAMP_FIELD: Option<&'static str> = None;

    /// Attributes kept in the inverted index
    const INDEX_FIELDS: &'static [&'static str] = &[];
}

/// Roles an attribute plays in the bucket layout
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FieldRole {
    /// Selects the bucket partition
    pub bucket_id: bool,
    /// Kept in the inverted index
    pub indexed: bool,
    /// Item timestamp
    pub timestamp: bool,
}

/// Descriptor of a record type
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketSchema {
    hash_key: String,
    range_key: Option<String>,
    fields: BTreeMap<String, FieldRole>,
}

impl BucketSchema {
    /// Schema with only a natural key
    pub fn new(hash_key: impl Into<String>, range_key: Option<&str>) -> Self {
        Self {
            hash_key: hash_key.into(),
            range_key: range_key.map(str::to_string),
            fields: BTreeMap::new(),
        }
    }

    /// Add a role to an attribute
    pub fn with_field(mut self, name: impl Into<String>, role: FieldRole) -> Self {
        let entry = self.fields.entry(name.into()).or_default();
        entry.bucket_id |= role.bucket_id;
        entry.indexed |= role.indexed;
        entry.timestamp |= role.timestamp;
        self
    }

    /// Schema declared by a record type
    pub fn of<T: BucketRecord>() -> Result<Self, Error> {
        let mut schema = Self::new(T::HASH_KEY, T::RANGE_KEY);
        if let Some(field) = T::BUCKET_ID_FIELD {
            schema = schema.with_field(
                field,
                FieldRole {
                    bucket_id: true,
                    ..FieldRole::default()
                },
            );
        }
        if let Some(field) = T::TIMESTAMP_FIELD {
            schema = schema.with_field(
                field,
                FieldRole {
                    timestamp: true,
                    ..FieldRole::default()
                },
            );
        }
        for field in T::INDEX_FIELDS {
            schema = schema.with_field(
                *field,
                FieldRole {
                    indexed: true,
                    ..FieldRole::default()
                },
            );
        }
        schema.validate()?;
        Ok(schema)
    }

    /// Reject names that collide with the bucket record layout
    pub fn validate(&self) -> Result<(), Error> {
        if self.hash_key.is_empty() {
            return Err(Error::InvalidSchema("hash key name is empty".into()));
        }

        for (name, role) in &self.fields {
            if !role.indexed {
                continue;
            }
            let reserved = [
                KEY_BUCKET_ID,
                KEY_START_BUCKET_WINDOW,
                KEY_ITEM_COUNT,
                KEY_BIZ_ID,
                KEY_ITEM_VERSION,
            ];
            if name.is_empty() || reserved.contains(&name.as_str()) || is_shard_column(name) {
                return Err(Error::InvalidSchema(format!(
                    "{name} can not be an indexed field"
                )));
            }
        }

        if self.fields.values().filter(|role| role.bucket_id).count() > 1 {
            return Err(Error::InvalidSchema("more than one bucket id field".into()));
        }
        if self.fields.values().filter(|role| role.timestamp).count() > 1 {
            return Err(Error::InvalidSchema("more than one timestamp field".into()));
        }
        Ok(())
    }

    fn field_with(&self, wanted: impl Fn(&FieldRole) -> bool) -> Option<&str> {
        self.fields
            .iter()
            .find(|(_, role)| wanted(*role))
            .map(|(name, _)| name.as_str())
    }

    /// Attribute selecting the bucket partition
    pub fn bucket_id_field(&self) -> Option<&str> {
        self.field_with(|role| role.bucket_id)
    }

    /// Attribute holding the item timestamp
    pub fn timestamp_field(&self) -> Option<&str> {
        self.field_with(|role| role.timestamp)
    }

    /// Indexed attributes
    pub fn indexed_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, role)| role.indexed)
            .map(|(name, _)| name.as_str())
    }

    /// Serialize a record into attributes; `NULL` attributes are dropped
    pub fn to_attributes<T: Serialize>(&self, item: &T) -> Result<Record, Error> {
        let mut attributes: Record = to_item(item)?;
        attributes.retain(|_, value| !matches!(value, AttributeValue::Null(_)));
        Ok(attributes)
    }

    /// Deserialize stored attributes back into a record
    pub fn from_attributes<T: DeserializeOwned>(&self, attributes: Record) -> Result<T, Error> {
        Ok(from_item(attributes)?)
    }

    fn key_string(attributes: &Record, name: &str) -> Option<String> {
        attributes
            .get(name)
            .and_then(scalar_string)
            .filter(|value| !value.is_empty())
    }

    /// Hash key value of a record
    pub fn hash_key(&self, attributes: &Record) -> Option<String> {
        Self::key_string(attributes, &self.hash_key)
    }

    /// Range key value of a record
    pub fn range_key(&self, attributes: &Record) -> Option<String> {
        self.range_key
            .as_deref()
            .and_then(|name| Self::key_string(attributes, name))
    }

    /// Item id derived from the natural key, `{hash}_{range}` or `{hash}`
    pub fn item_id(hash_key: &str, range_key: Option<&str>) -> String {
        match range_key {
            Some(range_key) => format!("{hash_key}_{range_key}"),
            None => hash_key.to_string(),
        }
    }

    /// Bucket partition of a record; the hash key when no bucket id field is declared
    pub fn bucket_id(&self, attributes: &Record) -> Option<String> {
        match self.bucket_id_field() {
            Some(field) => Self::key_string(attributes, field),
            None => self.hash_key(attributes),
        }
    }

    /// Timestamp of a record in seconds
    pub fn timestamp(&self, attributes: &Record) -> Option<i64> {
        let field = self.timestamp_field()?;
        let value = scalar_string(attributes.get(field)?)?;
        value.parse::<i64>().ok().map(to_seconds)
    }

    /// Values of the indexed attributes a record carries
    ///
    /// A present attribute without any indexable value yields an empty entry,
    /// so updates retract the markers of its previous values.
    pub fn index_collection(&self, attributes: &Record) -> IndexCollection {
        let mut collection = IndexCollection::new();
        for field in self.indexed_fields() {
            let Some(value) = attributes.get(field) else {
                continue;
            };
            collection.set_field(field, index_values(value).into_iter().collect::<InvertedIndex>());
        }
        collection
    }

    fn expression_values(&self, param: &DataQueryParam, field: &str) -> Vec<String> {
        let Some(expression) = param.expression_map.get(field) else {
            return Vec::new();
        };
        crate::bucket::predicate::placeholders(expression)
            .into_iter()
            .filter_map(|token| param.expression_value_map.get(token))
            .filter_map(scalar_string)
            .collect()
    }

    /// Bucket partitions a query targets, sorted and deduplicated
    pub fn query_bucket_ids(&self, param: &DataQueryParam) -> Vec<String> {
        let field = self.bucket_id_field().unwrap_or(self.hash_key.as_str());
        let mut ids = self.expression_values(param, field);
        ids.sort();
        ids.dedup();
        ids
    }

    /// Timestamp range of a query in seconds, `(0, i64::MAX)` when unconstrained
    pub fn query_timestamp_range(&self, param: &DataQueryParam) -> (i64, i64) {
        let unbounded = (0, i64::MAX);
        let Some(field) = self.timestamp_field() else {
            return unbounded;
        };
        let Some(expression) = param.expression_map.get(field) else {
            return unbounded;
        };

        let (lower, upper) = Predicate::parse(expression, &param.expression_value_map).numeric_range();
        (
            lower.map(to_seconds).unwrap_or(0),
            upper.map(to_seconds).unwrap_or(i64::MAX),
        )
    }

    /// Index lookups implied by equality and `contains` expressions on indexed attributes
    pub fn query_index_collection(&self, param: &DataQueryParam) -> IndexCollection {
        let mut collection = IndexCollection::new();
        for field in self.indexed_fields() {
            let Some(expression) = param.expression_map.get(field) else {
                continue;
            };
            let values = Predicate::parse(expression, &param.expression_value_map).lookup_values();
            for value in values {
                collection.insert(field, value);
            }
        }
        collection
    }
}

fn to_seconds(timestamp: i64) -> i64 {
    if timestamp > MILLIS_THRESHOLD {
        timestamp / 1000
    } else {
        timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Clip {
        trace_id: String,
        user_id: u64,
        timestamp: i64,
        serial_number: Option<String>,
        tags: Vec<String>,
    }

    impl BucketRecord for Clip {
        const TABLE: &'static str = "clips";
        const HASH_KEY: &'static str = "trace_id";
        const RANGE_KEY: Option<&'static str> = Some("user_id");
        const BUCKET_ID_FIELD: Option<&'static str> = Some("user_id");
        const TIMESTAMP_FIELD: Option<&'static str> = Some("timestamp");
        const INDEX_FIELDS: &'static [&'static str] = &["serial_number", "tags"];
    }

    fn clip() -> Clip {
        Clip {
            trace_id: "t1".into(),
            user_id: 7,
            timestamp: 1_700_000_000_123,
            serial_number: None,
            tags: vec!["PERSON".into(), "VEHICLE".into()],
        }
    }

    #[test]
    fn test_schema_of_record() {
        let schema = BucketSchema::of::<Clip>().unwrap();
        assert_eq!(schema.bucket_id_field(), Some("user_id"));
        assert_eq!(schema.timestamp_field(), Some("timestamp"));
        assert_eq!(schema.indexed_fields().collect::<Vec<_>>(), vec!["serial_number", "tags"]);
    }

    #[test]
    fn test_reserved_index_field_is_rejected() {
        let schema = BucketSchema::new("id", None).with_field(
            "item_map3",
            FieldRole {
                indexed: true,
                ..FieldRole::default()
            },
        );
        assert!(matches!(schema.validate(), Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_item_extraction() {
        let schema = BucketSchema::of::<Clip>().unwrap();
        let attributes = schema.to_attributes(&clip()).unwrap();

        assert!(!attributes.contains_key("serial_number"));
        assert_eq!(schema.hash_key(&attributes).as_deref(), Some("t1"));
        assert_eq!(schema.range_key(&attributes).as_deref(), Some("7"));
        assert_eq!(BucketSchema::item_id("t1", Some("7")), "t1_7");
        assert_eq!(schema.bucket_id(&attributes).as_deref(), Some("7"));
        assert_eq!(schema.timestamp(&attributes), Some(1_700_000_000));

        let collection = schema.index_collection(&attributes);
        let tags: Vec<_> = collection.get("tags").unwrap().values().collect();
        assert_eq!(tags, vec!["PERSON", "VEHICLE"]);
        assert!(collection.get("serial_number").is_none());

        let back: Clip = schema.from_attributes(attributes).unwrap();
        assert_eq!(back, clip());
    }

    #[test]
    fn test_query_extraction() {
        let schema = BucketSchema::of::<Clip>().unwrap();
        let param = DataQueryParam::new(0, 10)
            .with_expression("user_id", "user_id = :uid")
            .with_expression("timestamp", "timestamp >= :from and timestamp <= :to")
            .with_expression("tags", "contains(tags, :tag)")
            .with_expression("serial_number", "serial_number > :sn")
            .with_value(":uid", AttributeValue::N("7".into()))
            .with_value(":from", AttributeValue::N("1700000000000".into()))
            .with_value(":to", AttributeValue::N("1700003600".into()))
            .with_value(":tag", AttributeValue::S("PERSON".into()))
            .with_value(":sn", AttributeValue::S("a".into()));

        assert_eq!(schema.query_bucket_ids(&param), vec!["7"]);
        assert_eq!(schema.query_timestamp_range(&param), (1_700_000_000, 1_700_003_600));

        let collection = schema.query_index_collection(&param);
        assert_eq!(collection.fields().collect::<Vec<_>>(), vec!["tags"]);
    }

    #[test]
    fn test_unconstrained_query() {
        let schema = BucketSchema::of::<Clip>().unwrap();
        let param = DataQueryParam::new(0, 10);
        assert!(schema.query_bucket_ids(&param).is_empty());
        assert_eq!(schema.query_timestamp_range(&param), (0, i64::MAX));
        assert!(schema.query_index_collection(&param).is_empty());
    }
}
