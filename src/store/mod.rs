//! Storage seam of the bucket layer.
//!
//! Every engine talks to the table through [`BucketStore`], which exposes the
//! four primitives the bucket layout needs: projected point reads, descending
//! range queries, nested-path conditional updates and conditional puts.

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;
use std::fmt;

use crate::bucket::{BucketKey, BucketWindow};
use crate::error::Error;

mod dynamodb;
pub(crate) mod expressions;
mod memory;

pub use dynamodb::DynamoBucketStore;
pub use memory::MemoryBucketStore;

/// Raw attribute map of a stored record
pub type Record = HashMap<String, AttributeValue>;

/// Dotted document path into a record, one entry per map level
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AttributePath(Vec<String>);

impl AttributePath {
    /// Top-level attribute
    pub fn new(attribute: impl Into<String>) -> Self {
        Self(vec![attribute.into()])
    }

    /// Path one map level deeper
    pub fn child(mut self, segment: impl Into<String>) -> Self {
        self.0.push(segment.into());
        self
    }

    /// Path segments, outermost first
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Top-level attribute name
    pub fn root(&self) -> &str {
        &self.0[0]
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// One `SET` clause of an update
#[derive(Clone, Debug, PartialEq)]
pub enum SetAction {
    /// `path = value`
    Assign(AttributePath, AttributeValue),
    /// `path = if_not_exists(path, value)`
    AssignIfNotExists(AttributePath, AttributeValue),
    /// `path = path + delta`; the attribute must exist
    Increment(AttributePath, i64),
}

/// Condition attached to a write
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// `attribute_exists(path)`
    Exists(AttributePath),
    /// `attribute_not_exists(path)`
    NotExists(AttributePath),
    /// `path = value`
    Equals(AttributePath, AttributeValue),
    /// `path < value`
    LessThan(AttributePath, AttributeValue),
    /// Every condition holds
    And(Vec<Condition>),
}

/// Partial update of one record
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateRequest {
    /// Target record
    pub key: BucketKey,
    /// `SET` clauses, applied in order
    pub sets: Vec<SetAction>,
    /// `REMOVE` clauses
    pub removes: Vec<AttributePath>,
    /// Condition evaluated against the stored record before any change
    pub condition: Option<Condition>,
}

impl UpdateRequest {
    /// Empty update of a record
    pub fn new(key: BucketKey) -> Self {
        Self {
            key,
            sets: Vec::new(),
            removes: Vec::new(),
            condition: None,
        }
    }

    /// `SET path = value`
    pub fn set(&mut self, path: AttributePath, value: AttributeValue) -> &mut Self {
        self.sets.push(SetAction::Assign(path, value));
        self
    }

    /// `SET path = if_not_exists(path, value)`
    pub fn set_if_not_exists(&mut self, path: AttributePath, value: AttributeValue) -> &mut Self {
        self.sets.push(SetAction::AssignIfNotExists(path, value));
        self
    }

    /// `SET path = path + delta`
    pub fn increment(&mut self, path: AttributePath, delta: i64) -> &mut Self {
        self.sets.push(SetAction::Increment(path, delta));
        self
    }

    /// `REMOVE path`
    pub fn remove(&mut self, path: AttributePath) -> &mut Self {
        self.removes.push(path);
        self
    }

    /// Attach the write condition
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Check if the update would change nothing
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty() && self.removes.is_empty()
    }
}

/// Primitive operations of the bucket table
///
/// Conditional failures surface as [`Error::ConditionalCheckFailed`] and a
/// missing table as [`Error::ResourceNotFound`], whatever the backend.
#[async_trait]
pub trait BucketStore: Send + Sync + fmt::Debug {
    /// Read one record; an empty projection reads the whole record
    async fn get_item(
        &self,
        key: &BucketKey,
        projection: &[AttributePath],
    ) -> Result<Option<Record>, Error>;

    /// Read every record of a partition with `start <= window <= end`
    ///
    /// Key attributes are always part of the returned records.
    async fn query(
        &self,
        bucket_id: &str,
        start: &BucketWindow,
        end: &BucketWindow,
        projection: &[AttributePath],
        descending: bool,
    ) -> Result<Vec<Record>, Error>;

    /// Apply a partial update atomically
    async fn update_item(&self, request: UpdateRequest) -> Result<(), Error>;

    /// Write a whole record
    async fn put_item(
        &self,
        key: &BucketKey,
        attributes: Record,
        condition: Option<Condition>,
    ) -> Result<(), Error>;
}

/// Numeric view of an `N` attribute
pub(crate) fn number_of(value: &AttributeValue) -> Option<f64> {
    value.as_n().ok().and_then(|n| n.parse().ok())
}
