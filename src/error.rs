use aws_sdk_dynamodb::error::BuildError;
use aws_sdk_dynamodb::operation::create_table::CreateTableError;
use aws_sdk_dynamodb::operation::get_item::GetItemError;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::query::QueryError;
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_runtime_api::http::Response;
use serde_dynamo::Error as SerdeDynamoError;
use std::error::Error as StdError;
use std::fmt;

use crate::bucket::BucketKey;

type DynamoPutError = SdkError<PutItemError, Response>;
type DynamoUpdateError = SdkError<UpdateItemError, Response>;
type DynamoGetError = SdkError<GetItemError, Response>;
type DynamoQueryError = SdkError<QueryError, Response>;
type DynamoCreateTableError = SdkError<CreateTableError, Response>;

/// Bucket layer error
#[derive(Debug)]
pub enum Error {
    /// Serde DynamoDB serialization/deserialization error
    SerdeDynamo(SerdeDynamoError),
    /// DynamoDB request builder error
    BuildError(BuildError),
    /// DynamoDB PutItem operation error
    DynamoPutError(DynamoPutError),
    /// DynamoDB GetItem operation error
    DynamoGetError(DynamoGetError),
    /// DynamoDB Query operation error
    DynamoQueryError(DynamoQueryError),
    /// DynamoDB UpdateItem operation error
    DynamoUpdateError(DynamoUpdateError),
    /// DynamoDB CreateTable operation error
    DynamoCreateTableError(DynamoCreateTableError),
    /// A condition attached to a put or update did not hold
    ConditionalCheckFailed,
    /// The table (or another store resource) does not exist
    ResourceNotFound(String),
    /// A nested document path could not be resolved for update
    InvalidDocumentPath(String),
    /// Update or lookup of an item that is not stored in its bucket
    ItemNotFound {
        /// Bucket partition key
        bucket_id: String,
        /// Bucket window, rendered
        window: String,
        /// Item id inside the bucket
        item_id: String,
    },
    /// The item changed between the index read and the write
    UpdateConflict {
        /// Item id inside the bucket
        item_id: String,
    },
    /// The bucket reached its item capacity
    BucketFull(BucketKey),
    /// The item has no usable hash key
    MissingHashKey,
    /// A biz id could not be decoded into its bucket location
    InvalidBizId(String),
    /// A bucket id that cannot be embedded in a biz id
    InvalidBucketId(String),
    /// The schema descriptor is inconsistent
    InvalidSchema(String),
}

impl Error {
    /// Check if the error means the addressed store resource is absent
    ///
    /// Read boundaries treat this as an empty result instead of a failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound(_) => true,
            Error::DynamoGetError(e) => matches!(
                e.as_service_error(),
                Some(GetItemError::ResourceNotFoundException(_))
            ),
            Error::DynamoQueryError(e) => matches!(
                e.as_service_error(),
                Some(QueryError::ResourceNotFoundException(_))
            ),
            _ => false,
        }
    }

    /// Check if the error is a failed condition on a put or update
    pub fn is_conditional_check_failed(&self) -> bool {
        match self {
            Error::ConditionalCheckFailed => true,
            Error::DynamoUpdateError(e) => matches!(
                e.as_service_error(),
                Some(UpdateItemError::ConditionalCheckFailedException(_))
            ),
            Error::DynamoPutError(e) => matches!(
                e.as_service_error(),
                Some(PutItemError::ConditionalCheckFailedException(_))
            ),
            _ => false,
        }
    }

    /// Check if an update targeted an item that does not exist
    pub fn is_item_not_found(&self) -> bool {
        matches!(self, Error::ItemNotFound { .. })
    }

    /// Check if the error was raised before any store call because of bad input
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Error::MissingHashKey
                | Error::InvalidBizId(_)
                | Error::InvalidBucketId(_)
                | Error::InvalidSchema(_)
        )
    }

    /// Check if the error is a serialization/deserialization error
    pub fn is_serialization_error(&self) -> bool {
        matches!(self, Error::SerdeDynamo(_))
    }
}

macro_rules! impl_from_error {
    ($name:ident, $variant:ident) => {
        impl From<$name> for Error {
            fn from(e: $name) -> Self {
                Error::$variant(e)
            }
        }
    };
    ($name:ident) => {
        impl From<$name> for Error {
            fn from(e: $name) -> Self {
                Error::$name(e)
            }
        }
    };
}

impl_from_error!(SerdeDynamoError, SerdeDynamo);
impl_from_error!(BuildError);
impl_from_error!(DynamoPutError);
impl_from_error!(DynamoGetError);
impl_from_error!(DynamoUpdateError);
impl_from_error!(DynamoQueryError);
impl_from_error!(DynamoCreateTableError);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SerdeDynamo(e) => write!(f, "DynamoDB serialization error: {}", e),
            Error::BuildError(e) => write!(f, "DynamoDB request builder error: {}", e),
            Error::DynamoPutError(e) => {
                write!(f, "DynamoDB PutItem operation failed: {}", e)
            }
            Error::DynamoGetError(e) => {
                write!(f, "DynamoDB GetItem operation failed: {}", e)
            }
            Error::DynamoQueryError(e) => {
                write!(f, "DynamoDB Query operation failed: {}", e)
            }
            Error::DynamoUpdateError(e) => {
                write!(f, "DynamoDB UpdateItem operation failed: {}", e)
            }
            Error::DynamoCreateTableError(e) => {
                write!(f, "DynamoDB CreateTable operation failed: {}", e)
            }
            Error::ConditionalCheckFailed => write!(f, "conditional check failed"),
            Error::ResourceNotFound(what) => write!(f, "resource not found: {}", what),
            Error::InvalidDocumentPath(path) => {
                write!(f, "document path is invalid for update: {}", path)
            }
            Error::ItemNotFound {
                bucket_id,
                window,
                item_id,
            } => write!(
                f,
                "item {} not found in bucket {}/{}",
                item_id, bucket_id, window
            ),
            Error::UpdateConflict { item_id } => {
                write!(f, "item {} was modified concurrently", item_id)
            }
            Error::BucketFull(key) => write!(f, "bucket {} is full", key),
            Error::MissingHashKey => write!(f, "can not add an item without hash key"),
            Error::InvalidBizId(biz_id) => write!(f, "invalid biz id: {}", biz_id),
            Error::InvalidBucketId(bucket_id) => write!(f, "invalid bucket id: {}", bucket_id),
            Error::InvalidSchema(reason) => write!(f, "invalid bucket schema: {}", reason),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::SerdeDynamo(e) => Some(e),
            Error::BuildError(e) => Some(e),
            Error::DynamoPutError(e) => Some(e),
            Error::DynamoGetError(e) => Some(e),
            Error::DynamoQueryError(e) => Some(e),
            Error::DynamoUpdateError(e) => Some(e),
            Error::DynamoCreateTableError(e) => Some(e),
            _ => None,
        }
    }
}
