use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::operation::create_table::{CreateTableError, CreateTableOutput};
use aws_sdk_dynamodb::types::{
    AttributeDefinition, KeySchemaElement, KeyType, ProvisionedThroughput, ScalarAttributeType,
};
use tracing::debug;

use crate::bucket::{KEY_BUCKET_ID, KEY_START_BUCKET_WINDOW};
use crate::dynamodb_client;
use crate::error::Error;

/// Create a bucket table: `bucket_id` (S) hash key, `start_bucket_window` (N) range key
///
/// An already existing table is not an error.
pub async fn bucket_table(client: &Client, table_name: &str) -> Result<CreateTableOutput, Error> {
    let builder = client
        .create_table()
        .table_name(table_name)
        .key_schema(
            KeySchemaElement::builder()
                .attribute_name(KEY_BUCKET_ID)
                .key_type(KeyType::Hash)
                .build()?,
        )
        .key_schema(
            KeySchemaElement::builder()
                .attribute_name(KEY_START_BUCKET_WINDOW)
                .key_type(KeyType::Range)
                .build()?,
        )
        .attribute_definitions(
            AttributeDefinition::builder()
                .attribute_name(KEY_BUCKET_ID)
                .attribute_type(ScalarAttributeType::S)
                .build()?,
        )
        .attribute_definitions(
            AttributeDefinition::builder()
                .attribute_name(KEY_START_BUCKET_WINDOW)
                .attribute_type(ScalarAttributeType::N)
                .build()?,
        )
        .provisioned_throughput(
            ProvisionedThroughput::builder()
                .read_capacity_units(10)
                .write_capacity_units(10)
                .build()?,
        );

    match builder.send().await {
        Ok(output) => {
            debug!(table = table_name, "created bucket table");
            Ok(output)
        }
        Err(e) => {
            if let Some(CreateTableError::ResourceInUseException(_)) = e.as_service_error() {
                debug!(table = table_name, "bucket table already exists");
                return Ok(CreateTableOutput::builder().build());
            }
            Err(e.into())
        }
    }
}

/// Create a bucket table through the global client
pub async fn bucket_table_global(table_name: &str) -> Result<CreateTableOutput, Error> {
    bucket_table(dynamodb_client().await, table_name).await
}
