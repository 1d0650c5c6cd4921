use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::operation::get_item::GetItemError;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::query::QueryError;
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnConsumedCapacity, ReturnValue};
use aws_smithy_types_convert::stream::PaginationStreamExt;
use futures_util::TryStreamExt;
use std::fmt;

use super::expressions::ExpressionBuilder;
use super::{AttributePath, BucketStore, Condition, Record, UpdateRequest};
use crate::bucket::{BucketKey, BucketWindow, KEY_BUCKET_ID, KEY_START_BUCKET_WINDOW};
use crate::dynamodb_client;
use crate::error::Error;

/// Bucket table backed by DynamoDB
#[derive(Clone)]
pub struct DynamoBucketStore {
    client: Client,
    table_name: String,
}

impl fmt::Debug for DynamoBucketStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamoBucketStore")
            .field("table_name", &self.table_name)
            .finish_non_exhaustive()
    }
}

impl DynamoBucketStore {
    /// Store over an explicit client
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    /// Store over the global client, initializing it with defaults when needed
    pub async fn from_global(table_name: impl Into<String>) -> Self {
        Self::new(dynamodb_client().await.clone(), table_name)
    }

    /// Name of the backing table
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn not_found(&self) -> Error {
        Error::ResourceNotFound(self.table_name.clone())
    }
}

#[async_trait]
impl BucketStore for DynamoBucketStore {
    async fn get_item(
        &self,
        key: &BucketKey,
        projection: &[AttributePath],
    ) -> Result<Option<Record>, Error> {
        let mut expressions = ExpressionBuilder::new();
        let projection_expression = expressions.projection(projection);
        let (names, _) = expressions.build();

        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(key.to_key_map()))
            .set_projection_expression(projection_expression)
            .set_expression_attribute_names(names)
            .consistent_read(false)
            .send()
            .await;

        match result {
            Ok(output) => Ok(output.item),
            Err(e) => match e.as_service_error() {
                Some(GetItemError::ResourceNotFoundException(_)) => Err(self.not_found()),
                _ => Err(e.into()),
            },
        }
    }

    async fn query(
        &self,
        bucket_id: &str,
        start: &BucketWindow,
        end: &BucketWindow,
        projection: &[AttributePath],
        descending: bool,
    ) -> Result<Vec<Record>, Error> {
        let mut expressions = ExpressionBuilder::new();
        let partition = expressions.name(KEY_BUCKET_ID);
        let partition_value = expressions.value(AttributeValue::S(bucket_id.to_string()));
        let window = expressions.name(KEY_START_BUCKET_WINDOW);
        let start_value = expressions.value(start.to_attribute_value());
        let end_value = expressions.value(end.to_attribute_value());
        let key_condition = format!(
            "{partition} = {partition_value} AND {window} BETWEEN {start_value} AND {end_value}"
        );

        // Key attributes identify each returned window.
        let projection_expression = if projection.is_empty() {
            None
        } else {
            let mut paths = vec![
                AttributePath::new(KEY_BUCKET_ID),
                AttributePath::new(KEY_START_BUCKET_WINDOW),
            ];
            paths.extend(projection.iter().cloned());
            expressions.projection(&paths)
        };
        let (names, values) = expressions.build();

        let result: Result<Vec<Record>, _> = self
            .client
            .query()
            .table_name(&self.table_name)
            .key_condition_expression(key_condition)
            .set_projection_expression(projection_expression)
            .set_expression_attribute_names(names)
            .set_expression_attribute_values(values)
            .scan_index_forward(!descending)
            .into_paginator()
            .items()
            .send()
            .into_stream_03x()
            .try_collect()
            .await;

        match result {
            Ok(records) => Ok(records),
            Err(e) => match e.as_service_error() {
                Some(QueryError::ResourceNotFoundException(_)) => Err(self.not_found()),
                _ => Err(e.into()),
            },
        }
    }

    async fn update_item(&self, request: UpdateRequest) -> Result<(), Error> {
        if request.is_empty() {
            return Ok(());
        }

        let mut expressions = ExpressionBuilder::new();
        let update_expression = expressions.update(&request.sets, &request.removes);
        let condition_expression = request
            .condition
            .as_ref()
            .map(|condition| expressions.condition(condition));
        let (names, values) = expressions.build();

        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .set_return_consumed_capacity(None)
            .set_return_values(Some(ReturnValue::None))
            .set_key(Some(request.key.to_key_map()))
            .update_expression(update_expression)
            .set_condition_expression(condition_expression)
            .set_expression_attribute_names(names)
            .set_expression_attribute_values(values)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => match e.as_service_error() {
                Some(UpdateItemError::ConditionalCheckFailedException(_)) => {
                    Err(Error::ConditionalCheckFailed)
                }
                Some(UpdateItemError::ResourceNotFoundException(_)) => Err(self.not_found()),
                _ => Err(e.into()),
            },
        }
    }

    async fn put_item(
        &self,
        key: &BucketKey,
        attributes: Record,
        condition: Option<Condition>,
    ) -> Result<(), Error> {
        let mut item = attributes;
        item.extend(key.to_key_map());

        let mut expressions = ExpressionBuilder::new();
        let condition_expression = condition
            .as_ref()
            .map(|condition| expressions.condition(condition));
        let (names, values) = expressions.build();

        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .return_values(ReturnValue::None)
            .return_consumed_capacity(ReturnConsumedCapacity::None)
            .set_item(Some(item))
            .set_condition_expression(condition_expression)
            .set_expression_attribute_names(names)
            .set_expression_attribute_values(values)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => match e.as_service_error() {
                Some(PutItemError::ConditionalCheckFailedException(_)) => {
                    Err(Error::ConditionalCheckFailed)
                }
                Some(PutItemError::ResourceNotFoundException(_)) => Err(self.not_found()),
                _ => Err(e.into()),
            },
        }
    }
}
