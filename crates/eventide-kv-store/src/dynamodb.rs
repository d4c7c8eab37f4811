//! [`ItemTable`] over Amazon DynamoDB.
//!
//! The table needs `EventStream` (string) as partition key, `Version`
//! (number) as sort key, and a global secondary index named
//! [`INDEX_BY_TYPE`] keyed by `EventType` and `Version` that projects all
//! attributes.

use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::types::AttributeValue as DynamoValue;
use tracing::trace;

use crate::attribute::{AttributeValue, Item};
use crate::table::{
    FIELD_EVENT_STREAM, FIELD_EVENT_TYPE, FIELD_VERSION, INDEX_BY_TYPE, ItemTable, TableError,
};

/// An item in the SDK's own representation.
pub type DynamoItem = HashMap<String, DynamoValue>;

/// A DynamoDB table holding event items.
#[derive(Debug, Clone)]
pub struct DynamoDbTable {
    client: Client,
    table_name: String,
}

impl DynamoDbTable {
    /// Wraps an already configured client.
    #[must_use]
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    /// Name of the underlying table.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

#[async_trait]
impl ItemTable for DynamoDbTable {
    async fn put_item_if_absent(&self, item: Item) -> Result<(), TableError> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(to_dynamo_item(item)))
            .condition_expression("attribute_not_exists(#v)")
            .expression_attribute_names("#v", FIELD_VERSION)
            .send()
            .await
            .map_err(put_error)?;
        Ok(())
    }

    async fn query_stream(&self, stream: &str, from_version: u64) -> Result<Vec<Item>, TableError> {
        let mut items = Vec::new();
        let mut start_key: Option<DynamoItem> = None;
        loop {
            let page = self
                .client
                .query()
                .table_name(&self.table_name)
                .consistent_read(true)
                .key_condition_expression("#s = :s AND #v >= :v")
                .expression_attribute_names("#s", FIELD_EVENT_STREAM)
                .expression_attribute_names("#v", FIELD_VERSION)
                .expression_attribute_values(":s", DynamoValue::S(stream.to_owned()))
                .expression_attribute_values(":v", DynamoValue::N(from_version.to_string()))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(service)?;

            for item in page.items() {
                items.push(from_dynamo_item(item.clone())?);
            }
            match page.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }
        trace!(stream, count = items.len(), "queried stream");
        Ok(items)
    }

    async fn query_latest_by_type(
        &self,
        event_type: &str,
        stream: &str,
    ) -> Result<Option<Item>, TableError> {
        let mut start_key: Option<DynamoItem> = None;
        loop {
            let page = self
                .client
                .query()
                .table_name(&self.table_name)
                .index_name(INDEX_BY_TYPE)
                .scan_index_forward(false)
                .key_condition_expression("#t = :t")
                .filter_expression("#s = :s")
                .expression_attribute_names("#t", FIELD_EVENT_TYPE)
                .expression_attribute_names("#s", FIELD_EVENT_STREAM)
                .expression_attribute_values(":t", DynamoValue::S(event_type.to_owned()))
                .expression_attribute_values(":s", DynamoValue::S(stream.to_owned()))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(service)?;

            if let Some(item) = page.items().first() {
                return from_dynamo_item(item.clone()).map(Some);
            }
            match page.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => return Ok(None),
            }
        }
    }
}

fn put_error<R>(error: SdkError<PutItemError, R>) -> TableError
where
    R: Debug + Send + Sync + 'static,
{
    if error
        .as_service_error()
        .is_some_and(PutItemError::is_conditional_check_failed_exception)
    {
        TableError::ConditionalCheckFailed
    } else {
        service(error)
    }
}

fn service(error: impl std::error::Error + Send + Sync + 'static) -> TableError {
    TableError::Service(Box::new(error))
}

/// Converts an item into the SDK's representation.
#[must_use]
pub fn to_dynamo_item(item: Item) -> DynamoItem {
    item.into_iter()
        .map(|(name, value)| (name, to_dynamo(value)))
        .collect()
}

/// Converts an item returned by the SDK.
///
/// # Errors
///
/// Returns `TableError::UnsupportedAttribute` for binary and set attributes.
pub fn from_dynamo_item(item: DynamoItem) -> Result<Item, TableError> {
    item.into_iter()
        .map(|(name, value)| Ok((name, from_dynamo(value)?)))
        .collect()
}

fn to_dynamo(value: AttributeValue) -> DynamoValue {
    match value {
        AttributeValue::S(s) => DynamoValue::S(s),
        AttributeValue::N(n) => DynamoValue::N(n),
        AttributeValue::Bool(b) => DynamoValue::Bool(b),
        AttributeValue::Null => DynamoValue::Null(true),
        AttributeValue::L(items) => DynamoValue::L(items.into_iter().map(to_dynamo).collect()),
        AttributeValue::M(map) => DynamoValue::M(
            map.into_iter()
                .map(|(name, value)| (name, to_dynamo(value)))
                .collect(),
        ),
    }
}

fn from_dynamo(value: DynamoValue) -> Result<AttributeValue, TableError> {
    Ok(match value {
        DynamoValue::S(s) => AttributeValue::S(s),
        DynamoValue::N(n) => AttributeValue::N(n),
        DynamoValue::Bool(b) => AttributeValue::Bool(b),
        DynamoValue::Null(_) => AttributeValue::Null,
        DynamoValue::L(items) => AttributeValue::L(
            items
                .into_iter()
                .map(from_dynamo)
                .collect::<Result<_, _>>()?,
        ),
        DynamoValue::M(map) => AttributeValue::M(
            map.into_iter()
                .map(|(name, value)| Ok((name, from_dynamo(value)?)))
                .collect::<Result<_, TableError>>()?,
        ),
        other => return Err(TableError::UnsupportedAttribute(format!("{other:?}"))),
    })
}
