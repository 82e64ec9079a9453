//! DynamoDB-backed [`LockStore`].
//!
//! Table layout: partition key `lockKey` (S), no sort key. Timestamps are
//! stored as epoch milliseconds; `ttl` holds the expiry in epoch seconds so
//! the table's native TTL reaper eventually removes abandoned locks.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use kiro_core::lock::{LockRecord, LockStatus};
use kiro_core::types::{Environment, Timestamp};

use crate::store::{LockStore, StoreError};

pub const ATTR_LOCK_KEY: &str = "lockKey";
pub const ATTR_LOCK_TOKEN: &str = "lockToken";
pub const ATTR_WORK_ITEM_ID: &str = "workItemId";
pub const ATTR_BUILD_ID: &str = "buildId";
pub const ATTR_ACQUIRED_AT: &str = "acquiredAt";
pub const ATTR_EXPIRES_AT: &str = "expiresAt";
pub const ATTR_STATUS: &str = "status";
pub const ATTR_ENVIRONMENT: &str = "environment";
pub const ATTR_TTL: &str = "ttl";

type Item = HashMap<String, AttributeValue>;

/// Lock store over a single DynamoDB table.
pub struct DynamoDbLockStore {
    client: Client,
    table_name: String,
}

impl DynamoDbLockStore {
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

#[async_trait]
impl LockStore for DynamoDbLockStore {
    async fn put_if_absent_or_expired(
        &self,
        record: &LockRecord,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(record_to_item(record)))
            .condition_expression("attribute_not_exists(#key) OR #expires < :now")
            .expression_attribute_names("#key", ATTR_LOCK_KEY)
            .expression_attribute_names("#expires", ATTR_EXPIRES_AT)
            .expression_attribute_values(":now", millis(now))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception()) =>
            {
                Err(StoreError::ConditionFailed)
            }
            Err(err) => Err(StoreError::backend_with_source(
                format!("PutItem on {}: {}", self.table_name, DisplayErrorContext(&err)),
                err,
            )),
        }
    }

    async fn delete_if_token_matches(
        &self,
        lock_key: &str,
        lock_token: &str,
    ) -> Result<(), StoreError> {
        let result = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key(ATTR_LOCK_KEY, AttributeValue::S(lock_key.to_string()))
            .condition_expression("#token = :token")
            .expression_attribute_names("#token", ATTR_LOCK_TOKEN)
            .expression_attribute_values(":token", AttributeValue::S(lock_token.to_string()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception()) =>
            {
                Err(StoreError::ConditionFailed)
            }
            Err(err) => Err(StoreError::backend_with_source(
                format!("DeleteItem on {}: {}", self.table_name, DisplayErrorContext(&err)),
                err,
            )),
        }
    }

    async fn query_expired_in_progress(
        &self,
        lock_key: &str,
        now: Timestamp,
    ) -> Result<Vec<LockRecord>, StoreError> {
        let output = self
            .client
            .query()
            .table_name(&self.table_name)
            .consistent_read(true)
            .key_condition_expression("#key = :key")
            .filter_expression("#expires < :now AND #status = :in_progress")
            .expression_attribute_names("#key", ATTR_LOCK_KEY)
            .expression_attribute_names("#expires", ATTR_EXPIRES_AT)
            .expression_attribute_names("#status", ATTR_STATUS)
            .expression_attribute_values(":key", AttributeValue::S(lock_key.to_string()))
            .expression_attribute_values(":now", millis(now))
            .expression_attribute_values(
                ":in_progress",
                AttributeValue::S(LockStatus::InProgress.as_str().to_string()),
            )
            .send()
            .await
            .map_err(|err| {
                StoreError::backend_with_source(
                    format!("Query on {}: {}", self.table_name, DisplayErrorContext(&err)),
                    err,
                )
            })?;

        output.items().iter().map(item_to_record).collect()
    }
}

// ---------------------------------------------------------------------------
// Item conversion
// ---------------------------------------------------------------------------

fn millis(ts: Timestamp) -> AttributeValue {
    AttributeValue::N(ts.timestamp_millis().to_string())
}

/// Encode a record as a DynamoDB item.
pub fn record_to_item(record: &LockRecord) -> Item {
    HashMap::from([
        (ATTR_LOCK_KEY.to_string(), AttributeValue::S(record.lock_key.clone())),
        (ATTR_LOCK_TOKEN.to_string(), AttributeValue::S(record.lock_token.clone())),
        (ATTR_WORK_ITEM_ID.to_string(), AttributeValue::S(record.work_item_id.clone())),
        (ATTR_BUILD_ID.to_string(), AttributeValue::S(record.build_id.clone())),
        (ATTR_ACQUIRED_AT.to_string(), millis(record.acquired_at)),
        (ATTR_EXPIRES_AT.to_string(), millis(record.expires_at)),
        (ATTR_STATUS.to_string(), AttributeValue::S(record.status.as_str().to_string())),
        (
            ATTR_ENVIRONMENT.to_string(),
            AttributeValue::S(record.environment.as_str().to_string()),
        ),
        (
            ATTR_TTL.to_string(),
            AttributeValue::N(record.expires_at.timestamp().to_string()),
        ),
    ])
}

/// Decode a DynamoDB item into a record.
pub fn item_to_record(item: &Item) -> Result<LockRecord, StoreError> {
    let status: LockStatus = string_attr(item, ATTR_STATUS)?
        .parse()
        .map_err(|e| StoreError::Malformed(format!("{e}")))?;
    let environment: Environment = string_attr(item, ATTR_ENVIRONMENT)?
        .parse()
        .map_err(|e| StoreError::Malformed(format!("{e}")))?;

    Ok(LockRecord {
        lock_key: string_attr(item, ATTR_LOCK_KEY)?,
        lock_token: string_attr(item, ATTR_LOCK_TOKEN)?,
        work_item_id: string_attr(item, ATTR_WORK_ITEM_ID)?,
        build_id: string_attr(item, ATTR_BUILD_ID)?,
        acquired_at: timestamp_attr(item, ATTR_ACQUIRED_AT)?,
        expires_at: timestamp_attr(item, ATTR_EXPIRES_AT)?,
        status,
        environment,
    })
}

fn string_attr(item: &Item, name: &str) -> Result<String, StoreError> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| StoreError::Malformed(format!("missing string attribute '{name}'")))
}

fn timestamp_attr(item: &Item, name: &str) -> Result<Timestamp, StoreError> {
    let raw = item
        .get(name)
        .and_then(|v| v.as_n().ok())
        .ok_or_else(|| StoreError::Malformed(format!("missing number attribute '{name}'")))?;
    raw.parse::<i64>()
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .ok_or_else(|| StoreError::Malformed(format!("invalid timestamp '{raw}' in '{name}'")))
}
