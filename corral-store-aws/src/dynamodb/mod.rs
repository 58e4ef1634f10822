//! DynamoDB store implementation
//!
//! Provides [`DynamoStore`], the [`StoreClient`] backend over Amazon
//! DynamoDB, plus the administrative table glue (create, delete, describe,
//! wait-until-active) that sits outside the core contract.

pub mod convert;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::{
    AttributeDefinition, KeySchemaElement, ProvisionedThroughput, ScalarAttributeType,
    StreamSpecification, TableStatus,
};
use aws_sdk_dynamodb::Client;
use aws_smithy_types::timeout::TimeoutConfig;
use convert::{attrs_to_item, item_to_attrs, value_to_attr};
use corral_store::retry::{poll_until, RetryPolicy};
use corral_store::{Item, Result, ScanPage, ScanRequest, StoreClient, StoreError, UpdateParams};
use serde_json::Value;
use std::time::Duration;

/// DynamoDB backend configuration
#[derive(Debug, Clone, Default)]
pub struct DynamoConfig {
    /// AWS region override (uses the SDK default when absent)
    pub region: Option<String>,
    /// Endpoint override (e.g. LocalStack)
    pub endpoint: Option<String>,
    /// Operation timeout in milliseconds
    pub timeout_ms: Option<u64>,
}

/// Partition key attribute type for [`DynamoStore::create_simple_table`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyType {
    #[default]
    String,
    Number,
    Binary,
}

impl KeyType {
    fn scalar(self) -> ScalarAttributeType {
        match self {
            KeyType::String => ScalarAttributeType::S,
            KeyType::Number => ScalarAttributeType::N,
            KeyType::Binary => ScalarAttributeType::B,
        }
    }
}

/// Default wait budget for [`DynamoStore::wait_until_active`]: 50 retries
/// at one second, fixed interval.
pub const TABLE_WAIT_POLICY: RetryPolicy = RetryPolicy::new(Duration::from_secs(1), 50);

/// DynamoDB-backed store client
#[derive(Clone)]
pub struct DynamoStore {
    client: Client,
}

impl std::fmt::Debug for DynamoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoStore").finish()
    }
}

impl DynamoStore {
    /// Create a new DynamoDB store client.
    ///
    /// Builds the service config by inheriting from `sdk_config` (preserves
    /// HTTP client, retry config, credentials, sleep impl) and then applies
    /// the overrides in `config`. A region must be resolvable from one of
    /// the two.
    pub async fn new(sdk_config: &aws_config::SdkConfig, config: DynamoConfig) -> Result<Self> {
        if sdk_config.region().is_none() && config.region.is_none() {
            return Err(StoreError::MissingRegion);
        }

        let mut builder = aws_sdk_dynamodb::config::Builder::from(sdk_config);
        if let Some(region) = config.region {
            builder = builder.region(aws_sdk_dynamodb::config::Region::new(region));
        }
        if let Some(endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if let Some(timeout_ms) = config.timeout_ms {
            let timeout_config = TimeoutConfig::builder()
                .operation_timeout(Duration::from_millis(timeout_ms))
                .build();
            builder = builder.timeout_config(timeout_config);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
        })
    }

    /// Create from a pre-built client (for testing)
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Create a table with a single hash key and modest provisioned
    /// throughput (5/5), streams disabled.
    pub async fn create_simple_table(
        &self,
        table: &str,
        key_attr: &str,
        key_type: KeyType,
    ) -> Result<()> {
        let attribute = AttributeDefinition::builder()
            .attribute_name(key_attr)
            .attribute_type(key_type.scalar())
            .build()
            .map_err(|e| StoreError::invalid_config(e.to_string()))?;
        let key_schema = KeySchemaElement::builder()
            .attribute_name(key_attr)
            .key_type(aws_sdk_dynamodb::types::KeyType::Hash)
            .build()
            .map_err(|e| StoreError::invalid_config(e.to_string()))?;
        let throughput = ProvisionedThroughput::builder()
            .read_capacity_units(5)
            .write_capacity_units(5)
            .build()
            .map_err(|e| StoreError::invalid_config(e.to_string()))?;
        let streams = StreamSpecification::builder()
            .stream_enabled(false)
            .build()
            .map_err(|e| StoreError::invalid_config(e.to_string()))?;

        tracing::debug!(table, key_attr, ?key_type, "CreateTable");
        self.client
            .create_table()
            .table_name(table)
            .attribute_definitions(attribute)
            .key_schema(key_schema)
            .provisioned_throughput(throughput)
            .stream_specification(streams)
            .send()
            .await
            .map_err(|e| classify("CreateTable", e))?;
        Ok(())
    }

    /// Delete a table
    pub async fn delete_table(&self, table: &str) -> Result<()> {
        tracing::debug!(table, "DeleteTable");
        self.client
            .delete_table()
            .table_name(table)
            .send()
            .await
            .map_err(|e| classify("DeleteTable", e))?;
        Ok(())
    }

    /// Fetch the table's current status, `None` when the description
    /// carries none.
    pub async fn describe_table(&self, table: &str) -> Result<Option<TableStatus>> {
        let response = self
            .client
            .describe_table()
            .table_name(table)
            .send()
            .await
            .map_err(|e| classify("DescribeTable", e))?;
        Ok(response.table().and_then(|t| t.table_status().cloned()))
    }

    /// Poll [`describe_table`](Self::describe_table) until the table
    /// reports ACTIVE.
    ///
    /// Use [`TABLE_WAIT_POLICY`] for the stock budget. Exhaustion surfaces
    /// the last not-active probe failure.
    pub async fn wait_until_active(&self, table: &str, policy: RetryPolicy) -> Result<()> {
        poll_until(policy, move || {
            let store = self;
            async move {
                match store.describe_table(table).await? {
                    Some(TableStatus::Active) => Ok(()),
                    status => Err(StoreError::store(format!(
                        "table `{table}` not active yet: {status:?}"
                    ))),
                }
            }
        })
        .await
    }
}

#[async_trait]
impl StoreClient for DynamoStore {
    async fn get(&self, table: &str, key_attr: &str, key_value: &Value) -> Result<Option<Item>> {
        tracing::debug!(table, key_attr, %key_value, "GetItem");
        let response = self
            .client
            .get_item()
            .table_name(table)
            .key(key_attr, value_to_attr(key_value))
            .send()
            .await
            .map_err(|e| classify("GetItem", e))?;
        Ok(response.item().map(attrs_to_item))
    }

    async fn put(&self, table: &str, item: Item) -> Result<()> {
        tracing::debug!(table, ?item, "PutItem");
        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(item_to_attrs(&item)))
            .send()
            .await
            .map_err(|e| classify("PutItem", e))?;
        Ok(())
    }

    async fn put_unique(&self, table: &str, item: Item, key_attr: &str) -> Result<()> {
        tracing::debug!(table, key_attr, ?item, "PutItem (unique)");
        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(item_to_attrs(&item)))
            .condition_expression("attribute_not_exists(#key)")
            .expression_attribute_names("#key", key_attr)
            .send()
            .await
            .map_err(|e| classify("PutItem", e))?;
        Ok(())
    }

    async fn delete(&self, table: &str, key_attr: &str, key_value: &Value) -> Result<()> {
        tracing::debug!(table, key_attr, %key_value, "DeleteItem");
        self.client
            .delete_item()
            .table_name(table)
            .key(key_attr, value_to_attr(key_value))
            .send()
            .await
            .map_err(|e| classify("DeleteItem", e))?;
        Ok(())
    }

    async fn update(&self, table: &str, params: &UpdateParams) -> Result<()> {
        tracing::debug!(
            table,
            update = params.update_expression(),
            condition = ?params.condition_expression(),
            "UpdateItem"
        );
        let mut request = self
            .client
            .update_item()
            .table_name(table)
            .key(params.key_attribute(), value_to_attr(params.key_value()))
            .update_expression(params.update_expression());
        if let Some(condition) = params.condition_expression() {
            request = request.condition_expression(condition);
        }
        for (placeholder, name) in params.names() {
            request = request.expression_attribute_names(placeholder, name);
        }
        for (placeholder, value) in params.values() {
            request = request.expression_attribute_values(placeholder, value_to_attr(value));
        }
        request
            .send()
            .await
            .map_err(|e| classify("UpdateItem", e))?;
        Ok(())
    }

    async fn scan_page(
        &self,
        table: &str,
        request: &ScanRequest,
        cursor: Option<&Item>,
    ) -> Result<ScanPage> {
        tracing::debug!(table, filter = ?request.filter_expression, resumed = cursor.is_some(), "Scan");
        let mut scan = self.client.scan().table_name(table);
        if let Some(filter) = &request.filter_expression {
            scan = scan.filter_expression(filter);
        }
        for (placeholder, name) in &request.names {
            scan = scan.expression_attribute_names(placeholder, name);
        }
        for (placeholder, value) in &request.values {
            scan = scan.expression_attribute_values(placeholder, value_to_attr(value));
        }
        if let Some(limit) = request.limit {
            scan = scan.limit(limit as i32);
        }
        if let Some(cursor) = cursor {
            scan = scan.set_exclusive_start_key(Some(item_to_attrs(cursor)));
        }

        let response = scan.send().await.map_err(|e| classify("Scan", e))?;
        let items = response.items().iter().map(attrs_to_item).collect();
        let cursor = match response.last_evaluated_key() {
            Some(key) if !key.is_empty() => Some(attrs_to_item(key)),
            _ => None,
        };
        Ok(ScanPage { items, cursor })
    }
}

/// Map an SDK failure onto the store error contract.
///
/// Conditional-check failures are the retry signal conditional writers
/// depend on; throttling and server faults keep their own shapes so callers
/// can tell them apart. Everything else propagates as an opaque store
/// error.
fn classify<E>(op: &str, err: SdkError<E>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match err.code() {
        Some("ConditionalCheckFailedException") => StoreError::ConditionFailed,
        Some(
            "ProvisionedThroughputExceededException" | "ThrottlingException"
            | "RequestLimitExceeded",
        ) => StoreError::throttled(format!("DynamoDB {op}: {err}")),
        Some("InternalServerError" | "ServiceUnavailable") => {
            StoreError::unavailable(format!("DynamoDB {op}: {err}"))
        }
        _ => StoreError::store(format!("DynamoDB {op} failed: {err}")),
    }
}
