use async_trait::async_trait;

use crate::{
    Result,
    types::{Channel, ChannelExecution, ExecutionStatus, Item, ItemChannelStatus},
};

/// Which parts of an item a save touches. Stores write only flagged columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangedFields {
    pub values: bool,
    pub channels: bool,
}

impl ChangedFields {
    pub fn any(self) -> bool {
        self.values || self.channels
    }
}

/// Persistent channel definitions.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn get_channel(&self, id: i64) -> Result<Option<Channel>>;
    async fn find_channel(&self, tenant_id: &str, identifier: &str) -> Result<Option<Channel>>;
    /// Channels of the given tenants ordered by tenant id. An empty slice
    /// means every tenant.
    async fn list_channels(&self, tenants: &[String]) -> Result<Vec<Channel>>;
    /// Insert or update by `(tenant_id, identifier)`. Returns the row id.
    async fn upsert_channel(&self, channel: &Channel) -> Result<i64>;
}

/// Catalog items and their relations.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn get_item(&self, id: i64) -> Result<Option<Item>>;
    async fn insert_item(&self, item: &Item) -> Result<i64>;
    /// Write the flagged parts of `item` atomically.
    async fn save_item(&self, item: &Item, changed: ChangedFields) -> Result<()>;

    async fn count_by_channel_status(
        &self,
        tenant_id: &str,
        channel: &str,
        status: ItemChannelStatus,
    ) -> Result<u64>;
    async fn find_by_channel_status(
        &self,
        tenant_id: &str,
        channel: &str,
        status: ItemChannelStatus,
    ) -> Result<Vec<Item>>;
    /// Items with a non-empty value for attribute `attr`.
    async fn find_with_value(&self, tenant_id: &str, attr: &str) -> Result<Vec<Item>>;

    /// Record that `item_id` relates to `target_id` through `relation_id`.
    async fn add_relation(
        &self,
        tenant_id: &str,
        relation_id: i64,
        item_id: i64,
        target_id: i64,
        order: i64,
    ) -> Result<()>;
    /// Items that point at `target_id` through `relation_id`.
    async fn find_relation_sources(
        &self,
        tenant_id: &str,
        relation_id: i64,
        target_id: i64,
    ) -> Result<Vec<Item>>;
    /// Items `item_id` points at through any of `relation_ids`, in relation
    /// order.
    async fn find_relation_targets(
        &self,
        tenant_id: &str,
        item_id: i64,
        relation_ids: &[i64],
    ) -> Result<Vec<Item>>;
}

/// Execution history.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert a new execution. Returns its id.
    async fn create_execution(&self, execution: &ChannelExecution) -> Result<i64>;
    async fn finish_execution(
        &self,
        id: i64,
        status: ExecutionStatus,
        log: &str,
        finished_at_ms: u64,
    ) -> Result<()>;
    /// Most recent executions of a channel, newest first.
    async fn list_executions(&self, channel_id: i64, limit: usize)
    -> Result<Vec<ChannelExecution>>;
}

/// Everything the scheduler and handlers need from persistence.
pub trait Storage: ChannelStore + ItemStore + ExecutionStore {}

impl<T: ChannelStore + ItemStore + ExecutionStore> Storage for T {}
