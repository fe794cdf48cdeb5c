//! In-memory store for tests and dry runs.

use std::{collections::BTreeMap, sync::Mutex};

use async_trait::async_trait;

use crate::{
    Error, Result,
    store::{ChangedFields, ChannelStore, ExecutionStore, ItemStore},
    types::{Channel, ChannelExecution, ExecutionStatus, Item, ItemChannelStatus},
};

#[derive(Debug, Clone)]
struct Relation {
    tenant_id: String,
    relation_id: i64,
    item_id: i64,
    target_id: i64,
    order: i64,
}

#[derive(Default)]
struct State {
    next_id: i64,
    channels: BTreeMap<i64, Channel>,
    items: BTreeMap<i64, Item>,
    relations: Vec<Relation>,
    executions: BTreeMap<i64, ChannelExecution>,
}

impl State {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// `BTreeMap`-backed store. Nothing is persisted.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ChannelStore for InMemoryStore {
    async fn get_channel(&self, id: i64) -> Result<Option<Channel>> {
        Ok(self.state().channels.get(&id).cloned())
    }

    async fn find_channel(&self, tenant_id: &str, identifier: &str) -> Result<Option<Channel>> {
        Ok(self
            .state()
            .channels
            .values()
            .find(|c| c.tenant_id == tenant_id && c.identifier == identifier)
            .cloned())
    }

    async fn list_channels(&self, tenants: &[String]) -> Result<Vec<Channel>> {
        let mut out: Vec<Channel> = self
            .state()
            .channels
            .values()
            .filter(|c| tenants.is_empty() || tenants.contains(&c.tenant_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn upsert_channel(&self, channel: &Channel) -> Result<i64> {
        let mut state = self.state();
        let existing = state
            .channels
            .values()
            .find(|c| c.tenant_id == channel.tenant_id && c.identifier == channel.identifier)
            .map(|c| c.id);
        let id = match existing {
            Some(id) => id,
            None => state.allocate(),
        };
        let mut stored = channel.clone();
        stored.id = id;
        state.channels.insert(id, stored);
        Ok(id)
    }
}

#[async_trait]
impl ItemStore for InMemoryStore {
    async fn get_item(&self, id: i64) -> Result<Option<Item>> {
        Ok(self.state().items.get(&id).cloned())
    }

    async fn insert_item(&self, item: &Item) -> Result<i64> {
        let mut state = self.state();
        let id = state.allocate();
        let mut stored = item.clone();
        stored.id = id;
        state.items.insert(id, stored);
        Ok(id)
    }

    async fn save_item(&self, item: &Item, changed: ChangedFields) -> Result<()> {
        let mut state = self.state();
        let stored = state
            .items
            .get_mut(&item.id)
            .ok_or_else(|| Error::not_found("item", item.id))?;
        if changed.values {
            stored.values = item.values.clone();
        }
        if changed.channels {
            stored.channels = item.channels.clone();
        }
        Ok(())
    }

    async fn count_by_channel_status(
        &self,
        tenant_id: &str,
        channel: &str,
        status: ItemChannelStatus,
    ) -> Result<u64> {
        Ok(self
            .find_by_channel_status(tenant_id, channel, status)
            .await?
            .len() as u64)
    }

    async fn find_by_channel_status(
        &self,
        tenant_id: &str,
        channel: &str,
        status: ItemChannelStatus,
    ) -> Result<Vec<Item>> {
        Ok(self
            .state()
            .items
            .values()
            .filter(|i| i.tenant_id == tenant_id && i.channel_status(channel) == Some(status))
            .cloned()
            .collect())
    }

    async fn find_with_value(&self, tenant_id: &str, attr: &str) -> Result<Vec<Item>> {
        Ok(self
            .state()
            .items
            .values()
            .filter(|i| {
                i.tenant_id == tenant_id
                    && i.values.get(attr).is_some_and(|v| {
                        !v.is_null() && v.as_str().is_none_or(|s| !s.is_empty())
                    })
            })
            .cloned()
            .collect())
    }

    async fn add_relation(
        &self,
        tenant_id: &str,
        relation_id: i64,
        item_id: i64,
        target_id: i64,
        order: i64,
    ) -> Result<()> {
        self.state().relations.push(Relation {
            tenant_id: tenant_id.to_string(),
            relation_id,
            item_id,
            target_id,
            order,
        });
        Ok(())
    }

    async fn find_relation_sources(
        &self,
        tenant_id: &str,
        relation_id: i64,
        target_id: i64,
    ) -> Result<Vec<Item>> {
        let state = self.state();
        Ok(state
            .relations
            .iter()
            .filter(|r| {
                r.tenant_id == tenant_id && r.relation_id == relation_id && r.target_id == target_id
            })
            .filter_map(|r| state.items.get(&r.item_id).cloned())
            .collect())
    }

    async fn find_relation_targets(
        &self,
        tenant_id: &str,
        item_id: i64,
        relation_ids: &[i64],
    ) -> Result<Vec<Item>> {
        let state = self.state();
        let mut rels: Vec<&Relation> = state
            .relations
            .iter()
            .filter(|r| {
                r.tenant_id == tenant_id
                    && r.item_id == item_id
                    && relation_ids.contains(&r.relation_id)
            })
            .collect();
        rels.sort_by_key(|r| (r.order, r.target_id));
        Ok(rels
            .into_iter()
            .filter_map(|r| state.items.get(&r.target_id).cloned())
            .collect())
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn create_execution(&self, execution: &ChannelExecution) -> Result<i64> {
        let mut state = self.state();
        let id = state.allocate();
        let mut stored = execution.clone();
        stored.id = id;
        state.executions.insert(id, stored);
        Ok(id)
    }

    async fn finish_execution(
        &self,
        id: i64,
        status: ExecutionStatus,
        log: &str,
        finished_at_ms: u64,
    ) -> Result<()> {
        let mut state = self.state();
        let exec = state
            .executions
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("execution", id))?;
        exec.status = status;
        exec.log = log.to_string();
        exec.finished_at_ms = Some(finished_at_ms);
        Ok(())
    }

    async fn list_executions(
        &self,
        channel_id: i64,
        limit: usize,
    ) -> Result<Vec<ChannelExecution>> {
        Ok(self
            .state()
            .executions
            .values()
            .rev()
            .filter(|e| e.channel_id == channel_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
