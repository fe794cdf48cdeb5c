//! Test doubles shared by manager and factory tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    marketsync_channels::{
        CategoryNode, Channel, ChannelAttribute, ChannelHandler, ChannelType, Error, ExecutionLog,
        Item, ItemChannelEntry, ItemChannelStatus, ItemStore, RunRequest,
        store_memory::InMemoryStore,
    },
    serde_json::Value,
};

/// Handler that records its calls, optionally sleeping or failing.
#[derive(Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<(String, RunRequest)>>,
    delay: Option<Duration>,
    failure: Option<String>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Default::default()
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            failure: Some(message.to_string()),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> Vec<RunRequest> {
        self.lock().iter().map(|(_, r)| *r).collect()
    }

    pub fn seen_names(&self) -> Vec<String> {
        self.lock().iter().map(|(n, _)| n.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, RunRequest)>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ChannelHandler for RecordingHandler {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Ozon
    }

    async fn process_channel(
        &self,
        channel: &Channel,
        _language: &str,
        request: RunRequest,
        log: &mut ExecutionLog,
    ) -> marketsync_channels::Result<()> {
        log.line("Start");
        self.lock().push((channel.name.clone(), request));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(message) => Err(Error::missing_config(message)),
            None => Ok(()),
        }
    }

    async fn categories(&self, _channel: &Channel) -> marketsync_channels::Result<Vec<CategoryNode>> {
        Ok(Vec::new())
    }

    async fn attributes(
        &self,
        _channel: &Channel,
        _category_id: &str,
    ) -> marketsync_channels::Result<Vec<ChannelAttribute>> {
        Ok(Vec::new())
    }
}

/// Ozon channel `ozon` of tenant `t1` with the given config.
pub fn channel(config: Value) -> Channel {
    channel_for("t1", "ozon", config)
}

pub fn channel_for(tenant: &str, identifier: &str, config: Value) -> Channel {
    Channel {
        id: 1,
        tenant_id: tenant.into(),
        identifier: identifier.into(),
        name: String::new(),
        channel_type: ChannelType::Ozon,
        active: true,
        config: serde_json::from_value(config).unwrap_or_default(),
        mappings: Default::default(),
    }
}

/// Insert one item submitted to `channel`.
pub async fn seed_submitted(store: &InMemoryStore, channel: &str) {
    let mut item = Item {
        id: 0,
        tenant_id: "t1".into(),
        identifier: format!("item-{channel}"),
        type_id: 1,
        path: String::new(),
        name: Default::default(),
        values: Default::default(),
        channels: Default::default(),
    };
    item.channels
        .insert(channel.into(), ItemChannelEntry::new(ItemChannelStatus::Submitted));
    let _ = store.insert_item(&item).await;
}
