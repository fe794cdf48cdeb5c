//! Refetch-merge-save for item updates made by handlers.
//!
//! Handlers work on item snapshots that may be minutes old. Instead of
//! writing the snapshot back, they describe the change as an [`ItemPatch`];
//! [`ItemWriter::apply`] reloads the row, applies only those keys, and
//! saves when something actually differs.

use std::{collections::BTreeMap, sync::Arc};

use {serde_json::Value, tracing::debug};

use crate::{
    Error, Result,
    store::{ChangedFields, ItemStore},
    types::{ItemChannelEntry, ItemChannelStatus},
};

/// New channel status for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPatch {
    pub status: ItemChannelStatus,
    pub message: String,
    pub synced_at: Option<u64>,
    pub category: Option<String>,
}

impl StatusPatch {
    pub fn new(status: ItemChannelStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            synced_at: None,
            category: None,
        }
    }

    #[must_use]
    pub fn synced_at(mut self, at: u64) -> Self {
        self.synced_at = Some(at);
        self
    }

    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Keys one run wants to change on an item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    pub status: Option<StatusPatch>,
    /// Attribute values to set. `null` removes the attribute.
    pub values: BTreeMap<String, Value>,
}

impl ItemPatch {
    pub fn status(status: StatusPatch) -> Self {
        Self {
            status: Some(status),
            values: BTreeMap::new(),
        }
    }

    pub fn set_status(&mut self, status: StatusPatch) {
        self.status = Some(status);
    }

    pub fn set_value(&mut self, attr: impl Into<String>, value: Value) {
        self.values.insert(attr.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.values.is_empty()
    }
}

/// Applies [`ItemPatch`]es for one channel.
#[derive(Clone)]
pub struct ItemWriter {
    store: Arc<dyn ItemStore>,
    channel: String,
    dependent_channels: Vec<String>,
}

impl ItemWriter {
    /// `dependent_channels` get their status reset to submitted whenever a
    /// patch changes item values.
    pub fn new(
        store: Arc<dyn ItemStore>,
        channel: impl Into<String>,
        dependent_channels: Vec<String>,
    ) -> Self {
        Self {
            store,
            channel: channel.into(),
            dependent_channels,
        }
    }

    /// Reload item `item_id`, merge `patch` into it and save the parts that
    /// changed. Returns what was written.
    pub async fn apply(&self, item_id: i64, patch: &ItemPatch) -> Result<ChangedFields> {
        let mut changed = ChangedFields::default();
        if patch.is_empty() {
            return Ok(changed);
        }
        let mut fresh = self
            .store
            .get_item(item_id)
            .await?
            .ok_or_else(|| Error::not_found("item", item_id))?;

        if let Some(status) = &patch.status {
            let created = !fresh.channels.contains_key(&self.channel);
            let entry = fresh
                .channels
                .entry(self.channel.clone())
                .or_insert_with(|| ItemChannelEntry::new(status.status));
            if created
                || entry.status != status.status
                || entry.message != status.message
                || (status.category.is_some() && entry.category != status.category)
            {
                entry.status = status.status;
                entry.message.clone_from(&status.message);
                if status.category.is_some() {
                    entry.category.clone_from(&status.category);
                }
                changed.channels = true;
            }
            if status.synced_at.is_some() && changed.channels {
                entry.synced_at = status.synced_at;
            }
        }

        for (attr, value) in &patch.values {
            let current = fresh.values.get(attr).unwrap_or(&Value::Null);
            if current == value {
                continue;
            }
            if value.is_null() {
                fresh.values.remove(attr);
            } else {
                fresh.values.insert(attr.clone(), value.clone());
            }
            changed.values = true;
        }

        if changed.values {
            let now = marketsync_common::time::now_ms();
            for dep in &self.dependent_channels {
                if dep == &self.channel {
                    continue;
                }
                if let Some(entry) = fresh.channels.get_mut(dep) {
                    entry.status = ItemChannelStatus::Submitted;
                    entry.message.clear();
                    entry.submitted_at = Some(now);
                    entry.submitted_by = Some("system".into());
                    changed.channels = true;
                }
            }
        }

        if changed.any() {
            debug!(
                item_id,
                channel = %self.channel,
                values = changed.values,
                channels = changed.channels,
                "saving item changes"
            );
            self.store.save_item(&fresh, changed).await?;
        }
        Ok(changed)
    }
}
