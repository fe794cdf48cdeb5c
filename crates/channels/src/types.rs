use std::{collections::BTreeMap, fmt, str::FromStr};

use {
    serde::{Deserialize, Deserializer, Serialize},
    serde_json::{Map, Value},
};

// ── Channels ────────────────────────────────────────────────────────────────

/// Marketplace family served by a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    /// Generic external export (files or a customer-side endpoint).
    External,
    Wildberries,
    Ozon,
    YandexMarket,
}

impl ChannelType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::External => "external",
            Self::Wildberries => "wildberries",
            Self::Ozon => "ozon",
            Self::YandexMarket => "yandex_market",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "external" => Ok(Self::External),
            "wildberries" => Ok(Self::Wildberries),
            "ozon" => Ok(Self::Ozon),
            "yandex_market" => Ok(Self::YandexMarket),
            other => Err(crate::Error::UnknownChannelType {
                channel_type: other.to_string(),
            }),
        }
    }
}

/// A tenant's connection to one marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    #[serde(default)]
    pub id: i64,
    pub tenant_id: String,
    pub identifier: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub config: ChannelConfig,
    /// Category mappings keyed by channel category id. Iteration order is the
    /// order in which categories are tried for an item.
    #[serde(default)]
    pub mappings: BTreeMap<String, CategoryMapping>,
}

fn default_true() -> bool {
    true
}

/// How a job slot is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum StartMode {
    /// No recurring job; runs only on demand.
    Manual,
    /// Every N minutes, aligned to the hour.
    Interval,
    /// Once a day at a wall-clock time.
    Daily,
    /// User-supplied cron expression.
    Cron,
}

impl From<u8> for StartMode {
    fn from(code: u8) -> Self {
        match code {
            0 | 1 => Self::Manual,
            2 => Self::Interval,
            4 => Self::Cron,
            _ => Self::Daily,
        }
    }
}

impl From<StartMode> for u8 {
    fn from(mode: StartMode) -> Self {
        match mode {
            StartMode::Manual => 1,
            StartMode::Interval => 2,
            StartMode::Daily => 3,
            StartMode::Cron => 4,
        }
    }
}

/// Trigger settings for one job slot, borrowed from [`ChannelConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSchedule<'a> {
    pub start: StartMode,
    pub interval: Option<u32>,
    pub cron: Option<&'a str>,
    pub time: Option<&'a str>,
}

/// Channel configuration: two schedule slots plus handler-specific keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<StartMode>,
    #[serde(default, deserialize_with = "lenient_u32", skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_start: Option<StartMode>,
    #[serde(default, deserialize_with = "lenient_u32", skip_serializing_if = "Option::is_none")]
    pub sync_interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub debug: bool,
    /// Handler-specific keys (credentials, attribute identifiers, relations).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChannelConfig {
    /// Trigger settings for the slot serving `mode`.
    pub fn schedule(&self, mode: RunMode) -> SlotSchedule<'_> {
        match mode {
            RunMode::Default => SlotSchedule {
                start: self.start.unwrap_or(StartMode::Manual),
                interval: self.interval,
                cron: self.cron.as_deref(),
                time: self.time.as_deref(),
            },
            RunMode::Sync => SlotSchedule {
                start: self.sync_start.unwrap_or(StartMode::Manual),
                interval: self.sync_interval,
                cron: self.sync_cron.as_deref(),
                time: self.sync_time.as_deref(),
            },
        }
    }

    /// Non-empty string setting. Numbers are rendered as text.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.extra.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// List of integer ids; accepts a single value or an array.
    pub fn get_ids(&self, key: &str) -> Vec<i64> {
        match self.extra.get(key) {
            Some(Value::Array(items)) => items.iter().filter_map(value_as_i64).collect(),
            Some(other) => value_as_i64(other).into_iter().collect(),
            None => Vec::new(),
        }
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_u32<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u32>, D::Error> {
    let raw = Option::<Value>::deserialize(de)?;
    Ok(raw
        .as_ref()
        .and_then(value_as_i64)
        .and_then(|n| u32::try_from(n).ok()))
}

fn lenient_i64<'de, D: Deserializer<'de>>(de: D) -> Result<Option<i64>, D::Error> {
    let raw = Option::<Value>::deserialize(de)?;
    Ok(raw.as_ref().and_then(value_as_i64))
}

fn id_list<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<String>, D::Error> {
    let raw = Option::<Value>::deserialize(de)?;
    let scalar = |v: &Value| match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    };
    Ok(match raw {
        Some(Value::Array(items)) => items.iter().filter_map(scalar).collect(),
        Some(other) => scalar(&other).into_iter().collect(),
        None => Vec::new(),
    })
}

// ── Mappings ────────────────────────────────────────────────────────────────

/// Binds catalog items to one marketplace category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryMapping {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Item type ids allowed in this category.
    #[serde(default, deserialize_with = "id_list")]
    pub valid: Vec<String>,
    /// Catalog tree node ids; an item matches when one is on its path.
    #[serde(default, deserialize_with = "id_list")]
    pub visible: Vec<String>,
    /// Match `visible` against items related to the item through this
    /// relation instead of the item itself.
    #[serde(default, deserialize_with = "lenient_i64", skip_serializing_if = "Option::is_none")]
    pub visible_relation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_expr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_attr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_attr_value: Option<Value>,
    #[serde(default)]
    pub attributes: Vec<AttributeMapping>,
}

impl CategoryMapping {
    /// Mapping rule for a marketplace field or attribute id.
    pub fn attribute(&self, id: &str) -> Option<&AttributeMapping> {
        self.attributes.iter().find(|a| a.id == id)
    }

    /// A mapping takes part in category resolution only when it restricts
    /// item types and has at least one visibility criterion.
    pub fn is_eligible(&self) -> bool {
        let has_expr = self.category_expr.as_deref().is_some_and(|e| !e.trim().is_empty());
        let has_attr = self.category_attr.as_deref().is_some_and(|a| !a.is_empty())
            && self
                .category_attr_value
                .as_ref()
                .is_some_and(marketsync_common::value::is_truthy);
        !self.valid.is_empty() && (!self.visible.is_empty() || has_expr || has_attr)
    }
}

/// Rule producing one marketplace field value from an item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeMapping {
    /// Field id: `#name`-style pseudo fields or `attr_<n>` schema attributes.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr_ident: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    /// Constant value used when neither `expr` nor `attrIdent` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Explicit value to dictionary id bindings.
    #[serde(default)]
    pub options: Vec<MappingOption>,
}

/// One explicit dictionary binding: catalog `name` maps to dictionary id `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingOption {
    pub name: Value,
    pub value: Value,
}

// ── Items ───────────────────────────────────────────────────────────────────

/// Per-channel status of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ItemChannelStatus {
    /// Waiting to be sent.
    Submitted,
    /// Accepted and visible on the marketplace.
    Synced,
    Error,
    /// Accepted by the marketplace, awaiting moderation.
    PendingModeration,
}

impl TryFrom<u8> for ItemChannelStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, String> {
        match code {
            1 => Ok(Self::Submitted),
            2 => Ok(Self::Synced),
            3 => Ok(Self::Error),
            4 => Ok(Self::PendingModeration),
            other => Err(format!("unknown item channel status: {other}")),
        }
    }
}

impl From<ItemChannelStatus> for u8 {
    fn from(status: ItemChannelStatus) -> Self {
        match status {
            ItemChannelStatus::Submitted => 1,
            ItemChannelStatus::Synced => 2,
            ItemChannelStatus::Error => 3,
            ItemChannelStatus::PendingModeration => 4,
        }
    }
}

/// Status record an item keeps for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemChannelEntry {
    pub status: ItemChannelStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_by: Option<String>,
}

impl ItemChannelEntry {
    pub fn new(status: ItemChannelStatus) -> Self {
        Self {
            status,
            message: String::new(),
            category: None,
            synced_at: None,
            submitted_at: None,
            submitted_by: None,
        }
    }
}

/// Catalog item as seen by channel handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(default)]
    pub id: i64,
    pub tenant_id: String,
    pub identifier: String,
    pub type_id: i64,
    /// Dotted list of catalog tree node ids from the root to this item.
    #[serde(default)]
    pub path: String,
    /// Display name per language.
    #[serde(default)]
    pub name: BTreeMap<String, String>,
    #[serde(default)]
    pub values: Map<String, Value>,
    #[serde(default)]
    pub channels: BTreeMap<String, ItemChannelEntry>,
}

impl Item {
    pub fn channel_status(&self, channel: &str) -> Option<ItemChannelStatus> {
        self.channels.get(channel).map(|c| c.status)
    }

    /// Path node ids from root to this item.
    pub fn path_nodes(&self) -> impl Iterator<Item = &str> {
        self.path.split('.').filter(|s| !s.is_empty())
    }
}

// ── Executions ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ExecutionStatus {
    Running,
    Success,
    Error,
}

impl TryFrom<u8> for ExecutionStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, String> {
        match code {
            1 => Ok(Self::Running),
            2 => Ok(Self::Success),
            3 => Ok(Self::Error),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

impl From<ExecutionStatus> for u8 {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Running => 1,
            ExecutionStatus::Success => 2,
            ExecutionStatus::Error => 3,
        }
    }
}

/// Record of one handler run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelExecution {
    #[serde(default)]
    pub id: i64,
    pub tenant_id: String,
    pub channel_id: i64,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub log: String,
    pub started_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    /// Artifact location for file-producing handlers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
}

impl ChannelExecution {
    pub fn running(channel: &Channel, started_at_ms: u64) -> Self {
        Self {
            id: 0,
            tenant_id: channel.tenant_id.clone(),
            channel_id: channel.id,
            status: ExecutionStatus::Running,
            log: String::new(),
            started_at_ms,
            finished_at_ms: None,
            storage_path: None,
        }
    }
}

// ── Runs ────────────────────────────────────────────────────────────────────

/// Which job slot a run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Full submission run.
    Default,
    Sync,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Sync => "sync",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a handler should do in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunRequest {
    /// Submit every item waiting for this channel.
    Full,
    /// Reconcile submitted items; `item` narrows it to one item.
    Sync { item: Option<i64> },
    /// Drop cached schemas and dictionaries; no item work.
    ClearCache,
}

impl RunRequest {
    pub fn mode(self) -> RunMode {
        match self {
            Self::Full => RunMode::Default,
            Self::Sync { .. } | Self::ClearCache => RunMode::Sync,
        }
    }
}
