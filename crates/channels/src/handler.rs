use {async_trait::async_trait, serde::Serialize, serde_json::Value};

use crate::{
    Result,
    types::{Channel, ChannelType, RunRequest},
};

// ── Execution log ───────────────────────────────────────────────────────────

/// Human-readable log accumulated during one handler run and stored on the
/// execution record.
#[derive(Debug, Default, Clone)]
pub struct ExecutionLog {
    text: String,
    debug: bool,
}

impl ExecutionLog {
    pub fn new(debug: bool) -> Self {
        Self {
            text: String::new(),
            debug,
        }
    }

    /// Append one line.
    pub fn line(&mut self, line: impl AsRef<str>) {
        self.text.push_str(line.as_ref());
        self.text.push('\n');
    }

    /// Append a line only when the channel has debug logging on.
    pub fn debug(&mut self, line: impl AsRef<str>) {
        if self.debug {
            self.line(line);
        }
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

// ── Marketplace schema ──────────────────────────────────────────────────────

/// Node of a marketplace category tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryNode {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CategoryNode>,
}

impl CategoryNode {
    /// Depth-first iterator over this node and all descendants.
    pub fn walk(&self) -> Vec<&CategoryNode> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }
}

/// Attribute a marketplace category accepts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelAttribute {
    pub id: String,
    pub name: String,
    pub required: bool,
    /// Values must come from a remote dictionary.
    pub dictionary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Channel category this attribute belongs to.
    pub category: String,
}

// ── Handler contract ────────────────────────────────────────────────────────

/// Marketplace-specific behavior behind a channel.
///
/// Handlers own item-level fault isolation: a failure processing one item is
/// recorded on that item and the run continues. An `Err` from
/// [`process_channel`](ChannelHandler::process_channel) marks the whole
/// execution failed.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// Channel type this handler serves.
    fn channel_type(&self) -> ChannelType;

    /// Perform one run. Progress goes to `log`; the caller persists it
    /// whatever the outcome.
    async fn process_channel(
        &self,
        channel: &Channel,
        language: &str,
        request: RunRequest,
        log: &mut ExecutionLog,
    ) -> Result<()>;

    /// Marketplace category tree, flattened under a synthetic root.
    async fn categories(&self, channel: &Channel) -> Result<Vec<CategoryNode>>;

    /// Attribute schema of one channel category.
    async fn attributes(&self, channel: &Channel, category_id: &str)
    -> Result<Vec<ChannelAttribute>>;

    /// Allowed values for a dictionary attribute. Handlers without
    /// dictionaries return `null`.
    async fn attribute_values(
        &self,
        _channel: &Channel,
        _category_id: &str,
        _attribute_id: &str,
    ) -> Result<Value> {
        Ok(Value::Null)
    }
}
