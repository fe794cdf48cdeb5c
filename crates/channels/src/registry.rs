use std::{collections::HashMap, sync::Arc};

use crate::{
    Error, Result,
    handler::ChannelHandler,
    types::ChannelType,
};

/// Handlers keyed by the channel type they serve.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<ChannelType, Arc<dyn ChannelHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same type.
    pub fn register(&mut self, handler: Arc<dyn ChannelHandler>) {
        self.handlers.insert(handler.channel_type(), handler);
    }

    /// Handler for `channel_type`, or [`Error::UnknownChannelType`].
    pub fn get(&self, channel_type: ChannelType) -> Result<Arc<dyn ChannelHandler>> {
        self.handlers
            .get(&channel_type)
            .cloned()
            .ok_or_else(|| Error::UnknownChannelType {
                channel_type: channel_type.to_string(),
            })
    }

    pub fn list(&self) -> Vec<ChannelType> {
        self.handlers.keys().copied().collect()
    }
}
