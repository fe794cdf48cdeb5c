use std::sync::Arc;

use {
    dashmap::DashMap,
    marketsync_channels::{HandlerRegistry, Storage},
    tracing::{info, warn},
};

use crate::{
    Result,
    manager::{ChannelsManager, ManagerSettings},
};

/// Tenant → [`ChannelsManager`] registry.
pub struct ChannelsManagerFactory {
    managers: DashMap<String, Arc<ChannelsManager>>,
    handlers: HandlerRegistry,
    store: Arc<dyn Storage>,
    settings: ManagerSettings,
}

impl ChannelsManagerFactory {
    pub fn new(handlers: HandlerRegistry, store: Arc<dyn Storage>, settings: ManagerSettings) -> Self {
        Self {
            managers: DashMap::new(),
            handlers,
            store,
            settings,
        }
    }

    /// Manager for `tenant`, created on first use.
    pub fn channels_manager(&self, tenant: &str) -> Arc<ChannelsManager> {
        if let Some(existing) = self.managers.get(tenant) {
            return Arc::clone(existing.value());
        }
        warn!(tenant, "no channels manager for tenant, creating one");
        Arc::clone(
            self.managers
                .entry(tenant.to_string())
                .or_insert_with(|| self.build(tenant))
                .value(),
        )
    }

    /// Load channels of `tenants` (all tenants when empty), build one manager
    /// per tenant and schedule every channel. Returns the number of channels
    /// registered.
    pub async fn init(&self, tenants: &[String]) -> Result<usize> {
        let channels = self.store.list_channels(tenants).await?;
        let mut current: Option<Arc<ChannelsManager>> = None;
        for channel in &channels {
            let manager = match &current {
                Some(m) if m.tenant_id() == channel.tenant_id => Arc::clone(m),
                _ => {
                    let m = self.build(&channel.tenant_id);
                    if let Some(previous) = self.managers.insert(channel.tenant_id.clone(), Arc::clone(&m)) {
                        previous.shutdown();
                    }
                    current = Some(Arc::clone(&m));
                    m
                },
            };
            manager.add_channel(channel);
        }
        info!(
            channels = channels.len(),
            tenants = self.managers.len(),
            "channel managers initialized"
        );
        Ok(channels.len())
    }

    /// Tenants with a registered manager, sorted.
    pub fn managers(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self.managers.iter().map(|m| m.key().clone()).collect();
        tenants.sort();
        tenants
    }

    /// Stop every scheduled job of every tenant.
    pub fn shutdown(&self) {
        for manager in self.managers.iter() {
            manager.shutdown();
        }
    }

    fn build(&self, tenant: &str) -> Arc<ChannelsManager> {
        ChannelsManager::new(
            tenant,
            self.handlers.clone(),
            Arc::clone(&self.store),
            self.settings,
        )
    }
}
