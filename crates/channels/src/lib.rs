//! Channel domain model and handler contract.
//!
//! A channel connects one tenant's catalog to one marketplace. Each channel
//! type is served by a [`ChannelHandler`] registered in a [`HandlerRegistry`];
//! the scheduler in `marketsync-cron` decides when handlers run.

pub mod error;
pub mod expr;
pub mod handler;
pub mod mapping;
pub mod patch;
pub mod registry;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

pub use {
    error::{Context, Error, Result},
    expr::{BasicExpressionEvaluator, ExpressionEvaluator},
    handler::{CategoryNode, ChannelAttribute, ChannelHandler, ExecutionLog},
    patch::{ItemPatch, ItemWriter, StatusPatch},
    registry::HandlerRegistry,
    store::{ChangedFields, ChannelStore, ExecutionStore, ItemStore, Storage},
    types::{
        AttributeMapping, CategoryMapping, Channel, ChannelConfig, ChannelExecution, ChannelType,
        ExecutionStatus, Item, ItemChannelEntry, ItemChannelStatus, MappingOption, RunMode,
        RunRequest, StartMode,
    },
};

/// Run database migrations for the channel, item and execution tables.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
