//! Per-tenant channel scheduling.
//!
//! A [`ChannelsManager`] owns the job slots of one tenant: for every channel a
//! default (full submission) slot and a sync slot, each with an optional
//! timer and a single-flight running flag. The [`ChannelsManagerFactory`]
//! builds one manager per tenant at startup.

pub mod error;
pub mod factory;
pub mod manager;
pub mod schedule;

#[cfg(test)]
mod testing;

pub use {
    error::{Error, Result},
    factory::ChannelsManagerFactory,
    manager::{ChannelsManager, JobKey, ManagerSettings, SkipReason, TriggerOutcome},
    schedule::{Trigger, next_fire},
};
