//! Ozon Seller API channel handler.
//!
//! Full runs map submitted items onto Ozon categories and attributes, submit
//! them through the product import API and record the import task outcome.
//! Sync runs resolve pending product ids and pull moderation state back.

pub mod api;
pub mod cache;
pub mod client;
pub mod error;
pub mod handler;
pub mod payload;
pub mod settings;

pub use {
    client::OzonClient,
    error::{Context, Error, Result},
    handler::OzonHandler,
    settings::{Credentials, OzonSettings},
};
