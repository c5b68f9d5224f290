#![doc = "bucket-ingest: move objects landing in object storage into a document store (JSON) or a warehouse table (CSV)."]

//! Flow of one invocation: [`notification`] -> [`handler`] -> [`contract::ObjectReader`]
//! -> [`dispatch`] -> [`record_loader`] or [`batch_loader`].
//!
//! Backends live behind the traits in [`contract`]; [`gcp`] holds the real clients
//! and [`memory`] the in-process ones.

pub mod batch_loader;
pub mod cli;
pub mod config;
pub mod contract;
pub mod dispatch;
pub mod error;
pub mod gcp;
pub mod handler;
pub mod load_config;
pub mod memory;
pub mod notification;
pub mod record_loader;
pub mod records;
pub mod server;

pub use error::{IngestError, IngestResult};
