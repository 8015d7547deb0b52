//! # PDS Common Library
//!
//! Shared code for the photo distribution client crates:
//! - Data model returned by the backend (photos, stats, about content)
//! - Live stream event types and the client EventBus
//! - Configuration loading
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod time;

pub use error::{Error, Result};
pub use models::{Identity, Photo, Stats};
