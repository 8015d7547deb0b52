//! # Photo Distribution Client Library (pds-client)
//!
//! Client session and sync core for the event photo distribution service.
//!
//! **Purpose:** Keep a visitor's registration identity across restarts, find
//! their matched photos, follow the live stream of newly processed event
//! photos and download matches individually or as one archive.
//!
//! **Architecture:** Orchestrators over a [`PhotoApi`](api::PhotoApi)
//! boundary, publishing state changes on the shared
//! [`EventBus`](pds_common::events::EventBus). [`App`] wires them together.

pub mod api;
pub mod app;
pub mod config;
pub mod download;
pub mod gallery;
pub mod logging;
pub mod notify;
pub mod search;
pub mod session;
pub mod stats;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{ApiError, HttpPhotoApi, PhotoApi, Selfie};
pub use app::{App, AppOptions, RegistrationOutcome, ResetOutcome, SyncOutcome};
pub use config::{ClientConfig, Overrides};
pub use download::{DownloadCoordinator, DownloadError, PhotoDownload};
pub use search::{SearchOrchestrator, SearchOutcome};
pub use session::{FileSessionRepository, MemorySessionRepository, SessionStore};
pub use stream::{EventStream, LiveFeed, ReconnectPolicy, StreamSubscription};
