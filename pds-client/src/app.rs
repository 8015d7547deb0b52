//! Application controller
//!
//! Wires the session, stats, gallery, search, downloads and live stream
//! together and runs the visitor-facing flows: startup, registration,
//! reset, refresh, processing trigger and downloads. Every flow returns a
//! typed outcome and passes its notification to the [`Notifier`].

use crate::api::{HttpPhotoApi, PhotoApi, Selfie};
use crate::config::ClientConfig;
use crate::download::{DownloadCoordinator, DownloadError, PhotoDownload, SystemOpener, UrlOpener};
use crate::gallery::RecentGallery;
use crate::notify::{self, ConsoleNotifier, Notifier, ToNotification};
use crate::search::{MatchStore, SearchOrchestrator, SearchOutcome};
use crate::session::{FileSessionRepository, SessionRepository, SessionStore};
use crate::stats::StatsAggregator;
use crate::stream::{EventStream, LiveFeed, ReconnectPolicy};
use pds_common::events::EventBus;
use pds_common::models::{AboutContent, RegisterResponse};
use pds_common::{Identity, Photo, Stats};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of a registration attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Identity stored; `search` is the automatic follow-up search
    Registered {
        identity: Identity,
        search: SearchOutcome,
    },
    /// The backend answered with an `error` field
    ServerError { message: String },
    /// Transport failure or the identity could not be stored
    Failed { message: String },
    /// Another registration is still uploading
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetOutcome {
    Reset,
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Started { message: Option<String> },
    Failed { message: String },
}

/// Result of [`App::sync`] with the pending stats/gallery reload, if any
pub struct SyncHandle {
    pub outcome: SyncOutcome,
    reload: Option<JoinHandle<()>>,
}

impl SyncHandle {
    /// Wait for the delayed reload (no-op when processing was not started)
    pub async fn reloaded(self) -> SyncOutcome {
        if let Some(reload) = self.reload {
            if let Err(e) = reload.await {
                warn!("Reload task ended abnormally: {}", e);
            }
        }
        self.outcome
    }
}

/// Tunables for [`App::new`]
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub download_dir: PathBuf,
    pub reload_delay: Duration,
    pub reconnect: ReconnectPolicy,
    pub event_capacity: usize,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("."),
            reload_delay: Duration::from_millis(pds_common::config::DEFAULT_RELOAD_DELAY_MS),
            reconnect: ReconnectPolicy::Never,
            event_capacity: 100,
        }
    }
}

/// Clears the upload flag when registration ends
struct UploadGuard<'a>(&'a AtomicBool);

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct App {
    api: Arc<dyn PhotoApi>,
    session: Arc<SessionStore>,
    stats: Arc<StatsAggregator>,
    gallery: Arc<RecentGallery>,
    search: Arc<SearchOrchestrator>,
    downloads: Arc<DownloadCoordinator>,
    notifier: Arc<dyn Notifier>,
    events: EventBus,
    reconnect: ReconnectPolicy,
    reload_delay: Duration,
    uploading: Arc<AtomicBool>,
}

impl App {
    pub fn new(
        api: Arc<dyn PhotoApi>,
        repository: impl SessionRepository + 'static,
        opener: Arc<dyn UrlOpener>,
        notifier: Arc<dyn Notifier>,
        options: AppOptions,
    ) -> Self {
        let events = EventBus::new(options.event_capacity);
        let session = Arc::new(SessionStore::new(repository, events.clone()));
        let stats = Arc::new(StatsAggregator::new(events.clone()));
        let gallery = Arc::new(RecentGallery::new(events.clone()));
        let matches = Arc::new(MatchStore::new(events.clone()));

        // Ending a session resets its dependents
        session.add_listener(matches.clone());
        session.add_listener(stats.clone());

        let search = Arc::new(SearchOrchestrator::new(
            Arc::clone(&api),
            Arc::clone(&session),
            matches,
        ));
        let downloads = Arc::new(DownloadCoordinator::new(
            Arc::clone(&api),
            opener,
            options.download_dir,
        ));

        Self {
            api,
            session,
            stats,
            gallery,
            search,
            downloads,
            notifier,
            events,
            reconnect: options.reconnect,
            reload_delay: options.reload_delay,
            uploading: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Production wiring: HTTP backend, session file, system opener, console output
    pub fn from_config(config: &ClientConfig) -> Result<Self, crate::api::ApiError> {
        let api = HttpPhotoApi::new(config.api_url.clone(), config.request_timeout)?;
        info!("Backend: {}", api.base_url());
        Ok(Self::new(
            Arc::new(api),
            FileSessionRepository::new(&config.session_file),
            Arc::new(SystemOpener),
            Arc::new(ConsoleNotifier),
            AppOptions {
                download_dir: config.download_dir.clone(),
                reload_delay: config.reload_delay,
                reconnect: config.reconnect,
                ..Default::default()
            },
        ))
    }

    fn notify(&self, outcome: &impl ToNotification) {
        if let Some(notification) = outcome.notification() {
            self.notifier.notify(notification);
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn identity(&self) -> Option<Identity> {
        self.session.get()
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn stats(&self) -> Stats {
        self.stats.snapshot()
    }

    pub fn recent_photos(&self) -> Vec<Photo> {
        self.gallery.snapshot()
    }

    pub fn matches(&self) -> Vec<String> {
        self.search.matches().photos()
    }

    pub fn is_searching(&self) -> bool {
        self.session
            .get()
            .map(|identity| self.search.is_searching(&identity))
            .unwrap_or(false)
    }

    /// Load stats and the recent gallery
    pub async fn reload(&self) {
        let api = &*self.api;
        tokio::join!(self.stats.load(api), self.gallery.load(api));
    }

    /// Page-load flow: initial data, then the persisted identity's search
    pub async fn startup(&self) -> Option<SearchOutcome> {
        self.reload().await;
        let identity = self.session.restore()?;
        Some(self.search(Some(identity.as_str())).await)
    }

    /// Open the live stream and keep the gallery and stats updated from it
    pub fn open_live_feed(&self) -> LiveFeed {
        let subscription =
            EventStream::open(Arc::clone(&self.api), self.reconnect, self.events.clone());
        LiveFeed::start(
            subscription,
            Arc::clone(&self.gallery),
            Arc::clone(&self.stats),
        )
    }

    pub async fn search(&self, token: Option<&str>) -> SearchOutcome {
        let outcome = self.search.search(token).await;
        self.notify(&outcome);
        outcome
    }

    /// Search again for the current identity
    pub async fn refresh(&self) -> SearchOutcome {
        let outcome = self.search.refresh().await;
        self.notify(&outcome);
        outcome
    }

    /// Adopt a known registration ID as the session identity and search it
    pub async fn use_identity(&self, token: &str) -> SearchOutcome {
        let Some(identity) = Identity::new(token) else {
            let outcome = SearchOutcome::MissingIdentity;
            self.notify(&outcome);
            return outcome;
        };
        if !self.session.is_current(&identity) {
            if let Err(e) = self.session.set(identity.clone()) {
                error!("Could not store identity: {}", e);
                let outcome = SearchOutcome::Failed {
                    identity,
                    message: e.to_string(),
                };
                self.notify(&outcome);
                return outcome;
            }
        }
        self.search(Some(identity.as_str())).await
    }

    /// Upload a selfie; on success store the identity, then search it once
    pub async fn register(&self, selfie: Selfie) -> RegistrationOutcome {
        if self
            .uploading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Registration already uploading");
            return RegistrationOutcome::Busy;
        }

        let registered = {
            let _uploading = UploadGuard(&self.uploading);
            self.upload(selfie).await
        };

        let identity = match registered {
            Ok(identity) => identity,
            Err(outcome) => {
                self.notify(&outcome);
                return outcome;
            }
        };

        self.notifier.notify(notify::registered(&identity));

        // Session is set before this point, so the search sees the new identity
        let search = self.search(Some(identity.as_str())).await;
        RegistrationOutcome::Registered { identity, search }
    }

    async fn upload(&self, selfie: Selfie) -> Result<Identity, RegistrationOutcome> {
        let existing = self.session.get();
        match self.api.register(selfie, existing).await {
            Ok(RegisterResponse::Registered(identity)) => {
                self.session.set(identity.clone()).map_err(|e| {
                    error!("Could not store identity: {}", e);
                    RegistrationOutcome::Failed {
                        message: e.to_string(),
                    }
                })?;
                info!(identity = %identity, "Registration successful");
                Ok(identity)
            }
            Ok(RegisterResponse::ServerError(message)) => {
                warn!("Registration error from server: {}", message);
                Err(RegistrationOutcome::ServerError { message })
            }
            Err(e) => {
                error!("Registration failed: {}", e);
                Err(RegistrationOutcome::Failed {
                    message: e.to_string(),
                })
            }
        }
    }

    /// End the session: forget the identity, matches and stats
    pub fn reset(&self) -> ResetOutcome {
        let outcome = match self.session.clear() {
            Ok(()) => ResetOutcome::Reset,
            Err(e) => {
                error!("Session reset failed: {}", e);
                ResetOutcome::Failed {
                    message: e.to_string(),
                }
            }
        };
        self.notify(&outcome);
        outcome
    }

    /// Ask the backend to process new event photos, then reload after a delay
    pub async fn sync(&self) -> SyncHandle {
        let outcome = match self.api.trigger_processing().await {
            Ok(response) => SyncOutcome::Started {
                message: response.message,
            },
            Err(e) => {
                error!("Sync error: {}", e);
                SyncOutcome::Failed {
                    message: e.to_string(),
                }
            }
        };
        self.notify(&outcome);

        let reload = match outcome {
            SyncOutcome::Started { .. } => {
                let app = self.clone();
                let delay = self.reload_delay;
                Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    app.reload().await;
                }))
            }
            SyncOutcome::Failed { .. } => None,
        };

        SyncHandle { outcome, reload }
    }

    /// About page content; `None` when the backend is unavailable
    pub async fn about(&self) -> Option<AboutContent> {
        match self.api.about().await {
            Ok(about) => Some(about),
            Err(e) => {
                error!("Error fetching about details: {}", e);
                None
            }
        }
    }

    pub async fn download_photo(&self, url: &str) -> PhotoDownload {
        let outcome = self.downloads.download_photo(url).await;
        self.notify(&outcome);
        outcome
    }

    /// Save the archive of every match for the current identity
    pub async fn download_all(&self) -> Result<PathBuf, DownloadError> {
        let identity = self.session.get();
        let outcome = self.downloads.download_all(identity.as_ref()).await;
        if let Err(e) = &outcome {
            error!("Download all failed: {}", e);
        }
        self.notify(&outcome);
        outcome
    }
}
