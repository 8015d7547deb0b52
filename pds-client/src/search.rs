//! Match search for the current visitor
//!
//! [`SearchOrchestrator::search`] enforces two rules:
//! - single-flight: a second search for an identity that is already being
//!   searched is suppressed, not queued
//! - guarded commit: results are written to [`MatchStore`] only if the
//!   session still holds the identity the search was issued for

use crate::api::PhotoApi;
use crate::session::{SessionListener, SessionStore};
use pds_common::events::{ClientEvent, EventBus};
use pds_common::models::SearchResponse;
use pds_common::Identity;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Reported when a transport failure carries no message of its own
pub const GENERIC_SEARCH_FAILURE: &str = "Failed to find photos";

/// Matched photo URLs for one identity
pub struct MatchStore {
    current: RwLock<Option<(Identity, Vec<String>)>>,
    events: EventBus,
}

impl MatchStore {
    pub fn new(events: EventBus) -> Self {
        Self {
            current: RwLock::new(None),
            events,
        }
    }

    fn replace(&self, identity: Identity, photos: Vec<String>) {
        let count = photos.len();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) =
            Some((identity.clone(), photos));
        self.events
            .emit_lossy(ClientEvent::MatchesUpdated { identity, count });
    }

    /// URLs of the last committed search (empty when none)
    pub fn photos(&self) -> Vec<String> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(_, photos)| photos.clone())
            .unwrap_or_default()
    }

    /// Identity the current results belong to
    pub fn owner(&self) -> Option<Identity> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(identity, _)| identity.clone())
    }

    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl SessionListener for MatchStore {
    fn on_session_cleared(&self) {
        self.clear();
    }
}

/// Outcome of one search invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// No identity to search with; no request was made
    MissingIdentity,
    /// A search for this identity was already running
    Suppressed { identity: Identity },
    /// Matches found and committed
    Found { identity: Identity, count: usize },
    /// Search succeeded with no matches yet (still processing)
    Empty { identity: Identity },
    /// The backend answered with an `error` field
    ServerError { identity: Identity, message: String },
    /// Transport failure, malformed response or non-success status
    Failed { identity: Identity, message: String },
    /// The session changed while the search was running; result discarded
    Superseded { identity: Identity },
}

/// Removes the identity from the in-flight set when the search ends or is dropped
struct InFlight<'a> {
    set: &'a Mutex<HashSet<Identity>>,
    identity: Identity,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.identity);
    }
}

pub struct SearchOrchestrator {
    api: Arc<dyn PhotoApi>,
    session: Arc<SessionStore>,
    matches: Arc<MatchStore>,
    in_flight: Mutex<HashSet<Identity>>,
}

impl SearchOrchestrator {
    pub fn new(
        api: Arc<dyn PhotoApi>,
        session: Arc<SessionStore>,
        matches: Arc<MatchStore>,
    ) -> Self {
        Self {
            api,
            session,
            matches,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn matches(&self) -> &Arc<MatchStore> {
        &self.matches
    }

    /// Whether a search for `identity` is currently running
    pub fn is_searching(&self, identity: &Identity) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(identity)
    }

    fn begin(&self, identity: &Identity) -> Option<InFlight<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(identity.clone()) {
            return None;
        }
        Some(InFlight {
            set: &self.in_flight,
            identity: identity.clone(),
        })
    }

    /// Search matches for the session's current identity
    pub async fn refresh(&self) -> SearchOutcome {
        let current = self.session.get();
        self.search(current.as_ref().map(Identity::as_str)).await
    }

    /// Search matches for `token`
    ///
    /// An absent or empty token is rejected before any request is made.
    pub async fn search(&self, token: Option<&str>) -> SearchOutcome {
        let Some(identity) = token.and_then(Identity::new) else {
            debug!("Search requested without an identity");
            return SearchOutcome::MissingIdentity;
        };

        let Some(_guard) = self.begin(&identity) else {
            debug!(identity = %identity, "Search already in flight, suppressing duplicate");
            return SearchOutcome::Suppressed { identity };
        };

        debug!(identity = %identity, "Searching matches");
        let result = self.api.my_photos(&identity).await;

        // Commit only while the session still belongs to this identity
        self.session.with_current(|current| {
            if current != Some(&identity) {
                info!(identity = %identity, "Discarding search result for superseded identity");
                return SearchOutcome::Superseded { identity: identity.clone() };
            }

            match result {
                Ok(SearchResponse::ServerError(message)) => {
                    warn!(identity = %identity, "Search error from server: {}", message);
                    SearchOutcome::ServerError {
                        identity: identity.clone(),
                        message,
                    }
                }
                Ok(SearchResponse::Photos(photos)) => {
                    let count = photos.len();
                    self.matches.replace(identity.clone(), photos);
                    if count == 0 {
                        info!(identity = %identity, "No matches yet");
                        SearchOutcome::Empty {
                            identity: identity.clone(),
                        }
                    } else {
                        info!(identity = %identity, count, "Matches found");
                        SearchOutcome::Found {
                            identity: identity.clone(),
                            count,
                        }
                    }
                }
                Err(e) => {
                    warn!(identity = %identity, "Search failed: {}", e);
                    let message = e.to_string();
                    SearchOutcome::Failed {
                        identity: identity.clone(),
                        message: if message.trim().is_empty() {
                            GENERIC_SEARCH_FAILURE.to_string()
                        } else {
                            message
                        },
                    }
                }
            }
        })
    }
}
