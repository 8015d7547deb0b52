//! Aggregate counters: authoritative loads plus optimistic stream increments

use crate::api::PhotoApi;
use crate::session::SessionListener;
use pds_common::events::{ClientEvent, EventBus};
use pds_common::Stats;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};

pub struct StatsAggregator {
    stats: RwLock<Stats>,
    events: EventBus,
}

impl StatsAggregator {
    pub fn new(events: EventBus) -> Self {
        Self {
            stats: RwLock::new(Stats::default()),
            events,
        }
    }

    /// Fetch authoritative stats, replacing any provisional values
    ///
    /// A failed fetch is logged and the previous values are kept.
    pub async fn load(&self, api: &dyn PhotoApi) -> Stats {
        match api.stats().await {
            Ok(fresh) => {
                debug!(
                    total_photos = fresh.total_photos,
                    total_users = fresh.total_users,
                    total_encodings = fresh.total_encodings,
                    "Stats loaded"
                );
                *self.stats.write().unwrap_or_else(PoisonError::into_inner) = fresh.clone();
                self.events.emit_lossy(ClientEvent::StatsUpdated {
                    stats: fresh.clone(),
                    provisional: false,
                });
                fresh
            }
            Err(e) => {
                warn!("Error fetching stats: {}", e);
                self.snapshot()
            }
        }
    }

    pub fn snapshot(&self) -> Stats {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Count a photo announced by the stream before the next load confirms it
    ///
    /// Only `total_photos` moves, by exactly one.
    pub fn apply_optimistic_photo_arrival(&self) -> Stats {
        let updated = {
            let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
            stats.total_photos += 1;
            stats.clone()
        };
        self.events.emit_lossy(ClientEvent::StatsUpdated {
            stats: updated.clone(),
            provisional: true,
        });
        updated
    }

    pub fn reset(&self) {
        *self.stats.write().unwrap_or_else(PoisonError::into_inner) = Stats::default();
    }
}

impl SessionListener for StatsAggregator {
    fn on_session_cleared(&self) {
        self.reset();
    }
}
