//! Recently processed photos shown to every visitor

use crate::api::PhotoApi;
use pds_common::events::{ClientEvent, EventBus};
use pds_common::Photo;
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};

/// Gallery capacity; older photos fall off the end
pub const MAX_RECENT_PHOTOS: usize = 12;

pub struct RecentGallery {
    photos: RwLock<VecDeque<Photo>>,
    events: EventBus,
}

impl RecentGallery {
    pub fn new(events: EventBus) -> Self {
        Self {
            photos: RwLock::new(VecDeque::with_capacity(MAX_RECENT_PHOTOS + 1)),
            events,
        }
    }

    /// Replace the gallery with the backend's recent photos
    ///
    /// A failed fetch is logged and the current contents are kept.
    pub async fn load(&self, api: &dyn PhotoApi) -> Vec<Photo> {
        match api.recent_photos().await {
            Ok(mut photos) => {
                photos.truncate(MAX_RECENT_PHOTOS);
                debug!(count = photos.len(), "Recent photos loaded");
                *self.photos.write().unwrap_or_else(PoisonError::into_inner) =
                    photos.iter().cloned().collect();
                self.events
                    .emit_lossy(ClientEvent::GalleryUpdated { photos: photos.clone() });
                photos
            }
            Err(e) => {
                warn!("Error fetching recent photos: {}", e);
                self.snapshot()
            }
        }
    }

    /// Put a new arrival at the front, dropping anything past capacity
    pub fn prepend(&self, photo: Photo) -> Vec<Photo> {
        let photos: Vec<Photo> = {
            let mut gallery = self.photos.write().unwrap_or_else(PoisonError::into_inner);
            gallery.push_front(photo);
            gallery.truncate(MAX_RECENT_PHOTOS);
            gallery.iter().cloned().collect()
        };
        self.events
            .emit_lossy(ClientEvent::GalleryUpdated { photos: photos.clone() });
        photos
    }

    pub fn snapshot(&self) -> Vec<Photo> {
        self.photos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.photos.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
