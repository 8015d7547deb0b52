//! User-facing notifications derived from operation outcomes
//!
//! The orchestrators only return typed outcomes; this module turns them
//! into titled messages and hands them to a [`Notifier`].

use crate::app::{RegistrationOutcome, ResetOutcome, SyncOutcome};
use crate::download::{DownloadError, PhotoDownload};
use crate::search::SearchOutcome;
use pds_common::Identity;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Destructive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub severity: Severity,
}

impl Notification {
    pub fn new(title: &str, description: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.to_string(),
            description: description.into(),
            severity,
        }
    }
}

/// Outcomes that may warrant telling the visitor something
pub trait ToNotification {
    fn notification(&self) -> Option<Notification>;
}

fn or_default(message: &str, fallback: &str) -> String {
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message.to_string()
    }
}

impl ToNotification for SearchOutcome {
    fn notification(&self) -> Option<Notification> {
        match self {
            SearchOutcome::MissingIdentity => Some(Notification::new(
                "Registration ID Required",
                "Please enter your Registration ID to search for photos.",
                Severity::Destructive,
            )),
            SearchOutcome::Found { count, .. } => Some(Notification::new(
                "Photos Found",
                format!("Successfully found {} photos in your collection.", count),
                Severity::Success,
            )),
            SearchOutcome::Empty { .. } => Some(Notification::new(
                "No Photos Found",
                "No photos found yet. We're still processing!",
                Severity::Info,
            )),
            SearchOutcome::ServerError { message, .. } => Some(Notification::new(
                "Search Error",
                message.clone(),
                Severity::Destructive,
            )),
            SearchOutcome::Failed { message, .. } => Some(Notification::new(
                "Error",
                or_default(message, crate::search::GENERIC_SEARCH_FAILURE),
                Severity::Destructive,
            )),
            SearchOutcome::Suppressed { .. } | SearchOutcome::Superseded { .. } => None,
        }
    }
}

/// Shown as soon as the identity is stored, ahead of the follow-up search
pub fn registered(identity: &Identity) -> Notification {
    Notification::new(
        "Registration Successful",
        format!("Your ID: {}. We've analyzed your face!", identity),
        Severity::Success,
    )
}

impl ToNotification for RegistrationOutcome {
    fn notification(&self) -> Option<Notification> {
        match self {
            RegistrationOutcome::Registered { identity, .. } => Some(registered(identity)),
            RegistrationOutcome::ServerError { message } => Some(Notification::new(
                "Registration Error",
                message.clone(),
                Severity::Destructive,
            )),
            RegistrationOutcome::Failed { message } => Some(Notification::new(
                "Registration Failed",
                or_default(message, "Failed to register"),
                Severity::Destructive,
            )),
            RegistrationOutcome::Busy => None,
        }
    }
}

impl ToNotification for ResetOutcome {
    fn notification(&self) -> Option<Notification> {
        match self {
            ResetOutcome::Reset => Some(Notification::new(
                "Session Reset",
                "You have been logged out. You can now register a new face.",
                Severity::Info,
            )),
            ResetOutcome::Failed { message } => Some(Notification::new(
                "Reset Failed",
                message.clone(),
                Severity::Destructive,
            )),
        }
    }
}

impl ToNotification for SyncOutcome {
    fn notification(&self) -> Option<Notification> {
        match self {
            SyncOutcome::Started { message } => Some(Notification::new(
                "Processing Started",
                or_default(
                    message.as_deref().unwrap_or_default(),
                    "Photo processing has been triggered successfully.",
                ),
                Severity::Success,
            )),
            SyncOutcome::Failed { message } => Some(Notification::new(
                "Sync Error",
                or_default(message, "Failed to trigger processing"),
                Severity::Destructive,
            )),
        }
    }
}

impl ToNotification for PhotoDownload {
    fn notification(&self) -> Option<Notification> {
        match self {
            PhotoDownload::Saved(_) | PhotoDownload::OpenedExternally { .. } => None,
            PhotoDownload::Unavailable { reason, .. } => Some(Notification::new(
                "Download Failed",
                reason.clone(),
                Severity::Destructive,
            )),
        }
    }
}

impl ToNotification for Result<PathBuf, DownloadError> {
    fn notification(&self) -> Option<Notification> {
        match self {
            Ok(_) => Some(Notification::new(
                "Download Complete",
                "Your ZIP archive has been generated and downloaded successfully.",
                Severity::Success,
            )),
            Err(DownloadError::Busy) | Err(DownloadError::MissingIdentity) => None,
            Err(_) => Some(Notification::new(
                "Download Failed",
                "We couldn't generate your ZIP archive. Please try again later.",
                Severity::Destructive,
            )),
        }
    }
}

/// Renders notifications
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Prints notifications to the terminal
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notification: Notification) {
        match notification.severity {
            Severity::Destructive => {
                eprintln!("✗ {}: {}", notification.title, notification.description)
            }
            Severity::Success => {
                println!("✓ {}: {}", notification.title, notification.description)
            }
            Severity::Info => println!("• {}: {}", notification.title, notification.description),
        }
    }
}

/// Keeps every notification, for tests and for callers that render later
#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.notifications().into_iter().map(|n| n.title).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}
