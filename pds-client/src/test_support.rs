//! In-memory [`PhotoApi`] used by unit tests

use crate::api::{ApiError, ByteStream, PhotoApi, Selfie};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use pds_common::models::{
    AboutContent, Identity, Photo, ProcessResponse, RegisterResponse, SearchResponse, Stats,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

pub fn photo(n: usize) -> Photo {
    Photo {
        url: format!("https://cdn.example/{}.jpg", n),
        public_id: format!("event/{}", n),
    }
}

pub fn id(token: &str) -> Identity {
    Identity::new(token).unwrap()
}

/// Failure injected into a fake call
#[derive(Debug, Clone)]
pub enum FakeError {
    Status(u16, String),
    Network(String),
}

impl From<FakeError> for ApiError {
    fn from(e: FakeError) -> Self {
        match e {
            FakeError::Status(status, message) => ApiError::Status { status, message },
            FakeError::Network(message) => ApiError::Network(message),
        }
    }
}

/// One scripted connection to `/api/stream`
pub struct StreamScript {
    pub chunks: Vec<Result<Bytes, FakeError>>,
    /// Keep the connection open after the chunks instead of ending it
    pub stay_open: bool,
}

impl StreamScript {
    pub fn open(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| Ok(Bytes::from(c.to_string()))).collect(),
            stay_open: true,
        }
    }

    pub fn failing_after(chunks: &[&str]) -> Self {
        let mut script = Self::open(chunks);
        script
            .chunks
            .push(Err(FakeError::Network("connection reset".to_string())));
        script.stay_open = false;
        script
    }
}

pub struct FakeApi {
    stats: Mutex<Stats>,
    stats_fail: AtomicBool,
    recent: Mutex<Vec<Photo>>,
    recent_fail: AtomicBool,
    register_response: Mutex<Result<RegisterResponse, FakeError>>,
    register_calls: AtomicUsize,
    last_existing: Mutex<Option<Option<Identity>>>,
    search_responses: Mutex<HashMap<String, Result<SearchResponse, FakeError>>>,
    search_calls: AtomicUsize,
    search_gate: watch::Sender<bool>,
    process_response: Mutex<Result<ProcessResponse, FakeError>>,
    process_calls: AtomicUsize,
    about: Mutex<Option<AboutContent>>,
    photo_bytes: Mutex<HashMap<String, Bytes>>,
    archive: Mutex<Result<Vec<Result<Bytes, FakeError>>, FakeError>>,
    archive_calls: AtomicUsize,
    stream_scripts: Mutex<VecDeque<StreamScript>>,
    stream_opens: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Self {
        let (search_gate, _) = watch::channel(true);
        Self {
            stats: Mutex::new(Stats::default()),
            stats_fail: AtomicBool::new(false),
            recent: Mutex::new(Vec::new()),
            recent_fail: AtomicBool::new(false),
            register_response: Mutex::new(Err(FakeError::Status(
                500,
                "Failed to register".to_string(),
            ))),
            register_calls: AtomicUsize::new(0),
            last_existing: Mutex::new(None),
            search_responses: Mutex::new(HashMap::new()),
            search_calls: AtomicUsize::new(0),
            search_gate,
            process_response: Mutex::new(Ok(ProcessResponse::default())),
            process_calls: AtomicUsize::new(0),
            about: Mutex::new(None),
            photo_bytes: Mutex::new(HashMap::new()),
            archive: Mutex::new(Err(FakeError::Status(500, "Failed to generate zip".to_string()))),
            archive_calls: AtomicUsize::new(0),
            stream_scripts: Mutex::new(VecDeque::new()),
            stream_opens: AtomicUsize::new(0),
        }
    }

    pub fn set_stats(&self, stats: Stats) {
        *self.stats.lock().unwrap() = stats;
    }

    pub fn fail_stats(&self, fail: bool) {
        self.stats_fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_recent(&self, photos: Vec<Photo>) {
        *self.recent.lock().unwrap() = photos;
    }

    pub fn fail_recent(&self, fail: bool) {
        self.recent_fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_register(&self, response: Result<RegisterResponse, FakeError>) {
        *self.register_response.lock().unwrap() = response;
    }

    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    /// `existing` argument of the last registration, if any happened
    pub fn last_existing(&self) -> Option<Option<Identity>> {
        self.last_existing.lock().unwrap().clone()
    }

    pub fn set_search(&self, token: &str, response: Result<SearchResponse, FakeError>) {
        self.search_responses
            .lock()
            .unwrap()
            .insert(token.to_string(), response);
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    /// Block searches at the network boundary until released
    pub fn hold_searches(&self) {
        self.search_gate.send_replace(false);
    }

    pub fn release_searches(&self) {
        self.search_gate.send_replace(true);
    }

    /// Wait until `n` searches have reached the network
    pub async fn wait_for_search_calls(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.search_calls() < n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("search calls never arrived");
    }

    pub fn set_process(&self, response: Result<ProcessResponse, FakeError>) {
        *self.process_response.lock().unwrap() = response;
    }

    pub fn process_calls(&self) -> usize {
        self.process_calls.load(Ordering::SeqCst)
    }

    pub fn set_about(&self, about: Option<AboutContent>) {
        *self.about.lock().unwrap() = about;
    }

    pub fn set_photo_bytes(&self, url: &str, bytes: &[u8]) {
        self.photo_bytes
            .lock()
            .unwrap()
            .insert(url.to_string(), Bytes::copy_from_slice(bytes));
    }

    pub fn set_archive(&self, archive: Result<Vec<Result<Bytes, FakeError>>, FakeError>) {
        *self.archive.lock().unwrap() = archive;
    }

    pub fn archive_calls(&self) -> usize {
        self.archive_calls.load(Ordering::SeqCst)
    }

    pub fn push_stream(&self, script: StreamScript) {
        self.stream_scripts.lock().unwrap().push_back(script);
    }

    pub fn stream_opens(&self) -> usize {
        self.stream_opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PhotoApi for FakeApi {
    async fn stats(&self) -> Result<Stats, ApiError> {
        if self.stats_fail.load(Ordering::SeqCst) {
            return Err(FakeError::Status(500, "Failed to fetch stats".to_string()).into());
        }
        Ok(self.stats.lock().unwrap().clone())
    }

    async fn recent_photos(&self) -> Result<Vec<Photo>, ApiError> {
        if self.recent_fail.load(Ordering::SeqCst) {
            return Err(FakeError::Network("connection refused".to_string()).into());
        }
        Ok(self.recent.lock().unwrap().clone())
    }

    async fn register(
        &self,
        _selfie: Selfie,
        existing: Option<Identity>,
    ) -> Result<RegisterResponse, ApiError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_existing.lock().unwrap() = Some(existing);
        self.register_response.lock().unwrap().clone().map_err(Into::into)
    }

    async fn my_photos(&self, identity: &Identity) -> Result<SearchResponse, ApiError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.search_gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        self.search_responses
            .lock()
            .unwrap()
            .get(identity.as_str())
            .cloned()
            .unwrap_or(Ok(SearchResponse::Photos(Vec::new())))
            .map_err(Into::into)
    }

    async fn trigger_processing(&self) -> Result<ProcessResponse, ApiError> {
        self.process_calls.fetch_add(1, Ordering::SeqCst);
        self.process_response.lock().unwrap().clone().map_err(Into::into)
    }

    async fn about(&self) -> Result<AboutContent, ApiError> {
        self.about
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| {
                FakeError::Status(503, "Failed to fetch about details".to_string()).into()
            })
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Bytes, ApiError> {
        self.photo_bytes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| FakeError::Status(404, "Failed to fetch photo".to_string()).into())
    }

    async fn download_archive(&self, _identity: &Identity) -> Result<ByteStream, ApiError> {
        self.archive_calls.fetch_add(1, Ordering::SeqCst);
        let chunks = self.archive.lock().unwrap().clone()?;
        let items: Vec<Result<Bytes, ApiError>> =
            chunks.into_iter().map(|c| c.map_err(Into::into)).collect();
        Ok(stream::iter(items).boxed())
    }

    async fn open_stream(&self) -> Result<ByteStream, ApiError> {
        self.stream_opens.fetch_add(1, Ordering::SeqCst);
        let script = self
            .stream_scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ApiError::Network("connection refused".to_string()))?;

        let items: Vec<Result<Bytes, ApiError>> = script
            .chunks
            .into_iter()
            .map(|c| c.map_err(Into::into))
            .collect();
        let body = stream::iter(items);
        if script.stay_open {
            Ok(body.chain(stream::pending()).boxed())
        } else {
            Ok(body.boxed())
        }
    }
}
