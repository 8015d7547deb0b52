//! Test Helper Utilities
//!
//! In-process fake of the photo backend, served by axum on an ephemeral port.

#![allow(dead_code)]

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

/// One multipart upload received on `/api/register-web`
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub file_len: usize,
    pub web_id: Option<String>,
}

/// Scripted backend behavior plus everything the client sent
#[derive(Debug, Default)]
pub struct BackendState {
    /// `None` answers 500
    pub stats: Option<Value>,
    pub recent: Option<Value>,
    /// Body returned for a `web_id`; unknown IDs get `{"photos": []}`
    pub my_photos: HashMap<String, Value>,
    pub my_photos_status: Option<StatusCode>,
    pub my_photos_queries: Vec<String>,
    /// Body returned from registration
    pub register: Option<Value>,
    pub uploads: Vec<Upload>,
    pub process: Option<Value>,
    pub process_calls: usize,
    pub about: Option<Value>,
    /// Served under `/photos/:name`
    pub photos: HashMap<String, Vec<u8>>,
    pub archive: Option<Vec<u8>>,
    /// `data:` payloads sent on each `/api/stream` connection
    pub stream_frames: Vec<String>,
    /// End the SSE response after the frames instead of holding it open
    pub stream_ends: bool,
    pub stream_connections: usize,
}

pub type SharedBackend = Arc<Mutex<BackendState>>;

pub struct TestServer {
    pub base_url: String,
    pub state: SharedBackend,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(BackendState::default()).await
    }

    pub async fn start_with(state: BackendState) -> Self {
        let state = Arc::new(Mutex::new(state));
        let app = router(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut BackendState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

pub fn photo_json(n: usize) -> Value {
    json!({
        "url": format!("https://cdn.example/{}.jpg", n),
        "public_id": format!("event/{}", n),
    })
}

pub fn new_photo_frame(n: usize) -> String {
    json!({ "type": "new_photo", "data": photo_json(n) }).to_string()
}

fn router(state: SharedBackend) -> Router {
    Router::new()
        .route("/api/stats", get(stats))
        .route("/api/recent-photos", get(recent))
        .route("/api/my-photos", get(my_photos))
        .route("/api/register-web", post(register))
        .route("/process-photos", post(process))
        .route("/api/about", get(about))
        .route("/api/download-all", get(download_all))
        .route("/api/stream", get(stream_events))
        .route("/photos/:name", get(photo))
        .with_state(state)
}

fn json_or_500(body: Option<Value>) -> Response {
    match body {
        Some(body) => Json(body).into_response(),
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn stats(State(state): State<SharedBackend>) -> Response {
    json_or_500(state.lock().unwrap().stats.clone())
}

async fn recent(State(state): State<SharedBackend>) -> Response {
    json_or_500(state.lock().unwrap().recent.clone())
}

async fn my_photos(
    State(state): State<SharedBackend>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut state = state.lock().unwrap();
    let web_id = query.get("web_id").cloned().unwrap_or_default();
    state.my_photos_queries.push(web_id.clone());

    if let Some(status) = state.my_photos_status {
        return status.into_response();
    }
    let body = state
        .my_photos
        .get(&web_id)
        .cloned()
        .unwrap_or_else(|| json!({ "photos": [] }));
    Json(body).into_response()
}

async fn register(State(state): State<SharedBackend>, mut multipart: Multipart) -> Response {
    let mut upload = Upload::default();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                upload.file_name = field.file_name().map(str::to_string);
                upload.content_type = field.content_type().map(str::to_string);
                upload.file_len = field.bytes().await.unwrap().len();
            }
            Some("web_id") => upload.web_id = Some(field.text().await.unwrap()),
            _ => {}
        }
    }

    let mut state = state.lock().unwrap();
    state.uploads.push(upload);
    json_or_500(state.register.clone())
}

async fn process(State(state): State<SharedBackend>) -> Response {
    let mut state = state.lock().unwrap();
    state.process_calls += 1;
    json_or_500(state.process.clone())
}

async fn about(State(state): State<SharedBackend>) -> Response {
    json_or_500(state.lock().unwrap().about.clone())
}

async fn download_all(State(state): State<SharedBackend>) -> Response {
    match state.lock().unwrap().archive.clone() {
        Some(bytes) => ([(header::CONTENT_TYPE, "application/zip")], bytes).into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "zip failed").into_response(),
    }
}

async fn photo(State(state): State<SharedBackend>, Path(name): Path<String>) -> Response {
    match state.lock().unwrap().photos.get(&name).cloned() {
        Some(bytes) => ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn stream_events(
    State(state): State<SharedBackend>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (frames, ends) = {
        let mut state = state.lock().unwrap();
        state.stream_connections += 1;
        (state.stream_frames.clone(), state.stream_ends)
    };

    let events = stream::iter(frames).map(|data| Ok::<_, Infallible>(Event::default().data(data)));
    let events = if ends {
        events.boxed()
    } else {
        events.chain(stream::pending()).boxed()
    };
    Sse::new(events)
}
