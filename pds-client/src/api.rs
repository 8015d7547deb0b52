//! Backend HTTP API client
//!
//! [`PhotoApi`] is the network seam used by every orchestrator; [`HttpPhotoApi`]
//! is the reqwest implementation against the event-photo backend.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use pds_common::models::{
    AboutContent, Identity, Photo, ProcessResponse, RegisterResponse, SearchResponse, Stats,
};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("pds-client/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// API client errors
///
/// Server-reported errors (a well-formed body carrying `error`) are not
/// `ApiError`s; they are decoded into the response types.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-success HTTP status; `message` is the operation's fixed description
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    Decode(String),
}

/// Chunked response body
pub type ByteStream = BoxStream<'static, Result<Bytes, ApiError>>;

/// Selfie upload for registration
#[derive(Debug, Clone)]
pub struct Selfie {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Selfie {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Read a selfie from disk
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "selfie.jpg".to_string());
        Ok(Self { file_name, bytes })
    }

    /// MIME type sniffed from the file contents
    pub fn mime_type(&self) -> &'static str {
        infer::get(&self.bytes)
            .map(|kind| kind.mime_type())
            .unwrap_or("application/octet-stream")
    }
}

/// Operations the client needs from the backend
#[async_trait]
pub trait PhotoApi: Send + Sync {
    /// `GET /api/stats`
    async fn stats(&self) -> Result<Stats, ApiError>;

    /// `GET /api/recent-photos`
    async fn recent_photos(&self) -> Result<Vec<Photo>, ApiError>;

    /// `POST /api/register-web` (multipart `file`, optional `web_id`)
    async fn register(
        &self,
        selfie: Selfie,
        existing: Option<Identity>,
    ) -> Result<RegisterResponse, ApiError>;

    /// `GET /api/my-photos?web_id=`
    async fn my_photos(&self, identity: &Identity) -> Result<SearchResponse, ApiError>;

    /// `POST /process-photos`
    async fn trigger_processing(&self) -> Result<ProcessResponse, ApiError>;

    /// `GET /api/about`
    async fn about(&self) -> Result<AboutContent, ApiError>;

    /// Fetch an arbitrary photo URL as a binary payload
    async fn fetch_bytes(&self, url: &str) -> Result<Bytes, ApiError>;

    /// `GET /api/download-all?web_id=` as a byte stream
    async fn download_archive(&self, identity: &Identity) -> Result<ByteStream, ApiError>;

    /// `GET /api/stream` as a raw text/event-stream body
    async fn open_stream(&self) -> Result<ByteStream, ApiError>;
}

/// reqwest implementation of [`PhotoApi`]
pub struct HttpPhotoApi {
    http_client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpPhotoApi {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ApiError> {
        // No client-wide timeout: the stream and archive bodies are long-lived
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        failure: &str,
    ) -> Result<T, ApiError> {
        tracing::debug!(path, "GET");
        let response = self
            .http_client
            .get(self.url(path))
            .query(query)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(network_error)?;
        decode_json(ensure_success(response, failure)?).await
    }
}

fn network_error(e: reqwest::Error) -> ApiError {
    ApiError::Network(e.to_string())
}

fn ensure_success(
    response: reqwest::Response,
    failure: &str,
) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        tracing::debug!(status = status.as_u16(), url = %response.url(), "Non-success status");
        Err(ApiError::Status {
            status: status.as_u16(),
            message: failure.to_string(),
        })
    }
}

async fn decode_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let body = response.bytes().await.map_err(network_error)?;
    serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
}

fn into_byte_stream(response: reqwest::Response) -> ByteStream {
    response.bytes_stream().map_err(network_error).boxed()
}

#[async_trait]
impl PhotoApi for HttpPhotoApi {
    async fn stats(&self) -> Result<Stats, ApiError> {
        self.get_json("/api/stats", &[], "Failed to fetch stats").await
    }

    async fn recent_photos(&self) -> Result<Vec<Photo>, ApiError> {
        self.get_json("/api/recent-photos", &[], "Failed to fetch recent photos")
            .await
    }

    async fn register(
        &self,
        selfie: Selfie,
        existing: Option<Identity>,
    ) -> Result<RegisterResponse, ApiError> {
        let mime = selfie.mime_type();
        let part = Part::bytes(selfie.bytes)
            .file_name(selfie.file_name)
            .mime_str(mime)
            .map_err(network_error)?;
        let mut form = Form::new().part("file", part);
        if let Some(identity) = existing {
            form = form.text("web_id", String::from(identity));
        }

        tracing::debug!(mime, "Uploading selfie");
        let response = self
            .http_client
            .post(self.url("/api/register-web"))
            .multipart(form)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(network_error)?;
        decode_json(ensure_success(response, "Failed to register")?).await
    }

    async fn my_photos(&self, identity: &Identity) -> Result<SearchResponse, ApiError> {
        self.get_json(
            "/api/my-photos",
            &[("web_id", identity.as_str())],
            "Failed to fetch your photos",
        )
        .await
    }

    async fn trigger_processing(&self) -> Result<ProcessResponse, ApiError> {
        let response = self
            .http_client
            .post(self.url("/process-photos"))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(network_error)?;
        decode_json(ensure_success(response, "Failed to trigger processing")?).await
    }

    async fn about(&self) -> Result<AboutContent, ApiError> {
        self.get_json("/api/about", &[], "Failed to fetch about details")
            .await
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Bytes, ApiError> {
        let response = self
            .http_client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(network_error)?;
        ensure_success(response, "Failed to fetch photo")?
            .bytes()
            .await
            .map_err(network_error)
    }

    async fn download_archive(&self, identity: &Identity) -> Result<ByteStream, ApiError> {
        let response = self
            .http_client
            .get(self.url("/api/download-all"))
            .query(&[("web_id", identity.as_str())])
            .send()
            .await
            .map_err(network_error)?;
        Ok(into_byte_stream(ensure_success(
            response,
            "Failed to generate zip",
        )?))
    }

    async fn open_stream(&self) -> Result<ByteStream, ApiError> {
        let response = self
            .http_client
            .get(self.url("/api/stream"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(network_error)?;
        Ok(into_byte_stream(ensure_success(
            response,
            "Failed to open event stream",
        )?))
    }
}
