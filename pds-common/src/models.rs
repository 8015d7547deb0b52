//! Data model shared between the backend responses and the client state
//!
//! Gallery items carry a `public_id` while per-identity match results are
//! bare URLs; both shapes are kept as the backend sends them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque visitor identity token (`web_id`)
///
/// Any non-empty string is accepted; the format is owned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Create an identity, rejecting empty tokens
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.is_empty() {
            None
        } else {
            Some(Self(token))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters of the token, used for archive file names
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identity {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Identity::new(value).ok_or_else(|| "identity token must not be empty".to_string())
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

/// Gallery photo as delivered by `/api/recent-photos` and the live stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub url: String,
    pub public_id: String,
}

/// Aggregate counters from `/api/stats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    #[serde(default)]
    pub total_photos: u64,
    #[serde(default)]
    pub total_users: u64,
    #[serde(default)]
    pub total_encodings: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_matches: Option<String>,
}

#[derive(Deserialize)]
struct RawSearchResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    photos: Option<Vec<String>>,
}

/// Result of `/api/my-photos`: a server-reported error or the matched URLs
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawSearchResponse")]
pub enum SearchResponse {
    ServerError(String),
    Photos(Vec<String>),
}

impl TryFrom<RawSearchResponse> for SearchResponse {
    type Error = String;

    fn try_from(raw: RawSearchResponse) -> Result<Self, String> {
        // error takes precedence over photos
        if let Some(error) = raw.error {
            return Ok(SearchResponse::ServerError(error));
        }
        raw.photos
            .map(SearchResponse::Photos)
            .ok_or_else(|| "search response carried neither photos nor error".to_string())
    }
}

#[derive(Deserialize)]
struct RawRegisterResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    web_id: Option<String>,
}

/// Result of `/api/register-web`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawRegisterResponse")]
pub enum RegisterResponse {
    ServerError(String),
    Registered(Identity),
}

impl TryFrom<RawRegisterResponse> for RegisterResponse {
    type Error = String;

    fn try_from(raw: RawRegisterResponse) -> Result<Self, String> {
        if let Some(error) = raw.error {
            return Ok(RegisterResponse::ServerError(error));
        }
        raw.web_id
            .and_then(Identity::new)
            .map(RegisterResponse::Registered)
            .ok_or_else(|| "registration response carried neither web_id nor error".to_string())
    }
}

/// Result of `/process-photos`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProcessResponse {
    #[serde(default)]
    pub message: Option<String>,
}

/// Content served by `/api/about`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AboutContent {
    pub mission: Mission,
    pub tech: Tech,
    pub team: Team,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mission {
    pub title: String,
    pub description: String,
    pub stats: MissionStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionStats {
    pub trusted_by: String,
    pub total_events: String,
    pub satisfaction_rate: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tech {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub role: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socials: Option<Socials>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Socials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facebook: Option<String>,
}
