use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// A registered RTSP source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: Uuid,
    pub url: String,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Stream {
    /// Relay source key for this record
    pub fn source_key(&self) -> String {
        self.id.to_string()
    }

    /// WebSocket endpoint a browser uses to watch this stream
    pub fn ws_url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{base}")
        };
        format!("{ws_base}/ws/stream?id={}", self.id)
    }
}

/// Body of `POST` and `PUT` on the stream endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStreamRequest {
    pub url: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Changes applied to an existing record.
///
/// `label` distinguishes an absent field (`None`, keep the current label)
/// from an explicit `null` (`Some(None)`, clear it).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateStreamRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub label: Option<Option<String>>,
}

impl From<CreateStreamRequest> for UpdateStreamRequest {
    /// A full replacement: every field is set, a missing label clears it
    fn from(request: CreateStreamRequest) -> Self {
        Self {
            url: Some(request.url),
            label: Some(request.label),
        }
    }
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Stream as returned by the HTTP API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamResponse {
    pub id: Uuid,
    pub url: String,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ws_url: String,
}

impl StreamResponse {
    pub fn from_stream(stream: Stream, base_url: &str) -> Self {
        let ws_url = stream.ws_url(base_url);
        Self {
            id: stream.id,
            url: stream.url,
            label: stream.label,
            created_at: stream.created_at,
            ws_url,
        }
    }
}
