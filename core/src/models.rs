//! Data models for PeerCall

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Identity
// ============================================================================

/// Opaque identifier issued by the signaling relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// ============================================================================
// Calls
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    #[serde(rename = "personal_code_chat")]
    Chat,
    #[serde(rename = "personal_code_video")]
    Video,
}

impl ConnectionType {
    /// Label shown on the incoming-call dialog.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Chat => "Chat",
            Self::Video => "Video",
        }
    }

    pub fn requires_media(&self) -> bool {
        matches!(self, Self::Video)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionIntent {
    pub connection_type: ConnectionType,
    pub remote_peer_id: PeerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    Idle,
    Dialing,
    Ringing,
    Negotiating,
    Active,
    Closing,
}

impl CallPhase {
    /// Whether a peer connection may exist in this phase.
    pub fn has_connection(&self) -> bool {
        matches!(self, Self::Negotiating | Self::Active | Self::Closing)
    }
}

impl Default for CallPhase {
    fn default() -> Self {
        Self::Idle
    }
}

/// Answer to a pre-offer, as routed by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreOfferAnswer {
    #[serde(rename = "Call_Accepted")]
    Accepted,
    #[serde(rename = "Call_Rejected")]
    Rejected,
    #[serde(rename = "Not_Found")]
    NotFound,
    #[serde(rename = "Call_Unavailable")]
    Unavailable,
}

// ============================================================================
// Dialog
// ============================================================================

/// UI-facing projection of the session phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DialogState {
    None,
    Incoming {
        call_kind: String,
    },
    Calling,
    Info {
        title: String,
        description: String,
        auto_dismiss_ms: u64,
    },
}

impl Default for DialogState {
    fn default() -> Self {
        Self::None
    }
}

impl DialogState {
    pub fn info(title: &str, description: &str, auto_dismiss_ms: u64) -> Self {
        Self::Info {
            title: title.to_string(),
            description: description.to_string(),
            auto_dismiss_ms,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub content: String,
    pub own: bool,
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn new(content: impl Into<String>, own: bool) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            own,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

// ============================================================================
// Media
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    User,
    Environment,
}

impl FacingMode {
    pub fn opposite(&self) -> Self {
        match self {
            Self::User => Self::Environment,
            Self::Environment => Self::User,
        }
    }
}

impl Default for FacingMode {
    fn default() -> Self {
        Self::User
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTrackState {
    pub mic_enabled: bool,
    pub camera_enabled: bool,
    pub facing_mode: FacingMode,
}

impl Default for MediaTrackState {
    fn default() -> Self {
        Self {
            mic_enabled: true,
            camera_enabled: true,
            facing_mode: FacingMode::User,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: String,
    pub kind: TrackKind,
    pub enabled: bool,
}

/// Read-only picture of a media stream handed to the presentation surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSnapshot {
    pub id: String,
    pub tracks: Vec<TrackInfo>,
}

/// Track received from the remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    pub stream_id: String,
}

/// Aggregate of every inbound track of one call.
///
/// Allocated once per connection so observers can bind to a single stable
/// stream instead of reacting to each track event.
#[derive(Debug, Clone)]
pub struct RemoteStream {
    id: String,
    tracks: Arc<RwLock<Vec<RemoteTrack>>>,
}

impl RemoteStream {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn add_track(&self, track: RemoteTrack) {
        let mut tracks = self.tracks.write();
        if !tracks.iter().any(|t| t.id == track.id) {
            tracks.push(track);
        }
    }

    pub fn tracks(&self) -> Vec<RemoteTrack> {
        self.tracks.read().clone()
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            id: self.id.clone(),
            tracks: self
                .tracks
                .read()
                .iter()
                .map(|t| TrackInfo {
                    id: t.id.clone(),
                    kind: t.kind,
                    enabled: true,
                })
                .collect(),
        }
    }
}

impl Default for RemoteStream {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Negotiation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}
