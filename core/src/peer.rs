//! Peer connection seam
//!
//! The session state machine drives a connection only through these traits.
//! Callbacks fired by the connection (candidates, tracks, data channel
//! traffic, state changes) are posted back to the controller's event queue
//! as [`PeerEvent`]s tagged with the session they belong to.

use crate::config::IceServer;
use crate::error::Result;
use crate::media::MediaTrack;
use crate::models::{IceCandidate, RemoteTrack, SessionDescription};
use crate::session::ClientEvent;
use async_trait::async_trait;
use log::debug;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

pub enum PeerEventKind {
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteTrack),
    /// Channel opened by the remote side.
    DataChannel(Arc<dyn DataChannel>),
    ChannelOpen,
    ChannelMessage(String),
    ChannelClosed,
    StateChanged(PeerState),
}

impl fmt::Debug for PeerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            Self::RemoteTrack(t) => f.debug_tuple("RemoteTrack").field(t).finish(),
            Self::DataChannel(dc) => f.debug_tuple("DataChannel").field(&dc.label()).finish(),
            Self::ChannelOpen => f.write_str("ChannelOpen"),
            Self::ChannelMessage(m) => f.debug_tuple("ChannelMessage").field(m).finish(),
            Self::ChannelClosed => f.write_str("ChannelClosed"),
            Self::StateChanged(s) => f.debug_tuple("StateChanged").field(s).finish(),
        }
    }
}

#[derive(Debug)]
pub struct PeerEvent {
    pub session_id: u64,
    pub kind: PeerEventKind,
}

/// Where a connection posts its callbacks.
#[derive(Clone)]
pub struct PeerEventSink {
    session_id: u64,
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl PeerEventSink {
    pub fn new(session_id: u64, tx: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self { session_id, tx }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn emit(&self, kind: PeerEventKind) {
        let event = PeerEvent {
            session_id: self.session_id,
            kind,
        };
        if self.tx.send(ClientEvent::Peer(event)).is_err() {
            debug!("Event loop gone, dropping peer event");
        }
    }
}

#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    async fn send_text(&self, text: &str) -> Result<()>;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Create an offer and apply it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Create an answer and apply it as the local description.
    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn add_track(&self, track: Arc<MediaTrack>, stream_id: &str) -> Result<()>;

    /// Swap the track on the video sender without renegotiating.
    async fn replace_video_track(&self, track: Arc<MediaTrack>) -> Result<()>;

    /// Open a reliable ordered channel. Its open/message/close callbacks go
    /// through the same sink as the connection's.
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>>;
}
