//! WebRTC peer connections backed by webrtc-rs

use crate::config::IceServer;
use crate::error::{Error, Result};
use crate::media::MediaTrack;
use crate::models::{IceCandidate, RemoteTrack, SdpType, SessionDescription, TrackKind};
use crate::peer::{DataChannel, PeerConnection, PeerConnector, PeerEventKind, PeerEventSink, PeerState};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

// ============================================================================
// Conversions
// ============================================================================

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(description.sdp)?,
    };
    Ok(rtc)
}

fn from_rtc_description(description: RTCSessionDescription) -> Result<SessionDescription> {
    match description.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(description.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(description.sdp)),
        other => Err(Error::Rtc(format!("unsupported description type {}", other))),
    }
}

fn to_rtc_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn peer_state(state: RTCPeerConnectionState) -> PeerState {
    match state {
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
        _ => PeerState::New,
    }
}

fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
    let mime_type = match kind {
        TrackKind::Audio => MIME_TYPE_OPUS,
        TrackKind::Video => MIME_TYPE_VP8,
    };
    RTCRtpCodecCapability {
        mime_type: mime_type.to_owned(),
        ..Default::default()
    }
}

// ============================================================================
// Data channel
// ============================================================================

pub struct RtcDataChannel {
    inner: Arc<RTCDataChannel>,
}

impl RtcDataChannel {
    /// Wrap `inner` and forward its open/message/close callbacks to `events`.
    fn wire(inner: Arc<RTCDataChannel>, events: &PeerEventSink) -> Arc<Self> {
        let sink = events.clone();
        inner.on_open(Box::new(move || {
            Box::pin(async move {
                sink.emit(PeerEventKind::ChannelOpen);
            })
        }));

        let sink = events.clone();
        inner.on_message(Box::new(move |msg: DataChannelMessage| {
            let text = String::from_utf8_lossy(&msg.data).into_owned();
            sink.emit(PeerEventKind::ChannelMessage(text));
            Box::pin(async {})
        }));

        let sink = events.clone();
        inner.on_close(Box::new(move || {
            sink.emit(PeerEventKind::ChannelClosed);
            Box::pin(async {})
        }));

        Arc::new(Self { inner })
    }
}

#[async_trait]
impl DataChannel for RtcDataChannel {
    fn label(&self) -> &str {
        self.inner.label()
    }

    fn is_open(&self) -> bool {
        self.inner.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        self.inner
            .send_text(text.to_string())
            .await
            .map_err(|e| Error::DataChannel(e.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// Peer connection
// ============================================================================

pub struct RtcPeerConnection {
    inner: Arc<RTCPeerConnection>,
    events: PeerEventSink,
}

impl RtcPeerConnection {
    fn new(inner: Arc<RTCPeerConnection>, events: PeerEventSink) -> Self {
        let sink = events.clone();
        inner.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = sink.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => sink.emit(PeerEventKind::LocalCandidate(from_rtc_candidate(init))),
                    Err(e) => warn!("Failed to serialize ICE candidate: {}", e),
                }
            })
        }));

        let sink = events.clone();
        inner.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            sink.emit(PeerEventKind::StateChanged(peer_state(state)));
            Box::pin(async {})
        }));

        let sink = events.clone();
        inner.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Audio => Some(TrackKind::Audio),
                    RTPCodecType::Video => Some(TrackKind::Video),
                    _ => None,
                };
                if let Some(kind) = kind {
                    sink.emit(PeerEventKind::RemoteTrack(RemoteTrack {
                        id: track.id(),
                        kind,
                        stream_id: track.stream_id(),
                    }));
                }
                Box::pin(async {})
            },
        ));

        let sink = events.clone();
        inner.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let sink = sink.clone();
            Box::pin(async move {
                debug!("Remote opened data channel {}", dc.label());
                let channel = RtcDataChannel::wire(dc, &sink);
                sink.emit(PeerEventKind::DataChannel(channel));
            })
        }));

        Self { inner, events }
    }
}

#[async_trait]
impl PeerConnection for RtcPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.inner.create_offer(None).await?;
        self.inner.set_local_description(offer.clone()).await?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.inner.create_answer(None).await?;
        self.inner.set_local_description(answer.clone()).await?;
        from_rtc_description(answer)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.inner
            .set_remote_description(to_rtc_description(description)?)
            .await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.inner
            .add_ice_candidate(to_rtc_candidate(candidate))
            .await?;
        Ok(())
    }

    async fn add_track(&self, track: Arc<MediaTrack>, stream_id: &str) -> Result<()> {
        let local = Arc::new(TrackLocalStaticSample::new(
            codec_for(track.kind()),
            track.id().to_string(),
            stream_id.to_string(),
        ));
        self.inner
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        Ok(())
    }

    async fn replace_video_track(&self, track: Arc<MediaTrack>) -> Result<()> {
        for sender in self.inner.get_senders().await {
            let current = match sender.track().await {
                Some(current) if current.kind() == RTPCodecType::Video => current,
                _ => continue,
            };
            let replacement = Arc::new(TrackLocalStaticSample::new(
                codec_for(TrackKind::Video),
                track.id().to_string(),
                current.stream_id().to_string(),
            ));
            sender
                .replace_track(Some(replacement as Arc<dyn TrackLocal + Send + Sync>))
                .await?;
            return Ok(());
        }
        Err(Error::Rtc("no outgoing video sender".to_string()))
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self.inner.create_data_channel(label, Some(init)).await?;
        Ok(RtcDataChannel::wire(dc, &self.events))
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await?;
        Ok(())
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Builds [`RtcPeerConnection`]s from a shared webrtc API instance.
pub struct RtcPeerConnector {
    api: API,
}

impl RtcPeerConnector {
    pub fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api })
    }
}

#[async_trait]
impl PeerConnector for RtcPeerConnector {
    async fn connect(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>> {
        let config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|s| RTCIceServer {
                    urls: s.urls.clone(),
                    username: s.username.clone().unwrap_or_default(),
                    credential: s.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let inner = Arc::new(self.api.new_peer_connection(config).await?);
        info!("Peer connection created for session {}", events.session_id());

        Ok(Arc::new(RtcPeerConnection::new(inner, events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_candidate_conversion_keeps_fields() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 10.0.0.1 5000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        let back = from_rtc_candidate(to_rtc_candidate(candidate.clone()));
        assert_eq!(back, candidate);
    }

    #[test]
    fn test_peer_state_mapping() {
        assert_eq!(peer_state(RTCPeerConnectionState::Connected), PeerState::Connected);
        assert_eq!(peer_state(RTCPeerConnectionState::Failed), PeerState::Failed);
        assert_eq!(peer_state(RTCPeerConnectionState::Unspecified), PeerState::New);
    }

    #[tokio::test]
    async fn test_offer_with_data_channel() {
        let connector = RtcPeerConnector::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = connector
            .connect(&[], PeerEventSink::new(1, tx))
            .await
            .unwrap();

        let channel = connection.create_data_channel("chat").await.unwrap();
        assert_eq!(channel.label(), "chat");
        assert!(!channel.is_open());

        let offer = connection.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("webrtc-datachannel"));

        connection.close().await.unwrap();
    }
}
