//! Scripted transport and peer fakes shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use peercall_core::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

// ============================================================================
// Signaling
// ============================================================================

pub struct RecordingSignaling {
    connected: AtomicBool,
    sent: Mutex<Vec<OutboundSignal>>,
}

impl RecordingSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundSignal> {
        self.sent.lock().clone()
    }

    pub fn take(&self) -> Vec<OutboundSignal> {
        std::mem::take(&mut *self.sent.lock())
    }
}

#[async_trait]
impl SignalingTransport for RecordingSignaling {
    async fn send(&self, message: OutboundSignal) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.sent.lock().push(message);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// What the relay would deliver to the target of `signal` sent by `from`.
pub fn relay(signal: OutboundSignal, from: &PeerId) -> SignalingEvent {
    match signal {
        OutboundSignal::PreOffer {
            connection_type, ..
        } => SignalingEvent::PreOffer(ConnectionIntent {
            connection_type,
            remote_peer_id: from.clone(),
        }),
        OutboundSignal::PreOfferAnswer { answer, .. } => SignalingEvent::PreOfferAnswer(answer),
        OutboundSignal::Rtc { signal, .. } => SignalingEvent::Rtc(signal),
        OutboundSignal::HangUp { .. } => SignalingEvent::RemoteHangUp,
        OutboundSignal::RegisterCode { code } => SignalingEvent::RegistrationResult {
            success: true,
            personal_code: Some(PeerId::new(code)),
            message: None,
        },
    }
}

// ============================================================================
// Peer connections
// ============================================================================

pub struct FakeChannel {
    label: String,
    open: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl FakeChannel {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            open: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Sent payloads decoded back to chat text.
    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|raw| serde_json::from_str::<String>(raw).unwrap())
            .collect()
    }
}

#[async_trait]
impl DataChannel for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        if !self.is_open() {
            return Err(Error::DataChannel("channel not open".to_string()));
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }
}

pub struct FakePeer {
    sink: PeerEventSink,
    pub tracks: Mutex<Vec<(TrackKind, String)>>,
    pub local: Mutex<Option<SessionDescription>>,
    pub remote: Mutex<Option<SessionDescription>>,
    pub candidates: Mutex<Vec<IceCandidate>>,
    pub channel: Mutex<Option<Arc<FakeChannel>>>,
    pub replaced_video: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl FakePeer {
    fn new(sink: PeerEventSink) -> Arc<Self> {
        Arc::new(Self {
            sink,
            tracks: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            channel: Mutex::new(None),
            replaced_video: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Fire a callback as the underlying connection would.
    pub fn emit(&self, kind: PeerEventKind) {
        self.sink.emit(kind);
    }

    pub fn session_id(&self) -> u64 {
        self.sink.session_id()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn channel(&self) -> Option<Arc<FakeChannel>> {
        self.channel.lock().clone()
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = SessionDescription::offer(format!("offer-{}", self.session_id()));
        *self.local.lock() = Some(offer.clone());
        Ok(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.remote.lock().is_none() {
            return Err(Error::Rtc("no remote offer".to_string()));
        }
        let answer = SessionDescription::answer(format!("answer-{}", self.session_id()));
        *self.local.lock() = Some(answer.clone());
        Ok(answer)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        *self.remote.lock() = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: Arc<MediaTrack>, stream_id: &str) -> Result<()> {
        self.tracks.lock().push((track.kind(), stream_id.to_string()));
        Ok(())
    }

    async fn replace_video_track(&self, track: Arc<MediaTrack>) -> Result<()> {
        self.replaced_video.lock().push(track.id().to_string());
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>> {
        let channel = FakeChannel::new(label);
        *self.channel.lock() = Some(channel.clone());
        Ok(channel)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeConnector {
    fail: AtomicBool,
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicBool::new(false),
            peers: Mutex::new(Vec::new()),
        })
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn peers(&self) -> Vec<Arc<FakePeer>> {
        self.peers.lock().clone()
    }

    pub fn last(&self) -> Arc<FakePeer> {
        self.peers.lock().last().cloned().expect("no peer connection created")
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(
        &self,
        _ice_servers: &[IceServer],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Rtc("connector unavailable".to_string()));
        }
        let peer = FakePeer::new(events);
        self.peers.lock().push(peer.clone());
        Ok(peer)
    }
}

// ============================================================================
// Endpoints
// ============================================================================

/// One client: a controller plus its fakes and event queue.
pub struct Endpoint {
    pub id: PeerId,
    pub controller: CallController,
    pub signaling: Arc<RecordingSignaling>,
    pub connector: Arc<FakeConnector>,
    pub device: Arc<SyntheticCaptureDevice>,
    pub rx: mpsc::UnboundedReceiver<ClientEvent>,
}

impl Endpoint {
    pub fn new(id: &str) -> Self {
        Self::with_device(id, Arc::new(SyntheticCaptureDevice::new()))
    }

    pub fn with_device(id: &str, device: Arc<SyntheticCaptureDevice>) -> Self {
        let signaling = RecordingSignaling::new();
        let connector = FakeConnector::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = CallController::new(
            ClientConfig::default(),
            signaling.clone(),
            connector.clone(),
            device.clone(),
            tx,
        );

        Self {
            id: PeerId::from(id),
            controller,
            signaling,
            connector,
            device,
            rx,
        }
    }

    pub async fn signal(&mut self, event: SignalingEvent) {
        self.controller.handle_event(ClientEvent::Signal(event)).await;
    }

    /// Handle every queued peer event. Dialog timers are dropped.
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.rx.try_recv() {
            match event {
                ClientEvent::DismissDialog(_) => {}
                other => {
                    self.controller.handle_event(other).await;
                    handled += 1;
                }
            }
        }
        handled
    }

    pub fn phase(&self) -> CallPhase {
        self.controller.phase()
    }
}

/// Route everything `from` has sent so far to `to`, as the relay would.
pub async fn deliver(from: &Endpoint, to: &mut Endpoint) -> usize {
    let signals = from.signaling.take();
    let count = signals.len();
    for signal in signals {
        to.signal(relay(signal, &from.id)).await;
    }
    count
}
