//! Call session state machine
//!
//! [`CallController`] owns the only live [`CallSession`] and every piece of
//! observable call state. All mutation goes through its methods, which run one
//! at a time on a single event loop (`run`), so no locking is needed. Every
//! transition checks the current phase first; calls made in the wrong phase
//! are no-ops (or `InvalidPhase` errors for user actions) rather than
//! corrupting the session.
//!
//! Phases:
//!
//! ```text
//! Idle ──initiate──▶ Dialing ──accepted──▶ Negotiating ──answer──▶ Active
//!   │                  │ not found / busy / rejected ▶ Idle
//!   └──pre-offer──▶ Ringing ──accept──▶ Negotiating ──offer──▶ Active
//!                      └──reject──▶ Idle
//! any ──hang up / remote hang up──▶ Closing ──▶ Idle
//! ```

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::media::{CaptureDevice, MediaAcquirer};
use crate::messenger::DataChannelMessenger;
use crate::models::*;
use crate::peer::{PeerConnection, PeerConnector, PeerEvent, PeerEventKind, PeerEventSink, PeerState};
use crate::signaling::{OutboundSignal, RtcSignal, SignalingEvent, SignalingTransport};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const CAPTURE_FAILED_TITLE: &str = "ERROR";
const CAPTURE_FAILED_TEXT: &str = "Could not access camera/microphone. Call cannot proceed.";
const SETUP_FAILED_TEXT: &str = "Could not set up the connection. Call cannot proceed.";

// ============================================================================
// Events
// ============================================================================

/// Intent forwarded by the presentation surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    InitiateCall {
        connection_type: ConnectionType,
        remote_peer_id: PeerId,
    },
    AcceptCall,
    RejectCall,
    HangUp,
    SendMessage(String),
    ToggleMic,
    ToggleCamera,
    RotateCamera,
    ToggleMuteDisplay,
    RegisterCode(String),
    /// Hang up if needed and stop the event loop.
    Quit,
}

#[derive(Debug)]
pub enum ClientEvent {
    Signal(SignalingEvent),
    Peer(PeerEvent),
    Command(UserCommand),
    /// Auto-dismiss timer for the info dialog with this token.
    DismissDialog(u64),
}

/// Everything the presentation surface may read.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallView {
    pub local_peer_id: Option<PeerId>,
    pub phase: CallPhase,
    pub in_call: bool,
    pub call_type: Option<ConnectionType>,
    pub local_stream: Option<StreamSnapshot>,
    pub remote_stream: Option<StreamSnapshot>,
    pub mic_enabled: bool,
    pub camera_enabled: bool,
    pub facing_mode: FacingMode,
    pub messaging_ready: bool,
    pub messages: Vec<ChatMessage>,
    pub dialog: DialogState,
    pub muted_display: bool,
}

// ============================================================================
// Session
// ============================================================================

struct CallSession {
    id: u64,
    phase: CallPhase,
    intent: ConnectionIntent,
    is_initiator: bool,
    connection: Option<Arc<dyn PeerConnection>>,
    remote_stream: Option<RemoteStream>,
}

impl CallSession {
    fn new(id: u64, phase: CallPhase, intent: ConnectionIntent, is_initiator: bool) -> Self {
        Self {
            id,
            phase,
            intent,
            is_initiator,
            connection: None,
            remote_stream: None,
        }
    }
}

// ============================================================================
// Controller
// ============================================================================

pub struct CallController {
    config: ClientConfig,
    signaling: Arc<dyn SignalingTransport>,
    connector: Arc<dyn PeerConnector>,
    media: MediaAcquirer,
    messenger: DataChannelMessenger,
    events: mpsc::UnboundedSender<ClientEvent>,
    view_tx: watch::Sender<CallView>,
    local_peer_id: Option<PeerId>,
    session: Option<CallSession>,
    dialog: DialogState,
    dialog_token: u64,
    muted_display: bool,
    next_session_id: u64,
}

impl CallController {
    /// `events` must feed the receiver later passed to [`CallController::run`];
    /// connections and dialog timers post back through it.
    pub fn new(
        config: ClientConfig,
        signaling: Arc<dyn SignalingTransport>,
        connector: Arc<dyn PeerConnector>,
        capture: Arc<dyn CaptureDevice>,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        let messenger = DataChannelMessenger::new(config.message_queue_capacity);
        let (view_tx, _) = watch::channel(CallView::default());

        Self {
            config,
            signaling,
            connector,
            media: MediaAcquirer::new(capture),
            messenger,
            events,
            view_tx,
            local_peer_id: None,
            session: None,
            dialog: DialogState::None,
            dialog_token: 0,
            muted_display: false,
            next_session_id: 1,
        }
    }

    // ============= Observation =============

    pub fn subscribe(&self) -> watch::Receiver<CallView> {
        self.view_tx.subscribe()
    }

    pub fn phase(&self) -> CallPhase {
        self.session.as_ref().map(|s| s.phase).unwrap_or(CallPhase::Idle)
    }

    pub fn dialog(&self) -> &DialogState {
        &self.dialog
    }

    pub fn intent(&self) -> Option<&ConnectionIntent> {
        self.session.as_ref().map(|s| &s.intent)
    }

    pub fn is_initiator(&self) -> bool {
        self.session.as_ref().map(|s| s.is_initiator).unwrap_or(false)
    }

    pub fn has_connection(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.connection.is_some())
            .unwrap_or(false)
    }

    pub fn local_peer_id(&self) -> Option<&PeerId> {
        self.local_peer_id.as_ref()
    }

    pub fn remote_stream(&self) -> Option<&RemoteStream> {
        self.session.as_ref().and_then(|s| s.remote_stream.as_ref())
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.messenger.log()
    }

    pub fn messaging_ready(&self) -> bool {
        self.messenger.is_ready()
    }

    pub fn queued_messages(&self) -> usize {
        self.messenger.queued()
    }

    pub fn media_state(&self) -> MediaTrackState {
        self.media.state()
    }

    pub fn muted_display(&self) -> bool {
        self.muted_display
    }

    pub fn view(&self) -> CallView {
        let phase = self.phase();
        let in_call = phase.has_connection();
        let media = self.media.state();

        CallView {
            local_peer_id: self.local_peer_id.clone(),
            phase,
            in_call,
            call_type: self
                .intent()
                .filter(|_| in_call)
                .map(|i| i.connection_type),
            local_stream: self.media.capture().map(|c| c.snapshot()),
            remote_stream: self.remote_stream().map(|s| s.snapshot()),
            mic_enabled: media.mic_enabled,
            camera_enabled: media.camera_enabled,
            facing_mode: media.facing_mode,
            messaging_ready: self.messenger.is_ready(),
            messages: self.messenger.log().to_vec(),
            dialog: self.dialog.clone(),
            muted_display: self.muted_display,
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.view());
    }

    // ============= Event loop =============

    /// Acquire the preview capture shown before any call.
    pub async fn start(&mut self) {
        let facing_mode = self.media.state().facing_mode;
        if self.media.acquire(facing_mode).await.is_none() {
            warn!("Starting without local preview");
        }
        self.publish();
    }

    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ClientEvent>) {
        self.publish();
        while let Some(event) = events.recv().await {
            if matches!(event, ClientEvent::Command(UserCommand::Quit)) {
                self.hang_up().await;
                self.publish();
                break;
            }
            self.handle_event(event).await;
        }
        info!("Call controller stopped");
    }

    pub async fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Signal(signal) => self.handle_signal(signal).await,
            ClientEvent::Peer(peer) => self.handle_peer_event(peer).await,
            ClientEvent::Command(command) => self.handle_command(command).await,
            ClientEvent::DismissDialog(token) => self.dismiss_dialog(token),
        }
        self.publish();
    }

    async fn handle_command(&mut self, command: UserCommand) {
        let result = match command {
            UserCommand::InitiateCall {
                connection_type,
                remote_peer_id,
            } => self.initiate_call(connection_type, remote_peer_id).await,
            UserCommand::AcceptCall => self.accept_call().await,
            UserCommand::RejectCall => self.reject_call().await,
            UserCommand::HangUp => {
                self.hang_up().await;
                Ok(())
            }
            UserCommand::SendMessage(text) => self.send_message(&text).await.map(|_| ()),
            UserCommand::ToggleMic => {
                self.toggle_mic();
                Ok(())
            }
            UserCommand::ToggleCamera => {
                self.toggle_camera();
                Ok(())
            }
            UserCommand::RotateCamera => {
                self.rotate_camera().await;
                Ok(())
            }
            UserCommand::ToggleMuteDisplay => {
                self.toggle_mute_display();
                Ok(())
            }
            UserCommand::RegisterCode(code) => self.register_code(&code).await,
            UserCommand::Quit => {
                self.hang_up().await;
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("Command failed: {}", e);
        }
    }

    pub async fn handle_signal(&mut self, event: SignalingEvent) {
        debug!("Signaling event: {:?}", event);
        match event {
            SignalingEvent::Connected { peer_id } => {
                info!("Connected to relay as {}", peer_id);
                self.local_peer_id = Some(peer_id);
            }
            SignalingEvent::Disconnected => {
                warn!("Signaling relay disconnected");
            }
            SignalingEvent::RegistrationResult {
                success,
                personal_code,
                message,
            } => self.on_registration_result(success, personal_code, message),
            SignalingEvent::PreOffer(intent) => self.on_pre_offer(intent).await,
            SignalingEvent::PreOfferAnswer(answer) => self.on_pre_offer_answer(answer).await,
            SignalingEvent::Rtc(signal) => self.on_rtc_signal(signal).await,
            SignalingEvent::RemoteHangUp => self.on_remote_hang_up().await,
        }
    }

    // ============= User actions =============

    pub async fn initiate_call(
        &mut self,
        connection_type: ConnectionType,
        remote_peer_id: PeerId,
    ) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::CallInProgress);
        }

        info!("Initiating {:?} call to {}", connection_type, remote_peer_id);
        let intent = ConnectionIntent {
            connection_type,
            remote_peer_id: remote_peer_id.clone(),
        };
        let id = self.allocate_session_id();
        self.session = Some(CallSession::new(id, CallPhase::Dialing, intent, true));
        self.messenger.reset();
        self.set_dialog(DialogState::Calling);

        let pre_offer = OutboundSignal::PreOffer {
            connection_type,
            target: remote_peer_id,
        };
        if let Err(e) = self.signaling.send(pre_offer).await {
            self.session = None;
            self.set_dialog(DialogState::None);
            return Err(e);
        }
        Ok(())
    }

    pub async fn accept_call(&mut self) -> Result<()> {
        self.require_phase(CallPhase::Ringing, "accept call")?;

        info!("Call accepted");
        self.set_dialog(DialogState::None);
        self.set_phase(CallPhase::Negotiating);

        if let Err(e) = self.establish_connection().await {
            error!("Error creating peer connection: {}", e);
            self.teardown().await;
            self.show_setup_failure(&e);
            return Err(e);
        }

        let target = self.remote_peer_id()?;
        let accepted = OutboundSignal::PreOfferAnswer {
            answer: PreOfferAnswer::Accepted,
            target,
        };
        if let Err(e) = self.signaling.send(accepted).await {
            error!("Failed to send call accepted: {}", e);
            self.teardown().await;
            self.show_setup_failure(&e);
            return Err(e);
        }
        Ok(())
    }

    pub async fn reject_call(&mut self) -> Result<()> {
        self.require_phase(CallPhase::Ringing, "reject call")?;

        info!("Call rejected");
        self.set_dialog(DialogState::None);
        let target = self.remote_peer_id()?;
        self.session = None;

        self.signaling
            .send(OutboundSignal::PreOfferAnswer {
                answer: PreOfferAnswer::Rejected,
                target,
            })
            .await
    }

    /// Notify the remote peer and tear the call down. No-op while idle.
    pub async fn hang_up(&mut self) {
        let target = match &self.session {
            Some(session) => session.intent.remote_peer_id.clone(),
            None => return,
        };

        info!("Hanging up");
        if let Err(e) = self.signaling.send(OutboundSignal::HangUp { target }).await {
            warn!("Failed to notify remote of hang-up: {}", e);
        }
        self.teardown().await;
    }

    /// Chat within the live call. Outside a call there is nobody to deliver to.
    pub async fn send_message(&mut self, text: &str) -> Result<bool> {
        self.require_session("send message")?;
        self.messenger.send_message(text).await
    }

    pub fn toggle_mic(&mut self) -> Option<bool> {
        self.media.toggle_mic()
    }

    pub fn toggle_camera(&mut self) -> Option<bool> {
        self.media.toggle_camera()
    }

    pub async fn rotate_camera(&mut self) -> bool {
        let connection = self
            .session
            .as_ref()
            .filter(|s| s.phase.has_connection())
            .and_then(|s| s.connection.clone());
        self.media.rotate_camera(connection.as_deref()).await
    }

    pub fn toggle_mute_display(&mut self) -> bool {
        self.muted_display = !self.muted_display;
        self.muted_display
    }

    pub async fn register_code(&mut self, code: &str) -> Result<()> {
        if !self.signaling.is_connected() {
            self.show_info(
                "Not connected",
                "Unable to register code: not connected to server yet.",
            );
            return Err(Error::NotConnected);
        }

        info!("Registering personal code {}", code);
        self.signaling
            .send(OutboundSignal::RegisterCode {
                code: code.to_string(),
            })
            .await
    }

    // ============= Signaling handlers =============

    fn on_registration_result(
        &mut self,
        success: bool,
        personal_code: Option<PeerId>,
        message: Option<String>,
    ) {
        if success {
            if let Some(code) = personal_code {
                info!("Personal code registered: {}", code);
                self.local_peer_id = Some(code);
            }
            return;
        }

        let description = message.unwrap_or_else(|| "Could not register code".to_string());
        warn!("Personal code register failed: {}", description);
        self.show_info("Registration failed", &description);
    }

    async fn on_pre_offer(&mut self, intent: ConnectionIntent) {
        if self.session.is_some() {
            info!(
                "Busy, declining pre-offer from {}",
                intent.remote_peer_id
            );
            let busy = OutboundSignal::PreOfferAnswer {
                answer: PreOfferAnswer::Unavailable,
                target: intent.remote_peer_id,
            };
            if let Err(e) = self.signaling.send(busy).await {
                warn!("Failed to send busy answer: {}", e);
            }
            return;
        }

        info!(
            "Incoming {:?} call from {}",
            intent.connection_type, intent.remote_peer_id
        );
        let call_kind = intent.connection_type.label().to_string();
        let id = self.allocate_session_id();
        self.session = Some(CallSession::new(id, CallPhase::Ringing, intent, false));
        self.messenger.reset();
        self.set_dialog(DialogState::Incoming { call_kind });
    }

    async fn on_pre_offer_answer(&mut self, answer: PreOfferAnswer) {
        if self.phase() != CallPhase::Dialing {
            debug!("Ignoring pre-offer answer {:?} outside dialing", answer);
            return;
        }

        info!("Pre-offer answer: {:?}", answer);
        self.set_dialog(DialogState::None);

        let (title, description) = match answer {
            PreOfferAnswer::Accepted => {
                self.on_call_accepted().await;
                return;
            }
            PreOfferAnswer::NotFound => (
                "Not Found",
                "Client Already Disconnected or Wrong Personal Code",
            ),
            PreOfferAnswer::Unavailable => ("Unavailable", "Client Is Busy"),
            PreOfferAnswer::Rejected => ("Call Rejected", "Client Rejected the Call"),
        };

        self.session = None;
        self.show_info(title, description);
    }

    async fn on_call_accepted(&mut self) {
        self.set_phase(CallPhase::Negotiating);

        if let Err(e) = self.establish_connection().await {
            error!("Error creating peer connection: {}", e);
            // The callee already built its side; tell it we are gone.
            self.hang_up().await;
            self.show_setup_failure(&e);
            return;
        }

        let connection = match self.connection() {
            Some(connection) => connection,
            None => return,
        };
        match connection.create_offer().await {
            Ok(offer) => self.send_rtc(RtcSignal::Offer { offer }).await,
            Err(e) => warn!("Error sending WebRTC offer: {}", e),
        }
    }

    async fn on_rtc_signal(&mut self, signal: RtcSignal) {
        let connection = match self.connection() {
            Some(connection) => connection,
            None => {
                debug!("Ignoring {} without a live connection", signal.kind());
                return;
            }
        };

        match signal {
            RtcSignal::Offer { offer } => {
                if let Err(e) = connection.set_remote_description(offer).await {
                    warn!("Error handling WebRTC offer: {}", e);
                    return;
                }
                match connection.create_answer().await {
                    Ok(answer) => {
                        self.send_rtc(RtcSignal::Answer { answer }).await;
                        self.mark_active();
                    }
                    Err(e) => warn!("Error creating WebRTC answer: {}", e),
                }
            }
            RtcSignal::Answer { answer } => {
                match connection.set_remote_description(answer).await {
                    Ok(()) => self.mark_active(),
                    Err(e) => warn!("Error handling WebRTC answer: {}", e),
                }
            }
            RtcSignal::IceCandidate { candidate } => {
                if let Err(e) = connection.add_ice_candidate(candidate).await {
                    warn!("Error handling ICE candidate: {}", e);
                }
            }
        }
    }

    async fn on_remote_hang_up(&mut self) {
        if self.session.is_none() {
            debug!("Remote hang-up with no call in progress");
            return;
        }
        info!("Remote peer hung up");
        self.teardown().await;
    }

    // ============= Peer events =============

    pub async fn handle_peer_event(&mut self, event: PeerEvent) {
        let current = self
            .session
            .as_ref()
            .filter(|s| s.phase.has_connection())
            .map(|s| s.id);
        if current != Some(event.session_id) {
            debug!(
                "Dropping stale peer event for session {}: {:?}",
                event.session_id, event.kind
            );
            return;
        }

        match event.kind {
            PeerEventKind::LocalCandidate(candidate) => {
                self.send_rtc(RtcSignal::IceCandidate { candidate }).await;
            }
            PeerEventKind::RemoteTrack(track) => {
                debug!("Remote {:?} track {}", track.kind, track.id);
                if let Some(stream) = self.remote_stream() {
                    stream.add_track(track);
                }
            }
            PeerEventKind::DataChannel(channel) => self.messenger.attach(channel),
            PeerEventKind::ChannelOpen => {
                let flushed = self.messenger.on_open().await;
                if flushed > 0 {
                    debug!("Flushed {} queued messages", flushed);
                }
            }
            PeerEventKind::ChannelMessage(raw) => {
                self.messenger.on_message(&raw);
            }
            PeerEventKind::ChannelClosed => self.messenger.on_close(),
            PeerEventKind::StateChanged(state) => {
                info!("Connection state: {:?}", state);
                match state {
                    PeerState::Connected => self.mark_active(),
                    PeerState::Failed | PeerState::Disconnected => {
                        warn!("Peer connection {:?}, waiting for hang-up", state)
                    }
                    _ => {}
                }
            }
        }
    }

    // ============= Internals =============

    /// Build the peer connection for the current session.
    async fn establish_connection(&mut self) -> Result<()> {
        let (id, intent, is_initiator) = match &self.session {
            Some(s) => (s.id, s.intent.clone(), s.is_initiator),
            None => return Err(Error::InvalidPhase {
                action: "connect",
                phase: CallPhase::Idle,
            }),
        };

        let sink = PeerEventSink::new(id, self.events.clone());
        let connection = self
            .connector
            .connect(&self.config.ice_servers, sink)
            .await?;

        if let Some(session) = self.session.as_mut() {
            session.connection = Some(connection.clone());
            session.remote_stream = Some(RemoteStream::new());
        }

        if is_initiator {
            let channel = connection
                .create_data_channel(&self.config.data_channel_label)
                .await?;
            self.messenger.attach(channel);
        }

        if intent.connection_type.requires_media() {
            let capture = match self.media.capture().cloned() {
                Some(capture) => Some(capture),
                None => {
                    let facing_mode = self.media.state().facing_mode;
                    self.media.acquire(facing_mode).await
                }
            };
            let capture = capture.ok_or_else(|| {
                Error::Capture("could not access camera/microphone".to_string())
            })?;

            for track in capture.tracks() {
                connection.add_track(track.clone(), capture.id()).await?;
            }
        }

        Ok(())
    }

    /// Release the connection and reset per-call state.
    async fn teardown(&mut self) {
        self.set_phase(CallPhase::Closing);

        let connection = self.session.as_mut().and_then(|s| s.connection.take());
        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                warn!("Error closing peer connection: {}", e);
            }
        }

        self.session = None;
        self.messenger.reset();
        self.media.reset_tracks();
        if matches!(self.dialog, DialogState::Incoming { .. } | DialogState::Calling) {
            self.set_dialog(DialogState::None);
        }
        info!("Call closed");
    }

    async fn send_rtc(&mut self, signal: RtcSignal) {
        let target = match self.remote_peer_id() {
            Ok(target) => target,
            Err(_) => return,
        };
        let kind = signal.kind();
        if let Err(e) = self.signaling.send(OutboundSignal::Rtc { target, signal }).await {
            warn!("Failed to send {}: {}", kind, e);
        }
    }

    fn mark_active(&mut self) {
        if self.phase() == CallPhase::Negotiating {
            info!("Call active");
            self.set_phase(CallPhase::Active);
        }
    }

    fn connection(&self) -> Option<Arc<dyn PeerConnection>> {
        self.session
            .as_ref()
            .filter(|s| s.phase.has_connection())
            .and_then(|s| s.connection.clone())
    }

    fn remote_peer_id(&self) -> Result<PeerId> {
        self.session
            .as_ref()
            .map(|s| s.intent.remote_peer_id.clone())
            .ok_or(Error::InvalidPhase {
                action: "address remote peer",
                phase: CallPhase::Idle,
            })
    }

    fn require_phase(&self, expected: CallPhase, action: &'static str) -> Result<()> {
        let phase = self.phase();
        if phase != expected {
            return Err(Error::InvalidPhase { action, phase });
        }
        Ok(())
    }

    fn require_session(&self, action: &'static str) -> Result<()> {
        if self.session.is_none() {
            return Err(Error::InvalidPhase {
                action,
                phase: CallPhase::Idle,
            });
        }
        Ok(())
    }

    fn set_phase(&mut self, phase: CallPhase) {
        if let Some(session) = self.session.as_mut() {
            debug!("Phase {:?} -> {:?}", session.phase, phase);
            session.phase = phase;
        }
    }

    fn allocate_session_id(&mut self) -> u64 {
        let id = self.next_session_id;
        self.next_session_id += 1;
        id
    }

    fn set_dialog(&mut self, dialog: DialogState) {
        self.dialog_token += 1;
        self.dialog = dialog;
    }

    fn show_info(&mut self, title: &str, description: &str) {
        let dismiss_ms = self.config.info_dialog_ms;
        self.set_dialog(DialogState::info(title, description, dismiss_ms));

        let token = self.dialog_token;
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(dismiss_ms)).await;
            let _ = events.send(ClientEvent::DismissDialog(token));
        });
    }

    fn show_setup_failure(&mut self, e: &Error) {
        let description = match e {
            Error::Capture(_) => CAPTURE_FAILED_TEXT,
            _ => SETUP_FAILED_TEXT,
        };
        self.show_info(CAPTURE_FAILED_TITLE, description);
    }

    fn dismiss_dialog(&mut self, token: u64) {
        if token == self.dialog_token && matches!(self.dialog, DialogState::Info { .. }) {
            self.set_dialog(DialogState::None);
        }
    }
}
