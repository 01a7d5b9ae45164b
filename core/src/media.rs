//! Local capture management

use crate::error::{Error, Result};
use crate::models::*;
use crate::peer::PeerConnection;
use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Tracks
// ============================================================================

#[derive(Debug)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    live: AtomicBool,
}

impl MediaTrack {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            enabled: AtomicBool::new(true),
            live: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

/// A live capture: one or more tracks sharing a stream id.
#[derive(Debug, Clone)]
pub struct LocalCapture {
    id: String,
    facing_mode: FacingMode,
    tracks: Vec<Arc<MediaTrack>>,
}

impl LocalCapture {
    pub fn new(facing_mode: FacingMode, tracks: Vec<Arc<MediaTrack>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            facing_mode,
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn facing_mode(&self) -> FacingMode {
        self.facing_mode
    }

    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.tracks
    }

    pub fn first_audio(&self) -> Option<&Arc<MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    pub fn first_video(&self) -> Option<&Arc<MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            id: self.id.clone(),
            tracks: self
                .tracks
                .iter()
                .map(|t| TrackInfo {
                    id: t.id().to_string(),
                    kind: t.kind(),
                    enabled: t.is_enabled(),
                })
                .collect(),
        }
    }
}

// ============================================================================
// Devices
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub audio: bool,
    pub video: bool,
    pub facing_mode: FacingMode,
}

impl CaptureConstraints {
    pub fn audio_video(facing_mode: FacingMode) -> Self {
        Self {
            audio: true,
            video: true,
            facing_mode,
        }
    }
}

#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn open(&self, constraints: CaptureConstraints) -> Result<LocalCapture>;
}

/// Device producing tracks without touching real hardware.
///
/// Used by headless clients and tests; `set_available(false)` makes every
/// open fail like a missing or denied camera would.
pub struct SyntheticCaptureDevice {
    available: AtomicBool,
    opened: AtomicUsize,
}

impl SyntheticCaptureDevice {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            opened: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        let device = Self::new();
        device.set_available(false);
        device
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful opens so far.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticCaptureDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureDevice for SyntheticCaptureDevice {
    async fn open(&self, constraints: CaptureConstraints) -> Result<LocalCapture> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::Capture("no capture device available".to_string()));
        }

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(Arc::new(MediaTrack::new(TrackKind::Audio)));
        }
        if constraints.video {
            tracks.push(Arc::new(MediaTrack::new(TrackKind::Video)));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);

        Ok(LocalCapture::new(constraints.facing_mode, tracks))
    }
}

// ============================================================================
// Acquirer
// ============================================================================

/// Owns the local capture. Sessions only borrow its tracks.
pub struct MediaAcquirer {
    device: Arc<dyn CaptureDevice>,
    capture: Option<LocalCapture>,
    state: MediaTrackState,
}

impl MediaAcquirer {
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self {
            device,
            capture: None,
            state: MediaTrackState::default(),
        }
    }

    pub fn capture(&self) -> Option<&LocalCapture> {
        self.capture.as_ref()
    }

    pub fn state(&self) -> MediaTrackState {
        self.state
    }

    /// Request audio+video with the given facing direction.
    ///
    /// Returns `None` when the device refuses; the failure is logged and the
    /// caller decides whether to continue without media or abort.
    pub async fn acquire(&mut self, facing_mode: FacingMode) -> Option<LocalCapture> {
        match self
            .device
            .open(CaptureConstraints::audio_video(facing_mode))
            .await
        {
            Ok(capture) => {
                info!(
                    "Acquired local capture {} ({} tracks, {:?})",
                    capture.id(),
                    capture.tracks().len(),
                    facing_mode
                );
                self.capture = Some(capture.clone());
                self.state.facing_mode = facing_mode;
                self.sync_flags();
                Some(capture)
            }
            Err(e) => {
                error!("Error accessing camera: {}", e);
                None
            }
        }
    }

    pub fn toggle_mic(&mut self) -> Option<bool> {
        let track = self.capture.as_ref()?.first_audio()?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        self.state.mic_enabled = enabled;
        Some(enabled)
    }

    pub fn toggle_camera(&mut self) -> Option<bool> {
        let track = self.capture.as_ref()?.first_video()?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        self.state.camera_enabled = enabled;
        Some(enabled)
    }

    /// Switch to the opposite camera and hot-swap the outgoing video track.
    ///
    /// The new capture is committed only after the swap succeeds; on any
    /// failure the previous capture stays live and current.
    pub async fn rotate_camera(&mut self, connection: Option<&dyn PeerConnection>) -> bool {
        let facing_mode = self.state.facing_mode.opposite();

        let capture = match self
            .device
            .open(CaptureConstraints::audio_video(facing_mode))
            .await
        {
            Ok(capture) => capture,
            Err(e) => {
                warn!("Camera rotation to {:?} failed: {}", facing_mode, e);
                return false;
            }
        };

        if let (Some(connection), Some(track)) = (connection, capture.first_video()) {
            if let Err(e) = connection.replace_video_track(track.clone()).await {
                warn!("Error replacing outgoing video track: {}", e);
                capture.stop();
                return false;
            }
        }

        if let Some(previous) = self.capture.replace(capture) {
            previous.stop();
        }
        self.state.facing_mode = facing_mode;
        self.sync_flags();
        info!("Rotated camera to {:?}", facing_mode);
        true
    }

    /// Re-enable the first audio and video track after a call ends.
    pub fn reset_tracks(&mut self) {
        if let Some(capture) = &self.capture {
            if let Some(track) = capture.first_audio() {
                track.set_enabled(true);
            }
            if let Some(track) = capture.first_video() {
                track.set_enabled(true);
            }
        }
        self.state.mic_enabled = true;
        self.state.camera_enabled = true;
    }

    fn sync_flags(&mut self) {
        if let Some(capture) = &self.capture {
            self.state.mic_enabled = capture.first_audio().map(|t| t.is_enabled()).unwrap_or(true);
            self.state.camera_enabled =
                capture.first_video().map(|t| t.is_enabled()).unwrap_or(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_toggle_without_capture_is_noop() {
        let mut media = MediaAcquirer::new(Arc::new(SyntheticCaptureDevice::new()));
        let before = media.state();

        assert_eq!(media.toggle_mic(), None);
        assert_eq!(media.toggle_camera(), None);
        assert_eq!(media.state(), before);
    }

    #[tokio::test]
    async fn test_toggle_flips_first_track() {
        let mut media = MediaAcquirer::new(Arc::new(SyntheticCaptureDevice::new()));
        let capture = media.acquire(FacingMode::User).await.unwrap();

        assert_eq!(media.toggle_mic(), Some(false));
        assert!(!capture.first_audio().unwrap().is_enabled());
        assert!(!media.state().mic_enabled);

        assert_eq!(media.toggle_camera(), Some(false));
        assert_eq!(media.toggle_camera(), Some(true));
        assert!(media.state().camera_enabled);

        media.reset_tracks();
        assert!(capture.first_audio().unwrap().is_enabled());
        assert!(media.state().mic_enabled);
    }

    #[tokio::test]
    async fn test_acquire_failure_returns_none() {
        let device = Arc::new(SyntheticCaptureDevice::unavailable());
        let mut media = MediaAcquirer::new(device);

        assert!(media.acquire(FacingMode::User).await.is_none());
        assert!(media.capture().is_none());
    }

    #[tokio::test]
    async fn test_rotate_without_session_swaps_capture() {
        let device = Arc::new(SyntheticCaptureDevice::new());
        let mut media = MediaAcquirer::new(device.clone());
        let first = media.acquire(FacingMode::User).await.unwrap();

        assert!(media.rotate_camera(None).await);
        assert!(first.tracks().iter().all(|t| !t.is_live()));
        assert_eq!(media.state().facing_mode, FacingMode::Environment);
        assert_ne!(media.capture().unwrap().id(), first.id());
        assert_eq!(device.open_count(), 2);
    }

    #[tokio::test]
    async fn test_rotate_failure_keeps_previous_capture() {
        let device = Arc::new(SyntheticCaptureDevice::new());
        let mut media = MediaAcquirer::new(device.clone());
        let first = media.acquire(FacingMode::User).await.unwrap();

        device.set_available(false);
        assert!(!media.rotate_camera(None).await);
        assert_eq!(media.capture().unwrap().id(), first.id());
        assert_eq!(media.state().facing_mode, FacingMode::User);
        assert!(first.tracks().iter().all(|t| t.is_live()));
    }

    struct RefusingConnection;

    #[async_trait]
    impl PeerConnection for RefusingConnection {
        async fn create_offer(&self) -> Result<SessionDescription> {
            Err(Error::Rtc("unused".to_string()))
        }

        async fn create_answer(&self) -> Result<SessionDescription> {
            Err(Error::Rtc("unused".to_string()))
        }

        async fn set_remote_description(&self, _description: SessionDescription) -> Result<()> {
            Ok(())
        }

        async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<()> {
            Ok(())
        }

        async fn add_track(&self, _track: Arc<MediaTrack>, _stream_id: &str) -> Result<()> {
            Ok(())
        }

        async fn replace_video_track(&self, _track: Arc<MediaTrack>) -> Result<()> {
            Err(Error::Rtc("sender gone".to_string()))
        }

        async fn create_data_channel(
            &self,
            _label: &str,
        ) -> Result<Arc<dyn crate::peer::DataChannel>> {
            Err(Error::Rtc("unused".to_string()))
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_track_swap_keeps_previous_capture() {
        let device = Arc::new(SyntheticCaptureDevice::new());
        let mut media = MediaAcquirer::new(device.clone());
        let first = media.acquire(FacingMode::User).await.unwrap();

        assert!(!media.rotate_camera(Some(&RefusingConnection)).await);
        assert_eq!(media.capture().unwrap().id(), first.id());
        assert_eq!(media.state().facing_mode, FacingMode::User);
        assert!(first.tracks().iter().all(|t| t.is_live()));
        assert_eq!(device.open_count(), 2);
    }
}
