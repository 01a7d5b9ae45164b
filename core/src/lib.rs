//! PeerCall Core Library
//!
//! Call session engine for one-to-one chat and video calls.
//! Provides: signaling, peer connections, media capture, and text chat.

pub mod config;
pub mod error;
pub mod media;
pub mod messenger;
pub mod models;
pub mod network;
pub mod peer;
pub mod rtc;
pub mod session;
pub mod signaling;

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub use config::*;
pub use error::*;
pub use media::*;
pub use messenger::*;
pub use models::*;
pub use network::*;
pub use peer::*;
pub use rtc::*;
pub use session::*;
pub use signaling::*;

/// Main client instance
///
/// Wires the relay connection, the webrtc connector and a capture device to a
/// [`CallController`] running on its own task.
pub struct PeerCallClient {
    commands: mpsc::UnboundedSender<ClientEvent>,
    signaling: Arc<WebSocketSignaling>,
    view: watch::Receiver<CallView>,
    task: JoinHandle<()>,
}

impl PeerCallClient {
    /// Connect to the relay and start the call controller
    pub async fn start(config: ClientConfig, capture: Arc<dyn CaptureDevice>) -> Result<Self> {
        config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let signaling = Arc::new(WebSocketSignaling::connect(&config, tx.clone()).await?);
        let connector = Arc::new(RtcPeerConnector::new()?);

        let mut controller =
            CallController::new(config, signaling.clone(), connector, capture, tx.clone());
        controller.start().await;
        let view = controller.subscribe();
        let task = tokio::spawn(controller.run(rx));

        Ok(Self {
            commands: tx,
            signaling,
            view,
            task,
        })
    }

    /// Forward a user action to the controller
    pub fn send(&self, command: UserCommand) -> Result<()> {
        self.commands
            .send(ClientEvent::Command(command))
            .map_err(|_| Error::Signaling("call controller stopped".to_string()))
    }

    /// Observe presentation state
    pub fn subscribe(&self) -> watch::Receiver<CallView> {
        self.view.clone()
    }

    /// Current presentation state
    pub fn view(&self) -> CallView {
        self.view.borrow().clone()
    }

    /// Hang up, wait for the controller to stop, then close the relay socket
    pub async fn shutdown(self) -> Result<()> {
        self.send(UserCommand::Quit)?;
        let result = self
            .task
            .await
            .map_err(|e| Error::Signaling(format!("controller task failed: {}", e)));
        self.signaling.disconnect();
        result
    }
}
