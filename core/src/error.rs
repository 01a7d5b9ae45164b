//! Error types for PeerCall Core

use crate::models::CallPhase;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("WebRTC error: {0}")]
    Rtc(String),

    #[error("Capture device error: {0}")]
    Capture(String),

    #[error("Data channel error: {0}")]
    DataChannel(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Cannot {action} while {phase:?}")]
    InvalidPhase {
        action: &'static str,
        phase: CallPhase,
    },

    #[error("A call is already in progress")]
    CallInProgress,

    #[error("Not connected to signaling relay")]
    NotConnected,

    #[error("Outbound message queue is full ({capacity} messages)")]
    QueueFull { capacity: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e.to_string())
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::Rtc(e.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::Config(e.to_string())
    }
}
