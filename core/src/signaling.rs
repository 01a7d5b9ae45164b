//! Signaling protocol spoken with the relay
//!
//! Every frame is a JSON envelope `{"type": <event>, "payload": {...}}`.
//! Event names and payload fields follow the relay's conventions, so the
//! typed enums here are the only place that knows about them.

use crate::error::Result;
use crate::models::*;
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ============================================================================
// Event names
// ============================================================================

pub const EVENT_CONNECT: &str = "connect";
pub const EVENT_REGISTRATION_RESULT: &str = "register_personal_code_answer";
pub const EVENT_PRE_OFFER_IN: &str = "preOffers";
pub const EVENT_PRE_OFFER_OUT: &str = "preOffer";
pub const EVENT_PRE_OFFER_ANSWER: &str = "pre_offer_answer";
pub const EVENT_WEBRTC_SIGNALING: &str = "webRTC_signaling";
pub const EVENT_HANG_UP: &str = "user_hanged_up";
pub const EVENT_REGISTER_CODE: &str = "register_personal_code";

// ============================================================================
// Negotiation messages
// ============================================================================

/// Negotiation message relayed verbatim between the two peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RtcSignal {
    #[serde(rename = "OFFER")]
    Offer { offer: SessionDescription },
    #[serde(rename = "ANSWER")]
    Answer { answer: SessionDescription },
    #[serde(rename = "ICE_CANDIDATE")]
    IceCandidate { candidate: IceCandidate },
}

impl RtcSignal {
    const KNOWN_TYPES: [&'static str; 3] = ["OFFER", "ANSWER", "ICE_CANDIDATE"];

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "OFFER",
            Self::Answer { .. } => "ANSWER",
            Self::IceCandidate { .. } => "ICE_CANDIDATE",
        }
    }
}

// ============================================================================
// Inbound
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    /// Transport connected and the relay assigned us an identity.
    Connected { peer_id: PeerId },
    Disconnected,
    RegistrationResult {
        success: bool,
        personal_code: Option<PeerId>,
        message: Option<String>,
    },
    PreOffer(ConnectionIntent),
    PreOfferAnswer(PreOfferAnswer),
    Rtc(RtcSignal),
    RemoteHangUp,
}

#[derive(Deserialize)]
struct ConnectPayload {
    id: PeerId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationPayload {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    personal_code: Option<PeerId>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct PreOfferPayload {
    connection_type: ConnectionType,
    personal_code: PeerId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreOfferAnswerPayload {
    pre_offer_answer: PreOfferAnswer,
}

impl SignalingEvent {
    /// Decode one text frame. Frames that are not understood yield `None`.
    pub fn decode(text: &str) -> Option<Self> {
        let data: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!("Dropping malformed signaling frame: {}", e);
                return None;
            }
        };
        let event = data["type"].as_str()?;
        let payload = data.get("payload").cloned().unwrap_or(Value::Null);
        Self::from_wire(event, payload)
    }

    pub fn from_wire(event: &str, payload: Value) -> Option<Self> {
        let decoded = match event {
            EVENT_CONNECT => serde_json::from_value::<ConnectPayload>(payload)
                .map(|p| Self::Connected { peer_id: p.id }),
            EVENT_REGISTRATION_RESULT => {
                serde_json::from_value::<RegistrationPayload>(payload).map(|p| {
                    Self::RegistrationResult {
                        success: p.success,
                        personal_code: p.personal_code,
                        message: p.message,
                    }
                })
            }
            EVENT_PRE_OFFER_IN => serde_json::from_value::<PreOfferPayload>(payload).map(|p| {
                Self::PreOffer(ConnectionIntent {
                    connection_type: p.connection_type,
                    remote_peer_id: p.personal_code,
                })
            }),
            EVENT_PRE_OFFER_ANSWER => serde_json::from_value::<PreOfferAnswerPayload>(payload)
                .map(|p| Self::PreOfferAnswer(p.pre_offer_answer)),
            EVENT_WEBRTC_SIGNALING => {
                let kind = payload["type"].as_str().unwrap_or_default();
                if !RtcSignal::KNOWN_TYPES.contains(&kind) {
                    debug!("Ignoring signaling message of type {:?}", kind);
                    return None;
                }
                serde_json::from_value::<RtcSignal>(payload).map(Self::Rtc)
            }
            EVENT_HANG_UP => Ok(Self::RemoteHangUp),
            other => {
                debug!("Ignoring unknown signaling event {}", other);
                return None;
            }
        };

        match decoded {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Invalid {} payload: {}", event, e);
                None
            }
        }
    }
}

// ============================================================================
// Outbound
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundSignal {
    PreOffer {
        connection_type: ConnectionType,
        target: PeerId,
    },
    PreOfferAnswer {
        answer: PreOfferAnswer,
        target: PeerId,
    },
    Rtc {
        target: PeerId,
        signal: RtcSignal,
    },
    HangUp {
        target: PeerId,
    },
    RegisterCode {
        code: String,
    },
}

impl OutboundSignal {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::PreOffer { .. } => EVENT_PRE_OFFER_OUT,
            Self::PreOfferAnswer { .. } => EVENT_PRE_OFFER_ANSWER,
            Self::Rtc { .. } => EVENT_WEBRTC_SIGNALING,
            Self::HangUp { .. } => EVENT_HANG_UP,
            Self::RegisterCode { .. } => EVENT_REGISTER_CODE,
        }
    }

    /// Peer the relay should route this message to, if any.
    pub fn target(&self) -> Option<&PeerId> {
        match self {
            Self::PreOffer { target, .. }
            | Self::PreOfferAnswer { target, .. }
            | Self::Rtc { target, .. }
            | Self::HangUp { target } => Some(target),
            Self::RegisterCode { .. } => None,
        }
    }

    pub fn payload(&self) -> Result<Value> {
        let payload = match self {
            Self::PreOffer {
                connection_type,
                target,
            } => serde_json::to_value(PreOfferPayload {
                connection_type: *connection_type,
                personal_code: target.clone(),
            })?,
            Self::PreOfferAnswer { answer, target } => json!({
                "callerSocketId": target,
                "preOfferAnswer": answer,
            }),
            Self::Rtc { target, signal } => {
                let mut value = serde_json::to_value(signal)?;
                if let Some(map) = value.as_object_mut() {
                    map.insert("connectedUserSocketId".to_string(), json!(target));
                }
                value
            }
            Self::HangUp { target } => json!({ "connectedUserSocketId": target }),
            Self::RegisterCode { code } => json!({ "personalCode": code }),
        };
        Ok(payload)
    }

    /// Full envelope ready to be written to the socket.
    pub fn encode(&self) -> Result<String> {
        let msg = json!({
            "type": self.event_name(),
            "payload": self.payload()?,
        });
        Ok(msg.to_string())
    }
}

// ============================================================================
// Transport seam
// ============================================================================

/// Message channel to the signaling relay.
///
/// Inbound events are not pulled through this trait: implementations push
/// them into the controller's event queue as they arrive.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn send(&self, message: OutboundSignal) -> Result<()>;

    fn is_connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_pre_offer() {
        let frame = r#"{"type":"preOffers","payload":{"connection_type":"personal_code_video","personal_code":"abc"}}"#;
        let event = SignalingEvent::decode(frame).unwrap();
        assert_eq!(
            event,
            SignalingEvent::PreOffer(ConnectionIntent {
                connection_type: ConnectionType::Video,
                remote_peer_id: PeerId::from("abc"),
            })
        );
    }

    #[test]
    fn test_decode_pre_offer_answers() {
        for (wire, expected) in [
            ("Call_Accepted", PreOfferAnswer::Accepted),
            ("Call_Rejected", PreOfferAnswer::Rejected),
            ("Not_Found", PreOfferAnswer::NotFound),
            ("Call_Unavailable", PreOfferAnswer::Unavailable),
        ] {
            let payload = json!({ "preOfferAnswer": wire });
            let event = SignalingEvent::from_wire(EVENT_PRE_OFFER_ANSWER, payload).unwrap();
            assert_eq!(event, SignalingEvent::PreOfferAnswer(expected));
        }
    }

    #[test]
    fn test_decode_rtc_ignores_unknown_type() {
        let payload = json!({ "type": "RENEGOTIATE", "foo": 1 });
        assert!(SignalingEvent::from_wire(EVENT_WEBRTC_SIGNALING, payload).is_none());
        assert!(SignalingEvent::from_wire("weather_report", json!({})).is_none());
    }

    #[test]
    fn test_decode_ice_candidate_with_routing_field() {
        let payload = json!({
            "connectedUserSocketId": "me",
            "type": "ICE_CANDIDATE",
            "candidate": { "candidate": "candidate:0", "sdpMid": "0", "sdpMLineIndex": 0 }
        });
        match SignalingEvent::from_wire(EVENT_WEBRTC_SIGNALING, payload) {
            Some(SignalingEvent::Rtc(RtcSignal::IceCandidate { candidate })) => {
                assert_eq!(candidate.candidate, "candidate:0");
            }
            other => panic!("Expected ICE candidate, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_registration_result() {
        let payload = json!({ "success": false, "message": "taken" });
        let event = SignalingEvent::from_wire(EVENT_REGISTRATION_RESULT, payload).unwrap();
        assert_eq!(
            event,
            SignalingEvent::RegistrationResult {
                success: false,
                personal_code: None,
                message: Some("taken".to_string()),
            }
        );
    }

    #[test]
    fn test_encode_offer_envelope() {
        let msg = OutboundSignal::Rtc {
            target: PeerId::from("peer-b"),
            signal: RtcSignal::Offer {
                offer: SessionDescription::offer("v=0"),
            },
        };
        let data: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(data["type"], "webRTC_signaling");
        assert_eq!(data["payload"]["type"], "OFFER");
        assert_eq!(data["payload"]["connectedUserSocketId"], "peer-b");
        assert_eq!(data["payload"]["offer"]["type"], "offer");
        assert_eq!(data["payload"]["offer"]["sdp"], "v=0");
    }

    #[test]
    fn test_encode_pre_offer_answer_and_hang_up() {
        let answer = OutboundSignal::PreOfferAnswer {
            answer: PreOfferAnswer::Rejected,
            target: PeerId::from("caller"),
        };
        let payload = answer.payload().unwrap();
        assert_eq!(payload["callerSocketId"], "caller");
        assert_eq!(payload["preOfferAnswer"], "Call_Rejected");

        let hang_up = OutboundSignal::HangUp {
            target: PeerId::from("caller"),
        };
        assert_eq!(hang_up.event_name(), "user_hanged_up");
        assert_eq!(hang_up.target(), Some(&PeerId::from("caller")));
    }
}
