//! Text presentation surface: console commands in, view changes out

use chrono::{Local, TimeZone};
use peercall_core::{CallView, ConnectionType, DialogState, PeerId, UserCommand};

pub const HELP: &str = "\
Commands:
  /call chat|video <code>   call a peer by personal code
  /accept  /reject          answer an incoming call
  /hangup                   end the current call
  /mic  /cam  /rotate       toggle microphone, camera, flip camera
  /mute                     toggle remote audio playback
  /register <code>          register a personal code
  /help  /quit
Anything else is sent as a chat message.";

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleInput {
    Command(UserCommand),
    Help,
    Empty,
}

pub fn parse_line(line: &str) -> Result<ConsoleInput, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ConsoleInput::Empty);
    }
    if !line.starts_with('/') {
        return Ok(ConsoleInput::Command(UserCommand::SendMessage(line.to_string())));
    }

    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    let command = match (verb, args.as_slice()) {
        ("/call", [kind, code]) => {
            let connection_type = match *kind {
                "chat" => ConnectionType::Chat,
                "video" => ConnectionType::Video,
                other => return Err(format!("unknown call type {:?}", other)),
            };
            UserCommand::InitiateCall {
                connection_type,
                remote_peer_id: PeerId::from(*code),
            }
        }
        ("/call", _) => return Err("usage: /call chat|video <code>".to_string()),
        ("/accept", []) => UserCommand::AcceptCall,
        ("/reject", []) => UserCommand::RejectCall,
        ("/hangup", []) => UserCommand::HangUp,
        ("/mic", []) => UserCommand::ToggleMic,
        ("/cam", []) => UserCommand::ToggleCamera,
        ("/rotate", []) => UserCommand::RotateCamera,
        ("/mute", []) => UserCommand::ToggleMuteDisplay,
        ("/register", [code]) => UserCommand::RegisterCode(code.to_string()),
        ("/register", _) => return Err("usage: /register <code>".to_string()),
        ("/quit", []) => UserCommand::Quit,
        ("/help", _) => return Ok(ConsoleInput::Help),
        _ => return Err(format!("unknown command {:?}, try /help", line)),
    };
    Ok(ConsoleInput::Command(command))
}

/// Lines describing what changed between two views.
pub fn describe_changes(prev: &CallView, next: &CallView, show_timestamps: bool) -> Vec<String> {
    let mut lines = Vec::new();

    if prev.local_peer_id != next.local_peer_id {
        if let Some(id) = &next.local_peer_id {
            lines.push(format!("* your code: {}", id));
        }
    }

    if prev.phase != next.phase {
        lines.push(format!("* call {:?} -> {:?}", prev.phase, next.phase));
    }

    if prev.dialog != next.dialog {
        match &next.dialog {
            DialogState::None => {}
            DialogState::Incoming { call_kind } => {
                lines.push(format!("* incoming {} call, /accept or /reject", call_kind))
            }
            DialogState::Calling => lines.push("* calling...".to_string()),
            DialogState::Info {
                title, description, ..
            } => lines.push(format!("* {}: {}", title, description)),
        }
    }

    if !prev.messaging_ready && next.messaging_ready {
        lines.push("* chat ready".to_string());
    }

    if prev.mic_enabled != next.mic_enabled {
        lines.push(format!("* microphone {}", on_off(next.mic_enabled)));
    }
    if prev.camera_enabled != next.camera_enabled {
        lines.push(format!("* camera {}", on_off(next.camera_enabled)));
    }
    if prev.facing_mode != next.facing_mode {
        lines.push(format!("* camera facing {:?}", next.facing_mode));
    }
    if prev.muted_display != next.muted_display {
        lines.push(format!("* remote audio {}", on_off(!next.muted_display)));
    }

    let remote_tracks = |view: &CallView| view.remote_stream.as_ref().map(|s| s.tracks.len());
    if remote_tracks(prev) != remote_tracks(next) {
        if let Some(count) = remote_tracks(next).filter(|c| *c > 0) {
            lines.push(format!("* receiving {} remote track(s)", count));
        }
    }

    // The log only grows during a call and is cleared on teardown.
    let already_shown = if next.messages.len() >= prev.messages.len() {
        prev.messages.len()
    } else {
        0
    };
    for message in &next.messages[already_shown..] {
        let who = if message.own { "me" } else { "peer" };
        if show_timestamps {
            let time = Local
                .timestamp_millis_opt(message.timestamp)
                .single()
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_default();
            lines.push(format!("[{}] {}: {}", time, who, message.content));
        } else {
            lines.push(format!("{}: {}", who, message.content));
        }
    }

    lines
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}
