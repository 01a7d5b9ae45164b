//! Text chat over the call's data channel

use crate::error::{Error, Result};
use crate::models::ChatMessage;
use crate::peer::DataChannel;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;

/// Ordered chat log plus the outbound queue used while the channel is not open.
pub struct DataChannelMessenger {
    channel: Option<Arc<dyn DataChannel>>,
    ready: bool,
    queue: VecDeque<String>,
    capacity: usize,
    log: Vec<ChatMessage>,
}

impl DataChannelMessenger {
    pub fn new(capacity: usize) -> Self {
        Self {
            channel: None,
            ready: false,
            queue: VecDeque::new(),
            capacity: capacity.max(1),
            log: Vec::new(),
        }
    }

    pub fn attach(&mut self, channel: Arc<dyn DataChannel>) {
        debug!("Attaching data channel {}", channel.label());
        self.channel = Some(channel);
        self.ready = false;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn log(&self) -> &[ChatMessage] {
        &self.log
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Channel opened: flush the queue in FIFO order.
    ///
    /// Stops at the first failed send; that entry and everything behind it
    /// stay queued. Returns how many entries went out.
    pub async fn on_open(&mut self) -> usize {
        info!("Data channel opened");
        self.ready = true;

        let channel = match &self.channel {
            Some(channel) => channel.clone(),
            None => return 0,
        };

        let mut sent = 0;
        while let Some(payload) = self.queue.front() {
            if !channel.is_open() {
                break;
            }
            if let Err(e) = channel.send_text(payload).await {
                warn!("Send queue error: {}", e);
                break;
            }
            self.queue.pop_front();
            sent += 1;
        }
        sent
    }

    pub fn on_message(&mut self, raw: &str) -> &ChatMessage {
        let content = match serde_json::from_str::<String>(raw) {
            Ok(text) => text,
            Err(e) => {
                warn!("Inbound chat payload is not a JSON string ({}), keeping raw text", e);
                raw.to_string()
            }
        };
        self.log.push(ChatMessage::new(content, false));
        &self.log[self.log.len() - 1]
    }

    pub fn on_close(&mut self) {
        info!("Data channel closed");
        self.ready = false;
    }

    /// Echo `text` into the log and send it, or queue it until the channel opens.
    ///
    /// Blank input is ignored (`Ok(false)`). A send failure falls back to the
    /// queue; only a full queue is reported to the caller.
    pub async fn send_message(&mut self, text: &str) -> Result<bool> {
        if text.trim().is_empty() {
            return Ok(false);
        }

        let payload = serde_json::to_string(text)?;
        let open_channel = self
            .channel
            .as_ref()
            .filter(|c| self.ready && c.is_open())
            .cloned();

        match open_channel {
            Some(channel) => match channel.send_text(&payload).await {
                Ok(()) => {
                    self.log.push(ChatMessage::new(text, true));
                    return Ok(true);
                }
                Err(e) => warn!("Error sending message, queueing: {}", e),
            },
            None => debug!("Data channel not open, queueing message"),
        }

        // Echo only once the message is either sent or queued.
        self.enqueue(payload)?;
        self.log.push(ChatMessage::new(text, true));
        Ok(true)
    }

    /// Drop the channel, the queue and the log.
    pub fn reset(&mut self) {
        self.channel = None;
        self.ready = false;
        self.queue.clear();
        self.log.clear();
    }

    fn enqueue(&mut self, payload: String) -> Result<()> {
        if self.queue.len() >= self.capacity {
            return Err(Error::QueueFull {
                capacity: self.capacity,
            });
        }
        self.queue.push_back(payload);
        Ok(())
    }
}
