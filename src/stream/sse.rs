//! Server-sent event framing.

use crate::error::{Result, SyncError};
use crate::notifications::Notification;
use crate::types::ActivityId;
use std::io::{self, Write};

/// Event name for activity notifications.
pub const CHANGE_EVENT: &str = "change";

/// Event name for keepalives.
pub const PING_EVENT: &str = "ping";

/// One `text/event-stream` message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub id: Option<String>,
    pub data: String,
}

impl SseFrame {
    pub fn new(event: impl Into<String>, id: Option<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            id,
            data: data.into(),
        }
    }

    /// Notification frame; the SSE id is the activity id clients resume from.
    pub fn change(id: &ActivityId, notification: &Notification) -> Result<Self> {
        Self::check_id(id)?;
        Ok(Self::new(
            CHANGE_EVENT,
            Some(id.to_string()),
            serde_json::to_string(notification)?,
        ))
    }

    /// Reject activity ids that would break out of the `id:` line.
    pub fn check_id(id: &ActivityId) -> Result<()> {
        if id.as_str().contains(['\n', '\r', '\0']) {
            return Err(SyncError::MalformedActivityEvent {
                id: id.clone(),
                reason: "id contains a line break or NUL".to_string(),
            });
        }
        Ok(())
    }

    pub fn ping() -> Self {
        Self::new(PING_EVENT, None, "pong")
    }

    pub fn is_ping(&self) -> bool {
        self.event == PING_EVENT
    }

    /// Wire form, terminated by a blank line.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + 32);
        out.push_str("event: ");
        out.push_str(&self.event);
        out.push('\n');
        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        for line in self.data.lines() {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        if self.data.is_empty() {
            out.push_str("data: \n");
        }
        out.push('\n');
        out
    }
}

/// Connection-side sink for frames.
pub trait SseTransport {
    fn send(&mut self, frame: &SseFrame) -> io::Result<()>;
}

impl<W: Write> SseTransport for W {
    fn send(&mut self, frame: &SseFrame) -> io::Result<()> {
        self.write_all(frame.encode().as_bytes())?;
        self.flush()
    }
}
