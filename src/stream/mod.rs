//! Client-facing stream protocol.
//!
//! A stream request either returns one bounded catch-up batch as JSON, or,
//! in live mode, writes the catch-up as `change` frames and then tails new
//! activity over server-sent events until the connection ends. Every change
//! frame carries the activity id, which is the offset a client resumes from.

mod handler;
mod request;
mod sse;

pub use handler::{
    CatchUpBatch, CatchUpPage, CloseReason, LiveRegistration, LiveSummary, StreamHandler,
};
pub use request::{StreamOffset, StreamRequest};
pub use sse::{SseFrame, SseTransport, CHANGE_EVENT, PING_EVENT};
