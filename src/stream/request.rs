//! Stream request parameters.

use crate::error::{Result, SyncError};
use crate::types::ActivityId;
use std::collections::BTreeSet;

/// Where a stream starts reading the activity log.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum StreamOffset {
    /// From the first activity (`offset=-1`).
    Beginning,
    /// Only activities after the current head (`offset=now`, or no offset).
    #[default]
    Now,
    /// Activities strictly after this id.
    After(ActivityId),
}

impl StreamOffset {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "-1" => StreamOffset::Beginning,
            "now" => StreamOffset::Now,
            id => StreamOffset::After(ActivityId::new(id)),
        }
    }
}

/// Parsed stream query.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct StreamRequest {
    pub offset: StreamOffset,
    /// Tail the log after catch-up.
    pub live: bool,
    /// Entity types the client asked for; empty means all.
    pub entity_types: BTreeSet<String>,
}

impl StreamRequest {
    /// Catch-up only request.
    pub fn catch_up(offset: StreamOffset) -> Self {
        Self {
            offset,
            ..Self::default()
        }
    }

    /// Live request.
    pub fn live(offset: StreamOffset) -> Self {
        Self {
            offset,
            live: true,
            ..Self::default()
        }
    }

    pub fn with_entity_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entity_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Parse decoded query pairs: `offset`, `live` and `entityTypes`.
    ///
    /// `live_token` is the only accepted `live` value. Unknown keys are ignored.
    pub fn from_query<'a, I>(pairs: I, live_token: &str) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut request = Self::default();
        for (key, value) in pairs {
            match key {
                "offset" => request.offset = StreamOffset::parse(value),
                "live" if value == live_token => request.live = true,
                "live" => {
                    return Err(SyncError::InvalidRequest(format!(
                        "unsupported live mode: {value:?}"
                    )))
                }
                "entityTypes" => {
                    request.entity_types = value
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                _ => {}
            }
        }
        Ok(request)
    }
}
