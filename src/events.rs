//! Inbound signal wire formats.
//!
//! Two independent sources feed the tracker: network-level observation
//! (`begin` / `completed` / `failed`) and in-page interception
//! (`REQUEST_START` / `REQUEST_END`). Both are accepted as JSON, one event
//! per line. A missing `at` means "now".

use crate::error::Result;
use crate::pending::Millis;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NetworkEvent {
    #[serde(rename_all = "camelCase")]
    Begin {
        request_id: String,
        url: String,
        method: String,
        #[serde(default)]
        at: Option<Millis>,
    },
    #[serde(rename_all = "camelCase")]
    Completed {
        request_id: String,
        #[serde(default)]
        at: Option<Millis>,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        request_id: String,
        #[serde(default)]
        at: Option<Millis>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
    #[serde(rename_all = "camelCase")]
    RequestStart {
        request_id: String,
        url: String,
        #[serde(default)]
        platform_hint: Option<String>,
        #[serde(default)]
        at: Option<Millis>,
    },
    #[serde(rename_all = "camelCase")]
    RequestEnd {
        request_id: String,
        #[serde(default)]
        at: Option<Millis>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InboundEvent {
    Network(NetworkEvent),
    Page(PageMessage),
}

impl InboundEvent {
    pub fn at(&self) -> Option<Millis> {
        match self {
            InboundEvent::Network(
                NetworkEvent::Begin { at, .. }
                | NetworkEvent::Completed { at, .. }
                | NetworkEvent::Failed { at, .. },
            ) => *at,
            InboundEvent::Page(
                PageMessage::RequestStart { at, .. } | PageMessage::RequestEnd { at, .. },
            ) => *at,
        }
    }
}

/// Decode one line. Blank lines and `#` comments yield `None`.
pub fn decode_line(line: &str) -> Result<Option<InboundEvent>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}
