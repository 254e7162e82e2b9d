//! JSON body of event grains.
//!
//! GSF itself stores an event grain's payload as opaque bytes; this is
//! the structure those bytes conventionally hold.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One changed path.  `pre` and `post` are omitted when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventItem {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre:  Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(rename = "type")]
    pub event_type: String,
    pub topic:      String,
    #[serde(default)]
    pub data:       Vec<EventItem>,
}

impl EventPayload {
    pub fn new(event_type: impl Into<String>, topic: impl Into<String>) -> Self {
        Self { event_type: event_type.into(), topic: topic.into(), data: Vec::new() }
    }

    pub fn push(&mut self, path: impl Into<String>, pre: Option<Value>, post: Option<Value>) {
        self.data.push(EventItem { path: path.into(), pre, post });
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
