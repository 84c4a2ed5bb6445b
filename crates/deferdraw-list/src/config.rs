use serde::{Deserialize, Serialize};

/// Batching switches for a [`crate::DeferredDisplayList`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeferConfig {
    /// Give every draw op its own batch, in record order.
    pub draw_reorder_disabled: bool,
    /// Insert a visible marker at every barrier and outline batches during replay.
    pub debug_merge_behavior: bool,
}

impl DeferConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
