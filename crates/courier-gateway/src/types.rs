use serde::{Deserialize, Serialize};

/// Reply written to the hook client on every accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(rename = "continue")]
    pub proceed: bool,
}

impl Ack {
    pub const fn proceed() -> Self {
        Self { proceed: true }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|_| br#"{"continue":true}"#.to_vec())
    }
}

impl Default for Ack {
    fn default() -> Self {
        Self::proceed()
    }
}
