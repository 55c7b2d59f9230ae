use serde::{Deserialize, Serialize};

/// Header added to replayed responses so clients can tell a replay from a
/// live execution. Never present on the original response.
pub const REPLAY_MARKER_HEADER: &str = "x-idempotent-replay";

/// Snapshot of a handler's response, captured byte-for-byte.
///
/// The replay path reproduces status, headers, and body exactly as the
/// original caller received them; the only replay-visible addition is the
/// marker header, applied at replay time and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(with = "hex::serde")]
    pub body: Vec<u8>,
}

impl CapturedResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// True when the outcome is committable: 5xx responses are treated as
    /// handler failures and never cached for replay.
    pub fn is_success(&self) -> bool {
        self.status < 500
    }

    /// Looks up a captured header by name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
