use serde::{Deserialize, Serialize};

/// Tab handle assigned by the host browser. Opaque to us beyond equality.
pub type TabId = i64;

/// Side effects the scheduler pushes across the host boundary. The real
/// host applies them to the browser; `serve` drains them into the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// Reload the page in the given tab.
    Reload { tab_id: TabId },
    /// Replace the toolbar badge text for the given tab. An empty string
    /// clears the badge.
    BadgeText { tab_id: TabId, text: String },
}

/// Payload of a start/stop command. The target tab travels with the
/// command instead of being re-resolved from focus state on arrival.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabCommand {
    pub tab_id: TabId,
}

/// Snapshot returned by the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabStatus {
    pub tab_id: TabId,
    pub running: bool,
    pub delay_ms: Option<u64>,
}
