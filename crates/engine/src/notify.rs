//! Session notifications
//!
//! Notifiers registered on the store observe every recorded event and the
//! completion of every top-level session. Listener failures never reach the
//! session's caller: a panicking listener is demoted to a warning diagnostic.

use crate::session::SessionHandle;
use crate::tracking::TrackedElement;
use chrono::{DateTime, Utc};
use hyperstore_core::{Event, ExecutionResult, SessionId, SessionIndex, SessionMode, StoreId};
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::any::Any;

/// Observer of session activity
///
/// Every method defaults to a no-op.
pub trait EventNotifier: Send + Sync {
    /// An event was recorded by a session
    fn notify_event(&self, _session: &SessionHandle, _event: &Event) {}

    /// A top-level session finished validation and is about to commit or roll back
    fn notify_session_completed(&self, _info: &SessionInformation) {}

    /// Final diagnostics of a disposed top-level session
    fn notify_messages(&self, _info: &SessionInformation, _messages: &ExecutionResult) {}
}

/// Owned summary of a completed session
#[derive(Debug, Clone)]
pub struct SessionInformation {
    /// Session lineage id
    pub session_id: SessionId,
    /// Index the lineage was bound to
    pub index: SessionIndex,
    /// Store the session ran against
    pub store_id: StoreId,
    /// Store the changes originate from
    pub origin_store_id: StoreId,
    /// Mode of the outermost level
    pub mode: SessionMode,
    /// Configured read-only status
    pub read_only: bool,
    /// Whether the session is going to roll back
    pub aborted: bool,
    /// Recorded events in order
    pub events: Vec<Event>,
    /// Elements that went through validation
    pub involved_elements: Vec<TrackedElement>,
    /// Diagnostics collected so far
    pub messages: ExecutionResult,
    /// Context infos of the outermost level
    pub context_infos: FxHashMap<String, Value>,
    /// Default domain of the outermost level
    pub default_domain: Option<String>,
    /// When the notification was built
    pub completed_at: DateTime<Utc>,
}

impl SessionInformation {
    /// True when the session will commit
    pub fn is_committing(&self) -> bool {
        !self.aborted && !self.messages.has_errors()
    }

    /// Top-level events only
    pub fn top_level_events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(|e| e.top_level)
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;

    #[test]
    fn test_panic_message_extraction() {
        let payload = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload = panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "code 7");

        let payload = panic::catch_unwind(|| panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
