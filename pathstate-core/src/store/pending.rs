//! Pending root values.
//!
//! While the root value is absent the store holds a [`PendingValue`]. It is
//! either backed by a future (the root arrives when the future settles) or
//! has no source at all (the root was deleted and arrives with the next
//! explicit write).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Rejection;

/// Counter for generating unique pending-value IDs.
static PENDING_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_pending_id() -> u64 {
    PENDING_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingValue {
    /// Identity used to ignore settlements of superseded futures.
    id: u64,
    has_source: bool,
    fulfilled: bool,
    error: Option<Rejection>,
}

impl PendingValue {
    /// Pending on a future that was handed to the spawner.
    pub(crate) fn with_source() -> Self {
        Self {
            id: next_pending_id(),
            has_source: true,
            fulfilled: false,
            error: None,
        }
    }

    /// Pending with nothing to wait for; an explicit write completes it.
    pub(crate) fn awaiting_write() -> Self {
        Self {
            id: next_pending_id(),
            has_source: false,
            fulfilled: false,
            error: None,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn has_source(&self) -> bool {
        self.has_source
    }

    pub(crate) fn is_fulfilled(&self) -> bool {
        self.fulfilled
    }

    pub(crate) fn error(&self) -> Option<&Rejection> {
        self.error.as_ref()
    }

    /// True while a future is still expected to deliver the root.
    pub(crate) fn blocks_writes(&self) -> bool {
        self.has_source && !self.fulfilled
    }

    pub(crate) fn reject(&mut self, rejection: Rejection) {
        self.fulfilled = true;
        self.error = Some(rejection);
    }
}
