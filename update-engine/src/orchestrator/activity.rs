//! Single state token that serializes check and update workers.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// What the orchestrator is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Activity {
    Idle = 0,
    Checking = 1,
    Updating = 2,
}

impl Activity {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Activity::Checking,
            2 => Activity::Updating,
            _ => Activity::Idle,
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Activity::Idle => "idle",
            Activity::Checking => "check",
            Activity::Updating => "update",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ActivityToken(Arc<AtomicU8>);

impl ActivityToken {
    pub(crate) fn current(&self) -> Activity {
        Activity::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from Idle to `activity`. `None` if something else is running.
    pub(crate) fn try_begin(&self, activity: Activity) -> Option<ActivityGuard> {
        self.0
            .compare_exchange(
                Activity::Idle as u8,
                activity as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| ActivityGuard {
                token: Arc::clone(&self.0),
            })
    }
}

/// Returns the token to Idle when dropped, including on panic
#[derive(Debug)]
pub(crate) struct ActivityGuard {
    token: Arc<AtomicU8>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.token.store(Activity::Idle as u8, Ordering::Release);
    }
}
