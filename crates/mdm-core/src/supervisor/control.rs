//! Shared abort flag checked by the supervisor's control path.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Why a run is being stopped. Pause preserves the queue entry; cancel
/// removes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Cancel,
    Pause,
}

const NONE: u8 = 0;
const CANCEL: u8 = 1;
const PAUSE: u8 = 2;

/// Cloneable flag registered per running job. The control side calls
/// `request`; the supervisor polls `requested` on its control tick.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicU8>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination. Cancel wins over pause if both arrive.
    pub fn request(&self, reason: AbortReason) {
        match reason {
            AbortReason::Cancel => self.0.store(CANCEL, Ordering::Relaxed),
            AbortReason::Pause => {
                let _ = self
                    .0
                    .compare_exchange(NONE, PAUSE, Ordering::Relaxed, Ordering::Relaxed);
            }
        }
    }

    pub fn requested(&self) -> Option<AbortReason> {
        match self.0.load(Ordering::Relaxed) {
            CANCEL => Some(AbortReason::Cancel),
            PAUSE => Some(AbortReason::Pause),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear() {
        assert_eq!(CancelFlag::new().requested(), None);
    }

    #[test]
    fn pause_then_cancel_escalates() {
        let flag = CancelFlag::new();
        flag.request(AbortReason::Pause);
        assert_eq!(flag.requested(), Some(AbortReason::Pause));
        flag.request(AbortReason::Cancel);
        assert_eq!(flag.requested(), Some(AbortReason::Cancel));
    }

    #[test]
    fn cancel_is_not_downgraded_by_pause() {
        let flag = CancelFlag::new();
        flag.request(AbortReason::Cancel);
        flag.request(AbortReason::Pause);
        assert_eq!(flag.requested(), Some(AbortReason::Cancel));
    }
}
