//! Cooperative cancellation token.
//!
//! Cloned into every worker and passed explicitly through component
//! signatures; checked at loop boundaries and around external calls.
//! Cancellation is not an error: components observing it return a cancelled
//! outcome so aggregation runs the same path as normal completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn should_continue(&self) -> bool {
        !self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_uncancelled() {
        let token = CancelToken::new();
        assert!(token.should_continue());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_is_visible_through_clones() {
        let token = CancelToken::new();
        let observer = token.clone();
        token.cancel();
        assert!(observer.is_cancelled());
        assert!(!observer.should_continue());
    }

    #[test]
    fn test_cancel_is_visible_across_threads() {
        let token = CancelToken::new();
        let remote = token.clone();
        let handle = std::thread::spawn(move || {
            remote.cancel();
        });
        handle.join().unwrap();
        assert!(token.is_cancelled());
    }
}
