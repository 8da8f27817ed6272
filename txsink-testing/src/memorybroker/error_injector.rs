//! Error injection controller for testing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Controller for injecting broker failures during testing.
///
/// Each `fail_*` call arms a countdown: the next N operations of that kind fail, after which
/// the broker behaves normally again.
#[derive(Debug, Default)]
pub struct ErrorInjector {
    /// Make sends wait as if the client's outbound queue were full.
    pub force_buffer_full: AtomicBool,
    fail_next_sends: AtomicUsize,
    fail_next_flushes: AtomicUsize,
    fail_next_begins: AtomicUsize,
    fail_next_prepares: AtomicUsize,
    fail_next_commits: AtomicUsize,
    fail_next_aborts: AtomicUsize,
}

impl ErrorInjector {
    /// Create a new error injector with all errors disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the outbound buffer appear full. Sends block until it is cleared.
    pub fn set_buffer_full(&self, full: bool) {
        self.force_buffer_full.store(full, Ordering::Relaxed);
    }

    pub fn is_buffer_full(&self) -> bool {
        self.force_buffer_full.load(Ordering::Relaxed)
    }

    /// Fail the next N sends, transactional or not.
    pub fn fail_sends(&self, count: usize) {
        self.fail_next_sends.store(count, Ordering::Relaxed);
    }

    pub fn fail_flushes(&self, count: usize) {
        self.fail_next_flushes.store(count, Ordering::Relaxed);
    }

    pub fn fail_begins(&self, count: usize) {
        self.fail_next_begins.store(count, Ordering::Relaxed);
    }

    pub fn fail_prepares(&self, count: usize) {
        self.fail_next_prepares.store(count, Ordering::Relaxed);
    }

    pub fn fail_commits(&self, count: usize) {
        self.fail_next_commits.store(count, Ordering::Relaxed);
    }

    pub fn fail_aborts(&self, count: usize) {
        self.fail_next_aborts.store(count, Ordering::Relaxed);
    }

    pub(crate) fn should_fail_send(&self) -> bool {
        Self::decrement_counter(&self.fail_next_sends)
    }

    pub(crate) fn should_fail_flush(&self) -> bool {
        Self::decrement_counter(&self.fail_next_flushes)
    }

    pub(crate) fn should_fail_begin(&self) -> bool {
        Self::decrement_counter(&self.fail_next_begins)
    }

    pub(crate) fn should_fail_prepare(&self) -> bool {
        Self::decrement_counter(&self.fail_next_prepares)
    }

    pub(crate) fn should_fail_commit(&self) -> bool {
        Self::decrement_counter(&self.fail_next_commits)
    }

    pub(crate) fn should_fail_abort(&self) -> bool {
        Self::decrement_counter(&self.fail_next_aborts)
    }

    /// Decrements the counter and returns true if it was > 0.
    fn decrement_counter(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                if c > 0 { Some(c - 1) } else { None }
            })
            .is_ok()
    }

    /// Waits while the buffer is forced full.
    pub(crate) async fn apply_send_pressure(&self) {
        while self.is_buffer_full() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_countdowns() {
        let injector = ErrorInjector::new();
        assert!(!injector.should_fail_send());

        injector.fail_sends(2);
        assert!(injector.should_fail_send());
        assert!(injector.should_fail_send());
        assert!(!injector.should_fail_send());

        injector.fail_commits(1);
        assert!(injector.should_fail_commit());
        assert!(!injector.should_fail_commit());
        assert!(!injector.should_fail_abort());
    }

    #[tokio::test]
    async fn test_buffer_full_blocks_until_cleared() {
        let injector = std::sync::Arc::new(ErrorInjector::new());
        injector.set_buffer_full(true);

        let waiter = {
            let injector = std::sync::Arc::clone(&injector);
            tokio::spawn(async move { injector.apply_send_pressure().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        injector.set_buffer_full(false);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
