use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide "refresh in flight" and "logout in progress" markers.
///
/// Each flag is claimed with a compare-and-set, so two callers racing for
/// the same flag never both win. The returned guard releases the flag when
/// dropped, on every exit path.
#[derive(Debug, Default)]
pub struct SessionFlags {
    refresh_in_flight: AtomicBool,
    logout_in_progress: AtomicBool,
}

/// Holds a claimed flag until dropped
#[must_use = "the flag is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct FlagGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

fn claim(flag: &AtomicBool) -> Option<FlagGuard<'_>> {
    flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .ok()
        .map(|_| FlagGuard { flag })
}

impl SessionFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_begin_refresh(&self) -> Option<FlagGuard<'_>> {
        claim(&self.refresh_in_flight)
    }

    pub fn try_begin_logout(&self) -> Option<FlagGuard<'_>> {
        claim(&self.logout_in_progress)
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh_in_flight.load(Ordering::Acquire)
    }

    pub fn is_logging_out(&self) -> bool {
        self.logout_in_progress.load(Ordering::Acquire)
    }
}
