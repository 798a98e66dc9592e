use crate::futex;
use std::fmt;
use std::sync::atomic::AtomicI32;

/// Wakes whoever waits for a position cell to change.
///
/// Each endpoint calls `notify` with its own position cell right after
/// publishing a new value there, and once more when it closes.
pub trait Notifier: Send + Sync {
    fn notify(&self, cell: &AtomicI32);
}

/// Native wake: releases every thread parked on the cell.
#[derive(Debug, Default, Clone, Copy)]
pub struct FutexNotifier;

impl Notifier for FutexNotifier {
    #[inline]
    fn notify(&self, cell: &AtomicI32) {
        futex::wake_all(cell);
    }
}

/// External hook: hands `token` to a callback instead of waking natively.
///
/// Meant for a peer that must never park a thread. That peer uses
/// non-blocking calls and retries once the hook has fired.
pub struct HookNotifier<T> {
    hook: Box<dyn Fn(&T) + Send + Sync>,
    token: T,
}

impl<T> HookNotifier<T> {
    pub fn new<F>(token: T, hook: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self {
            hook: Box::new(hook),
            token,
        }
    }

    pub fn token(&self) -> &T {
        &self.token
    }
}

impl<T: Send + Sync> Notifier for HookNotifier<T> {
    fn notify(&self, _cell: &AtomicI32) {
        (self.hook)(&self.token);
    }
}

impl<T: fmt::Debug> fmt::Debug for HookNotifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookNotifier")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}
