use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// An auto-reset wake signal shared between loops.
///
/// `raise` sets the flag and wakes one waiter; a successful wait
/// consumes the flag. Waits are always bounded so the owner's running
/// flag is re-checked periodically even with no traffic.
#[derive(Clone)]
pub struct Signal(Arc<Inner>);

struct Inner {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new(initially_set: bool) -> Self {
        Self(Arc::new(Inner {
            flag: Mutex::new(initially_set),
            cond: Condvar::new(),
        }))
    }

    pub fn raise(&self) {
        let mut flag = self.0.flag.lock().unwrap_or_else(|e| e.into_inner());
        *flag = true;
        self.0.cond.notify_one();
    }

    /// Wait until raised or the timeout elapses. Returns true when the
    /// signal was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let flag = self.0.flag.lock().unwrap_or_else(|e| e.into_inner());
        let (mut flag, _) = self
            .0
            .cond
            .wait_timeout_while(flag, timeout, |set| !*set)
            .unwrap_or_else(|e| e.into_inner());
        let was_set = *flag;
        *flag = false;
        was_set
    }
}
