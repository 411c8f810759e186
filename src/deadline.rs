//! deadlines and cancellation for store and network operations

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// shared flag that aborts any operation holding a clone of it
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// point in time after which an operation gives up with `Error::Timeout`
#[derive(Clone, Debug, Default)]
pub struct Deadline {
    at: Option<Instant>,
    cancel: CancelToken,
}

impl Deadline {
    /// deadline `timeout` from now; unbounded if that instant is not representable
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
            cancel: CancelToken::default(),
        }
    }

    /// no time limit (still cancellable)
    pub fn never() -> Self {
        Self::default()
    }

    /// attach a cancellation token
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// the token observed by this deadline
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// fail if cancelled or expired
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.at {
            Some(at) if Instant::now() >= at => Err(Error::Timeout),
            _ => Ok(()),
        }
    }

    /// time left before expiry; `None` means unbounded
    pub fn remaining(&self) -> Result<Option<Duration>> {
        self.check()?;
        Ok(self.at.map(|at| at.saturating_duration_since(Instant::now())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_has_no_limit() {
        let d = Deadline::never();
        assert!(d.check().is_ok());
        assert_eq!(d.remaining().unwrap(), None);
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let d = Deadline::after(Duration::ZERO);
        assert!(matches!(d.check(), Err(Error::Timeout)));
        assert!(matches!(d.remaining(), Err(Error::Timeout)));
    }

    #[test]
    fn test_remaining_is_bounded() {
        let d = Deadline::after(Duration::from_secs(60));
        let left = d.remaining().unwrap().unwrap();
        assert!(left <= Duration::from_secs(60));
        assert!(left > Duration::from_secs(50));
    }

    #[test]
    fn test_huge_timeout_is_unbounded() {
        let d = Deadline::after(Duration::from_secs(i64::MAX as u64));
        assert!(d.check().is_ok());
        assert_eq!(d.remaining().unwrap(), None);

        let d = Deadline::after(Duration::MAX);
        assert_eq!(d.remaining().unwrap(), None);
    }

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancelToken::new();
        let d = Deadline::after(Duration::from_secs(60)).with_cancel(token.clone());
        let copy = d.clone();

        token.cancel();

        assert!(matches!(d.check(), Err(Error::Cancelled)));
        assert!(matches!(copy.check(), Err(Error::Cancelled)));
        assert!(copy.cancel_token().is_cancelled());
    }
}
