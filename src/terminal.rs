use std::fmt;

use tracing::warn;

use crate::error::TerminalError;

/// The local terminal an interactive shell is attached to.
pub trait LocalTerminal: Send + Sync {
    /// Current `(columns, rows)`.
    fn size(&self) -> Result<(u16, u16), TerminalError>;

    /// Switches to raw mode. The returned guard switches back when dropped.
    fn enter_raw_mode(&self) -> Result<RawModeGuard, TerminalError>;
}

type Restore = Box<dyn FnOnce() -> Result<(), TerminalError> + Send>;

/// Restores the terminal mode it was created for exactly once, on drop.
pub struct RawModeGuard {
    restore: Option<Restore>,
}

impl RawModeGuard {
    pub fn new(restore: impl FnOnce() -> Result<(), TerminalError> + Send + 'static) -> RawModeGuard {
        RawModeGuard {
            restore: Some(Box::new(restore)),
        }
    }

    /// Restores now and reports the outcome instead of logging it.
    pub fn restore(mut self) -> Result<(), TerminalError> {
        match self.restore.take() {
            Some(restore) => restore(),
            None => Ok(()),
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Some(restore) = self.restore.take() {
            if let Err(err) = restore() {
                warn!(error = %err, "could not restore terminal mode");
            }
        }
    }
}

impl fmt::Debug for RawModeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawModeGuard")
            .field("armed", &self.restore.is_some())
            .finish()
    }
}

#[cfg(feature = "crossterm")]
pub use self::crossterm_impl::CrosstermTerminal;

#[cfg(feature = "crossterm")]
mod crossterm_impl {
    use std::sync::atomic::{AtomicBool, Ordering};

    use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size};

    use super::{LocalTerminal, RawModeGuard};
    use crate::error::TerminalError;

    static RAW_MODE_HELD: AtomicBool = AtomicBool::new(false);

    /// The process's controlling terminal.
    ///
    /// Raw mode is process-global, so only one guard can be alive at a time. A second
    /// acquisition fails with [`TerminalError::RawModeBusy`].
    #[derive(Debug, Default, Clone, Copy)]
    pub struct CrosstermTerminal;

    impl LocalTerminal for CrosstermTerminal {
        fn size(&self) -> Result<(u16, u16), TerminalError> {
            Ok(size()?)
        }

        fn enter_raw_mode(&self) -> Result<RawModeGuard, TerminalError> {
            if RAW_MODE_HELD
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Err(TerminalError::RawModeBusy);
            }
            if let Err(err) = enable_raw_mode() {
                RAW_MODE_HELD.store(false, Ordering::Release);
                return Err(err.into());
            }

            Ok(RawModeGuard::new(|| {
                let result = disable_raw_mode();
                RAW_MODE_HELD.store(false, Ordering::Release);
                Ok(result?)
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[test]
    fn guard_restores_once_on_drop() {
        let restores = Arc::new(AtomicUsize::new(0));
        let counter = restores.clone();
        let guard = RawModeGuard::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        drop(guard);
        assert_eq!(restores.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn explicit_restore_disarms_drop() {
        let restores = Arc::new(AtomicUsize::new(0));
        let counter = restores.clone();
        let guard = RawModeGuard::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TerminalError::RawModeBusy)
        });
        assert!(guard.restore().is_err());
        assert_eq!(restores.load(Ordering::SeqCst), 1);
    }
}
