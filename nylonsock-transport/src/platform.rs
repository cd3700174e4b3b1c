//! Process-wide socket subsystem lifecycle.
//!
//! Call [`init`] once at process start and [`teardown`] once at shutdown.
//! The lifecycle is explicit and not tied to any server or client object, so
//! dropping the last socket never tears the subsystem down behind the
//! application's back. The standard library performs the platform-specific
//! startup (WinSock on Windows) lazily, so on every platform these calls only
//! track and log the lifecycle state.

use crate::error::Result;
use std::sync::atomic::{AtomicBool, Ordering};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes the socket subsystem. Idempotent.
///
/// # Errors
/// Reserved for platforms whose startup can fail; currently always succeeds.
pub fn init() -> Result<()> {
    if !INITIALIZED.swap(true, Ordering::AcqRel) {
        tracing::debug!("socket subsystem initialized");
    }
    Ok(())
}

/// Releases the socket subsystem. Idempotent.
pub fn teardown() {
    if INITIALIZED.swap(false, Ordering::AcqRel) {
        tracing::debug!("socket subsystem released");
    }
}

/// Returns true between [`init`] and [`teardown`].
#[must_use]
pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_teardown_idempotent() {
        init().unwrap();
        init().unwrap();
        assert!(is_initialized());

        teardown();
        teardown();
        assert!(!is_initialized());

        init().unwrap();
        assert!(is_initialized());
    }
}
