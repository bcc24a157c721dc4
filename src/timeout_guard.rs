//! A "scope guard" that will reset a backend's read timeout when it goes out of scope.

use crate::backend::Backend;
use std::{io, time::Duration};

/// A "scope guard" that will update a backend's read timeout and then reset it
/// when it goes out of scope.
///
/// If the original timeout cannot be restored the error is stored in the
/// owning port's poison slot and reported on the port's next operation.
///
/// While the guard is in scope, the backend can only be accessed through the
/// guard. However, because the guard implements [`Deref`](std::ops::Deref) and
/// [`DerefMut`](std::ops::DerefMut) callers can treat the guard as the backend.
#[derive(Debug)]
pub(crate) struct TimeoutGuard<'a, B: Backend> {
    /// The underlying backend.
    backend: &'a mut B,
    /// Where to report a failure to restore the original timeout.
    poison: &'a mut Option<io::Error>,
    /// The original timeout that will be restored when the guard is dropped.
    original_timeout: Option<Duration>,
}

impl<'a, B: Backend> TimeoutGuard<'a, B> {
    /// Update the backend's timeout and return a [`TimeoutGuard`] wrapping it.
    pub(crate) fn new(
        backend: &'a mut B,
        poison: &'a mut Option<io::Error>,
        timeout: Option<Duration>,
    ) -> Result<Self, io::Error> {
        let original_timeout = backend.read_timeout()?;
        backend.set_read_timeout(timeout)?;
        Ok(TimeoutGuard {
            backend,
            poison,
            original_timeout,
        })
    }
}

impl<'a, B: Backend> std::ops::Deref for TimeoutGuard<'a, B> {
    type Target = B;
    /// Get a shared reference to the underlying backend.
    fn deref(&self) -> &Self::Target {
        self.backend
    }
}

impl<'a, B: Backend> std::ops::DerefMut for TimeoutGuard<'a, B> {
    /// Get an exclusive reference to the underlying backend.
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.backend
    }
}

impl<'a, B: Backend> std::ops::Drop for TimeoutGuard<'a, B> {
    fn drop(&mut self) {
        if let Err(err) = self.backend.set_read_timeout(self.original_timeout) {
            *self.poison = Some(io::Error::new(
                io::ErrorKind::Other,
                if let Some(timeout) = self.original_timeout {
                    format!(
                        "failed to reset timeout to {} ms: {}",
                        timeout.as_millis(),
                        err
                    )
                } else {
                    format!("failed to reset to an infinite timeout: {}", err)
                },
            ));
        }
    }
}
