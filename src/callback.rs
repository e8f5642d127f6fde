//! Application hooks called during an update cycle.
//!
//! All callbacks run on the executor's thread. The acceptance callback
//! receives an [`Acceptance`] which it may resolve right away or move
//! somewhere else, such as a dialog, and resolve later.
use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use crate::{
    error::{BoxError, UpdateError},
    inst::UpdateInstaller,
};

/// Called with the version name and archive path when an update was
/// downloaded.
pub type UpdateCallback =
    Box<dyn Fn(&str, &Path, Acceptance) -> Result<(), BoxError> + Send + Sync + 'static>;

/// Called when the application is up to date.
pub type NoUpdateCallback = Box<dyn Fn() -> Result<(), BoxError> + Send + Sync + 'static>;

/// Called with each error of a cycle.
pub type ErrorCallback = Box<dyn Fn(&UpdateError) + Send + Sync + 'static>;

/// Called exactly once at the end of every cycle.
///
/// The installer is present only when the update was unpacked successfully.
pub type DoneCallback =
    Box<dyn Fn(Option<UpdateInstaller>) -> Result<(), BoxError> + Send + Sync + 'static>;

/// Set of application hooks.
pub struct Callbacks {
    pub(crate) on_update: UpdateCallback,
    pub(crate) on_no_update: NoUpdateCallback,
    pub(crate) on_error: ErrorCallback,
    pub(crate) on_done: DoneCallback,
}

impl Callbacks {
    /// Sets the acceptance callback.
    ///
    /// The default accepts every update.
    pub fn with_acceptance<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &Path, Acceptance) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.on_update = Box::new(callback);
        self
    }

    /// Sets the no-update callback.
    pub fn with_no_update<F>(mut self, callback: F) -> Self
    where
        F: Fn() -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.on_no_update = Box::new(callback);
        self
    }

    /// Sets the error callback.
    ///
    /// The default logs the error.
    pub fn with_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&UpdateError) + Send + Sync + 'static,
    {
        self.on_error = Box::new(callback);
        self
    }

    /// Sets the done callback.
    pub fn with_done<F>(mut self, callback: F) -> Self
    where
        F: Fn(Option<UpdateInstaller>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.on_done = Box::new(callback);
        self
    }
}

impl Default for Callbacks {
    fn default() -> Self {
        Self {
            on_update: Box::new(|_name, _archive, acceptance| {
                acceptance.accept();
                Ok(())
            }),
            on_no_update: Box::new(|| Ok(())),
            on_error: Box::new(|error| {
                tracing::error!(error = %crate::error::format_error(error), "update failed");
            }),
            on_done: Box::new(|_installer| Ok(())),
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks").finish_non_exhaustive()
    }
}

/// Outcome of the acceptance step.
#[derive(Debug)]
pub(crate) enum Decision {
    Accept,
    Reject,
    Fail(BoxError),
    Abandoned,
}

type Continuation = Box<dyn FnOnce(Decision) + Send + 'static>;

struct Slot {
    continuation: Option<Continuation>,
    in_callback: bool,
    abandoned: bool,
}

impl Slot {
    fn take(slot: &Mutex<Slot>) -> Option<Continuation> {
        slot.lock()
            .map(|mut slot| slot.continuation.take())
            .unwrap_or_default()
    }
}

/// Decision handle passed to the acceptance callback.
///
/// Exactly one of [`Self::accept()`], [`Self::reject()`] or [`Self::fail()`]
/// should be called. Dropping the handle without deciding fails the cycle
/// with [`crate::error::UpdateErrorKind::VerifyUpdate`].
pub struct Acceptance {
    slot: Arc<Mutex<Slot>>,
}

impl Acceptance {
    /// Creates an undecided handle and the guard the updater keeps while the
    /// callback runs.
    pub(crate) fn pending<F>(continuation: F) -> (Self, AcceptanceGuard)
    where
        F: FnOnce(Decision) + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(Slot {
            continuation: Some(Box::new(continuation)),
            in_callback: true,
            abandoned: false,
        }));

        (Self { slot: slot.clone() }, AcceptanceGuard { slot })
    }

    /// Installs the update.
    pub fn accept(self) {
        self.resolve(Decision::Accept);
    }

    /// Skips the update. The archive is left where the distributor put it.
    pub fn reject(self) {
        self.resolve(Decision::Reject);
    }

    /// Ends the cycle with an error.
    pub fn fail<E>(self, error: E)
    where
        E: Into<BoxError>,
    {
        self.resolve(Decision::Fail(error.into()));
    }

    fn resolve(&self, decision: Decision) {
        if let Some(continuation) = Slot::take(&self.slot) {
            continuation(decision);
        }
    }
}

impl Drop for Acceptance {
    fn drop(&mut self) {
        let continuation = match self.slot.lock() {
            Ok(mut slot) if slot.continuation.is_some() => {
                if slot.in_callback {
                    slot.abandoned = true;
                    None
                } else {
                    slot.continuation.take()
                }
            }
            _ => None,
        };

        if let Some(continuation) = continuation {
            continuation(Decision::Abandoned);
        }
    }
}

impl std::fmt::Debug for Acceptance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acceptance").finish_non_exhaustive()
    }
}

/// Held by the updater while the acceptance callback runs.
pub(crate) struct AcceptanceGuard {
    slot: Arc<Mutex<Slot>>,
}

impl AcceptanceGuard {
    /// Settles the decision once the callback has returned.
    ///
    /// A callback error wins over a handle dropped inside the callback. An
    /// error returned after a decision was made is only logged.
    pub(crate) fn finish(self, result: Result<(), BoxError>) {
        let (continuation, abandoned) = match self.slot.lock() {
            Ok(mut slot) => {
                slot.in_callback = false;
                let abandoned = slot.abandoned;
                let continuation = match (&result, abandoned) {
                    (Err(_), _) | (Ok(()), true) => slot.continuation.take(),
                    (Ok(()), false) => None,
                };
                (continuation, abandoned)
            }
            Err(_) => (None, false),
        };

        match (continuation, result) {
            (Some(continuation), Err(error)) => continuation(Decision::Fail(error)),
            (Some(continuation), Ok(())) if abandoned => continuation(Decision::Abandoned),
            (None, Err(error)) => {
                tracing::warn!(%error, "acceptance callback failed after deciding");
            }
            _ => {}
        }
    }
}
