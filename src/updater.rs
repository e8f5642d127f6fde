//! Update orchestrator.
use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    callback::{Acceptance, Callbacks},
    config::UpdaterConfig,
    distributor::Distributor,
    error::{BoxError, UpdateError},
    exec::{Executor, WorkQueue},
    inst::UpdateInstaller,
    machine::Shared,
    os::Platform,
};

/// Name of the worker thread of the default executor.
pub const WORKER_THREAD_NAME: &str = "handover-updater";

/// Checks for, downloads and stages updates.
///
/// At most one update cycle runs at a time per updater. See the crate
/// documentation for an overview of a cycle.
pub struct Updater<D: Distributor> {
    shared: Arc<Shared<D>>,
}

impl<D: Distributor> Updater<D> {
    /// Starts configuring an updater.
    pub fn builder(config: UpdaterConfig, distributor: D) -> UpdaterBuilder<D> {
        UpdaterBuilder {
            config,
            distributor,
            callbacks: Callbacks::default(),
            executor: None,
        }
    }

    /// Creates an updater with the default callbacks and executor.
    pub fn new(config: UpdaterConfig, distributor: D) -> Result<Self, UpdateError> {
        Self::builder(config, distributor).build()
    }

    /// Starts an update cycle.
    ///
    /// Returns immediately. The cycle runs on the executor and reports its
    /// result through the callbacks. If a cycle is already running, nothing
    /// happens and `false` is returned.
    pub fn check_for_update(&self) -> bool {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("update cycle already running");
            return false;
        }

        tracing::debug!("starting update cycle");
        crate::machine::start(&self.shared);

        true
    }

    /// Returns whether a cycle is running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Returns the resolved configuration.
    pub fn config(&self) -> &UpdaterConfig {
        &self.shared.config
    }

    /// Returns the distributor.
    pub fn distributor(&self) -> &D {
        &self.shared.distributor
    }
}

impl<D: Distributor> std::fmt::Debug for Updater<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updater")
            .field("config", &self.shared.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Updater`].
pub struct UpdaterBuilder<D: Distributor> {
    config: UpdaterConfig,
    distributor: D,
    callbacks: Callbacks,
    executor: Option<Arc<dyn Executor>>,
}

impl<D: Distributor> UpdaterBuilder<D> {
    /// Sets the executor running the cycle steps.
    ///
    /// The default is a [`WorkQueue`] owned by the updater.
    pub fn with_executor<E>(mut self, executor: E) -> Self
    where
        E: Executor + 'static,
    {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Sets an executor shared with other components.
    pub fn with_shared_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Replaces all callbacks.
    pub fn with_callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Sets the acceptance callback.
    ///
    /// See [`Callbacks::with_acceptance()`].
    pub fn with_acceptance<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &Path, Acceptance) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.callbacks = self.callbacks.with_acceptance(callback);
        self
    }

    /// Sets the no-update callback.
    pub fn with_no_update_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn() -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.callbacks = self.callbacks.with_no_update(callback);
        self
    }

    /// Sets the error callback.
    pub fn with_error_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&UpdateError) + Send + Sync + 'static,
    {
        self.callbacks = self.callbacks.with_error(callback);
        self
    }

    /// Sets the done callback.
    pub fn with_done_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Option<UpdateInstaller>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.callbacks = self.callbacks.with_done(callback);
        self
    }

    /// Resolves the configuration and creates the updater.
    pub fn build(self) -> Result<Updater<D>, UpdateError> {
        let config = self.config.resolve()?;
        let platform = Platform::current()?;
        let executor: Arc<dyn Executor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(WorkQueue::new(WORKER_THREAD_NAME)?),
        };
        let log = config.log();

        tracing::debug!(?config, ?platform, "created updater");

        Ok(Updater {
            shared: Arc::new(Shared {
                config,
                platform,
                distributor: self.distributor,
                callbacks: self.callbacks,
                executor,
                log,
                running: AtomicBool::new(false),
                first_run: AtomicBool::new(true),
            }),
        })
    }
}

impl<D: Distributor> std::fmt::Debug for UpdaterBuilder<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdaterBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
