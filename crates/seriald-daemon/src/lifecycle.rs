//! Daemon lifecycle: startup ordering, single-instance check, teardown.
//!
//! ```text
//! Stopped ──start()──▶ Starting ──bind ok──▶ Running ──shutdown/fatal──▶ Stopping ──▶ Stopped
//!                         │
//!                         └── pidfile busy ──▶ Stopped (AlreadyRunning)
//! ```
//!
//! Startup order is fixed: open the log, load the configuration, check the
//! pidfile, detach, write the pidfile, bind, serve. Daemonization forks, so
//! it happens before the tokio runtime is built.

use std::backtrace::Backtrace;
use std::io;
use std::path::Path;
use std::process;

use daemonize::Daemonize;
use seriald_core::{
    ConfigStore, DaemonConfig, DetachSettings, FileAccessError, SettingsError, StoreError,
    EXIT_FILE_ACCESS,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::control::{self, ControlHandle, ControlReceiver, ShutdownCause};
use crate::logging::{self, LogHandle};
use crate::pidfile::{self, PidfileLock};
use crate::serial::SerialChannel;
use crate::server::{bind_listener, BridgeError, ConnectionLoop};

/// Where a daemon instance is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Result of a [`LifecycleManager::start`] call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Another live instance owns the pidfile; nothing was started
    AlreadyRunning { pid: u32 },
    /// The daemon ran and has been stopped
    Stopped(ShutdownCause),
}

/// Errors that abort startup or end the daemon.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error(transparent)]
    FileAccess(#[from] FileAccessError),

    #[error("Invalid configuration: {0}")]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to daemonize: {0}")]
    Daemonize(String),

    #[error("Failed to build runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("{0:#}")]
    Fatal(anyhow::Error),
}

impl LifecycleError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            LifecycleError::FileAccess(_) => EXIT_FILE_ACCESS,
            _ => 1,
        }
    }
}

/// Detaches the process from its terminal.
#[derive(Debug)]
pub struct DaemonContext {
    settings: DetachSettings,
    is_open: bool,
}

impl DaemonContext {
    pub fn new(settings: DetachSettings) -> Self {
        Self {
            settings,
            is_open: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Forks into the background (if configured) with stdout and stderr
    /// appended to `log_file`. The parent process exits inside this call.
    pub fn open(&mut self, log_file: &Path) -> Result<(), LifecycleError> {
        if self.is_open {
            return Ok(());
        }

        if self.settings.detach {
            let stdout = logging::open_append(log_file)?;
            let stderr = logging::open_append(log_file)?;

            let mut daemonize = Daemonize::new()
                .working_directory(self.settings.working_directory())
                .umask(self.settings.umask)
                .stdout(stdout)
                .stderr(stderr);
            if let Some(user) = &self.settings.user {
                daemonize = daemonize.user(user.as_str());
            }
            if let Some(group) = &self.settings.group {
                daemonize = daemonize.group(group.as_str());
            }

            daemonize
                .start()
                .map_err(|e| LifecycleError::Daemonize(e.to_string()))?;
            info!(pid = process::id(), "Detached from terminal");
        }

        self.is_open = true;
        Ok(())
    }

    pub fn close(&mut self) {
        self.is_open = false;
    }
}

/// Loads the configuration file into `config`, logging the outcome.
///
/// Never fails: unreadable files and bad lines are logged and the current
/// values stay in place.
pub(crate) fn load_config(store: &ConfigStore, config: &mut DaemonConfig) {
    match store.load(config) {
        Ok(Some(report)) => {
            for key in report.applied.iter().filter(|key| key.requires_restart()) {
                debug!(key = %key, "Setting takes effect on next start");
            }
        }
        Ok(None) => debug!("No configuration file set"),
        Err(e) => error!("{e}"),
    }
}

/// Owns every process-wide resource of one daemon instance.
pub struct LifecycleManager<S: SerialChannel> {
    config: DaemonConfig,
    store: ConfigStore,
    serial: S,
    context: DaemonContext,
    pidfile: Option<PidfileLock>,
    log: Option<LogHandle>,
    state: LifecycleState,
    control: ControlHandle,
    events: ControlReceiver,
    signals: bool,
}

impl<S: SerialChannel> LifecycleManager<S> {
    pub fn new(config: DaemonConfig, serial: S) -> Result<Self, LifecycleError> {
        config.validate()?;
        let (control, events) = control::channel();
        Ok(Self {
            context: DaemonContext::new(config.detach.clone()),
            config,
            store: ConfigStore::new()?,
            serial,
            pidfile: None,
            log: None,
            state: LifecycleState::Stopped,
            control,
            events,
            signals: true,
        })
    }

    /// Disables OS signal handling; control events then only come from
    /// [`LifecycleManager::control_handle`].
    pub fn without_signal_handlers(mut self) -> Self {
        self.signals = false;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn serial(&self) -> &S {
        &self.serial
    }

    /// Handle for requesting reloads and shutdown from other threads.
    pub fn control_handle(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Starts the daemon and blocks until it stops.
    pub fn start(&mut self) -> Result<StartOutcome, LifecycleError> {
        self.state = LifecycleState::Starting;
        let result = self.run();
        self.close_log();
        self.state = LifecycleState::Stopped;
        result
    }

    fn run(&mut self) -> Result<StartOutcome, LifecycleError> {
        let log = match logging::open(&self.config.name, &self.config.log_file) {
            Ok(log) => log,
            Err(e) => {
                logging::open_stderr();
                error!("{e}");
                return Err(e.into());
            }
        };
        self.log = Some(log);

        load_config(&self.store, &mut self.config);

        let lock = PidfileLock::new(&self.config.pidfile_path);
        if let Some(pid) = lock.live_owner() {
            error!(pid, pidfile = %lock.path().display(), "Already running (pidfile is locked)");
            self.close_log();
            return Ok(StartOutcome::AlreadyRunning { pid });
        }
        self.pidfile = Some(lock.clone());

        if let Err(e) = self.context.open(&self.config.log_file) {
            error!("{e}");
            self.close_log();
            return Err(e);
        }

        if let Err(e) = lock.acquire() {
            error!("{e}");
            self.stop();
            return Err(e.into());
        }
        info!(pid = process::id(), "Started");

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(error = %e, "Failed to build runtime");
                self.stop();
                return Err(LifecycleError::Runtime(e));
            }
        };

        let result = runtime.block_on(self.serve());
        drop(runtime);

        match result {
            Ok(cause) => {
                self.stop();
                Ok(StartOutcome::Stopped(cause))
            }
            Err(e) => {
                let err = anyhow::Error::new(e).context("Connection loop failed");
                error!("{err:?}\n\nstack backtrace:\n{}", Backtrace::force_capture());
                self.stop();
                Err(LifecycleError::Fatal(err))
            }
        }
    }

    async fn serve(&mut self) -> Result<ShutdownCause, BridgeError> {
        let listener = bind_listener(self.config.bind_host(), self.config.socket_port).await?;
        info!(
            host = %self.config.bind_host(),
            port = self.config.socket_port,
            "Listening"
        );

        if self.signals {
            control::spawn_signal_listener(self.control.clone()).map_err(BridgeError::Signals)?;
        }

        self.state = LifecycleState::Running;
        ConnectionLoop::new(
            listener,
            &mut self.config,
            &self.store,
            &mut self.serial,
            &mut self.events,
        )
        .run()
        .await
    }

    /// Runs the stop sequence.
    ///
    /// A no-op unless the pidfile records a pid. The recorded pid is
    /// forcibly terminated unless it is this process, which exits once
    /// [`LifecycleManager::start`] returns.
    pub fn stop(&mut self) {
        let Some(lock) = self.pidfile.clone() else {
            return;
        };
        let Some(pid) = lock.owner_pid() else {
            debug!(pidfile = %lock.path().display(), "No recorded pid, nothing to stop");
            return;
        };

        self.state = LifecycleState::Stopping;
        info!(pid, "Stopping");

        if self.serial.is_open() {
            if let Err(e) = self.serial.close() {
                warn!(error = %e, "Failed to close serial port");
            }
        }
        self.context.close();

        if let Err(e) = lock.release() {
            warn!(pidfile = %lock.path().display(), error = %e, "Failed to remove pidfile");
        }

        if pid != process::id() {
            if let Err(e) = pidfile::terminate(pid) {
                error!(pid, error = %e, "Could not stop process id {pid}");
            }
        }

        self.state = LifecycleState::Stopped;
        self.close_log();
    }

    fn close_log(&mut self) {
        if let Some(log) = self.log.take() {
            log.close();
        }
    }
}
