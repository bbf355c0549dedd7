//! Control events: reload and shutdown requests for the connection loop.
//!
//! Signal handlers never touch daemon state. Each signal is forwarded as a
//! [`ControlEvent`] on an unbounded channel, and the connection loop acts on
//! it while it is waiting for a client or for client data, i.e. between
//! frames.
//!
//! Serial I/O blocks the runtime thread, so the event alone cannot reach a
//! loop stuck in a serial read. Shutdown signals and
//! [`ControlHandle::shutdown`] therefore also raise a [`ShutdownFlag`]
//! directly from the signal handler; blocking reads poll it and give up.
//!
//! | Signal    | Event                               |
//! |-----------|-------------------------------------|
//! | `SIGHUP`  | [`ControlEvent::Reload`]            |
//! | `SIGINT`  | [`ControlEvent::Shutdown`] (Interrupt) |
//! | `SIGQUIT` | [`ControlEvent::Shutdown`] (Quit)   |
//! | `SIGTERM` | [`ControlEvent::Shutdown`] (Terminate) |

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTERM};

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Why the daemon is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    Interrupt,
    Quit,
    Terminate,
    /// Requested through a [`ControlHandle`] or by dropping every handle
    Requested,
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownCause::Interrupt => f.write_str("SIGINT"),
            ShutdownCause::Quit => f.write_str("SIGQUIT"),
            ShutdownCause::Terminate => f.write_str("SIGTERM"),
            ShutdownCause::Requested => f.write_str("shutdown request"),
        }
    }
}

/// A request delivered to the connection loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Re-read the configuration file
    Reload,
    /// Leave the connection loop and run the stop sequence
    Shutdown(ShutdownCause),
}

/// Set once a shutdown has been requested; never cleared.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Cloneable sender side of the control channel.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<ControlEvent>,
    shutdown: ShutdownFlag,
}

impl ControlHandle {
    /// Queues a configuration reload. Returns false if the loop is gone.
    pub fn reload(&self) -> bool {
        self.send(ControlEvent::Reload)
    }

    /// Queues a shutdown. Returns false if the loop is gone.
    pub fn shutdown(&self) -> bool {
        self.send(ControlEvent::Shutdown(ShutdownCause::Requested))
    }

    /// Queues `event`; a shutdown also raises the shutdown flag.
    pub fn send(&self, event: ControlEvent) -> bool {
        if matches!(event, ControlEvent::Shutdown(_)) {
            self.shutdown.raise();
        }
        self.tx.send(event).is_ok()
    }
}

/// Receiver side, owned by the daemon instance.
#[derive(Debug)]
pub struct ControlReceiver {
    rx: mpsc::UnboundedReceiver<ControlEvent>,
    shutdown: ShutdownFlag,
}

impl ControlReceiver {
    /// Waits for the next event; `None` once every handle is dropped.
    pub async fn recv(&mut self) -> Option<ControlEvent> {
        self.rx.recv().await
    }

    /// Flag raised as soon as a shutdown is requested, ahead of the event.
    pub fn shutdown_flag(&self) -> &ShutdownFlag {
        &self.shutdown
    }
}

/// Creates a control channel.
pub fn channel() -> (ControlHandle, ControlReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shutdown = ShutdownFlag::default();
    (
        ControlHandle {
            tx,
            shutdown: shutdown.clone(),
        },
        ControlReceiver { rx, shutdown },
    )
}

/// Installs handlers for SIGHUP, SIGINT, SIGQUIT and SIGTERM and forwards
/// them to `handle`.
///
/// SIGINT, SIGQUIT and SIGTERM also raise the handle's [`ShutdownFlag`]
/// inside the signal handler, so a blocked serial read notices them while
/// the runtime cannot run the listener task.
///
/// Must be called from within a tokio runtime. The returned task ends once
/// the receiving side of the channel is dropped.
pub fn spawn_signal_listener(handle: ControlHandle) -> io::Result<JoinHandle<()>> {
    for signal in [SIGINT, SIGQUIT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&handle.shutdown.0))?;
    }

    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = hangup.recv() => ControlEvent::Reload,
                _ = interrupt.recv() => ControlEvent::Shutdown(ShutdownCause::Interrupt),
                _ = quit.recv() => ControlEvent::Shutdown(ShutdownCause::Quit),
                _ = terminate.recv() => ControlEvent::Shutdown(ShutdownCause::Terminate),
            };

            match event {
                ControlEvent::Reload => info!("Caught SIGHUP"),
                ControlEvent::Shutdown(cause) => info!(signal = %cause, "Caught signal"),
            }

            if !handle.send(event) {
                debug!("Control channel closed, signal listener exiting");
                break;
            }
        }
    }))
}
