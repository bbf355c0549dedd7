//! seriald daemon library.
//!
//! Bridges one TCP client at a time to a serial device.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   ControlEvent   ┌──────────────────┐
//! │ Signal listener  │─────────────────▶│  ConnectionLoop  │
//! │ HUP/INT/QUIT/TERM│                  │  (server module) │
//! └──────────────────┘                  └────────┬─────────┘
//!                                                │ frames
//! ┌──────────────────┐                  ┌────────▼─────────┐
//! │ LifecycleManager │── owns ─────────▶│  SerialChannel   │
//! │ log/pidfile/fork │                  │  (serial module) │
//! └──────────────────┘                  └──────────────────┘
//! ```
//!
//! Everything runs on a single-threaded tokio runtime; serial I/O is
//! blocking and happens inline, so one frame is handled at a time.
//!
//! # Panic-Free Guarantees
//!
//! Non-test code does not use `.unwrap()`, `.expect()`, `panic!()` or
//! direct indexing. Errors are logged and propagated to
//! [`lifecycle::LifecycleManager::start`], which maps them to an exit code.

pub mod control;
pub mod lifecycle;
pub mod logging;
pub mod pidfile;
pub mod serial;
pub mod server;

pub use control::{ControlEvent, ControlHandle, ControlReceiver, ShutdownCause, ShutdownFlag};
pub use lifecycle::{LifecycleError, LifecycleManager, LifecycleState, StartOutcome};
pub use serial::{SerialChannel, SerialPortChannel};
pub use server::{BridgeError, ConnectionLoop};
