//! seriald Protocol - Request framing for the socket side of the bridge
//!
//! A request is decoded socket text of the form
//! `<N><N hex digits: reply length><payload>`. This crate turns that text
//! into a [`Frame`] and decides whether a serial reply may be forwarded.

pub mod frame;

pub use frame::{parse, ConnectionClosed, Frame, MAX_REPLY_LENGTH_DIGITS};
