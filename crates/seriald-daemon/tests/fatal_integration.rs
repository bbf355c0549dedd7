//! Fail-fast behaviour: an unexpected error in the connection loop stops
//! the whole daemon.
//!
//! Kept in its own test binary so the global log subscriber writes only to
//! this test's log file.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

mod common;

use std::fs;
use std::io::{Read, Write};
use std::thread;

use common::{connect, foreground_config, free_port, MockSerial};
use seriald_daemon::{LifecycleError, LifecycleManager, LifecycleState, SerialChannel};
use tempfile::TempDir;

#[test]
fn test_undecodable_request_is_fatal() {
    let dir = TempDir::new().unwrap();
    let port = free_port();
    let config = foreground_config(dir.path(), port);
    let pidfile = config.pidfile_path.clone();
    let log_file = config.log_file.clone();

    let serial = MockSerial::new();
    serial.queue_reply(b"A".to_vec());

    let mut manager = LifecycleManager::new(config, serial.clone())
        .unwrap()
        .without_signal_handlers();

    let daemon = thread::spawn(move || {
        let outcome = manager.start();
        (outcome, manager.state())
    });

    // a good frame first so the serial port is open when the loop fails
    let mut stream = connect(port);
    stream.write_all(b"11x").unwrap();
    let mut reply = [0u8; 1];
    stream.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"A");
    assert!(serial.is_open());

    // 0xFF never appears in UTF-8
    stream.write_all(b"0\xFF").unwrap();

    let (outcome, state) = daemon.join().unwrap();
    let err = outcome.unwrap_err();
    assert!(matches!(err, LifecycleError::Fatal(_)), "unexpected error: {err}");
    assert_eq!(err.exit_code(), 1);
    assert_eq!(state, LifecycleState::Stopped);

    assert!(!pidfile.exists(), "stop sequence must remove the pidfile");
    assert!(!serial.is_open(), "stop sequence must close the serial port");
    assert_eq!(serial.written(), vec![b"x".to_vec()]);

    let log = fs::read_to_string(&log_file).unwrap();
    assert!(log.contains("Connection loop failed"));
    assert!(log.contains("Invalid data from"));
    assert!(log.contains("stack backtrace"));
}
