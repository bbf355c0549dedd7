//! Shared helpers for seriald-daemon integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use seriald_core::{DaemonConfig, DetachSettings};
use seriald_daemon::{SerialChannel, ShutdownFlag};

/// How often a silent device checks for shutdown
const SILENT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Maximum time to wait for the daemon to start listening
pub const LISTEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between connection attempts
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Returns a loopback port that was free a moment ago.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Foreground configuration with every file inside `dir`.
pub fn foreground_config(dir: &Path, port: u16) -> DaemonConfig {
    DaemonConfig::new("seriald-test")
        .with_socket_host("127.0.0.1")
        .with_socket_port(port)
        .with_log_file(dir.join("seriald-test.log"))
        .with_pidfile_path(dir.join("seriald-test.pid"))
        .with_detach(DetachSettings::foreground())
}

/// Connects to a daemon that may still be starting up.
pub fn connect(port: u16) -> TcpStream {
    let start = Instant::now();
    loop {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => return stream,
            Err(_) if start.elapsed() < LISTEN_TIMEOUT => thread::sleep(CONNECT_POLL_INTERVAL),
            Err(e) => panic!("daemon did not listen on port {port} within {LISTEN_TIMEOUT:?}: {e}"),
        }
    }
}

/// Makes closing `stream` send a RST instead of a FIN.
pub fn reset_on_close(stream: &TcpStream) {
    use std::os::fd::AsRawFd;

    let linger = libc::linger {
        l_onoff: 1,
        l_linger: 0,
    };
    // SAFETY: valid socket fd and a correctly sized linger struct.
    let rc = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            (&linger as *const libc::linger).cast::<libc::c_void>(),
            libc::socklen_t::try_from(std::mem::size_of::<libc::linger>()).unwrap(),
        )
    };
    assert_eq!(rc, 0, "setsockopt(SO_LINGER) failed");
}

/// Polls `condition` until it holds or `LISTEN_TIMEOUT` passes.
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < LISTEN_TIMEOUT, "condition not met in time");
        thread::sleep(CONNECT_POLL_INTERVAL);
    }
}

/// Everything the mock device has seen.
#[derive(Debug, Default)]
pub struct MockState {
    pub open: bool,
    pub opens: usize,
    pub closes: usize,
    pub written: Vec<Vec<u8>>,
    pub read_lengths: Vec<usize>,
    pub replies: VecDeque<Vec<u8>>,
    pub input_flushes: usize,
    pub output_flushes: usize,
    /// Never answer; reads block until shutdown is raised
    pub silent: bool,
    /// Blocking delay before a read returns
    pub reply_delay: Duration,
}

/// In-memory serial device. Clones share state, so a test can keep one
/// clone for assertions while another is owned by the daemon.
#[derive(Debug, Clone, Default)]
pub struct MockSerial {
    state: Arc<Mutex<MockState>>,
}

impl MockSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the bytes the device answers with on the next read.
    pub fn queue_reply(&self, reply: impl Into<Vec<u8>>) {
        self.state.lock().unwrap().replies.push_back(reply.into());
    }

    /// Makes every read block until shutdown, like a device that never answers.
    pub fn set_silent(&self) {
        self.state.lock().unwrap().silent = true;
    }

    /// Makes every read block for `delay` before returning.
    pub fn set_reply_delay(&self, delay: Duration) {
        self.state.lock().unwrap().reply_delay = delay;
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn read_lengths(&self) -> Vec<usize> {
        self.state.lock().unwrap().read_lengths.clone()
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn flushes(&self) -> (usize, usize) {
        let state = self.state.lock().unwrap();
        (state.input_flushes, state.output_flushes)
    }

    fn ensure_open(state: &MockState) -> io::Result<()> {
        if state.open {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotConnected, "mock port closed"))
        }
    }
}

impl SerialChannel for MockSerial {
    fn open(&mut self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.open = true;
        state.opens += 1;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.open = false;
        state.closes += 1;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::ensure_open(&state)?;
        state.written.push(data.to_vec());
        Ok(())
    }

    fn read(&mut self, len: usize, shutdown: &ShutdownFlag) -> io::Result<Vec<u8>> {
        let (silent, delay) = {
            let mut state = self.state.lock().unwrap();
            Self::ensure_open(&state)?;
            state.read_lengths.push(len);
            (state.silent, state.reply_delay)
        };

        if silent {
            while !shutdown.is_raised() {
                thread::sleep(SILENT_POLL_INTERVAL);
            }
            return Ok(Vec::new());
        }
        thread::sleep(delay);

        let mut state = self.state.lock().unwrap();
        let mut reply = state.replies.pop_front().unwrap_or_default();
        reply.truncate(len);
        Ok(reply)
    }

    fn flush_input(&mut self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::ensure_open(&state)?;
        state.input_flushes += 1;
        Ok(())
    }

    fn flush_output(&mut self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::ensure_open(&state)?;
        state.output_flushes += 1;
        Ok(())
    }
}
