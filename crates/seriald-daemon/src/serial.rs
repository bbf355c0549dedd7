//! Serial channel abstraction and its `serialport`-backed implementation.
//!
//! The connection loop only talks to the device through [`SerialChannel`].
//! After every write the loop calls [`SerialChannel::cycle`], which closes
//! and reopens the handle: closing blocks until pending output has been
//! transmitted, and some drivers do not honour an explicit flush once the
//! process is detached from its terminal. Skipping the cycle lets a reply
//! read race the tail of the previous write.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use seriald_core::config::{DataBits, FlowControl, Parity, SerialSettings, SettingsError, StopBits};
use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, trace};

use crate::control::ShutdownFlag;

/// Longest single driver wait; the shutdown flag is checked in between.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Size of each chunk requested from the driver during a read.
const READ_CHUNK_SIZE: usize = 4096;

/// An open/close/read/write serial device handle.
pub trait SerialChannel {
    fn open(&mut self) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;

    fn is_open(&self) -> bool;

    /// Writes all of `data`.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Reads up to `len` bytes, blocking until they arrive, the read
    /// timeout elapses, or `shutdown` is raised. A short result means one
    /// of the latter two happened.
    fn read(&mut self, len: usize, shutdown: &ShutdownFlag) -> io::Result<Vec<u8>>;

    /// Discards data received but not yet read.
    fn flush_input(&mut self) -> io::Result<()>;

    /// Discards data written but not yet transmitted.
    fn flush_output(&mut self) -> io::Result<()>;

    /// Closes and reopens the channel so all written output is drained.
    fn cycle(&mut self) -> io::Result<()> {
        self.close()?;
        self.open()
    }
}

/// [`SerialChannel`] over a native serial port.
pub struct SerialPortChannel {
    settings: SerialSettings,
    device: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialPortChannel {
    /// Creates a closed channel; the port is opened on first use.
    pub fn new(settings: SerialSettings) -> Result<Self, SettingsError> {
        settings.validate()?;
        let device = settings
            .device
            .clone()
            .ok_or(SettingsError::MissingSerialDevice)?;
        Ok(Self {
            settings,
            device,
            port: None,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "Serial port is not open"))
    }
}

impl SerialChannel for SerialPortChannel {
    fn open(&mut self) -> io::Result<()> {
        if self.port.is_some() {
            return Ok(());
        }

        let settings = &self.settings;
        let port = serialport::new(self.device.as_str(), settings.baud_rate)
            .data_bits(match settings.data_bits {
                DataBits::Five => serialport::DataBits::Five,
                DataBits::Six => serialport::DataBits::Six,
                DataBits::Seven => serialport::DataBits::Seven,
                DataBits::Eight => serialport::DataBits::Eight,
            })
            .parity(match settings.parity {
                Parity::None => serialport::Parity::None,
                Parity::Odd => serialport::Parity::Odd,
                Parity::Even => serialport::Parity::Even,
            })
            .stop_bits(match settings.stop_bits {
                StopBits::One => serialport::StopBits::One,
                StopBits::Two => serialport::StopBits::Two,
            })
            .flow_control(match settings.flow_control {
                FlowControl::None => serialport::FlowControl::None,
                FlowControl::Software => serialport::FlowControl::Software,
                FlowControl::Hardware => serialport::FlowControl::Hardware,
            })
            .timeout(
                settings
                    .timeout
                    .map_or(READ_POLL_INTERVAL, |t| t.min(READ_POLL_INTERVAL)),
            )
            .open()?;

        debug!(device = %self.device, baud_rate = settings.baud_rate, "Serial port opened");
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if self.port.take().is_some() {
            debug!(device = %self.device, "Serial port closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.port()?.write_all(data)
    }

    fn read(&mut self, len: usize, shutdown: &ShutdownFlag) -> io::Result<Vec<u8>> {
        let deadline = self.settings.timeout.map(|t| Instant::now() + t);
        let port = self.port()?;

        let mut reply = Vec::new();
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        while reply.len() < len {
            if shutdown.is_raised() {
                debug!(received = reply.len(), wanted = len, "Serial read abandoned for shutdown");
                break;
            }

            let wanted = (len - reply.len()).min(READ_CHUNK_SIZE);
            let Some(buf) = chunk.get_mut(..wanted) else {
                break;
            };

            match port.read(buf) {
                Ok(0) => break,
                Ok(n) => reply.extend_from_slice(buf.get(..n).unwrap_or_default()),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        trace!(received = reply.len(), wanted = len, "Serial read timed out");
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        Ok(reply)
    }

    fn flush_input(&mut self) -> io::Result<()> {
        self.port()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn flush_output(&mut self) -> io::Result<()> {
        self.port()?.clear(ClearBuffer::Output)?;
        Ok(())
    }
}
