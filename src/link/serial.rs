//! Serial transport over the `serialport` crate.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use log::debug;
use serialport::SerialPort;

use crate::error::RsmResult;
use crate::link::Transport;

/// Default overall read deadline for one response.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Internal per-read timeout of the port itself; shorter than the overall
/// deadline so the read loop can keep checking it.
const PORT_TIMEOUT: Duration = Duration::from_millis(100);

/// RS-232 transport owning the open serial port to the controller.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    read_timeout: Duration,
}

impl SerialTransport {
    /// Open the serial port at the given baud rate.
    pub fn open(port_name: &str, baud_rate: u32) -> RsmResult<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(PORT_TIMEOUT)
            .open()
            .map_err(|e| {
                std::io::Error::other(format!(
                    "failed to open serial port '{port_name}' at {baud_rate} baud: {e}"
                ))
            })?;
        debug!("serial port '{}' opened at {} baud", port_name, baud_rate);

        Ok(Self {
            port,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    /// Replace the overall response read deadline.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, frame: &[u8]) -> RsmResult<()> {
        self.port.write_all(frame)?;
        self.port.flush()?;
        Ok(())
    }

    fn receive(&mut self, len: usize) -> RsmResult<Vec<u8>> {
        let mut response = vec![0u8; len];
        let mut filled = 0;
        let start = Instant::now();

        while filled < len {
            if start.elapsed() > self.read_timeout {
                // Let the codec report the short read as a framing error.
                break;
            }
            match self.port.read(&mut response[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e.into()),
            }
        }

        response.truncate(filled);
        Ok(response)
    }
}
