//! Device link: exclusive ownership of the serial channel to the controller.
//!
//! The link issues one framed command at a time and reads back the fixed number
//! of response bytes the command's spec declares. The controller is a simple
//! half-duplex peer with no multiplexing, so the link must be owned by a single
//! control flow; no retries and no resynchronization happen here — a framing
//! mismatch leaves the wire state unknown and is surfaced as fatal for the call.

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;

pub use mock::MockTransport;
#[cfg(feature = "instrument_serial")]
pub use serial::SerialTransport;

use log::debug;

use crate::error::RsmResult;
use crate::protocol::CommandSpec;

/// Low-level byte transport under the device link.
///
/// Implemented by [`SerialTransport`] for real hardware and by
/// [`MockTransport`] for tests.
pub trait Transport {
    /// Write one complete command frame.
    fn send(&mut self, frame: &[u8]) -> RsmResult<()>;

    /// Read up to `len` response bytes, returning what actually arrived.
    ///
    /// A short read is not an error at this layer; the codec detects the
    /// length mismatch and reports a framing error.
    fn receive(&mut self, len: usize) -> RsmResult<Vec<u8>>;
}

/// Framed call layer over a [`Transport`].
pub struct DeviceLink<T: Transport> {
    transport: T,
}

impl<T: Transport> DeviceLink<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Encode and issue one command, then read and decode its reply.
    pub fn call(&mut self, spec: &CommandSpec, args: &[u32]) -> RsmResult<Vec<i64>> {
        let frame = spec.encode(args)?;
        debug!("-> {} {:?}", spec.opcode, args);
        self.transport.send(&frame)?;

        let response = self.transport.receive(spec.response_len())?;
        let values = spec.decode(&response)?;
        debug!("<- {} {:?}", spec.opcode, values);
        Ok(values)
    }

    /// Access the underlying transport (used by tests to inspect traffic).
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
