//! In-memory transport for tests and dry runs.

use std::collections::VecDeque;

use crate::error::{RsmError, RsmResult};
use crate::link::Transport;

/// Scripted transport: responses are queued ahead of time and every sent frame
/// is recorded for inspection.
#[derive(Debug, Default)]
pub struct MockTransport {
    sent: Vec<Vec<u8>>,
    responses: VecDeque<Vec<u8>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next raw response the device will answer with.
    pub fn queue_response(&mut self, bytes: &[u8]) {
        self.responses.push_back(bytes.to_vec());
    }

    /// All frames sent so far, in order.
    pub fn sent_frames(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Opcodes of all frames sent so far, in order.
    pub fn sent_opcodes(&self) -> Vec<String> {
        self.sent
            .iter()
            .map(|f| String::from_utf8_lossy(&f[1..3]).into_owned())
            .collect()
    }

    /// Number of responses still queued.
    pub fn remaining_responses(&self) -> usize {
        self.responses.len()
    }
}

impl Transport for MockTransport {
    fn send(&mut self, frame: &[u8]) -> RsmResult<()> {
        self.sent.push(frame.to_vec());
        Ok(())
    }

    fn receive(&mut self, _len: usize) -> RsmResult<Vec<u8>> {
        self.responses.pop_front().ok_or_else(|| {
            RsmError::Io(std::io::Error::other(
                "mock transport: no response queued",
            ))
        })
    }
}
