//! Shared output buffer between a transport and its streamer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct BufferState {
    /// Bytes not yet handed to the streamer.
    pending: Vec<u8>,
    /// Everything ever appended, kept for the execution result.
    transcript: Vec<u8>,
}

/// Append/drain byte buffer. Cloning shares the same underlying buffer.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    state: Arc<Mutex<BufferState>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, bytes: &[u8]) {
        let mut state = self.lock();
        state.pending.extend_from_slice(bytes);
        state.transcript.extend_from_slice(bytes);
    }

    /// Remove and return every complete (newline-terminated) line.
    pub fn drain_lines(&self) -> Vec<String> {
        let chunk = {
            let mut state = self.lock();
            match state.pending.iter().rposition(|&b| b == b'\n') {
                Some(pos) => state.pending.drain(..=pos).collect::<Vec<u8>>(),
                None => return Vec::new(),
            }
        };
        split_lines(&chunk)
    }

    /// Remove and return everything, including a trailing partial line.
    pub fn drain_all(&self) -> Vec<String> {
        let chunk = std::mem::take(&mut self.lock().pending);
        split_lines(&chunk)
    }

    /// Full output captured so far.
    pub fn transcript(&self) -> String {
        String::from_utf8_lossy(&self.lock().transcript).into_owned()
    }

    pub fn has_pending(&self) -> bool {
        !self.lock().pending.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn split_lines(chunk: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(chunk)
        .lines()
        .map(String::from)
        .collect()
}
