//! Protocol output shared by the dispatch and heartbeat threads.

use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use tether_protocol::{ProtocolMessage, encode_line};

use crate::error::WorkerError;

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Line-oriented writer for protocol messages.
///
/// Each message is encoded outside the lock, then written and flushed as one
/// line while the lock is held, so lines from different threads never
/// interleave. Only protocol lines may reach this writer; diagnostics belong
/// on stderr.
#[derive(Clone)]
pub struct OutputChannel {
    writer: SharedWriter,
}

impl OutputChannel {
    /// Wraps a writer, usually the process's stdout.
    #[must_use]
    pub fn new<W>(writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Encodes and writes one message, flushing immediately.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Codec`] when the message cannot be encoded and
    /// [`WorkerError::Output`] when the write or flush fails.
    pub fn send(&self, message: impl Into<ProtocolMessage>) -> Result<(), WorkerError> {
        let line = encode_line(&message.into())?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.flush())
            .map_err(WorkerError::output)
    }
}

impl fmt::Debug for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputChannel").finish_non_exhaustive()
    }
}
