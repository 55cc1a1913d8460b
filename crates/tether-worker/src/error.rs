//! Errors raised by the worker runtime.

use std::io;
use std::sync::Arc;

use tether_protocol::CodecError;
use thiserror::Error;

use crate::surface::AutomationFailure;

/// Failures that stop the worker.
///
/// Method failures never appear here; they travel back to the host as error
/// responses. A `WorkerError` means the protocol link itself is unusable.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    /// Writing a line to the protocol output failed.
    #[error("failed to write protocol output: {source}")]
    Output {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// An outbound message could not be encoded.
    #[error("failed to encode protocol message: {0}")]
    Codec(#[source] Arc<CodecError>),
    /// The automation surface refused to attach.
    #[error("automation surface failed to attach: {source}")]
    Attach {
        /// Failure reported by the surface.
        #[source]
        source: AutomationFailure,
    },
    /// A runtime thread could not be started.
    #[error("failed to start {name} thread: {source}")]
    Thread {
        /// Role of the thread.
        name: &'static str,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

impl WorkerError {
    pub(crate) fn output(source: io::Error) -> Self {
        Self::Output {
            source: Arc::new(source),
        }
    }

    pub(crate) fn thread(name: &'static str, source: io::Error) -> Self {
        Self::Thread {
            name,
            source: Arc::new(source),
        }
    }

    /// Returns `true` when the host end of the output stream has gone away.
    #[must_use]
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, Self::Output { source } if source.kind() == io::ErrorKind::BrokenPipe)
    }
}

impl From<CodecError> for WorkerError {
    fn from(error: CodecError) -> Self {
        Self::Codec(Arc::new(error))
    }
}
