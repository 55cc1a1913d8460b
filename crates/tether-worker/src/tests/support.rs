//! Shared helpers for worker tests.

use std::io::{self, Write};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tether_protocol::{Request, encode_line};

/// In-memory writer whose contents tests can read while the worker runs.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<(Mutex<Vec<u8>>, Condvar)>,
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::to_owned)
        .collect()
}

impl SharedBuffer {
    /// Complete lines written so far.
    pub fn lines(&self) -> Vec<String> {
        let (bytes, _) = &*self.inner;
        split_lines(&bytes.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Waits until `predicate` accepts the written lines or `timeout` passes,
    /// returning the lines seen last.
    pub fn wait_for(&self, timeout: Duration, predicate: impl Fn(&[String]) -> bool) -> Vec<String> {
        let (bytes, written) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut guard = bytes.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let lines = split_lines(&guard);
            let remaining = deadline.saturating_duration_since(Instant::now());
            if predicate(&lines) || remaining.is_zero() {
                return lines;
            }
            guard = written
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let (bytes, written) = &*self.inner;
        bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        written.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Encodes a request as one newline-terminated wire line.
pub fn request_line(id: i64, method: &str, params: Option<Value>) -> String {
    encode_line(&Request::new(id, method, params).into()).expect("request should encode")
}
