//! Test harness utilities for the supervisor behavioural suite.

mod fake_worker;
mod recorder;

pub use fake_worker::FakeWorker;
pub use recorder::{LinkEvent, RecordingObserver};
