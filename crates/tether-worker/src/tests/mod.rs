//! Crate-level behavioural tests driving the worker over in-memory pipes.

pub(crate) mod support;
