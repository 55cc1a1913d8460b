//! Crate-level behavioural tests driving real child processes.

mod supervisor_behaviour;
mod support;
