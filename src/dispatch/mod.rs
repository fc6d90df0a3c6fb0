//! Command dispatch to the blaster
//!
//! Runs a category's command list against the transport, one command at a
//! time, absorbing per-command failures.

mod sequencer;

pub use sequencer::execute;
