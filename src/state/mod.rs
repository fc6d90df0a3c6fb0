//! State machine module for call activity
//!
//! Provides an explicit state machine with three states:
//! - Idle: No camera or microphone in use
//! - Active: A call is in progress
//! - Cooldown: Activity stopped; Idle fires once the idle delay elapses

mod machine;

pub use machine::{ActivityState, StateMachine};
