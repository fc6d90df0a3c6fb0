//! Activity module for camera/microphone detection
//!
//! Uses the macOS unified log's sensor-indicator events to learn when any
//! app starts or stops using the camera or microphone.

mod monitor;
mod parse;

pub use monitor::ActivityMonitor;
pub use parse::AvActivity;
