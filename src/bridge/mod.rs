//! Bridge module: the orchestration loop
//!
//! Owns the link lifecycle (connect, post-connect setup, reconnect), the
//! heartbeat, the activity consumer, and the cooldown tick.

mod supervisor;

pub use supervisor::Bridge;
