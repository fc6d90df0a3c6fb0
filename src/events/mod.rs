//! Command categories dispatched to the blaster
//!
//! Each category names an ordered batch of saved IR commands. The state
//! machine emits `Active` and `Idle`; the bridge itself dispatches
//! `OnConnect` and arms `HeartbeatStopped`.

/// A named batch of commands sent together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCategory {
    /// Sent after every (re)connect once the link is ready
    OnConnect,

    /// Armed on the accessory; runs if heartbeats stop arriving
    HeartbeatStopped,

    /// Camera or microphone became active
    Active,

    /// Activity stopped and the cooldown window elapsed
    Idle,
}

impl CommandCategory {
    /// Key used for this category under `events` in the config document
    pub fn config_key(self) -> &'static str {
        match self {
            CommandCategory::OnConnect => "OnConnect",
            CommandCategory::HeartbeatStopped => "HeartbeatStopped",
            CommandCategory::Active => "Active",
            CommandCategory::Idle => "Idle",
        }
    }
}

impl std::fmt::Display for CommandCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandCategory::OnConnect => write!(f, "ON_CONNECT"),
            CommandCategory::HeartbeatStopped => write!(f, "HEARTBEAT_STOPPED"),
            CommandCategory::Active => write!(f, "ACTIVE"),
            CommandCategory::Idle => write!(f, "IDLE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_keys() {
        assert_eq!(CommandCategory::OnConnect.config_key(), "OnConnect");
        assert_eq!(CommandCategory::HeartbeatStopped.config_key(), "HeartbeatStopped");
        assert_eq!(CommandCategory::Active.config_key(), "Active");
        assert_eq!(CommandCategory::Idle.config_key(), "Idle");
    }

    #[test]
    fn test_display() {
        assert_eq!(CommandCategory::Idle.to_string(), "IDLE");
        assert_eq!(CommandCategory::OnConnect.to_string(), "ON_CONNECT");
    }
}
