//! Event spec resolution
//!
//! Each command category under `events` may be absent, a bare command name,
//! a single mapping, or a list of names/mappings. Every form resolves to a
//! non-empty ordered list of [`CommandSpec`].

use std::time::Duration;

use serde_yaml::Value;

use crate::events::CommandCategory;

use super::ConfigError;

/// Fallback used for the auto-disconnect timer when the configured delay is 0
const DEFAULT_SCHEDULE_DELAY_SECS: u64 = 900;

/// Heartbeat cadence when `HeartbeatInterval` is not configured
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 60;

/// One saved IR command to send, with the wait that precedes it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Saved-code name on the blaster (matched case-insensitively)
    pub name: String,
    /// Wait before sending
    pub delay: Duration,
    /// Heartbeat cadence; only read from the first `HeartbeatStopped` spec
    pub heartbeat_interval: Option<Duration>,
    /// `Delay` was given as null; sends without waiting but leaves the
    /// cooldown at its default
    pub delay_was_null: bool,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, delay_secs: u64) -> Self {
        Self {
            name: name.into(),
            delay: Duration::from_secs(delay_secs),
            heartbeat_interval: None,
            delay_was_null: false,
        }
    }

    fn with_heartbeat_interval(mut self, secs: Option<u64>) -> Self {
        self.heartbeat_interval = secs.map(Duration::from_secs);
        self
    }
}

/// Per-category fallbacks applied when fields are missing
#[derive(Debug, Clone, Copy)]
struct CategoryDefaults {
    name: &'static str,
    delay_secs: u64,
    heartbeat_interval_secs: Option<u64>,
}

impl CategoryDefaults {
    fn for_category(category: CommandCategory) -> Self {
        let (name, delay_secs, heartbeat_interval_secs) = match category {
            CommandCategory::OnConnect => ("On", 0, None),
            CommandCategory::HeartbeatStopped => {
                ("Off", 900, Some(DEFAULT_HEARTBEAT_INTERVAL_SECS))
            }
            CommandCategory::Active => ("Red", 0, None),
            CommandCategory::Idle => ("Green", 120, None),
        };
        Self {
            name,
            delay_secs,
            heartbeat_interval_secs,
        }
    }

    fn spec(&self) -> CommandSpec {
        CommandSpec::new(self.name, self.delay_secs)
            .with_heartbeat_interval(self.heartbeat_interval_secs)
    }
}

/// Resolved command lists for every category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventsConfig {
    pub on_connect: Vec<CommandSpec>,
    pub heartbeat_stopped: Vec<CommandSpec>,
    pub active: Vec<CommandSpec>,
    pub idle: Vec<CommandSpec>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        let default_list =
            |category| vec![CategoryDefaults::for_category(category).spec()];
        Self {
            on_connect: default_list(CommandCategory::OnConnect),
            heartbeat_stopped: default_list(CommandCategory::HeartbeatStopped),
            active: default_list(CommandCategory::Active),
            idle: default_list(CommandCategory::Idle),
        }
    }
}

impl EventsConfig {
    /// Resolve the `events` node of the config document
    pub fn from_value(events: Option<&Value>) -> Result<Self, ConfigError> {
        let events = events.filter(|v| !v.is_null());
        if let Some(node) = events {
            if !node.is_mapping() {
                return Err(ConfigError::InvalidSection {
                    section: "events",
                    value: describe(node),
                });
            }
        }

        let resolve = |category: CommandCategory| {
            resolve_category(category, events.and_then(|e| e.get(category.config_key())))
        };

        Ok(Self {
            on_connect: resolve(CommandCategory::OnConnect)?,
            heartbeat_stopped: resolve(CommandCategory::HeartbeatStopped)?,
            active: resolve(CommandCategory::Active)?,
            idle: resolve(CommandCategory::Idle)?,
        })
    }

    /// Ordered specs for a category
    pub fn specs(&self, category: CommandCategory) -> &[CommandSpec] {
        match category {
            CommandCategory::OnConnect => &self.on_connect,
            CommandCategory::HeartbeatStopped => &self.heartbeat_stopped,
            CommandCategory::Active => &self.active,
            CommandCategory::Idle => &self.idle,
        }
    }

    /// Cooldown length for the activity state machine: the first Idle delay,
    /// or the Idle default when that delay is missing or null
    pub fn idle_delay(&self) -> Duration {
        self.idle
            .first()
            .filter(|spec| !spec.delay_was_null)
            .map(|spec| spec.delay)
            .unwrap_or_else(|| {
                Duration::from_secs(
                    CategoryDefaults::for_category(CommandCategory::Idle).delay_secs,
                )
            })
    }

    /// Heartbeat cadence, or `None` when heartbeats are disabled (interval 0)
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        let interval = self
            .heartbeat_stopped
            .first()
            .and_then(|spec| spec.heartbeat_interval)
            .unwrap_or(Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS));
        (!interval.is_zero()).then_some(interval)
    }

    /// Command and delay used to arm the accessory's auto-disconnect timer
    pub fn disconnect_schedule(&self) -> Option<(&str, Duration)> {
        self.heartbeat_stopped.first().map(|spec| {
            let delay = if spec.delay.is_zero() {
                Duration::from_secs(DEFAULT_SCHEDULE_DELAY_SECS)
            } else {
                spec.delay
            };
            (spec.name.as_str(), delay)
        })
    }
}

/// Resolve one category into its ordered spec list
fn resolve_category(
    category: CommandCategory,
    raw: Option<&Value>,
) -> Result<Vec<CommandSpec>, ConfigError> {
    let defaults = CategoryDefaults::for_category(category);

    match raw {
        None | Some(Value::Null) => Ok(vec![defaults.spec()]),
        Some(Value::Sequence(items)) if items.is_empty() => Ok(vec![defaults.spec()]),
        Some(Value::Sequence(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                // Only the head of a list inherits the category defaults
                let item_defaults = if i == 0 {
                    defaults
                } else {
                    CategoryDefaults {
                        delay_secs: 0,
                        heartbeat_interval_secs: None,
                        ..defaults
                    }
                };
                resolve_item(category, item, item_defaults)
            })
            .collect(),
        Some(item) => Ok(vec![resolve_item(category, item, defaults)?]),
    }
}

/// Resolve a single entry (null, bare name, or mapping)
fn resolve_item(
    category: CommandCategory,
    item: &Value,
    defaults: CategoryDefaults,
) -> Result<CommandSpec, ConfigError> {
    let key = category.config_key();

    match item {
        Value::Null => Ok(defaults.spec()),
        Value::String(name) => Ok(CommandSpec::new(name.clone(), 0)
            .with_heartbeat_interval(defaults.heartbeat_interval_secs)),
        Value::Mapping(_) => {
            let name = match item.get("NamedCommand") {
                None | Some(Value::Null) => defaults.name.to_string(),
                Some(Value::String(s)) if s.is_empty() => defaults.name.to_string(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => {
                    return Err(ConfigError::InvalidName {
                        category: key,
                        value: describe(other),
                    })
                }
            };

            let (delay_secs, delay_was_null) = match item.get("Delay") {
                None => (defaults.delay_secs, false),
                Some(Value::Null) => (0, true),
                Some(value) => (non_negative(key, "Delay", value)?, false),
            };

            let heartbeat_interval_secs = match item.get("HeartbeatInterval") {
                None => defaults.heartbeat_interval_secs,
                Some(Value::Null) => None,
                Some(value) => Some(non_negative(key, "HeartbeatInterval", value)?),
            };

            let mut spec = CommandSpec::new(name, delay_secs)
                .with_heartbeat_interval(heartbeat_interval_secs);
            spec.delay_was_null = delay_was_null;
            Ok(spec)
        }
        other => Err(ConfigError::InvalidEntry {
            category: key,
            value: describe(other),
        }),
    }
}

fn non_negative(
    category: &'static str,
    field: &'static str,
    value: &Value,
) -> Result<u64, ConfigError> {
    value.as_u64().ok_or_else(|| ConfigError::InvalidNumber {
        category,
        field,
        value: describe(value),
    })
}

/// Short human rendering of a YAML node for error messages
fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("{s:?}"),
        Value::Sequence(_) => "a list".to_string(),
        Value::Mapping(_) => "a mapping".to_string(),
        Value::Tagged(tagged) => format!("tagged value {}", tagged.tag),
    }
}
