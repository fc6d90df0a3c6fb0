//! Sensor-indicator log message parsing
//!
//! Control Center logs a line every time the set of apps holding the
//! camera, microphone, or location changes, e.g.
//! `Active activity attributions changed to [cam:com.apple.FaceTime, mic:us.zoom.xos]`.

use serde::Deserialize;

/// Unified log predicate selecting sensor-indicator changes
pub const LOG_PREDICATE: &str = "subsystem == 'com.apple.controlcenter' AND \
     category == 'sensor-indicators' AND \
     formatString BEGINSWITH 'Active '";

/// Message prefix carrying the attribution list
pub const PREFIX: &str = "Active activity attributions changed to [";

/// Which capture devices are currently in use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AvActivity {
    /// Camera is held by some app
    pub camera: bool,
    /// Microphone is held by some app
    pub microphone: bool,
}

impl AvActivity {
    pub fn new(camera: bool, microphone: bool) -> Self {
        Self { camera, microphone }
    }

    /// The single signal driving the state machine
    pub fn is_active(&self) -> bool {
        self.camera || self.microphone
    }
}

/// One NDJSON record from `log show`/`log stream`
#[derive(Debug, Deserialize)]
struct LogRecord {
    #[serde(rename = "eventMessage")]
    event_message: Option<String>,
    message: Option<String>,
}

/// Parse an attribution message; anything without the prefix is inactive
pub fn parse_event_message(message: &str) -> AvActivity {
    let Some(rest) = message.strip_prefix(PREFIX) else {
        return AvActivity::default();
    };

    let (mut camera, mut microphone) = (false, false);
    for part in rest.trim_end_matches(']').split(',') {
        let part = part.trim().trim_matches(|c: char| c == '\'' || c == '"');
        if part.starts_with("cam:") {
            camera = true;
        } else if part.starts_with("mic:") {
            microphone = true;
        }
    }
    AvActivity::new(camera, microphone)
}

/// Parse one NDJSON line, returning `None` for lines that carry no
/// attribution change
pub fn parse_ndjson_line(line: &str) -> Option<AvActivity> {
    let line = line.trim();
    if line.is_empty() || line.starts_with("Filtering") {
        return None;
    }

    let record: LogRecord = serde_json::from_str(line).ok()?;
    let message = record
        .event_message
        .filter(|m| !m.is_empty())
        .or(record.message)?;

    message
        .starts_with(PREFIX)
        .then(|| parse_event_message(&message))
}

/// Most recent attribution state in a block of NDJSON output
pub fn latest_activity(output: &str) -> Option<AvActivity> {
    output.lines().rev().find_map(parse_ndjson_line)
}
