//! Stream frame codec.
//!
//! Each frame is one event serialized as `data: <json>` and terminated by
//! a blank line. The parser is deliberately lenient: listeners may hand it
//! a full frame, a bare `data:` line, or raw JSON, and anything else
//! yields `None` rather than an error.

use super::TaskEvent;

/// Formats an event as a wire frame.
pub fn format_frame(event: &TaskEvent) -> String {
    // TaskEvent contains no map keys that can fail to serialize.
    let json = serde_json::to_string(event).unwrap_or_default();
    format!("data: {json}\n\n")
}

/// Parses a wire frame (or a fragment of one) back into an event.
///
/// Returns `None` for empty input, frames without a JSON payload, and
/// payloads that do not deserialize into a [`TaskEvent`].
pub fn parse_frame(frame: &str) -> Option<TaskEvent> {
    let trimmed = frame.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(rest) = trimmed.strip_prefix("data: ") {
        let json = rest.trim();
        if json.is_empty() {
            return None;
        }
        return serde_json::from_str(json).ok();
    }

    // Frame arrived with leading noise; salvage the first data line.
    if let Some(pos) = trimmed.find("data: {") {
        let json = &trimmed[pos + "data: ".len()..];
        let end = json.rfind('}')?;
        return serde_json::from_str(&json[..=end]).ok();
    }

    serde_json::from_str(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::TaskEventKind;

    #[test]
    fn frame_round_trip_is_structurally_identical() {
        let event = TaskEvent::new(TaskEventKind::TaskActionStarted, "Performing tap action")
            .with_data(json!({
                "action": { "type": "function", "name": "tap", "args": { "x": 500, "y": 900 } }
            }));

        let frame = format_frame(&event);
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));

        let parsed = parse_frame(&frame).expect("frame should parse");
        assert_eq!(parsed, event);
    }

    #[test]
    fn parses_bare_json_payload() {
        let event = TaskEvent::new(TaskEventKind::TaskCompleted, "Task completed");
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(parse_frame(&json), Some(event));
    }

    #[test]
    fn parses_frame_with_leading_noise() {
        let event = TaskEvent::new(TaskEventKind::TaskReasoning, "thinking");
        let noisy = format!(": keepalive\ndata: {}\n\n", serde_json::to_string(&event).unwrap());
        assert_eq!(parse_frame(&noisy), Some(event));
    }

    #[test]
    fn garbage_yields_none() {
        assert!(parse_frame("").is_none());
        assert!(parse_frame("   \n\n").is_none());
        assert!(parse_frame("data: ").is_none());
        assert!(parse_frame("data: not-json").is_none());
        assert!(parse_frame("{\"type\":\"NOT_A_KIND\"}").is_none());
    }
}
