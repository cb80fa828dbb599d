//! Captured, timestamped actions consumed by the playback scheduler.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::trajectory::TrajectoryPoint;

/// What a recorded action does on replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordedKind {
    Click { x: i32, y: i32 },
    LongClick { x: i32, y: i32 },
    Swipe { x1: i32, y1: i32, x2: i32, y2: i32 },
    Text { text: String },
    Key {
        keycode: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key_name: Option<String>,
    },
}

/// One entry of a recording timeline.
///
/// `start_time_ms` is capture-session relative; playback schedules every
/// entry relative to the first entry's start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedAction {
    #[serde(flatten)]
    pub kind: RecordedKind,
    #[serde(default)]
    pub start_time_ms: i64,
    #[serde(default)]
    pub end_time_ms: i64,
    #[serde(default, alias = "duration")]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory: Option<Vec<TrajectoryPoint>>,
}

impl RecordedAction {
    /// Instantaneous action at `at_ms`.
    pub fn instant(kind: RecordedKind, at_ms: i64) -> Self {
        Self {
            kind,
            start_time_ms: at_ms,
            end_time_ms: at_ms,
            duration_ms: 0,
            trajectory: None,
        }
    }

    /// Action spanning `[start_ms, end_ms]`.
    pub fn spanning(kind: RecordedKind, start_ms: i64, end_ms: i64) -> Self {
        Self {
            kind,
            start_time_ms: start_ms,
            end_time_ms: end_ms,
            duration_ms: (end_ms - start_ms).max(0) as u64,
            trajectory: None,
        }
    }

    pub fn with_trajectory(mut self, trajectory: Vec<TrajectoryPoint>) -> Self {
        self.trajectory = Some(trajectory);
        self
    }
}

/// Bring older recording layouts up to the current one, in place.
///
/// Entries without `start_time_ms` derive it from `timestamp_ms` or from
/// `time` (seconds). A timestamp marks the end of press/swipe gestures, so
/// their start is the timestamp minus the gesture duration.
pub fn normalize_legacy(entries: &mut [Value]) {
    for entry in entries.iter_mut() {
        let Some(obj) = entry.as_object_mut() else {
            continue;
        };
        if obj.contains_key("start_time_ms") {
            continue;
        }
        let timestamp = match (obj.get("timestamp_ms"), obj.get("time")) {
            (Some(ms), _) => ms.as_f64().map(|ms| ms as i64),
            (None, Some(secs)) => secs.as_f64().map(|s| (s * 1000.0) as i64),
            (None, None) => None,
        };
        let Some(timestamp) = timestamp else {
            continue;
        };

        let is_gesture = matches!(
            obj.get("type").and_then(Value::as_str),
            Some("long_click") | Some("swipe")
        );
        let duration = obj
            .get("duration_ms")
            .or_else(|| obj.get("duration"))
            .and_then(Value::as_i64)
            .unwrap_or(0);

        let start = if is_gesture { timestamp - duration } else { timestamp };
        obj.insert("start_time_ms".into(), Value::from(start));
        obj.insert("end_time_ms".into(), Value::from(timestamp));
    }
}

/// Parse a recording from JSON text, accepting legacy layouts.
pub fn parse_recording(json: &str) -> serde_json::Result<Vec<RecordedAction>> {
    let mut entries: Vec<Value> = serde_json::from_str(json)?;
    normalize_legacy(&mut entries);
    entries.into_iter().map(serde_json::from_value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_layout() {
        let json = r#"[
            {"type":"click","x":5,"y":6,"start_time_ms":1000,"end_time_ms":1000,"duration":0},
            {"type":"swipe","x1":0,"y1":0,"x2":300,"y2":0,"start_time_ms":2000,"end_time_ms":2400,
             "duration_ms":400,"trajectory":[[0,0,2000],[150,40,2200],[300,0,2400]]}
        ]"#;
        let actions = parse_recording(json).unwrap();
        assert_eq!(actions[0].kind, RecordedKind::Click { x: 5, y: 6 });
        assert_eq!(actions[1].duration_ms, 400);
        assert_eq!(actions[1].trajectory.as_ref().map(Vec::len), Some(3));
    }

    #[test]
    fn test_legacy_timestamps() {
        let json = r#"[
            {"type":"click","x":1,"y":1,"timestamp_ms":500},
            {"type":"swipe","x1":0,"y1":0,"x2":9,"y2":9,"timestamp_ms":1500,"duration":300},
            {"type":"long_click","x":3,"y":3,"time":2.0,"duration":800}
        ]"#;
        let actions = parse_recording(json).unwrap();
        assert_eq!((actions[0].start_time_ms, actions[0].end_time_ms), (500, 500));
        assert_eq!((actions[1].start_time_ms, actions[1].end_time_ms), (1200, 1500));
        assert_eq!((actions[2].start_time_ms, actions[2].end_time_ms), (1200, 2000));
        assert_eq!(actions[2].duration_ms, 800);
    }

    #[test]
    fn test_spanning_duration() {
        let action = RecordedAction::spanning(RecordedKind::LongClick { x: 0, y: 0 }, 100, 700);
        assert_eq!(action.duration_ms, 600);
    }
}
