//! JSON-lines wire format of the binary. Events are read from stdin one JSON object per line, and
//! every fired window is written to stdout as one JSON object per line.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};
use windowflow_core::{Error, StreamEvent, WindowResult, WindowedStreamProcessor};

/// An event as it appears on stdin.
#[derive(Debug, Deserialize)]
pub(crate) struct EventRecord {
    id: String,
    event_time: i64,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    payload: Value,
}

impl From<EventRecord> for StreamEvent {
    fn from(record: EventRecord) -> Self {
        let mut event = StreamEvent::new(record.id, record.event_time, record.payload.to_string());
        if let Some(event_type) = record.event_type {
            event = event.with_event_type(event_type);
        }
        if let Some(key) = record.key {
            event = event.with_key(key);
        }
        event
    }
}

/// A fired window as written to stdout.
#[derive(Debug, Serialize)]
pub(crate) struct WindowRecord {
    key: String,
    kind: String,
    start: i64,
    end: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_time: Option<String>,
    event_count: usize,
    amount: f64,
}

impl From<WindowResult<f64>> for WindowRecord {
    fn from(result: WindowResult<f64>) -> Self {
        Self {
            key: result.key.to_string(),
            kind: result.kind.to_string(),
            start_time: result.start_time().map(|t| t.to_rfc3339()),
            end_time: result.end_time().map(|t| t.to_rfc3339()),
            start: result.start,
            end: result.end,
            event_count: result.event_count,
            amount: result.aggregated,
        }
    }
}

/// Sums the numeric `amount` field of the JSON payloads, payloads without one count as zero.
pub(crate) fn sum_amounts(events: &[StreamEvent]) -> f64 {
    events
        .iter()
        .filter_map(|event| serde_json::from_slice::<Value>(event.payload()).ok())
        .filter_map(|payload| payload.get("amount").and_then(Value::as_f64))
        .sum()
}

/// Reads JSON-lines events till EOF and ingests them. Lines which do not parse and events the
/// processor has no room for are logged and skipped.
pub(crate) async fn read_events<R>(
    reader: R,
    processor: &Arc<WindowedStreamProcessor<f64>>,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_number = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        let record: EventRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line_number, ?e, "Skipping malformed event");
                continue;
            }
        };

        match processor.ingest(record.into()).await {
            Ok(()) => {}
            Err(Error::QueueFull(reason)) => warn!(line_number, %reason, "Event not accepted"),
            Err(Error::Stopped) => {
                info!(line_number, "Processor stopped, no longer reading events");
                break;
            }
            Err(e) => warn!(line_number, ?e, "Failed to ingest event"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use windowflow_core::{ManualClock, ProcessorBuilder, WindowConfig, WindowKindTag};

    #[test]
    fn test_event_record_into_stream_event() {
        let record: EventRecord = serde_json::from_str(
            r#"{"id":"e1","event_time":1500,"event_type":"click","key":"user-1","payload":{"amount":2.5}}"#,
        )
        .unwrap();
        let event = StreamEvent::from(record);

        assert_eq!(event.id(), "e1");
        assert_eq!(event.event_time(), 1500);
        assert_eq!(event.event_type(), "click");
        assert_eq!(event.key(), Some("user-1"));
        assert_eq!(sum_amounts(&[event]), 2.5);
    }

    #[test]
    fn test_event_record_optional_fields() {
        let record: EventRecord = serde_json::from_str(r#"{"id":"e2","event_time":0}"#).unwrap();
        let event = StreamEvent::from(record);

        assert_eq!(event.key(), None);
        assert_eq!(sum_amounts(&[event]), 0.0);
    }

    #[test]
    fn test_window_record_json() {
        let record = WindowRecord::from(WindowResult {
            key: Arc::from("user-1"),
            start: 0,
            end: 5000,
            kind: WindowKindTag::Tumbling,
            event_count: 2,
            aggregated: 7.5,
        });

        let json: Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["key"], "user-1");
        assert_eq!(json["kind"], "tumbling");
        assert_eq!(json["end"], 5000);
        assert_eq!(json["event_count"], 2);
        assert_eq!(json["amount"], 7.5);
        assert_eq!(json["start_time"], "1970-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn test_read_events_skips_malformed_lines() {
        let window = WindowConfig::tumbling(Duration::from_secs(5)).unwrap();
        let processor = Arc::new(
            ProcessorBuilder::new(window, sum_amounts)
                .clock(ManualClock::new(0))
                .build()
                .unwrap(),
        );

        let input = concat!(
            r#"{"id":"1","event_time":100,"payload":{"amount":1.5}}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"id":"2","event_time":200,"payload":{"amount":2}}"#,
            "\n",
        );
        read_events(input.as_bytes(), &processor).await.unwrap();
        processor.stop().await.unwrap();

        let result = processor
            .poll_result(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.event_count, 2);
        assert_eq!(result.aggregated, 3.5);
        assert!(processor.poll_result(Duration::from_millis(10)).await.is_none());
    }
}
