//! Text event stream framing for run subscriptions.
//!
//! Each message is `event: <type>\ndata: <json>\n\n`. A stream opens with `connected`, then
//! yields backlog and live entries, interleaved with `heartbeat` frames on a fixed interval.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde_json::json;

use super::Subscription;
use crate::model::{LogEntry, LogLevel};

#[derive(Debug, Clone, PartialEq)]
pub struct StreamFrame {
    pub event: String,
    pub data: serde_json::Value,
}

impl StreamFrame {
    pub fn connected(run_id: &str, min_level: LogLevel) -> Self {
        Self {
            event: "connected".into(),
            data: json!({
                "status": "connected",
                "runId": run_id,
                "minLevel": min_level,
            }),
        }
    }

    pub fn heartbeat(at: DateTime<Utc>) -> Self {
        Self {
            event: "heartbeat".into(),
            data: json!({ "timestamp": at.timestamp() }),
        }
    }

    pub fn from_entry(entry: &LogEntry) -> Self {
        Self {
            event: entry.stream_event().to_string(),
            data: json!({
                "type": entry.stream_event(),
                "id": entry.id,
                "runId": entry.run_uid,
                "payload": entry,
            }),
        }
    }

    /// Wire form of the frame.
    pub fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

/// Frames for one subscriber until its queue closes (eviction or broker close).
pub fn frame_stream(
    mut subscription: Subscription,
    run_id: String,
    heartbeat: Duration,
) -> impl Stream<Item = StreamFrame> + Send + 'static {
    async_stream::stream! {
        yield StreamFrame::connected(&run_id, subscription.min_level());

        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                next = subscription.recv() => match next {
                    Some(entry) => yield StreamFrame::from_entry(&entry),
                    None => break,
                },
                _ = ticker.tick() => yield StreamFrame::heartbeat(Utc::now()),
            }
        }
    }
}
