//! Fire-and-forget product analytics, shipped to Amplitude in batches.
//!
//! `track` never blocks a turn: events go into a bounded queue and are
//! dropped when it is full. A background task drains the queue.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

const ENDPOINT: &str = "https://api2.amplitude.com/2/httpapi";
const BATCH_SIZE: usize = 20;
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub user_id: String,
    pub event_type: String,
    pub event_properties: serde_json::Value,
    /// Milliseconds since the epoch.
    pub time: i64,
}

#[derive(Clone)]
pub struct Analytics {
    tx: Option<mpsc::Sender<Event>>,
}

impl Analytics {
    /// Analytics that discards everything (no API key configured).
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Start the delivery task. Must be called inside a tokio runtime.
    pub fn spawn(api_key: String, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(deliver(api_key, rx));
        Self { tx: Some(tx) }
    }

    #[cfg(test)]
    pub(crate) fn from_sender(tx: mpsc::Sender<Event>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn track(&self, user_id: i64, event_type: &str, properties: serde_json::Value) {
        let Some(ref tx) = self.tx else {
            return;
        };
        let event = Event {
            user_id: user_id.to_string(),
            event_type: event_type.to_string(),
            event_properties: properties,
            time: chrono::Utc::now().timestamp_millis(),
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!("Analytics queue full, dropping {}", event.event_type);
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Analytics worker gone, dropping {event_type}");
            }
        }
    }
}

async fn deliver(api_key: String, mut rx: mpsc::Receiver<Event>) {
    let http = reqwest::Client::new();
    let mut buffer: Vec<Event> = Vec::new();
    let mut interval = tokio::time::interval(FLUSH_INTERVAL);

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        buffer.push(event);
                        if buffer.len() >= BATCH_SIZE {
                            flush(&http, &api_key, &mut buffer).await;
                        }
                    }
                    None => {
                        flush(&http, &api_key, &mut buffer).await;
                        break;
                    }
                }
            }
            _ = interval.tick() => {
                flush(&http, &api_key, &mut buffer).await;
            }
        }
    }
}

fn payload(api_key: &str, events: &[Event]) -> serde_json::Value {
    serde_json::json!({
        "api_key": api_key,
        "events": events,
        // Telegram ids can be shorter than Amplitude's default minimum of 5.
        "options": {"min_id_length": 1},
    })
}

async fn flush(http: &reqwest::Client, api_key: &str, buffer: &mut Vec<Event>) {
    if buffer.is_empty() {
        return;
    }
    let body = payload(api_key, buffer);
    let count = buffer.len();
    buffer.clear();

    match http.post(ENDPOINT).json(&body).send().await {
        Ok(response) if response.status().is_success() => debug!("Sent {count} analytics events"),
        Ok(response) => warn!("Amplitude rejected {count} events: {}", response.status()),
        Err(e) => warn!("Amplitude error: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_is_noop() {
        Analytics::disabled().track(1, "start", serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_track_enqueues_event() {
        let (tx, mut rx) = mpsc::channel(4);
        let analytics = Analytics::from_sender(tx);
        analytics.track(42, "value_saved", serde_json::json!({"name": "Honesty"}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.user_id, "42");
        assert_eq!(event.event_type, "value_saved");
        assert_eq!(event.event_properties["name"], "Honesty");
        assert!(event.time > 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let analytics = Analytics::from_sender(tx);
        analytics.track(1, "first", serde_json::json!({}));
        analytics.track(1, "second", serde_json::json!({}));

        assert_eq!(rx.recv().await.unwrap().event_type, "first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_payload_shape() {
        let events = vec![Event {
            user_id: "7".to_string(),
            event_type: "start".to_string(),
            event_properties: serde_json::json!({}),
            time: 1,
        }];
        let body = payload("key", &events);
        assert_eq!(body["api_key"], "key");
        assert_eq!(body["events"][0]["user_id"], "7");
        assert_eq!(body["options"]["min_id_length"], 1);
    }
}
