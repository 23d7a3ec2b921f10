use std::time::Duration;

use axum::response::sse::{Event, KeepAlive};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::warn;

const CHANNEL_CAPACITY: usize = 64;
const EVENT_NAME: &str = "calories";

/// Counter value pushed to overlay subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterUpdate {
    pub value: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    pub at: DateTime<Utc>,
}

impl CounterUpdate {
    /// Snapshot of the current value, sent first on every new stream.
    pub fn snapshot(value: i64, at: DateTime<Utc>) -> Self {
        Self {
            value,
            delta: None,
            at,
        }
    }

    pub fn applied(value: i64, delta: i64, at: DateTime<Utc>) -> Self {
        Self {
            value,
            delta: Some(delta),
            at,
        }
    }

    pub fn into_sse_event(self) -> Result<Event, serde_json::Error> {
        let data = serde_json::to_string(&self)?;
        Ok(Event::default().event(EVENT_NAME).data(data))
    }
}

/// Fan-out of counter changes to connected overlays.
#[derive(Clone)]
pub struct CounterHub {
    sender: broadcast::Sender<CounterUpdate>,
}

impl CounterHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, update: CounterUpdate) {
        if self.sender.receiver_count() == 0 {
            return;
        }
        if let Err(err) = self.sender.send(update) {
            warn!(stage = "overlay", error = %err, "failed to broadcast counter update");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CounterUpdate> {
        self.sender.subscribe()
    }
}

impl Default for CounterHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Emits `initial` followed by every update published after `receiver` was
/// created. Lagged receivers skip the missed updates.
pub fn counter_stream(
    receiver: broadcast::Receiver<CounterUpdate>,
    initial: CounterUpdate,
) -> impl Stream<Item = Result<Event, serde_json::Error>> + Send + 'static {
    let updates = BroadcastStream::new(receiver).filter_map(|result| result.ok());
    tokio_stream::once(initial)
        .chain(updates)
        .map(CounterUpdate::into_sse_event)
}

pub fn counter_keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(20))
        .text("heartbeat")
}
