//! Live provisioning progress: a per-principal broadcast broker on the server
//! side, and a bounded consumer for subscribers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    RepositoryCreated,
    PreparingTemplate,
    TemplateReady,
    UploadStarted,
    UploadProgress,
    CommitCreated,
    UploadComplete,
    FileError,
}

/// One progress event on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    pub update_type: UpdateType,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl ProjectUpdate {
    pub fn new(update_type: UpdateType, data: serde_json::Value) -> Self {
        Self {
            kind: "project_update".to_string(),
            update_type,
            timestamp: Utc::now(),
            data,
        }
    }

    /// Whether this event ends the provisioning stream.
    pub fn is_terminal(&self) -> bool {
        self.update_type == UpdateType::UploadComplete
    }
}

/// Fan-out of progress events keyed by principal. Subscribing before any
/// event is published is the supported pattern; late subscribers only see
/// events from subscription onward.
#[derive(Clone, Default)]
pub struct ProgressBroker {
    channels: Arc<DashMap<Uuid, broadcast::Sender<ProjectUpdate>>>,
}

impl ProgressBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, user_id: Uuid) -> broadcast::Receiver<ProjectUpdate> {
        self.channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe()
    }

    /// Publish to whoever is listening. No subscribers is not an error;
    /// progress is advisory.
    pub fn publish(&self, user_id: Uuid, update: ProjectUpdate) {
        if let Some(tx) = self.channels.get(&user_id) {
            let _ = tx.send(update);
        }
    }

    /// Drop the channel; receivers observe end-of-stream.
    pub fn close(&self, user_id: Uuid) {
        self.channels.remove(&user_id);
    }

    /// Reclaim the channel if nobody is subscribed anymore. Called when a
    /// subscriber disconnects, so channels created by mere subscription do
    /// not accumulate.
    pub fn release(&self, user_id: Uuid) {
        self.channels
            .remove_if(&user_id, |_, tx| tx.receiver_count() == 0);
    }

    #[cfg(test)]
    fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// How a progress stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The terminal event arrived.
    Complete,
    /// The stream closed before the terminal event. The repository may still
    /// exist; the caller must not treat this as failure.
    Inconclusive,
}

/// Drain a progress stream until the terminal event or end-of-stream.
pub async fn consume<S>(mut stream: S) -> StreamOutcome
where
    S: futures::Stream<Item = ProjectUpdate> + Unpin,
{
    while let Some(update) = stream.next().await {
        tracing::debug!(update_type = ?update.update_type, "progress event");
        if update.is_terminal() {
            return StreamOutcome::Complete;
        }
    }
    StreamOutcome::Inconclusive
}

/// Client-side port to a progress feed. Returning None means progress could
/// not be observed at all, which callers treat as a completed (unobserved)
/// stream rather than a failure.
#[async_trait::async_trait]
pub trait ProgressSource: Send + Sync {
    async fn subscribe(&self, user_id: Uuid) -> Option<BoxStream<'static, ProjectUpdate>>;
}

/// Progress over the websocket endpoint.
pub struct WsProgress {
    base_url: String,
}

impl WsProgress {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl ProgressSource for WsProgress {
    async fn subscribe(&self, user_id: Uuid) -> Option<BoxStream<'static, ProjectUpdate>> {
        let url = format!("{}/ws/{}", self.base_url, user_id);
        let (socket, _) = match tokio_tungstenite::connect_async(&url).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "progress socket connect failed");
                return None;
            }
        };

        let stream = socket.filter_map(|msg| async move {
            match msg {
                Ok(tokio_tungstenite::tungstenite::Message::Text(text)) => {
                    serde_json::from_str::<ProjectUpdate>(&text).ok()
                }
                _ => None,
            }
        });
        Some(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::wrappers::BroadcastStream;

    fn update(update_type: UpdateType) -> ProjectUpdate {
        ProjectUpdate::new(update_type, serde_json::json!({}))
    }

    #[test]
    fn wire_shape_matches_the_contract() {
        let u = ProjectUpdate::new(
            UpdateType::UploadProgress,
            serde_json::json!({"current": 3, "total": 10, "percentage": 30}),
        );
        let v = serde_json::to_value(&u).unwrap();
        assert_eq!(v["type"], "project_update");
        assert_eq!(v["update_type"], "upload_progress");
        assert_eq!(v["data"]["current"], 3);
        assert!(v["timestamp"].is_string());
    }

    #[tokio::test]
    async fn subscribers_see_events_published_after_subscribe() {
        let broker = ProgressBroker::new();
        let user = Uuid::new_v4();

        let mut rx = broker.subscribe(user);
        broker.publish(user, update(UpdateType::RepositoryCreated));
        broker.publish(user, update(UpdateType::UploadComplete));

        assert_eq!(
            rx.recv().await.unwrap().update_type,
            UpdateType::RepositoryCreated
        );
        assert_eq!(
            rx.recv().await.unwrap().update_type,
            UpdateType::UploadComplete
        );
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let broker = ProgressBroker::new();
        broker.publish(Uuid::new_v4(), update(UpdateType::RepositoryCreated));
    }

    #[tokio::test]
    async fn consume_stops_at_the_terminal_event() {
        let broker = ProgressBroker::new();
        let user = Uuid::new_v4();
        let rx = broker.subscribe(user);

        broker.publish(user, update(UpdateType::RepositoryCreated));
        broker.publish(user, update(UpdateType::UploadComplete));
        broker.publish(user, update(UpdateType::FileError));

        let stream = BroadcastStream::new(rx).filter_map(|r| async move { r.ok() });
        let outcome = consume(stream.boxed()).await;
        assert_eq!(outcome, StreamOutcome::Complete);
    }

    #[tokio::test]
    async fn close_before_terminal_event_is_inconclusive() {
        let broker = ProgressBroker::new();
        let user = Uuid::new_v4();
        let rx = broker.subscribe(user);

        broker.publish(user, update(UpdateType::RepositoryCreated));
        broker.publish(
            user,
            ProjectUpdate::new(
                UpdateType::UploadProgress,
                serde_json::json!({"current": 3, "total": 10, "percentage": 30}),
            ),
        );
        broker.close(user);

        let stream = BroadcastStream::new(rx).filter_map(|r| async move { r.ok() });
        let outcome = consume(stream.boxed()).await;
        assert_eq!(outcome, StreamOutcome::Inconclusive);
    }

    #[tokio::test]
    async fn release_reclaims_channels_with_no_subscribers_left() {
        let broker = ProgressBroker::new();
        let user = Uuid::new_v4();

        let rx = broker.subscribe(user);
        assert_eq!(broker.channel_count(), 1);

        // Still subscribed elsewhere: release must keep the channel.
        let rx2 = broker.subscribe(user);
        drop(rx);
        broker.release(user);
        assert_eq!(broker.channel_count(), 1);

        drop(rx2);
        broker.release(user);
        assert_eq!(broker.channel_count(), 0);
    }

    #[tokio::test]
    async fn channels_are_isolated_per_principal() {
        let broker = ProgressBroker::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let mut alice_rx = broker.subscribe(alice);
        let mut bob_rx = broker.subscribe(bob);

        broker.publish(alice, update(UpdateType::RepositoryCreated));
        broker.close(alice);
        broker.close(bob);

        assert!(alice_rx.recv().await.is_ok());
        assert!(matches!(
            bob_rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
