//! Ordered, restartable event streams
//!
//! `watch` replays the log from a known resource version, then switches to
//! the live broadcast channel, suppressing duplicates by version. The
//! stream is finite per connection: it ends when the consumer drops it or
//! the store shuts down, and consumers re-subscribe from the last version
//! they saw to avoid gaps.

use std::sync::Arc;

use futures::Stream;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::RegistryResult;
use crate::store::ResourceStore;
use crate::types::Event;

/// Open an ordered event stream starting after `since` (or from the
/// beginning of the log when `None`).
///
/// The live subscription is opened before the replay snapshot is taken, so
/// an event committed during replay is never missed; it is deduplicated by
/// resource version instead.
pub async fn watch(
    store: Arc<dyn ResourceStore>,
    since: Option<u64>,
) -> RegistryResult<impl Stream<Item = Event> + Send> {
    let live = store.subscribe();
    let floor = since.unwrap_or(0);
    let replay = store.events_since(floor).await?;

    Ok(async_stream::stream! {
        let mut last_seen = floor;
        for event in replay {
            last_seen = event.resource_version;
            yield event;
        }

        let mut live = live;
        loop {
            match live.recv().await {
                Ok(event) => {
                    // Already delivered during replay
                    if event.resource_version <= last_seen {
                        continue;
                    }
                    last_seen = event.resource_version;
                    yield event;
                }
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // The consumer re-requests from its last seen version
                    // to recover anything dropped here
                    debug!(skipped, "Watch consumer lagged");
                    continue;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::{AgentRegistration, EventType};
    use futures::StreamExt;
    use std::time::Duration;

    fn registration(id: &str) -> AgentRegistration {
        AgentRegistration::new(id, format!("Agent {}", id), format!("http://{}:9000", id))
    }

    #[tokio::test]
    async fn test_replay_then_live() {
        let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::default());
        store.upsert_agent(registration("a1")).await.unwrap();

        let stream = watch(store.clone(), None).await.unwrap();
        tokio::pin!(stream);

        // Replayed event
        let first = stream.next().await.unwrap();
        assert_eq!(first.event_type, EventType::Added);
        assert_eq!(first.agent.id, "a1");

        // Live event
        store.upsert_agent(registration("a2")).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.agent.id, "a2");
        assert!(second.resource_version > first.resource_version);
    }

    #[tokio::test]
    async fn test_since_skips_older_events() {
        let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::default());
        store.upsert_agent(registration("a1")).await.unwrap();
        let marker = store.upsert_agent(registration("a2")).await.unwrap();
        store.upsert_agent(registration("a3")).await.unwrap();

        let stream = watch(store.clone(), Some(marker.resource_version))
            .await
            .unwrap();
        tokio::pin!(stream);

        let event = stream.next().await.unwrap();
        assert_eq!(event.agent.id, "a3");
    }

    #[tokio::test]
    async fn test_no_duplicates_across_replay_boundary() {
        let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::default());
        for i in 0..5 {
            store
                .upsert_agent(registration(&format!("a{}", i)))
                .await
                .unwrap();
        }

        let stream = watch(store.clone(), None).await.unwrap();
        tokio::pin!(stream);

        let mut seen = Vec::new();
        for _ in 0..5 {
            let event = stream.next().await.unwrap();
            seen.push(event.resource_version);
        }
        let mut sorted = seen.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(seen, sorted);
    }

    #[tokio::test]
    async fn test_stream_ends_when_store_dropped() {
        let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::default());
        store.upsert_agent(registration("a1")).await.unwrap();

        let stream = watch(store.clone(), None).await.unwrap();
        tokio::pin!(stream);
        assert!(stream.next().await.is_some());

        drop(store);
        let end = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert!(end.is_none());
    }
}
