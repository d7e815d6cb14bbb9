//! Worker pool - queue consumption with per-phone serialization
//!
//! Events for different merchants run concurrently; events for the same
//! phone identity are serialized through a per-phone mutex so the state
//! machine never sees interleaved writes for one conversation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::domain::entities::InboundEvent;
use crate::domain::phone::normalize_phone;
use crate::domain::traits::Channel;

use super::services::ConversationService;

/// Map size at which idle lock entries are swept out.
const EVICT_THRESHOLD: usize = 1024;

/// One mutex per normalized phone identity, created on first use.
///
/// Idle entries (no worker holding a clone of the `Arc`) are evicted
/// whenever the map reaches [`EVICT_THRESHOLD`], so the map tracks the
/// set of active conversations rather than every sender ever seen.
#[derive(Default)]
pub struct PhoneLocks {
    inner: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PhoneLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, phone: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if map.len() >= EVICT_THRESHOLD {
            // The map's own Arc is the only reference to an idle lock;
            // any outstanding worker clone keeps its entry alive.
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        map.entry(phone.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

/// Spawn `count` workers draining the shared receiver. Workers exit when
/// the sender side closes.
pub fn spawn_workers(
    count: usize,
    receiver: mpsc::Receiver<InboundEvent>,
    service: Arc<ConversationService>,
    channel: Arc<dyn Channel>,
) -> Vec<JoinHandle<()>> {
    let receiver = Arc::new(Mutex::new(receiver));
    let locks = Arc::new(PhoneLocks::new());

    (0..count)
        .map(|worker_id| {
            let receiver = Arc::clone(&receiver);
            let locks = Arc::clone(&locks);
            let service = Arc::clone(&service);
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                tracing::debug!(worker_id, "worker started");
                loop {
                    // Hold the receiver lock only for the recv itself.
                    let event = { receiver.lock().await.recv().await };
                    let Some(event) = event else {
                        tracing::debug!(worker_id, "queue closed, worker exiting");
                        break;
                    };
                    process_event(worker_id, &event, &locks, &service, &channel).await;
                }
            })
        })
        .collect()
}

async fn process_event(
    worker_id: usize,
    event: &InboundEvent,
    locks: &PhoneLocks,
    service: &ConversationService,
    channel: &Arc<dyn Channel>,
) {
    let phone = normalize_phone(&event.sender);
    let lock = locks.lock_for(&phone);
    let _guard = lock.lock().await;

    tracing::info!(worker_id, event_id = %event.id, %phone, "processing event");
    if let Err(e) = service.handle_event(event).await {
        tracing::error!(worker_id, event_id = %event.id, "event failed: {}", e);
        // Best-effort apology; the event itself is not retried.
        if let Err(send_err) = channel
            .send(
                &event.sender,
                "⚠️ Something went wrong on my side. Please try again in a moment.",
                None,
            )
            .await
        {
            tracing::warn!("failure notice not delivered: {}", send_err);
        }
    }
}
