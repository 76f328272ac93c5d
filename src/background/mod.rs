// src/background/mod.rs
// Fire-and-forget embedding pipeline: a bounded in-process queue of
// observation ids drained by a worker task off the request-serving path
//
// The queue holds at most 1024 pending ids; on overflow the oldest entry is
// dropped with a warning. Every embedding failure is swallowed at debug
// level - the observation is already persisted and the lexical half of
// retrieval still returns it.

use crate::db::observations::get_observation_sync;
use crate::db::pool::DatabasePool;
use crate::embeddings::EmbeddingClient;
use crate::search::{compose_embed_text, VectorIndex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Maximum pending ids before drop-oldest kicks in.
const QUEUE_CAPACITY: usize = 1024;

/// Bounded queue of observation ids awaiting embedding.
#[derive(Clone)]
pub struct EmbedQueue {
    inner: Arc<Mutex<VecDeque<i64>>>,
    notify: Arc<Notify>,
}

impl Default for EmbedQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbedQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Enqueue an observation for embedding. Never blocks: on overflow the
    /// oldest pending id is dropped with a warning.
    pub fn enqueue(&self, observation_id: i64) {
        {
            #[allow(clippy::expect_used)] // a poisoned queue lock is unrecoverable
            let mut queue = self.inner.lock().expect("embed queue lock poisoned");
            if queue.len() >= QUEUE_CAPACITY {
                if let Some(dropped) = queue.pop_front() {
                    tracing::warn!(
                        dropped,
                        "Embedding queue full, dropping oldest pending observation"
                    );
                }
            }
            queue.push_back(observation_id);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<i64> {
        #[allow(clippy::expect_used)]
        self.inner.lock().expect("embed queue lock poisoned").pop_front()
    }

    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.inner.lock().expect("embed queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn wake_all(&self) {
        self.notify.notify_waiters();
        // notify_one stores a permit, closing the race where the worker
        // checks the flag and parks between the two calls
        self.notify.notify_one();
    }
}

/// Spawn the embedding worker task.
///
/// The worker drains the queue until `shutdown` is set; set the flag, then
/// call [`EmbedQueue::enqueue`]-side `notify` via [`shutdown_worker`].
pub fn spawn_embed_worker(
    queue: EmbedQueue,
    pool: Arc<DatabasePool>,
    vector: Arc<VectorIndex>,
    embedder: Arc<EmbeddingClient>,
    shutdown: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            match queue.pop() {
                Some(id) => {
                    embed_one(&pool, &vector, &embedder, id).await;
                }
                None => {
                    queue.notify.notified().await;
                }
            }
        }
        tracing::debug!("Embedding worker stopped");
    })
}

/// Signal the worker to stop and wake it if it is parked.
pub fn shutdown_worker(queue: &EmbedQueue, shutdown: &AtomicBool) {
    shutdown.store(true, Ordering::Relaxed);
    queue.wake_all();
}

/// Embed one observation and persist its vector. All failures are
/// swallowed: a missing row (deleted since enqueue) or a provider error
/// leaves the observation lexical-only.
async fn embed_one(
    pool: &Arc<DatabasePool>,
    vector: &Arc<VectorIndex>,
    embedder: &Arc<EmbeddingClient>,
    observation_id: i64,
) {
    let obs = match pool
        .run(move |conn| get_observation_sync(conn, observation_id))
        .await
    {
        Ok(Some(obs)) => obs,
        Ok(None) => {
            tracing::debug!(observation_id, "Observation gone before embedding, skipping");
            return;
        }
        Err(e) => {
            tracing::debug!(observation_id, "Failed to load observation for embedding: {}", e);
            return;
        }
    };

    let text = compose_embed_text(
        &obs.title,
        obs.text.as_deref(),
        obs.narrative.as_deref(),
        obs.concepts.as_deref(),
    );

    match embedder.embed(&text).await {
        Ok(embedding) => {
            if let Err(e) = vector.put(obs.id, &embedding, &embedder.model_name()).await {
                tracing::debug!(observation_id, "Failed to store embedding: {}", e);
            }
        }
        Err(e) => {
            tracing::debug!(observation_id, "Embedding failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_and_pop_fifo() {
        let queue = EmbedQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let queue = EmbedQueue::new();
        for id in 0..(QUEUE_CAPACITY as i64 + 10) {
            queue.enqueue(id);
        }
        assert_eq!(queue.len(), QUEUE_CAPACITY);
        // Ids 0..10 were dropped; the queue starts at 10
        assert_eq!(queue.pop(), Some(10));
    }

    #[tokio::test]
    async fn test_worker_exits_on_shutdown() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let vector = Arc::new(VectorIndex::new(pool.clone(), None));
        // A worker needs an embedder; fabricate an Ollama client pointing at
        // a closed port. It is never called because the queue stays empty.
        let embedder = Arc::new(
            crate::embeddings::EmbeddingClient::from_config(
                &crate::config::ProviderKeys {
                    openai: None,
                    ollama: Some("http://127.0.0.1:1".to_string()),
                },
                &crate::config::EmbeddingsConfig::default(),
            )
            .unwrap(),
        );

        let queue = EmbedQueue::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = spawn_embed_worker(
            queue.clone(),
            pool,
            vector,
            embedder,
            shutdown.clone(),
        );

        shutdown_worker(&queue, &shutdown);
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("worker must stop after shutdown")
            .unwrap();
    }
}
