use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct ScheduledTask {
    generation: u64,
    token: CancellationToken,
}

/// Delayed gateway verifications, at most one per transaction.
///
/// A callback that settles the transaction cancels its pending poll.
#[derive(Clone, Default)]
pub struct VerificationScheduler {
    tasks: Arc<DashMap<Uuid, ScheduledTask>>,
    generations: Arc<AtomicU64>,
}

impl VerificationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay` unless cancelled first. Replaces any task
    /// already scheduled for `transaction_id`.
    pub fn schedule<F>(&self, transaction_id: Uuid, delay: Duration, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();

        if let Some(previous) = self.tasks.insert(
            transaction_id,
            ScheduledTask {
                generation,
                token: token.clone(),
            },
        ) {
            previous.token.cancel();
        }

        let tasks = Arc::clone(&self.tasks);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(transaction_id = %transaction_id, "Deferred verification cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    tasks.remove_if(&transaction_id, |_, scheduled| scheduled.generation == generation);
                    tracing::info!(transaction_id = %transaction_id, "Running deferred verification");
                    if let Err(e) = task.await {
                        tracing::warn!(
                            transaction_id = %transaction_id,
                            error = %e,
                            "Deferred verification failed"
                        );
                    }
                }
            }
        });

        tracing::debug!(
            transaction_id = %transaction_id,
            delay_secs = delay.as_secs(),
            "Deferred verification scheduled"
        );
    }

    /// Returns whether a pending task was cancelled.
    pub fn cancel(&self, transaction_id: Uuid) -> bool {
        match self.tasks.remove(&transaction_id) {
            Some((_, scheduled)) => {
                scheduled.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, transaction_id: Uuid) -> bool {
        self.tasks.contains_key(&transaction_id)
    }

    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub fn cancel_all(&self) {
        self.tasks.retain(|_, scheduled| {
            scheduled.token.cancel();
            false
        });
    }
}
