//! Side-effect outbox
//!
//! Best-effort work that must never fail or block a primary operation
//! (timeline entries, notifications, counters, summary generation) is
//! enqueued here and processed by a background worker with a named retry
//! policy per task. Exhausted retries are logged and dropped; the primary
//! write has already committed.

use futures::future::BoxFuture;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::types::Result;

/// Attempt schedule for a side effect: one entry per attempt, each the
/// delay before that attempt runs.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub delays: &'static [Duration],
}

impl RetryPolicy {
    /// Single attempt, immediately
    pub const SINGLE: RetryPolicy = RetryPolicy {
        delays: &[Duration::ZERO],
    };

    /// Summary generation: attempt at 0s/5s/15s
    pub const SUMMARY: RetryPolicy = RetryPolicy {
        delays: &[
            Duration::ZERO,
            Duration::from_secs(5),
            Duration::from_secs(15),
        ],
    };

    pub fn attempts(&self) -> usize {
        self.delays.len()
    }
}

type EffectFn = Box<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// One queued side effect
pub struct SideEffect {
    label: &'static str,
    policy: RetryPolicy,
    run: EffectFn,
}

impl SideEffect {
    pub fn new<F>(label: &'static str, policy: RetryPolicy, run: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        Self {
            label,
            policy,
            run: Box::new(run),
        }
    }
}

/// Handle for enqueuing side effects
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<SideEffect>,
}

impl Outbox {
    /// Start the outbox worker and return the enqueue handle
    pub fn start(queue_size: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<SideEffect>(queue_size);

        tokio::spawn(async move {
            info!("side-effect worker started (queue size {})", queue_size);
            while let Some(effect) = rx.recv().await {
                // Effects are independent; a slow retry schedule must not
                // hold up the queue
                tokio::spawn(run_with_retries(effect));
            }
            info!("side-effect worker stopped");
        });

        Self { tx }
    }

    /// Fire-and-forget enqueue. A full queue drops the effect with a log
    /// line; the durable state it derives from is already committed.
    pub fn enqueue(&self, effect: SideEffect) {
        let label = effect.label;
        if let Err(e) = self.tx.try_send(effect) {
            warn!("side effect '{}' dropped: {}", label, e);
        }
    }
}

async fn run_with_retries(effect: SideEffect) {
    let attempts = effect.policy.attempts();

    for (attempt, delay) in effect.policy.delays.iter().enumerate() {
        if !delay.is_zero() {
            tokio::time::sleep(*delay).await;
        }

        match (effect.run)().await {
            Ok(()) => {
                debug!(
                    label = effect.label,
                    attempt = attempt + 1,
                    "side effect completed"
                );
                return;
            }
            Err(e) => {
                warn!(
                    label = effect.label,
                    attempt = attempt + 1,
                    attempts,
                    "side effect attempt failed: {}",
                    e
                );
            }
        }
    }

    error!(
        label = effect.label,
        attempts, "side effect exhausted its retry schedule"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const EAGER: RetryPolicy = RetryPolicy {
        delays: &[Duration::ZERO, Duration::ZERO, Duration::ZERO],
    };

    #[tokio::test]
    async fn test_effect_retries_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let effect = SideEffect::new("flaky", EAGER, move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Internal("transient".into()))
                } else {
                    Ok(())
                }
            })
        });

        run_with_retries(effect).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_effect_stops_after_exhaustion() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let effect = SideEffect::new("doomed", EAGER, move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Internal("permanent".into()))
            })
        });

        run_with_retries(effect).await;
        assert_eq!(attempts.load(Ordering::SeqCst), EAGER.attempts());
    }

    #[tokio::test]
    async fn test_outbox_processes_enqueued_effects() {
        let outbox = Outbox::start(8);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));

        outbox.enqueue(SideEffect::new("notify-test", RetryPolicy::SINGLE, move || {
            let tx = Arc::clone(&tx);
            Box::pin(async move {
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(());
                }
                Ok(())
            })
        }));

        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("effect should run")
            .expect("effect should signal");
    }

    #[test]
    fn test_summary_schedule() {
        assert_eq!(RetryPolicy::SUMMARY.attempts(), 3);
        assert_eq!(RetryPolicy::SUMMARY.delays[0], Duration::ZERO);
        assert_eq!(RetryPolicy::SUMMARY.delays[1], Duration::from_secs(5));
        assert_eq!(RetryPolicy::SUMMARY.delays[2], Duration::from_secs(15));
    }
}
