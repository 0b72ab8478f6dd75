//! Heartbeat - 実行中タスクの進捗通知
//!
//! A child task that ticks while one process runs. Dropping the returned
//! `Heartbeat` cancels it, so it can never outlive its TaskRun.

use std::time::{Duration, Instant};

use tokio_util::sync::{CancellationToken, DropGuard};

pub struct Heartbeat {
    _guard: DropGuard,
}

impl Heartbeat {
    /// Call `on_tick(elapsed)` every `interval`, first after one interval.
    pub fn start<F>(interval: Duration, mut on_tick: F) -> Self
    where
        F: FnMut(Duration) + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let started = Instant::now();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => on_tick(started.elapsed()),
                }
            }
        });

        Self {
            _guard: token.drop_guard(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn ticks_until_dropped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        let heartbeat = Heartbeat::start(Duration::from_millis(20), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(150)).await;
        drop(heartbeat);

        let at_drop = ticks.load(Ordering::SeqCst);
        assert!(at_drop >= 2, "expected several ticks, got {at_drop}");

        // ticker task has been cancelled; allow one in-flight tick at most
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(ticks.load(Ordering::SeqCst) <= at_drop + 1);
    }
}
