//! Stage Fan-Out Coordinator: run every unit of a stage concurrently under a
//! shared cap and collect the results in submission order.
//!
//! ```text
//!  units ──▶ FuturesUnordered ──▶ Semaphore (N permits, FIFO) ──▶ unit future
//!                                                                    │
//!  Vec<T> ◀── slot[i] ◀─────────────────────────────────────────────┘
//! ```
//!
//! The semaphore belongs to the [`FanOut`] value, and clones share it: every
//! stage run through the same extractor competes for the same N permits, so N
//! bounds in-flight model calls process-wide rather than per stage.
//!
//! The first unit error ends the run. Returning drops the `FuturesUnordered`,
//! which drops every sibling future still waiting or in flight; their permits
//! are released and no partial result escapes.

use crate::error::MenuExtractError;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// Concurrency-bounded fan-out/fan-in.
#[derive(Debug, Clone)]
pub struct FanOut {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl FanOut {
    /// A coordinator allowing at most `limit` units in flight (minimum 1).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits not currently held by a unit.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run every future in `units`, each holding one permit for its whole
    /// lifetime. Returns the outputs in the order of `units`, or the first
    /// error any unit produced.
    pub async fn run_bounded<T, E, F>(&self, units: Vec<F>) -> Result<Vec<T>, MenuExtractError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<MenuExtractError>,
    {
        let total = units.len();
        debug!(
            "Fan-out: {} unit(s), {} of {} permit(s) free",
            total,
            self.available(),
            self.limit
        );

        let permits = &self.permits;
        let mut pending: FuturesUnordered<_> = units
            .into_iter()
            .enumerate()
            .map(|(slot, unit)| async move {
                let _permit = match permits.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return Err(MenuExtractError::Internal(
                            "concurrency limiter was closed".into(),
                        ))
                    }
                };
                match unit.await {
                    Ok(value) => Ok((slot, value)),
                    Err(e) => Err(e.into()),
                }
            })
            .collect();

        let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(total).collect();
        while let Some(result) = pending.next().await {
            let (slot, value) = result?;
            slots[slot] = Some(value);
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(i, value)| {
                value.ok_or_else(|| {
                    MenuExtractError::Internal(format!("unit {} produced no result", i))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tokio::time::sleep;

    /// Tracks how many units are active at once.
    #[derive(Default)]
    struct Gauge {
        active: AtomicUsize,
        peak: AtomicUsize,
        finished: AtomicUsize,
    }

    impl Gauge {
        async fn work(&self, millis: u64) {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(millis)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn never_exceeds_limit() {
        let fan = FanOut::new(4);
        let gauge = Gauge::default();
        let units: Vec<_> = (0..10)
            .map(|i| {
                let gauge = &gauge;
                async move {
                    gauge.work(20).await;
                    Ok::<_, MenuExtractError>(i)
                }
            })
            .collect();

        let out = fan.run_bounded(units).await.unwrap();
        assert_eq!(out, (0..10).collect::<Vec<_>>());
        assert!(gauge.peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 4);
        assert_eq!(fan.available(), 4);
    }

    #[tokio::test]
    async fn preserves_submission_order_under_reversed_latency() {
        let fan = FanOut::new(8);
        let units: Vec<_> = (0..8u64)
            .map(|i| async move {
                sleep(Duration::from_millis(80 - i * 10)).await;
                Ok::<_, MenuExtractError>(i)
            })
            .collect();
        let out = fan.run_bounded(units).await.unwrap();
        assert_eq!(out, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn first_error_cancels_siblings() {
        let fan = FanOut::new(3);
        let gauge = Gauge::default();
        let start = Instant::now();
        let units: Vec<_> = (0..6)
            .map(|i| {
                let gauge = &gauge;
                async move {
                    if i == 1 {
                        sleep(Duration::from_millis(10)).await;
                        return Err(MenuExtractError::Internal("boom".into()));
                    }
                    gauge.work(2_000).await;
                    Ok(i)
                }
            })
            .collect();

        let err = fan.run_bounded(units).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert!(start.elapsed() < Duration::from_millis(1_500));
        assert_eq!(gauge.finished.load(Ordering::SeqCst), 0);
        assert_eq!(fan.available(), 3);
    }

    #[tokio::test]
    async fn clones_share_one_cap() {
        let fan = FanOut::new(2);
        let other = fan.clone();
        let gauge = Gauge::default();
        let batch = |n: usize| -> Vec<_> {
            (0..n)
                .map(|_| {
                    let gauge = &gauge;
                    async move {
                        gauge.work(15).await;
                        Ok::<_, MenuExtractError>(())
                    }
                })
                .collect()
        };

        let (a, b) = tokio::join!(fan.run_bounded(batch(4)), other.run_bounded(batch(4)));
        a.unwrap();
        b.unwrap();
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn empty_input_yields_empty_output() {
        let fan = FanOut::new(2);
        let units: Vec<std::future::Ready<Result<u8, MenuExtractError>>> = Vec::new();
        assert!(fan.run_bounded(units).await.unwrap().is_empty());
    }

    #[test]
    fn limit_is_at_least_one() {
        assert_eq!(FanOut::new(0).limit(), 1);
    }
}
