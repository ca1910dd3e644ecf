//! Periodic throughput sampling over the shared byte counter.
//!
//! The reporter runs as its own task so the sampling and formatting cost
//! stays out of the stream workers' write path.

use crate::counter::ByteCounter;
use log::info;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// One throughput sample covering a single reporting interval.
#[derive(Debug, Clone, PartialEq)]
pub struct RateSample {
    /// Offset of the interval start from the beginning of the run.
    pub start: Duration,
    /// Offset of the interval end from the beginning of the run.
    pub end: Duration,
    /// Bytes sent during the interval.
    pub bytes: u64,
    /// Throughput over the interval.
    pub bits_per_second: f64,
}

/// Shared, append-only record of the samples taken during a run.
pub(crate) type SampleHistory = Arc<Mutex<Vec<RateSample>>>;

/// Samples the shared byte counter on a fixed interval.
pub(crate) struct ThroughputReporter {
    counter: ByteCounter,
    every: Duration,
    history: SampleHistory,
    sink: Option<mpsc::UnboundedSender<RateSample>>,
}

impl ThroughputReporter {
    pub(crate) fn new(counter: ByteCounter, every: Duration, history: SampleHistory) -> Self {
        Self {
            counter,
            every,
            history,
            sink: None,
        }
    }

    pub(crate) fn with_sink(mut self, sink: mpsc::UnboundedSender<RateSample>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Runs until cancelled, emitting one sample per elapsed interval.
    pub(crate) async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let started = tokio::time::Instant::now();
        let mut last_total = self.counter.total();
        let mut last_at = Duration::ZERO;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let now = started.elapsed();
            let total = self.counter.total();
            let bytes = total - last_total;
            let secs = (now - last_at).as_secs_f64();
            let bits_per_second = if secs > 0.0 {
                bytes as f64 * 8.0 / secs
            } else {
                0.0
            };

            info!(
                "{:.2}-{:.2} sec  {bytes} bytes  {:.1} Mbits/sec",
                last_at.as_secs_f64(),
                now.as_secs_f64(),
                bits_per_second / 1e6
            );

            let sample = RateSample {
                start: last_at,
                end: now,
                bytes,
                bits_per_second,
            };
            self.history.lock().push(sample.clone());
            if let Some(sink) = &self.sink {
                let _ = sink.send(sample);
            }

            last_total = total;
            last_at = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::yield_now;

    fn make_reporter(
        counter: &ByteCounter,
    ) -> (
        ThroughputReporter,
        mpsc::UnboundedReceiver<RateSample>,
        SampleHistory,
    ) {
        let history: SampleHistory = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = ThroughputReporter::new(counter.clone(), Duration::from_secs(1), history.clone())
            .with_sink(tx);
        (reporter, rx, history)
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_interval_deltas() {
        let counter = ByteCounter::new();
        let (reporter, mut rx, history) = make_reporter(&counter);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reporter.run(cancel.clone()));
        yield_now().await;

        counter.add(1000);
        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.bytes, 1000);
        assert_eq!(sample.start, Duration::ZERO);
        assert_eq!(sample.end, Duration::from_secs(1));
        assert!((sample.bits_per_second - 8000.0).abs() < 1e-6);

        counter.add(500);
        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.bytes, 500);
        assert_eq!(sample.start, Duration::from_secs(1));
        assert_eq!(sample.end, Duration::from_secs(2));

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(history.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_interval_samples_zero_bytes() {
        let counter = ByteCounter::new();
        let (reporter, mut rx, _history) = make_reporter(&counter);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reporter.run(cancel.clone()));
        yield_now().await;

        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.bytes, 0);
        assert_eq!(sample.bits_per_second, 0.0);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_reporter() {
        let counter = ByteCounter::new();
        let (reporter, _rx, history) = make_reporter(&counter);
        let cancel = CancellationToken::new();
        cancel.cancel();

        reporter.run(cancel).await;
        assert!(history.lock().is_empty());
    }
}
