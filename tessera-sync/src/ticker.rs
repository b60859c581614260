//! Cancellable fixed-interval timers feeding a peer's event loop.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::protocol::Topic;

/// Spawns per-topic tick tasks that report into one channel.
///
/// Each tick is delivered as the topic it belongs to, so the event loop can
/// route it to the widget that started the timer. Ticks arriving after
/// cancellation are possible (one may already be queued) and must be
/// tolerated by the receiver.
#[derive(Debug, Clone)]
pub struct Ticker {
    tx: mpsc::UnboundedSender<Topic>,
    interval: Duration,
}

impl Ticker {
    pub fn new(tx: mpsc::UnboundedSender<Topic>, interval: Duration) -> Self {
        Self { tx, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking `topic` every interval until the token is cancelled.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, topic: Topic) -> CancellationToken {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let tx = self.tx.clone();
        let period = self.interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {
                        if tx.send(topic.clone()).is_err() {
                            break;
                        }
                    }
                }
            }
            log::trace!("Ticker for {topic} stopped");
        });

        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_cancelled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ticker = Ticker::new(tx, Duration::from_millis(33));
        let topic = Topic::new("map_animation").unwrap();

        let token = ticker.start(topic.clone());
        for _ in 0..3 {
            assert_eq!(rx.recv().await.unwrap(), topic);
        }

        token.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }
}
