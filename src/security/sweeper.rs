//! Background eviction of cold rate-limit state.
//!
//! Identifiers that stop sending requests would otherwise keep their window
//! and ban entries forever. The sweeper wakes on a fixed interval and whenever
//! the limiter signals that its request-count threshold was crossed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, MissedTickBehavior};

use crate::security::rate_limit::RateLimiter;

pub struct Sweeper {
    limiter: Arc<RateLimiter>,
    interval: Duration,
    trigger: Option<mpsc::Receiver<()>>,
}

impl Sweeper {
    pub fn new(limiter: Arc<RateLimiter>, interval: Duration) -> Self {
        Self {
            limiter,
            interval,
            trigger: None,
        }
    }

    /// Also sweep when the limiter asks for it.
    pub fn with_trigger(mut self, trigger: mpsc::Receiver<()>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval = ?self.interval, "Rate limit sweeper starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing to sweep yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep("interval"),
                Some(()) = recv_trigger(&mut self.trigger) => self.sweep("threshold"),
                _ = shutdown.recv() => {
                    tracing::info!("Sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn sweep(&self, cause: &'static str) {
        let report = self.limiter.sweep();
        if report.windows_evicted + report.bans_expired > 0 {
            tracing::debug!(
                cause,
                windows = report.windows_evicted,
                bans = report.bans_expired,
                "Swept expired rate limit state"
            );
        }
    }
}

async fn recv_trigger(trigger: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match trigger {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::security::clock::ManualClock;

    #[tokio::test]
    async fn test_threshold_trigger_sweeps_and_shutdown_stops() {
        let clock = Arc::new(ManualClock::new(0));
        let (limiter, trigger) = RateLimiter::new(clock.clone()).with_sweep_trigger(2);
        let limiter = Arc::new(limiter);
        let cfg = RateLimitConfig {
            window_ms: 100,
            ..RateLimitConfig::default()
        };

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let sweeper = Sweeper::new(limiter.clone(), Duration::from_secs(3600)).with_trigger(trigger);
        let task = tokio::spawn(sweeper.run(shutdown_rx));

        limiter.check("old", &cfg);
        clock.advance(200);
        limiter.check("new", &cfg);

        let mut evicted = false;
        for _ in 0..50 {
            if limiter.stats().active_windows == 1 {
                evicted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(evicted, "threshold sweep should evict the closed window");

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
