//! Wall-clock frames for progressive reveal.

use std::time::Duration;

use async_trait::async_trait;
use docchat_core::reveal::FrameClock;

/// Frame clock backed by `tokio::time::sleep`.
pub struct TokioFrameClock {
    period: Duration,
}

impl TokioFrameClock {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }
}

#[async_trait]
impl FrameClock for TokioFrameClock {
    async fn next_frame(&self) {
        if !self.period.is_zero() {
            tokio::time::sleep(self.period).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use docchat_core::reveal::{RevealOutcome, RevealScheduler};
    use tokio_util::sync::CancellationToken;

    #[tokio::test(start_paused = true)]
    async fn reveal_waits_one_period_per_frame() {
        let scheduler = RevealScheduler::new(8, Arc::new(TokioFrameClock::from_millis(16)));
        let start = tokio::time::Instant::now();
        let outcome = scheduler
            .run("twenty-four characters!!", &CancellationToken::new(), |_| true)
            .await;
        assert_eq!(outcome, RevealOutcome::Completed { writes: 3 });
        assert_eq!(start.elapsed(), Duration::from_millis(32));
    }
}
