//! Periodic task driver and log throttling.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::info;

/// A unit of work the scheduler runs over and over with a fixed delay
/// between completions. Cycles are expected to swallow their own errors;
/// anything that escapes would end the task.
#[async_trait]
pub trait PeriodicTask: Send {
    fn name(&self) -> &'static str;
    async fn run_cycle(&mut self);
}

/// Drive a task forever: run a cycle, sleep the delay, repeat.
///
/// The delay is between cycle completions, not cycle starts, so a slow
/// cycle never overlaps the next one.
pub async fn run_periodic<T: PeriodicTask>(mut task: T, delay: Duration) {
    info!(task = task.name(), delay_secs = delay.as_secs(), "periodic task started");
    loop {
        task.run_cycle().await;
        tokio::time::sleep(delay).await;
    }
}

/// Rate limiter for repetitive log lines and notifications.
#[derive(Debug)]
pub struct Throttle {
    every: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(every: Duration) -> Self {
        Self { every, last: None }
    }

    /// True at most once per interval. The first call is always true.
    pub fn ready(&mut self) -> bool {
        match self.last {
            Some(last) if last.elapsed() < self.every => false,
            _ => {
                self.last = Some(Instant::now());
                true
            }
        }
    }
}
