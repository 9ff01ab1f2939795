//! Injectable time sources for the watchdog.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Resolves once `after` has elapsed.
#[async_trait]
pub trait DeadlineTimer: Send + Sync {
    async fn expire(&self, after: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTimer;

#[async_trait]
impl DeadlineTimer for TokioTimer {
    async fn expire(&self, after: Duration) {
        tokio::time::sleep(after).await;
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
