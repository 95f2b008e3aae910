//! Fixed-interval background jobs.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Run `job` immediately and then every `period` until the handle is aborted.
///
/// A slow run delays the next tick instead of bunching missed ones.
pub fn spawn_periodic<F, Fut>(task: &'static str, period: Duration, mut job: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            tracing::debug!(task, "running periodic job");
            job().await;
        }
    })
}
