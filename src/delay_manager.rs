use std::time::Duration;

use log::{debug, info};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::config::DelayConfig;

/// Pause after a scroll request: fixed base plus random jitter, so the
/// request cadence is never constant.
pub async fn scroll_delay(config: &DelayConfig, cancel: &CancellationToken) -> bool {
    let wait = jittered(config.scroll_base_ms, config.scroll_jitter_ms);
    debug!("Waiting {:?} for more results to load...", wait);
    sleep_or_cancel(wait, cancel).await
}

/// Pause between two batches of regions.
pub async fn batch_delay(config: &DelayConfig, cancel: &CancellationToken) -> bool {
    let wait = between(config.batch_min_ms, config.batch_max_ms);
    info!("Waiting for {:.1} seconds (Batch Delay)...", wait.as_secs_f64());
    sleep_or_cancel(wait, cancel).await
}

/// Backoff before retrying a region: doubles per failed attempt, with jitter.
pub async fn retry_delay(config: &DelayConfig, failed_attempts: u32, cancel: &CancellationToken) -> bool {
    let base = config.retry_base_ms.saturating_mul(1 << failed_attempts.saturating_sub(1).min(6));
    let wait = jittered(base, base / 2);
    info!("Retrying in {:?}...", wait);
    sleep_or_cancel(wait, cancel).await
}

/// Sleeps for `wait`. Returns `false` if the token fired first.
pub async fn sleep_or_cancel(wait: Duration, cancel: &CancellationToken) -> bool {
    if wait.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(wait) => true,
    }
}

fn jittered(base_ms: u64, jitter_ms: u64) -> Duration {
    let extra = if jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_ms)
    };
    Duration::from_millis(base_ms + extra)
}

fn between(min_ms: u64, max_ms: u64) -> Duration {
    if max_ms <= min_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}
