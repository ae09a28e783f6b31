//! Wall-clock aligned periodic refresh.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use time::PrimitiveDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::time_ctx::Clock;

const MS_PER_DAY: u64 = 86_400_000;

/// Time until the next multiple of `interval` on the local clock.
///
/// Aligns on milliseconds since local midnight, so a 15 minute interval
/// lands on :00, :15, :30 and :45. A zero interval yields zero.
#[must_use]
pub fn aligned_delay(now: PrimitiveDateTime, interval: Duration) -> Duration {
    let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    if interval_ms == 0 {
        return Duration::ZERO;
    }
    let (hour, minute, second, milli) = now.time().as_hms_milli();
    let ms_of_day = u64::from(hour) * 3_600_000
        + u64::from(minute) * 60_000
        + u64::from(second) * 1_000
        + u64::from(milli);
    let remainder = ms_of_day % interval_ms.min(MS_PER_DAY);
    Duration::from_millis(interval_ms.min(MS_PER_DAY) - remainder)
}

/// Runs `tick` on the first aligned boundary, then every `period`.
pub fn spawn_aligned<F, Fut>(clock: Arc<dyn Clock>, period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if period.is_zero() {
            return;
        }
        tokio::time::sleep(aligned_delay(clock.now(), period)).await;
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            tick().await;
        }
    })
}
