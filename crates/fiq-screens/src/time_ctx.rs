//! Shared time context consumed by every chart and table widget on a screen.
//!
//! One [`TimeController`] (the time-travel bar) owns mutation rights; widgets
//! hold read-only [`TimeView`]s and compute their own query window from it.

use std::sync::Arc;

use parking_lot::Mutex;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};
use tokio::sync::watch;

const LOCAL_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Default cursor window.
pub const DEFAULT_WINDOW_MINUTES: u32 = 60;

/// Viewing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeMode {
    /// "now minus window", recomputed on every fetch.
    #[default]
    Live,
    /// Explicit from/to with a scrubbable cursor.
    Range,
    /// Point-in-time replay around the cursor.
    Cursor,
}

/// Explicit archive range. Either end may be unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeRange {
    /// Range start.
    pub from: Option<PrimitiveDateTime>,
    /// Range end.
    pub to: Option<PrimitiveDateTime>,
}

impl TimeRange {
    /// Returns true if `instant` lies inside a fully specified range.
    #[must_use]
    pub fn contains(&self, instant: PrimitiveDateTime) -> bool {
        match (self.from, self.to) {
            (Some(from), Some(to)) => from <= instant && instant <= to,
            _ => false,
        }
    }
}

/// Concrete query window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// Inclusive start.
    pub start: PrimitiveDateTime,
    /// Inclusive end.
    pub end: PrimitiveDateTime,
}

impl TimeWindow {
    /// Start as a backend timestamp.
    #[must_use]
    pub fn start_text(&self) -> String {
        format_local(self.start)
    }

    /// End as a backend timestamp.
    #[must_use]
    pub fn end_text(&self) -> String {
        format_local(self.end)
    }

    /// Window length.
    #[must_use]
    pub fn span(&self) -> Duration {
        self.end - self.start
    }
}

/// Time context state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeContext {
    /// Current mode.
    pub mode: TimeMode,
    /// Archive range.
    pub range: TimeRange,
    /// Replay cursor.
    pub cursor: Option<PrimitiveDateTime>,
    /// Width of the window centered on the cursor.
    pub window_minutes: u32,
}

impl Default for TimeContext {
    fn default() -> Self {
        Self {
            mode: TimeMode::Live,
            range: TimeRange::default(),
            cursor: None,
            window_minutes: DEFAULT_WINDOW_MINUTES,
        }
    }
}

impl TimeContext {
    /// Returns true when widgets should show "now".
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.mode == TimeMode::Live
    }

    /// Query window for a widget whose live lookback is `range_hours`.
    ///
    /// Range/cursor modes use the explicit range when both ends are set,
    /// otherwise a window centered on the cursor; with neither they fall
    /// back to live behavior.
    #[must_use]
    pub fn window(&self, now: PrimitiveDateTime, range_hours: f64) -> TimeWindow {
        if self.mode != TimeMode::Live {
            if let (Some(from), Some(to)) = (self.range.from, self.range.to) {
                return TimeWindow {
                    start: from,
                    end: to,
                };
            }
            if let Some(cursor) = self.cursor {
                let half = Duration::seconds(i64::from(self.window_minutes) * 30);
                return TimeWindow {
                    start: cursor.checked_sub(half).unwrap_or(cursor),
                    end: cursor.checked_add(half).unwrap_or(cursor),
                };
            }
        }
        live_window(now, range_hours)
    }
}

/// Lookback used when a widget's range is unusable.
const DEFAULT_LOOKBACK: Duration = Duration::HOUR;

fn live_window(now: PrimitiveDateTime, range_hours: f64) -> TimeWindow {
    // Persisted ranges are untrusted: non-positive, non-finite or
    // unrepresentable lookbacks fall back to one hour.
    let start = Some(range_hours)
        .filter(|hours| hours.is_finite() && *hours > 0.0)
        .and_then(|hours| Duration::checked_seconds_f64(hours * 3600.0))
        .and_then(|lookback| now.checked_sub(lookback))
        .or_else(|| now.checked_sub(DEFAULT_LOOKBACK))
        .unwrap_or(now);
    TimeWindow { start, end: now }
}

/// Single writer of a screen's time context.
#[derive(Debug)]
pub struct TimeController {
    tx: watch::Sender<TimeContext>,
}

impl Default for TimeController {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeController {
    /// Starts in live mode with a 60 minute cursor window.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(TimeContext::default());
        Self { tx }
    }

    /// New read-only view for a widget.
    #[must_use]
    pub fn view(&self) -> TimeView {
        TimeView {
            rx: self.tx.subscribe(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn current(&self) -> TimeContext {
        *self.tx.borrow()
    }

    /// Switches mode.
    pub fn set_mode(&self, mode: TimeMode) {
        self.update(|ctx| ctx.mode = mode);
    }

    /// Back to live viewing.
    pub fn go_live(&self) {
        self.set_mode(TimeMode::Live);
    }

    /// Sets the archive range.
    ///
    /// Ends are swapped if given in reverse. In range/cursor mode the cursor
    /// snaps to `from` when it is unset or falls outside the new range.
    pub fn set_range(&self, from: Option<PrimitiveDateTime>, to: Option<PrimitiveDateTime>) {
        let (from, to) = match (from, to) {
            (Some(a), Some(b)) if a > b => (Some(b), Some(a)),
            other => other,
        };
        self.update(|ctx| {
            ctx.range = TimeRange { from, to };
            if ctx.mode != TimeMode::Live {
                let outside = ctx
                    .cursor
                    .is_none_or(|cursor| ctx.range.from.is_some() && !within(&ctx.range, cursor));
                if outside && from.is_some() {
                    ctx.cursor = from;
                }
            }
        });
    }

    /// Moves the replay cursor.
    pub fn set_cursor(&self, cursor: Option<PrimitiveDateTime>) {
        self.update(|ctx| ctx.cursor = cursor);
    }

    /// Sets the cursor window width (at least one minute).
    pub fn set_window_minutes(&self, minutes: u32) {
        self.update(|ctx| ctx.window_minutes = minutes.max(1));
    }

    fn update(&self, change: impl FnOnce(&mut TimeContext)) {
        self.tx.send_if_modified(|ctx| {
            let before = *ctx;
            change(ctx);
            before != *ctx
        });
    }
}

fn within(range: &TimeRange, instant: PrimitiveDateTime) -> bool {
    let after_start = range.from.is_none_or(|from| instant >= from);
    let before_end = range.to.is_none_or(|to| instant <= to);
    after_start && before_end
}

/// Read-only handle on the time context.
#[derive(Debug, Clone)]
pub struct TimeView {
    rx: watch::Receiver<TimeContext>,
}

impl TimeView {
    /// View over a fixed context with no controller behind it.
    #[must_use]
    pub fn fixed(context: TimeContext) -> Self {
        let (_tx, rx) = watch::channel(context);
        Self { rx }
    }

    /// Current state.
    #[must_use]
    pub fn current(&self) -> TimeContext {
        *self.rx.borrow()
    }

    /// Waits for the next change. Returns false once the controller is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Marks the current state as seen.
    pub fn mark_seen(&mut self) -> TimeContext {
        *self.rx.borrow_and_update()
    }
}

/// Source of local wall-clock time.
pub trait Clock: Send + Sync + 'static {
    /// Local time without offset, as sent to the backend.
    fn now(&self) -> PrimitiveDateTime;
}

/// System clock in the local timezone (UTC if the offset is unknown).
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> PrimitiveDateTime {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        PrimitiveDateTime::new(now.date(), now.time())
    }
}

/// Manually driven clock for tests and replay tools.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<PrimitiveDateTime>>,
}

impl ManualClock {
    /// Clock frozen at `now`.
    #[must_use]
    pub fn new(now: PrimitiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    /// Moves the clock.
    pub fn set(&self, now: PrimitiveDateTime) {
        *self.now.lock() = now;
    }

    /// Advances the clock.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = now.checked_add(by).unwrap_or(*now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> PrimitiveDateTime {
        *self.now.lock()
    }
}

/// Formats as `YYYY-MM-DD HH:mm:ss` without any zone suffix.
#[must_use]
pub fn format_local(instant: PrimitiveDateTime) -> String {
    instant.format(LOCAL_FORMAT).unwrap_or_default()
}

/// Parses backend timestamps: `YYYY-MM-DD HH:mm:ss`, ISO `T` separator,
/// fractional seconds and zone suffixes are tolerated (the suffix is ignored).
#[must_use]
pub fn parse_local(text: &str) -> Option<PrimitiveDateTime> {
    let text = text.trim();
    let head = text.get(..19)?;
    let normalized = head.replacen('T', " ", 1);
    PrimitiveDateTime::parse(&normalized, LOCAL_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn live_window_trails_now() {
        let now = datetime!(2024-03-01 12:00:00);
        let window = TimeContext::default().window(now, 6.0);
        assert_eq!(window.start, datetime!(2024-03-01 06:00:00));
        assert_eq!(window.end, now);
        assert_eq!(window.start_text(), "2024-03-01 06:00:00");
    }

    #[test]
    fn unusable_live_ranges_fall_back_to_one_hour() {
        let now = datetime!(2024-03-01 10:00:00);
        let hour_back = datetime!(2024-03-01 09:00:00);
        for hours in [1e20, f64::MAX, 1e9, f64::NAN, f64::INFINITY, -3.0, 0.0] {
            let window = TimeContext::default().window(now, hours);
            assert_eq!(window.start, hour_back, "hours = {hours}");
            assert_eq!(window.end, now);
        }
    }

    #[test]
    fn explicit_range_wins_over_cursor() {
        let ctx = TimeContext {
            mode: TimeMode::Range,
            range: TimeRange {
                from: Some(datetime!(2024-01-01 00:00:00)),
                to: Some(datetime!(2024-01-02 00:00:00)),
            },
            cursor: Some(datetime!(2024-01-01 12:00:00)),
            window_minutes: 60,
        };
        let window = ctx.window(datetime!(2024-03-01 12:00:00), 1.0);
        assert_eq!(window.start, datetime!(2024-01-01 00:00:00));
        assert_eq!(window.end, datetime!(2024-01-02 00:00:00));
    }

    #[test]
    fn cursor_only_centers_the_window() {
        let ctx = TimeContext {
            mode: TimeMode::Cursor,
            cursor: Some(datetime!(2024-01-01 12:00:00)),
            window_minutes: 30,
            ..TimeContext::default()
        };
        let window = ctx.window(datetime!(2024-03-01 12:00:00), 1.0);
        assert_eq!(window.start, datetime!(2024-01-01 11:45:00));
        assert_eq!(window.end, datetime!(2024-01-01 12:15:00));
    }

    #[test]
    fn range_mode_without_range_or_cursor_behaves_live() {
        let ctx = TimeContext {
            mode: TimeMode::Range,
            ..TimeContext::default()
        };
        let now = datetime!(2024-03-01 12:00:00);
        assert_eq!(ctx.window(now, 2.0), TimeContext::default().window(now, 2.0));
    }

    #[test]
    fn selecting_a_range_snaps_an_outside_cursor() {
        let controller = TimeController::new();
        controller.set_mode(TimeMode::Range);
        controller.set_cursor(Some(datetime!(2023-12-31 00:00:00)));
        controller.set_range(
            Some(datetime!(2024-01-02 00:00:00)),
            Some(datetime!(2024-01-01 00:00:00)),
        );
        let ctx = controller.current();
        assert_eq!(ctx.range.from, Some(datetime!(2024-01-01 00:00:00)));
        assert_eq!(ctx.cursor, Some(datetime!(2024-01-01 00:00:00)));

        controller.set_cursor(Some(datetime!(2024-01-01 06:00:00)));
        controller.set_range(
            Some(datetime!(2024-01-01 00:00:00)),
            Some(datetime!(2024-01-03 00:00:00)),
        );
        assert_eq!(
            controller.current().cursor,
            Some(datetime!(2024-01-01 06:00:00))
        );
    }

    #[test]
    fn live_mode_range_selection_keeps_cursor() {
        let controller = TimeController::new();
        controller.set_range(Some(datetime!(2024-01-01 00:00:00)), None);
        assert_eq!(controller.current().cursor, None);
    }

    #[tokio::test]
    async fn views_observe_controller_changes() {
        let controller = TimeController::new();
        let mut view = controller.view();
        controller.set_window_minutes(0);
        assert!(view.changed().await);
        assert_eq!(view.mark_seen().window_minutes, 1);
        controller.set_window_minutes(1);
        assert!(!view.rx.has_changed().unwrap_or(true));
    }

    #[test]
    fn parses_backend_timestamp_variants() {
        let expected = datetime!(2024-05-06 07:08:09);
        for text in [
            "2024-05-06 07:08:09",
            "2024-05-06T07:08:09",
            "2024-05-06T07:08:09.123Z",
            " 2024-05-06 07:08:09+03:00",
        ] {
            assert_eq!(parse_local(text), Some(expected), "{text}");
        }
        assert_eq!(parse_local("yesterday"), None);
    }
}
