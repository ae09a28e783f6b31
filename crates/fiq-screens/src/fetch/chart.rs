//! Trend chart feed.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{FetchOutcome, LoadToken};
use crate::api::{ScreenBackend, TrendItem, TrendQuery};
use crate::notice::{Notice, NoticeSink};
use crate::tags::{canonical, tag_key};
use crate::time_ctx::{Clock, TimeView, TimeWindow};
use crate::widget::ChartConfig;

/// Per-series point cap applied after grouping.
pub const MAX_POINTS: usize = 2000;

/// One sample of a series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    /// Local `YYYY-MM-DD HH:mm:ss` timestamp as sent by the backend.
    pub timestamp: String,
    /// Averaged value; `None` is a gap.
    pub value: Option<f64>,
}

/// Samples of one declared tag.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    /// Tag name as declared in the chart config.
    pub tag: String,
    /// Display name (alias or tag).
    pub label: String,
    /// Points in time order.
    pub points: Vec<SeriesPoint>,
}

/// Last committed chart content.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChartData {
    /// Window the data was fetched for.
    pub window: Option<TimeWindow>,
    /// One entry per declared tag, in declaration order.
    pub series: Vec<ChartSeries>,
}

/// Picks at most `max_points` samples at uniform index strides.
///
/// Index `i` of the result is `round(i * (n - 1) / (max_points - 1))` of the
/// input, so the first and last samples are always kept. Short inputs are
/// returned unchanged. This aliases fast transients; it does not average.
#[must_use]
pub fn cap_points<T: Clone>(series: &[T], max_points: usize) -> Vec<T> {
    let n = series.len();
    if n <= max_points {
        return series.to_vec();
    }
    match max_points {
        0 => Vec::new(),
        1 => series[..1].to_vec(),
        _ => {
            let stride = (n - 1) as f64 / (max_points - 1) as f64;
            (0..max_points)
                .map(|i| {
                    let index = ((i as f64) * stride).round() as usize;
                    series[index.min(n - 1)].clone()
                })
                .collect()
        }
    }
}

/// Groups flat trend items by the chart's declared tags.
///
/// Items for undeclared tags are dropped. Each series is sorted by timestamp
/// and capped to `max_points`.
#[must_use]
pub fn group_series(items: &[TrendItem], config: &ChartConfig, max_points: usize) -> Vec<ChartSeries> {
    let mut slots = FxHashMap::default();
    for (slot, tag) in config.tags.iter().enumerate() {
        slots.insert(canonical(tag), slot);
    }
    for (slot, tag) in config.tags.iter().enumerate() {
        slots.entry(canonical(tag_key(tag))).or_insert(slot);
    }

    let mut points: Vec<Vec<SeriesPoint>> = vec![Vec::new(); config.tags.len()];
    for item in items {
        let slot = slots
            .get(&canonical(&item.tag_name))
            .or_else(|| slots.get(&canonical(tag_key(&item.tag_name))));
        if let Some(slot) = slot {
            points[*slot].push(SeriesPoint {
                timestamp: item.timestamp.clone(),
                value: item.value,
            });
        }
    }

    config
        .tags
        .iter()
        .zip(points)
        .map(|(tag, mut points)| {
            points.sort_by(|left, right| left.timestamp.cmp(&right.timestamp));
            ChartSeries {
                tag: tag.clone(),
                label: config.alias_for(tag).to_string(),
                points: cap_points(&points, max_points),
            }
        })
        .collect()
}

struct ChartShared<B> {
    backend: Arc<B>,
    screen_id: String,
    config: RwLock<ChartConfig>,
    clock: Arc<dyn Clock>,
    token: LoadToken,
    data: watch::Sender<Arc<ChartData>>,
    config_changed: Notify,
    notices: Arc<dyn NoticeSink>,
    max_points: usize,
}

/// Data loader of one chart widget.
pub struct ChartFeed<B> {
    shared: Arc<ChartShared<B>>,
    time: TimeView,
}

impl<B> Clone for ChartFeed<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            time: self.time.clone(),
        }
    }
}

impl<B: ScreenBackend> ChartFeed<B> {
    /// Creates a feed for a chart on `screen_id`.
    #[must_use]
    pub fn new(
        backend: Arc<B>,
        screen_id: impl Into<String>,
        config: ChartConfig,
        time: TimeView,
        clock: Arc<dyn Clock>,
        notices: Arc<dyn NoticeSink>,
    ) -> Self {
        let (data, _) = watch::channel(Arc::new(ChartData::default()));
        Self {
            shared: Arc::new(ChartShared {
                backend,
                screen_id: screen_id.into(),
                config: RwLock::new(config),
                clock,
                token: LoadToken::new(),
                data,
                config_changed: Notify::new(),
                notices,
                max_points: MAX_POINTS,
            }),
            time,
        }
    }

    /// Overrides the per-series point cap.
    #[must_use]
    pub fn with_max_points(self, max_points: usize) -> Self {
        let time = self.time;
        let shared = match Arc::try_unwrap(self.shared) {
            Ok(mut shared) => {
                shared.max_points = max_points.max(2);
                Arc::new(shared)
            }
            Err(shared) => shared,
        };
        Self { shared, time }
    }

    /// Current chart config.
    #[must_use]
    pub fn config(&self) -> ChartConfig {
        self.shared.config.read().clone()
    }

    /// Replaces the chart config. A real change supersedes any in-flight
    /// load and wakes a following task. Returns true if the config changed.
    pub fn set_config(&self, config: ChartConfig) -> bool {
        {
            let mut current = self.shared.config.write();
            if *current == config {
                return false;
            }
            *current = config;
        }
        self.shared.token.cancel();
        self.shared.config_changed.notify_one();
        true
    }

    /// Last committed data.
    #[must_use]
    pub fn data(&self) -> Arc<ChartData> {
        self.shared.data.borrow().clone()
    }

    /// Receiver of committed data.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<ChartData>> {
        self.shared.data.subscribe()
    }

    /// Fetches the current window and commits it unless superseded.
    ///
    /// A response is dropped as [`FetchOutcome::Stale`] when a newer load
    /// started or the time context changed while it was in flight.
    pub async fn refresh(&self) -> FetchOutcome {
        let shared = &self.shared;
        let ticket = shared.token.begin();
        let config = shared.config.read().clone();
        if config.tags.is_empty() {
            debug!(screen = %shared.screen_id, "chart has no tags; nothing to fetch");
            shared.data.send_replace(Arc::new(ChartData::default()));
            return FetchOutcome::Skipped;
        }

        let context = self.time.current();
        let window = context.window(shared.clock.now(), config.range_hours);
        let query = TrendQuery {
            start_date: window.start_text(),
            end_date: window.end_text(),
            interval_ms: config.interval_ms.max(1),
        };
        let result = shared.backend.trends(&shared.screen_id, &query).await;
        if shared.token.is_cancelled(ticket) {
            debug!(screen = %shared.screen_id, "stale trend response dropped");
            return FetchOutcome::Stale;
        }
        if self.time.current() != context {
            debug!(screen = %shared.screen_id, "trend response dropped: time context moved");
            return FetchOutcome::Stale;
        }

        match result {
            Ok(response) => {
                let series = group_series(&response.items, &config, shared.max_points);
                shared.data.send_replace(Arc::new(ChartData {
                    window: Some(window),
                    series,
                }));
                FetchOutcome::Applied
            }
            Err(err) => {
                warn!(screen = %shared.screen_id, "trend fetch failed: {err}");
                shared.notices.notify(Notice::failure("trend not loaded", &err));
                FetchOutcome::Failed(err)
            }
        }
    }

    /// Keeps the chart current: re-fetches on every time context change and
    /// config change, and every `live_poll` while in live mode.
    pub fn follow(&self, live_poll: Duration) -> JoinHandle<()> {
        let feed = self.clone();
        tokio::spawn(async move {
            let mut view = feed.time.clone();
            let mut time_open = true;
            loop {
                view.mark_seen();
                feed.refresh().await;
                let live = view.current().is_live();
                tokio::select! {
                    open = view.changed(), if time_open => time_open = open,
                    () = feed.shared.config_changed.notified() => {}
                    () = tokio::time::sleep(live_poll), if live => {}
                }
            }
        })
    }
}

impl<B> std::fmt::Debug for ChartFeed<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChartFeed")
            .field("screen_id", &self.shared.screen_id)
            .field("tags", &self.shared.config.read().tags)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(tag: &str, timestamp: &str, value: f64) -> TrendItem {
        TrendItem {
            tag_id: None,
            tag_name: tag.to_string(),
            timestamp: timestamp.to_string(),
            value: Some(value),
        }
    }

    #[test]
    fn cap_returns_exactly_max_points_with_both_ends() {
        for n in [2001, 2500, 10_000, 123_457] {
            let series: Vec<usize> = (0..n).collect();
            let capped = cap_points(&series, MAX_POINTS);
            assert_eq!(capped.len(), MAX_POINTS, "n = {n}");
            assert_eq!(capped.first(), Some(&0));
            assert_eq!(capped.last(), Some(&(n - 1)));
            assert!(capped.windows(2).all(|pair| pair[0] < pair[1]));
        }
    }

    #[test]
    fn cap_keeps_short_series_untouched() {
        let series = vec![1, 2, 3];
        assert_eq!(cap_points(&series, MAX_POINTS), series);
        assert_eq!(cap_points(&series, 0), Vec::<i32>::new());
        assert_eq!(cap_points(&series, 1), vec![1]);
    }

    #[test]
    fn cap_uses_rounded_uniform_strides() {
        let series: Vec<usize> = (0..10).collect();
        assert_eq!(cap_points(&series, 4), vec![0, 3, 6, 9]);
        assert_eq!(cap_points(&series, 3), vec![0, 5, 9]);
    }

    #[test]
    fn grouping_keeps_only_declared_tags_in_order() {
        let mut config = ChartConfig::for_tags(vec!["Pressure".into(), "Flow".into()]);
        config.aliases.insert("Flow".into(), "Main flow".into());
        let items = vec![
            item("Flow", "2024-03-01 10:00:10", 2.0),
            item("Flow", "2024-03-01 10:00:00", 1.0),
            item("Level", "2024-03-01 10:00:00", 9.0),
            item("ns:pressure", "2024-03-01 10:00:00", 5.0),
        ];
        let series = group_series(&items, &config, MAX_POINTS);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].tag, "Pressure");
        assert_eq!(series[0].points.len(), 1);
        assert_eq!(series[1].label, "Main flow");
        let values: Vec<_> = series[1].points.iter().map(|point| point.value).collect();
        assert_eq!(values, vec![Some(1.0), Some(2.0)]);
    }
}
