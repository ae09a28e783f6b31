//! Table preview feed.
//!
//! The preview endpoint answers either in "long" format (one row per
//! timestamp and tag: `{dt, TagName, Value}`) or pre-pivoted "wide" rows.
//! Both are normalized to wide rows `{dt, c_0, c_1, ...}` where `c_i` is the
//! column index of the tag.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::refresh::spawn_aligned;
use super::{FetchOutcome, LoadToken};
use crate::api::{numeric_value, ScreenBackend, TablePreviewRequest};
use crate::debounce::Debouncer;
use crate::notice::{Notice, NoticeSink};
use crate::tags::canonical;
use crate::time_ctx::{Clock, TimeContext, TimeView};
use crate::widget::{RangeMode, TableColumn, TableDefinition, TableTimeRange};

/// Keys tried, in order, for the row timestamp.
pub const TIMESTAMP_KEYS: &[&str] = &["dt", "DateTime", "Timestamp", "timestamp", "ts", "time"];

const TAG_KEYS: &[&str] = &["TagName", "tag_name", "tagName"];
const VALUE_KEYS: &[&str] = &["Value", "value"];

/// Key of the timestamp in pivoted rows.
pub const TIME_COLUMN: &str = "dt";

/// Key of column `index` in pivoted rows.
#[must_use]
pub fn column_key(index: usize) -> String {
    format!("c_{index}")
}

fn first_key<'a>(row: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| row.get(*key))
}

fn timestamp_text(row: &Map<String, Value>) -> Option<String> {
    match first_key(row, TIMESTAMP_KEYS)? {
        Value::String(text) => Some(text.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn tag_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Returns true if rows are one-per-(timestamp, tag).
#[must_use]
pub fn is_long_format(rows: &[Map<String, Value>]) -> bool {
    rows.iter()
        .find(|row| !row.is_empty())
        .is_some_and(|row| {
            first_key(row, TAG_KEYS).is_some() && first_key(row, VALUE_KEYS).is_some()
        })
}

/// Stable tag to column index assignment.
///
/// Declared columns take indexes `0..n` in order. Tags first seen in a
/// response are appended after them and keep their index for later pages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnIndex {
    tags: Vec<String>,
    by_key: FxHashMap<String, usize>,
}

impl ColumnIndex {
    /// Index seeded with the declared column order.
    #[must_use]
    pub fn new<S: AsRef<str>>(tags: &[S]) -> Self {
        let mut index = Self::default();
        for tag in tags {
            index.index_of(tag.as_ref());
        }
        index
    }

    /// Column of `tag`, assigning the next free index when unseen.
    pub fn index_of(&mut self, tag: &str) -> usize {
        let key = canonical(tag);
        if let Some(index) = self.by_key.get(&key) {
            return *index;
        }
        let index = self.tags.len();
        self.tags.push(tag.to_string());
        self.by_key.insert(key, index);
        index
    }

    /// Column of `tag` if already assigned.
    #[must_use]
    pub fn get(&self, tag: &str) -> Option<usize> {
        self.by_key.get(&canonical(tag)).copied()
    }

    /// Tags by column index.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Wide rows keyed by timestamp, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PivotedTable {
    columns: ColumnIndex,
    rows: Vec<Map<String, Value>>,
    by_time: FxHashMap<String, usize>,
}

impl PivotedTable {
    /// Empty table with the declared column order.
    #[must_use]
    pub fn new<S: AsRef<str>>(columns: &[S]) -> Self {
        Self {
            columns: ColumnIndex::new(columns),
            ..Self::default()
        }
    }

    /// Rows `{dt, c_0, c_1, ...}`.
    #[must_use]
    pub fn rows(&self) -> &[Map<String, Value>] {
        &self.rows
    }

    /// Column assignment.
    #[must_use]
    pub fn columns(&self) -> &ColumnIndex {
        &self.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Merges one page of raw rows, long or wide.
    ///
    /// Values for a timestamp already present are added to its row.
    pub fn merge(&mut self, rows: &[Map<String, Value>]) {
        if is_long_format(rows) {
            for row in rows {
                self.merge_long(row);
            }
        } else {
            for row in rows {
                self.merge_wide(row);
            }
        }
    }

    fn row_for(&mut self, time: String) -> &mut Map<String, Value> {
        let position = match self.by_time.get(&time) {
            Some(position) => *position,
            None => {
                let mut row = Map::new();
                row.insert(TIME_COLUMN.to_string(), Value::String(time.clone()));
                self.rows.push(row);
                let position = self.rows.len() - 1;
                self.by_time.insert(time, position);
                position
            }
        };
        &mut self.rows[position]
    }

    fn merge_long(&mut self, row: &Map<String, Value>) {
        let Some(time) = timestamp_text(row) else {
            return;
        };
        let Some(tag) = first_key(row, TAG_KEYS).and_then(tag_text) else {
            return;
        };
        let value = first_key(row, VALUE_KEYS).cloned().unwrap_or(Value::Null);
        let column = self.columns.index_of(&tag);
        self.row_for(time).insert(column_key(column), value);
    }

    fn merge_wide(&mut self, row: &Map<String, Value>) {
        let Some(time) = timestamp_text(row) else {
            return;
        };
        let mut cells = Vec::new();
        for (key, value) in row {
            if TIMESTAMP_KEYS.contains(&key.as_str()) {
                continue;
            }
            let column = match key.strip_prefix("c_").and_then(|rest| rest.parse().ok()) {
                Some(column) => column,
                None => self.columns.index_of(key),
            };
            cells.push((column, value.clone()));
        }
        let target = self.row_for(time);
        for (column, value) in cells {
            target.insert(column_key(column), value);
        }
    }
}

/// Pivots long-format rows into wide rows using `columns` as the initial
/// column order.
#[must_use]
pub fn pivot<S: AsRef<str>>(rows: &[Map<String, Value>], columns: &[S]) -> PivotedTable {
    let mut table = PivotedTable::new(columns);
    table.merge(rows);
    table
}

/// Formats one cell with the column's scale and precision.
///
/// The raw value is divided by `scale` (when set and non-zero) and rounded to
/// `decimals`. Non-numeric values are shown as-is; missing values are blank.
#[must_use]
pub fn render_cell(value: Option<&Value>, column: &TableColumn) -> String {
    let Some(value) = value else {
        return String::new();
    };
    match numeric_value(value).filter(|_| !value.is_boolean()) {
        Some(number) => {
            let scaled = match column.scale {
                Some(scale) if scale != 0.0 && scale.is_finite() => number / scale,
                _ => number,
            };
            match column.decimals {
                Some(decimals) => format!("{scaled:.prec$}", prec = usize::from(decimals)),
                None => scaled.to_string(),
            }
        }
        None => match value {
            Value::Null => String::new(),
            Value::String(text) => text.clone(),
            other => other.to_string(),
        },
    }
}

fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

/// Renders the table as CSV: a time column followed by the declared columns.
#[must_use]
pub fn to_csv(table: &PivotedTable, columns: &[TableColumn]) -> String {
    let mut out = String::new();
    let header = std::iter::once("Time".to_string())
        .chain(columns.iter().map(|column| csv_field(column.title())))
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&header);
    out.push('\n');
    let keys: Vec<Option<String>> = columns
        .iter()
        .map(|column| table.columns().get(&column.tag).map(column_key))
        .collect();
    for row in table.rows() {
        let time = row
            .get(TIME_COLUMN)
            .and_then(Value::as_str)
            .unwrap_or_default();
        let mut fields = vec![csv_field(time)];
        for (column, key) in columns.iter().zip(&keys) {
            let value = key.as_ref().and_then(|key| row.get(key));
            fields.push(csv_field(&render_cell(value, column)));
        }
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

/// Inputs a paging run was started with. Later pages reuse `request` and
/// are only valid while `definition` and `context` are still current.
#[derive(Debug, Clone, PartialEq)]
struct PageSource {
    definition: TableDefinition,
    context: TimeContext,
    request: TableDefinition,
}

/// Paging state of a table feed.
#[derive(Debug, Clone, Default)]
pub struct TableSnapshot {
    /// Pivoted rows loaded so far.
    pub table: PivotedTable,
    /// Raw rows consumed from the backend.
    pub offset: u64,
    /// Raw row total reported by the backend.
    pub total: u64,
    source: Option<PageSource>,
}

impl TableSnapshot {
    /// Returns true while more pages are available.
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.offset < self.total
    }

    /// Definition the loaded pages were requested with, time window applied.
    #[must_use]
    pub fn requested(&self) -> Option<&TableDefinition> {
        self.source.as_ref().map(|source| &source.request)
    }
}

struct TableShared<B> {
    backend: Arc<B>,
    definition: RwLock<TableDefinition>,
    time: TimeView,
    clock: Arc<dyn Clock>,
    token: LoadToken,
    state: Mutex<TableSnapshot>,
    loading_more: Mutex<bool>,
    page_size: u64,
    timezone: String,
    notices: Arc<dyn NoticeSink>,
}

impl<B: ScreenBackend> TableShared<B> {
    /// Captures the declared definition, the time context and the
    /// definition sent to the backend: the table's own range in live mode,
    /// the time context window otherwise.
    fn page_source(&self) -> PageSource {
        let definition = self.definition.read().clone();
        let context = self.time.current();
        let mut request = definition.clone();
        if !context.is_live() {
            let window = context.window(self.clock.now(), definition.time_range.last_hours);
            request.time_range = TableTimeRange {
                mode: RangeMode::Absolute,
                last_hours: definition.time_range.last_hours,
                from: Some(window.start_text()),
                to: Some(window.end_text()),
            };
        }
        PageSource {
            definition,
            context,
            request,
        }
    }

    fn is_current(&self, source: &PageSource) -> bool {
        self.time.current() == source.context && *self.definition.read() == source.definition
    }

    fn request(&self, definition: TableDefinition, offset: u64) -> TablePreviewRequest {
        TablePreviewRequest {
            table_id: definition.table_id,
            definition,
            timezone: self.timezone.clone(),
            offset,
            limit: self.page_size,
        }
    }

    async fn reload(&self) -> FetchOutcome {
        let ticket = self.token.begin();
        let source = self.page_source();
        if source.request.columns.is_empty() {
            *self.state.lock() = TableSnapshot::default();
            self.notices
                .notify(Notice::precondition("select at least one tag column"));
            return FetchOutcome::Skipped;
        }
        let tags: Vec<String> = source
            .request
            .columns
            .iter()
            .map(|column| column.tag.clone())
            .collect();
        let request = self.request(source.request.clone(), 0);
        let result = self.backend.table_preview(&request).await;
        if self.token.is_cancelled(ticket) || !self.is_current(&source) {
            debug!("stale table page dropped");
            return FetchOutcome::Stale;
        }
        match result {
            Ok(response) => {
                let table = pivot(&response.rows, &tags);
                *self.state.lock() = TableSnapshot {
                    table,
                    offset: response.rows.len() as u64,
                    total: response.total,
                    source: Some(source),
                };
                FetchOutcome::Applied
            }
            Err(err) => {
                warn!("table preview failed: {err}");
                self.notices.notify(Notice::failure("table not loaded", &err));
                FetchOutcome::Failed(err)
            }
        }
    }

    async fn load_more(&self) -> FetchOutcome {
        {
            let mut loading = self.loading_more.lock();
            if *loading {
                return FetchOutcome::Skipped;
            }
            *loading = true;
        }
        let outcome = self.load_next_page().await;
        *self.loading_more.lock() = false;
        outcome
    }

    async fn load_next_page(&self) -> FetchOutcome {
        let ticket = self.token.current();
        let (offset, source) = {
            let state = self.state.lock();
            match &state.source {
                Some(source) if state.has_more() => (state.offset, source.clone()),
                _ => return FetchOutcome::Skipped,
            }
        };
        // Pages of an older window or definition must not be appended.
        if !self.is_current(&source) {
            debug!("table window changed; next page needs a reload");
            return FetchOutcome::Stale;
        }
        let request = self.request(source.request.clone(), offset);
        let result = self.backend.table_preview(&request).await;
        if self.token.is_cancelled(ticket) || !self.is_current(&source) {
            debug!("stale table page dropped");
            return FetchOutcome::Stale;
        }
        match result {
            Ok(response) => {
                let mut state = self.state.lock();
                // A page that starts elsewhere belongs to an older paging run.
                if state.offset != offset {
                    return FetchOutcome::Stale;
                }
                state.table.merge(&response.rows);
                state.offset += response.rows.len() as u64;
                state.total = response.total;
                if response.rows.is_empty() {
                    state.total = state.offset;
                }
                FetchOutcome::Applied
            }
            Err(err) => {
                warn!("table page failed: {err}");
                self.notices.notify(Notice::failure("more rows not loaded", &err));
                FetchOutcome::Failed(err)
            }
        }
    }
}

/// Data loader of one table widget.
pub struct TableFeed<B> {
    shared: Arc<TableShared<B>>,
    debounce: Arc<Debouncer<()>>,
    filter_delay: Duration,
}

impl<B> Clone for TableFeed<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            debounce: Arc::clone(&self.debounce),
            filter_delay: self.filter_delay,
        }
    }
}

/// Paging and presentation settings of a [`TableFeed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFeedOptions {
    /// Rows per preview page.
    pub page_size: u64,
    /// Timezone sent with preview requests.
    pub timezone: String,
    /// Debounce before a filter-driven reload.
    pub filter_delay: Duration,
}

impl Default for TableFeedOptions {
    fn default() -> Self {
        Self {
            page_size: 500,
            timezone: "UTC".to_string(),
            filter_delay: Duration::from_millis(300),
        }
    }
}

impl<B: ScreenBackend> TableFeed<B> {
    /// Creates a feed for `definition`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    pub fn new(
        backend: Arc<B>,
        definition: TableDefinition,
        time: TimeView,
        clock: Arc<dyn Clock>,
        notices: Arc<dyn NoticeSink>,
        options: TableFeedOptions,
    ) -> Self {
        Self {
            shared: Arc::new(TableShared {
                backend,
                definition: RwLock::new(definition),
                time,
                clock,
                token: LoadToken::new(),
                state: Mutex::new(TableSnapshot::default()),
                loading_more: Mutex::new(false),
                page_size: options.page_size.max(1),
                timezone: options.timezone,
                notices,
            }),
            debounce: Arc::new(Debouncer::new()),
            filter_delay: options.filter_delay,
        }
    }

    /// Current definition.
    #[must_use]
    pub fn definition(&self) -> TableDefinition {
        self.shared.definition.read().clone()
    }

    /// Replaces the definition and supersedes in-flight loads. Returns true
    /// if it changed; the caller decides between [`Self::reload`] and
    /// [`Self::schedule_reload`].
    pub fn set_definition(&self, definition: TableDefinition) -> bool {
        {
            let mut current = self.shared.definition.write();
            if *current == definition {
                return false;
            }
            *current = definition;
        }
        self.shared.token.cancel();
        true
    }

    /// Loaded rows and paging state.
    #[must_use]
    pub fn snapshot(&self) -> TableSnapshot {
        self.shared.state.lock().clone()
    }

    /// Full refresh from the first page.
    pub async fn reload(&self) -> FetchOutcome {
        self.debounce.cancel(&());
        self.shared.reload().await
    }

    /// Appends the next page (infinite scroll).
    pub async fn load_more(&self) -> FetchOutcome {
        self.shared.load_more().await
    }

    /// Debounced reload for rapid filter edits; the latest call wins.
    pub fn schedule_reload(&self) {
        let shared = Arc::clone(&self.shared);
        self.debounce.schedule((), self.filter_delay, async move {
            shared.reload().await;
        });
    }

    /// Returns true while a debounced reload is waiting.
    #[must_use]
    pub fn reload_pending(&self) -> bool {
        self.debounce.is_pending(&())
    }

    /// Reloads after every time context change, debounced like a filter
    /// edit. A change also supersedes any load already in flight.
    pub fn follow(&self) -> JoinHandle<()> {
        let feed = self.clone();
        let mut view = self.shared.time.clone();
        view.mark_seen();
        tokio::spawn(async move {
            while view.changed().await {
                view.mark_seen();
                feed.shared.token.cancel();
                feed.schedule_reload();
            }
        })
    }

    /// Reloads on wall-clock aligned boundaries of `interval`.
    pub fn spawn_auto_refresh(&self, interval: Duration) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let clock = Arc::clone(&self.shared.clock);
        spawn_aligned(clock, interval, move || {
            let shared = Arc::clone(&shared);
            async move {
                shared.reload().await;
            }
        })
    }

    /// CSV export of the loaded rows with per-column scale and precision.
    #[must_use]
    pub fn to_csv(&self) -> String {
        let columns = self.shared.definition.read().columns.clone();
        to_csv(&self.shared.state.lock().table, &columns)
    }
}

impl<B> std::fmt::Debug for TableFeed<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableFeed")
            .field("page_size", &self.shared.page_size)
            .field("rows", &self.shared.state.lock().table.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;
    use serde_json::json;

    fn rows(value: Value) -> Vec<Map<String, Value>> {
        serde_json::from_value(value).expect("rows")
    }

    #[test]
    fn long_rows_pivot_into_indexed_columns() {
        let input = rows(json!([
            {"dt": "t1", "TagName": "A", "Value": 1},
            {"dt": "t1", "TagName": "B", "Value": 2},
            {"dt": "t2", "TagName": "A", "Value": 3}
        ]));
        let table = pivot(&input, &["A", "B"]);
        let expected = rows(json!([
            {"dt": "t1", "c_0": 1, "c_1": 2},
            {"dt": "t2", "c_0": 3}
        ]));
        assert_eq!(table.rows(), expected.as_slice());
    }

    #[test]
    fn undeclared_tags_get_appended_columns() {
        let input = rows(json!([
            {"DateTime": "t1", "TagName": "C", "Value": 7},
            {"DateTime": "t1", "TagName": "a", "Value": 1}
        ]));
        let table = pivot(&input, &["A", "B"]);
        assert_eq!(table.columns().get("C"), Some(2));
        let expected = rows(json!([{"dt": "t1", "c_2": 7, "c_0": 1}]));
        assert_eq!(table.rows(), expected.as_slice());
    }

    #[test]
    fn wide_rows_map_tag_keys_to_columns() {
        let input = rows(json!([
            {"timestamp": "t1", "B": 2.5, "A": 1},
            {"timestamp": "t2", "c_0": 4}
        ]));
        assert!(!is_long_format(&input));
        let table = pivot(&input, &["A", "B"]);
        let expected = rows(json!([
            {"dt": "t1", "c_1": 2.5, "c_0": 1},
            {"dt": "t2", "c_0": 4}
        ]));
        assert_eq!(table.rows(), expected.as_slice());
    }

    #[test]
    fn later_pages_extend_existing_timestamps() {
        let mut table = pivot(
            &rows(json!([{"dt": "t1", "TagName": "A", "Value": 1}])),
            &["A", "B"],
        );
        table.merge(&rows(json!([
            {"dt": "t1", "TagName": "B", "Value": 2},
            {"dt": "t2", "TagName": "A", "Value": 3}
        ])));
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0].get("c_1"), Some(&json!(2)));
    }

    #[test]
    fn cells_apply_scale_then_precision() {
        let column = TableColumn {
            tag: "Energy".into(),
            title: Some("Energy, MWh".into()),
            decimals: Some(2),
            scale: Some(1000.0),
        };
        assert_eq!(render_cell(Some(&json!(123456)), &column), "123.46");
        assert_eq!(render_cell(Some(&json!("1,5")), &column), "0.00");
        assert_eq!(render_cell(Some(&json!("n/a")), &column), "n/a");
        assert_eq!(render_cell(Some(&Value::Null), &column), "");
        assert_eq!(render_cell(None, &column), "");
        let plain = TableColumn::for_tag("Count");
        assert_eq!(render_cell(Some(&json!(12)), &plain), "12");
    }

    #[test]
    fn csv_uses_titles_and_rendered_cells() {
        let columns = vec![
            TableColumn {
                decimals: Some(1),
                ..TableColumn::for_tag("A")
            },
            TableColumn {
                title: Some("B, scaled".into()),
                scale: Some(10.0),
                ..TableColumn::for_tag("B")
            },
        ];
        let table = pivot(
            &rows(json!([
                {"dt": "2024-03-01 10:00:00", "TagName": "A", "Value": 1},
                {"dt": "2024-03-01 10:00:00", "TagName": "B", "Value": 25},
                {"dt": "2024-03-01 11:00:00", "TagName": "A", "Value": 2.26}
            ])),
            &["A", "B"],
        );
        expect![[r#"
            Time,A,"B, scaled"
            2024-03-01 10:00:00,1.0,2.5
            2024-03-01 11:00:00,2.3,
        "#]]
        .assert_eq(&to_csv(&table, &columns));
    }
}
