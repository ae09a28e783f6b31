//! Persistence synchronizer.
//!
//! Converges registry state to the backend one widget at a time:
//! - saves are debounced per widget id (latest payload wins);
//! - at most one write per id is in flight, ordered by a per-id FIFO lock;
//! - a payload equal to the last confirmed write is never sent;
//! - a deleted (tombstoned) id never reaches the backend again this session.
//!
//! Failures are reported as notices and leave the snapshot untouched, so the
//! next edit retries the same delta.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{BulkItem, BulkUpsertRequest, DeleteResponse, ScreenBackend};
use crate::debounce::Debouncer;
use crate::error::ScreenError;
use crate::notice::{Notice, NoticeSink};
use crate::settings::TagSettings;
use crate::widget::{Widget, WidgetId, WidgetKind};

/// Default quiet period before a widget save is sent.
pub const SAVE_DEBOUNCE: Duration = Duration::from_millis(450);

/// Everything written for one widget.
#[derive(Debug, Clone, PartialEq)]
pub struct SavePayload {
    /// Widget id (`ObjectName`).
    pub id: WidgetId,
    /// Widget type.
    pub kind: WidgetKind,
    /// Position.
    pub x: f64,
    /// Position.
    pub y: f64,
    /// Explicit size, if any.
    pub width: Option<f64>,
    /// Explicit size, if any.
    pub height: Option<f64>,
    /// Display label.
    pub label: String,
    /// Encoded config blob, tag style included.
    pub config: Value,
    /// Tag display settings sent along with tag widgets.
    pub settings: Option<TagSettings>,
}

impl SavePayload {
    /// Captures the persisted shape of `widget`.
    #[must_use]
    pub fn from_widget(widget: &Widget, settings: Option<TagSettings>) -> Self {
        Self {
            id: widget.id.clone(),
            kind: widget.kind(),
            x: widget.x,
            y: widget.y,
            width: widget.width,
            height: widget.height,
            label: widget.label.clone(),
            config: widget.config.encode(widget.style.as_ref()),
            settings: settings.filter(|_| widget.kind() == WidgetKind::Tag),
        }
    }

    /// Tracked fields used for the redundant-write check.
    #[must_use]
    pub fn snapshot(&self) -> SavedSnapshot {
        SavedSnapshot {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            label: self.label.clone(),
            kind: self.kind,
            config_json: self.config.to_string(),
        }
    }

    fn into_item(self) -> BulkItem {
        BulkItem {
            id: self.id.to_string(),
            kind: self.kind.as_str().to_string(),
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            label: self.label,
            chart_config: self.config,
            settings: self.settings,
        }
    }
}

/// Last payload the backend confirmed for a widget.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedSnapshot {
    pub(crate) x: f64,
    pub(crate) y: f64,
    pub(crate) width: Option<f64>,
    pub(crate) height: Option<f64>,
    pub(crate) label: String,
    pub(crate) kind: WidgetKind,
    pub(crate) config_json: String,
}

impl SavedSnapshot {
    /// Saved position.
    #[must_use]
    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// Saved label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Saved config blob as JSON text.
    #[must_use]
    pub fn config_json(&self) -> &str {
        &self.config_json
    }
}

/// Result of one save attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// Sent and confirmed.
    Written,
    /// Equal to the last confirmed write; nothing sent.
    Unchanged,
    /// Widget was deleted; nothing sent.
    Suppressed,
    /// Sent and rejected, or never reached the backend.
    Failed(ScreenError),
}

#[derive(Default)]
struct SaveLedger {
    locks: FxHashMap<WidgetId, Arc<tokio::sync::Mutex<()>>>,
    snapshots: FxHashMap<WidgetId, SavedSnapshot>,
    tombstones: FxHashSet<WidgetId>,
}

struct SyncShared<B> {
    backend: Arc<B>,
    screen_id: String,
    ledger: Mutex<SaveLedger>,
    notices: Arc<dyn NoticeSink>,
}

impl<B: ScreenBackend> SyncShared<B> {
    async fn write(&self, payload: SavePayload) -> SaveOutcome {
        let id = payload.id.clone();
        let lock = {
            let mut ledger = self.ledger.lock();
            if ledger.tombstones.contains(&id) {
                debug!(widget = %id, "save dropped: widget deleted");
                return SaveOutcome::Suppressed;
            }
            Arc::clone(ledger.locks.entry(id.clone()).or_default())
        };
        let outcome = {
            let _turn = lock.lock().await;
            self.write_in_turn(payload).await
        };
        self.release(&id, &lock);
        outcome
    }

    /// Drops the id's lock entry once no other writer is queued on it.
    fn release(&self, id: &WidgetId, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut ledger = self.ledger.lock();
        // Clones are only taken under the ledger lock: two owners means the
        // map entry and this writer.
        let idle = ledger
            .locks
            .get(id)
            .is_some_and(|held| Arc::ptr_eq(held, lock) && Arc::strong_count(lock) == 2);
        if idle {
            ledger.locks.remove(id);
        }
    }

    async fn write_in_turn(&self, payload: SavePayload) -> SaveOutcome {
        let snapshot = payload.snapshot();
        {
            let ledger = self.ledger.lock();
            // Re-checked under the per-id lock: a delete may have landed while queued.
            if ledger.tombstones.contains(&payload.id) {
                debug!(widget = %payload.id, "save dropped: widget deleted while queued");
                return SaveOutcome::Suppressed;
            }
            if ledger.snapshots.get(&payload.id) == Some(&snapshot) {
                debug!(widget = %payload.id, "save skipped: unchanged");
                return SaveOutcome::Unchanged;
            }
        }

        let id = payload.id.clone();
        let request = BulkUpsertRequest {
            screen_id: self.screen_id.clone(),
            items: vec![payload.into_item()],
            delete_missing: false,
        };
        match self.backend.bulk_upsert(&request).await {
            Ok(response) => {
                debug!(widget = %id, saved = response.saved, "widget saved");
                let mut ledger = self.ledger.lock();
                if !ledger.tombstones.contains(&id) {
                    ledger.snapshots.insert(id, snapshot);
                }
                SaveOutcome::Written
            }
            Err(err) => {
                warn!(widget = %id, "save failed: {err}");
                self.notices
                    .notify(Notice::failure(&format!("widget '{id}' not saved"), &err));
                SaveOutcome::Failed(err)
            }
        }
    }
}

/// Debounced, per-id serialized save pipeline for one screen.
pub struct SaveSync<B> {
    shared: Arc<SyncShared<B>>,
    debounce: Arc<Debouncer<WidgetId>>,
    delay: Duration,
}

impl<B> Clone for SaveSync<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            debounce: Arc::clone(&self.debounce),
            delay: self.delay,
        }
    }
}

impl<B: ScreenBackend> SaveSync<B> {
    /// Creates a synchronizer for `screen_id`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    pub fn new(
        backend: Arc<B>,
        screen_id: impl Into<String>,
        delay: Duration,
        notices: Arc<dyn NoticeSink>,
    ) -> Self {
        Self {
            shared: Arc::new(SyncShared {
                backend,
                screen_id: screen_id.into(),
                ledger: Mutex::new(SaveLedger::default()),
                notices,
            }),
            debounce: Arc::new(Debouncer::new()),
            delay,
        }
    }

    /// Screen this synchronizer writes to.
    #[must_use]
    pub fn screen_id(&self) -> &str {
        &self.shared.screen_id
    }

    /// Debounce delay for [`Self::schedule_save`].
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Records `payload` as already persisted, e.g. right after loading.
    pub fn prime(&self, payload: &SavePayload) {
        let mut ledger = self.shared.ledger.lock();
        if !ledger.tombstones.contains(&payload.id) {
            ledger
                .snapshots
                .insert(payload.id.clone(), payload.snapshot());
        }
    }

    /// Replaces any pending save for the widget and sends `payload` after the
    /// debounce delay.
    pub fn schedule_save(&self, payload: SavePayload) {
        if self.is_tombstoned(&payload.id) {
            debug!(widget = %payload.id, "save not scheduled: widget deleted");
            return;
        }
        let shared = Arc::clone(&self.shared);
        let key = payload.id.clone();
        self.debounce.schedule(key, self.delay, async move {
            shared.write(payload).await;
        });
    }

    /// Cancels any pending save and writes `payload` now.
    pub async fn save_now(&self, payload: SavePayload) -> SaveOutcome {
        self.debounce.cancel(&payload.id);
        self.shared.write(payload).await
    }

    /// Tombstones the widget without contacting the backend.
    ///
    /// Cancels its pending save and drops its snapshot. Returns the widget's
    /// write lock so a caller can order follow-up I/O after in-flight saves.
    pub fn forget(&self, id: &WidgetId) -> Arc<tokio::sync::Mutex<()>> {
        self.debounce.cancel(id);
        let mut ledger = self.shared.ledger.lock();
        ledger.tombstones.insert(id.clone());
        ledger.snapshots.remove(id);
        ledger.locks.remove(id).unwrap_or_default()
    }

    /// Tombstones the widget and deletes it on the backend.
    ///
    /// The delete waits for any save already in flight for the same id.
    pub async fn delete(&self, id: &WidgetId) -> Result<DeleteResponse, ScreenError> {
        let lock = self.forget(id);
        let _turn = lock.lock().await;
        self.shared
            .backend
            .delete_object(&self.shared.screen_id, id)
            .await
    }

    /// Returns true once the widget was deleted this session.
    #[must_use]
    pub fn is_tombstoned(&self, id: &str) -> bool {
        self.shared.ledger.lock().tombstones.contains(id)
    }

    /// Ids deleted this session.
    #[must_use]
    pub fn tombstones(&self) -> Vec<WidgetId> {
        self.shared.ledger.lock().tombstones.iter().cloned().collect()
    }

    /// Last confirmed write for the widget.
    #[must_use]
    pub fn snapshot(&self, id: &str) -> Option<SavedSnapshot> {
        self.shared.ledger.lock().snapshots.get(id).cloned()
    }

    /// Returns true while a debounced save waits for the widget.
    #[must_use]
    pub fn is_pending(&self, id: &WidgetId) -> bool {
        self.debounce.is_pending(id)
    }

    /// Number of debounced saves waiting.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.debounce.pending_count()
    }

    /// Ids with a write in flight or queued behind one.
    #[must_use]
    pub fn active_writes(&self) -> usize {
        self.shared.ledger.lock().locks.len()
    }

    /// Sends every pending save now and waits for all of them.
    pub async fn flush(&self) {
        self.debounce.flush().await;
    }

    /// Starts a fresh session: pending saves are dropped, tombstones and
    /// confirmed snapshots are cleared. Writes already in flight keep their
    /// per-id order.
    pub fn reset(&self) {
        self.debounce.cancel_all();
        let mut ledger = self.shared.ledger.lock();
        ledger.tombstones.clear();
        ledger.snapshots.clear();
    }
}

impl<B> std::fmt::Debug for SaveSync<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveSync")
            .field("screen_id", &self.shared.screen_id)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widget::{TagConfig, TagStyle, WidgetConfig};
    use serde_json::json;

    fn tag_widget() -> Widget {
        Widget::new(
            "Line1__Flow",
            WidgetConfig::Tag(TagConfig::named("Line1__Flow")),
            100.0,
            100.0,
        )
    }

    #[test]
    fn payload_carries_style_inside_config_blob() {
        let mut widget = tag_widget();
        widget.style = Some(TagStyle {
            bg_color: Some("#000".into()),
            ..TagStyle::default()
        });
        let payload = SavePayload::from_widget(&widget, Some(TagSettings::default()));
        assert_eq!(
            payload.config,
            json!({"tag_name": "Line1__Flow", "__tagStyle": {"bgColor": "#000"}})
        );
        let item = payload.into_item();
        assert_eq!(item.kind, "tag");
        assert!(item.settings.is_some());
    }

    #[test]
    fn snapshot_tracks_geometry_label_and_config() {
        let widget = tag_widget();
        let first = SavePayload::from_widget(&widget, None).snapshot();
        let mut moved = widget.clone();
        moved.x = 101.0;
        assert_ne!(first, SavePayload::from_widget(&moved, None).snapshot());
        let same = SavePayload::from_widget(&widget, Some(TagSettings::default())).snapshot();
        assert_eq!(first, same);
        assert_eq!(first.position(), (100.0, 100.0));
    }

    #[test]
    fn settings_are_only_sent_for_tag_widgets() {
        let chart = Widget::new(
            "chart_1",
            WidgetConfig::default_for(WidgetKind::Chart),
            0.0,
            0.0,
        );
        let payload = SavePayload::from_widget(&chart, Some(TagSettings::default()));
        assert!(payload.settings.is_none());
    }
}
