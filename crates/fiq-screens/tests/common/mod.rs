#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use fiq_screens::api::{
    AckResponse, BulkUpsertRequest, BulkUpsertResponse, DeleteResponse, LiveRecord,
    ScreenBackend, ScreenMeta, ScreenObjectRow, ScreenPropsPatch, TablePreviewRequest,
    TablePreviewResponse, TagSettingsBatchRequest, TagSettingsRow, TagSettingsUpsert, TrendItem,
    TrendQuery, TrendResponse,
};
use fiq_screens::notice::Notice;
use fiq_screens::ScreenError;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Semaphore};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    LoadObjects(String),
    Bulk(BulkUpsertRequest),
    Delete { screen: String, object: String },
    Meta(String),
    Props(ScreenPropsPatch),
    Trends(TrendQuery),
    Preview(TablePreviewRequest),
    SettingsBatch(TagSettingsBatchRequest),
    SettingsUpsert(TagSettingsUpsert),
    Live(String),
}

/// Recording in-memory backend.
///
/// Calls are recorded before any hold, so a held request is already visible
/// as "in flight". Holds are semaphores: each held call consumes one permit.
#[derive(Default)]
pub struct FakeBackend {
    calls: Mutex<Vec<Call>>,
    pub objects: Mutex<Vec<ScreenObjectRow>>,
    pub meta: Mutex<ScreenMeta>,
    pub trend_items: Mutex<Vec<TrendItem>>,
    pub preview_rows: Mutex<Vec<Map<String, Value>>>,
    pub live: Mutex<Vec<LiveRecord>>,
    pub settings: Mutex<BTreeMap<String, TagSettingsRow>>,
    bulk_failures: Mutex<VecDeque<ScreenError>>,
    pub fail_trends: Mutex<Option<ScreenError>>,
    pub fail_delete: Mutex<Option<ScreenError>>,
    pub fail_settings: Mutex<Option<ScreenError>>,
    bulk_hold: Mutex<Option<Arc<Semaphore>>>,
    trend_hold: Mutex<Option<Arc<Semaphore>>>,
    preview_hold: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_meta(meta: ScreenMeta) -> Arc<Self> {
        let backend = Self::default();
        *backend.meta.lock() = meta;
        Arc::new(backend)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn bulk_calls(&self) -> Vec<BulkUpsertRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Bulk(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Delete { object, .. } => Some(object.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn trend_queries(&self) -> Vec<TrendQuery> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Trends(query) => Some(query.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn previews(&self) -> Vec<TablePreviewRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Preview(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Makes the next bulk upsert fail with `err`.
    pub fn fail_next_bulk(&self, err: ScreenError) {
        self.bulk_failures.lock().push_back(err);
    }

    /// Holds bulk upserts until permits are released.
    pub fn hold_bulk(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.bulk_hold.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub fn hold_trends(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.trend_hold.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub fn hold_previews(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.preview_hold.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Lets new calls through; calls already waiting stay held.
    pub fn clear_holds(&self) {
        *self.bulk_hold.lock() = None;
        *self.trend_hold.lock() = None;
        *self.preview_hold.lock() = None;
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

async fn pass(hold: &Mutex<Option<Arc<Semaphore>>>) {
    let gate = hold.lock().clone();
    if let Some(gate) = gate {
        if let Ok(permit) = gate.acquire().await {
            permit.forget();
        }
    }
}

impl ScreenBackend for FakeBackend {
    async fn load_objects(&self, screen_id: &str) -> Result<Vec<ScreenObjectRow>, ScreenError> {
        self.record(Call::LoadObjects(screen_id.to_string()));
        Ok(self.objects.lock().clone())
    }

    async fn bulk_upsert(
        &self,
        request: &BulkUpsertRequest,
    ) -> Result<BulkUpsertResponse, ScreenError> {
        self.record(Call::Bulk(request.clone()));
        pass(&self.bulk_hold).await;
        if let Some(err) = self.bulk_failures.lock().pop_front() {
            return Err(err);
        }
        Ok(BulkUpsertResponse {
            status: "ok".into(),
            saved: request.items.len() as u32,
            deleted: 0,
        })
    }

    async fn delete_object(
        &self,
        screen_id: &str,
        object_name: &str,
    ) -> Result<DeleteResponse, ScreenError> {
        self.record(Call::Delete {
            screen: screen_id.to_string(),
            object: object_name.to_string(),
        });
        if let Some(err) = self.fail_delete.lock().clone() {
            return Err(err);
        }
        Ok(DeleteResponse {
            message: "deleted".into(),
        })
    }

    async fn screen_meta(&self, screen_id: &str) -> Result<ScreenMeta, ScreenError> {
        self.record(Call::Meta(screen_id.to_string()));
        Ok(self.meta.lock().clone())
    }

    async fn update_props(
        &self,
        _screen_id: &str,
        patch: &ScreenPropsPatch,
    ) -> Result<ScreenMeta, ScreenError> {
        self.record(Call::Props(patch.clone()));
        let mut meta = self.meta.lock();
        if let Some(value) = patch.is_public {
            meta.is_public = value;
        }
        if let Some(value) = patch.is_readonly {
            meta.is_readonly = value;
        }
        if let Some(value) = patch.area_width {
            meta.area_width = Some(value);
        }
        if let Some(value) = patch.area_height {
            meta.area_height = Some(value);
        }
        if let Some(value) = &patch.bg_color {
            meta.bg_color = Some(value.clone());
        }
        Ok(meta.clone())
    }

    async fn trends(
        &self,
        _screen_id: &str,
        query: &TrendQuery,
    ) -> Result<TrendResponse, ScreenError> {
        self.record(Call::Trends(query.clone()));
        pass(&self.trend_hold).await;
        if let Some(err) = self.fail_trends.lock().clone() {
            return Err(err);
        }
        let items = self
            .trend_items
            .lock()
            .iter()
            .filter(|item| {
                item.timestamp.as_str() >= query.start_date.as_str()
                    && item.timestamp.as_str() <= query.end_date.as_str()
            })
            .cloned()
            .collect();
        Ok(TrendResponse { ok: true, items })
    }

    async fn table_preview(
        &self,
        request: &TablePreviewRequest,
    ) -> Result<TablePreviewResponse, ScreenError> {
        self.record(Call::Preview(request.clone()));
        pass(&self.preview_hold).await;
        let rows = self.preview_rows.lock();
        let page = rows
            .iter()
            .skip(request.offset as usize)
            .take(request.limit as usize)
            .cloned()
            .collect();
        Ok(TablePreviewResponse {
            rows: page,
            total: rows.len() as u64,
        })
    }

    async fn tag_settings_batch(
        &self,
        request: &TagSettingsBatchRequest,
    ) -> Result<BTreeMap<String, TagSettingsRow>, ScreenError> {
        self.record(Call::SettingsBatch(request.clone()));
        Ok(self.settings.lock().clone())
    }

    async fn upsert_tag_settings(
        &self,
        request: &TagSettingsUpsert,
    ) -> Result<AckResponse, ScreenError> {
        self.record(Call::SettingsUpsert(request.clone()));
        if let Some(err) = self.fail_settings.lock().clone() {
            return Err(err);
        }
        Ok(AckResponse { ok: true })
    }

    async fn live_snapshot(&self, screen_id: &str) -> Result<Vec<LiveRecord>, ScreenError> {
        self.record(Call::Live(screen_id.to_string()));
        Ok(self.live.lock().clone())
    }
}

/// Notice sink collecting into a channel.
pub fn notices() -> (
    Arc<mpsc::UnboundedSender<Notice>>,
    mpsc::UnboundedReceiver<Notice>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(tx), rx)
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<Notice>) -> Vec<Notice> {
    let mut out = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        out.push(notice);
    }
    out
}

pub fn transient() -> ScreenError {
    ScreenError::Http {
        status: 503,
        path: "/screen-objects/bulk".into(),
    }
}
