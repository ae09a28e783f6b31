//! Backend HTTP contract consumed by the editor core.
//!
//! Wire structs mirror the backend's JSON field names exactly; the typed
//! model lives in [`crate::widget`]. Timestamps on the wire are local
//! `YYYY-MM-DD HH:mm:ss` strings, never UTC-suffixed ISO.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::future::Future;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::ScreenError;
use crate::settings::TagSettings;
use crate::widget::TableDefinition;

/// Row of `GET /user-screens/{screenId}/objects`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenObjectRow {
    #[serde(rename = "ObjectName")]
    pub object_name: String,
    #[serde(rename = "Type", default)]
    pub kind: Option<String>,
    #[serde(rename = "X", default, deserialize_with = "lenient_f64")]
    pub x: Option<f64>,
    #[serde(rename = "Y", default, deserialize_with = "lenient_f64")]
    pub y: Option<f64>,
    #[serde(rename = "Width", default, deserialize_with = "lenient_f64")]
    pub width: Option<f64>,
    #[serde(rename = "Height", default, deserialize_with = "lenient_f64")]
    pub height: Option<f64>,
    #[serde(rename = "Label", default)]
    pub label: Option<String>,
    /// JSON text column; may arrive as an object, a string or a double-encoded string.
    #[serde(rename = "ChartConfig", default)]
    pub chart_config: Option<Value>,
    #[serde(rename = "ShowLabel", default, deserialize_with = "lenient_bool")]
    pub show_label: Option<bool>,
    #[serde(rename = "ShowTagName", default, deserialize_with = "lenient_bool")]
    pub show_tag_name: Option<bool>,
}

/// One item of `POST /screen-objects/bulk`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub x: f64,
    pub y: f64,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub label: String,
    #[serde(rename = "chartConfig")]
    pub chart_config: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<TagSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkUpsertRequest {
    pub screen_id: String,
    pub items: Vec<BulkItem>,
    pub delete_missing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkUpsertResponse {
    pub status: String,
    pub saved: u32,
    pub deleted: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteResponse {
    pub message: String,
}

/// `GET /user-screens/{screenId}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenMeta {
    #[serde(deserialize_with = "lenient_string")]
    pub screen_id: String,
    pub title: String,
    pub bg_color: Option<String>,
    #[serde(deserialize_with = "lenient_f64")]
    pub area_width: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub area_height: Option<f64>,
    pub is_public: bool,
    pub is_readonly: bool,
    #[serde(deserialize_with = "lenient_i64")]
    pub server_id: Option<i64>,
    pub server_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `PUT /user-screens/{screenId}/props`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenPropsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_readonly: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bg_color: Option<String>,
}

impl ScreenPropsPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Query of `GET /user-screens/{screenId}/trends`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendQuery {
    pub start_date: String,
    pub end_date: String,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendItem {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub tag_id: Option<i64>,
    pub tag_name: String,
    pub timestamp: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendResponse {
    pub ok: bool,
    pub items: Vec<TrendItem>,
}

/// Body of `POST /ias-tables/preview`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePreviewRequest {
    pub definition: TableDefinition,
    pub timezone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_id: Option<i64>,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TablePreviewResponse {
    pub rows: Vec<Map<String, Value>>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagSettingsBatchRequest {
    pub server_id: i64,
    pub screen_name: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TagSettingsRow {
    #[serde(rename = "ShowLabel", default, deserialize_with = "lenient_bool")]
    pub show_label: Option<bool>,
    #[serde(rename = "ShowTagName", default, deserialize_with = "lenient_bool")]
    pub show_tag_name: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TagSettingsUpsert {
    pub server_id: i64,
    pub screen_name: String,
    pub object_name: String,
    pub show_label: bool,
    pub show_tag_name: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AckResponse {
    pub ok: bool,
}

/// One record of a live-data snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveRecord {
    #[serde(rename = "TagName")]
    pub tag_name: String,
    #[serde(rename = "Value", default)]
    pub value: Value,
    #[serde(rename = "Timestamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(rename = "Quality", default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
}

impl LiveRecord {
    #[must_use]
    pub fn new(tag_name: impl Into<String>, value: Value) -> Self {
        Self {
            tag_name: tag_name.into(),
            value,
            timestamp: None,
            quality: None,
        }
    }

    /// Numeric reading, accepting numbers, numeric strings and booleans.
    #[must_use]
    pub fn numeric(&self) -> Option<f64> {
        numeric_value(&self.value)
    }
}

/// The backend as seen by the editor core.
///
/// One method per endpoint. Returned futures are `Send` so saves and fetches
/// can be driven from spawned tasks.
pub trait ScreenBackend: Send + Sync + 'static {
    fn load_objects(
        &self,
        screen_id: &str,
    ) -> impl Future<Output = Result<Vec<ScreenObjectRow>, ScreenError>> + Send;

    fn bulk_upsert(
        &self,
        request: &BulkUpsertRequest,
    ) -> impl Future<Output = Result<BulkUpsertResponse, ScreenError>> + Send;

    fn delete_object(
        &self,
        screen_id: &str,
        object_name: &str,
    ) -> impl Future<Output = Result<DeleteResponse, ScreenError>> + Send;

    fn screen_meta(
        &self,
        screen_id: &str,
    ) -> impl Future<Output = Result<ScreenMeta, ScreenError>> + Send;

    fn update_props(
        &self,
        screen_id: &str,
        patch: &ScreenPropsPatch,
    ) -> impl Future<Output = Result<ScreenMeta, ScreenError>> + Send;

    fn trends(
        &self,
        screen_id: &str,
        query: &TrendQuery,
    ) -> impl Future<Output = Result<TrendResponse, ScreenError>> + Send;

    fn table_preview(
        &self,
        request: &TablePreviewRequest,
    ) -> impl Future<Output = Result<TablePreviewResponse, ScreenError>> + Send;

    fn tag_settings_batch(
        &self,
        request: &TagSettingsBatchRequest,
    ) -> impl Future<Output = Result<BTreeMap<String, TagSettingsRow>, ScreenError>> + Send;

    fn upsert_tag_settings(
        &self,
        request: &TagSettingsUpsert,
    ) -> impl Future<Output = Result<AckResponse, ScreenError>> + Send;

    fn live_snapshot(
        &self,
        screen_id: &str,
    ) -> impl Future<Output = Result<Vec<LiveRecord>, ScreenError>> + Send;
}

pub(crate) fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        Value::String(text) => text.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(numeric_value)
        .filter(|value| value.is_finite()))
}

/// Integer ids arrive as numbers, floats or numeric strings.
pub(crate) fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(number)) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|value| value.is_finite() && value.fract() == 0.0)
                .map(|value| value as i64)
        }),
        Some(Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(flag)) => Some(flag),
        Some(Value::Number(number)) => number.as_i64().map(|value| value != 0),
        Some(Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => text,
        Some(Value::Number(number)) => number.to_string(),
        _ => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_rows_tolerate_loose_column_types() {
        let rows: Vec<ScreenObjectRow> = serde_json::from_value(json!([
            {
                "ObjectName": "Line1__Flow",
                "Type": "tag",
                "X": "100",
                "Y": 40,
                "Width": null,
                "ShowLabel": 1,
                "ShowTagName": "false",
                "ChartConfig": "{\"tag_name\":\"Line1__Flow\"}"
            }
        ]))
        .expect("rows");
        let row = &rows[0];
        assert_eq!(row.x, Some(100.0));
        assert_eq!(row.y, Some(40.0));
        assert_eq!(row.width, None);
        assert_eq!(row.show_label, Some(true));
        assert_eq!(row.show_tag_name, Some(false));
        assert!(row.label.is_none());
    }

    #[test]
    fn screen_meta_keeps_unknown_fields() {
        let meta: ScreenMeta = serde_json::from_value(json!({
            "screen_id": 7,
            "title": "Boiler house",
            "server_id": 2,
            "owner": "ops"
        }))
        .expect("meta");
        assert_eq!(meta.screen_id, "7");
        assert_eq!(meta.server_id, Some(2));
        assert_eq!(meta.extra.get("owner"), Some(&json!("ops")));
    }

    #[test]
    fn props_patch_serializes_only_set_fields() {
        let patch = ScreenPropsPatch {
            bg_color: Some("#101820".into()),
            ..ScreenPropsPatch::default()
        };
        assert_eq!(
            serde_json::to_string(&patch).expect("json"),
            r##"{"bg_color":"#101820"}"##
        );
    }
}
