//! Widget records and their typed config variants.
//!
//! The backend stores every widget's config in a single JSON text column
//! (`ChartConfig`) regardless of widget type. At this layer it is decoded into
//! [`WidgetConfig`], discriminated by the widget type, and the tag style that
//! rides inside the same blob under `__tagStyle` is lifted into its own field.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smol_str::SmolStr;
use tracing::debug;

use crate::api::{lenient_i64, ScreenObjectRow};

/// Stable widget identity within one screen.
pub type WidgetId = SmolStr;

/// Reserved key carrying the tag style inside the persisted config blob.
pub const TAG_STYLE_KEY: &str = "__tagStyle";

/// Widget type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetKind {
    Tag,
    Chart,
    Table,
    Analytic,
}

impl WidgetKind {
    /// Parses the persisted `Type` column. Unknown values fall back to `tag`.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text.trim().to_ascii_lowercase().as_str() {
            "chart" | "trend" => Self::Chart,
            "table" => Self::Table,
            "analytic" | "analytics" => Self::Analytic,
            _ => Self::Tag,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tag => "tag",
            Self::Chart => "chart",
            Self::Table => "table",
            Self::Analytic => "analytic",
        }
    }

    /// Canvas size used when a widget carries no explicit size.
    #[must_use]
    pub fn default_size(self) -> (f64, f64) {
        match self {
            Self::Tag => (180.0, 68.0),
            Self::Chart => (320.0, 200.0),
            Self::Table => (760.0, 360.0),
            Self::Analytic => (480.0, 340.0),
        }
    }
}

impl std::fmt::Display for WidgetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the tag behind a `tag` widget.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    pub tag_name: String,
    #[serde(deserialize_with = "lenient_i64", skip_serializing_if = "Option::is_none")]
    pub tag_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(deserialize_with = "lenient_i64", skip_serializing_if = "Option::is_none")]
    pub server_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

impl TagConfig {
    #[must_use]
    pub fn named(tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
            ..Self::default()
        }
    }
}

/// Per-series line styling of a chart.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LineStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    pub dashed: bool,
    pub smooth: bool,
}

/// Trend chart config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChartConfig {
    pub tags: Vec<String>,
    pub chart_type: String,
    pub range_hours: f64,
    pub interval_ms: u64,
    pub align_scales: bool,
    pub aliases: BTreeMap<String, String>,
    pub lines: BTreeMap<String, LineStyle>,
    pub colors: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bg_color: Option<String>,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            chart_type: "line".to_string(),
            range_hours: 1.0,
            interval_ms: 10_000,
            align_scales: false,
            aliases: BTreeMap::new(),
            lines: BTreeMap::new(),
            colors: BTreeMap::new(),
            bg_color: None,
        }
    }
}

impl ChartConfig {
    #[must_use]
    pub fn for_tags(tags: Vec<String>) -> Self {
        Self {
            tags,
            ..Self::default()
        }
    }

    /// Display name for a series, honoring configured aliases.
    #[must_use]
    pub fn alias_for<'a>(&'a self, tag: &'a str) -> &'a str {
        self.aliases
            .get(tag)
            .map(String::as_str)
            .filter(|alias| !alias.trim().is_empty())
            .unwrap_or(tag)
    }
}

/// How a table's own time range is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeMode {
    #[default]
    Relative,
    Absolute,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TableTimeRange {
    pub mode: RangeMode,
    pub last_hours: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl Default for TableTimeRange {
    fn default() -> Self {
        Self {
            mode: RangeMode::Relative,
            last_hours: 24.0,
            from: None,
            to: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TableInterval {
    pub aggregation: String,
    pub step_minutes: u32,
}

impl Default for TableInterval {
    fn default() -> Self {
        Self {
            aggregation: "avg".to_string(),
            step_minutes: 60,
        }
    }
}

/// One table column bound to a tag.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TableColumn {
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

impl TableColumn {
    #[must_use]
    pub fn for_tag(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|title| !title.trim().is_empty())
            .unwrap_or(&self.tag)
    }
}

/// Table widget definition: time range, aggregation interval and columns.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TableDefinition {
    pub time_range: TableTimeRange,
    pub interval: TableInterval,
    pub columns: Vec<TableColumn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_id: Option<i64>,
}

/// Visual style of a `tag` widget.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TagStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bg_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_font_px: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_font_px: Option<u32>,
}

impl TagStyle {
    /// Fields set in `patch` override this style; unset fields are kept.
    #[must_use]
    pub fn merged(&self, patch: &TagStyle) -> TagStyle {
        TagStyle {
            bg_color: patch.bg_color.clone().or_else(|| self.bg_color.clone()),
            text_color: patch.text_color.clone().or_else(|| self.text_color.clone()),
            value_color: patch
                .value_color
                .clone()
                .or_else(|| self.value_color.clone()),
            header_font_px: patch.header_font_px.or(self.header_font_px),
            value_font_px: patch.value_font_px.or(self.value_font_px),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == TagStyle::default()
    }
}

/// Type-specific widget config, discriminated by [`WidgetKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetConfig {
    Tag(TagConfig),
    Chart(ChartConfig),
    Table(TableDefinition),
    /// Opaque analytic config, carried through untouched.
    Analytic(Value),
}

impl WidgetConfig {
    #[must_use]
    pub fn kind(&self) -> WidgetKind {
        match self {
            Self::Tag(_) => WidgetKind::Tag,
            Self::Chart(_) => WidgetKind::Chart,
            Self::Table(_) => WidgetKind::Table,
            Self::Analytic(_) => WidgetKind::Analytic,
        }
    }

    #[must_use]
    pub fn default_for(kind: WidgetKind) -> Self {
        match kind {
            WidgetKind::Tag => Self::Tag(TagConfig::default()),
            WidgetKind::Chart => Self::Chart(ChartConfig::default()),
            WidgetKind::Table => Self::Table(TableDefinition::default()),
            WidgetKind::Analytic => Self::Analytic(Value::Object(Map::new())),
        }
    }

    /// Decodes a persisted config blob for a widget of `kind`.
    ///
    /// Never fails: malformed blobs decode to the kind's defaults. The tag
    /// style is only returned for `tag` widgets.
    #[must_use]
    pub fn decode(kind: WidgetKind, raw: &Value) -> (Self, Option<TagStyle>) {
        let mut map = unwrap_config_blob(raw);
        let style = map.remove(TAG_STYLE_KEY);
        let object = Value::Object(map);
        match kind {
            WidgetKind::Tag => {
                let style = style
                    .and_then(|value| serde_json::from_value::<TagStyle>(value).ok())
                    .filter(|style| !style.is_empty());
                (Self::Tag(decode_or_default(object)), style)
            }
            WidgetKind::Chart => (Self::Chart(decode_or_default(object)), None),
            WidgetKind::Table => (Self::Table(decode_or_default(object)), None),
            WidgetKind::Analytic => (Self::Analytic(object), None),
        }
    }

    /// Encodes the config into the flat persisted blob.
    #[must_use]
    pub fn encode(&self, style: Option<&TagStyle>) -> Value {
        let mut value = match self {
            Self::Tag(config) => serde_json::to_value(config),
            Self::Chart(config) => serde_json::to_value(config),
            Self::Table(config) => serde_json::to_value(config),
            Self::Analytic(value) => Ok(value.clone()),
        }
        .unwrap_or_else(|_| Value::Object(Map::new()));
        if let (Self::Tag(_), Some(style), Value::Object(map)) = (self, style, &mut value) {
            if !style.is_empty() {
                if let Ok(style) = serde_json::to_value(style) {
                    map.insert(TAG_STYLE_KEY.to_string(), style);
                }
            }
        }
        value
    }

    /// Tag names referenced by this config, in declaration order.
    #[must_use]
    pub fn tag_names(&self) -> Vec<&str> {
        match self {
            Self::Tag(config) => vec![config.tag_name.as_str()],
            Self::Chart(config) => config.tags.iter().map(String::as_str).collect(),
            Self::Table(definition) => definition
                .columns
                .iter()
                .map(|column| column.tag.as_str())
                .collect(),
            Self::Analytic(_) => Vec::new(),
        }
    }
}

/// A widget placed on a screen.
#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    pub id: WidgetId,
    pub x: f64,
    pub y: f64,
    /// Explicit size; `None` means the kind's default.
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub label: String,
    pub config: WidgetConfig,
    /// Only meaningful for `tag` widgets.
    pub style: Option<TagStyle>,
}

impl Widget {
    /// Creates a widget with default size and a label derived from its config.
    #[must_use]
    pub fn new(id: impl Into<WidgetId>, config: WidgetConfig, x: f64, y: f64) -> Self {
        let id = id.into();
        let label = default_label(&id, &config);
        Self {
            id,
            x,
            y,
            width: None,
            height: None,
            label,
            config,
            style: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> WidgetKind {
        self.config.kind()
    }

    /// Effective size, falling back to the kind's default.
    #[must_use]
    pub fn size(&self) -> (f64, f64) {
        let (width, height) = self.kind().default_size();
        (self.width.unwrap_or(width), self.height.unwrap_or(height))
    }

    /// Decodes a persisted object row.
    #[must_use]
    pub fn from_row(row: &ScreenObjectRow) -> Self {
        let kind = WidgetKind::parse(row.kind.as_deref().unwrap_or_default());
        let raw = row.chart_config.clone().unwrap_or(Value::Null);
        let (mut config, style) = WidgetConfig::decode(kind, &raw);
        if let WidgetConfig::Tag(tag) = &mut config {
            // Legacy rows keyed by plain tag name carry no tag_name in the blob.
            if tag.tag_name.trim().is_empty() {
                tag.tag_name = row.object_name.clone();
            }
        }
        let id = WidgetId::from(row.object_name.as_str());
        let label = row
            .label
            .clone()
            .filter(|label| !label.trim().is_empty())
            .unwrap_or_else(|| default_label(&id, &config));
        Self {
            id,
            x: row.x.unwrap_or(0.0),
            y: row.y.unwrap_or(0.0),
            width: row.width.filter(|value| *value > 0.0),
            height: row.height.filter(|value| *value > 0.0),
            label,
            config,
            style,
        }
    }
}

fn default_label(id: &str, config: &WidgetConfig) -> String {
    match config {
        WidgetConfig::Tag(tag) if !tag.tag_name.is_empty() => tag.tag_name.clone(),
        WidgetConfig::Chart(chart) => chart.tags.first().cloned().unwrap_or_else(|| id.to_string()),
        _ => id.to_string(),
    }
}

/// Normalizes a persisted config blob into a JSON object.
///
/// Accepts an object, a JSON string holding an object, or a string that was
/// encoded twice. Anything else yields an empty object.
#[must_use]
pub fn unwrap_config_blob(raw: &Value) -> Map<String, Value> {
    let mut current = raw.clone();
    for _ in 0..3 {
        match current {
            Value::Object(map) => return map,
            Value::String(text) => {
                let text = text.trim();
                if text.is_empty() {
                    break;
                }
                match serde_json::from_str::<Value>(text) {
                    Ok(next) => current = next,
                    Err(err) => {
                        debug!("discarding malformed widget config: {err}");
                        break;
                    }
                }
            }
            _ => break,
        }
    }
    Map::new()
}

fn decode_or_default<T: serde::de::DeserializeOwned + Default>(value: Value) -> T {
    serde_json::from_value(value).unwrap_or_else(|err| {
        debug!("widget config shape mismatch, using defaults: {err}");
        T::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_object_string_and_double_encoded_blobs() {
        let object = json!({ "tags": ["A", "B"], "rangeHours": 6 });
        let once = Value::String(object.to_string());
        let twice = Value::String(once.to_string());

        for raw in [object, once, twice] {
            let (config, _) = WidgetConfig::decode(WidgetKind::Chart, &raw);
            let WidgetConfig::Chart(chart) = config else {
                panic!("expected chart config");
            };
            assert_eq!(chart.tags, vec!["A".to_string(), "B".to_string()]);
            assert_eq!(chart.range_hours, 6.0);
            assert_eq!(chart.interval_ms, 10_000);
        }
    }

    #[test]
    fn malformed_blobs_fall_back_to_defaults() {
        for raw in [
            json!("{not json"),
            json!(42),
            Value::Null,
            json!({ "tags": "oops" }),
        ] {
            let (config, style) = WidgetConfig::decode(WidgetKind::Chart, &raw);
            assert_eq!(config, WidgetConfig::Chart(ChartConfig::default()));
            assert!(style.is_none());
        }
    }

    #[test]
    fn tag_style_is_lifted_out_of_the_blob() {
        let raw = json!({
            "tag_name": "Line1__Flow",
            "tag_id": "17",
            "server_id": 3.0,
            "__tagStyle": { "bgColor": "#000", "valueFontPx": 22 }
        });
        let (config, style) = WidgetConfig::decode(WidgetKind::Tag, &raw);
        let WidgetConfig::Tag(tag) = &config else {
            panic!("expected tag config");
        };
        assert_eq!(tag.tag_name, "Line1__Flow");
        assert_eq!(tag.tag_id, Some(17));
        assert_eq!(tag.server_id, Some(3));
        let style = style.expect("style");
        assert_eq!(style.bg_color.as_deref(), Some("#000"));
        assert_eq!(style.value_font_px, Some(22));

        let encoded = config.encode(Some(&style));
        assert_eq!(encoded[TAG_STYLE_KEY]["valueFontPx"], json!(22));
        assert_eq!(encoded["tag_name"], json!("Line1__Flow"));
    }

    #[test]
    fn style_key_is_ignored_for_non_tag_widgets() {
        let raw = json!({ "tags": ["A"], "__tagStyle": { "bgColor": "#fff" } });
        let (config, style) = WidgetConfig::decode(WidgetKind::Chart, &raw);
        assert!(style.is_none());
        let encoded = config.encode(Some(&TagStyle {
            bg_color: Some("#fff".into()),
            ..TagStyle::default()
        }));
        assert!(encoded.get(TAG_STYLE_KEY).is_none());
    }

    #[test]
    fn legacy_rows_use_object_name_as_tag() {
        let row = ScreenObjectRow {
            object_name: "Boiler:Temp".into(),
            kind: Some("tag".into()),
            x: Some(10.0),
            y: Some(20.0),
            width: Some(0.0),
            height: None,
            label: None,
            chart_config: Some(json!("")),
            show_label: None,
            show_tag_name: None,
        };
        let widget = Widget::from_row(&row);
        assert_eq!(widget.kind(), WidgetKind::Tag);
        assert_eq!(widget.label, "Boiler:Temp");
        assert_eq!(widget.width, None);
        assert_eq!(widget.size(), (180.0, 68.0));
        assert_eq!(widget.config.tag_names(), vec!["Boiler:Temp"]);
    }

    #[test]
    fn style_merge_only_overrides_set_fields() {
        let base = TagStyle {
            bg_color: Some("#111".into()),
            text_color: Some("#eee".into()),
            ..TagStyle::default()
        };
        let patch = TagStyle {
            bg_color: Some("#222".into()),
            header_font_px: Some(14),
            ..TagStyle::default()
        };
        let merged = base.merged(&patch);
        assert_eq!(merged.bg_color.as_deref(), Some("#222"));
        assert_eq!(merged.text_color.as_deref(), Some("#eee"));
        assert_eq!(merged.header_font_px, Some(14));
    }
}
