//! In-memory widget registry: the single source of truth for a canvas.

#![allow(missing_docs)]

use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;

use crate::error::ScreenError;
use crate::widget::{TagStyle, Widget, WidgetConfig, WidgetId, WidgetKind};

/// Partial widget update. Unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WidgetPatch {
    pub x: Option<f64>,
    pub y: Option<f64>,
    /// `Some(None)` clears an explicit width back to the kind's default.
    pub width: Option<Option<f64>>,
    pub height: Option<Option<f64>>,
    pub label: Option<String>,
    pub config: Option<WidgetConfig>,
    pub style: Option<Option<TagStyle>>,
}

impl WidgetPatch {
    /// Position-only patch.
    #[must_use]
    pub fn position(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    /// Size-only patch.
    #[must_use]
    pub fn size(width: f64, height: f64) -> Self {
        Self {
            width: Some(Some(width)),
            height: Some(Some(height)),
            ..Self::default()
        }
    }

    /// Label-only patch.
    #[must_use]
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    fn apply(self, widget: &mut Widget) {
        if let Some(x) = self.x {
            widget.x = x;
        }
        if let Some(y) = self.y {
            widget.y = y;
        }
        if let Some(width) = self.width {
            widget.width = width;
        }
        if let Some(height) = self.height {
            widget.height = height;
        }
        if let Some(label) = self.label {
            widget.label = label;
        }
        if let Some(config) = self.config {
            widget.config = config;
        }
        if let Some(style) = self.style {
            widget.style = style;
        }
    }
}

/// Widget map keyed by id, in placement order.
///
/// Pure state: no method performs I/O. Persistence is triggered by the
/// caller after a mutation.
#[derive(Debug, Clone, Default)]
pub struct WidgetRegistry {
    widgets: IndexMap<WidgetId, Widget>,
}

impl WidgetRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-populates from backend rows, replacing current content.
    pub fn load(&mut self, widgets: impl IntoIterator<Item = Widget>) {
        self.widgets.clear();
        for widget in widgets {
            self.widgets.insert(widget.id.clone(), widget);
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Widget> {
        self.widgets.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.widgets.contains_key(id)
    }

    /// Inserts a new widget. Fails if the id is already taken.
    pub fn insert(&mut self, widget: Widget) -> Result<&Widget, ScreenError> {
        if self.widgets.contains_key(widget.id.as_str()) {
            return Err(ScreenError::Precondition(
                format!("widget id '{}' already exists", widget.id).into(),
            ));
        }
        let id = widget.id.clone();
        self.widgets.insert(id.clone(), widget);
        self.widgets
            .get(id.as_str())
            .ok_or(ScreenError::UnknownWidget(id))
    }

    /// Merges `patch` into the widget and returns the result.
    pub fn upsert(&mut self, id: &str, patch: WidgetPatch) -> Result<&Widget, ScreenError> {
        let widget = self
            .widgets
            .get_mut(id)
            .ok_or_else(|| ScreenError::UnknownWidget(id.into()))?;
        patch.apply(widget);
        Ok(widget)
    }

    /// Removes the widget, keeping the placement order of the rest.
    pub fn remove(&mut self, id: &str) -> Option<Widget> {
        self.widgets.shift_remove(id)
    }

    #[must_use]
    pub fn list(&self) -> Vec<&Widget> {
        self.widgets.values().collect()
    }

    /// Ids of widgets of `kind`.
    #[must_use]
    pub fn ids_of_kind(&self, kind: WidgetKind) -> Vec<WidgetId> {
        self.widgets
            .values()
            .filter(|widget| widget.kind() == kind)
            .map(|widget| widget.id.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.widgets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.widgets.is_empty()
    }
}

/// Allocates widget ids that never collide within a session.
///
/// Tag widgets are keyed by tag name; repeated placement of the same tag gets
/// the lowest free `-{n}` suffix, starting at 2. Synthetic widgets
/// get `{kind}_{unix_ms}_{seq}`. `is_taken` must cover both live widgets and
/// tombstoned ids so a deleted id is never handed out again.
#[derive(Debug, Default)]
pub struct IdAllocator {
    seq: u64,
}

impl IdAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for a widget showing `tag_name`.
    pub fn for_tag(&mut self, tag_name: &str, is_taken: impl Fn(&str) -> bool) -> WidgetId {
        let base = tag_name.trim();
        if !base.is_empty() && !is_taken(base) {
            return WidgetId::from(base);
        }
        let base = if base.is_empty() { "tag" } else { base };
        (2u64..)
            .map(|suffix| format!("{base}-{suffix}"))
            .find(|candidate| !is_taken(candidate))
            .map_or_else(|| WidgetId::from(base), WidgetId::from)
    }

    /// Id for a table/analytic widget.
    pub fn synthetic(&mut self, kind: WidgetKind, is_taken: impl Fn(&str) -> bool) -> WidgetId {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        loop {
            self.seq += 1;
            let candidate = format!("{kind}_{stamp}_{}", self.seq);
            if !is_taken(&candidate) {
                return candidate.into();
            }
        }
    }
}
