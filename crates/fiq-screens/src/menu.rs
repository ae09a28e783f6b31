//! Context-menu actions, type conversion, groups and style broadcast.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::debounce::Debouncer;
use crate::registry::{WidgetPatch, WidgetRegistry};
use crate::widget::{ChartConfig, TagConfig, TagStyle, Widget, WidgetConfig, WidgetId, WidgetKind};

/// Quiet period before "apply style to all" is broadcast.
pub const STYLE_DEBOUNCE: Duration = Duration::from_millis(150);

/// Right-click actions of a widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    /// Set a new label.
    Rename(String),
    /// Delete the widget.
    Delete,
    /// Flip "show label".
    ToggleLabel,
    /// Flip "show tag name".
    ToggleTagName,
    /// Convert tag <-> chart.
    ToggleType,
    /// Add the widget to a named group.
    AddToGroup(String),
    /// Dismiss the menu.
    Close,
}

impl MenuAction {
    /// Actions offered for a widget of `kind`.
    #[must_use]
    pub fn available(kind: WidgetKind) -> Vec<&'static str> {
        match kind {
            WidgetKind::Tag => vec![
                "rename",
                "delete",
                "toggle_label",
                "toggle_tagname",
                "toggle_type",
                "add_to_group",
                "close",
            ],
            WidgetKind::Chart => vec!["rename", "delete", "toggle_type", "add_to_group", "close"],
            WidgetKind::Table | WidgetKind::Analytic => {
                vec!["rename", "delete", "add_to_group", "close"]
            }
        }
    }
}

/// Converts a tag widget into a chart widget and back.
///
/// Tag to chart seeds the chart's tags from the tag's own name; chart to tag
/// takes the first declared tag as tag name and label. Id and position are
/// kept. An explicit size is kept, an unset one falls back to the target
/// kind's default. Tables and analytics are not convertible.
#[must_use]
pub fn convert_widget(widget: &Widget) -> Option<Widget> {
    let (config, label) = match &widget.config {
        WidgetConfig::Tag(tag) => {
            let name = if tag.tag_name.trim().is_empty() {
                widget.label.clone()
            } else {
                tag.tag_name.clone()
            };
            (
                WidgetConfig::Chart(ChartConfig::for_tags(vec![name])),
                widget.label.clone(),
            )
        }
        WidgetConfig::Chart(chart) => {
            let first = chart
                .tags
                .first()
                .cloned()
                .unwrap_or_else(|| widget.label.clone());
            (WidgetConfig::Tag(TagConfig::named(first.clone())), first)
        }
        WidgetConfig::Table(_) | WidgetConfig::Analytic(_) => return None,
    };
    Some(Widget {
        id: widget.id.clone(),
        x: widget.x,
        y: widget.y,
        width: widget.width,
        height: widget.height,
        label,
        config,
        style: None,
    })
}

/// Merges `patch` into the style of every tag widget. Returns the ids whose
/// style actually changed.
pub fn apply_style(registry: &mut WidgetRegistry, patch: &TagStyle) -> Vec<WidgetId> {
    let mut changed = Vec::new();
    for id in registry.ids_of_kind(WidgetKind::Tag) {
        let Some(widget) = registry.get(&id) else {
            continue;
        };
        let current = widget.style.clone().unwrap_or_default();
        let merged = current.merged(patch);
        if widget.style.as_ref() == Some(&merged) || (widget.style.is_none() && merged.is_empty()) {
            continue;
        }
        let patch = WidgetPatch {
            style: Some(Some(merged).filter(|style| !style.is_empty())),
            ..WidgetPatch::default()
        };
        if registry.upsert(&id, patch).is_ok() {
            changed.push(id);
        }
    }
    changed
}

/// Debounced "apply style to all": the latest scheduled style wins.
#[derive(Debug)]
pub struct StylePropagator {
    debounce: Debouncer<()>,
    delay: Duration,
}

impl StylePropagator {
    /// Creates a propagator on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            debounce: Debouncer::new(),
            delay,
        }
    }

    /// Runs `apply(style)` after the quiet period unless replaced first.
    pub fn schedule<F>(&self, style: TagStyle, apply: F)
    where
        F: FnOnce(TagStyle) + Send + 'static,
    {
        self.debounce.schedule((), self.delay, async move {
            apply(style);
        });
    }

    /// Returns true while a broadcast waits.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.debounce.is_pending(&())
    }

    /// Broadcasts a waiting style now.
    pub async fn flush(&self) {
        self.debounce.flush().await;
    }
}

/// Session-local widget groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WidgetGroups {
    groups: BTreeMap<String, Vec<WidgetId>>,
}

impl WidgetGroups {
    /// Adds `id` to `group`. Returns false if it was already a member.
    pub fn add(&mut self, group: &str, id: &WidgetId) -> bool {
        let members = self.groups.entry(group.trim().to_string()).or_default();
        if members.contains(id) {
            return false;
        }
        members.push(id.clone());
        true
    }

    /// Members of `group` in insertion order.
    #[must_use]
    pub fn members(&self, group: &str) -> &[WidgetId] {
        self.groups.get(group.trim()).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Groups containing `id`.
    #[must_use]
    pub fn groups_of(&self, id: &str) -> Vec<&str> {
        self.groups
            .iter()
            .filter(|(_, members)| members.iter().any(|member| member == id))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Group names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.groups.keys().map(String::as_str).collect()
    }

    /// Drops `id` from every group; empty groups disappear.
    pub fn remove_widget(&mut self, id: &str) {
        for members in self.groups.values_mut() {
            members.retain(|member| member != id);
        }
        self.groups.retain(|_, members| !members.is_empty());
    }
}
