//! Per-widget tag display settings.
//!
//! Settings are persisted apart from widget geometry. Each widget inherits the
//! screen-wide default until it gets its own override.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::api::TagSettingsRow;
use crate::widget::WidgetId;

/// Whether a tag widget shows its label and its raw tag name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagSettings {
    /// Show the user-facing label.
    pub show_label: bool,
    /// Show the underlying tag name.
    pub show_tag_name: bool,
}

impl Default for TagSettings {
    fn default() -> Self {
        Self {
            show_label: true,
            show_tag_name: false,
        }
    }
}

impl TagSettings {
    /// Applies a partially populated backend row on top of `self`.
    #[must_use]
    pub fn with_row(self, row: TagSettingsRow) -> Self {
        Self {
            show_label: row.show_label.unwrap_or(self.show_label),
            show_tag_name: row.show_tag_name.unwrap_or(self.show_tag_name),
        }
    }
}

/// Screen default plus per-widget overrides.
#[derive(Debug, Clone, Default)]
pub struct TagSettingsBook {
    default: TagSettings,
    overrides: FxHashMap<WidgetId, TagSettings>,
}

impl TagSettingsBook {
    /// Creates a book with the given screen-wide default.
    #[must_use]
    pub fn new(default: TagSettings) -> Self {
        Self {
            default,
            overrides: FxHashMap::default(),
        }
    }

    /// Screen-wide default.
    #[must_use]
    pub fn default_settings(&self) -> TagSettings {
        self.default
    }

    /// Changes the screen-wide default; overrides are kept.
    pub fn set_default(&mut self, default: TagSettings) {
        self.default = default;
    }

    /// Effective settings for `id`.
    #[must_use]
    pub fn effective(&self, id: &str) -> TagSettings {
        self.overrides.get(id).copied().unwrap_or(self.default)
    }

    /// Returns true if `id` has its own override.
    #[must_use]
    pub fn has_override(&self, id: &str) -> bool {
        self.overrides.contains_key(id)
    }

    /// Stores an override for `id`.
    pub fn set(&mut self, id: WidgetId, settings: TagSettings) {
        self.overrides.insert(id, settings);
    }

    /// Flips `show_label` for `id` and returns the new effective settings.
    pub fn toggle_label(&mut self, id: &WidgetId) -> TagSettings {
        let mut settings = self.effective(id);
        settings.show_label = !settings.show_label;
        self.set(id.clone(), settings);
        settings
    }

    /// Flips `show_tag_name` for `id` and returns the new effective settings.
    pub fn toggle_tag_name(&mut self, id: &WidgetId) -> TagSettings {
        let mut settings = self.effective(id);
        settings.show_tag_name = !settings.show_tag_name;
        self.set(id.clone(), settings);
        settings
    }

    /// Drops the override for `id`.
    pub fn remove(&mut self, id: &str) {
        self.overrides.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_shadow_the_screen_default() {
        let mut book = TagSettingsBook::new(TagSettings {
            show_label: true,
            show_tag_name: true,
        });
        let id = WidgetId::from("Flow");
        assert!(book.effective(&id).show_tag_name);

        let toggled = book.toggle_tag_name(&id);
        assert!(!toggled.show_tag_name);
        assert!(toggled.show_label);
        assert!(!book.effective(&id).show_tag_name);
        assert!(book.effective("Other").show_tag_name);

        book.remove(&id);
        assert!(book.effective(&id).show_tag_name);
    }

    #[test]
    fn partial_rows_keep_unset_fields() {
        let row = TagSettingsRow {
            show_label: Some(false),
            show_tag_name: None,
        };
        let settings = TagSettings::default().with_row(row);
        assert!(!settings.show_label);
        assert!(!settings.show_tag_name);
    }
}
