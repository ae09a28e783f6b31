//! Screen editor facade.
//!
//! Owns the registry of one open screen and routes every mutation through
//! the persistence synchronizer. All methods take `&self`; registry and
//! settings sit behind `parking_lot` locks that are never held across an
//! `.await`.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::api::{
    ScreenBackend, ScreenMeta, ScreenPropsPatch, TagSettingsBatchRequest, TagSettingsRow,
    TagSettingsUpsert,
};
use crate::config::ClientConfig;
use crate::error::ScreenError;
use crate::fetch::chart::ChartFeed;
use crate::fetch::live::LiveFeed;
use crate::fetch::table::{TableFeed, TableFeedOptions};
use crate::menu::{self, MenuAction, StylePropagator, WidgetGroups};
use crate::notice::{Notice, NoticeSink};
use crate::registry::{IdAllocator, WidgetPatch, WidgetRegistry};
use crate::settings::{TagSettings, TagSettingsBook};
use crate::sync::{SaveOutcome, SavePayload, SaveSync};
use crate::time_ctx::{Clock, LocalClock, TimeController, TimeView};
use crate::widget::{
    ChartConfig, TableDefinition, TagConfig, TagStyle, Widget, WidgetConfig, WidgetId, WidgetKind,
};

/// Editing session of one screen.
pub struct ScreenEditor<B> {
    backend: Arc<B>,
    screen_id: String,
    config: ClientConfig,
    registry: Arc<RwLock<WidgetRegistry>>,
    settings: Arc<RwLock<TagSettingsBook>>,
    sync: SaveSync<B>,
    ids: Mutex<IdAllocator>,
    meta: RwLock<ScreenMeta>,
    groups: RwLock<WidgetGroups>,
    styles: StylePropagator,
    time: TimeController,
    clock: Arc<dyn Clock>,
    notices: Arc<dyn NoticeSink>,
}

impl<B: ScreenBackend> ScreenEditor<B> {
    /// Creates an empty session without contacting the backend.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    pub fn new(
        backend: Arc<B>,
        screen_id: impl Into<String>,
        config: ClientConfig,
        notices: Arc<dyn NoticeSink>,
    ) -> Self {
        let screen_id = screen_id.into();
        let sync = SaveSync::new(
            Arc::clone(&backend),
            screen_id.clone(),
            config.editor.save_debounce,
            Arc::clone(&notices),
        );
        let styles = StylePropagator::new(config.editor.style_debounce);
        Self {
            backend,
            meta: RwLock::new(ScreenMeta {
                screen_id: screen_id.clone(),
                ..ScreenMeta::default()
            }),
            screen_id,
            config,
            registry: Arc::new(RwLock::new(WidgetRegistry::new())),
            settings: Arc::new(RwLock::new(TagSettingsBook::default())),
            sync,
            ids: Mutex::new(IdAllocator::new()),
            groups: RwLock::new(WidgetGroups::default()),
            styles,
            time: TimeController::new(),
            clock: Arc::new(LocalClock),
            notices,
        }
    }

    /// Replaces the wall clock used for query windows.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Opens a screen: metadata, objects and tag settings.
    pub async fn open(
        backend: Arc<B>,
        screen_id: impl Into<String>,
        config: ClientConfig,
        notices: Arc<dyn NoticeSink>,
    ) -> Result<Self, ScreenError> {
        let editor = Self::new(backend, screen_id, config, notices);
        editor.load().await?;
        Ok(editor)
    }

    /// (Re)loads metadata and widgets from the backend.
    ///
    /// Pending edits are flushed first and the save ledger is reset, so a
    /// reload starts a fresh session. Loaded widgets are recorded as already
    /// saved, so opening a screen never writes anything back.
    pub async fn load(&self) -> Result<usize, ScreenError> {
        self.flush().await;
        self.sync.reset();
        let meta = self.backend.screen_meta(&self.screen_id).await?;
        let rows = self.backend.load_objects(&self.screen_id).await?;

        let mut book = TagSettingsBook::default();
        let widgets: Vec<Widget> = rows
            .iter()
            .map(|row| {
                let widget = Widget::from_row(row);
                if row.show_label.is_some() || row.show_tag_name.is_some() {
                    let row_settings = TagSettingsRow {
                        show_label: row.show_label,
                        show_tag_name: row.show_tag_name,
                    };
                    book.set(
                        widget.id.clone(),
                        book.default_settings().with_row(row_settings),
                    );
                }
                widget
            })
            .collect();

        for widget in &widgets {
            self.sync
                .prime(&SavePayload::from_widget(widget, Some(book.effective(&widget.id))));
        }
        let count = widgets.len();
        let tag_ids: Vec<String> = widgets
            .iter()
            .filter(|widget| widget.kind() == WidgetKind::Tag)
            .map(|widget| widget.id.to_string())
            .collect();
        self.registry.write().load(widgets);
        *self.settings.write() = book;
        let server_id = meta.server_id;
        *self.meta.write() = meta;
        info!(screen = %self.screen_id, widgets = count, "screen loaded");

        if let (Some(server_id), false) = (server_id, tag_ids.is_empty()) {
            self.load_tag_settings(server_id, tag_ids).await;
        }
        Ok(count)
    }

    async fn load_tag_settings(&self, server_id: i64, tags: Vec<String>) {
        let request = TagSettingsBatchRequest {
            server_id,
            screen_name: self.screen_name(),
            tags,
        };
        match self.backend.tag_settings_batch(&request).await {
            Ok(rows) => {
                let mut book = self.settings.write();
                for (tag, row) in rows {
                    let settings = book.effective(&tag).with_row(row);
                    book.set(WidgetId::from(tag), settings);
                }
            }
            Err(err) => {
                warn!(screen = %self.screen_id, "tag settings not loaded: {err}");
                self.notices
                    .notify(Notice::failure("tag settings not loaded", &err));
            }
        }
    }

    fn screen_name(&self) -> String {
        let meta = self.meta.read();
        if meta.title.trim().is_empty() {
            self.screen_id.clone()
        } else {
            meta.title.clone()
        }
    }

    /// Screen id.
    #[must_use]
    pub fn screen_id(&self) -> &str {
        &self.screen_id
    }

    /// Cached screen metadata.
    #[must_use]
    pub fn meta(&self) -> ScreenMeta {
        self.meta.read().clone()
    }

    /// Widget by id.
    #[must_use]
    pub fn widget(&self, id: &str) -> Option<Widget> {
        self.registry.read().get(id).cloned()
    }

    /// All widgets in placement order.
    #[must_use]
    pub fn widgets(&self) -> Vec<Widget> {
        self.registry.read().list().into_iter().cloned().collect()
    }

    /// Effective tag display settings of a widget.
    #[must_use]
    pub fn tag_settings(&self, id: &str) -> TagSettings {
        self.settings.read().effective(id)
    }

    /// The persistence synchronizer of this screen.
    #[must_use]
    pub fn sync(&self) -> &SaveSync<B> {
        &self.sync
    }

    /// The time-travel controller; the only writer of the time context.
    #[must_use]
    pub fn time(&self) -> &TimeController {
        &self.time
    }

    /// Read-only time context handle for a widget.
    #[must_use]
    pub fn time_view(&self) -> TimeView {
        self.time.view()
    }

    fn payload(&self, widget: &Widget) -> SavePayload {
        let settings = self.settings.read().effective(&widget.id);
        SavePayload::from_widget(widget, Some(settings))
    }

    fn persist(&self, widget: &Widget) {
        self.sync.schedule_save(self.payload(widget));
    }

    fn is_taken(&self, id: &str) -> bool {
        self.registry.read().contains(id) || self.sync.is_tombstoned(id)
    }

    fn insert(&self, widget: Widget) -> Result<Widget, ScreenError> {
        let widget = self.registry.write().insert(widget)?.clone();
        debug!(widget = %widget.id, kind = %widget.kind(), "widget added");
        Ok(widget)
    }

    fn mutate(&self, id: &str, patch: WidgetPatch) -> Result<Widget, ScreenError> {
        let widget = self.registry.write().upsert(id, patch)?.clone();
        self.persist(&widget);
        Ok(widget)
    }

    fn precondition(&self, message: &str) -> ScreenError {
        self.notices.notify(Notice::precondition(message));
        ScreenError::Precondition(message.into())
    }

    /// Places a tag widget; saved after the debounce delay.
    pub fn add_tag_widget(&self, tag: TagConfig, x: f64, y: f64) -> Result<Widget, ScreenError> {
        if tag.tag_name.trim().is_empty() {
            return Err(self.precondition("select a tag first"));
        }
        let id = self
            .ids
            .lock()
            .for_tag(&tag.tag_name, |candidate| self.is_taken(candidate));
        let widget = self.insert(Widget::new(id, WidgetConfig::Tag(tag), x, y))?;
        self.persist(&widget);
        Ok(widget)
    }

    /// Places a chart widget; saved after the debounce delay.
    pub fn add_chart_widget(&self, chart: ChartConfig, x: f64, y: f64) -> Result<Widget, ScreenError> {
        if chart.tags.is_empty() {
            return Err(self.precondition("select at least one tag"));
        }
        let id = self
            .ids
            .lock()
            .synthetic(WidgetKind::Chart, |candidate| self.is_taken(candidate));
        let widget = self.insert(Widget::new(id, WidgetConfig::Chart(chart), x, y))?;
        self.persist(&widget);
        Ok(widget)
    }

    /// Places a table widget and saves it immediately.
    ///
    /// If the backend rejects the create, the widget is removed again.
    pub async fn add_table_widget(
        &self,
        definition: TableDefinition,
        x: f64,
        y: f64,
    ) -> Result<Widget, ScreenError> {
        if definition.columns.is_empty() {
            return Err(self.precondition("select at least one tag column"));
        }
        let id = self
            .ids
            .lock()
            .synthetic(WidgetKind::Table, |candidate| self.is_taken(candidate));
        let widget = self.insert(Widget::new(id, WidgetConfig::Table(definition), x, y))?;
        match self.sync.save_now(self.payload(&widget)).await {
            SaveOutcome::Failed(err) => {
                self.roll_back(&widget.id);
                Err(err)
            }
            SaveOutcome::Suppressed => {
                self.roll_back(&widget.id);
                Err(ScreenError::UnknownWidget(widget.id))
            }
            SaveOutcome::Written | SaveOutcome::Unchanged => Ok(widget),
        }
    }

    /// Undoes a create the backend never confirmed. The id is tombstoned so
    /// edits made while the create was in flight are never sent.
    fn roll_back(&self, id: &WidgetId) {
        self.registry.write().remove(id);
        self.settings.write().remove(id);
        self.groups.write().remove_widget(id);
        self.sync.forget(id);
        debug!(widget = %id, "table widget rolled back");
    }

    /// Moves a widget (canvas coordinates, zoom independent).
    pub fn move_widget(&self, id: &str, x: f64, y: f64) -> Result<Widget, ScreenError> {
        self.mutate(id, WidgetPatch::position(x, y))
    }

    /// Sets an explicit size.
    pub fn resize_widget(&self, id: &str, width: f64, height: f64) -> Result<Widget, ScreenError> {
        self.mutate(id, WidgetPatch::size(width, height))
    }

    /// Sets the label.
    pub fn rename_widget(&self, id: &str, label: &str) -> Result<Widget, ScreenError> {
        self.mutate(id, WidgetPatch::label(label.trim()))
    }

    /// Replaces the widget's config. The kind must stay the same; use
    /// [`MenuAction::ToggleType`] to convert.
    pub fn update_config(&self, id: &str, config: WidgetConfig) -> Result<Widget, ScreenError> {
        let kind = self
            .widget(id)
            .map(|widget| widget.kind())
            .ok_or_else(|| ScreenError::UnknownWidget(id.into()))?;
        if kind != config.kind() {
            return Err(ScreenError::Precondition(
                format!("cannot store {} config on a {kind} widget", config.kind()).into(),
            ));
        }
        self.mutate(
            id,
            WidgetPatch {
                config: Some(config),
                ..WidgetPatch::default()
            },
        )
    }

    /// Sets or clears the style of a tag widget.
    pub fn set_style(&self, id: &str, style: Option<TagStyle>) -> Result<Widget, ScreenError> {
        match self.widget(id).map(|widget| widget.kind()) {
            Some(WidgetKind::Tag) => {}
            Some(kind) => {
                return Err(ScreenError::Precondition(
                    format!("{kind} widgets have no tag style").into(),
                ))
            }
            None => return Err(ScreenError::UnknownWidget(id.into())),
        }
        self.mutate(
            id,
            WidgetPatch {
                style: Some(style.filter(|style| !style.is_empty())),
                ..WidgetPatch::default()
            },
        )
    }

    /// Removes a widget locally, tombstones it and deletes it on the backend.
    ///
    /// The local removal stands even if the backend call fails.
    pub async fn delete_widget(&self, id: &str) -> Result<(), ScreenError> {
        let removed = self
            .registry
            .write()
            .remove(id)
            .ok_or_else(|| ScreenError::UnknownWidget(id.into()))?;
        self.settings.write().remove(id);
        self.groups.write().remove_widget(id);
        match self.sync.delete(&removed.id).await {
            Ok(_) => {
                debug!(widget = %removed.id, "widget deleted");
                Ok(())
            }
            Err(err) => {
                warn!(widget = %removed.id, "delete failed: {err}");
                self.notices
                    .notify(Notice::failure(&format!("widget '{id}' not deleted"), &err));
                Err(err)
            }
        }
    }

    /// Converts tag <-> chart in place.
    pub fn convert_widget(&self, id: &str) -> Result<Widget, ScreenError> {
        let current = self
            .widget(id)
            .ok_or_else(|| ScreenError::UnknownWidget(id.into()))?;
        let converted = menu::convert_widget(&current).ok_or_else(|| {
            ScreenError::Precondition(format!("{} widgets cannot change type", current.kind()).into())
        })?;
        self.mutate(
            id,
            WidgetPatch {
                label: Some(converted.label),
                config: Some(converted.config),
                style: Some(converted.style),
                ..WidgetPatch::default()
            },
        )
    }

    /// Flips "show label" and persists it.
    pub async fn toggle_label(&self, id: &str) -> Result<TagSettings, ScreenError> {
        self.toggle_setting(id, |book, id| book.toggle_label(id)).await
    }

    /// Flips "show tag name" and persists it.
    pub async fn toggle_tag_name(&self, id: &str) -> Result<TagSettings, ScreenError> {
        self.toggle_setting(id, |book, id| book.toggle_tag_name(id))
            .await
    }

    async fn toggle_setting(
        &self,
        id: &str,
        toggle: impl FnOnce(&mut TagSettingsBook, &WidgetId) -> TagSettings,
    ) -> Result<TagSettings, ScreenError> {
        let widget = self
            .widget(id)
            .ok_or_else(|| ScreenError::UnknownWidget(id.into()))?;
        let Some(server_id) = self.meta.read().server_id else {
            return Err(self.precondition("select a server first"));
        };
        let (previous, had_override, settings) = {
            let mut book = self.settings.write();
            let previous = book.effective(&widget.id);
            let had_override = book.has_override(&widget.id);
            (previous, had_override, toggle(&mut book, &widget.id))
        };
        let request = TagSettingsUpsert {
            server_id,
            screen_name: self.screen_name(),
            object_name: widget.id.to_string(),
            show_label: settings.show_label,
            show_tag_name: settings.show_tag_name,
        };
        match self.backend.upsert_tag_settings(&request).await {
            Ok(_) => Ok(settings),
            Err(err) => {
                let mut book = self.settings.write();
                if had_override {
                    book.set(widget.id.clone(), previous);
                } else {
                    book.remove(&widget.id);
                }
                drop(book);
                warn!(widget = %widget.id, "tag settings not saved: {err}");
                self.notices
                    .notify(Notice::failure("display settings not saved", &err));
                Err(err)
            }
        }
    }

    /// Adds a widget to a session-local group.
    pub fn add_to_group(&self, id: &str, group: &str) -> Result<(), ScreenError> {
        if group.trim().is_empty() {
            return Err(self.precondition("enter a group name"));
        }
        let id = self
            .widget(id)
            .map(|widget| widget.id)
            .ok_or_else(|| ScreenError::UnknownWidget(id.into()))?;
        self.groups.write().add(group, &id);
        Ok(())
    }

    /// Members of a session-local group.
    #[must_use]
    pub fn group(&self, group: &str) -> Vec<WidgetId> {
        self.groups.read().members(group).to_vec()
    }

    /// Dispatches a context-menu action.
    pub async fn apply_action(&self, id: &str, action: MenuAction) -> Result<(), ScreenError> {
        match action {
            MenuAction::Rename(label) => self.rename_widget(id, &label).map(drop),
            MenuAction::Delete => self.delete_widget(id).await,
            MenuAction::ToggleLabel => self.toggle_label(id).await.map(drop),
            MenuAction::ToggleTagName => self.toggle_tag_name(id).await.map(drop),
            MenuAction::ToggleType => self.convert_widget(id).map(drop),
            MenuAction::AddToGroup(group) => self.add_to_group(id, &group),
            MenuAction::Close => Ok(()),
        }
    }

    /// Broadcasts a style patch to every tag widget after a short quiet
    /// period; each changed widget is then saved like an individual edit.
    pub fn apply_style_to_all(&self, patch: TagStyle) {
        let registry = Arc::clone(&self.registry);
        let settings = Arc::clone(&self.settings);
        let sync = self.sync.clone();
        self.styles.schedule(patch, move |patch| {
            let payloads: Vec<SavePayload> = {
                let mut registry = registry.write();
                let changed = menu::apply_style(&mut registry, &patch);
                let settings = settings.read();
                changed
                    .iter()
                    .filter_map(|id| registry.get(id))
                    .map(|widget| SavePayload::from_widget(widget, Some(settings.effective(&widget.id))))
                    .collect()
            };
            debug!(widgets = payloads.len(), "style applied to all tag widgets");
            for payload in payloads {
                sync.schedule_save(payload);
            }
        });
    }

    /// Updates screen properties and caches the returned metadata.
    pub async fn update_props(&self, patch: &ScreenPropsPatch) -> Result<ScreenMeta, ScreenError> {
        if patch.is_empty() {
            return Ok(self.meta());
        }
        match self.backend.update_props(&self.screen_id, patch).await {
            Ok(meta) => {
                *self.meta.write() = meta.clone();
                Ok(meta)
            }
            Err(err) => {
                self.notices
                    .notify(Notice::failure("screen properties not saved", &err));
                Err(err)
            }
        }
    }

    /// Data feed of a chart widget.
    pub fn chart_feed(&self, id: &str) -> Result<ChartFeed<B>, ScreenError> {
        match self.widget(id).map(|widget| widget.config) {
            Some(WidgetConfig::Chart(chart)) => Ok(ChartFeed::new(
                Arc::clone(&self.backend),
                self.screen_id.clone(),
                chart,
                self.time_view(),
                Arc::clone(&self.clock),
                Arc::clone(&self.notices),
            )
            .with_max_points(self.config.trends.max_points)),
            Some(other) => Err(ScreenError::Precondition(
                format!("'{id}' is a {} widget, not a chart", other.kind()).into(),
            )),
            None => Err(ScreenError::UnknownWidget(id.into())),
        }
    }

    /// Data feed of a table widget.
    pub fn table_feed(&self, id: &str) -> Result<TableFeed<B>, ScreenError> {
        match self.widget(id).map(|widget| widget.config) {
            Some(WidgetConfig::Table(definition)) => Ok(TableFeed::new(
                Arc::clone(&self.backend),
                definition,
                self.time_view(),
                Arc::clone(&self.clock),
                Arc::clone(&self.notices),
                TableFeedOptions {
                    page_size: self.config.tables.page_size,
                    timezone: self.config.tables.timezone.clone(),
                    filter_delay: self.config.editor.filter_debounce,
                },
            )),
            Some(other) => Err(ScreenError::Precondition(
                format!("'{id}' is a {} widget, not a table", other.kind()).into(),
            )),
            None => Err(ScreenError::UnknownWidget(id.into())),
        }
    }

    /// Live snapshot feed of this screen.
    #[must_use]
    pub fn live_feed(&self) -> LiveFeed<B> {
        LiveFeed::new(
            Arc::clone(&self.backend),
            self.screen_id.clone(),
            Arc::clone(&self.notices),
        )
    }

    /// Runs every pending style broadcast and save now and waits for them.
    pub async fn flush(&self) {
        self.styles.flush().await;
        self.sync.flush().await;
    }
}

impl<B> std::fmt::Debug for ScreenEditor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenEditor")
            .field("screen_id", &self.screen_id)
            .field("widgets", &self.registry.read().len())
            .finish_non_exhaustive()
    }
}
