//! `fiq-screens` - user-configurable SCADA screen editor core.
//!
//! The crate owns the data/state model behind a free-form screen canvas:
//! the widget registry, tag identity resolution against live snapshots,
//! debounced and serialized persistence, the shared time context and the
//! per-widget trend/table data feeds.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// Backend HTTP contract types and the backend seam.
pub mod api;
/// Client configuration (`fiq.toml`).
pub mod config;
/// Per-key cancel-and-replace timers.
pub mod debounce;
/// Screen editor facade.
pub mod editor;
/// Errors shared by the crate.
pub mod error;
/// Trend, table and live data feeds.
pub mod fetch;
/// Blocking HTTP backend implementation.
pub mod http;
/// Context-menu actions and style propagation.
pub mod menu;
/// Non-fatal user notifications.
pub mod notice;
/// Widget registry and id allocation.
pub mod registry;
/// Per-widget tag display settings.
pub mod settings;
/// Persistence synchronizer.
pub mod sync;
/// Tag identity resolution.
pub mod tags;
/// Shared time context (live / range / cursor).
pub mod time_ctx;
/// Widget records and their config variants.
pub mod widget;

pub use api::ScreenBackend;
pub use config::ClientConfig;
pub use editor::ScreenEditor;
pub use error::ScreenError;
pub use http::HttpBackend;
pub use notice::{Notice, NoticeLevel, NoticeSink};
pub use registry::WidgetRegistry;
pub use sync::{SaveOutcome, SavePayload, SaveSync};
pub use tags::LiveIndex;
pub use time_ctx::{TimeContext, TimeController, TimeMode, TimeView, TimeWindow};
pub use widget::{Widget, WidgetConfig, WidgetId, WidgetKind};
