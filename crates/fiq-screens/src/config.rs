//! Client configuration loaded from `fiq.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ScreenError;

pub(crate) const CONFIG_FILES: &[&str] = &["fiq.toml", ".fiq.toml"];

/// Environment variable overriding `[api] base_url`.
pub const ENV_API_BASE: &str = "FIQ_API_BASE";
/// Environment variable overriding `[api] token`.
pub const ENV_API_TOKEN: &str = "FIQ_API_TOKEN";

/// Effective client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Config file path (if one was read).
    pub config_path: Option<PathBuf>,
    /// Backend connection.
    pub api: ApiConfig,
    /// Editor timing.
    pub editor: EditorConfig,
    /// Trend widget defaults.
    pub trends: TrendConfig,
    /// Table widget defaults.
    pub tables: TableConfig,
    /// Live snapshot polling.
    pub live: LiveConfig,
}

/// Backend connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    /// API base URL, without trailing slash.
    pub base_url: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    /// Whole-request timeout.
    pub timeout: Duration,
}

/// Debounce delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditorConfig {
    /// Quiet period before a widget save.
    pub save_debounce: Duration,
    /// Quiet period before "apply style to all".
    pub style_debounce: Duration,
    /// Quiet period before a filter-driven table re-fetch.
    pub filter_debounce: Duration,
}

/// Trend fetch defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendConfig {
    /// Per-series point cap.
    pub max_points: usize,
    /// Live window when a chart declares none.
    pub default_range_hours: f64,
    /// Averaging interval when a chart declares none.
    pub default_interval_ms: u64,
    /// Re-fetch period while following in live mode.
    pub live_poll: Duration,
}

/// Table fetch defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    /// Rows per preview page.
    pub page_size: u64,
    /// Timezone sent with preview requests.
    pub timezone: String,
}

/// Live snapshot polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveConfig {
    /// Poll period.
    pub poll: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_file(None, ConfigFile::default())
    }
}

impl ClientConfig {
    /// Loads the first config file found in `dir`, falling back to defaults.
    ///
    /// Unreadable or malformed implicit files are logged and ignored.
    #[must_use]
    pub fn discover(dir: &Path) -> Self {
        let Some(path) = find_config_file(dir) else {
            return Self::default().with_env();
        };
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) => {
                warn!("failed to read fiq config at {}: {err}", path.display());
                return Self::default().with_env();
            }
        };
        match Self::from_contents(Some(path.clone()), &contents) {
            Ok(config) => config.with_env(),
            Err(err) => {
                warn!("failed to parse fiq config at {}: {err}", path.display());
                Self::default().with_env()
            }
        }
    }

    /// Loads an explicitly requested config file. Any failure is an error.
    pub fn load(path: &Path) -> Result<Self, ScreenError> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            ScreenError::InvalidConfig(format!("cannot read {}: {err}", path.display()).into())
        })?;
        Ok(Self::from_contents(Some(path.to_path_buf()), &contents)?.with_env())
    }

    /// Parses config text. Environment overrides are not applied.
    pub fn from_contents(config_path: Option<PathBuf>, contents: &str) -> Result<Self, ScreenError> {
        let parsed: ConfigFile = toml::from_str(contents)
            .map_err(|err| ScreenError::InvalidConfig(err.to_string().into()))?;
        let config = Self::from_file(config_path, parsed);
        config.validate()?;
        Ok(config)
    }

    /// Applies `FIQ_API_BASE` / `FIQ_API_TOKEN`.
    #[must_use]
    pub fn with_env(self) -> Self {
        self.with_overrides(
            std::env::var(ENV_API_BASE).ok(),
            std::env::var(ENV_API_TOKEN).ok(),
        )
    }

    /// Applies explicit base URL / token overrides. Blank values are ignored.
    #[must_use]
    pub fn with_overrides(mut self, base_url: Option<String>, token: Option<String>) -> Self {
        if let Some(base_url) = base_url.filter(|value| !value.trim().is_empty()) {
            self.api.base_url = normalize_base(&base_url);
        }
        if let Some(token) = token.filter(|value| !value.trim().is_empty()) {
            self.api.token = Some(token.trim().to_string());
        }
        self
    }

    fn from_file(config_path: Option<PathBuf>, file: ConfigFile) -> Self {
        Self {
            config_path,
            api: file.api.into(),
            editor: file.editor.into(),
            trends: file.trends.into(),
            tables: file.tables.into(),
            live: file.live.into(),
        }
    }

    fn validate(&self) -> Result<(), ScreenError> {
        let base = &self.api.base_url;
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ScreenError::InvalidConfig(
                format!("api.base_url must be an http(s) URL, got '{base}'").into(),
            ));
        }
        if self.trends.max_points < 2 {
            return Err(ScreenError::InvalidConfig(
                "trends.max_points must be at least 2".into(),
            ));
        }
        if self.tables.page_size == 0 {
            return Err(ScreenError::InvalidConfig(
                "tables.page_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct ConfigFile {
    api: ApiSection,
    editor: EditorSection,
    trends: TrendSection,
    tables: TableSection,
    live: LiveSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct ApiSection {
    base_url: Option<String>,
    token: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct EditorSection {
    save_debounce_ms: Option<u64>,
    style_debounce_ms: Option<u64>,
    filter_debounce_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct TrendSection {
    max_points: Option<usize>,
    default_range_hours: Option<f64>,
    default_interval_ms: Option<u64>,
    live_poll_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct TableSection {
    page_size: Option<u64>,
    timezone: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct LiveSection {
    poll_ms: Option<u64>,
}

impl From<ApiSection> for ApiConfig {
    fn from(section: ApiSection) -> Self {
        Self {
            base_url: normalize_base(
                section
                    .base_url
                    .as_deref()
                    .unwrap_or("http://localhost:8000/api"),
            ),
            token: section.token.filter(|token| !token.trim().is_empty()),
            timeout: Duration::from_millis(section.timeout_ms.unwrap_or(10_000)),
        }
    }
}

impl From<EditorSection> for EditorConfig {
    fn from(section: EditorSection) -> Self {
        Self {
            save_debounce: Duration::from_millis(section.save_debounce_ms.unwrap_or(450)),
            style_debounce: Duration::from_millis(section.style_debounce_ms.unwrap_or(150)),
            filter_debounce: Duration::from_millis(section.filter_debounce_ms.unwrap_or(300)),
        }
    }
}

impl From<TrendSection> for TrendConfig {
    fn from(section: TrendSection) -> Self {
        Self {
            max_points: section.max_points.unwrap_or(2000),
            default_range_hours: section
                .default_range_hours
                .filter(|hours| hours.is_finite() && *hours > 0.0)
                .unwrap_or(1.0),
            default_interval_ms: section.default_interval_ms.unwrap_or(10_000).max(1),
            live_poll: Duration::from_millis(section.live_poll_ms.unwrap_or(5_000).max(100)),
        }
    }
}

impl From<TableSection> for TableConfig {
    fn from(section: TableSection) -> Self {
        Self {
            page_size: section.page_size.unwrap_or(500),
            timezone: section
                .timezone
                .filter(|zone| !zone.trim().is_empty())
                .unwrap_or_else(|| "UTC".to_string()),
        }
    }
}

impl From<LiveSection> for LiveConfig {
    fn from(section: LiveSection) -> Self {
        Self {
            poll: Duration::from_millis(section.poll_ms.unwrap_or(2_000).max(100)),
        }
    }
}

fn normalize_base(value: &str) -> String {
    value.trim().trim_end_matches('/').to_string()
}

pub(crate) fn find_config_file(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = ClientConfig::from_contents(None, "").expect("config");
        assert_eq!(config.api.base_url, "http://localhost:8000/api");
        assert_eq!(config.api.timeout, Duration::from_secs(10));
        assert_eq!(config.editor.save_debounce, Duration::from_millis(450));
        assert_eq!(config.editor.style_debounce, Duration::from_millis(150));
        assert_eq!(config.editor.filter_debounce, Duration::from_millis(300));
        assert_eq!(config.trends.max_points, 2000);
        assert_eq!(config.tables.page_size, 500);
        assert_eq!(config.tables.timezone, "UTC");
        assert_eq!(config.live.poll, Duration::from_secs(2));
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn sections_override_defaults() {
        let config = ClientConfig::from_contents(
            None,
            r#"
[api]
base_url = "https://scada.local/api/"
token = "abc"

[editor]
save_debounce_ms = 200

[tables]
page_size = 100
timezone = "Europe/Moscow"
"#,
        )
        .expect("config");
        assert_eq!(config.api.base_url, "https://scada.local/api");
        assert_eq!(config.api.token.as_deref(), Some("abc"));
        assert_eq!(config.editor.save_debounce, Duration::from_millis(200));
        assert_eq!(config.editor.style_debounce, Duration::from_millis(150));
        assert_eq!(config.tables.page_size, 100);
        assert_eq!(config.tables.timezone, "Europe/Moscow");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            ClientConfig::from_contents(None, "[api]\nbase_url = \"ftp://x\""),
            Err(ScreenError::InvalidConfig(_))
        ));
        assert!(ClientConfig::from_contents(None, "[trends]\nmax_points = 1").is_err());
        assert!(ClientConfig::from_contents(None, "[api\n").is_err());
    }

    #[test]
    fn overrides_ignore_blank_values() {
        let config = ClientConfig::default()
            .with_overrides(Some("http://plant:9000/api/".into()), Some("  ".into()));
        assert_eq!(config.api.base_url, "http://plant:9000/api");
        assert_eq!(config.api.token, None);
    }
}
