//! Backend over HTTP.
//!
//! Requests go through a blocking `ureq` agent on Tokio's blocking pool, so
//! the async side never blocks a runtime worker.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::api::{
    AckResponse, BulkUpsertRequest, BulkUpsertResponse, DeleteResponse, LiveRecord,
    ScreenBackend, ScreenMeta, ScreenObjectRow, ScreenPropsPatch, TablePreviewRequest,
    TablePreviewResponse, TagSettingsBatchRequest, TagSettingsRow, TagSettingsUpsert, TrendQuery,
    TrendResponse,
};
use crate::config::ApiConfig;
use crate::error::ScreenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// One prepared request, moved onto the blocking pool.
struct Call {
    method: Method,
    url: String,
    path: String,
    query: Vec<(&'static str, String)>,
    body: Option<String>,
}

/// [`ScreenBackend`] talking to the FactoryIQ REST API.
#[derive(Clone)]
pub struct HttpBackend {
    agent: ureq::Agent,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    /// Builds a backend from connection settings.
    pub fn new(config: &ApiConfig) -> Result<Self, ScreenError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ScreenError::InvalidConfig(
                format!("invalid API base URL '{base_url}'").into(),
            ));
        }
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .build()
            .into();
        Ok(Self {
            agent,
            base_url,
            token: config.token.clone(),
        })
    }

    /// API base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn call(&self, method: Method, path: String) -> Call {
        Call {
            method,
            url: format!("{}{path}", self.base_url),
            path,
            query: Vec::new(),
            body: None,
        }
    }

    async fn send<T>(&self, call: Call) -> Result<T, ScreenError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let agent = self.agent.clone();
        let token = self.token.clone();
        let method = call.method;
        let path = call.path.clone();
        debug!(method = method.as_str(), path = %path, "backend request");
        let text = tokio::task::spawn_blocking(move || execute(&agent, token.as_deref(), &call))
            .await
            .map_err(ScreenError::transport)??;
        decode_body(&text)
    }

    async fn send_json<T, R>(&self, method: Method, path: String, body: &R) -> Result<T, ScreenError>
    where
        T: DeserializeOwned + Send + 'static,
        R: Serialize + ?Sized,
    {
        let mut call = self.call(method, path);
        call.body = Some(serde_json::to_string(body).map_err(ScreenError::decode)?);
        self.send(call).await
    }
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

fn execute(agent: &ureq::Agent, token: Option<&str>, call: &Call) -> Result<String, ScreenError> {
    let bearer = token.map(|token| format!("Bearer {token}"));
    let result = match call.method {
        Method::Get | Method::Delete => {
            let mut request = if call.method == Method::Get {
                agent.get(&call.url)
            } else {
                agent.delete(&call.url)
            };
            for (key, value) in &call.query {
                request = request.query(*key, value);
            }
            if let Some(bearer) = &bearer {
                request = request.header("Authorization", bearer.as_str());
            }
            request.call()
        }
        Method::Post | Method::Put => {
            let mut request = if call.method == Method::Post {
                agent.post(&call.url)
            } else {
                agent.put(&call.url)
            };
            request = request.header("Content-Type", "application/json");
            if let Some(bearer) = &bearer {
                request = request.header("Authorization", bearer.as_str());
            }
            request.send(call.body.as_deref().unwrap_or("{}"))
        }
    };
    let mut response = result.map_err(|err| map_error(err, &call.path))?;
    response
        .body_mut()
        .read_to_string()
        .map_err(|err| map_error(err, &call.path))
}

fn map_error(err: ureq::Error, path: &str) -> ScreenError {
    match err {
        ureq::Error::StatusCode(status) => ScreenError::Http {
            status,
            path: path.into(),
        },
        other => ScreenError::transport(other),
    }
}

/// Decodes a response body; an empty body reads as `{}`.
fn decode_body<T: DeserializeOwned>(text: &str) -> Result<T, ScreenError> {
    let value = if text.trim().is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str(text).map_err(ScreenError::decode)?
    };
    serde_json::from_value(value).map_err(ScreenError::decode)
}

fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn screen_path(screen_id: &str, tail: &str) -> String {
    format!("/user-screens/{}{tail}", segment(screen_id))
}

/// Live snapshots arrive either as a bare array or wrapped in `{items}`.
fn live_records(value: Value) -> Result<Vec<LiveRecord>, ScreenError> {
    let records = match value {
        Value::Object(mut map) => map
            .remove("items")
            .or_else(|| map.remove("data"))
            .unwrap_or(Value::Array(Vec::new())),
        other => other,
    };
    serde_json::from_value(records).map_err(ScreenError::decode)
}

impl ScreenBackend for HttpBackend {
    async fn load_objects(&self, screen_id: &str) -> Result<Vec<ScreenObjectRow>, ScreenError> {
        self.send(self.call(Method::Get, screen_path(screen_id, "/objects")))
            .await
    }

    async fn bulk_upsert(
        &self,
        request: &BulkUpsertRequest,
    ) -> Result<BulkUpsertResponse, ScreenError> {
        self.send_json(Method::Post, "/screen-objects/bulk".to_string(), request)
            .await
    }

    async fn delete_object(
        &self,
        screen_id: &str,
        object_name: &str,
    ) -> Result<DeleteResponse, ScreenError> {
        let tail = format!("/objects/{}", segment(object_name));
        self.send(self.call(Method::Delete, screen_path(screen_id, &tail)))
            .await
    }

    async fn screen_meta(&self, screen_id: &str) -> Result<ScreenMeta, ScreenError> {
        self.send(self.call(Method::Get, screen_path(screen_id, "")))
            .await
    }

    async fn update_props(
        &self,
        screen_id: &str,
        patch: &ScreenPropsPatch,
    ) -> Result<ScreenMeta, ScreenError> {
        self.send_json(Method::Put, screen_path(screen_id, "/props"), patch)
            .await
    }

    async fn trends(&self, screen_id: &str, query: &TrendQuery) -> Result<TrendResponse, ScreenError> {
        let mut call = self.call(Method::Get, screen_path(screen_id, "/trends"));
        call.query = vec![
            ("start_date", query.start_date.clone()),
            ("end_date", query.end_date.clone()),
            ("interval_ms", query.interval_ms.to_string()),
        ];
        self.send(call).await
    }

    async fn table_preview(
        &self,
        request: &TablePreviewRequest,
    ) -> Result<TablePreviewResponse, ScreenError> {
        self.send_json(Method::Post, "/ias-tables/preview".to_string(), request)
            .await
    }

    async fn tag_settings_batch(
        &self,
        request: &TagSettingsBatchRequest,
    ) -> Result<BTreeMap<String, TagSettingsRow>, ScreenError> {
        self.send_json(Method::Post, "/tag-settings/batch".to_string(), request)
            .await
    }

    async fn upsert_tag_settings(
        &self,
        request: &TagSettingsUpsert,
    ) -> Result<AckResponse, ScreenError> {
        self.send_json(Method::Post, "/tag-settings".to_string(), request)
            .await
    }

    async fn live_snapshot(&self, screen_id: &str) -> Result<Vec<LiveRecord>, ScreenError> {
        let value: Value = self
            .send(self.call(Method::Get, screen_path(screen_id, "/live")))
            .await?;
        live_records(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn path_segments_are_percent_encoded() {
        assert_eq!(
            screen_path("plant 1", &format!("/objects/{}", segment("Line1/Flow"))),
            "/user-screens/plant%201/objects/Line1%2FFlow"
        );
    }

    #[test]
    fn empty_bodies_decode_as_defaults() {
        let response: DeleteResponse = decode_body("").expect("empty body");
        assert_eq!(response, DeleteResponse::default());
        assert!(decode_body::<Vec<ScreenObjectRow>>("{").is_err());
    }

    #[test]
    fn live_snapshot_accepts_wrapped_and_bare_arrays() {
        let bare = live_records(json!([{"TagName": "Flow", "Value": 1}])).expect("bare");
        let wrapped = live_records(json!({"items": [{"TagName": "Flow", "Value": 1}]}))
            .expect("wrapped");
        assert_eq!(bare, wrapped);
        assert!(live_records(json!({})).expect("empty").is_empty());
    }

    #[test]
    fn base_url_must_be_http() {
        let config = ApiConfig {
            base_url: "localhost:8000".into(),
            token: None,
            timeout: Duration::from_secs(1),
        };
        assert!(HttpBackend::new(&config).is_err());
        let config = ApiConfig {
            base_url: "http://localhost:8000/api/".into(),
            ..config
        };
        let backend = HttpBackend::new(&config).expect("backend");
        assert_eq!(backend.base_url(), "http://localhost:8000/api");
    }
}
