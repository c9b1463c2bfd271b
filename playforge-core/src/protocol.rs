//! Runner Protocol
//!
//! One JSON request in, one JSON response out. Requests carry either a
//! `cleanup` action or a generate payload `{id, config}`. A build that fails
//! still answers `ok: true` with a null path; the failure detail goes to the
//! logs only.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::warn;

use crate::order::{BuildOrder, OrderConfig};
use crate::pipeline::PlayablePipeline;
use crate::scheduler::BuildScheduler;

pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
pub const INVALID_GENERATE_REQUEST: &str = "INVALID_GENERATE_REQUEST";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Option<PathBuf>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunnerResponse {
    pub fn done() -> Self {
        Self { ok: true, path: None, error: None }
    }

    pub fn built(path: Option<PathBuf>) -> Self {
        Self { ok: true, path: Some(path), error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { ok: false, path: None, error: Some(error.into()) }
    }
}

#[derive(Debug, Clone)]
pub enum RunnerRequest {
    Cleanup,
    Generate(BuildOrder),
}

impl RunnerRequest {
    /// Parse a raw request. `Err` carries the response to send back.
    pub fn parse(raw: &str) -> Result<Self, RunnerResponse> {
        let value: Value = serde_json::from_str(raw).map_err(|e| RunnerResponse::failed(e.to_string()))?;
        let Value::Object(map) = value else {
            return Err(RunnerResponse::failed(INVALID_REQUEST));
        };
        let Some(action) = map.get("action").and_then(Value::as_str) else {
            return Err(RunnerResponse::failed(INVALID_REQUEST));
        };
        if action == "cleanup" {
            return Ok(Self::Cleanup);
        }

        let id = map.get("id").and_then(Value::as_str).filter(|id| !id.is_empty());
        let config = map.get("config").filter(|c| c.is_object());
        let (Some(id), Some(config)) = (id, config) else {
            return Err(RunnerResponse::failed(INVALID_GENERATE_REQUEST));
        };
        let config: OrderConfig = serde_json::from_value(config.clone())
            .map_err(|_| RunnerResponse::failed(INVALID_GENERATE_REQUEST))?;
        Ok(Self::Generate(BuildOrder::new(id, config)))
    }
}

pub async fn handle_request(scheduler: &BuildScheduler<PlayablePipeline>, raw: &str) -> RunnerResponse {
    let request = match RunnerRequest::parse(raw) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match request {
        RunnerRequest::Cleanup => match scheduler.builder().cleanup_transient().await {
            Ok(_) => RunnerResponse::done(),
            Err(e) => {
                warn!(error = %e, "Cleanup failed");
                RunnerResponse::failed(e.to_string())
            }
        },
        RunnerRequest::Generate(order) => RunnerResponse::built(scheduler.submit(order).await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_object_or_missing_action_is_invalid() {
        for raw in ["[]", "42", r#"{"id":"a"}"#, r#"{"action":7}"#] {
            assert_eq!(RunnerRequest::parse(raw).unwrap_err().error.as_deref(), Some(INVALID_REQUEST));
        }
    }

    #[test]
    fn unparseable_json_reports_parser_message() {
        let response = RunnerRequest::parse("{nope").unwrap_err();
        assert!(!response.ok);
        assert_ne!(response.error.as_deref(), Some(INVALID_REQUEST));
    }

    #[test]
    fn generate_requires_id_and_object_config() {
        for raw in [
            r#"{"action":"generate","config":{}}"#,
            r#"{"action":"generate","id":"","config":{}}"#,
            r#"{"action":"generate","id":"a","config":"x"}"#,
            r#"{"action":"generate","id":"a","config":{"startingBalance":"lots"}}"#,
        ] {
            assert_eq!(
                RunnerRequest::parse(raw).unwrap_err().error.as_deref(),
                Some(INVALID_GENERATE_REQUEST),
                "{raw}"
            );
        }
    }

    #[test]
    fn generate_parses_order() {
        let raw = r#"{"action":"generate","id":"o-1","config":{"game":"olympus","isWatermarked":true,"geoId":"pt_brl"}}"#;
        let RunnerRequest::Generate(order) = RunnerRequest::parse(raw).unwrap() else {
            panic!("expected generate");
        };
        assert_eq!(order.id, "o-1");
        assert_eq!(order.game_key(), "olympus");
        assert!(order.config.is_watermarked);
        assert_eq!(order.geo_id(), "pt_brl");
    }

    #[test]
    fn response_shapes() {
        assert_eq!(serde_json::to_string(&RunnerResponse::done()).unwrap(), r#"{"ok":true}"#);
        assert_eq!(
            serde_json::to_string(&RunnerResponse::built(None)).unwrap(),
            r#"{"ok":true,"path":null}"#
        );
        assert_eq!(
            serde_json::to_string(&RunnerResponse::built(Some("/out/a.html".into()))).unwrap(),
            r#"{"ok":true,"path":"/out/a.html"}"#
        );
        assert_eq!(
            serde_json::to_string(&RunnerResponse::failed(INVALID_REQUEST)).unwrap(),
            r#"{"ok":false,"error":"INVALID_REQUEST"}"#
        );
    }
}
