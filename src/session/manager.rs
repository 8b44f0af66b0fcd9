use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::BrowserConfig;
use crate::errors::{SidePilotError, SidePilotResult};
use crate::session::cdp::CdpClient;
use crate::session::cdp_document::CdpDocument;
use crate::session::document::DocumentHandle;

/// Entry of the DevTools `/json/list` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "type", default)]
    pub target_type: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub web_socket_debugger_url: Option<String>,
}

impl TargetInfo {
    pub fn is_page(&self) -> bool {
        self.target_type == "page"
    }
}

/// A live connection to one document. Owned by the agent engine and handed
/// back to the manager for closing.
pub struct Session {
    pub id: Uuid,
    pub target: TargetInfo,
    document: Arc<dyn DocumentHandle>,
}

impl Session {
    pub fn new(target: TargetInfo, document: Arc<dyn DocumentHandle>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            document,
        }
    }

    pub fn document(&self) -> Arc<dyn DocumentHandle> {
        Arc::clone(&self.document)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Attach to the currently focused document.
    async fn connect(&self) -> SidePilotResult<Session>;

    /// Attach to a specific document by target id.
    async fn connect_to(&self, target_id: &str) -> SidePilotResult<Session>;

    fn current_document(&self, session: &Session) -> Arc<dyn DocumentHandle> {
        session.document()
    }

    async fn close(&self, session: Session);
}

pub(crate) async fn list_targets(
    http: &reqwest::Client,
    debugger_url: &str,
) -> SidePilotResult<Vec<TargetInfo>> {
    let url = format!("{}/json/list", debugger_url.trim_end_matches('/'));
    let response = http.get(&url).send().await.map_err(|e| {
        SidePilotError::Session(format!(
            "browser not reachable at {debugger_url} (start it with --remote-debugging-port): {e}"
        ))
    })?;
    if !response.status().is_success() {
        return Err(SidePilotError::Session(format!(
            "{url} returned {}",
            response.status()
        )));
    }
    Ok(response.json().await?)
}

/// Attaches to pages of a browser started with `--remote-debugging-port`.
pub struct CdpSessionManager {
    http: reqwest::Client,
    debugger_url: String,
    command_timeout: Duration,
}

impl CdpSessionManager {
    pub fn new(config: &BrowserConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            debugger_url: config.debugger_url.clone(),
            command_timeout: config.command_timeout(),
        }
    }

    async fn attach(&self, target: TargetInfo) -> SidePilotResult<Session> {
        let ws_url = target.web_socket_debugger_url.clone().ok_or_else(|| {
            SidePilotError::Session(format!(
                "document {} is already attached to another debugger",
                target.id
            ))
        })?;

        let client = Arc::new(CdpClient::connect(&ws_url, self.command_timeout).await?);
        for domain in ["Page", "DOM", "Runtime", "Accessibility"] {
            client.enable_domain(domain).await?;
        }

        tracing::info!(target_id = %target.id, url = %target.url, "session attached");
        let document = CdpDocument::new(
            client,
            target.clone(),
            self.http.clone(),
            self.debugger_url.clone(),
        );
        Ok(Session::new(target, Arc::new(document)))
    }
}

#[async_trait]
impl SessionManager for CdpSessionManager {
    async fn connect(&self) -> SidePilotResult<Session> {
        let target = list_targets(&self.http, &self.debugger_url)
            .await?
            .into_iter()
            .find(TargetInfo::is_page)
            .ok_or_else(|| {
                SidePilotError::Session(format!("no open document at {}", self.debugger_url))
            })?;
        self.attach(target).await
    }

    async fn connect_to(&self, target_id: &str) -> SidePilotResult<Session> {
        let target = list_targets(&self.http, &self.debugger_url)
            .await?
            .into_iter()
            .find(|t| t.id == target_id && t.is_page())
            .ok_or_else(|| SidePilotError::Session(format!("no open document with id {target_id}")))?;
        self.attach(target).await
    }

    async fn close(&self, session: Session) {
        tracing::info!(session = %session.id, target_id = %session.target.id, "closing session");
        session.document.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_list_entries() {
        let body = r#"[
            {
                "description": "",
                "devtoolsFrontendUrl": "/devtools/inspector.html?ws=127.0.0.1:9222/devtools/page/AB12",
                "id": "AB12",
                "title": "Example Domain",
                "type": "page",
                "url": "https://example.com/",
                "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/AB12"
            },
            {
                "id": "SW1",
                "title": "Service Worker",
                "type": "service_worker",
                "url": "https://example.com/sw.js"
            }
        ]"#;
        let targets: Vec<TargetInfo> = serde_json::from_str(body).unwrap();
        assert_eq!(targets.len(), 2);
        assert!(targets[0].is_page());
        assert_eq!(
            targets[0].web_socket_debugger_url.as_deref(),
            Some("ws://127.0.0.1:9222/devtools/page/AB12")
        );
        assert!(!targets[1].is_page());
        assert!(targets[1].web_socket_debugger_url.is_none());
    }
}
