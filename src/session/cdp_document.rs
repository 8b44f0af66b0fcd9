use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::errors::{SidePilotError, SidePilotResult};
use crate::perception::types::{AxTree, ElementRef};
use crate::session::cdp::{remote_value, CdpClient};
use crate::session::document::{DocumentHandle, ElementBox, PageInfo, TabInfo};
use crate::session::keys::{char_chord, parse_key_chord, KeyChord};
use crate::session::manager::{list_targets, TargetInfo};

/// A page target driven over the DevTools protocol.
pub struct CdpDocument {
    client: Arc<CdpClient>,
    target: TargetInfo,
    http: reqwest::Client,
    debugger_url: String,
}

impl CdpDocument {
    pub fn new(
        client: Arc<CdpClient>,
        target: TargetInfo,
        http: reqwest::Client,
        debugger_url: String,
    ) -> Self {
        Self {
            client,
            target,
            http,
            debugger_url,
        }
    }

    pub fn target(&self) -> &TargetInfo {
        &self.target
    }

    async fn object_id(&self, element: &ElementRef) -> SidePilotResult<String> {
        let backend_id = element.backend_node_id.ok_or_else(|| {
            SidePilotError::Executor(format!(
                "element {} ({}) has no DOM node",
                element.node_id, element.role
            ))
        })?;
        let reply = self
            .client
            .send("DOM.resolveNode", json!({ "backendNodeId": backend_id }))
            .await?;
        reply["object"]["objectId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                SidePilotError::Executor(format!("element {} is detached", element.node_id))
            })
    }

    async fn call_on(&self, element: &ElementRef, function: &str) -> SidePilotResult<Value> {
        let object_id = self.object_id(element).await?;
        let reply = self
            .client
            .send(
                "Runtime.callFunctionOn",
                json!({
                    "objectId": object_id,
                    "functionDeclaration": function,
                    "returnByValue": true,
                }),
            )
            .await?;
        remote_value(&reply)
    }

    async fn mouse(&self, kind: &str, x: f64, y: f64, button: &str, clicks: u32) -> SidePilotResult<()> {
        self.client
            .send(
                "Input.dispatchMouseEvent",
                json!({ "type": kind, "x": x, "y": y, "button": button, "clickCount": clicks }),
            )
            .await?;
        Ok(())
    }

    async fn dispatch_chord(&self, chord: &KeyChord) -> SidePilotResult<()> {
        let key_event = |kind: &str| {
            json!({
                "type": kind,
                "key": chord.key,
                "code": chord.code,
                "windowsVirtualKeyCode": chord.key_code,
                "modifiers": chord.modifiers,
            })
        };

        self.client.send("Input.dispatchKeyEvent", key_event("rawKeyDown")).await?;
        if let Some(text) = &chord.text {
            self.client
                .send(
                    "Input.dispatchKeyEvent",
                    json!({
                        "type": "char",
                        "key": chord.key,
                        "text": text,
                        "unmodifiedText": text,
                        "modifiers": chord.modifiers,
                    }),
                )
                .await?;
        }
        self.client.send("Input.dispatchKeyEvent", key_event("keyUp")).await?;
        Ok(())
    }

    async fn step_history(&self, delta: i64) -> SidePilotResult<()> {
        let history = self.client.send("Page.getNavigationHistory", json!({})).await?;
        let current = history["currentIndex"]
            .as_i64()
            .ok_or_else(|| SidePilotError::Executor("navigation history unavailable".into()))?;
        let entries = history["entries"].as_array().cloned().unwrap_or_default();

        let target = current + delta;
        let entry_id = usize::try_from(target)
            .ok()
            .and_then(|i| entries.get(i))
            .and_then(|e| e["id"].as_i64())
            .ok_or_else(|| {
                let which = if delta < 0 { "previous" } else { "next" };
                SidePilotError::Executor(format!("no {which} page in history"))
            })?;

        self.client
            .send("Page.navigateToHistoryEntry", json!({ "entryId": entry_id }))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentHandle for CdpDocument {
    async fn accessibility_tree(&self) -> SidePilotResult<AxTree> {
        let reply = self.client.send("Accessibility.getFullAXTree", json!({})).await?;
        let tree = AxTree::from_cdp(&reply);
        if tree.is_empty() {
            return Err(SidePilotError::Snapshot("accessibility tree is empty".into()));
        }
        Ok(tree)
    }

    async fn screenshot(&self) -> SidePilotResult<String> {
        let mut params = json!({ "format": "png", "captureBeyondViewport": true });
        match self.client.send("Page.getLayoutMetrics", json!({})).await {
            Ok(metrics) => {
                let size = metrics
                    .get("cssContentSize")
                    .or_else(|| metrics.get("contentSize"))
                    .cloned()
                    .unwrap_or(Value::Null);
                if let (Some(w), Some(h)) = (size["width"].as_f64(), size["height"].as_f64()) {
                    params["clip"] = json!({ "x": 0, "y": 0, "width": w, "height": h, "scale": 1 });
                }
            }
            Err(e) => tracing::debug!(error = %e, "layout metrics unavailable, capturing viewport"),
        }

        let reply = self.client.send("Page.captureScreenshot", params).await?;
        reply["data"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SidePilotError::Snapshot("screenshot reply carried no data".into()))
    }

    async fn page_info(&self) -> SidePilotResult<PageInfo> {
        let value = self
            .evaluate("({ url: location.href, title: document.title })")
            .await?;
        Ok(PageInfo {
            url: value["url"].as_str().unwrap_or_default().to_string(),
            title: value["title"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn list_tabs(&self) -> SidePilotResult<Vec<TabInfo>> {
        let targets = list_targets(&self.http, &self.debugger_url).await?;
        Ok(targets
            .into_iter()
            .filter(TargetInfo::is_page)
            .map(|t| TabInfo {
                active: t.id == self.target.id,
                id: t.id,
                title: t.title,
                url: t.url,
            })
            .collect())
    }

    async fn activate_tab(&self, tab_id: &str) -> SidePilotResult<()> {
        let url = format!("{}/json/activate/{}", self.debugger_url.trim_end_matches('/'), tab_id);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SidePilotError::Session(format!(
                "cannot activate document {tab_id}: {status} {}",
                body.trim()
            )));
        }
        tracing::info!(tab_id, "document activated");
        Ok(())
    }

    async fn element_box(&self, element: &ElementRef) -> SidePilotResult<ElementBox> {
        let value = self
            .call_on(
                element,
                "function() {
                    this.scrollIntoView({ block: 'center', inline: 'center' });
                    const r = this.getBoundingClientRect();
                    return { x: r.left, y: r.top, width: r.width, height: r.height };
                }",
            )
            .await?;
        let rect: ElementBox = serde_json::from_value(value)?;
        if rect.width == 0.0 && rect.height == 0.0 {
            return Err(SidePilotError::Executor(format!(
                "element {} has no layout",
                element.node_id
            )));
        }
        Ok(rect)
    }

    async fn hover(&self, x: f64, y: f64) -> SidePilotResult<()> {
        self.mouse("mouseMoved", x, y, "none", 0).await
    }

    async fn click(&self, x: f64, y: f64) -> SidePilotResult<()> {
        self.mouse("mouseMoved", x, y, "none", 0).await?;
        self.mouse("mousePressed", x, y, "left", 1).await?;
        self.mouse("mouseReleased", x, y, "left", 1).await
    }

    async fn focus(&self, element: &ElementRef) -> SidePilotResult<()> {
        let backend_id = element.backend_node_id.ok_or_else(|| {
            SidePilotError::Executor(format!("element {} has no DOM node", element.node_id))
        })?;
        self.client
            .send("DOM.focus", json!({ "backendNodeId": backend_id }))
            .await?;
        Ok(())
    }

    async fn clear_value(&self, element: &ElementRef) -> SidePilotResult<()> {
        self.call_on(
            element,
            "function() {
                if ('value' in this) { this.value = ''; }
                else if (this.isContentEditable) { this.textContent = ''; }
                this.dispatchEvent(new Event('input', { bubbles: true }));
            }",
        )
        .await?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> SidePilotResult<()> {
        for ch in text.chars() {
            if ch.is_ascii() {
                self.dispatch_chord(&char_chord(ch)).await?;
            } else {
                self.client
                    .send("Input.insertText", json!({ "text": ch.to_string() }))
                    .await?;
            }
        }
        Ok(())
    }

    async fn press_key(&self, key: &str) -> SidePilotResult<()> {
        let chord = parse_key_chord(key)
            .ok_or_else(|| SidePilotError::Executor(format!("invalid key specifier '{key}'")))?;
        self.dispatch_chord(&chord).await
    }

    async fn navigate(&self, url: &str) -> SidePilotResult<()> {
        let reply = self.client.send("Page.navigate", json!({ "url": url })).await?;
        if let Some(err) = reply["errorText"].as_str().filter(|e| !e.is_empty()) {
            return Err(SidePilotError::Executor(format!("navigation to {url} failed: {err}")));
        }
        Ok(())
    }

    async fn history_back(&self) -> SidePilotResult<()> {
        self.step_history(-1).await
    }

    async fn history_forward(&self) -> SidePilotResult<()> {
        self.step_history(1).await
    }

    async fn ready_state(&self) -> SidePilotResult<String> {
        let value = self.evaluate("document.readyState").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn evaluate(&self, expression: &str) -> SidePilotResult<Value> {
        let reply = self
            .client
            .send(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true, "awaitPromise": true }),
            )
            .await?;
        remote_value(&reply)
    }

    async fn close(&self) {
        self.client.close().await;
    }
}
