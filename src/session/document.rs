use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SidePilotResult;
use crate::perception::types::{AxTree, ElementRef};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub url: String,
    pub title: String,
}

/// One open document (browser tab).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: String,
    pub title: String,
    pub url: String,
    pub active: bool,
}

/// Viewport-relative bounding box in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ElementBox {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Primitive operations on the live document. Everything the agent does to
/// a page goes through this trait.
#[async_trait]
pub trait DocumentHandle: Send + Sync {
    async fn accessibility_tree(&self) -> SidePilotResult<AxTree>;

    /// Full-page PNG, base64 encoded.
    async fn screenshot(&self) -> SidePilotResult<String>;

    async fn page_info(&self) -> SidePilotResult<PageInfo>;

    async fn list_tabs(&self) -> SidePilotResult<Vec<TabInfo>>;

    async fn activate_tab(&self, tab_id: &str) -> SidePilotResult<()>;

    /// Scroll the element into view and return its box.
    async fn element_box(&self, element: &ElementRef) -> SidePilotResult<ElementBox>;

    async fn hover(&self, x: f64, y: f64) -> SidePilotResult<()>;

    async fn click(&self, x: f64, y: f64) -> SidePilotResult<()>;

    async fn focus(&self, element: &ElementRef) -> SidePilotResult<()>;

    /// Empty the element's value and fire an `input` event.
    async fn clear_value(&self, element: &ElementRef) -> SidePilotResult<()>;

    async fn type_text(&self, text: &str) -> SidePilotResult<()>;

    /// Press a key specifier such as `Enter` or `Ctrl+A`.
    async fn press_key(&self, key: &str) -> SidePilotResult<()>;

    async fn navigate(&self, url: &str) -> SidePilotResult<()>;

    async fn history_back(&self) -> SidePilotResult<()>;

    async fn history_forward(&self) -> SidePilotResult<()>;

    /// Current `document.readyState`.
    async fn ready_state(&self) -> SidePilotResult<String>;

    async fn evaluate(&self, expression: &str) -> SidePilotResult<Value>;

    /// Release the underlying connection.
    async fn close(&self) {}
}
