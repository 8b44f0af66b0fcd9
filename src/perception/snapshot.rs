use base64::Engine as _;
use serde_json::Value;

use crate::errors::{SidePilotError, SidePilotResult};
use crate::perception::address_map::ElementAddressMap;
use crate::perception::types::AxTree;
use crate::session::{DocumentHandle, PageInfo, TabInfo};

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Everything the model sees about the document at one point in time.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub tree: AxTree,
    /// Base64 PNG.
    pub screenshot: String,
    pub page: PageInfo,
    pub tabs: Vec<TabInfo>,
    /// Address map generation this snapshot produced.
    pub generation: u64,
}

impl Snapshot {
    pub fn model_tree(&self) -> Value {
        self.tree.to_model_json()
    }
}

/// Captures snapshots and owns the address map they produce.
#[derive(Debug, Default)]
pub struct SnapshotService {
    address_map: ElementAddressMap,
}

impl SnapshotService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address_map(&self) -> &ElementAddressMap {
        &self.address_map
    }

    /// Forget the last capture's addresses, e.g. when the document changes.
    pub fn invalidate(&mut self) {
        self.address_map.clear();
    }

    /// Read tree, screenshot, page info and tabs concurrently, then rebuild
    /// the address map from the new tree. Any failed read fails the capture
    /// and leaves the previous map untouched.
    pub async fn capture(&mut self, document: &dyn DocumentHandle) -> SidePilotResult<Snapshot> {
        let (tree, screenshot, page, tabs) = tokio::try_join!(
            document.accessibility_tree(),
            document.screenshot(),
            document.page_info(),
            document.list_tabs(),
        )?;

        validate_png(&screenshot)?;

        self.address_map.rebuild(&tree);
        tracing::info!(
            url = %page.url,
            nodes = tree.len(),
            addressable = self.address_map.len(),
            tabs = tabs.len(),
            screenshot_bytes = screenshot.len(),
            "snapshot captured"
        );

        Ok(Snapshot {
            tree,
            screenshot,
            page,
            tabs,
            generation: self.address_map.generation(),
        })
    }
}

fn validate_png(data: &str) -> SidePilotResult<()> {
    // Only the first block is needed to check the signature.
    let head: String = data.chars().take(12).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(head.as_bytes())
        .map_err(|e| SidePilotError::Snapshot(format!("screenshot is not base64: {e}")))?;
    if !bytes.starts_with(PNG_MAGIC) {
        return Err(SidePilotError::Snapshot("screenshot is not a PNG image".into()));
    }
    Ok(())
}
