//! On-page cues that show the user what the agent is doing. Purely cosmetic:
//! every failure here is swallowed.

use crate::session::{DocumentHandle, ElementBox};

const CURSOR_SETUP: &str = r#"(() => {
  if (document.getElementById('sidepilot-cursor')) return;
  const style = document.createElement('style');
  style.id = 'sidepilot-cursor-style';
  style.textContent = `
    #sidepilot-cursor { position: fixed; width: 20px; height: 20px; border-radius: 50%;
      background: rgba(100,100,100,0.9); pointer-events: none; z-index: 2147483647;
      transform: translate(-50%,-50%); transition: all 0.3s ease-out; left: 50%; top: 50%;
      display: flex; align-items: center; justify-content: center; color: white;
      font: 12px monospace; }
    #sidepilot-cursor.loading { width: 30px; height: 30px; background: rgba(100,100,100,0.5); }
    #sidepilot-cursor.key { min-width: 24px; min-height: 24px; padding: 4px;
      background: rgba(0,150,255,0.8); transform: translate(-50%,-50%) scale(1.2); }`;
  (document.head || document.documentElement).appendChild(style);
  const cursor = document.createElement('div');
  cursor.id = 'sidepilot-cursor';
  (document.body || document.documentElement).appendChild(cursor);
})()"#;

#[derive(Debug, Clone, Copy)]
pub struct VisualCues {
    enabled: bool,
}

impl VisualCues {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Park the cursor in the middle of the page in its loading style.
    pub async fn loading(&self, document: &dyn DocumentHandle) {
        self.run(
            document,
            "c.className = 'loading'; c.textContent = ''; c.style.left = '50%'; c.style.top = '50%';",
        )
        .await;
    }

    pub async fn pointer(&self, document: &dyn DocumentHandle, x: f64, y: f64) {
        let script = format!(
            "c.className = ''; c.textContent = ''; c.style.left = '{x}px'; c.style.top = '{y}px';"
        );
        self.run(document, &script).await;
    }

    /// Caret cue at the left edge of an input box.
    pub async fn caret(&self, document: &dyn DocumentHandle, rect: &ElementBox) {
        let y = rect.y + rect.height / 2.0;
        let script = format!(
            "c.className = ''; c.textContent = ''; c.style.left = '{}px'; c.style.top = '{y}px';",
            rect.x
        );
        self.run(document, &script).await;
    }

    pub async fn key_press(&self, document: &dyn DocumentHandle, key: &str) {
        let label = serde_json::to_string(key).unwrap_or_else(|_| "\"\"".to_string());
        let script = format!(
            "c.className = 'key'; c.textContent = {label}; c.style.left = '50%'; c.style.top = '50%';
             setTimeout(() => {{ c.className = ''; c.textContent = ''; }}, 500);"
        );
        self.run(document, &script).await;
    }

    async fn run(&self, document: &dyn DocumentHandle, body: &str) {
        if !self.enabled {
            return;
        }
        let script = format!(
            "{CURSOR_SETUP};(() => {{ const c = document.getElementById('sidepilot-cursor'); if (!c) return; {body} }})()"
        );
        if let Err(e) = document.evaluate(&script).await {
            tracing::debug!(error = %e, "visual cue skipped");
        }
    }
}
