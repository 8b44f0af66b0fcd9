use std::time::Duration;

use crate::agent_engine::state::{Action, ActionResult};
use crate::config::AgentConfig;
use crate::errors::SidePilotResult;
use crate::executor::effects::VisualCues;
use crate::executor::settle::SettlePolicy;
use crate::perception::{ElementAddressMap, ElementRef, Resolution};
use crate::session::DocumentHandle;

/// Runs single actions against a document. Never fails: every problem comes
/// back as an unsuccessful [`ActionResult`].
#[derive(Debug, Clone)]
pub struct ActionExecutor {
    settle: SettlePolicy,
    cues: VisualCues,
    max_wait: Duration,
}

const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);

struct Target {
    element: ElementRef,
    note: String,
}

impl ActionExecutor {
    pub fn new(settle: SettlePolicy, cues: VisualCues) -> Self {
        Self {
            settle,
            cues,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            SettlePolicy::from_config(config),
            VisualCues::new(config.visual_cues),
        )
        .with_max_wait(config.max_wait())
    }

    pub async fn execute(
        &self,
        action: &Action,
        document: &dyn DocumentHandle,
        map: &ElementAddressMap,
    ) -> ActionResult {
        if action.is_terminal() {
            tracing::warn!(kind = action.kind(), "terminal action sent to executor");
            return ActionResult::failed(format!("{} is not an executable action", action.kind()));
        }

        tracing::info!(kind = action.kind(), action = %action.summary(), "executing action");
        self.cues.loading(document).await;

        let result = match self.perform(action, document, map).await {
            Ok(result) => result,
            Err(e) => ActionResult::failed(format!("error: {e}")),
        };

        if result.success {
            tracing::info!(kind = action.kind(), result = %result.description, "action succeeded");
        } else {
            tracing::warn!(kind = action.kind(), result = %result.description, "action failed");
        }
        result
    }

    async fn perform(
        &self,
        action: &Action,
        document: &dyn DocumentHandle,
        map: &ElementAddressMap,
    ) -> SidePilotResult<ActionResult> {
        match action {
            Action::Click(click) => {
                let Some(target) = resolve(map, &click.id) else {
                    return Ok(ActionResult::failed("target not found"));
                };
                let rect = document.element_box(&target.element).await?;
                let (x, y) = rect.center();
                document.hover(x, y).await?;
                self.cues.pointer(document, x, y).await;
                document.click(x, y).await?;
                self.settle.wait(document).await;
                Ok(ActionResult::ok(format!(
                    "clicked {}{}",
                    describe(&target.element),
                    target.note
                )))
            }

            Action::Input(input) => {
                let Some(target) = resolve(map, &input.id) else {
                    return Ok(ActionResult::failed("target not found"));
                };
                document.focus(&target.element).await?;
                let rect = document.element_box(&target.element).await?;
                self.cues.caret(document, &rect).await;
                document.clear_value(&target.element).await?;
                document.type_text(&input.text).await?;
                self.settle.wait(document).await;
                Ok(ActionResult::ok(format!(
                    "typed \"{}\" into {}{}",
                    input.text,
                    describe(&target.element),
                    target.note
                )))
            }

            Action::Navigate(nav) => {
                document.navigate(&nav.url).await?;
                self.settle.wait(document).await;
                Ok(ActionResult::ok(format!("navigated to {}", nav.url)))
            }

            Action::SwitchTab(switch) => match document.activate_tab(&switch.tab_id).await {
                Ok(()) => Ok(ActionResult::ok(format!("switched to tab {}", switch.tab_id))),
                Err(e) => Ok(ActionResult::failed(format!(
                    "error: cannot switch to tab {}: {e}",
                    switch.tab_id
                ))),
            },

            Action::Back(_) => {
                document.history_back().await?;
                self.settle.wait(document).await;
                Ok(ActionResult::ok("went back"))
            }

            Action::Forward(_) => {
                document.history_forward().await?;
                self.settle.wait(document).await;
                Ok(ActionResult::ok("went forward"))
            }

            Action::Keyboard(keyboard) => {
                let key = keyboard.key.trim();
                if key.is_empty() {
                    return Ok(ActionResult::failed("keyboard action requires a key"));
                }
                self.cues.key_press(document, key).await;
                document.press_key(key).await?;
                self.settle.wait(document).await;
                Ok(ActionResult::ok(format!("pressed {key}")))
            }

            Action::Wait(wait) => {
                let requested = Duration::from_millis(wait.duration_ms);
                let duration = requested.min(self.max_wait);
                tokio::time::sleep(duration).await;
                tokio::time::sleep(self.settle.grace).await;
                if duration < requested {
                    tracing::warn!(
                        requested_ms = wait.duration_ms,
                        max_ms = duration.as_millis() as u64,
                        "wait clamped"
                    );
                    Ok(ActionResult::ok(format!(
                        "waited {} ms (clamped from {} ms)",
                        duration.as_millis(),
                        wait.duration_ms
                    )))
                } else {
                    Ok(ActionResult::ok(format!("waited {} ms", wait.duration_ms)))
                }
            }

            Action::Ask(_) | Action::Done(_) => Ok(ActionResult::failed(format!(
                "{} is not an executable action",
                action.kind()
            ))),
        }
    }
}

fn resolve(map: &ElementAddressMap, id: &str) -> Option<Target> {
    match map.resolve(id) {
        Resolution::Exact(element) => Some(Target {
            element,
            note: String::new(),
        }),
        Resolution::Degraded {
            matched_id,
            element,
        } => Some(Target {
            element,
            note: format!(" (degraded match: '{id}' -> {matched_id})"),
        }),
        Resolution::NotFound => None,
    }
}

fn describe(element: &ElementRef) -> String {
    if element.name.is_empty() {
        format!("{} #{}", element.role, element.node_id)
    } else {
        format!("{} \"{}\"", element.role, element.name)
    }
}
