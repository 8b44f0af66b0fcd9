use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Lifecycle of the agent within one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    AwaitingModel { round: u32 },
    ExecutingActions { round: u32 },
    Settled,
    Cancelled,
    Errored { message: String },
}

/// One decision returned by the model. Serialized externally tagged, e.g.
/// `{"click": {"id": "5"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Click(ClickAction),
    Input(InputAction),
    Navigate(NavigateAction),
    SwitchTab(SwitchTabAction),
    Back(HistoryAction),
    Forward(HistoryAction),
    Keyboard(KeyboardAction),
    Wait(WaitAction),
    Ask(AskAction),
    Done(DoneAction),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickAction {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAction {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigateAction {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchTabAction {
    #[serde(deserialize_with = "string_or_number")]
    pub tab_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Payload of `back` and `forward`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyboardAction {
    #[serde(default, alias = "keys")]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitAction {
    #[serde(alias = "duration")]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskAction {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoneAction {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Action {
    /// `ask` and `done` end the follow-up loop and are never executed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Action::Ask(_) | Action::Done(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Click(_) => "click",
            Action::Input(_) => "input",
            Action::Navigate(_) => "navigate",
            Action::SwitchTab(_) => "switch_tab",
            Action::Back(_) => "back",
            Action::Forward(_) => "forward",
            Action::Keyboard(_) => "keyboard",
            Action::Wait(_) => "wait",
            Action::Ask(_) => "ask",
            Action::Done(_) => "done",
        }
    }

    /// The model's own description, if it gave one.
    pub fn description(&self) -> Option<&str> {
        let d = match self {
            Action::Click(a) => &a.description,
            Action::Input(a) => &a.description,
            Action::Navigate(a) => &a.description,
            Action::SwitchTab(a) => &a.description,
            Action::Back(a) | Action::Forward(a) => &a.description,
            Action::Keyboard(a) => &a.description,
            Action::Wait(a) => &a.description,
            Action::Ask(a) => &a.description,
            Action::Done(a) => &a.description,
        };
        d.as_deref()
    }

    /// Short human-readable label for status lines.
    pub fn summary(&self) -> String {
        if let Some(d) = self.description() {
            return d.to_string();
        }
        match self {
            Action::Click(a) => format!("click #{}", a.id),
            Action::Input(a) => format!("type \"{}\" into #{}", a.text, a.id),
            Action::Navigate(a) => format!("navigate to {}", a.url),
            Action::SwitchTab(a) => format!("switch to tab {}", a.tab_id),
            Action::Back(_) => "go back".to_string(),
            Action::Forward(_) => "go forward".to_string(),
            Action::Keyboard(a) => format!("press {}", a.key),
            Action::Wait(a) => format!("wait {} ms", a.duration_ms),
            Action::Ask(a) => a.query.clone(),
            Action::Done(a) => a.message.clone(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Int(n) => n.to_string(),
        Id::Float(f) => f.to_string(),
    })
}

/// Outcome of executing one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub description: String,
}

impl ActionResult {
    pub fn ok(description: impl Into<String>) -> Self {
        Self {
            success: true,
            description: description.into(),
        }
    }

    pub fn failed(description: impl Into<String>) -> Self {
        Self {
            success: false,
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Executing,
    Succeeded,
    Failed,
}

/// An action as shown in a segment. Goes pending -> executing -> settled, once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: Action,
    pub is_executing: bool,
    pub success: Option<bool>,
}

impl ActionRecord {
    pub fn pending(action: Action) -> Self {
        Self {
            action,
            is_executing: false,
            success: None,
        }
    }

    pub fn status(&self) -> ActionStatus {
        match (self.is_executing, self.success) {
            (true, _) => ActionStatus::Executing,
            (false, None) => ActionStatus::Pending,
            (false, Some(true)) => ActionStatus::Succeeded,
            (false, Some(false)) => ActionStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Thinking,
    Response,
    Error,
}

/// One model response within a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub content: String,
    pub kind: SegmentKind,
    pub actions: Vec<ActionRecord>,
}

impl Segment {
    pub fn thinking() -> Self {
        Self {
            content: "thinking".to_string(),
            kind: SegmentKind::Thinking,
            actions: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            kind: SegmentKind::Error,
            actions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
    pub segments: Vec<Segment>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_user: true,
            timestamp: Utc::now(),
            segments: Vec::new(),
        }
    }

    pub fn assistant() -> Self {
        Self {
            content: String::new(),
            is_user: false,
            timestamp: Utc::now(),
            segments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleReason {
    /// The model returned no actions.
    NoActions,
    /// The model returned `ask` or `done`.
    Terminal,
    RoundLimit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TurnOutcome {
    Settled { reason: SettleReason },
    Cancelled,
    Errored { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_externally_tagged_actions() {
        let actions: Vec<Action> = serde_json::from_str(
            r#"[
                {"input": {"id": "5", "text": "cats"}},
                {"click": {"id": 7, "description": "Search button"}},
                {"keyboard": {"keys": "Enter"}},
                {"wait": {"duration": 1500}},
                {"back": {}},
                {"done": {"message": "Found results"}}
            ]"#,
        )
        .unwrap();

        assert_eq!(
            actions[0],
            Action::Input(InputAction { id: "5".into(), text: "cats".into(), description: None })
        );
        match &actions[1] {
            Action::Click(c) => {
                assert_eq!(c.id, "7");
                assert_eq!(c.description.as_deref(), Some("Search button"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&actions[2], Action::Keyboard(k) if k.key == "Enter"));
        assert!(matches!(&actions[3], Action::Wait(w) if w.duration_ms == 1500));
        assert_eq!(actions[4].kind(), "back");
        assert!(actions[5].is_terminal());
        assert!(!actions[0].is_terminal());
    }

    #[test]
    fn serializes_back_to_external_tagging() {
        let json = serde_json::to_value(Action::SwitchTab(SwitchTabAction {
            tab_id: "42".into(),
            description: None,
        }))
        .unwrap();
        assert_eq!(json, serde_json::json!({ "switch_tab": { "tab_id": "42" } }));
    }

    #[test]
    fn record_status_transitions() {
        let mut record = ActionRecord::pending(Action::Back(HistoryAction::default()));
        assert_eq!(record.status(), ActionStatus::Pending);
        record.is_executing = true;
        assert_eq!(record.status(), ActionStatus::Executing);
        record.is_executing = false;
        record.success = Some(false);
        assert_eq!(record.status(), ActionStatus::Failed);
    }

    #[test]
    fn summary_prefers_description() {
        let click = Action::Click(ClickAction { id: "3".into(), description: Some("Open menu".into()) });
        assert_eq!(click.summary(), "Open menu");
        let nav = Action::Navigate(NavigateAction { url: "https://example.com".into(), description: None });
        assert_eq!(nav.summary(), "navigate to https://example.com");
    }
}
