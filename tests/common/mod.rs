#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use sidepilot_lib::agent_engine::state::{
    Action, AskAction, ClickAction, DoneAction, InputAction, SwitchTabAction,
};
use sidepilot_lib::agent_engine::{AgentEngine, MemoryConversationStore};
use sidepilot_lib::config::AgentConfig;
use sidepilot_lib::errors::{SidePilotError, SidePilotResult};
use sidepilot_lib::llm::{GatewayRequest, GatewayResponse, ModelGateway};
use sidepilot_lib::perception::{AxTree, ElementRef};
use sidepilot_lib::session::{
    DocumentHandle, ElementBox, PageInfo, Session, SessionManager, TabInfo, TargetInfo,
};

/// PNG signature plus the start of an IHDR chunk.
pub const PNG_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAAB";

#[derive(Debug, Clone)]
pub struct Call {
    pub at: Instant,
    pub op: String,
}

/// In-memory document. Serves queued accessibility trees (the last one
/// repeats) and logs every mutating operation.
pub struct FakeDocument {
    pub id: String,
    url: Mutex<String>,
    trees: Mutex<VecDeque<AxTree>>,
    tabs: Mutex<Vec<TabInfo>>,
    ready_state: Mutex<String>,
    failing: Mutex<HashSet<&'static str>>,
    calls: Mutex<Vec<Call>>,
    pub closed: AtomicBool,
}

impl FakeDocument {
    pub fn new(id: &str, url: &str, trees: Vec<AxTree>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            url: Mutex::new(url.to_string()),
            trees: Mutex::new(trees.into()),
            tabs: Mutex::new(vec![TabInfo {
                id: id.to_string(),
                title: format!("Tab {id}"),
                url: url.to_string(),
                active: true,
            }]),
            ready_state: Mutex::new("complete".to_string()),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn set_tabs(&self, tabs: Vec<TabInfo>) {
        *self.tabs.lock().unwrap() = tabs;
    }

    pub fn set_ready_state(&self, state: &str) {
        *self.ready_state.lock().unwrap() = state.to_string();
    }

    /// Make every call of `op` fail, e.g. `"click"` or `"page_info"`.
    pub fn fail(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ops(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.op).collect()
    }

    pub fn times_of(&self, prefix: &str) -> Vec<Instant> {
        self.calls()
            .into_iter()
            .filter(|c| c.op.starts_with(prefix))
            .map(|c| c.at)
            .collect()
    }

    fn log(&self, op: impl Into<String>) {
        self.calls.lock().unwrap().push(Call {
            at: Instant::now(),
            op: op.into(),
        });
    }

    fn check(&self, op: &'static str) -> SidePilotResult<()> {
        if self.failing.lock().unwrap().contains(op) {
            return Err(SidePilotError::Cdp {
                code: -32000,
                message: format!("{op} failed"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentHandle for FakeDocument {
    async fn accessibility_tree(&self) -> SidePilotResult<AxTree> {
        self.check("accessibility_tree")?;
        let mut trees = self.trees.lock().unwrap();
        let tree = if trees.len() > 1 {
            trees.pop_front()
        } else {
            trees.front().cloned()
        };
        Ok(tree.unwrap_or_default())
    }

    async fn screenshot(&self) -> SidePilotResult<String> {
        self.check("screenshot")?;
        Ok(PNG_B64.to_string())
    }

    async fn page_info(&self) -> SidePilotResult<PageInfo> {
        self.check("page_info")?;
        Ok(PageInfo {
            url: self.url.lock().unwrap().clone(),
            title: format!("Page {}", self.id),
        })
    }

    async fn list_tabs(&self) -> SidePilotResult<Vec<TabInfo>> {
        self.check("list_tabs")?;
        Ok(self.tabs.lock().unwrap().clone())
    }

    async fn activate_tab(&self, tab_id: &str) -> SidePilotResult<()> {
        self.log(format!("activate:{tab_id}"));
        self.check("activate")?;
        if !self.tabs.lock().unwrap().iter().any(|t| t.id == tab_id) {
            return Err(SidePilotError::Session(format!("no open document with id {tab_id}")));
        }
        Ok(())
    }

    async fn element_box(&self, element: &ElementRef) -> SidePilotResult<ElementBox> {
        self.check("element_box")?;
        let offset = element.node_id.parse::<f64>().unwrap_or(1.0) * 10.0;
        Ok(ElementBox {
            x: offset,
            y: offset,
            width: 100.0,
            height: 40.0,
        })
    }

    async fn hover(&self, x: f64, y: f64) -> SidePilotResult<()> {
        self.log(format!("hover:{x},{y}"));
        self.check("hover")
    }

    async fn click(&self, x: f64, y: f64) -> SidePilotResult<()> {
        self.log(format!("click:{x},{y}"));
        self.check("click")
    }

    async fn focus(&self, element: &ElementRef) -> SidePilotResult<()> {
        self.log(format!("focus:{}", element.node_id));
        self.check("focus")
    }

    async fn clear_value(&self, element: &ElementRef) -> SidePilotResult<()> {
        self.log(format!("clear:{}", element.node_id));
        self.check("clear")
    }

    async fn type_text(&self, text: &str) -> SidePilotResult<()> {
        self.log(format!("type:{text}"));
        self.check("type")
    }

    async fn press_key(&self, key: &str) -> SidePilotResult<()> {
        self.log(format!("press:{key}"));
        self.check("press")
    }

    async fn navigate(&self, url: &str) -> SidePilotResult<()> {
        self.log(format!("navigate:{url}"));
        self.check("navigate")?;
        *self.url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn history_back(&self) -> SidePilotResult<()> {
        self.log("back");
        self.check("back")
    }

    async fn history_forward(&self) -> SidePilotResult<()> {
        self.log("forward");
        self.check("forward")
    }

    async fn ready_state(&self) -> SidePilotResult<String> {
        self.check("ready_state")?;
        Ok(self.ready_state.lock().unwrap().clone())
    }

    async fn evaluate(&self, _expression: &str) -> SidePilotResult<Value> {
        Ok(Value::Null)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out sessions over a fixed set of fake documents. `connect()`
/// attaches to the first one.
pub struct FakeSessionManager {
    documents: Vec<Arc<FakeDocument>>,
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub connected_to: Mutex<Vec<String>>,
}

impl FakeSessionManager {
    pub fn new(documents: Vec<Arc<FakeDocument>>) -> Arc<Self> {
        Arc::new(Self {
            documents,
            connects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            connected_to: Mutex::new(Vec::new()),
        })
    }

    fn session_for(&self, doc: &Arc<FakeDocument>) -> Session {
        let target = TargetInfo {
            id: doc.id.clone(),
            title: format!("Tab {}", doc.id),
            url: String::new(),
            target_type: "page".into(),
            web_socket_debugger_url: None,
        };
        Session::new(target, Arc::clone(doc) as Arc<dyn DocumentHandle>)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionManager for FakeSessionManager {
    async fn connect(&self) -> SidePilotResult<Session> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let doc = self
            .documents
            .first()
            .ok_or_else(|| SidePilotError::Session("no open document".into()))?;
        Ok(self.session_for(doc))
    }

    async fn connect_to(&self, target_id: &str) -> SidePilotResult<Session> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected_to.lock().unwrap().push(target_id.to_string());
        let doc = self
            .documents
            .iter()
            .find(|d| d.id == target_id)
            .ok_or_else(|| SidePilotError::Session(format!("no open document with id {target_id}")))?;
        Ok(self.session_for(doc))
    }

    async fn close(&self, session: Session) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        session.document().close().await;
    }
}

pub enum Step {
    Reply(GatewayResponse),
    /// Fails the call with a gateway error.
    Fail(String),
    /// Fires the request's token as if the user cancelled mid-request.
    CancelDuringCall,
    /// Replies after a delay.
    Delayed(Duration, GatewayResponse),
}

#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub at: Instant,
    pub request: GatewayRequest,
    pub sending: Option<bool>,
}

/// Replays a fixed script of model decisions and records every request.
pub struct ScriptedGateway {
    steps: Mutex<VecDeque<Step>>,
    seen: Mutex<Vec<SeenRequest>>,
    sending_probe: Mutex<Option<Arc<AtomicBool>>>,
}

impl ScriptedGateway {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            seen: Mutex::new(Vec::new()),
            sending_probe: Mutex::new(None),
        })
    }

    /// Record the engine's sending flag at every call.
    pub fn watch_sending(&self, flag: Arc<AtomicBool>) {
        *self.sending_probe.lock().unwrap() = Some(flag);
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn decide(&self, request: GatewayRequest) -> SidePilotResult<GatewayResponse> {
        let sending = self
            .sending_probe
            .lock()
            .unwrap()
            .as_ref()
            .map(|f| f.load(Ordering::SeqCst));
        self.seen.lock().unwrap().push(SeenRequest {
            at: Instant::now(),
            request: request.clone(),
            sending,
        });

        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(response)) => Ok(response),
            Some(Step::Fail(message)) => Err(SidePilotError::Gateway(message)),
            Some(Step::CancelDuringCall) => {
                request.cancel.cancel();
                request.cancel.cancelled().await;
                Err(SidePilotError::Cancelled)
            }
            Some(Step::Delayed(delay, response)) => {
                tokio::select! {
                    _ = request.cancel.cancelled() => Err(SidePilotError::Cancelled),
                    _ = tokio::time::sleep(delay) => Ok(response),
                }
            }
            None => Err(SidePilotError::Gateway("script exhausted".into())),
        }
    }
}

pub fn reply(message: &str, actions: Vec<Action>) -> Step {
    Step::Reply(response(message, actions))
}

pub fn response(message: &str, actions: Vec<Action>) -> GatewayResponse {
    GatewayResponse {
        conversation_id: "conv-1234567890".into(),
        message: message.into(),
        actions,
    }
}

pub fn click(id: &str) -> Action {
    Action::Click(ClickAction {
        id: id.into(),
        description: None,
    })
}

pub fn input(id: &str, text: &str) -> Action {
    Action::Input(InputAction {
        id: id.into(),
        text: text.into(),
        description: None,
    })
}

pub fn switch_tab(tab_id: &str) -> Action {
    Action::SwitchTab(SwitchTabAction {
        tab_id: tab_id.into(),
        description: None,
    })
}

pub fn done(message: &str) -> Action {
    Action::Done(DoneAction {
        message: message.into(),
        description: None,
    })
}

pub fn ask(query: &str) -> Action {
    Action::Ask(AskAction {
        query: query.into(),
        description: None,
    })
}

/// `RootWebArea` with one child per `(id, role, name)`.
pub fn page_tree(nodes: &[(&str, &str, &str)]) -> AxTree {
    let mut tree = AxTree::new();
    let root = tree.push(None, "1", "RootWebArea", "Test page");
    for (id, role, name) in nodes {
        tree.push(Some(root), *id, *role, *name);
    }
    tree
}

/// Search form used by most scenarios: textbox 5, button 7.
pub fn search_tree() -> AxTree {
    page_tree(&[("5", "textbox", "Search"), ("7", "button", "Go"), ("8", "heading", "Results")])
}

/// Tree with `n` addressable buttons plus some structure around them.
pub fn buttons_tree(n: usize) -> AxTree {
    let mut tree = AxTree::new();
    let root = tree.push(None, "1", "RootWebArea", "Buttons");
    let group = tree.push(Some(root), "2", "generic", "");
    tree.push(Some(group), "3", "StaticText", "Pick one");
    for i in 0..n {
        tree.push(Some(group), format!("b{i}"), "button", format!("Option {}", char::from(b'A' + i as u8)));
    }
    tree
}

pub fn agent_config() -> AgentConfig {
    AgentConfig {
        page_load_timeout_ms: 10_000,
        ready_poll_interval_ms: 100,
        settle_delay_ms: 500,
        action_gap_ms: 1_000,
        max_rounds: None,
        max_wait_ms: 30_000,
        visual_cues: false,
    }
}

pub struct Harness {
    pub engine: AgentEngine,
    pub sessions: Arc<FakeSessionManager>,
    pub gateway: Arc<ScriptedGateway>,
    pub store: Arc<MemoryConversationStore>,
}

pub fn harness(documents: Vec<Arc<FakeDocument>>, steps: Vec<Step>) -> Harness {
    harness_with(agent_config(), documents, steps)
}

pub fn harness_with(config: AgentConfig, documents: Vec<Arc<FakeDocument>>, steps: Vec<Step>) -> Harness {
    let sessions = FakeSessionManager::new(documents);
    let gateway = ScriptedGateway::new(steps);
    let store = Arc::new(MemoryConversationStore::new());
    let engine = AgentEngine::new(
        config,
        sessions.clone(),
        gateway.clone(),
        store.clone(),
    );
    gateway.watch_sending(engine.sending_flag());
    Harness {
        engine,
        sessions,
        gateway,
        store,
    }
}
