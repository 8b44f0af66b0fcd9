use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::agent_engine::event_bus::{EngineEvent, EventBus};
use crate::agent_engine::history::ConversationStore;
use crate::agent_engine::loop_control::LoopController;
use crate::agent_engine::state::{
    Action, ActionRecord, ActionResult, AgentState, Message, Segment, SegmentKind, SettleReason,
    TurnOutcome,
};
use crate::config::AgentConfig;
use crate::errors::{SidePilotError, SidePilotResult};
use crate::executor::ActionExecutor;
use crate::llm::gateway::{
    ActionOutcome, ConversationEntry, EntryRole, GatewayRequest, GatewayResponse, ModelGateway,
};
use crate::perception::SnapshotService;
use crate::session::{is_supported_url, DocumentHandle, Session, SessionManager};

/// Resets the shared sending flag when a turn ends, however it ends.
struct SendingGuard(Arc<AtomicBool>);

impl Drop for SendingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives user turns: snapshot, ask the model, execute, repeat until the
/// model stops asking for actions.
pub struct AgentEngine {
    config: AgentConfig,
    sessions: Arc<dyn SessionManager>,
    gateway: Arc<dyn ModelGateway>,
    store: Arc<dyn ConversationStore>,
    snapshots: SnapshotService,
    executor: ActionExecutor,
    events: EventBus,

    state: AgentState,
    session: Option<Session>,
    messages: Vec<Message>,
    conversation_id: Option<String>,
    sending: Arc<AtomicBool>,

    /// Index of the assistant message of the turn in flight.
    assistant: Option<usize>,
}

impl AgentEngine {
    pub fn new(
        config: AgentConfig,
        sessions: Arc<dyn SessionManager>,
        gateway: Arc<dyn ModelGateway>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        let executor = ActionExecutor::from_config(&config);
        Self {
            config,
            sessions,
            gateway,
            store,
            snapshots: SnapshotService::new(),
            executor,
            events: EventBus::default(),
            state: AgentState::Idle,
            session: None,
            messages: Vec::new(),
            conversation_id: None,
            sending: Arc::new(AtomicBool::new(false)),
            assistant: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn snapshots(&self) -> &SnapshotService {
        &self.snapshots
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// True while a turn is in flight. A front-end should refuse input then.
    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::SeqCst)
    }

    /// Shared handle to the sending flag, readable from other tasks.
    pub fn sending_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.sending)
    }

    /// Run one user turn to completion. Cancellation and failures are
    /// reported through the returned outcome; `Err` means the turn was
    /// refused before it started.
    pub async fn submit(&mut self, text: &str, cancel: CancellationToken) -> SidePilotResult<TurnOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SidePilotError::Agent("message is empty".into()));
        }
        if self.sending.swap(true, Ordering::SeqCst) {
            return Err(SidePilotError::Agent("a turn is already in progress".into()));
        }
        let _guard = SendingGuard(Arc::clone(&self.sending));

        tracing::info!(message = %text, "turn started");
        let turn_start = self.push_message(Message::user(text));
        self.assistant = None;

        let outcome = match self.run_turn(turn_start, text, &cancel).await {
            Ok(reason) => {
                tracing::info!(?reason, "turn settled");
                TurnOutcome::Settled { reason }
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!("turn cancelled");
                self.discard_placeholder();
                TurnOutcome::Cancelled
            }
            Err(e) => {
                tracing::error!(error = %e, "turn failed");
                let message = self.fail_turn(&e);
                TurnOutcome::Errored { message }
            }
        };

        self.finalize_assistant();
        self.set_state(match &outcome {
            TurnOutcome::Settled { .. } => AgentState::Settled,
            TurnOutcome::Cancelled => AgentState::Cancelled,
            TurnOutcome::Errored { message } => AgentState::Errored {
                message: message.clone(),
            },
        });
        self.events.publish(EngineEvent::TurnFinished {
            outcome: outcome.clone(),
        });
        self.assistant = None;

        if let Some(id) = self.conversation_id.clone() {
            if let Err(e) = self.store.on_turn_settled(&id, &self.messages).await {
                tracing::warn!(conversation = %id, error = %e, "failed to persist conversation");
            }
        }
        Ok(outcome)
    }

    /// Close the session and forget the conversation.
    pub async fn new_conversation(&mut self) {
        if let Some(session) = self.session.take() {
            self.sessions.close(session).await;
        }
        self.messages.clear();
        self.conversation_id = None;
        self.assistant = None;
        self.set_state(AgentState::Idle);
        self.events.publish(EngineEvent::ConversationReset);
        tracing::info!("conversation reset");
    }

    async fn run_turn(
        &mut self,
        turn_start: usize,
        text: &str,
        cancel: &CancellationToken,
    ) -> SidePilotResult<SettleReason> {
        let mut document = self.ensure_session().await?;

        let assistant = self.push_message(Message::assistant());
        self.assistant = Some(assistant);

        let mut rounds = LoopController::new(self.config.max_rounds);
        let mut feedback: Vec<ActionOutcome> = Vec::new();

        loop {
            let round = rounds.begin_round();
            let placeholder = self.push_segment(assistant, Segment::thinking());
            self.set_state(AgentState::AwaitingModel { round });

            checkpoint(cancel)?;
            let snapshot = self.snapshots.capture(document.as_ref()).await?;
            checkpoint(cancel)?;

            let history_end = if round == 1 { turn_start } else { self.messages.len() };
            let request = GatewayRequest {
                user_message: (round == 1).then(|| text.to_string()),
                snapshot_tree: snapshot.model_tree(),
                screenshot: snapshot.screenshot,
                page: snapshot.page,
                tabs: snapshot.tabs,
                conversation_history: self.history_for_request(history_end),
                prior_action_results: std::mem::take(&mut feedback),
                conversation_id: self.conversation_id.clone(),
                cancel: cancel.clone(),
            };

            let response = self.gateway.decide(request).await?;
            checkpoint(cancel)?;
            self.conversation_id = Some(response.conversation_id.clone());

            tracing::info!(
                round,
                actions = response.actions.len(),
                generation = snapshot.generation,
                "model responded"
            );

            if let Some(terminal) = response.actions.iter().find(|a| a.is_terminal()) {
                let segment = terminal_segment(&response, terminal);
                self.replace_segment(assistant, placeholder, segment);
                return Ok(SettleReason::Terminal);
            }

            let segment = Segment {
                content: response.message.clone(),
                kind: SegmentKind::Response,
                actions: response
                    .actions
                    .iter()
                    .cloned()
                    .map(ActionRecord::pending)
                    .collect(),
            };
            self.replace_segment(assistant, placeholder, segment);

            if response.actions.is_empty() {
                return Ok(SettleReason::NoActions);
            }

            self.set_state(AgentState::ExecutingActions { round });
            feedback = self
                .execute_all(assistant, placeholder, &response.actions, &mut document)
                .await?;

            checkpoint(cancel)?;

            if rounds.should_stop() {
                tracing::warn!(rounds = rounds.rounds(), "round limit reached");
                self.push_segment(
                    assistant,
                    Segment {
                        content: format!(
                            "Stopped after {} model rounds without finishing.",
                            rounds.rounds()
                        ),
                        kind: SegmentKind::Response,
                        actions: Vec::new(),
                    },
                );
                return Ok(SettleReason::RoundLimit);
            }
        }
    }

    /// Run the actions of one response in order. Failed actions do not stop
    /// the rest. Only a failed session rebind after `switch_tab` is fatal.
    async fn execute_all(
        &mut self,
        message_index: usize,
        segment_index: usize,
        actions: &[Action],
        document: &mut Arc<dyn DocumentHandle>,
    ) -> SidePilotResult<Vec<ActionOutcome>> {
        let gap = self.config.action_gap();
        let mut outcomes = Vec::with_capacity(actions.len());

        for (i, action) in actions.iter().enumerate() {
            if i > 0 && !gap.is_zero() {
                tokio::time::sleep(gap).await;
            }

            self.update_record(message_index, segment_index, i, None);
            let result = self
                .executor
                .execute(action, document.as_ref(), self.snapshots.address_map())
                .await;
            self.update_record(message_index, segment_index, i, Some(result.clone()));

            if let Action::SwitchTab(switch) = action {
                if result.success {
                    *document = self.rebind_session(&switch.tab_id).await?;
                }
            }

            outcomes.push(ActionOutcome {
                action: action.clone(),
                success: result.success,
                description: result.description,
            });
        }
        Ok(outcomes)
    }

    async fn ensure_session(&mut self) -> SidePilotResult<Arc<dyn DocumentHandle>> {
        if let Some(session) = &self.session {
            let document = self.sessions.current_document(session);
            match document.page_info().await {
                Ok(page) => {
                    self.check_supported(&page.url).await?;
                    return Ok(document);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "session unusable, reconnecting");
                    if let Some(stale) = self.session.take() {
                        self.sessions.close(stale).await;
                    }
                }
            }
        }

        let session = self.sessions.connect().await?;
        let document = self.sessions.current_document(&session);
        tracing::info!(session = %session.id, target_id = %session.target.id, "session acquired");
        self.session = Some(session);

        let page = document.page_info().await?;
        self.check_supported(&page.url).await?;
        Ok(document)
    }

    async fn check_supported(&mut self, url: &str) -> SidePilotResult<()> {
        if is_supported_url(url) {
            return Ok(());
        }
        tracing::warn!(url, "document cannot be automated, closing session");
        if let Some(session) = self.session.take() {
            self.sessions.close(session).await;
        }
        Err(SidePilotError::UnsupportedDocument(url.to_string()))
    }

    async fn rebind_session(&mut self, tab_id: &str) -> SidePilotResult<Arc<dyn DocumentHandle>> {
        if let Some(session) = &self.session {
            if session.target.id == tab_id {
                return Ok(self.sessions.current_document(session));
            }
        }
        if let Some(old) = self.session.take() {
            self.sessions.close(old).await;
        }
        let session = self.sessions.connect_to(tab_id).await?;
        let document = self.sessions.current_document(&session);
        // Ids from the previous tab's snapshot do not address the new one.
        self.snapshots.invalidate();
        tracing::info!(session = %session.id, target_id = %tab_id, "session rebound to activated tab");
        self.session = Some(session);
        Ok(document)
    }

    /// Conversation entries from `messages[..end]`. Placeholders and error
    /// segments are not part of what the model sees.
    fn history_for_request(&self, end: usize) -> Vec<ConversationEntry> {
        let mut entries = Vec::new();
        for message in &self.messages[..end.min(self.messages.len())] {
            if message.is_user {
                entries.push(ConversationEntry {
                    role: EntryRole::User,
                    content: message.content.clone(),
                });
                continue;
            }
            for segment in message.segments.iter().filter(|s| s.kind == SegmentKind::Response) {
                let mut content = segment.content.clone();
                if !segment.actions.is_empty() {
                    let actions: Vec<&Action> = segment.actions.iter().map(|r| &r.action).collect();
                    let json = serde_json::to_string(&actions).unwrap_or_default();
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str("Actions: ");
                    content.push_str(&json);
                }
                if !content.is_empty() {
                    entries.push(ConversationEntry {
                        role: EntryRole::Assistant,
                        content,
                    });
                }
            }
        }
        entries
    }

    /// Drop the in-flight "thinking" segment. An assistant message left with
    /// nothing else in it is removed too.
    fn discard_placeholder(&mut self) {
        let Some(index) = self.assistant else {
            return;
        };
        let Some(message) = self.messages.get_mut(index) else {
            return;
        };
        if message.segments.last().is_some_and(|s| s.kind == SegmentKind::Thinking) {
            let segment_index = message.segments.len() - 1;
            message.segments.pop();
            self.events.publish(EngineEvent::SegmentRemoved {
                message_index: index,
                segment_index,
            });
        }
        if self.messages[index].segments.is_empty() {
            self.messages.remove(index);
            self.events.publish(EngineEvent::MessageRemoved {
                message_index: index,
            });
            self.assistant = None;
        }
    }

    /// Record a fatal error as the last segment of the turn.
    fn fail_turn(&mut self, error: &SidePilotError) -> String {
        let text = match error {
            SidePilotError::UnsupportedDocument(url) => format!(
                "This page ({url}) can't be automated. Please navigate to a standard website."
            ),
            other => format!("Error: {other}"),
        };

        let index = match self.assistant {
            Some(index) => index,
            None => {
                let index = self.push_message(Message::assistant());
                self.assistant = Some(index);
                index
            }
        };
        if let Some(message) = self.messages.get_mut(index) {
            if message.segments.last().is_some_and(|s| s.kind == SegmentKind::Thinking) {
                let segment_index = message.segments.len() - 1;
                message.segments.pop();
                self.events.publish(EngineEvent::SegmentRemoved {
                    message_index: index,
                    segment_index,
                });
            }
        }
        self.push_segment(index, Segment::error(text.clone()));
        text
    }

    /// The assistant message shows its last response once the turn is over.
    fn finalize_assistant(&mut self) {
        let Some(message) = self.assistant.and_then(|i| self.messages.get_mut(i)) else {
            return;
        };
        if let Some(last) = message
            .segments
            .iter()
            .rev()
            .find(|s| s.kind != SegmentKind::Thinking)
        {
            message.content = last.content.clone();
        }
    }

    fn set_state(&mut self, state: AgentState) {
        tracing::debug!(?state, "agent state");
        self.state = state.clone();
        self.events.publish(EngineEvent::StateChanged { state });
    }

    fn push_message(&mut self, message: Message) -> usize {
        self.messages.push(message.clone());
        let message_index = self.messages.len() - 1;
        self.events.publish(EngineEvent::MessageAppended {
            message_index,
            message,
        });
        message_index
    }

    fn push_segment(&mut self, message_index: usize, segment: Segment) -> usize {
        let Some(message) = self.messages.get_mut(message_index) else {
            return 0;
        };
        message.segments.push(segment.clone());
        let segment_index = message.segments.len() - 1;
        self.events.publish(EngineEvent::SegmentAppended {
            message_index,
            segment_index,
            segment,
        });
        segment_index
    }

    fn replace_segment(&mut self, message_index: usize, segment_index: usize, segment: Segment) {
        let Some(slot) = self
            .messages
            .get_mut(message_index)
            .and_then(|m| m.segments.get_mut(segment_index))
        else {
            return;
        };
        *slot = segment.clone();
        self.events.publish(EngineEvent::SegmentUpdated {
            message_index,
            segment_index,
            segment,
        });
    }

    /// `None` marks the record executing, `Some` settles it.
    fn update_record(
        &mut self,
        message_index: usize,
        segment_index: usize,
        action_index: usize,
        result: Option<ActionResult>,
    ) {
        let Some(record) = self
            .messages
            .get_mut(message_index)
            .and_then(|m| m.segments.get_mut(segment_index))
            .and_then(|s| s.actions.get_mut(action_index))
        else {
            return;
        };
        match &result {
            None => record.is_executing = true,
            Some(r) => {
                record.is_executing = false;
                record.success = Some(r.success);
            }
        }
        let record = record.clone();
        self.events.publish(EngineEvent::ActionStatusChanged {
            message_index,
            segment_index,
            action_index,
            record,
            result,
        });
    }
}

fn checkpoint(cancel: &CancellationToken) -> SidePilotResult<()> {
    if cancel.is_cancelled() {
        return Err(SidePilotError::Cancelled);
    }
    Ok(())
}

/// Segment for a response carrying `ask` or `done`: the terminal action is
/// its only record, and nothing else in the response runs.
fn terminal_segment(response: &GatewayResponse, terminal: &Action) -> Segment {
    let content = match terminal {
        Action::Done(done) if !done.message.is_empty() => done.message.clone(),
        Action::Ask(ask) if response.message.is_empty() => ask.query.clone(),
        _ => response.message.clone(),
    };
    Segment {
        content,
        kind: SegmentKind::Response,
        actions: vec![ActionRecord::pending(terminal.clone())],
    }
}
