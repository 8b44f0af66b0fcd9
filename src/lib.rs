pub mod agent_engine;
pub mod commands;
pub mod config;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod perception;
pub mod session;

use std::sync::Arc;

use tokio::io::AsyncBufReadExt;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::agent_engine::state::{ActionStatus, AgentState, SegmentKind, TurnOutcome};
use crate::agent_engine::{AgentEngine, EngineEvent, JsonlConversationStore};
use crate::commands::Command;
use crate::config::AppConfig;
use crate::llm::prompt::{load_system_prompt, DEFAULT_SYSTEM_PROMPT};
use crate::llm::registry::ProviderRegistry;
use crate::llm::LlmGateway;
use crate::session::CdpSessionManager;

/// Console front-end: reads instructions from stdin and runs them as turns
/// against the browser at `[browser] debugger_url`.
pub async fn run() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            tracing::debug!(error = %e, ".env not loaded");
        }
    }

    let mut app_config = match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config; using defaults");
            AppConfig::default()
        }
    };

    let registry = Arc::new(Mutex::new(ProviderRegistry::from_config(&app_config)));
    let system_prompt = load_system_prompt(&app_config.prompts).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "custom system prompt unreadable; using built-in prompt");
        DEFAULT_SYSTEM_PROMPT.to_string()
    });

    let gateway = Arc::new(LlmGateway::new(Arc::clone(&registry), system_prompt));
    let sessions = Arc::new(CdpSessionManager::new(&app_config.browser));
    let store = Arc::new(JsonlConversationStore::from_config(
        app_config.store.directory.as_deref(),
    ));
    tracing::info!(dir = %store.dir().display(), "conversation store ready");

    let mut engine = AgentEngine::new(
        app_config.agent.clone(),
        sessions,
        gateway,
        store.clone(),
    );
    tokio::spawn(render_events(engine.subscribe()));

    let (line_tx, mut line_rx) = mpsc::channel::<String>(32);
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    println!("SidePilot ready. Type an instruction, or /help.");

    loop {
        let line = tokio::select! {
            line = line_rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };

        let command = match Command::parse(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };

        match command {
            Command::Submit(text) => {
                let cancel = CancellationToken::new();
                let mut stdin_open = true;
                let turn = engine.submit(&text, cancel.clone());
                tokio::pin!(turn);

                loop {
                    tokio::select! {
                        biased;
                        result = &mut turn => {
                            if let Err(e) = result {
                                println!("{e}");
                            }
                            break;
                        }
                        _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                            println!("Cancelling...");
                            cancel.cancel();
                        }
                        extra = line_rx.recv(), if stdin_open => match extra {
                            Some(_) => println!("Still working on the previous instruction; press Ctrl+C to cancel it."),
                            None => stdin_open = false,
                        },
                    }
                }
            }
            Command::NewConversation => {
                engine.new_conversation().await;
                println!("Started a new conversation.");
            }
            Command::Conversations => match commands::list_conversations(store.as_ref()).await {
                Ok(text) => println!("{text}"),
                Err(e) => println!("{e}"),
            },
            Command::Model(name) => {
                match commands::select_model(&registry, &mut app_config, name.as_deref()).await {
                    Ok(text) => println!("{text}"),
                    Err(e) => println!("{e}"),
                }
            }
            Command::Help => println!("{}", commands::HELP),
            Command::Quit => break,
        }
    }

    engine.new_conversation().await;
    tracing::info!("sidepilot exiting");
}

async fn render_events(mut rx: broadcast::Receiver<EngineEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "renderer lagged behind engine events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            EngineEvent::SegmentAppended { segment, .. } | EngineEvent::SegmentUpdated { segment, .. } => {
                match segment.kind {
                    SegmentKind::Thinking => println!("  ... thinking"),
                    SegmentKind::Error => println!("! {}", segment.content),
                    SegmentKind::Response => {
                        if !segment.content.is_empty() {
                            println!("> {}", segment.content);
                        }
                        for record in &segment.actions {
                            if record.action.is_terminal() {
                                println!("  [{}] {}", record.action.kind(), record.action.summary());
                            }
                        }
                    }
                }
            }
            EngineEvent::ActionStatusChanged { record, result, .. } => {
                let label = match record.status() {
                    ActionStatus::Pending => "pending",
                    ActionStatus::Executing => "running",
                    ActionStatus::Succeeded => "ok",
                    ActionStatus::Failed => "failed",
                };
                match result {
                    Some(result) => println!("  [{label}] {}: {}", record.action.summary(), result.description),
                    None => println!("  [{label}] {}", record.action.summary()),
                }
            }
            EngineEvent::TurnFinished { outcome } => match outcome {
                TurnOutcome::Settled { .. } => println!("(done)"),
                TurnOutcome::Cancelled => println!("(cancelled)"),
                TurnOutcome::Errored { .. } => println!("(failed)"),
            },
            EngineEvent::StateChanged { state: AgentState::ExecutingActions { round } } => {
                tracing::debug!(round, "executing actions");
            }
            EngineEvent::StateChanged { .. }
            | EngineEvent::MessageAppended { .. }
            | EngineEvent::MessageRemoved { .. }
            | EngineEvent::SegmentRemoved { .. }
            | EngineEvent::ConversationReset => {}
        }
    }
}
