mod common;

use std::time::Duration;

use tokio::time::Instant;

use sidepilot_lib::agent_engine::state::{
    Action, HistoryAction, KeyboardAction, NavigateAction, WaitAction,
};
use sidepilot_lib::executor::{ActionExecutor, SettlePolicy, VisualCues};
use sidepilot_lib::perception::ElementAddressMap;

use common::*;

fn policy() -> SettlePolicy {
    SettlePolicy {
        timeout: Duration::from_secs(10),
        poll_interval: Duration::from_millis(100),
        grace: Duration::from_millis(500),
    }
}

fn executor() -> ActionExecutor {
    ActionExecutor::new(policy(), VisualCues::new(true))
}

fn search_map() -> ElementAddressMap {
    let mut map = ElementAddressMap::new();
    map.rebuild(&search_tree());
    map
}

#[tokio::test(start_paused = true)]
async fn click_hits_the_element_center() {
    let page = doc();
    let result = executor().execute(&click("7"), page.as_ref(), &search_map()).await;

    assert!(result.success, "{}", result.description);
    assert_eq!(result.description, "clicked button \"Go\"");
    assert_eq!(page.ops(), vec!["hover:120,90", "click:120,90"]);
}

#[tokio::test(start_paused = true)]
async fn unknown_target_fails_without_touching_the_page() {
    let page = doc();
    let result = executor().execute(&click("42"), page.as_ref(), &search_map()).await;

    assert!(!result.success);
    assert_eq!(result.description, "target not found");
    assert!(page.ops().is_empty());
}

#[tokio::test(start_paused = true)]
async fn degraded_match_is_used_and_reported() {
    let page = doc();
    let result = executor().execute(&click("Go"), page.as_ref(), &search_map()).await;

    assert!(result.success);
    assert!(result.description.contains("degraded match"), "{}", result.description);
    assert_eq!(page.times_of("click").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn input_focuses_clears_then_types() {
    let page = doc();
    let result = executor().execute(&input("5", "cats"), page.as_ref(), &search_map()).await;

    assert!(result.success);
    assert_eq!(result.description, "typed \"cats\" into textbox \"Search\"");
    assert_eq!(page.ops(), vec!["focus:5", "clear:5", "type:cats"]);
}

#[tokio::test(start_paused = true)]
async fn operation_errors_become_failed_results() {
    let page = doc();
    page.fail("click");
    let result = executor().execute(&click("7"), page.as_ref(), &search_map()).await;

    assert!(!result.success);
    assert!(result.description.starts_with("error: "), "{}", result.description);
}

#[tokio::test(start_paused = true)]
async fn keyboard_requires_a_key() {
    let page = doc();
    let exec = executor();
    let map = search_map();

    let empty = Action::Keyboard(KeyboardAction { key: "  ".into(), description: None });
    let result = exec.execute(&empty, page.as_ref(), &map).await;
    assert!(!result.success);

    let enter = Action::Keyboard(KeyboardAction { key: "Enter".into(), description: None });
    let result = exec.execute(&enter, page.as_ref(), &map).await;
    assert!(result.success);
    assert_eq!(page.ops(), vec!["press:Enter"]);
}

#[tokio::test(start_paused = true)]
async fn navigation_actions_reach_the_document() {
    let page = doc();
    let exec = executor();
    let map = search_map();

    let nav = Action::Navigate(NavigateAction { url: "https://example.org/".into(), description: None });
    assert!(exec.execute(&nav, page.as_ref(), &map).await.success);
    assert!(exec.execute(&Action::Back(HistoryAction::default()), page.as_ref(), &map).await.success);
    assert!(exec.execute(&Action::Forward(HistoryAction::default()), page.as_ref(), &map).await.success);

    assert_eq!(page.ops(), vec!["navigate:https://example.org/", "back", "forward"]);
}

#[tokio::test(start_paused = true)]
async fn wait_sleeps_duration_plus_grace() {
    let page = doc();
    let wait = Action::Wait(WaitAction { duration_ms: 2_000, description: None });

    let started = Instant::now();
    let result = executor().execute(&wait, page.as_ref(), &search_map()).await;

    assert!(result.success);
    assert_eq!(started.elapsed(), Duration::from_millis(2_500));
}

#[tokio::test(start_paused = true)]
async fn wait_is_clamped_to_the_maximum() {
    let page = doc();
    let wait = Action::Wait(WaitAction { duration_ms: 1_000_000_000_000, description: None });
    let exec = executor().with_max_wait(Duration::from_secs(5));

    let started = Instant::now();
    let result = exec.execute(&wait, page.as_ref(), &search_map()).await;

    assert!(result.success);
    assert_eq!(started.elapsed(), Duration::from_millis(5_500));
    assert_eq!(result.description, "waited 5000 ms (clamped from 1000000000000 ms)");
}

#[tokio::test(start_paused = true)]
async fn terminal_actions_are_refused() {
    let page = doc();
    let result = executor().execute(&done("finished"), page.as_ref(), &search_map()).await;
    assert!(!result.success);
    let result = executor().execute(&ask("which?"), page.as_ref(), &search_map()).await;
    assert!(!result.success);
    assert!(page.ops().is_empty());
}

#[tokio::test(start_paused = true)]
async fn settle_wait_gives_up_after_the_timeout() {
    let page = doc();
    page.set_ready_state("loading");

    let started = Instant::now();
    let ready = policy().wait(page.as_ref()).await;

    assert!(!ready);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10), "{elapsed:?}");
    assert!(elapsed <= Duration::from_millis(10_600), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn settle_wait_returns_once_complete() {
    let page = doc();
    let started = Instant::now();
    assert!(policy().wait(page.as_ref()).await);
    assert_eq!(started.elapsed(), Duration::from_millis(500));
}

fn doc() -> std::sync::Arc<FakeDocument> {
    FakeDocument::new("T1", "https://example.com/", vec![search_tree()])
}
