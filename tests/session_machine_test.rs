//! Feed session state machine driven by a scripted remote session

use feed_harvest::config::{Credentials, PipelineTuning, ScrollTuning};
use feed_harvest::session::{LOGGING_IN_LABEL, RaceWinner};
use feed_harvest::{
    FeedSession, IngestPipeline, SessionError, SessionOutcome, SessionState, harvest,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod common;
use common::{
    MemoryLedger, MockDriver, MockScript, RecordingStore, ScrollStep, USERNAME, media_url,
    profile,
};

fn tuning(num_retries: u32) -> ScrollTuning {
    ScrollTuning {
        num_retries,
        backoff: Duration::from_millis(1),
        step_timeout: Duration::from_secs(2),
        jitter_px: 10.0,
    }
}

fn session(script: MockScript, num_retries: u32) -> FeedSession<MockDriver> {
    FeedSession::new(
        MockDriver::new(script),
        profile(),
        Credentials::new(USERNAME, "hunter2"),
        tuning(num_retries),
    )
    .unwrap()
}

fn logged_in() -> MockScript {
    MockScript {
        root_location: "https://x.com/home".to_string(),
        ..MockScript::default()
    }
}

/// Records every observer label in order
fn label_log(session: &mut FeedSession<MockDriver>) -> Arc<parking_lot::Mutex<Vec<String>>> {
    let labels = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&labels);
    session.add_state_observer(Box::new(move |s: &str| sink.lock().push(s.to_string())));
    labels
}

#[tokio::test]
async fn test_scroll_ends_after_exactly_num_retries_failures() {
    let mut session = session(logged_in(), 3);
    let state = session.driver().state();
    let _feed = session.take_feed();

    let outcome = session.run(&CancellationToken::new()).await;

    assert!(matches!(
        outcome,
        SessionOutcome::Exhausted {
            scrolls: 0,
            published: 0
        }
    ));
    assert_eq!(session.state(), SessionState::Done);
    assert_eq!(state.attempts.load(Ordering::SeqCst), 3);
    // Jitter runs between attempts, never after the last one.
    let jitters = state
        .calls()
        .iter()
        .filter(|c| c.starts_with("scroll_by"))
        .count();
    assert_eq!(jitters, 4);
}

#[tokio::test]
async fn test_success_resets_failure_counter() {
    let script = MockScript {
        steps: vec![
            ScrollStep::placeholder(),
            ScrollStep::placeholder(),
            ScrollStep::ok(),
            ScrollStep::placeholder(),
            ScrollStep::placeholder(),
            ScrollStep::placeholder(),
            // Never reached.
            ScrollStep::ok(),
        ],
        ..logged_in()
    };
    let mut session = session(script, 3);
    let state = session.driver().state();
    let _feed = session.take_feed();

    let outcome = session.run(&CancellationToken::new()).await;

    assert!(matches!(outcome, SessionOutcome::Exhausted { scrolls: 1, .. }));
    assert_eq!(state.attempts.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_empty_container_counts_as_scroll_failure() {
    let script = MockScript {
        steps: vec![ScrollStep {
            empty_container: true,
            ..ScrollStep::default()
        }],
        ..logged_in()
    };
    let mut session = session(script, 1);
    let _feed = session.take_feed();

    let outcome = session.run(&CancellationToken::new()).await;
    assert!(matches!(outcome, SessionOutcome::Exhausted { scrolls: 0, .. }));
}

#[tokio::test]
async fn test_marker_check_waits_for_every_triggered_interception() {
    let script = MockScript {
        steps: vec![
            ScrollStep::content((0..3).map(|i| media_url(&format!("a{i}"), "small")).collect()),
            ScrollStep::content((0..3).map(|i| media_url(&format!("b{i}"), "900x900")).collect()),
            // Not matched by the image pattern.
            ScrollStep::content(vec!["https://pbs.twimg.com/media/c0?format=png".to_string()]),
        ],
        publish_delay: Duration::from_millis(20),
        ..logged_in()
    };
    let mut session = session(script, 1);
    let state = session.driver().state();
    let mut feed = session.take_feed().unwrap();

    let drain = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(asset) = feed.recv().await {
            seen.push(asset);
        }
        seen
    });

    let outcome = session.run(&CancellationToken::new()).await;
    let seen = drain.await.unwrap();

    assert!(matches!(
        outcome,
        SessionOutcome::Exhausted {
            scrolls: 3,
            published: 6
        }
    ));
    assert_eq!(state.barrier_violations.load(Ordering::SeqCst), 0);
    assert_eq!(seen.len(), 6);
    for asset in &seen {
        assert!(
            asset.locator().as_str().ends_with("name=large"),
            "{}",
            asset.locator()
        );
    }
    assert!(!session.interceptor().is_open());
    assert_eq!(state.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_already_logged_in_skips_login() {
    let mut session = session(logged_in(), 1);
    let labels = label_log(&mut session);
    let state = session.driver().state();
    let _feed = session.take_feed();

    session.run(&CancellationToken::new()).await;

    assert_eq!(
        *labels.lock(),
        vec![
            "Navigating to root",
            "Navigating to feed",
            "Scrolling feed",
            "Done"
        ]
    );
    assert!(state.position("navigate https://x.com/i/flow/login").is_none());
}

#[tokio::test]
async fn test_login_flow_reaches_feed() {
    let mut session = session(MockScript::default(), 1);
    let labels = label_log(&mut session);
    let state = session.driver().state();
    let _feed = session.take_feed();

    let outcome = session.run(&CancellationToken::new()).await;

    assert!(!outcome.is_failure());
    assert_eq!(
        *labels.lock(),
        vec![
            "Navigating to root",
            "Navigating to login",
            LOGGING_IN_LABEL,
            "Navigating to feed",
            "Scrolling feed",
            "Done"
        ]
    );

    let calls = state.calls();
    assert_eq!(calls[0], "open https://x.com");
    let fill_user = state
        .position("fill css(input[name=text]) alice")
        .expect("username typed");
    let fill_secret = state
        .position("fill css(input[name=password]) hunter2")
        .expect("password typed");
    let submit = state.position("submit css(.r-19yznuf)").expect("submitted");
    assert!(fill_user < fill_secret && fill_secret < submit);
}

#[tokio::test]
async fn test_rule_is_installed_before_feed_navigation() {
    let mut session = session(logged_in(), 1);
    let state = session.driver().state();
    let _feed = session.take_feed();

    session.run(&CancellationToken::new()).await;

    let install = state.position("install_interceptor").unwrap();
    let navigate = state.position("navigate https://x.com/alice/likes").unwrap();
    assert!(install < navigate);
    assert_eq!(state.installs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_login_surface_is_fatal() {
    let script = MockScript {
        login_marker: false,
        ..MockScript::default()
    };
    let mut session = session(script, 1);
    let labels = label_log(&mut session);
    let state = session.driver().state();
    let _feed = session.take_feed();

    let outcome = session.run(&CancellationToken::new()).await;

    assert!(matches!(
        outcome,
        SessionOutcome::Failed(SessionError::LoginSurfaceMissing)
    ));
    assert_eq!(labels.lock().last().map(String::as_str), Some("Error"));
    assert!(!labels.lock().iter().any(|l| l == LOGGING_IN_LABEL));
    assert_eq!(state.installs.load(Ordering::SeqCst), 0);
    assert!(!session.interceptor().is_open());
}

#[tokio::test]
async fn test_unexpected_post_login_location_is_fatal() {
    let script = MockScript {
        after_login_location: "https://x.com/account/access".to_string(),
        ..MockScript::default()
    };
    let mut session = session(script, 1);
    let _feed = session.take_feed();

    let outcome = session.run(&CancellationToken::new()).await;

    match outcome {
        SessionOutcome::Failed(SessionError::UnexpectedLocation(location)) => {
            assert_eq!(location, "https://x.com/account/access");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Error);
}

#[tokio::test]
async fn test_retry_banner_fails_feed_load_and_stops_rule() {
    let script = MockScript {
        feed_winner: Some(RaceWinner::Second),
        ..logged_in()
    };
    let mut session = session(script, 1);
    let state = session.driver().state();
    let mut feed = session.take_feed().unwrap();

    let outcome = session.run(&CancellationToken::new()).await;

    assert!(matches!(
        outcome,
        SessionOutcome::Failed(SessionError::FeedLoadFailed)
    ));
    assert_eq!(state.stops.load(Ordering::SeqCst), 1);
    assert!(!state.rule_active.load(Ordering::SeqCst));
    assert!(feed.recv().await.is_none());
}

#[tokio::test]
async fn test_cancel_while_waiting_for_feed() {
    let script = MockScript {
        feed_winner: None,
        ..logged_in()
    };
    let mut session = session(script, 1);
    let state = session.driver().state();
    let _feed = session.take_feed();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(Duration::from_secs(5), session.run(&cancel))
        .await
        .expect("cancellation should end the feed race");

    assert!(matches!(
        outcome,
        SessionOutcome::Failed(SessionError::Cancelled)
    ));
    assert_eq!(state.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_panicking_observer_does_not_abort_session() {
    let mut session = session(logged_in(), 1)
        .with_state_observer(Box::new(|_: &str| panic!("observer exploded")));
    let labels = label_log(&mut session);
    let _feed = session.take_feed();

    let outcome = session.run(&CancellationToken::new()).await;

    assert!(matches!(outcome, SessionOutcome::Exhausted { .. }));
    assert_eq!(labels.lock().last().map(String::as_str), Some("Done"));
}

#[tokio::test]
async fn test_unread_feed_does_not_block_shutdown() {
    let script = MockScript {
        steps: vec![ScrollStep::content(
            (0..4).map(|i| media_url(&format!("u{i}"), "small")).collect(),
        )],
        publish_delay: Duration::from_millis(1),
        ..logged_in()
    };
    let mut session = session(script, 1);
    let mut feed = session.take_feed().unwrap();

    // Read exactly one item, then stop listening while the others are still pending.
    let reader = tokio::spawn(async move {
        let first = feed.recv().await;
        drop(feed);
        first
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        session.run(&CancellationToken::new()),
    )
    .await
    .expect("session must not hang on a dropped feed");

    assert!(reader.await.unwrap().is_some());
    assert!(matches!(outcome, SessionOutcome::Exhausted { .. }));
    assert_eq!(session.interceptor().in_flight(), 0);
}

#[tokio::test]
async fn test_cancel_mid_scroll_stops_rule_and_drains_pipeline() {
    let cancel = CancellationToken::new();
    let script = MockScript {
        steps: (0..10)
            .map(|step| {
                ScrollStep::content(
                    (0..2)
                        .map(|i| media_url(&format!("s{step}i{i}"), "small"))
                        .collect(),
                )
            })
            .collect(),
        publish_delay: Duration::from_millis(5),
        cancel_after: Some((3, cancel.clone())),
        ..logged_in()
    };
    let mut session = session(script, 3);
    let state = session.driver().state();

    let store = Arc::new(RecordingStore::default());
    let ledger = Arc::new(MemoryLedger::default());
    let pipeline = Arc::new(IngestPipeline::new(
        store.clone(),
        ledger.clone(),
        PipelineTuning {
            num_workers: 2,
            item_timeout: Duration::from_secs(5),
            progress_interval: 100,
        },
    ));

    let (outcome, stats) = tokio::time::timeout(
        Duration::from_secs(5),
        harvest(&mut session, pipeline, &cancel),
    )
    .await
    .expect("harvest should finish after cancellation");

    assert!(matches!(
        outcome,
        SessionOutcome::Failed(SessionError::Cancelled)
    ));
    assert_eq!(session.state(), SessionState::Error);
    // Cancelled at the first iteration boundary after the third scroll.
    assert_eq!(state.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(state.stops.load(Ordering::SeqCst), 1);
    assert!(!session.interceptor().is_open());

    // Everything that made it onto the feed was processed one way or another.
    let published = session.interceptor().published();
    assert_eq!(published, 6);
    assert_eq!(stats.seen, published);
    assert_eq!(stats.downloaded + stats.failed + stats.duplicates, stats.seen);
    for (_, _, reason) in ledger.failures() {
        assert_eq!(reason, "download failed: cancelled");
    }
}
