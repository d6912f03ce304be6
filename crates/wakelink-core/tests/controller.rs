//! End-to-end controller tests against the scripted mock link.
//!
//! All tests run on a paused clock, so the fixed delays (hydration
//! settle, list timeout, reconnect cadence) elapse instantly while
//! their ordering is still observable.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use pretty_assertions::assert_eq;
use wakelink_ble::testing::MockLink;
use wakelink_core::{
    AlarmTarget, CompanionConfig, Controller, CoreError, NewAlarm, SessionState,
};

fn test_config() -> CompanionConfig {
    CompanionConfig {
        auto_reconnect: false,
        ..CompanionConfig::default()
    }
}

fn link_with_device() -> MockLink {
    let link = MockLink::new();
    link.advertise("AA:BB:CC:DD:EE:FF", Some("PicoAlarmClock"));
    link
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

// ── Connection and hydration ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn connect_hydrates_list_and_status() {
    let link = link_with_device();
    link.respond_with(|cmd| match cmd {
        "l" => vec![
            "OK:LIST:1".to_owned(),
            "A0:Morning:0730:1:1:120".to_owned(),
        ],
        "s" => vec!["OK:STATUS:2026-01-05_09:00:00:1:0".to_owned()],
        _ => vec![],
    });
    let controller = Controller::new(link.clone(), test_config(), None);

    controller.connect().await.unwrap();
    assert_eq!(controller.current_state(), SessionState::Connected);

    // Hydration fires after the settle delay.
    sleep_ms(700).await;
    assert_eq!(link.sent_commands(), vec!["l", "s"]);

    let alarms = controller.alarms_snapshot();
    assert_eq!(alarms.len(), 1);
    assert_eq!(alarms[0].name, "Morning");
    assert_eq!(alarms[0].time_until, "2 hours");

    let status = controller.status().borrow().clone().unwrap();
    assert_eq!(status.alarm_count, 1);
    assert_eq!(status.time, "2026-01-05_09:00:00");

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn operations_require_a_connection() {
    let controller = Controller::new(MockLink::new(), test_config(), None);
    assert!(matches!(
        controller.refresh().await,
        Err(CoreError::NotConnected)
    ));
    assert!(matches!(
        controller.add(NewAlarm::at(7, 0)).await,
        Err(CoreError::NotConnected)
    ));
    controller.shutdown().await;
}

// ── Optimistic mutations ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn add_is_visible_before_any_device_response() {
    let link = link_with_device();
    let controller = Controller::new(link.clone(), test_config(), None);
    controller.connect().await.unwrap();
    sleep_ms(700).await;

    let index = controller.add(NewAlarm::at(6, 30)).await.unwrap();
    assert_eq!(index, 0);

    let alarms = controller.alarms_snapshot();
    assert_eq!(alarms.len(), 1);
    assert_eq!(alarms[0].name, "Alarm 0");
    assert!(alarms[0].enabled);
    assert!(!alarms[0].time_until.is_empty());
    assert!(link.sent_commands().contains(&"a06:30:::R".to_owned()));

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_send_reverts_the_overlay() {
    let link = link_with_device();
    let controller = Controller::new(link.clone(), test_config(), None);
    controller.connect().await.unwrap();
    sleep_ms(700).await;

    link.fail_sends(true);
    let result = controller.add(NewAlarm::at(6, 30)).await;
    assert!(matches!(result, Err(CoreError::Transport(_))));

    assert!(controller.alarms_snapshot().is_empty());
    let error = controller.last_error().borrow().clone().unwrap();
    assert!(error.contains("Transport error"), "got: {error}");

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn mutating_an_absent_alarm_fails_without_sending() {
    let link = link_with_device();
    let controller = Controller::new(link.clone(), test_config(), None);
    controller.connect().await.unwrap();
    sleep_ms(700).await;

    let removed = controller.remove(AlarmTarget::Name("Nope".to_owned())).await;
    assert!(matches!(removed, Err(CoreError::AlarmNotFound { .. })));
    let toggled = controller.toggle(9_u32).await;
    assert!(matches!(toggled, Err(CoreError::AlarmNotFound { .. })));

    let sent = link.sent_commands();
    assert!(!sent.iter().any(|c| c.starts_with('r') || c.starts_with('t')));

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn toggle_flips_the_presented_alarm() {
    let link = link_with_device();
    let controller = Controller::new(link.clone(), test_config(), None);
    controller.connect().await.unwrap();
    sleep_ms(700).await;

    link.push("A0:Morning:0730:1:1:120");
    sleep_ms(10).await;
    assert!(controller.alarms_snapshot()[0].enabled);

    controller.toggle(0_u32).await.unwrap();
    let alarms = controller.alarms_snapshot();
    assert!(!alarms[0].enabled);
    assert_eq!(alarms[0].time_until, "disabled");
    assert!(link.sent_commands().contains(&"t0".to_owned()));

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn edit_sends_remove_then_add_and_presents_the_merge() {
    let link = link_with_device();
    let controller = Controller::new(link.clone(), test_config(), None);
    controller.connect().await.unwrap();
    sleep_ms(700).await;

    link.push("A2:Workout:1800:1:1:240");
    sleep_ms(10).await;

    let mut request = NewAlarm::at(19, 15);
    request.name = Some("Workout".to_owned());
    controller.edit(2_u32, request).await.unwrap();

    let sent = link.sent_commands();
    assert_eq!(&sent[sent.len() - 2..], ["r2", "a19:15::Workout:R"]);

    let alarms = controller.alarms_snapshot();
    assert_eq!(alarms.len(), 1);
    assert_eq!(alarms[0].hour, 19);
    assert_eq!(alarms[0].minute, 15);
    assert_eq!(alarms[0].name, "Workout");

    controller.shutdown().await;
}

// ── List transfers ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn refresh_completes_when_the_announced_count_arrives() {
    let link = link_with_device();
    let controller = Controller::new(link.clone(), test_config(), None);
    controller.connect().await.unwrap();
    sleep_ms(700).await;

    link.respond_with(|cmd| match cmd {
        "l" => vec![
            "OK:LIST:2".to_owned(),
            "ALARM:0:Morning:07:30:ON:R:2 hours".to_owned(),
            "ALARM:1:Evening:21:00:OFF:O:unknown".to_owned(),
        ],
        _ => vec![],
    });

    let mut loading = controller.loading();
    controller.refresh().await.unwrap();
    sleep_ms(10).await;

    // Completed by the second record, far ahead of the timeout.
    assert!(!*loading.borrow_and_update());
    let alarms = controller.alarms_snapshot();
    assert_eq!(alarms.len(), 2);
    assert_eq!(alarms[0].name, "Morning");
    assert!(!alarms[1].enabled);
    assert_eq!(alarms[1].time_until, "unknown");

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stalled_transfer_times_out_with_partial_results() {
    let link = link_with_device();
    let controller = Controller::new(link.clone(), test_config(), None);
    controller.connect().await.unwrap();
    sleep_ms(700).await;

    link.respond_with(|cmd| match cmd {
        "l" => vec![
            "OK:LIST:3".to_owned(),
            "A0:Morning:0730:1:1:120".to_owned(),
        ],
        _ => vec![],
    });

    controller.refresh().await.unwrap();
    sleep_ms(2500).await;
    assert!(*controller.loading().borrow());
    assert_eq!(controller.alarms_snapshot().len(), 1);

    sleep_ms(1000).await;
    assert!(!*controller.loading().borrow());
    assert_eq!(controller.alarms_snapshot().len(), 1);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cleared_response_empties_the_list() {
    let link = link_with_device();
    let controller = Controller::new(link.clone(), test_config(), None);
    controller.connect().await.unwrap();
    sleep_ms(700).await;

    link.push("A0:Morning:0730:1:1:120");
    sleep_ms(10).await;
    assert_eq!(controller.alarms_snapshot().len(), 1);

    link.push("OK:ALARMS_CLEARED");
    sleep_ms(10).await;
    assert!(controller.alarms_snapshot().is_empty());

    controller.shutdown().await;
}

// ── Passive events ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn device_error_is_reported_and_the_link_stays_up() {
    let link = link_with_device();
    let controller = Controller::new(link.clone(), test_config(), None);
    controller.connect().await.unwrap();
    sleep_ms(700).await;

    link.push("ERROR:Invalid alarm format");
    sleep_ms(10).await;

    let error = controller.last_error().borrow().clone().unwrap();
    assert!(error.contains("Invalid alarm format"), "got: {error}");
    assert_eq!(controller.current_state(), SessionState::Connected);

    controller.clear_error();
    assert!(controller.last_error().borrow().is_none());

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn raw_responses_include_unrecognized_lines() {
    let link = link_with_device();
    let controller = Controller::new(link.clone(), test_config(), None);
    controller.connect().await.unwrap();
    sleep_ms(700).await;

    let mut raw = controller.raw_responses();
    link.push("TOTALLY:NEW:RESPONSE");
    sleep_ms(10).await;

    assert_eq!(&*raw.recv().await.unwrap(), "TOTALLY:NEW:RESPONSE");
    assert!(controller.alarms_snapshot().is_empty());

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn link_loss_clears_session_caches() {
    let link = link_with_device();
    link.respond_with(|cmd| match cmd {
        "l" => vec!["OK:LIST:1".to_owned(), "A0:Morning:0730:1:1:120".to_owned()],
        "s" => vec!["OK:STATUS:2026-01-05_09:00:00:1:0".to_owned()],
        _ => vec![],
    });
    let controller = Controller::new(link.clone(), test_config(), None);
    controller.connect().await.unwrap();
    sleep_ms(700).await;
    assert_eq!(controller.alarms_snapshot().len(), 1);
    assert!(controller.status().borrow().is_some());

    link.drop_link();
    sleep_ms(10).await;

    assert_eq!(controller.current_state(), SessionState::Disconnected);
    assert!(controller.alarms_snapshot().is_empty());
    assert!(controller.status().borrow().is_none());

    controller.shutdown().await;
}

// ── Reconnection supervision ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn supervisor_retries_on_the_ordinary_cadence() {
    let link = link_with_device();
    link.refuse_connections();
    let config = CompanionConfig::default();
    let controller = Controller::new(link.clone(), config, None);

    sleep_ms(1000).await;
    assert_eq!(link.connect_attempts(), 1);
    assert!(controller.last_error().borrow().is_some());

    // Refused connects must not trigger an early retry; the single
    // attempt stands until the delay elapses.
    sleep_ms(4000).await;
    assert_eq!(link.connect_attempts(), 1);

    // The next attempt lands after the fixed ten-second delay.
    sleep_ms(6000).await;
    assert_eq!(link.connect_attempts(), 2);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn supervisor_reconnects_after_link_loss() {
    let link = link_with_device();
    let controller = Controller::new(link.clone(), CompanionConfig::default(), None);

    sleep_ms(1000).await;
    assert_eq!(controller.current_state(), SessionState::Connected);
    let attempts_before = link.connect_attempts();

    link.drop_link();
    sleep_ms(1000).await;

    assert_eq!(controller.current_state(), SessionState::Connected);
    assert!(link.connect_attempts() > attempts_before);

    controller.shutdown().await;
}
