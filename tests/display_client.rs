//! Behavior of the reconnecting display client against an in-process binder.
//!
//! Most tests run with a paused clock so backoff delays can be checked
//! exactly.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::{sleep, Instant};

use braille_client::{
    ClientConfig, Command, ConnectionState, Display, DisplayProperties, DisplayService, InputEvent,
};
use common::{sample_properties, BindOutcome, FakeBinder, FakeDisplayService};

type States = Arc<Mutex<Vec<(ConnectionState, Option<DisplayProperties>)>>>;

struct Harness {
    display: Display,
    binder: Arc<FakeBinder<dyn DisplayService>>,
    service: Arc<FakeDisplayService>,
    states: States,
}

impl Harness {
    fn start(script: Vec<BindOutcome>, fallback: BindOutcome) -> Self {
        let service = FakeDisplayService::new();
        let binder = FakeBinder::new(
            Arc::clone(&service) as Arc<dyn DisplayService>,
            script,
            fallback,
        );
        let states: States = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&states);
        let display = Display::new(
            Arc::clone(&binder),
            &ClientConfig::default(),
            move |state: ConnectionState, properties: Option<DisplayProperties>| {
                recorded.lock().unwrap().push((state, properties));
            },
        )
        .expect("inside a runtime");

        Self {
            display,
            binder,
            service,
            states,
        }
    }

    fn state_sequence(&self) -> Vec<ConnectionState> {
        self.states.lock().unwrap().iter().map(|(state, _)| *state).collect()
    }
}

fn millis(values: &[u64]) -> Vec<Duration> {
    values.iter().copied().map(Duration::from_millis).collect()
}

#[tokio::test(start_paused = true)]
async fn test_fewer_than_five_failures_retry_with_doubling_delays() {
    let harness = Harness::start(
        vec![BindOutcome::Fail, BindOutcome::Fail, BindOutcome::Fail],
        BindOutcome::Connect,
    );

    sleep(Duration::from_secs(30)).await;

    assert_eq!(harness.binder.bind_count(), 4);
    assert_eq!(harness.binder.bind_gaps(), millis(&[500, 1000, 2000]));
    assert_eq!(harness.state_sequence(), vec![ConnectionState::Connected]);
    assert_eq!(harness.display.connection_state(), ConnectionState::Connected);
    assert_eq!(harness.display.display_properties(), Some(sample_properties()));
}

#[tokio::test(start_paused = true)]
async fn test_four_failures_still_recover() {
    let harness = Harness::start(vec![BindOutcome::Fail; 4], BindOutcome::Connect);

    sleep(Duration::from_secs(30)).await;

    assert_eq!(harness.binder.bind_gaps(), millis(&[500, 1000, 2000, 4000]));
    assert_eq!(harness.state_sequence(), vec![ConnectionState::Connected]);
}

#[tokio::test(start_paused = true)]
async fn test_five_failures_report_error_once() {
    let harness = Harness::start(Vec::new(), BindOutcome::Fail);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.binder.bind_count(), 5);
    assert_eq!(harness.binder.bind_gaps(), millis(&[500, 1000, 2000, 4000]));
    assert_eq!(harness.state_sequence(), vec![ConnectionState::Error]);

    // Terminal: nothing else is attempted.
    sleep(Duration::from_secs(300)).await;
    assert_eq!(harness.binder.bind_count(), 5);
    assert_eq!(harness.state_sequence(), vec![ConnectionState::Error]);
    assert_eq!(harness.display.connection_state(), ConnectionState::Error);
}

#[tokio::test(start_paused = true)]
async fn test_refused_registration_counts_as_failure() {
    let harness = Harness::start(Vec::new(), BindOutcome::Connect);
    harness.service.refuse_next(2);

    sleep(Duration::from_secs(30)).await;

    assert_eq!(harness.service.registrations(), 3);
    assert_eq!(harness.binder.bind_gaps(), millis(&[500, 1000]));
    assert_eq!(harness.state_sequence(), vec![ConnectionState::Connected]);
}

#[tokio::test(start_paused = true)]
async fn test_connected_notice_from_failed_registration_is_dropped() {
    let harness = Harness::start(Vec::new(), BindOutcome::Connect);
    harness.service.time_out_after_announcing();

    sleep(Duration::from_secs(60)).await;

    assert_eq!(harness.binder.bind_count(), 5);
    assert_eq!(harness.state_sequence(), vec![ConnectionState::Error]);
    assert_eq!(harness.display.connection_state(), ConnectionState::Error);
    assert_eq!(harness.display.display_properties(), None);
    assert!(!harness.display.display_dots(&[0x01]).await);
}

#[tokio::test(start_paused = true)]
async fn test_late_connection_after_error_is_ignored() {
    let harness = Harness::start(Vec::new(), BindOutcome::Fail);
    sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.state_sequence(), vec![ConnectionState::Error]);

    harness.binder.connect_now();
    sleep(Duration::from_secs(1)).await;

    assert_eq!(harness.service.registrations(), 0);
    assert_eq!(harness.state_sequence(), vec![ConnectionState::Error]);
    assert!(!harness.display.display_dots(&[0x01]).await);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_recovers_from_error() {
    let harness = Harness::start(Vec::new(), BindOutcome::Fail);
    sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.state_sequence(), vec![ConnectionState::Error]);

    harness.binder.set_fallback(BindOutcome::Connect);
    harness.display.reconnect();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(harness.binder.bind_count(), 6);
    assert_eq!(
        harness.state_sequence(),
        vec![ConnectionState::Error, ConnectionState::Connected]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_is_ignored_unless_failed() {
    let harness = Harness::start(Vec::new(), BindOutcome::Connect);
    sleep(Duration::from_millis(10)).await;

    harness.display.reconnect();
    sleep(Duration::from_secs(5)).await;

    assert_eq!(harness.binder.bind_count(), 1);
    assert_eq!(harness.state_sequence(), vec![ConnectionState::Connected]);
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_duplicate_states_are_suppressed() {
    let harness = Harness::start(Vec::new(), BindOutcome::Connect);
    sleep(Duration::from_millis(10)).await;

    let callback = harness.service.callback();
    callback.on_display_connected(sample_properties());
    callback.on_display_disconnected();
    callback.on_display_disconnected();
    callback.on_display_connected(sample_properties());
    sleep(Duration::from_millis(10)).await;

    assert_eq!(
        harness.state_sequence(),
        vec![
            ConnectionState::Connected,
            ConnectionState::NotConnected,
            ConnectionState::Connected,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_properties_only_accompany_connected() {
    let harness = Harness::start(Vec::new(), BindOutcome::Connect);
    sleep(Duration::from_millis(10)).await;
    harness.service.callback().on_display_disconnected();
    sleep(Duration::from_millis(10)).await;

    let states = harness.states.lock().unwrap().clone();
    assert_eq!(
        states,
        vec![
            (ConnectionState::Connected, Some(sample_properties())),
            (ConnectionState::NotConnected, None),
        ]
    );
    assert_eq!(harness.display.display_properties(), None);
}

#[tokio::test(start_paused = true)]
async fn test_lost_binding_reports_not_connected_and_rebinds() {
    let harness = Harness::start(Vec::new(), BindOutcome::Connect);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(harness.state_sequence(), vec![ConnectionState::Connected]);

    let lost_at = Instant::now();
    harness.binder.last_events().disconnected();
    sleep(Duration::from_secs(5)).await;

    let binds = harness.binder.bind_times();
    assert_eq!(binds.len(), 2);
    assert_eq!(binds[1] - lost_at, Duration::from_millis(500));
    assert_eq!(
        harness.state_sequence(),
        vec![
            ConnectionState::Connected,
            ConnectionState::NotConnected,
            ConnectionState::Connected,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stale_disconnect_from_superseded_binding_is_ignored() {
    let harness = Harness::start(Vec::new(), BindOutcome::Connect);
    sleep(Duration::from_millis(10)).await;
    let first_binding = harness.binder.last_events();

    first_binding.disconnected();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(harness.binder.bind_count(), 2);

    // A second notification from the replaced binding changes nothing.
    first_binding.disconnected();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(harness.binder.bind_count(), 2);
    assert_eq!(harness.display.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_display_dots_requires_a_registered_service() {
    let harness = Harness::start(vec![BindOutcome::Hang], BindOutcome::Connect);
    sleep(Duration::from_millis(10)).await;

    assert!(!harness.display.display_dots(&[0x01, 0x03]).await);
    assert!(harness.service.dots().is_empty());

    harness.binder.connect_now();
    sleep(Duration::from_millis(10)).await;

    assert!(harness.display.display_dots(&[0x01, 0x03]).await);
    assert_eq!(harness.service.dots(), vec![vec![0x01, 0x03]]);
}

#[tokio::test(start_paused = true)]
async fn test_input_events_reach_the_current_listener() {
    let harness = Harness::start(Vec::new(), BindOutcome::Connect);
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&events);
    harness
        .display
        .set_input_listener(move |event: InputEvent| recorded.lock().unwrap().push(event));
    sleep(Duration::from_millis(10)).await;

    let callback = harness.service.callback();
    let route = InputEvent::new(Command::ROUTE, 7, 1_000);
    callback.on_input(route);
    harness.display.clear_input_listener();
    callback.on_input(InputEvent::new(Command::NAV_LINE_NEXT, 0, 2_000));
    sleep(Duration::from_millis(10)).await;

    assert_eq!(*events.lock().unwrap(), vec![route]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_events_keep_order_when_a_listener_stalls() {
    let harness = Harness::start(Vec::new(), BindOutcome::Connect);
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&events);
    harness.display.set_input_listener(move |event: InputEvent| {
        if event.event_time_millis() == 1 {
            std::thread::sleep(Duration::from_millis(50));
        }
        recorded.lock().unwrap().push(event.event_time_millis());
    });

    for _ in 0..100 {
        if harness.display.connection_state() == ConnectionState::Connected {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    let callback = harness.service.callback();

    // Deliver from a transport-like thread.
    std::thread::spawn(move || {
        for time in 1..=3 {
            callback.on_input(InputEvent::new(Command::BRAILLE_KEY, 0b0000_0001, time));
        }
    })
    .join()
    .unwrap();

    for _ in 0..100 {
        if events.lock().unwrap().len() == 3 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*events.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_is_idempotent_and_silences_callbacks() {
    let harness = Harness::start(Vec::new(), BindOutcome::Connect);
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&events);
    harness
        .display
        .set_input_listener(move |event: InputEvent| recorded.lock().unwrap().push(event));
    sleep(Duration::from_millis(10)).await;
    let callback = harness.service.callback();

    harness.display.shutdown().await;
    harness.display.shutdown().await;

    assert_eq!(harness.service.unregistrations(), 1);
    assert_eq!(harness.binder.unbind_count(), 1);

    callback.on_display_disconnected();
    callback.on_input(InputEvent::new(Command::HELP, 0, 0));
    harness.binder.last_events().disconnected();
    sleep(Duration::from_secs(10)).await;

    assert_eq!(harness.state_sequence(), vec![ConnectionState::Connected]);
    assert!(events.lock().unwrap().is_empty());
    assert_eq!(harness.binder.bind_count(), 1);
    assert!(!harness.display.display_dots(&[0xff]).await);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_retries() {
    let harness = Harness::start(Vec::new(), BindOutcome::Fail);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.binder.bind_count(), 1);

    harness.display.shutdown().await;
    sleep(Duration::from_secs(30)).await;

    assert_eq!(harness.binder.bind_count(), 1);
    assert!(harness.state_sequence().is_empty());
    assert_eq!(harness.display.connection_state(), ConnectionState::NotConnected);
}

#[tokio::test(start_paused = true)]
async fn test_drop_releases_the_binding() {
    let harness = Harness::start(Vec::new(), BindOutcome::Connect);
    sleep(Duration::from_millis(10)).await;
    let binder = Arc::clone(&harness.binder);
    let states = Arc::clone(&harness.states);
    let callback = harness.service.callback();

    drop(harness);
    callback.on_display_disconnected();
    sleep(Duration::from_secs(5)).await;

    assert_eq!(binder.unbind_count(), 1);
    assert_eq!(states.lock().unwrap().len(), 1);
}
