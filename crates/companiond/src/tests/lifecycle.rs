//! Lifecycle edge cases exercised directly against the server API.

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;

use companion_config::GRPC_CHANNEL;

use crate::events::{EventReporter, OutcomeKind, ServerEvent};
use crate::ports::{ConfigurationError, PortSet};
use crate::scratch::TemporaryDirectory;
use crate::server::{
    Companion, CompanionServer, DrainReport, ServerOptions, ServerState, StartError,
    TerminationCause,
};

use super::support::{
    ControlledTarget, RecordingEventReporter, ScriptedExecutor, TestClient, WAIT_TIMEOUT,
    build_companion, build_companion_with, free_port, shut_down, wait_until,
};

fn idle_companion() -> (CompanionServer, Arc<RecordingEventReporter>) {
    let reporter = Arc::new(RecordingEventReporter::default());
    let server = build_companion(
        Arc::new(ControlledTarget::default()),
        Arc::new(ScriptedExecutor::default()),
        Arc::clone(&reporter),
    );
    (server, reporter)
}

#[tokio::test]
async fn terminate_before_start_prevents_startup() {
    let (server, reporter) = idle_companion();
    let port = server.ports().port(GRPC_CHANNEL).expect("primary port");

    server.terminate();
    let signal = server.termination_signal();
    assert!(signal.has_fired());
    assert_eq!(signal.cause(), Some(TerminationCause::Normal));

    let started = server.start().await;
    assert!(
        matches!(started, Err(StartError::Terminated { .. })),
        "expected start to report termination, got {started:?}"
    );
    assert_eq!(server.state(), ServerState::Terminated);
    assert!(!server.scratch_path().exists());
    assert!(
        std::net::TcpListener::bind(("127.0.0.1", port)).is_ok(),
        "the primary port should never have been bound"
    );
    assert_eq!(
        reporter.count(|event| matches!(event, ServerEvent::StartRequested { .. })),
        0
    );
}

#[tokio::test]
async fn terminate_during_start_still_terminates_normally() {
    let (server, _reporter) = idle_companion();
    let starting = tokio::spawn({
        let server = server.clone();
        async move { server.start().await }
    });
    assert!(wait_until(|| server.state() != ServerState::Idle).await);

    server.terminate();
    let started = tokio::time::timeout(WAIT_TIMEOUT, starting)
        .await
        .expect("start finished in time")
        .expect("start task completed");
    assert!(started.is_ok(), "start should complete before draining: {started:?}");

    let cause = tokio::time::timeout(WAIT_TIMEOUT, server.termination_signal().wait())
        .await
        .expect("termination signal fired in time");
    assert_eq!(cause, TerminationCause::Normal);
    assert_eq!(server.state(), ServerState::Terminated);
}

#[tokio::test]
async fn repeated_start_after_termination_replays_the_outcome() {
    let (server, _reporter) = idle_companion();
    server.start().await.expect("server starts");
    assert_eq!(shut_down(&server).await, TerminationCause::Normal);

    let restarted = server.start().await;
    assert!(
        restarted.is_ok(),
        "a repeated start observes the original outcome: {restarted:?}"
    );
    assert_eq!(server.state(), ServerState::Terminated);
}

#[tokio::test]
async fn a_client_that_stops_reading_cannot_stall_termination() {
    let reporter = Arc::new(RecordingEventReporter::default());
    let server = build_companion_with(
        Arc::new(ControlledTarget::default()),
        Arc::new(ScriptedExecutor::default()),
        Arc::clone(&reporter),
        ServerOptions::default().with_grace_period(Duration::from_millis(100)),
    );
    let handle = server.start().await.expect("server starts");
    let address = handle.address(GRPC_CHANNEL).expect("primary bound");

    let mut client = TestClient::connect(address).await;
    client.send_line(r#"{"command":"flood"}"#).await;
    assert!(wait_until(|| server.snapshot().in_flight == 1).await);

    server.terminate();
    let cause = tokio::time::timeout(WAIT_TIMEOUT, server.termination_signal().wait())
        .await
        .expect("termination signal fired while the client was not reading");
    assert_eq!(cause, TerminationCause::Normal);
    assert_eq!(server.state(), ServerState::Terminated);
    assert!(!server.scratch_path().exists());

    let report = reporter.events().iter().find_map(|event| match event {
        ServerEvent::Terminated { report, .. } => Some(*report),
        _ => None,
    });
    assert_eq!(
        report,
        Some(DrainReport {
            in_flight_at_drain: 1,
            force_cancelled: 1
        })
    );
    assert_eq!(reporter.outcomes(), vec![OutcomeKind::InternalError]);
    drop(client);
}

#[tokio::test]
async fn events_are_flushed_before_the_signal_fires() {
    let (server, reporter) = idle_companion();
    server.start().await.expect("server starts");
    shut_down(&server).await;

    let events = reporter.events();
    let names: Vec<_> = events.iter().map(ServerEvent::name).collect();
    assert_eq!(names.first(), Some(&"start_requested"));
    assert_eq!(names.last(), Some(&"terminated"));
    assert!(names.contains(&"running"));
    assert!(names.contains(&"drain_started"));
}

#[tokio::test]
async fn snapshot_reports_bound_channels() {
    let (server, _reporter) = idle_companion();
    let idle = server.snapshot();
    assert_eq!(idle.state, ServerState::Idle);
    assert_eq!(idle.channels[GRPC_CHANNEL].bound, None);

    let handle = server.start().await.expect("server starts");
    let running = server.snapshot();
    assert_eq!(running.state, ServerState::Running);
    assert_eq!(running.udid, "controlled-target");
    assert!(running.channels[GRPC_CHANNEL].required);
    assert_eq!(running.channels[GRPC_CHANNEL].bound, handle.address(GRPC_CHANNEL));

    let json = serde_json::to_value(&running).expect("snapshot serializes");
    assert_eq!(json["state"], "running");

    shut_down(&server).await;
    let finished = server.snapshot();
    assert_eq!(finished.termination, Some(TerminationCause::Normal));
}

#[tokio::test]
async fn companion_trait_objects_drive_the_lifecycle() {
    let (server, _reporter) = idle_companion();
    let companion: Arc<dyn Companion> = Arc::new(server);

    companion.start().await.expect("server starts");
    assert_eq!(companion.state(), ServerState::Running);
    companion.terminate();
    let cause = tokio::time::timeout(WAIT_TIMEOUT, companion.termination_signal().wait())
        .await
        .expect("termination signal fired in time");
    assert!(cause.is_normal());
    assert_eq!(companion.snapshot().state, ServerState::Terminated);
}

#[test]
fn dropping_an_idle_server_fires_the_signal() {
    let (server, reporter) = idle_companion();
    let signal = server.termination_signal();
    let scratch = server.scratch_path().to_path_buf();

    drop(server);
    assert_eq!(signal.cause(), Some(TerminationCause::Normal));
    assert!(!scratch.exists());
    assert_eq!(
        reporter.count(|event| matches!(event, ServerEvent::Terminated { .. })),
        1
    );
}

#[rstest]
#[case::ports("port set")]
#[case::scratch("temporary directory")]
#[case::reporter("event reporter")]
fn builder_requires_collaborators(#[case] missing: &'static str) {
    let mut builder = CompanionServer::builder(Arc::new(ControlledTarget::default()));
    if missing != "port set" {
        let ports = PortSet::builder()
            .required(GRPC_CHANNEL, u32::from(free_port()))
            .build()
            .expect("valid port set");
        builder = builder.ports(ports);
    }
    if missing != "temporary directory" {
        builder =
            builder.temporary_directory(TemporaryDirectory::create().expect("scratch directory"));
    }
    if missing != "event reporter" {
        let reporter: Arc<dyn EventReporter> = Arc::new(RecordingEventReporter::default());
        builder = builder.reporter(reporter);
    }

    let error = builder.build().err().expect("build should fail");
    assert_eq!(
        error,
        ConfigurationError::MissingCollaborator {
            collaborator: missing
        }
    );
}
