//! Request handling over a live primary channel.

use std::sync::Arc;

use companion_config::GRPC_CHANNEL;

use crate::events::OutcomeKind;
use crate::server::{CompanionServer, ServerHandle};

use super::support::{
    ControlledTarget, RecordingEventReporter, ScriptedExecutor, TestClient, build_companion,
    shut_down,
};

struct Running {
    server: CompanionServer,
    handle: ServerHandle,
    reporter: Arc<RecordingEventReporter>,
}

impl Running {
    async fn start() -> Self {
        let reporter = Arc::new(RecordingEventReporter::default());
        let server = build_companion(
            Arc::new(ControlledTarget::default()),
            Arc::new(ScriptedExecutor::default()),
            Arc::clone(&reporter),
        );
        let handle = server.start().await.expect("server starts");
        Self {
            server,
            handle,
            reporter,
        }
    }

    async fn client(&self) -> TestClient {
        let address = self.handle.address(GRPC_CHANNEL).expect("primary bound");
        TestClient::connect(address).await
    }
}

#[tokio::test]
async fn command_errors_keep_the_connection_open() {
    let running = Running::start().await;
    let mut client = running.client().await;

    let unsupported = client.request("teleport").await.expect("response line");
    assert_eq!(unsupported["kind"], "error");
    assert_eq!(unsupported["category"], "command");

    let failed = client.request("fail").await.expect("response line");
    assert_eq!(failed["category"], "command");
    assert!(
        failed["message"]
            .as_str()
            .is_some_and(|message| message.contains("scripted failure")),
        "unexpected message: {failed}"
    );

    let pong = client.request("ping").await.expect("response line");
    assert_eq!(pong["kind"], "result");

    shut_down(&running.server).await;
}

#[tokio::test]
async fn malformed_requests_close_the_connection() {
    let running = Running::start().await;
    let mut client = running.client().await;

    client.send_line("not json").await;
    let rejected = client.read_response().await.expect("response line");
    assert_eq!(rejected["kind"], "error");
    assert_eq!(rejected["category"], "protocol");
    assert!(rejected.get("id").is_none());
    assert!(client.read_response().await.is_none(), "connection stays open");

    shut_down(&running.server).await;
}

#[tokio::test]
async fn responses_echo_the_request_id() {
    let running = Running::start().await;
    let mut client = running.client().await;

    client.send_line(r#"{"id":7,"command":"ping"}"#).await;
    let response = client.read_response().await.expect("response line");
    assert_eq!(response["id"], 7);
    assert_eq!(response["payload"]["pong"], true);

    client.send_line(r#"{"id":8,"command":""}"#).await;
    let invalid = client.read_response().await.expect("response line");
    assert_eq!(invalid["category"], "protocol");

    shut_down(&running.server).await;
}

#[tokio::test]
async fn concurrent_connections_are_served_independently() {
    let running = Running::start().await;
    let mut first = running.client().await;
    let mut second = running.client().await;

    let (a, b) = tokio::join!(first.request("ping"), second.request("ping"));
    assert_eq!(a.expect("first response")["kind"], "result");
    assert_eq!(b.expect("second response")["kind"], "result");

    shut_down(&running.server).await;
}

#[tokio::test]
async fn dispatches_are_reported_as_events() {
    let running = Running::start().await;
    let mut client = running.client().await;
    client.request("ping").await.expect("response line");
    client.request("fail").await.expect("response line");
    client.send_line("{").await;
    client.read_response().await.expect("response line");

    shut_down(&running.server).await;
    assert_eq!(
        running.reporter.outcomes(),
        vec![
            OutcomeKind::Success,
            OutcomeKind::CommandError,
            OutcomeKind::ProtocolError,
        ]
    );
}

#[tokio::test]
async fn idle_connections_close_when_draining_begins() {
    let running = Running::start().await;
    let mut client = running.client().await;
    client.request("ping").await.expect("response line");

    shut_down(&running.server).await;
    assert!(client.read_response().await.is_none());
}
